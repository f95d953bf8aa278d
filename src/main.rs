use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use osmtiles::commands;
use osmtiles::config::Config;

#[derive(Parser, Debug)]
#[command(name = "osmtiles", version, about = "OSM tile database tools")]
struct Cli {
    /// Log level (trace|debug|info|warn|error)
    #[arg(long)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a style document and an OSM XML extract into an index database
    Import {
        /// Path to style.xml
        style: PathBuf,
        /// Path to the OSM XML extract
        input: PathBuf,
        /// Path to the SQLite index database
        db: PathBuf,
    },

    /// Invalidate range tables from an OSM changeset file
    Changeset {
        /// Baseline changeset id; only records above it apply
        change_id: i64,
        /// Path to the changeset XML file
        changesets: PathBuf,
        /// Path to the SQLite index database
        db: PathBuf,
    },

    /// Serve one request: /osmdbv4/z/x/y or /search/a+b
    Select {
        /// Path to the SQLite index database
        db: PathBuf,
        /// Request path
        request: String,
        /// Output file (default: out.osmdb.gz for tiles, out.xml.gz for searches)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Build per-zoom tile tables covering a region
    Prefetch {
        /// Region to cover
        #[arg(long = "pf", default_value = "US")]
        region: String,
        /// Shared object cache budget in GiB (0 uses the default)
        smem: f64,
        /// Output SQLite cache database
        cache_db: PathBuf,
        /// Source SQLite index database
        index_db: PathBuf,
        /// Number of worker threads (rayon)
        #[arg(long)]
        threads: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config { log_level: cli.log_level.clone(), ..Config::default() }.overlay_env();
    cfg.init_logging();

    match cli.command {
        Commands::Import { style, input, db } => commands::import::cmd_import(&style, &input, &db),
        Commands::Changeset { change_id, changesets, db } => {
            commands::changeset::cmd_changeset(change_id, &changesets, &db)
        }
        Commands::Select { db, request, out } => {
            commands::select::cmd_select(&db, &request, out, &cfg)
        }
        Commands::Prefetch { region, smem, cache_db, index_db, threads } => {
            let threads = threads.or(cfg.threads);
            commands::prefetch::cmd_prefetch(&region, smem, &cache_db, &index_db, threads, &cfg)
        }
    }
}
