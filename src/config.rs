use std::env;

use env_logger::Env;

/// Runtime settings merged from CLI flags and `OSMTILES_*` environment
/// defaults. Environment values win when set.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub threads: Option<usize>,
    pub cache_bytes: Option<usize>,
    pub log_level: Option<String>,
}

impl Config {
    pub fn from_env_defaults() -> Self {
        let threads = env::var("OSMTILES_THREADS").ok().and_then(|s| s.parse::<usize>().ok());
        let cache_bytes = env::var("OSMTILES_CACHE_BYTES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok());
        let log_level = env::var("OSMTILES_LOG").ok();
        Self { threads, cache_bytes, log_level }
    }

    pub fn overlay_env(mut self) -> Self {
        let env_cfg = Config::from_env_defaults();
        if env_cfg.threads.is_some() {
            self.threads = env_cfg.threads;
        }
        if env_cfg.cache_bytes.is_some() {
            self.cache_bytes = env_cfg.cache_bytes;
        }
        if env_cfg.log_level.is_some() {
            self.log_level = env_cfg.log_level;
        }
        self
    }

    /// Install the env_logger backend with the merged log level as the
    /// default filter. `RUST_LOG` still overrides per module, which is how
    /// the tile driver's per-tile debug lines get switched on in isolation.
    pub fn init_logging(&self) {
        let filter = self.log_level.as_deref().unwrap_or("info");
        // try_init: integration tests invoke commands repeatedly in one
        // process, and only the first installation can win.
        let _ = env_logger::Builder::from_env(Env::default().default_filter_or(filter)).try_init();
    }
}
