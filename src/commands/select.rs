//! `select`: serve a single request against the index database. Tile
//! requests (`/osmdbv4/z/x/y`) write the gzipped tile blob; search requests
//! (`/search/a+b`) write a gzipped XML result document.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, warn};

use crate::cache::{ObjectCache, CACHE_BYTES};
use crate::config::Config;
use crate::sample::SampleThresholds;
use crate::store::Store;
use crate::tiler;

#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    Tile { zoom: i32, x: i32, y: i32 },
    Search(Vec<String>),
}

pub fn parse_request(request: &str) -> Result<Request> {
    let parts: Vec<&str> = request.trim_start_matches('/').split('/').collect();
    match parts.as_slice() {
        ["osmdbv4", z, x, y] => Ok(Request::Tile {
            zoom: z.parse()?,
            x: x.parse()?,
            y: y.parse()?,
        }),
        ["search", terms] => {
            let terms: Vec<String> = terms
                .split('+')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            if terms.is_empty() {
                bail!("empty search request");
            }
            Ok(Request::Search(terms))
        }
        _ => bail!("unsupported request: {request}"),
    }
}

pub fn cmd_select(db: &Path, request: &str, out: Option<PathBuf>, cfg: &Config) -> Result<()> {
    let store = Store::open(db)?;
    match parse_request(request)? {
        Request::Tile { zoom, x, y } => {
            let cache = ObjectCache::new(cfg.cache_bytes.unwrap_or(CACHE_BYTES));
            let thresholds = SampleThresholds::new();
            let blob = tiler::build_tile(&store, &cache, &thresholds, zoom, x, y)?;
            let path = out.unwrap_or_else(|| PathBuf::from("out.osmdb.gz"));
            write_gz(&path, &blob)?;
            info!(
                "select: tile {zoom}/{x}/{y} -> {} ({} bytes raw)",
                path.display(),
                blob.len()
            );
        }
        Request::Search(terms) => {
            let xml = search_xml(&store, &terms);
            let path = out.unwrap_or_else(|| PathBuf::from("out.xml.gz"));
            write_gz(&path, xml.as_bytes())?;
            info!("select: search [{}] -> {}", terms.join(", "), path.display());
        }
    }
    Ok(())
}

fn search_xml(store: &Store, terms: &[String]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<results>\n");
    for term in terms {
        xml.push_str(&format!("  <token text=\"{}\">\n", xml_escape(term)));
        let queries = [
            ("node", store.search_nodes(term)),
            ("way", store.search_ways(term)),
            ("rel", store.search_rels(term)),
        ];
        for (kind, hits) in queries {
            match hits {
                Ok(hits) => {
                    for h in hits {
                        xml.push_str(&format!(
                            "    <match kind=\"{kind}\" id=\"{}\" name=\"{}\" lat=\"{}\" lon=\"{}\" class=\"{}\" rank=\"{}\"/>\n",
                            h.id,
                            xml_escape(&h.name),
                            h.lat,
                            h.lon,
                            h.class,
                            h.rank
                        ));
                    }
                }
                // Degrade to the bare token element already emitted above.
                Err(err) => warn!("select: {kind} search for '{term}' failed: {err}"),
            }
        }
        xml.push_str("  </token>\n");
    }
    xml.push_str("</results>\n");
    xml
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn write_gz(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = File::create(path)?;
    let mut enc = GzEncoder::new(file, Compression::default());
    enc.write_all(bytes)?;
    enc.finish()?;
    Ok(())
}
