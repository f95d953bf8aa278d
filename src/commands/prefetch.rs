//! `prefetch`: build the tiles covering a region at zooms 9, 12, and 15 and
//! store the blobs in per-zoom tables of a cache database. Tiles are built on
//! a rayon pool, one read-only store per worker, sharing one object cache;
//! blobs stream over a channel to a single writer on the cache database.

use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Result};
use log::{info, warn};
use rayon::prelude::*;
use rusqlite::params;

use crate::cache::{ObjectCache, CACHE_BYTES};
use crate::config::Config;
use crate::db;
use crate::geom::{self, Bbox};
use crate::sample::SampleThresholds;
use crate::store::Store;
use crate::tiler;

pub const PREFETCH_ZOOMS: [i32; 3] = [9, 12, 15];

fn region_bbox(region: &str) -> Result<Bbox> {
    Ok(match region {
        "WW" => Bbox {
            lat_t: geom::MERCATOR_LAT_MAX,
            lon_l: -180.0,
            lat_b: -geom::MERCATOR_LAT_MAX,
            lon_r: 180.0,
        },
        "US" => Bbox { lat_t: 49.5, lon_l: -125.0, lat_b: 24.3, lon_r: -66.5 },
        "CO" => Bbox { lat_t: 41.1, lon_l: -109.1, lat_b: 36.9, lon_r: -102.1 },
        _ => bail!("unknown prefetch region {region} (expected WW, US, or CO)"),
    })
}

/// Inclusive tile index span covering `bbox` at `zoom`.
fn tile_span(bbox: &Bbox, zoom: i32) -> (i32, i32, i32, i32) {
    let half = 1i64 << (zoom - 1);
    let clamp = |t: f64| (t.floor() as i64).clamp(-half, half - 1) as i32;
    let (tx0, ty0) = geom::coord2tile(bbox.lat_t, bbox.lon_l, zoom);
    let (tx1, ty1) = geom::coord2tile(bbox.lat_b, bbox.lon_r, zoom);
    (clamp(tx0), clamp(tx1), clamp(ty0), clamp(ty1))
}

pub fn tile_id(zoom: i32, x: i32, y: i32) -> i64 {
    (1i64 << zoom) * y as i64 + x as i64
}

pub fn cmd_prefetch(
    region: &str,
    smem: f64,
    cache_db: &Path,
    index_db: &Path,
    threads: Option<usize>,
    cfg: &Config,
) -> Result<()> {
    let bbox = region_bbox(region)?;
    let cache_bytes = if smem > 0.0 {
        (smem * (1u64 << 30) as f64) as usize
    } else {
        cfg.cache_bytes.unwrap_or(CACHE_BYTES)
    };
    if let Some(n) = threads {
        if let Err(err) = rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
            warn!("prefetch: thread pool already initialized, --threads {n} ignored: {err}");
        }
    }

    let mut out = db::open_rw(cache_db)?;
    out.execute_batch(
        "CREATE TABLE IF NOT EXISTS tbl_tile9 (id INTEGER PRIMARY KEY, blob BLOB);
         CREATE TABLE IF NOT EXISTS tbl_tile12 (id INTEGER PRIMARY KEY, blob BLOB);
         CREATE TABLE IF NOT EXISTS tbl_tile15 (id INTEGER PRIMARY KEY, blob BLOB);",
    )?;

    let cache = Arc::new(ObjectCache::new(cache_bytes));
    let thresholds = SampleThresholds::new();
    let (tx_msg, rx_msg) = mpsc::channel::<(i32, i32, i32, Vec<u8>)>();

    // Parallel producers build tiles; this thread is the single DB writer.
    let producer = {
        let tx_msg = tx_msg.clone();
        let cache = Arc::clone(&cache);
        let index_db = index_db.to_path_buf();
        thread::spawn(move || {
            for zoom in PREFETCH_ZOOMS {
                let (x0, x1, y0, y1) = tile_span(&bbox, zoom);
                info!(
                    "prefetch: zoom {zoom}: {} columns x {} rows",
                    (x1 - x0 + 1),
                    (y1 - y0 + 1)
                );
                (y0..=y1).into_par_iter().for_each_init(
                    || (Store::open(&index_db), tx_msg.clone()),
                    |(store, sender), y| {
                        let store = match store {
                            Ok(store) => store,
                            Err(err) => {
                                warn!("prefetch: open {}: {err}", index_db.display());
                                return;
                            }
                        };
                        for x in x0..=x1 {
                            match tiler::build_tile(store, &cache, &thresholds, zoom, x, y) {
                                Ok(blob) => {
                                    let _ = sender.send((zoom, x, y, blob));
                                }
                                Err(err) => {
                                    warn!("prefetch: tile {zoom}/{x}/{y} failed: {err}")
                                }
                            }
                        }
                    },
                );
            }
        })
    };
    drop(tx_msg);

    let mut written = 0usize;
    {
        let mut stmt9 = out.prepare("INSERT OR REPLACE INTO tbl_tile9(id, blob) VALUES (?1, ?2)")?;
        let mut stmt12 =
            out.prepare("INSERT OR REPLACE INTO tbl_tile12(id, blob) VALUES (?1, ?2)")?;
        let mut stmt15 =
            out.prepare("INSERT OR REPLACE INTO tbl_tile15(id, blob) VALUES (?1, ?2)")?;
        for (zoom, x, y, blob) in rx_msg {
            let stmt = match zoom {
                9 => &mut stmt9,
                12 => &mut stmt12,
                _ => &mut stmt15,
            };
            stmt.execute(params![tile_id(zoom, x, y), blob])?;
            written += 1;
        }
    }
    let _ = producer.join();

    info!("prefetch: {written} tiles written to {}", cache_db.display());
    Ok(())
}
