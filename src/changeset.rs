//! Changeset-driven range invalidation. Records above the watermark mark the
//! intersecting `ways_range` / `rels_range` rows in per-run temp tables; the
//! finish step deletes the marked rows in one transaction and advances the
//! stored watermark. A later re-index then repopulates only the touched area.

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::{params, Connection};

use crate::db::{self, with_tx};
use crate::osm::OsmChangeset;

#[derive(Clone, Debug, Default)]
pub struct ApplyStats {
    pub scanned: usize,
    pub applied: usize,
    pub ways_invalidated: usize,
    pub rels_invalidated: usize,
}

pub fn apply_changesets(
    conn: &mut Connection,
    watermark: i64,
    records: &[OsmChangeset],
) -> Result<ApplyStats> {
    conn.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS delete_ways_range (wid INTEGER PRIMARY KEY);
         CREATE TEMP TABLE IF NOT EXISTS delete_rels_range (rid INTEGER PRIMARY KEY);
         DELETE FROM delete_ways_range;
         DELETE FROM delete_rels_range;",
    )?;

    let mut stats = ApplyStats::default();
    let mut max_id = watermark;
    for rec in records {
        stats.scanned += 1;
        if rec.id <= watermark || !rec.has_bbox() {
            continue;
        }
        debug!(
            "changeset {}: bbox ({}, {}) - ({}, {})",
            rec.id, rec.min_lat, rec.min_lon, rec.max_lat, rec.max_lon
        );
        // Open half-plane test against the record bbox. A failure here aborts
        // the run; stray temp rows are harmless since nothing is deleted
        // until the finish step.
        conn.execute(
            "INSERT OR IGNORE INTO delete_ways_range
             SELECT wid FROM ways_range
             WHERE latT > ?1 AND lonL < ?2 AND latB < ?3 AND lonR > ?4",
            params![rec.min_lat, rec.max_lon, rec.max_lat, rec.min_lon],
        )
        .with_context(|| format!("changeset {}: mark ways", rec.id))?;
        conn.execute(
            "INSERT OR IGNORE INTO delete_rels_range
             SELECT rid FROM rels_range
             WHERE latT > ?1 AND lonL < ?2 AND latB < ?3 AND lonR > ?4",
            params![rec.min_lat, rec.max_lon, rec.max_lat, rec.min_lon],
        )
        .with_context(|| format!("changeset {}: mark rels", rec.id))?;
        stats.applied += 1;
        max_id = max_id.max(rec.id);
    }

    let (ways_invalidated, rels_invalidated) = with_tx(conn, |tx| {
        let w = tx.execute(
            "DELETE FROM ways_range WHERE wid IN (SELECT wid FROM delete_ways_range)",
            [],
        )?;
        let r = tx.execute(
            "DELETE FROM rels_range WHERE rid IN (SELECT rid FROM delete_rels_range)",
            [],
        )?;
        db::meta_set_i64(tx, "changeset", max_id)?;
        Ok((w, r))
    })?;
    stats.ways_invalidated = ways_invalidated;
    stats.rels_invalidated = rels_invalidated;

    info!(
        "changeset: {} records scanned, {} applied, {} ways and {} rels invalidated, watermark {}",
        stats.scanned, stats.applied, stats.ways_invalidated, stats.rels_invalidated, max_id
    );
    Ok(stats)
}
