//! Read side of the persistent store. Every worker thread owns one `Store`
//! (and with it one read-only connection plus its statement cache), which is
//! what lets range and search queries run concurrently without contending on
//! a shared cursor.

use std::path::Path;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db;
use crate::geom::Bbox;
use crate::model::{Member, MemberKind, Node, Relation, RelType, Way, WayFlags};

pub struct Store {
    conn: Connection,
}

#[derive(Clone, Debug)]
pub struct SearchHit {
    pub id: i64,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub class: i32,
    pub rank: i32,
}

/// At most this many hits per search query, ranked by class rank.
pub const SEARCH_LIMIT: usize = 10;

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Store> {
        Ok(Store { conn: db::open_ro(path)? })
    }

    /// For tests and single-process tools that already hold a connection.
    pub fn from_connection(conn: Connection) -> Store {
        Store { conn }
    }

    pub fn changeset_watermark(&self) -> Result<i64> {
        db::meta_get_i64(&self.conn, "changeset")
    }

    pub fn load_node(&self, nid: i64) -> Result<Option<Node>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT c.lat, c.lon, i.name, i.abrev, i.ele, i.st, i.class
             FROM nodes_coords c LEFT JOIN nodes_info i ON i.nid = c.nid
             WHERE c.nid = ?1",
        )?;
        let node = stmt
            .query_row(params![nid], |r| {
                Ok(Node {
                    id: nid,
                    lat: r.get(0)?,
                    lon: r.get(1)?,
                    name: r.get(2)?,
                    abrev: r.get(3)?,
                    ele: r.get::<_, Option<i32>>(4)?.unwrap_or(0),
                    st: r.get(5)?,
                    class: r.get::<_, Option<i32>>(6)?.unwrap_or(0),
                })
            })
            .optional()?;
        Ok(node)
    }

    pub fn load_way(&self, wid: i64, with_nds: bool) -> Result<Option<Way>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT name, abrev, class, layer, oneway, bridge, tunnel, cutting, center, selected
             FROM ways WHERE wid = ?1",
        )?;
        let row = stmt
            .query_row(params![wid], |r| {
                Ok(Way {
                    id: wid,
                    name: r.get(0)?,
                    abrev: r.get(1)?,
                    class: r.get(2)?,
                    layer: r.get(3)?,
                    flags: WayFlags {
                        oneway: r.get::<_, i32>(4)? as i8,
                        bridge: r.get::<_, i32>(5)? != 0,
                        tunnel: r.get::<_, i32>(6)? != 0,
                        cutting: r.get::<_, i32>(7)? != 0,
                    },
                    center: r.get::<_, i32>(8)? != 0,
                    selected: r.get::<_, i32>(9)? != 0,
                    bbox: Bbox::default(),
                    nds: Vec::new(),
                })
            })
            .optional()?;
        let Some(mut way) = row else { return Ok(None) };

        way.bbox = match self.way_bbox(wid)? {
            Some(b) => b,
            // Range row invalidated by a changeset; fall back to the nd hull.
            None => self.way_nd_hull(wid)?.unwrap_or_default(),
        };
        if with_nds {
            way.nds = self.way_nds(wid)?;
        }
        Ok(Some(way))
    }

    fn way_bbox(&self, wid: i64) -> Result<Option<Bbox>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT latT, lonL, latB, lonR FROM ways_range WHERE wid = ?1")?;
        let bbox = stmt
            .query_row(params![wid], |r| {
                Ok(Bbox { lat_t: r.get(0)?, lon_l: r.get(1)?, lat_b: r.get(2)?, lon_r: r.get(3)? })
            })
            .optional()?;
        Ok(bbox)
    }

    fn way_nd_hull(&self, wid: i64) -> Result<Option<Bbox>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT MAX(c.lat), MIN(c.lon), MIN(c.lat), MAX(c.lon)
             FROM ways_nds n JOIN nodes_coords c ON c.nid = n.nid
             WHERE n.wid = ?1",
        )?;
        let row: (Option<f64>, Option<f64>, Option<f64>, Option<f64>) =
            stmt.query_row(params![wid], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
            })?;
        Ok(match row {
            (Some(lat_t), Some(lon_l), Some(lat_b), Some(lon_r)) => {
                Some(Bbox { lat_t, lon_l, lat_b, lon_r })
            }
            _ => None,
        })
    }

    fn way_nds(&self, wid: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT nid FROM ways_nds WHERE wid = ?1 ORDER BY idx")?;
        let rows = stmt.query_map(params![wid], |r| r.get::<_, i64>(0))?;
        let mut nds = Vec::new();
        for r in rows {
            nds.push(r?);
        }
        Ok(nds)
    }

    pub fn load_rel(&self, rid: i64) -> Result<Option<Relation>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT name, abrev, class, type, center, polygon FROM rels WHERE rid = ?1",
        )?;
        let row = stmt
            .query_row(params![rid], |r| {
                Ok(Relation {
                    id: rid,
                    name: r.get(0)?,
                    abrev: r.get(1)?,
                    class: r.get(2)?,
                    rel_type: RelType::from_i32(r.get(3)?),
                    center: r.get::<_, i32>(4)? != 0,
                    polygon: r.get::<_, i32>(5)? != 0,
                    bbox: Bbox::default(),
                    members: Vec::new(),
                })
            })
            .optional()?;
        let Some(mut rel) = row else { return Ok(None) };

        let mut stmt = self
            .conn
            .prepare_cached("SELECT latT, lonL, latB, lonR FROM rels_range WHERE rid = ?1")?;
        if let Some(bbox) = stmt
            .query_row(params![rid], |r| {
                Ok(Bbox { lat_t: r.get(0)?, lon_l: r.get(1)?, lat_b: r.get(2)?, lon_r: r.get(3)? })
            })
            .optional()?
        {
            rel.bbox = bbox;
        }

        let mut stmt = self
            .conn
            .prepare_cached("SELECT nid, role FROM nodes_members WHERE rid = ?1 ORDER BY nid")?;
        let rows = stmt.query_map(params![rid], |r| {
            Ok(Member { kind: MemberKind::Node, reference: r.get(0)?, role: r.get(1)? })
        })?;
        for r in rows {
            rel.members.push(r?);
        }

        let mut stmt = self
            .conn
            .prepare_cached("SELECT wid, role FROM ways_members WHERE rid = ?1 ORDER BY idx")?;
        let rows = stmt.query_map(params![rid], |r| {
            Ok(Member { kind: MemberKind::Way, reference: r.get(0)?, role: r.get(1)? })
        })?;
        for r in rows {
            rel.members.push(r?);
        }

        Ok(Some(rel))
    }

    /// POI nodes whose range bbox intersects `bbox` and whose style zoom
    /// admits `zoom`.
    pub fn nodes_range(&self, bbox: &Bbox, zoom: i32) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT r.nid FROM nodes_range r JOIN nodes_info i ON i.nid = r.nid
             WHERE r.latT > ?1 AND r.lonL < ?2 AND r.latB < ?3 AND r.lonR > ?4
               AND i.min_zoom <= ?5
             ORDER BY r.nid",
        )?;
        let rows = stmt.query_map(
            params![bbox.lat_b, bbox.lon_r, bbox.lat_t, bbox.lon_l, zoom],
            |r| r.get::<_, i64>(0),
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Selected ways intersecting `bbox`, with their point-center flag.
    pub fn ways_range(&self, bbox: &Bbox, zoom: i32) -> Result<Vec<(i64, bool)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT r.wid, w.center FROM ways_range r JOIN ways w ON w.wid = r.wid
             WHERE r.latT > ?1 AND r.lonL < ?2 AND r.latB < ?3 AND r.lonR > ?4
               AND r.min_zoom <= ?5 AND w.selected = 1
             ORDER BY r.wid",
        )?;
        let rows = stmt.query_map(
            params![bbox.lat_b, bbox.lon_r, bbox.lat_t, bbox.lon_l, zoom],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i32>(1)? != 0)),
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Relations intersecting `bbox`, with their stored range bbox.
    pub fn rels_range(&self, bbox: &Bbox, zoom: i32) -> Result<Vec<(i64, Bbox)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT rid, latT, lonL, latB, lonR FROM rels_range
             WHERE latT > ?1 AND lonL < ?2 AND latB < ?3 AND lonR > ?4
               AND min_zoom <= ?5
             ORDER BY rid",
        )?;
        let rows = stmt.query_map(
            params![bbox.lat_b, bbox.lon_r, bbox.lat_t, bbox.lon_l, zoom],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    Bbox {
                        lat_t: r.get(1)?,
                        lon_l: r.get(2)?,
                        lat_b: r.get(3)?,
                        lon_r: r.get(4)?,
                    },
                ))
            },
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn search_nodes(&self, text: &str) -> Result<Vec<SearchHit>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT nodes_text.nid, i.name, c.lat, c.lon, i.class, IFNULL(cr.rank, 0)
             FROM nodes_text
             JOIN nodes_coords c ON c.nid = nodes_text.nid
             JOIN nodes_info i ON i.nid = nodes_text.nid
             LEFT JOIN class_rank cr ON cr.class = i.class
             WHERE nodes_text MATCH ?1
             ORDER BY cr.rank DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![fts_query(text), SEARCH_LIMIT as i64], |r| {
            Ok(SearchHit {
                id: r.get(0)?,
                name: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                lat: r.get(2)?,
                lon: r.get(3)?,
                class: r.get(4)?,
                rank: r.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn search_ways(&self, text: &str) -> Result<Vec<SearchHit>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT ways_text.wid, w.name,
                    (r.latT + r.latB) / 2, (r.lonL + r.lonR) / 2,
                    w.class, IFNULL(cr.rank, 0)
             FROM ways_text
             JOIN ways w ON w.wid = ways_text.wid
             JOIN ways_range r ON r.wid = ways_text.wid
             LEFT JOIN class_rank cr ON cr.class = w.class
             WHERE ways_text MATCH ?1
             ORDER BY cr.rank DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![fts_query(text), SEARCH_LIMIT as i64], |r| {
            Ok(SearchHit {
                id: r.get(0)?,
                name: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                lat: r.get(2)?,
                lon: r.get(3)?,
                class: r.get(4)?,
                rank: r.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn search_rels(&self, text: &str) -> Result<Vec<SearchHit>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT rels_text.rid, rl.name,
                    (r.latT + r.latB) / 2, (r.lonL + r.lonR) / 2,
                    rl.class, IFNULL(cr.rank, 0)
             FROM rels_text
             JOIN rels rl ON rl.rid = rels_text.rid
             JOIN rels_range r ON r.rid = rels_text.rid
             LEFT JOIN class_rank cr ON cr.class = rl.class
             WHERE rels_text MATCH ?1
             ORDER BY cr.rank DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![fts_query(text), SEARCH_LIMIT as i64], |r| {
            Ok(SearchHit {
                id: r.get(0)?,
                name: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                lat: r.get(2)?,
                lon: r.get(3)?,
                class: r.get(4)?,
                rank: r.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

/// Quote the token so FTS operators in user input cannot break the query.
fn fts_query(text: &str) -> String {
    format!("\"{}\"", text.replace('"', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_query_quotes_operators() {
        assert_eq!(fts_query("main"), "\"main\"");
        assert_eq!(fts_query("a\"b OR c"), "\"ab OR c\"");
    }
}
