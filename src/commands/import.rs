//! `import`: parse a style document plus an OSM XML extract and populate the
//! index database, including the derived range tables and the search text
//! mirrors.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use log::info;
use rusqlite::{params, Connection};

use crate::db::{self, with_tx};
use crate::geom::Bbox;
use crate::model::{role_code, RelType};
use crate::osm::{self, OsmTag, OsmXml};
use crate::style::{Style, CLASS_NONE};
use crate::text;

/// Node range bboxes are inflated by about a meter in degrees so a node
/// sitting exactly on a tile border surfaces on both neighboring tiles under
/// the open half-plane filter.
const NODE_RANGE_EPS: f64 = 1.0e-5;

#[derive(Clone, Debug, Default)]
pub struct ImportStats {
    pub nodes: usize,
    pub pois: usize,
    pub ways: usize,
    pub rels: usize,
}

pub fn cmd_import(style_path: &Path, input_path: &Path, db_path: &Path) -> Result<()> {
    let style = Style::load(style_path)?;
    info!(
        "import: {} style classes from {}",
        style.classes().len(),
        style_path.display()
    );
    let osm = osm::read_osm_file(input_path)?;
    info!(
        "import: parsed {} nodes, {} ways, {} relations from {}",
        osm.node.len(),
        osm.way.len(),
        osm.relation.len(),
        input_path.display()
    );

    let mut conn = db::open_rw(db_path)?;
    db::create_tables(&mut conn)?;
    let stats = import_osm(&mut conn, &style, &osm)?;
    info!(
        "import: wrote {} nodes ({} pois), {} ways, {} rels to {}",
        stats.nodes,
        stats.pois,
        stats.ways,
        stats.rels,
        db_path.display()
    );
    Ok(())
}

pub fn import_osm(conn: &mut Connection, style: &Style, osm: &OsmXml) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    // Coordinates seen in this file, for bbox hulls. Nds referencing nodes
    // outside the extract simply do not contribute.
    let coords: HashMap<i64, (f64, f64)> =
        osm.node.iter().map(|n| (n.id, (n.lat, n.lon))).collect();

    with_tx(conn, |tx| {
        let mut ins = tx.prepare("INSERT OR REPLACE INTO class_rank(class, rank) VALUES (?1, ?2)")?;
        for c in style.classes() {
            ins.execute(params![c.code, c.rank])?;
        }
        tx.execute("INSERT OR IGNORE INTO meta(key, value) VALUES('changeset', '0')", [])?;
        Ok(())
    })?;

    with_tx(conn, |tx| {
        let mut ins_coord =
            tx.prepare("INSERT OR REPLACE INTO nodes_coords(nid, lat, lon) VALUES (?1, ?2, ?3)")?;
        let mut ins_info = tx.prepare(
            "INSERT OR REPLACE INTO nodes_info(nid, name, abrev, ele, st, class, min_zoom)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let mut ins_range = tx.prepare(
            "INSERT OR REPLACE INTO nodes_range(nid, latT, lonL, latB, lonR)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        let mut ins_text = tx.prepare("INSERT INTO nodes_text(nid, name) VALUES (?1, ?2)")?;

        for n in &osm.node {
            ins_coord.execute(params![n.id, n.lat, n.lon])?;
            stats.nodes += 1;

            let class = style.classify(&n.tag);
            let name = object_name(&n.tag);
            if class == CLASS_NONE && name.is_none() {
                continue;
            }
            let abrev = name.as_deref().and_then(text::abbreviation);
            ins_info.execute(params![
                n.id,
                name,
                abrev,
                parse_ele(&n.tag),
                state_code(&n.tag),
                class,
                style.min_zoom(class)
            ])?;
            ins_range.execute(params![
                n.id,
                n.lat + NODE_RANGE_EPS,
                n.lon - NODE_RANGE_EPS,
                n.lat - NODE_RANGE_EPS,
                n.lon + NODE_RANGE_EPS
            ])?;
            if let Some(name) = &name {
                ins_text.execute(params![n.id, search_text(name, abrev.as_deref())])?;
            }
            stats.pois += 1;
        }
        Ok(())
    })?;

    let mut way_bbox: HashMap<i64, Bbox> = HashMap::new();
    with_tx(conn, |tx| {
        let mut ins_way = tx.prepare(
            "INSERT OR REPLACE INTO ways
               (wid, name, abrev, class, layer, oneway, bridge, tunnel, cutting, center, selected)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        let mut ins_nd =
            tx.prepare("INSERT OR REPLACE INTO ways_nds(wid, idx, nid) VALUES (?1, ?2, ?3)")?;
        let mut ins_range = tx.prepare(
            "INSERT OR REPLACE INTO ways_range(wid, latT, lonL, latB, lonR, min_zoom)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let mut ins_text = tx.prepare("INSERT INTO ways_text(wid, name) VALUES (?1, ?2)")?;

        for w in &osm.way {
            let class = style.classify(&w.tag);
            let name = object_name(&w.tag);
            let abrev = name.as_deref().and_then(text::abbreviation);
            let (oneway, bridge, tunnel, cutting) = way_flags(&w.tag);
            let layer = osm::tag_value(&w.tag, "layer")
                .and_then(|v| v.parse::<i32>().ok())
                .unwrap_or(0);
            let center = style.class(class).is_some_and(|c| c.center);
            let selected = class != CLASS_NONE;
            ins_way.execute(params![
                w.id,
                name,
                abrev,
                class,
                layer,
                oneway,
                bridge as i32,
                tunnel as i32,
                cutting as i32,
                center as i32,
                selected as i32
            ])?;

            let mut bbox: Option<Bbox> = None;
            for (idx, nd) in w.nd.iter().enumerate() {
                ins_nd.execute(params![w.id, idx as i64, nd.reference])?;
                if let Some(&(lat, lon)) = coords.get(&nd.reference) {
                    match bbox.as_mut() {
                        Some(b) => b.expand(lat, lon),
                        None => bbox = Some(Bbox::point(lat, lon)),
                    }
                }
            }
            if let Some(b) = bbox {
                ins_range.execute(params![
                    w.id,
                    b.lat_t,
                    b.lon_l,
                    b.lat_b,
                    b.lon_r,
                    style.min_zoom(class)
                ])?;
                way_bbox.insert(w.id, b);
            }
            if let Some(name) = &name {
                ins_text.execute(params![w.id, search_text(name, abrev.as_deref())])?;
            }
            stats.ways += 1;
        }
        Ok(())
    })?;

    with_tx(conn, |tx| {
        let mut ins_rel = tx.prepare(
            "INSERT OR REPLACE INTO rels(rid, name, abrev, class, type, center, polygon)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let mut ins_nm = tx.prepare(
            "INSERT OR IGNORE INTO nodes_members(rid, nid, role) VALUES (?1, ?2, ?3)",
        )?;
        let mut ins_wm = tx.prepare(
            "INSERT OR REPLACE INTO ways_members(rid, idx, wid, role) VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut ins_range = tx.prepare(
            "INSERT OR REPLACE INTO rels_range(rid, latT, lonL, latB, lonR, min_zoom)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let mut ins_text = tx.prepare("INSERT INTO rels_text(rid, name) VALUES (?1, ?2)")?;

        for r in &osm.relation {
            let class = style.classify(&r.tag);
            let name = object_name(&r.tag);
            let abrev = name.as_deref().and_then(text::abbreviation);
            let rel_type = osm::tag_value(&r.tag, "type")
                .map(RelType::from_tag)
                .unwrap_or(RelType::None);
            let center = style.class(class).is_some_and(|c| c.center);
            let polygon =
                rel_type == RelType::Multipolygon || style.class(class).is_some_and(|c| c.polygon);
            ins_rel.execute(params![
                r.id,
                name,
                abrev,
                class,
                rel_type.as_i32(),
                center as i32,
                polygon as i32
            ])?;

            // Relation bboxes are the hull of the member way bboxes; node
            // members do not contribute.
            let mut bbox: Option<Bbox> = None;
            let mut widx: i64 = 0;
            for m in &r.member {
                match m.kind.as_str() {
                    "node" => {
                        ins_nm.execute(params![r.id, m.reference, role_code(&m.role)])?;
                    }
                    "way" => {
                        ins_wm.execute(params![r.id, widx, m.reference, role_code(&m.role)])?;
                        widx += 1;
                        if let Some(b) = way_bbox.get(&m.reference) {
                            match bbox.as_mut() {
                                Some(acc) => *acc = acc.union(b),
                                None => bbox = Some(*b),
                            }
                        }
                    }
                    _ => {}
                }
            }
            if let Some(b) = bbox {
                ins_range.execute(params![
                    r.id,
                    b.lat_t,
                    b.lon_l,
                    b.lat_b,
                    b.lon_r,
                    style.min_zoom(class)
                ])?;
            }
            if let Some(name) = &name {
                ins_text.execute(params![r.id, search_text(name, abrev.as_deref())])?;
            }
            stats.rels += 1;
        }
        Ok(())
    })?;

    Ok(stats)
}

fn object_name(tags: &[OsmTag]) -> Option<String> {
    osm::tag_value(tags, "name")
        .map(text::sanitize)
        .filter(|s| !s.is_empty())
}

/// Indexed search text: the display name plus its abbreviated ASCII form.
fn search_text(name: &str, abrev: Option<&str>) -> String {
    match abrev {
        Some(a) => format!("{name} {a}"),
        None => name.to_string(),
    }
}

/// Elevation tags are meters; stored elevation is integer feet.
fn parse_ele(tags: &[OsmTag]) -> i32 {
    osm::tag_value(tags, "ele")
        .and_then(|v| v.parse::<f64>().ok())
        .map(|m| (m * 3.28084).round() as i32)
        .unwrap_or(0)
}

fn state_code(tags: &[OsmTag]) -> Option<String> {
    osm::tag_value(tags, "gnis:ST_alpha")
        .or_else(|| osm::tag_value(tags, "addr:state"))
        .map(text::sanitize)
        .filter(|s| !s.is_empty())
}

fn way_flags(tags: &[OsmTag]) -> (i32, bool, bool, bool) {
    let oneway = match osm::tag_value(tags, "oneway") {
        Some("yes") | Some("true") | Some("1") => 1,
        Some("-1") | Some("reverse") => -1,
        _ => 0,
    };
    (
        oneway,
        osm::tag_is_yes(tags, "bridge"),
        osm::tag_is_yes(tags, "tunnel"),
        osm::tag_is_yes(tags, "cutting"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Vec<OsmTag> {
        pairs
            .iter()
            .map(|&(k, v)| OsmTag { k: k.into(), v: v.into() })
            .collect()
    }

    #[test]
    fn elevation_converts_meters_to_feet() {
        assert_eq!(parse_ele(&tags(&[("ele", "1655")])), 5430);
        assert_eq!(parse_ele(&tags(&[("ele", "bogus")])), 0);
        assert_eq!(parse_ele(&[]), 0);
    }

    #[test]
    fn oneway_values() {
        assert_eq!(way_flags(&tags(&[("oneway", "yes")])).0, 1);
        assert_eq!(way_flags(&tags(&[("oneway", "-1")])).0, -1);
        assert_eq!(way_flags(&tags(&[("oneway", "no")])).0, 0);
        assert!(way_flags(&tags(&[("bridge", "yes")])).1);
    }

    #[test]
    fn state_code_prefers_gnis() {
        let t = tags(&[("addr:state", "CO"), ("gnis:ST_alpha", "WY")]);
        assert_eq!(state_code(&t).as_deref(), Some("WY"));
        assert_eq!(state_code(&tags(&[("addr:state", "CO")])).as_deref(), Some("CO"));
        assert_eq!(state_code(&[]), None);
    }
}
