//! Tile driver: orchestrates the store, cache, join, sample, clip, and emit
//! stages for one tile. Gathering runs relations, then ways, then nodes so
//! the record stream satisfies the blob's section order; relation node
//! members are deferred into the node phase. The export set guarantees each
//! object id lands in the blob at most once.

use std::collections::HashSet;

use anyhow::Result;
use log::debug;

use crate::cache::ObjectCache;
use crate::clip;
use crate::emit::TileWriter;
use crate::geom::{self, Bbox, SPHERE_RADIUS};
use crate::join::JoinSet;
use crate::model::{MemberKind, ObjectId, Way};
use crate::sample::{self, SampleThresholds};
use crate::store::Store;

/// Polygon relations with a bbox area (dlat * dlon) at or above this are
/// emitted as a centered point instead of being expanded into member ways.
pub const REL_EXPAND_AREA: f64 = 2.0 * 0.000369;

pub fn build_tile(
    store: &Store,
    cache: &ObjectCache,
    thresholds: &SampleThresholds,
    zoom: i32,
    x: i32,
    y: i32,
) -> Result<Vec<u8>> {
    let tile = geom::tile2coord(zoom, x, y);
    let changeset = store.changeset_watermark()?;
    let mut writer = TileWriter::begin_tile(zoom, x, y, changeset);
    let mut export: HashSet<ObjectId> = HashSet::new();
    let mut deferred_nodes: Vec<i64> = Vec::new();

    gather_rels(store, cache, &mut writer, &mut export, &mut deferred_nodes, &tile, zoom)?;
    gather_ways(store, cache, thresholds, &mut writer, &mut export, &tile, zoom)?;
    gather_nodes(store, cache, &mut writer, &mut export, &deferred_nodes, &tile, zoom)?;

    let blob = writer.end_tile()?;
    debug!("tile {zoom}/{x}/{y}: {} bytes, {} exported", blob.len(), export.len());
    cache.trim();
    Ok(blob)
}

fn gather_rels(
    store: &Store,
    cache: &ObjectCache,
    writer: &mut TileWriter,
    export: &mut HashSet<ObjectId>,
    deferred_nodes: &mut Vec<i64>,
    tile: &Bbox,
    zoom: i32,
) -> Result<()> {
    for (rid, _) in store.rels_range(tile, zoom)? {
        if !export.insert(ObjectId::Rel(rid)) {
            continue;
        }
        let Some(rel) = cache.get_rel(store, rid)? else { continue };
        let (clat, clon) = rel.bbox.center();
        let center = writer.coord2pt(clat, clon);
        let range = writer.range_pt(&rel.bbox);
        writer.begin_rel(
            rel.rel_type.as_i32(),
            rel.class,
            center,
            range,
            rel.name.as_deref(),
        )?;
        // Oversized polygons stay a labelled point; anything smaller is
        // expanded into its drawable members.
        if !rel.center && rel.bbox.area() < REL_EXPAND_AREA {
            for member in &rel.members {
                match member.kind {
                    MemberKind::Node => deferred_nodes.push(member.reference),
                    MemberKind::Way => {
                        gather_member_way(store, cache, writer, export, member.reference)?
                    }
                    MemberKind::Rel => {}
                }
            }
        }
        writer.end_rel()?;
    }
    Ok(())
}

/// Member ways always carry their nds; they draw inside the relation record.
fn gather_member_way(
    store: &Store,
    cache: &ObjectCache,
    writer: &mut TileWriter,
    export: &mut HashSet<ObjectId>,
    wid: i64,
) -> Result<()> {
    if !export.insert(ObjectId::Way(wid)) {
        return Ok(());
    }
    let Some(way) = cache.way_copy(store, wid, true)? else { return Ok(()) };
    emit_way(store, cache, writer, &way)
}

fn gather_ways(
    store: &Store,
    cache: &ObjectCache,
    thresholds: &SampleThresholds,
    writer: &mut TileWriter,
    export: &mut HashSet<ObjectId>,
    tile: &Bbox,
    zoom: i32,
) -> Result<()> {
    let mut joinset = JoinSet::new();
    let mut points: Vec<Way> = Vec::new();
    for (wid, center) in store.ways_range(tile, zoom)? {
        if !export.insert(ObjectId::Way(wid)) {
            continue;
        }
        // Point-center ways skip nd loading entirely.
        let Some(way) = cache.way_copy(store, wid, !center)? else { continue };
        if way.center {
            points.push(way);
        } else {
            joinset.insert(way);
        }
    }

    let mut xyz = |nid: i64| -> Result<Option<[f64; 3]>> {
        Ok(cache
            .get_node(store, nid)?
            .map(|n| geom::geo2xyz(n.lat, n.lon, SPHERE_RADIUS)))
    };
    joinset.join(&mut xyz)?;

    let min_dist = thresholds.min_dist(zoom);
    for mut way in joinset.into_ways() {
        sample::sample_way(&mut way, min_dist, &mut xyz)?;
        let mut latlon = |nid: i64| -> Result<Option<(f64, f64)>> {
            Ok(cache.get_node(store, nid)?.map(|n| (n.lat, n.lon)))
        };
        clip::clip_way(&mut way, tile, &mut latlon)?;
        emit_way(store, cache, writer, &way)?;
    }
    for way in points {
        emit_way(store, cache, writer, &way)?;
    }
    Ok(())
}

/// Emit one way record, resolving nd coordinates through the cache. Missing
/// nds are skipped; point-center ways emit no coordinates at all.
fn emit_way(
    store: &Store,
    cache: &ObjectCache,
    writer: &mut TileWriter,
    way: &Way,
) -> Result<()> {
    let (clat, clon) = way.bbox.center();
    let center = writer.coord2pt(clat, clon);
    let range = writer.range_pt(&way.bbox);
    writer.begin_way(
        way.class,
        way.layer,
        way.flags.encode(),
        center,
        range,
        way.name.as_deref(),
    )?;
    if !way.center {
        for &nid in &way.nds {
            if let Some(node) = cache.get_node(store, nid)? {
                writer.add_way_coord(node.lat, node.lon)?;
            }
        }
    }
    writer.end_way()
}

fn gather_nodes(
    store: &Store,
    cache: &ObjectCache,
    writer: &mut TileWriter,
    export: &mut HashSet<ObjectId>,
    deferred_nodes: &[i64],
    tile: &Bbox,
    zoom: i32,
) -> Result<()> {
    let range = store.nodes_range(tile, zoom)?;
    for &nid in deferred_nodes.iter().chain(range.iter()) {
        if !export.insert(ObjectId::Node(nid)) {
            continue;
        }
        let Some(node) = cache.get_node(store, nid)? else { continue };
        let point = writer.coord2pt(node.lat, node.lon);
        writer.add_node(node.class, node.ele, point, node.name.as_deref())?;
    }
    Ok(())
}
