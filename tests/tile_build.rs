use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use rusqlite::{params, Connection};
use std::io::{Cursor, Read};
use tempfile::NamedTempFile;

use osmtiles::cache::{ObjectCache, CACHE_BYTES};
use osmtiles::db;
use osmtiles::emit::{TILE_MAGIC, TILE_VERSION};
use osmtiles::geom::{tile2coord, Bbox};
use osmtiles::sample::SampleThresholds;
use osmtiles::store::Store;
use osmtiles::tiler;

const ZOOM: i32 = 14;
const TX: i32 = -4789;
const TY: i32 = -1996;

fn frac(tile: &Bbox, flat: f64, flon: f64) -> (f64, f64) {
    (
        tile.lat_b + (tile.lat_t - tile.lat_b) * flat,
        tile.lon_l + (tile.lon_r - tile.lon_l) * flon,
    )
}

/// One tile's worth of data: a named POI node, a residential way, a small
/// multipolygon (expanded) whose members include that POI, a big polygon
/// relation (point only), and a point-center way.
fn seed(conn: &mut Connection) -> Result<()> {
    db::create_tables(conn)?;
    let tile = tile2coord(ZOOM, TX, TY);
    let eps = 1.0e-5;

    let node = |conn: &Connection, nid: i64, flat: f64, flon: f64| -> Result<()> {
        let (lat, lon) = frac(&tile, flat, flon);
        conn.execute(
            "INSERT INTO nodes_coords(nid, lat, lon) VALUES (?1, ?2, ?3)",
            params![nid, lat, lon],
        )?;
        Ok(())
    };

    // POI with name, class, and a range row.
    node(conn, 1, 0.5, 0.5)?;
    conn.execute(
        "INSERT INTO nodes_info(nid, name, abrev, ele, st, class, min_zoom)
         VALUES (1, 'Boulder Falls', NULL, 5430, 'CO', 3, 10)",
        [],
    )?;
    {
        let (lat, lon) = frac(&tile, 0.5, 0.5);
        conn.execute(
            "INSERT INTO nodes_range(nid, latT, lonL, latB, lonR) VALUES (1, ?1, ?2, ?3, ?4)",
            params![lat + eps, lon - eps, lat - eps, lon + eps],
        )?;
    }

    // Selected residential way across the tile.
    for (nid, flat, flon) in [(10, 0.2, 0.2), (11, 0.4, 0.45), (12, 0.6, 0.7)] {
        node(conn, nid, flat, flon)?;
    }
    conn.execute(
        "INSERT INTO ways(wid, name, class, layer, oneway, selected)
         VALUES (100, 'Pearl St', 2, 0, 1, 1)",
        [],
    )?;
    for (idx, nid) in [10i64, 11, 12].iter().enumerate() {
        conn.execute(
            "INSERT INTO ways_nds(wid, idx, nid) VALUES (100, ?1, ?2)",
            params![idx as i64, nid],
        )?;
    }
    way_range(conn, 100, &tile, (0.2, 0.2), (0.6, 0.7))?;

    // Point-center way (a building label).
    conn.execute(
        "INSERT INTO ways(wid, name, class, center, selected) VALUES (101, 'Depot', 4, 1, 1)",
        [],
    )?;
    way_range(conn, 101, &tile, (0.7, 0.7), (0.8, 0.8))?;

    // Closed ring for the multipolygon; not selected, only drawn as a member.
    for (nid, flat, flon) in [(20, 0.3, 0.3), (21, 0.3, 0.35), (22, 0.35, 0.35)] {
        node(conn, nid, flat, flon)?;
    }
    conn.execute("INSERT INTO ways(wid, class, selected) VALUES (102, 5, 0)", [])?;
    for (idx, nid) in [20i64, 21, 22, 20].iter().enumerate() {
        conn.execute(
            "INSERT INTO ways_nds(wid, idx, nid) VALUES (102, ?1, ?2)",
            params![idx as i64, nid],
        )?;
    }
    way_range(conn, 102, &tile, (0.3, 0.3), (0.35, 0.35))?;

    // Small multipolygon: expands into way 102, defers node 1.
    conn.execute(
        "INSERT INTO rels(rid, name, class, type, center, polygon)
         VALUES (200, 'Central Park', 5, 2, 0, 1)",
        [],
    )?;
    conn.execute(
        "INSERT INTO nodes_members(rid, nid, role) VALUES (200, 1, 4)",
        [],
    )?;
    conn.execute(
        "INSERT INTO ways_members(rid, idx, wid, role) VALUES (200, 0, 102, 1)",
        [],
    )?;
    rel_range(conn, 200, &tile, (0.3, 0.3), (0.35, 0.35))?;

    // Oversized boundary: emitted as a labelled point, no members.
    conn.execute(
        "INSERT INTO rels(rid, name, class, type, center, polygon)
         VALUES (201, 'Boulder County', 6, 1, 0, 1)",
        [],
    )?;
    conn.execute(
        "INSERT INTO ways_members(rid, idx, wid, role) VALUES (201, 0, 102, 1)",
        [],
    )?;
    {
        let (lat0, lon0) = frac(&tile, 0.5, 0.5);
        conn.execute(
            "INSERT INTO rels_range(rid, latT, lonL, latB, lonR, min_zoom)
             VALUES (201, ?1, ?2, ?3, ?4, 8)",
            params![lat0 + 0.05, lon0 - 0.05, lat0 - 0.05, lon0 + 0.05],
        )?;
    }

    db::meta_set_i64(conn, "changeset", 5)?;
    Ok(())
}

fn way_range(
    conn: &Connection,
    wid: i64,
    tile: &Bbox,
    lo: (f64, f64),
    hi: (f64, f64),
) -> Result<()> {
    let (lat_b, lon_l) = frac(tile, lo.0, lo.1);
    let (lat_t, lon_r) = frac(tile, hi.0, hi.1);
    conn.execute(
        "INSERT INTO ways_range(wid, latT, lonL, latB, lonR, min_zoom)
         VALUES (?1, ?2, ?3, ?4, ?5, 13)",
        params![wid, lat_t, lon_l, lat_b, lon_r],
    )?;
    Ok(())
}

fn rel_range(
    conn: &Connection,
    rid: i64,
    tile: &Bbox,
    lo: (f64, f64),
    hi: (f64, f64),
) -> Result<()> {
    let (lat_b, lon_l) = frac(tile, lo.0, lo.1);
    let (lat_t, lon_r) = frac(tile, hi.0, hi.1);
    conn.execute(
        "INSERT INTO rels_range(rid, latT, lonL, latB, lonR, min_zoom)
         VALUES (?1, ?2, ?3, ?4, ?5, 12)",
        params![rid, lat_t, lon_l, lat_b, lon_r],
    )?;
    Ok(())
}

#[derive(Debug)]
struct Record {
    kind: char,
    name: String,
    points: i32,
    inner_ways: Vec<Record>,
}

fn read_name(c: &mut Cursor<&[u8]>) -> String {
    let size = c.read_i32::<LittleEndian>().unwrap() as usize;
    let mut bytes = vec![0u8; size];
    c.read_exact(&mut bytes).unwrap();
    let pad = (4 - size % 4) % 4;
    let mut padding = vec![0u8; pad];
    c.read_exact(&mut padding).unwrap();
    String::from_utf8(bytes).unwrap()
}

fn read_way(c: &mut Cursor<&[u8]>) -> Record {
    let _class = c.read_i32::<LittleEndian>().unwrap();
    let _layer = c.read_i32::<LittleEndian>().unwrap();
    let _flags = c.read_i32::<LittleEndian>().unwrap();
    let mut skip = [0u8; 12]; // center + range
    c.read_exact(&mut skip).unwrap();
    let size = c.read_i32::<LittleEndian>().unwrap() as usize;
    let points = c.read_i32::<LittleEndian>().unwrap();
    let mut bytes = vec![0u8; size + (4 - size % 4) % 4];
    c.read_exact(&mut bytes).unwrap();
    bytes.truncate(size);
    for _ in 0..points {
        let _x = c.read_i16::<LittleEndian>().unwrap();
        let _y = c.read_i16::<LittleEndian>().unwrap();
    }
    Record {
        kind: 'w',
        name: String::from_utf8(bytes).unwrap(),
        points,
        inner_ways: Vec::new(),
    }
}

fn decode(blob: &[u8]) -> (i64, Vec<Record>) {
    let mut c = Cursor::new(blob);
    assert_eq!(c.read_u32::<LittleEndian>().unwrap(), TILE_MAGIC);
    assert_eq!(c.read_u32::<LittleEndian>().unwrap(), TILE_VERSION);
    assert_eq!(c.read_i32::<LittleEndian>().unwrap(), ZOOM);
    assert_eq!(c.read_i32::<LittleEndian>().unwrap(), TX);
    assert_eq!(c.read_i32::<LittleEndian>().unwrap(), TY);
    let changeset = c.read_i64::<LittleEndian>().unwrap();
    let count_rels = c.read_i32::<LittleEndian>().unwrap();
    let count_ways = c.read_i32::<LittleEndian>().unwrap();
    let count_nodes = c.read_i32::<LittleEndian>().unwrap();

    let mut records = Vec::new();
    for _ in 0..count_rels {
        let _type = c.read_i32::<LittleEndian>().unwrap();
        let _class = c.read_i32::<LittleEndian>().unwrap();
        let mut skip = [0u8; 12];
        c.read_exact(&mut skip).unwrap();
        let size = c.read_i32::<LittleEndian>().unwrap() as usize;
        let inner = c.read_i32::<LittleEndian>().unwrap();
        let mut bytes = vec![0u8; size + (4 - size % 4) % 4];
        c.read_exact(&mut bytes).unwrap();
        bytes.truncate(size);
        let mut inner_ways = Vec::new();
        for _ in 0..inner {
            inner_ways.push(read_way(&mut c));
        }
        records.push(Record {
            kind: 'r',
            name: String::from_utf8(bytes).unwrap(),
            points: inner,
            inner_ways,
        });
    }
    for _ in 0..count_ways {
        records.push(read_way(&mut c));
    }
    for _ in 0..count_nodes {
        let _class = c.read_i32::<LittleEndian>().unwrap();
        let _ele = c.read_i32::<LittleEndian>().unwrap();
        let _x = c.read_i16::<LittleEndian>().unwrap();
        let _y = c.read_i16::<LittleEndian>().unwrap();
        let name = read_name(&mut c);
        records.push(Record { kind: 'n', name, points: 0, inner_ways: Vec::new() });
    }
    assert_eq!(c.position() as usize, blob.len(), "trailing bytes in blob");
    (changeset, records)
}

#[test]
fn builds_a_complete_tile() -> Result<()> {
    let dbf = NamedTempFile::new().unwrap();
    let mut conn = Connection::open(dbf.path())?;
    seed(&mut conn)?;
    drop(conn);

    let store = Store::open(dbf.path())?;
    let cache = ObjectCache::new(CACHE_BYTES);
    let thresholds = SampleThresholds::new();
    let blob = tiler::build_tile(&store, &cache, &thresholds, ZOOM, TX, TY)?;

    let (changeset, records) = decode(&blob);
    assert_eq!(changeset, 5);

    // Record order: rels, then ways, then nodes.
    let kinds: Vec<char> = records.iter().map(|r| r.kind).collect();
    let first_way = kinds.iter().position(|&k| k == 'w').unwrap();
    let first_node = kinds.iter().position(|&k| k == 'n').unwrap();
    assert!(kinds.iter().take_while(|&&k| k == 'r').count() == 2);
    assert!(first_way < first_node);

    // The small multipolygon expands into its ring; the big boundary stays a
    // point with no members.
    let park = records.iter().find(|r| r.name == "Central Park").unwrap();
    assert_eq!(park.points, 1);
    assert_eq!(park.inner_ways[0].points, 4);
    let county = records.iter().find(|r| r.name == "Boulder County").unwrap();
    assert_eq!(county.points, 0);

    // Top-level ways: the residential line and the point-center label.
    let pearl = records.iter().find(|r| r.name == "Pearl St").unwrap();
    assert_eq!(pearl.kind, 'w');
    assert_eq!(pearl.points, 3);
    let depot = records.iter().find(|r| r.name == "Depot").unwrap();
    assert_eq!(depot.points, 0);

    // The POI appears exactly once even though it is both a relation member
    // and a nodes_range hit.
    let falls: Vec<_> = records.iter().filter(|r| r.name == "Boulder Falls").collect();
    assert_eq!(falls.len(), 1);
    assert_eq!(falls[0].kind, 'n');

    // Nothing stays pinned once the tile is done.
    cache.trim();
    Ok(())
}

#[test]
fn empty_tile_has_only_the_header() -> Result<()> {
    let dbf = NamedTempFile::new().unwrap();
    let mut conn = Connection::open(dbf.path())?;
    seed(&mut conn)?;
    drop(conn);

    let store = Store::open(dbf.path())?;
    let cache = ObjectCache::new(CACHE_BYTES);
    let thresholds = SampleThresholds::new();
    // A tile far away from the seeded data.
    let blob = tiler::build_tile(&store, &cache, &thresholds, ZOOM, 100, 100)?;
    assert_eq!(blob.len(), osmtiles::emit::HEADER_LEN);
    Ok(())
}

#[test]
fn low_zoom_filters_by_min_zoom() -> Result<()> {
    let dbf = NamedTempFile::new().unwrap();
    let mut conn = Connection::open(dbf.path())?;
    seed(&mut conn)?;
    drop(conn);

    let store = Store::open(dbf.path())?;
    let tile = tile2coord(ZOOM, TX, TY);
    // Everything seeded carries min_zoom 10..13, so zoom 9 sees nothing.
    assert!(store.ways_range(&tile, 9)?.is_empty());
    assert!(store.nodes_range(&tile, 9)?.is_empty());
    assert_eq!(store.ways_range(&tile, 13)?.len(), 2);
    assert_eq!(store.nodes_range(&tile, 10)?.len(), 1);
    Ok(())
}
