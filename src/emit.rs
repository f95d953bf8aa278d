//! Binary tile blob writer. Little-endian records in strict rel, way, node
//! order; all geometry is 16-bit tile-relative. The writer is a state machine
//! over one growing buffer: violating the record order is a caller bug that
//! resets the buffer and fails the tile.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::geom::{self, Bbox};

pub const TILE_MAGIC: u32 = 0x4F53_4442;
pub const TILE_VERSION: u32 = 4;

/// Header layout: magic u32, version u32, zoom/x/y i32, changeset i64, then
/// the three record counts patched at `end_tile`.
const POS_COUNT_RELS: usize = 28;
const POS_COUNT_WAYS: usize = 32;
const POS_COUNT_NODES: usize = 36;
pub const HEADER_LEN: usize = 40;

struct OpenRel {
    count_pos: usize,
    ways: i32,
}

struct OpenWay {
    count_pos: usize,
    points: i32,
}

pub struct TileWriter {
    buf: Vec<u8>,
    zoom: i32,
    tile_l: f64,
    tile_t: f64,
    count_rels: i32,
    count_ways: i32,
    count_nodes: i32,
    open_rel: Option<OpenRel>,
    open_way: Option<OpenWay>,
}

impl TileWriter {
    pub fn begin_tile(zoom: i32, x: i32, y: i32, changeset: i64) -> TileWriter {
        let mut w = TileWriter {
            buf: Vec::with_capacity(4096),
            zoom,
            tile_l: x as f64,
            tile_t: y as f64,
            count_rels: 0,
            count_ways: 0,
            count_nodes: 0,
            open_rel: None,
            open_way: None,
        };
        w.put_u32(TILE_MAGIC);
        w.put_u32(TILE_VERSION);
        w.put_i32(zoom);
        w.put_i32(x);
        w.put_i32(y);
        w.put_i64(changeset);
        w.put_i32(0);
        w.put_i32(0);
        w.put_i32(0);
        w
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Name bytes padded with zeros to the next 4-byte boundary.
    fn put_padded(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        let pad = (4 - bytes.len() % 4) % 4;
        self.buf.extend(std::iter::repeat(0u8).take(pad));
    }

    /// Map a coordinate into the tile-relative 16-bit space: (-16384, -16384)
    /// is the tile bbox top-left, (16383, 16383) its bottom-right, and
    /// anything further out saturates at the int16 extremes.
    pub fn coord2pt(&self, lat: f64, lon: f64) -> (i16, i16) {
        let (tx, ty) = geom::coord2tile(lat, lon, self.zoom);
        (pt(tx - self.tile_l), pt(ty - self.tile_t))
    }

    pub fn range_pt(&self, bbox: &Bbox) -> [i16; 4] {
        let (l, t) = self.coord2pt(bbox.lat_t, bbox.lon_l);
        let (r, b) = self.coord2pt(bbox.lat_b, bbox.lon_r);
        [t, l, b, r]
    }

    fn violation(&mut self, what: &str) -> anyhow::Error {
        self.buf.clear();
        anyhow!("tile record order violated: {what}")
    }

    pub fn begin_rel(
        &mut self,
        rel_type: i32,
        class: i32,
        center: (i16, i16),
        range: [i16; 4],
        name: Option<&str>,
    ) -> Result<()> {
        if self.open_rel.is_some() || self.open_way.is_some() {
            return Err(self.violation("begin_rel inside an open record"));
        }
        if self.count_ways > 0 || self.count_nodes > 0 {
            return Err(self.violation("rel after way or node records"));
        }
        self.put_i32(rel_type);
        self.put_i32(class);
        self.put_i16(center.0);
        self.put_i16(center.1);
        for v in range {
            self.put_i16(v);
        }
        let bytes = name.map(str::as_bytes).unwrap_or(&[]).to_vec();
        self.put_i32(bytes.len() as i32);
        let count_pos = self.buf.len();
        self.put_i32(0);
        self.put_padded(&bytes);
        self.open_rel = Some(OpenRel { count_pos, ways: 0 });
        Ok(())
    }

    pub fn end_rel(&mut self) -> Result<()> {
        if self.open_way.is_some() {
            return Err(self.violation("end_rel with an open way"));
        }
        let Some(rel) = self.open_rel.take() else {
            return Err(self.violation("end_rel without begin_rel"));
        };
        LittleEndian::write_i32(&mut self.buf[rel.count_pos..rel.count_pos + 4], rel.ways);
        self.count_rels += 1;
        Ok(())
    }

    pub fn begin_way(
        &mut self,
        class: i32,
        layer: i32,
        flags: i32,
        center: (i16, i16),
        range: [i16; 4],
        name: Option<&str>,
    ) -> Result<()> {
        if self.open_way.is_some() {
            return Err(self.violation("begin_way inside an open way"));
        }
        if self.open_rel.is_none() && self.count_nodes > 0 {
            return Err(self.violation("way after node records"));
        }
        self.put_i32(class);
        self.put_i32(layer);
        self.put_i32(flags);
        self.put_i16(center.0);
        self.put_i16(center.1);
        for v in range {
            self.put_i16(v);
        }
        let bytes = name.map(str::as_bytes).unwrap_or(&[]).to_vec();
        self.put_i32(bytes.len() as i32);
        let count_pos = self.buf.len();
        self.put_i32(0);
        self.put_padded(&bytes);
        self.open_way = Some(OpenWay { count_pos, points: 0 });
        Ok(())
    }

    pub fn add_way_coord(&mut self, lat: f64, lon: f64) -> Result<()> {
        let (px, py) = self.coord2pt(lat, lon);
        if self.open_way.is_none() {
            return Err(self.violation("coord outside an open way"));
        }
        self.put_i16(px);
        self.put_i16(py);
        if let Some(way) = self.open_way.as_mut() {
            way.points += 1;
        }
        Ok(())
    }

    pub fn end_way(&mut self) -> Result<()> {
        let Some(way) = self.open_way.take() else {
            return Err(self.violation("end_way without begin_way"));
        };
        LittleEndian::write_i32(&mut self.buf[way.count_pos..way.count_pos + 4], way.points);
        match self.open_rel.as_mut() {
            // A way inside a relation counts toward the relation, not the tile.
            Some(rel) => rel.ways += 1,
            None => self.count_ways += 1,
        }
        Ok(())
    }

    pub fn add_node(
        &mut self,
        class: i32,
        ele: i32,
        point: (i16, i16),
        name: Option<&str>,
    ) -> Result<()> {
        if self.open_rel.is_some() || self.open_way.is_some() {
            return Err(self.violation("node inside an open record"));
        }
        self.put_i32(class);
        self.put_i32(ele);
        self.put_i16(point.0);
        self.put_i16(point.1);
        let bytes = name.map(str::as_bytes).unwrap_or(&[]).to_vec();
        self.put_i32(bytes.len() as i32);
        self.put_padded(&bytes);
        self.count_nodes += 1;
        Ok(())
    }

    pub fn end_tile(mut self) -> Result<Vec<u8>> {
        if self.open_rel.is_some() || self.open_way.is_some() {
            return Err(self.violation("end_tile with an open record"));
        }
        LittleEndian::write_i32(
            &mut self.buf[POS_COUNT_RELS..POS_COUNT_RELS + 4],
            self.count_rels,
        );
        LittleEndian::write_i32(
            &mut self.buf[POS_COUNT_WAYS..POS_COUNT_WAYS + 4],
            self.count_ways,
        );
        LittleEndian::write_i32(
            &mut self.buf[POS_COUNT_NODES..POS_COUNT_NODES + 4],
            self.count_nodes,
        );
        Ok(self.buf)
    }
}

fn pt(u: f64) -> i16 {
    let p = 32767.0 * u - 16384.0;
    p.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::tile2coord;
    use byteorder::ReadBytesExt;
    use std::io::{Cursor, Read};

    fn read_header(c: &mut Cursor<&[u8]>) -> (u32, u32, i32, i32, i32, i64, i32, i32, i32) {
        (
            c.read_u32::<LittleEndian>().unwrap(),
            c.read_u32::<LittleEndian>().unwrap(),
            c.read_i32::<LittleEndian>().unwrap(),
            c.read_i32::<LittleEndian>().unwrap(),
            c.read_i32::<LittleEndian>().unwrap(),
            c.read_i64::<LittleEndian>().unwrap(),
            c.read_i32::<LittleEndian>().unwrap(),
            c.read_i32::<LittleEndian>().unwrap(),
            c.read_i32::<LittleEndian>().unwrap(),
        )
    }

    #[test]
    fn null_island_node_clamps_to_corner() {
        // Tile (14, 0, 0) has its top-left corner exactly at (0, 0).
        let mut w = TileWriter::begin_tile(14, 0, 0, 7);
        let pt = w.coord2pt(0.0, 0.0);
        assert_eq!(pt, (-16384, -16384));
        w.add_node(0, 0, pt, None).unwrap();
        let blob = w.end_tile().unwrap();

        let mut c = Cursor::new(blob.as_slice());
        let (magic, version, zoom, x, y, changeset, rels, ways, nodes) = read_header(&mut c);
        assert_eq!(magic, TILE_MAGIC);
        assert_eq!(version, TILE_VERSION);
        assert_eq!((zoom, x, y), (14, 0, 0));
        assert_eq!(changeset, 7);
        assert_eq!((rels, ways, nodes), (0, 0, 1));

        assert_eq!(c.read_i32::<LittleEndian>().unwrap(), 0); // class
        assert_eq!(c.read_i32::<LittleEndian>().unwrap(), 0); // ele
        assert_eq!(c.read_i16::<LittleEndian>().unwrap(), -16384);
        assert_eq!(c.read_i16::<LittleEndian>().unwrap(), -16384);
        assert_eq!(c.read_i32::<LittleEndian>().unwrap(), 0); // size_name
        assert_eq!(c.position() as usize, blob.len());
    }

    #[test]
    fn interior_points_stay_in_open_range() {
        let w = TileWriter::begin_tile(14, -4789, -1996, 0);
        let tile = tile2coord(14, -4789, -1996);
        let (clat, clon) = tile.center();
        let (px, py) = w.coord2pt(clat, clon);
        assert!(px > -16384 && px < 16383);
        assert!(py > -16384 && py < 16383);
        // Far outside saturates at the int16 extremes.
        let (fx, fy) = w.coord2pt(tile.lat_t + 10.0, tile.lon_r + 10.0);
        assert_eq!(fx, i16::MAX);
        assert_eq!(fy, i16::MIN);
    }

    #[test]
    fn nested_ways_count_toward_the_relation() {
        let mut w = TileWriter::begin_tile(12, 1, 1, 0);
        w.begin_rel(2, 5, (0, 0), [0, 0, 0, 0], Some("Chautauqua")).unwrap();
        for _ in 0..2 {
            w.begin_way(3, 0, 0, (0, 0), [0, 0, 0, 0], None).unwrap();
            w.add_way_coord(0.0, 0.0).unwrap();
            w.end_way().unwrap();
        }
        w.end_rel().unwrap();
        w.begin_way(3, 0, 0, (0, 0), [0, 0, 0, 0], None).unwrap();
        w.end_way().unwrap();
        let blob = w.end_tile().unwrap();

        let mut c = Cursor::new(blob.as_slice());
        let (.., rels, ways, nodes) = read_header(&mut c);
        assert_eq!((rels, ways, nodes), (1, 1, 0));

        // Decode the rel record and check its inner way count.
        let _type = c.read_i32::<LittleEndian>().unwrap();
        let _class = c.read_i32::<LittleEndian>().unwrap();
        let mut skip = [0u8; 12]; // center + range
        c.read_exact(&mut skip).unwrap();
        let size_name = c.read_i32::<LittleEndian>().unwrap();
        let inner_ways = c.read_i32::<LittleEndian>().unwrap();
        assert_eq!(size_name, 10);
        assert_eq!(inner_ways, 2);
        let mut name = vec![0u8; 10];
        c.read_exact(&mut name).unwrap();
        assert_eq!(&name, b"Chautauqua");
        // Name padded to the next 4-byte boundary.
        let mut pad = [0u8; 2];
        c.read_exact(&mut pad).unwrap();
        assert_eq!(pad, [0, 0]);
    }

    #[test]
    fn record_order_is_enforced() {
        let mut w = TileWriter::begin_tile(12, 0, 0, 0);
        w.add_node(1, 0, (0, 0), None).unwrap();
        assert!(w.begin_way(1, 0, 0, (0, 0), [0, 0, 0, 0], None).is_err());

        let mut w = TileWriter::begin_tile(12, 0, 0, 0);
        w.begin_way(1, 0, 0, (0, 0), [0, 0, 0, 0], None).unwrap();
        w.end_way().unwrap();
        assert!(w.begin_rel(0, 1, (0, 0), [0, 0, 0, 0], None).is_err());

        let mut w = TileWriter::begin_tile(12, 0, 0, 0);
        w.begin_way(1, 0, 0, (0, 0), [0, 0, 0, 0], None).unwrap();
        assert!(w.add_node(1, 0, (0, 0), None).is_err());

        let mut w = TileWriter::begin_tile(12, 0, 0, 0);
        assert!(w.end_way().is_err());
    }
}
