//! Distance-based nd thinning. A way keeps its first nd, then drops every nd
//! closer than the zoom tier's minimum distance to the last kept one; the
//! final nd is always kept so joined endpoints stay joinable downstream.

use anyhow::Result;

use crate::geom::{self, SPHERE_RADIUS};
use crate::model::Way;

/// Home tile used to derive the sampling thresholds.
pub const HOME_LAT: f64 = 40.061295;
pub const HOME_LON: f64 = -105.214552;

#[derive(Copy, Clone, Debug)]
pub struct SampleThresholds {
    low: f64,
    mid: f64,
    high: f64,
}

impl SampleThresholds {
    /// One threshold per zoom tier, anchored at the tier's minimum zoom:
    /// the diagonal of the home tile at that zoom divided by `pix * 8` with
    /// `pix = sqrt(2 * 256^2)`. Zoom 0 is the whole Mercator square.
    pub fn new() -> SampleThresholds {
        let pix = (2.0 * 256.0 * 256.0_f64).sqrt();
        let diag = |tile: geom::Bbox| {
            let a = geom::geo2xyz(tile.lat_t, tile.lon_l, SPHERE_RADIUS);
            let b = geom::geo2xyz(tile.lat_b, tile.lon_r, SPHERE_RADIUS);
            geom::dist(a, b)
        };
        let home_tile = |zoom: i32| {
            let (tx, ty) = geom::coord2tile(HOME_LAT, HOME_LON, zoom);
            geom::tile2coord(zoom, tx.floor() as i32, ty.floor() as i32)
        };
        let world = geom::Bbox {
            lat_t: geom::MERCATOR_LAT_MAX,
            lon_l: -180.0,
            lat_b: -geom::MERCATOR_LAT_MAX,
            lon_r: 180.0,
        };
        SampleThresholds {
            low: diag(world) / (pix * 8.0),
            mid: diag(home_tile(9)) / (pix * 8.0),
            high: diag(home_tile(14)) / (pix * 8.0),
        }
    }

    pub fn min_dist(&self, zoom: i32) -> f64 {
        if zoom <= 8 {
            self.low
        } else if zoom <= 13 {
            self.mid
        } else {
            self.high
        }
    }
}

impl Default for SampleThresholds {
    fn default() -> Self {
        SampleThresholds::new()
    }
}

/// Thin `way` in place. `coord` resolves an nd to its cartesian position;
/// nds missing from the store are carried through untouched and do not move
/// the last-kept reference.
pub fn sample_way<F>(way: &mut Way, min_dist: f64, coord: &mut F) -> Result<()>
where
    F: FnMut(i64) -> Result<Option<[f64; 3]>>,
{
    if way.nds.len() <= 2 {
        return Ok(());
    }
    let last_idx = way.nds.len() - 1;
    let mut kept: Vec<i64> = Vec::with_capacity(way.nds.len());
    let mut last_kept: Option<[f64; 3]> = None;
    for (i, &nid) in way.nds.iter().enumerate() {
        let Some(p) = coord(nid)? else {
            kept.push(nid);
            continue;
        };
        match last_kept {
            None => {
                kept.push(nid);
                last_kept = Some(p);
            }
            Some(prev) => {
                if i == last_idx || geom::dist(prev, p) >= min_dist {
                    kept.push(nid);
                    last_kept = Some(p);
                }
            }
        }
    }
    way.nds = kept;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{geo2xyz, Bbox, SPHERE_RADIUS};
    use crate::model::{Way, WayFlags};

    // One mile is roughly this many degrees of latitude.
    const MILE_LAT: f64 = 1.0 / 69.17;

    fn way(nds: Vec<i64>) -> Way {
        Way {
            id: 1,
            name: None,
            abrev: None,
            class: 1,
            layer: 0,
            flags: WayFlags::default(),
            center: false,
            selected: true,
            bbox: Bbox::default(),
            nds,
        }
    }

    fn line_coord(nid: i64) -> Option<[f64; 3]> {
        if nid < 0 {
            return None;
        }
        Some(geo2xyz(40.0 + nid as f64 * MILE_LAT, -105.2, SPHERE_RADIUS))
    }

    #[test]
    fn tier_thresholds_decrease_with_zoom() {
        let t = SampleThresholds::new();
        assert!(t.min_dist(8) > t.min_dist(9));
        assert!(t.min_dist(13) > t.min_dist(14));
        assert_eq!(t.min_dist(0), t.min_dist(8));
        assert_eq!(t.min_dist(9), t.min_dist(13));
        assert_eq!(t.min_dist(14), t.min_dist(18));
    }

    #[test]
    fn mile_spacing_survives_z14_but_not_z8() {
        let t = SampleThresholds::new();
        let mut hi = way(vec![0, 1, 2, 3]);
        sample_way(&mut hi, t.min_dist(14), &mut |n| Ok(line_coord(n))).unwrap();
        assert_eq!(hi.nds, vec![0, 1, 2, 3]);

        let mut lo = way(vec![0, 1, 2, 3]);
        sample_way(&mut lo, t.min_dist(8), &mut |n| Ok(line_coord(n))).unwrap();
        assert_eq!(lo.nds, vec![0, 3]);
    }

    #[test]
    fn last_nd_always_kept() {
        let t = SampleThresholds::new();
        let mut w = way(vec![0, 1, 2]);
        sample_way(&mut w, t.min_dist(0), &mut |n| Ok(line_coord(n))).unwrap();
        assert_eq!(*w.nds.last().unwrap(), 2);
        assert_eq!(*w.nds.first().unwrap(), 0);
    }

    #[test]
    fn missing_nds_do_not_move_the_reference() {
        // -1 is missing from the store; 0 and 1 are one mile apart, so at a
        // threshold above a mile node 1 is dropped even with the hole between.
        let t = SampleThresholds::new();
        let mut w = way(vec![0, -1, 1, 2, 3]);
        sample_way(&mut w, t.min_dist(8), &mut |n| Ok(line_coord(n))).unwrap();
        assert_eq!(w.nds, vec![0, -1, 3]);
    }

    #[test]
    fn sampling_is_idempotent() {
        let t = SampleThresholds::new();
        let mut once = way((0..20).collect());
        sample_way(&mut once, t.min_dist(8), &mut |n| Ok(line_coord(n))).unwrap();
        assert!(once.nds.len() < 20);
        let mut twice = once.clone();
        sample_way(&mut twice, t.min_dist(8), &mut |n| Ok(line_coord(n))).unwrap();
        assert_eq!(once.nds, twice.nds);
    }
}
