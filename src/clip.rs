//! Tile-border culling. Out-of-tile nds are classified into quadrants by the
//! corner-ray test; runs of three consecutive nds in the same quadrant drop
//! the middle one, thinning long out-of-tile stretches to at most two nds per
//! side while leaving everything inside the tile untouched.

use anyhow::Result;

use crate::geom::{self, Bbox, Quadrant, SPHERE_RADIUS};
use crate::model::Way;

/// The tile bbox is grown by this fraction per side before clipping so lines
/// drawn with a non-zero width are not cut between neighboring tiles.
const CLIP_INFLATE: f64 = 1.0 / 16.0;

/// Clip `way` in place against `tile`. `coord` resolves an nd to (lat, lon);
/// nds missing from the store are carried through unclassified.
pub fn clip_way<F>(way: &mut Way, tile: &Bbox, coord: &mut F) -> Result<()>
where
    F: FnMut(i64) -> Result<Option<(f64, f64)>>,
{
    if way.nds.len() <= 2 {
        return Ok(());
    }
    let is_loop = way.is_loop();
    let clip = tile.inflated(CLIP_INFLATE);

    let (clat, clon) = clip.center();
    let cc = geom::geo2xyz(clat, clon, SPHERE_RADIUS);
    let tlc = geom::normalize(geom::sub(
        geom::geo2xyz(clip.lat_t, clip.lon_l, SPHERE_RADIUS),
        cc,
    ));
    let trc = geom::normalize(geom::sub(
        geom::geo2xyz(clip.lat_t, clip.lon_r, SPHERE_RADIUS),
        cc,
    ));

    let last_idx = way.nds.len() - 1;
    let mut out: Vec<i64> = Vec::with_capacity(way.nds.len());
    let mut q0 = Quadrant::None;
    let mut q1 = Quadrant::None;

    for (i, &nid) in way.nds.iter().enumerate() {
        let Some((lat, lon)) = coord(nid)? else {
            out.push(nid);
            continue;
        };
        if clip.contains(lat, lon) {
            q0 = Quadrant::None;
            q1 = Quadrant::None;
            out.push(nid);
            continue;
        }
        let pc = geom::normalize(geom::sub(geom::geo2xyz(lat, lon, SPHERE_RADIUS), cc));
        let q2 = geom::quadrant(pc, tlc, trc);

        if i == 0 && !is_loop {
            // Seed the window with the first nd's quadrant.
            q0 = q2;
            q1 = q2;
            out.push(nid);
            continue;
        }
        if q0 == q1 && q1 == q2 && out.len() >= 2 {
            // Middle of three same-quadrant nds is dispensable.
            out.pop();
        }
        q0 = q1;
        q1 = q2;
        if i == last_idx && !is_loop && q0 == q2 {
            // Trailing nd in the same quadrant as its predecessor.
            continue;
        }
        out.push(nid);
    }

    way.nds = out;
    Ok(())
}
