use std::f64::consts::PI;

/// Radius of the comparison sphere, in miles. Distances and angles derived
/// from `geo2xyz` are only ever compared against each other, so the absolute
/// scale does not matter as long as every caller uses the same radius.
pub const SPHERE_RADIUS: f64 = 1.0;

/// Latitude bound of the Mercator square, `atan(sinh(pi))` in degrees.
pub const MERCATOR_LAT_MAX: f64 = 85.05112877980659;

/// Axis-aligned geographic bounding box. `lat_t >= lat_b`, `lon_l <= lon_r`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Bbox {
    pub lat_t: f64,
    pub lon_l: f64,
    pub lat_b: f64,
    pub lon_r: f64,
}

impl Bbox {
    pub fn point(lat: f64, lon: f64) -> Self {
        Bbox { lat_t: lat, lon_l: lon, lat_b: lat, lon_r: lon }
    }

    pub fn union(&self, other: &Bbox) -> Bbox {
        Bbox {
            lat_t: self.lat_t.max(other.lat_t),
            lon_l: self.lon_l.min(other.lon_l),
            lat_b: self.lat_b.min(other.lat_b),
            lon_r: self.lon_r.max(other.lon_r),
        }
    }

    pub fn expand(&mut self, lat: f64, lon: f64) {
        self.lat_t = self.lat_t.max(lat);
        self.lon_l = self.lon_l.min(lon);
        self.lat_b = self.lat_b.min(lat);
        self.lon_r = self.lon_r.max(lon);
    }

    /// Open half-plane intersection test. Shared borders do not intersect.
    pub fn intersects(&self, other: &Bbox) -> bool {
        self.lat_t > other.lat_b
            && self.lon_l < other.lon_r
            && self.lat_b < other.lat_t
            && self.lon_r > other.lon_l
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat <= self.lat_t && lat >= self.lat_b && lon >= self.lon_l && lon <= self.lon_r
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.lat_t + self.lat_b) / 2.0, (self.lon_l + self.lon_r) / 2.0)
    }

    /// Area in degrees squared.
    pub fn area(&self) -> f64 {
        (self.lat_t - self.lat_b) * (self.lon_r - self.lon_l)
    }

    /// Grow each side outward by `frac` of the box dimensions.
    pub fn inflated(&self, frac: f64) -> Bbox {
        let dlat = (self.lat_t - self.lat_b) * frac;
        let dlon = (self.lon_r - self.lon_l) * frac;
        Bbox {
            lat_t: self.lat_t + dlat,
            lon_l: self.lon_l - dlon,
            lat_b: self.lat_b - dlat,
            lon_r: self.lon_r + dlon,
        }
    }
}

pub fn geo2xyz(lat: f64, lon: f64, radius: f64) -> [f64; 3] {
    let lat = lat.to_radians();
    let lon = lon.to_radians();
    [
        radius * lat.cos() * lon.cos(),
        radius * lat.cos() * lon.sin(),
        radius * lat.sin(),
    ]
}

pub fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn dist(a: [f64; 3], b: [f64; 3]) -> f64 {
    let d = sub(a, b);
    dot(d, d).sqrt()
}

pub fn normalize(v: [f64; 3]) -> [f64; 3] {
    let m = dot(v, v).sqrt();
    if m == 0.0 {
        return v;
    }
    [v[0] / m, v[1] / m, v[2] / m]
}

/// Continuous tile coordinates at `zoom`. The origin sits at Null Island:
/// lon 0 maps to tx 0 and lat 0 to ty 0, with ty growing southward. Tile
/// indices are the floor of these values and may be negative.
pub fn coord2tile(lat: f64, lon: f64, zoom: i32) -> (f64, f64) {
    let n = (1i64 << zoom) as f64;
    let tx = lon / 360.0 * n;
    let ty = -(lat.to_radians().tan().asinh()) / (2.0 * PI) * n;
    (tx, ty)
}

/// Geographic bbox of tile (zoom, x, y) under the same scheme.
pub fn tile2coord(zoom: i32, x: i32, y: i32) -> Bbox {
    let n = (1i64 << zoom) as f64;
    let lat = |ty: f64| (-(ty) * 2.0 * PI / n).sinh().atan().to_degrees();
    Bbox {
        lat_t: lat(y as f64),
        lon_l: x as f64 * 360.0 / n,
        lat_b: lat((y + 1) as f64),
        lon_r: (x + 1) as f64 * 360.0 / n,
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Quadrant {
    None,
    Top,
    Left,
    Bottom,
    Right,
}

/// Classify a normalized point ray against the tile's top-left and top-right
/// corner rays (all relative to the tile center).
pub fn quadrant(pc: [f64; 3], tlc: [f64; 3], trc: [f64; 3]) -> Quadrant {
    let dl = dot(pc, tlc);
    let dr = dot(pc, trc);
    if dl > 0.0 && dr > 0.0 {
        Quadrant::Top
    } else if dl > 0.0 {
        Quadrant::Left
    } else if dr <= 0.0 {
        Quadrant::Bottom
    } else {
        Quadrant::Right
    }
}
