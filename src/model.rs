use std::fmt;
use std::mem::size_of;

use crate::geom::Bbox;

/// Typed object key. `Display` renders the tagged form used in logs and in
/// the legacy export-set encoding ("n123", "w45", "r7").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ObjectId {
    Node(i64),
    Way(i64),
    Rel(i64),
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Node(id) => write!(f, "n{id}"),
            ObjectId::Way(id) => write!(f, "w{id}"),
            ObjectId::Rel(id) => write!(f, "r{id}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub name: Option<String>,
    pub abrev: Option<String>,
    /// Elevation in feet.
    pub ele: i32,
    pub st: Option<String>,
    pub class: i32,
}

impl Node {
    pub fn residency(&self) -> usize {
        size_of::<Node>()
            + self.name.as_ref().map_or(0, |s| s.len())
            + self.abrev.as_ref().map_or(0, |s| s.len())
            + self.st.as_ref().map_or(0, |s| s.len())
    }
}

pub const FLAG_ONEWAY_FWD: i32 = 1 << 0;
pub const FLAG_ONEWAY_REV: i32 = 1 << 1;
pub const FLAG_BRIDGE: i32 = 1 << 2;
pub const FLAG_TUNNEL: i32 = 1 << 3;
pub const FLAG_CUTTING: i32 = 1 << 4;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WayFlags {
    /// 1 forward, -1 reverse, 0 none.
    pub oneway: i8,
    pub bridge: bool,
    pub tunnel: bool,
    pub cutting: bool,
}

impl WayFlags {
    pub fn encode(self) -> i32 {
        let mut f = 0;
        if self.oneway > 0 {
            f |= FLAG_ONEWAY_FWD;
        }
        if self.oneway < 0 {
            f |= FLAG_ONEWAY_REV;
        }
        if self.bridge {
            f |= FLAG_BRIDGE;
        }
        if self.tunnel {
            f |= FLAG_TUNNEL;
        }
        if self.cutting {
            f |= FLAG_CUTTING;
        }
        f
    }
}

#[derive(Clone, Debug)]
pub struct Way {
    pub id: i64,
    pub name: Option<String>,
    pub abrev: Option<String>,
    pub class: i32,
    pub layer: i32,
    pub flags: WayFlags,
    /// Style wants this way rendered as a point at its bbox center.
    pub center: bool,
    pub selected: bool,
    pub bbox: Bbox,
    pub nds: Vec<i64>,
}

impl Way {
    pub fn head(&self) -> Option<i64> {
        self.nds.first().copied()
    }

    pub fn tail(&self) -> Option<i64> {
        self.nds.last().copied()
    }

    pub fn is_loop(&self) -> bool {
        self.nds.len() > 1 && self.nds.first() == self.nds.last()
    }

    pub fn residency(&self) -> usize {
        size_of::<Way>()
            + self.name.as_ref().map_or(0, |s| s.len())
            + self.abrev.as_ref().map_or(0, |s| s.len())
            + self.nds.len() * size_of::<i64>()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelType {
    None,
    Boundary,
    Multipolygon,
}

impl RelType {
    pub fn as_i32(self) -> i32 {
        match self {
            RelType::None => 0,
            RelType::Boundary => 1,
            RelType::Multipolygon => 2,
        }
    }

    pub fn from_i32(v: i32) -> RelType {
        match v {
            1 => RelType::Boundary,
            2 => RelType::Multipolygon,
            _ => RelType::None,
        }
    }

    pub fn from_tag(v: &str) -> RelType {
        match v {
            "boundary" => RelType::Boundary,
            "multipolygon" => RelType::Multipolygon,
            _ => RelType::None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemberKind {
    Node,
    Way,
    Rel,
}

impl MemberKind {
    pub fn as_i32(self) -> i32 {
        match self {
            MemberKind::Node => 0,
            MemberKind::Way => 1,
            MemberKind::Rel => 2,
        }
    }

    pub fn from_i32(v: i32) -> MemberKind {
        match v {
            1 => MemberKind::Way,
            2 => MemberKind::Rel,
            _ => MemberKind::Node,
        }
    }
}

pub const ROLE_NONE: i32 = 0;
pub const ROLE_OUTER: i32 = 1;
pub const ROLE_INNER: i32 = 2;
pub const ROLE_ADMIN_CENTRE: i32 = 3;
pub const ROLE_LABEL: i32 = 4;

pub fn role_code(role: &str) -> i32 {
    match role {
        "outer" => ROLE_OUTER,
        "inner" => ROLE_INNER,
        "admin_centre" => ROLE_ADMIN_CENTRE,
        "label" => ROLE_LABEL,
        _ => ROLE_NONE,
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Member {
    pub kind: MemberKind,
    pub reference: i64,
    pub role: i32,
}

#[derive(Clone, Debug)]
pub struct Relation {
    pub id: i64,
    pub name: Option<String>,
    pub abrev: Option<String>,
    pub class: i32,
    pub rel_type: RelType,
    /// Style wants this relation rendered as a point at its bbox center.
    pub center: bool,
    pub polygon: bool,
    pub bbox: Bbox,
    pub members: Vec<Member>,
}

impl Relation {
    pub fn residency(&self) -> usize {
        size_of::<Relation>()
            + self.name.as_ref().map_or(0, |s| s.len())
            + self.abrev.as_ref().map_or(0, |s| s.len())
            + self.members.len() * size_of::<Member>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_id_display() {
        assert_eq!(ObjectId::Node(123).to_string(), "n123");
        assert_eq!(ObjectId::Way(45).to_string(), "w45");
        assert_eq!(ObjectId::Rel(7).to_string(), "r7");
    }

    #[test]
    fn flags_encode_bits() {
        let f = WayFlags { oneway: -1, bridge: true, tunnel: false, cutting: true };
        assert_eq!(f.encode(), FLAG_ONEWAY_REV | FLAG_BRIDGE | FLAG_CUTTING);
        assert_eq!(WayFlags::default().encode(), 0);
    }

    #[test]
    fn loop_detection() {
        let mut w = Way {
            id: 1,
            name: None,
            abrev: None,
            class: 0,
            layer: 0,
            flags: WayFlags::default(),
            center: false,
            selected: true,
            bbox: Bbox::default(),
            nds: vec![1, 2, 3, 1],
        };
        assert!(w.is_loop());
        w.nds.pop();
        assert!(!w.is_loop());
    }
}
