//! Serde models for the OSM XML elements this tool consumes: `osm`, `bounds`,
//! `node`, `way`, `nd`, `relation`, `member`, `tag`, and `changeset`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct OsmXml {
    #[serde(default)]
    pub bounds: Option<Bounds>,
    #[serde(default)]
    pub node: Vec<OsmNode>,
    #[serde(default)]
    pub way: Vec<OsmWay>,
    #[serde(default)]
    pub relation: Vec<OsmRelation>,
    #[serde(default)]
    pub changeset: Vec<OsmChangeset>,
}

#[derive(Debug, Deserialize)]
pub struct Bounds {
    #[serde(rename = "@minlat", default)]
    pub minlat: f64,
    #[serde(rename = "@minlon", default)]
    pub minlon: f64,
    #[serde(rename = "@maxlat", default)]
    pub maxlat: f64,
    #[serde(rename = "@maxlon", default)]
    pub maxlon: f64,
}

#[derive(Debug, Deserialize)]
pub struct OsmTag {
    #[serde(rename = "@k")]
    pub k: String,
    #[serde(rename = "@v")]
    pub v: String,
}

#[derive(Debug, Deserialize)]
pub struct OsmNode {
    #[serde(rename = "@id")]
    pub id: i64,
    #[serde(rename = "@lat")]
    pub lat: f64,
    #[serde(rename = "@lon")]
    pub lon: f64,
    #[serde(default)]
    pub tag: Vec<OsmTag>,
}

#[derive(Debug, Deserialize)]
pub struct Nd {
    #[serde(rename = "@ref")]
    pub reference: i64,
}

#[derive(Debug, Deserialize)]
pub struct OsmWay {
    #[serde(rename = "@id")]
    pub id: i64,
    #[serde(default)]
    pub nd: Vec<Nd>,
    #[serde(default)]
    pub tag: Vec<OsmTag>,
}

#[derive(Debug, Deserialize)]
pub struct OsmMember {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@ref")]
    pub reference: i64,
    #[serde(rename = "@role", default)]
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct OsmRelation {
    #[serde(rename = "@id")]
    pub id: i64,
    #[serde(default)]
    pub member: Vec<OsmMember>,
    #[serde(default)]
    pub tag: Vec<OsmTag>,
}

#[derive(Debug, Deserialize)]
pub struct OsmChangeset {
    #[serde(rename = "@id")]
    pub id: i64,
    #[serde(rename = "@min_lat", default)]
    pub min_lat: f64,
    #[serde(rename = "@min_lon", default)]
    pub min_lon: f64,
    #[serde(rename = "@max_lat", default)]
    pub max_lat: f64,
    #[serde(rename = "@max_lon", default)]
    pub max_lon: f64,
}

impl OsmChangeset {
    pub fn has_bbox(&self) -> bool {
        self.min_lat != 0.0 || self.min_lon != 0.0 || self.max_lat != 0.0 || self.max_lon != 0.0
    }
}

pub fn tag_value<'a>(tags: &'a [OsmTag], key: &str) -> Option<&'a str> {
    tags.iter().find(|t| t.k == key).map(|t| t.v.as_str())
}

pub fn tag_is_yes(tags: &[OsmTag], key: &str) -> bool {
    matches!(tag_value(tags, key), Some("yes") | Some("true") | Some("1"))
}

pub fn read_osm_file(path: &Path) -> Result<OsmXml> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);
    let osm: OsmXml = quick_xml::de::from_reader(reader)
        .with_context(|| format!("parse OSM XML {}", path.display()))?;
    Ok(osm)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <bounds minlat="39.9" minlon="-105.4" maxlat="40.1" maxlon="-105.1"/>
  <node id="1" lat="40.0" lon="-105.2">
    <tag k="name" v="Boulder Falls"/>
    <tag k="natural" v="waterfall"/>
  </node>
  <node id="2" lat="40.01" lon="-105.21"/>
  <way id="10">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="residential"/>
    <tag k="oneway" v="yes"/>
  </way>
  <relation id="20">
    <member type="way" ref="10" role="outer"/>
    <member type="node" ref="1" role="admin_centre"/>
    <tag k="type" v="multipolygon"/>
  </relation>
  <changeset id="99" min_lat="39.0" min_lon="-106.0" max_lat="41.0" max_lon="-104.0"/>
</osm>"#;

    #[test]
    fn parses_all_elements() {
        let osm: OsmXml = quick_xml::de::from_str(DOC).unwrap();
        assert_eq!(osm.node.len(), 2);
        assert_eq!(osm.way.len(), 1);
        assert_eq!(osm.relation.len(), 1);
        assert_eq!(osm.changeset.len(), 1);
        assert_eq!(osm.bounds.as_ref().unwrap().maxlat, 40.1);

        let n = &osm.node[0];
        assert_eq!(tag_value(&n.tag, "name"), Some("Boulder Falls"));
        assert_eq!(tag_value(&n.tag, "missing"), None);

        let w = &osm.way[0];
        assert_eq!(w.nd.iter().map(|n| n.reference).collect::<Vec<_>>(), vec![1, 2]);
        assert!(tag_is_yes(&w.tag, "oneway"));

        let r = &osm.relation[0];
        assert_eq!(r.member[0].kind, "way");
        assert_eq!(r.member[1].role, "admin_centre");

        let c = &osm.changeset[0];
        assert_eq!(c.id, 99);
        assert!(c.has_bbox());
    }

    #[test]
    fn changeset_without_bbox() {
        let doc = r#"<osm><changeset id="5"/></osm>"#;
        let osm: OsmXml = quick_xml::de::from_str(doc).unwrap();
        assert!(!osm.changeset[0].has_bbox());
    }
}
