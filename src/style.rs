//! Style table: maps `(key, value)` tag pairs to small class codes carrying
//! the search rank, minimum zoom, and point-center/polygon rendering hints.
//! Loaded once per run from a `style.xml` document of `<class/>` elements.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::osm::OsmTag;

#[derive(Debug, Deserialize)]
struct StyleXml {
    #[serde(rename = "class", default)]
    classes: Vec<ClassXml>,
}

fn default_min_zoom() -> i32 {
    14
}

#[derive(Debug, Deserialize)]
struct ClassXml {
    #[serde(rename = "@k")]
    k: String,
    /// Missing value matches any value of the key.
    #[serde(rename = "@v", default)]
    v: Option<String>,
    #[serde(rename = "@rank", default)]
    rank: i32,
    #[serde(rename = "@zoom", default = "default_min_zoom")]
    zoom: i32,
    #[serde(rename = "@center", default)]
    center: bool,
    #[serde(rename = "@polygon", default)]
    polygon: bool,
}

#[derive(Copy, Clone, Debug)]
pub struct ClassDef {
    pub code: i32,
    pub rank: i32,
    pub min_zoom: i32,
    pub center: bool,
    pub polygon: bool,
}

/// Class code 0 is reserved for "no class".
pub const CLASS_NONE: i32 = 0;

#[derive(Debug, Default)]
pub struct Style {
    classes: Vec<ClassDef>,
    by_pair: HashMap<(String, String), i32>,
    by_key: HashMap<String, i32>,
}

impl Style {
    pub fn load(path: &Path) -> Result<Style> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let xml: StyleXml = quick_xml::de::from_reader(BufReader::new(file))
            .with_context(|| format!("parse style {}", path.display()))?;
        Ok(Style::from_classes(xml.classes))
    }

    fn from_classes(classes: Vec<ClassXml>) -> Style {
        let mut style = Style::default();
        for c in classes {
            let code = style.classes.len() as i32 + 1;
            style.classes.push(ClassDef {
                code,
                rank: c.rank,
                min_zoom: c.zoom,
                center: c.center,
                polygon: c.polygon,
            });
            match c.v {
                Some(v) => {
                    style.by_pair.insert((c.k, v), code);
                }
                None => {
                    style.by_key.insert(c.k, code);
                }
            }
        }
        style
    }

    /// The class of the first tag matching the style, or `CLASS_NONE`.
    pub fn classify(&self, tags: &[OsmTag]) -> i32 {
        for tag in tags {
            if let Some(&code) = self.by_pair.get(&(tag.k.clone(), tag.v.clone())) {
                return code;
            }
            if let Some(&code) = self.by_key.get(&tag.k) {
                return code;
            }
        }
        CLASS_NONE
    }

    pub fn class(&self, code: i32) -> Option<&ClassDef> {
        if code <= 0 {
            return None;
        }
        self.classes.get(code as usize - 1)
    }

    pub fn min_zoom(&self, code: i32) -> i32 {
        self.class(code).map_or(default_min_zoom(), |c| c.min_zoom)
    }

    pub fn classes(&self) -> &[ClassDef] {
        &self.classes
    }
}
