//! OpenStreetMap tile database tools: import OSM XML into a SQLite index
//! keyed for geographic range lookup, keep it consistent under incremental
//! changesets, and assemble per-tile binary vector extracts plus name
//! searches on top of it.

pub mod cache;
pub mod changeset;
pub mod clip;
pub mod commands;
pub mod config;
pub mod db;
pub mod emit;
pub mod geom;
pub mod join;
pub mod model;
pub mod osm;
pub mod sample;
pub mod store;
pub mod style;
pub mod text;
pub mod tiler;
