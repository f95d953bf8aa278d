//! `changeset`: apply a changeset XML file against the index database,
//! invalidating the derived range tables above the given watermark.

use std::path::Path;

use anyhow::Result;
use log::info;

use crate::changeset::apply_changesets;
use crate::db;
use crate::osm;

pub fn cmd_changeset(change_id: i64, changesets_path: &Path, db_path: &Path) -> Result<()> {
    let osm = osm::read_osm_file(changesets_path)?;
    info!(
        "changeset: {} records from {}, watermark {}",
        osm.changeset.len(),
        changesets_path.display(),
        change_id
    );
    let mut conn = db::open_rw(db_path)?;
    db::create_tables(&mut conn)?;
    apply_changesets(&mut conn, change_id, &osm.changeset)?;
    Ok(())
}
