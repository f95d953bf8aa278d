use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};

/// How long either side waits out the other's lock. Range queries against an
/// index mid-changeset stall for at most this long before surfacing a store
/// fault for the current tile.
const BUSY_WAIT: Duration = Duration::from_millis(5000);

/// One read-only connection per tile worker; its statement cache is that
/// worker's prepared-statement set.
pub fn open_ro<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    conn.busy_timeout(BUSY_WAIT)?;
    Ok(conn)
}

/// Write side, used by import, changeset, and the prefetch blob writer.
/// WAL keeps tile workers reading while one of those writes; synchronous is
/// relaxed because every write path here is a rebuildable bulk job.
pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_WAIT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA temp_store=MEMORY;")?;
    Ok(conn)
}

/// Run one write batch in a transaction that takes the write lock at BEGIN.
/// Import stages and the changeset finish step bundle many statements; if
/// the lock were deferred to the first write, a batch could fail midway and
/// leave the derived tables half-updated.
pub fn with_tx<T, F: FnOnce(&Transaction) -> Result<T>>(conn: &mut Connection, f: F) -> Result<T> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

pub fn create_tables(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS nodes_coords (
            nid INTEGER PRIMARY KEY,
            lat REAL NOT NULL,
            lon REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS nodes_info (
            nid      INTEGER PRIMARY KEY,
            name     TEXT,
            abrev    TEXT,
            ele      INTEGER NOT NULL DEFAULT 0,
            st       TEXT,
            class    INTEGER NOT NULL DEFAULT 0,
            min_zoom INTEGER NOT NULL DEFAULT 14
        );

        CREATE TABLE IF NOT EXISTS nodes_range (
            nid  INTEGER PRIMARY KEY,
            latT REAL NOT NULL,
            lonL REAL NOT NULL,
            latB REAL NOT NULL,
            lonR REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ways (
            wid      INTEGER PRIMARY KEY,
            name     TEXT,
            abrev    TEXT,
            class    INTEGER NOT NULL DEFAULT 0,
            layer    INTEGER NOT NULL DEFAULT 0,
            oneway   INTEGER NOT NULL DEFAULT 0,
            bridge   INTEGER NOT NULL DEFAULT 0,
            tunnel   INTEGER NOT NULL DEFAULT 0,
            cutting  INTEGER NOT NULL DEFAULT 0,
            center   INTEGER NOT NULL DEFAULT 0,
            selected INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS ways_range (
            wid      INTEGER PRIMARY KEY,
            latT     REAL NOT NULL,
            lonL     REAL NOT NULL,
            latB     REAL NOT NULL,
            lonR     REAL NOT NULL,
            min_zoom INTEGER NOT NULL DEFAULT 14
        );

        CREATE TABLE IF NOT EXISTS ways_nds (
            wid INTEGER NOT NULL,
            idx INTEGER NOT NULL,
            nid INTEGER NOT NULL,
            PRIMARY KEY (wid, idx)
        );

        CREATE TABLE IF NOT EXISTS rels (
            rid     INTEGER PRIMARY KEY,
            name    TEXT,
            abrev   TEXT,
            class   INTEGER NOT NULL DEFAULT 0,
            type    INTEGER NOT NULL DEFAULT 0,
            center  INTEGER NOT NULL DEFAULT 0,
            polygon INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS rels_range (
            rid      INTEGER PRIMARY KEY,
            latT     REAL NOT NULL,
            lonL     REAL NOT NULL,
            latB     REAL NOT NULL,
            lonR     REAL NOT NULL,
            min_zoom INTEGER NOT NULL DEFAULT 14
        );

        CREATE TABLE IF NOT EXISTS nodes_members (
            rid  INTEGER NOT NULL,
            nid  INTEGER NOT NULL,
            role INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (rid, nid)
        );

        CREATE TABLE IF NOT EXISTS ways_members (
            rid  INTEGER NOT NULL,
            idx  INTEGER NOT NULL,
            wid  INTEGER NOT NULL,
            role INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (rid, idx)
        );

        CREATE TABLE IF NOT EXISTS class_rank (
            class INTEGER PRIMARY KEY,
            rank  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_range_lat ON nodes_range(latT, latB);
        CREATE INDEX IF NOT EXISTS idx_ways_range_lat ON ways_range(latT, latB);
        CREATE INDEX IF NOT EXISTS idx_rels_range_lat ON rels_range(latT, latB);
        CREATE INDEX IF NOT EXISTS idx_ways_members_wid ON ways_members(wid);

        CREATE VIRTUAL TABLE IF NOT EXISTS nodes_text USING fts5(nid UNINDEXED, name);
        CREATE VIRTUAL TABLE IF NOT EXISTS ways_text USING fts5(wid UNINDEXED, name);
        CREATE VIRTUAL TABLE IF NOT EXISTS rels_text USING fts5(rid UNINDEXED, name);
    "#,
    )?;
    Ok(())
}

pub fn meta_get_i64(conn: &Connection, key: &str) -> Result<i64> {
    use rusqlite::OptionalExtension;
    let val: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key=?1", [key], |r| r.get(0))
        .optional()?;
    Ok(val.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0))
}

pub fn meta_set_i64(conn: &Connection, key: &str, value: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO meta(key, value) VALUES(?1, ?2) ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        rusqlite::params![key, value.to_string()],
    )?;
    Ok(())
}
