//! Catalog schema management.
//!
//! The catalog lives in a fixed set of `bayesdb_*` tables inside the
//! store. The schema is versioned through `bayesdb_metadata`; opening a
//! database written by a newer binary fails, while an older database is
//! upgraded one way, inside a single transaction.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{BqlError, Result};

/// Schema version written by this binary.
pub const CURRENT_VERSION: i64 = 2;

/// Environment variable that disables the version check (tests only).
pub const DISABLE_VERSION_CHECK_VAR: &str = "BAYESDB_DISABLE_VERSION_CHECK";

/// DDL for a fresh catalog, at the oldest supported version.
const SCHEMA_V1: &str = r#"
CREATE TABLE bayesdb_metadata (
    key TEXT NOT NULL PRIMARY KEY,
    value TEXT
);

CREATE TABLE bayesdb_column (
    tabname TEXT NOT NULL,
    colno INTEGER NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (tabname, colno),
    UNIQUE (tabname, name)
);

CREATE TABLE bayesdb_population (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    tabname TEXT NOT NULL
);

CREATE TABLE bayesdb_generator (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    population_id INTEGER NOT NULL REFERENCES bayesdb_population(id),
    backend TEXT NOT NULL,
    schema_json TEXT NOT NULL DEFAULT '',
    defaultp INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE bayesdb_variable (
    population_id INTEGER NOT NULL REFERENCES bayesdb_population(id),
    generator_id INTEGER REFERENCES bayesdb_generator(id),
    colno INTEGER NOT NULL,
    name TEXT NOT NULL,
    stattype TEXT NOT NULL,
    PRIMARY KEY (population_id, colno),
    UNIQUE (population_id, name)
);

CREATE TABLE bayesdb_generator_model (
    generator_id INTEGER NOT NULL
        REFERENCES bayesdb_generator(id) ON DELETE CASCADE,
    modelno INTEGER NOT NULL,
    PRIMARY KEY (generator_id, modelno)
);
"#;

/// Upgrade scripts; entry `i` upgrades version `i + 1` to `i + 2`.
const UPGRADES: &[&str] = &[
    // 1 -> 2: per-model iteration counter for the ANALYZE bookkeeping.
    "ALTER TABLE bayesdb_generator_model
         ADD COLUMN iterations INTEGER NOT NULL DEFAULT 0;",
];

/// Reads the stored schema version, or `None` when the catalog has never
/// been installed.
pub fn stored_version(conn: &Connection) -> Result<Option<i64>> {
    let installed: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master
          WHERE type = 'table' AND name = 'bayesdb_metadata'",
        [],
        |row| row.get::<_, i64>(0).map(|n| n > 0),
    )?;
    if !installed {
        return Ok(None);
    }
    let version: String = conn.query_row(
        "SELECT value FROM bayesdb_metadata WHERE key = 'version'",
        [],
        |row| row.get(0),
    )?;
    version
        .parse::<i64>()
        .map(Some)
        .map_err(|_| BqlError::Schema(format!("Corrupt schema version: {version}")))
}

/// Installs or upgrades the catalog. `check_version` is false when the
/// test override is set; a too-new database then opens as-is.
pub fn ensure_schema(conn: &Connection, check_version: bool) -> Result<()> {
    match stored_version(conn)? {
        None => {
            info!(version = CURRENT_VERSION, "Installing catalog schema");
            conn.execute_batch("BEGIN")?;
            let r = install(conn);
            finish(conn, r)
        }
        Some(v) if v == CURRENT_VERSION => Ok(()),
        Some(v) if v > CURRENT_VERSION => {
            if check_version {
                Err(BqlError::Schema(format!(
                    "Database schema version {v} is newer than supported {CURRENT_VERSION}"
                )))
            } else {
                Ok(())
            }
        }
        Some(v) => {
            info!(from = v, to = CURRENT_VERSION, "Upgrading catalog schema");
            conn.execute_batch("BEGIN")?;
            let r = upgrade(conn, v);
            finish(conn, r)
        }
    }
}

fn install(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_V1)?;
    conn.execute(
        "INSERT INTO bayesdb_metadata (key, value) VALUES ('version', '1')",
        [],
    )?;
    upgrade(conn, 1)
}

fn upgrade(conn: &Connection, from: i64) -> Result<()> {
    let mut version = from;
    while version < CURRENT_VERSION {
        let script = UPGRADES
            .get(usize::try_from(version - 1).expect("version >= 1"))
            .ok_or_else(|| {
                BqlError::Internal(format!("No upgrade script from version {version}"))
            })?;
        debug!(from = version, "Applying schema upgrade");
        conn.execute_batch(script)?;
        version += 1;
        conn.execute(
            "UPDATE bayesdb_metadata SET value = ?1 WHERE key = 'version'",
            [version.to_string()],
        )?;
    }
    Ok(())
}

fn finish(conn: &Connection, r: Result<()>) -> Result<()> {
    match r {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        conn
    }

    #[test]
    fn test_install_and_reopen() {
        let conn = fresh_conn();
        ensure_schema(&conn, true).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), Some(CURRENT_VERSION));
        // Idempotent.
        ensure_schema(&conn, true).unwrap();
    }

    #[test]
    fn test_upgrade_from_v1() {
        let conn = fresh_conn();
        conn.execute_batch("BEGIN").unwrap();
        conn.execute_batch(SCHEMA_V1).unwrap();
        conn.execute(
            "INSERT INTO bayesdb_metadata (key, value) VALUES ('version', '1')",
            [],
        )
        .unwrap();
        conn.execute_batch("COMMIT").unwrap();

        ensure_schema(&conn, true).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), Some(CURRENT_VERSION));
        // The v2 column exists.
        conn.execute(
            "INSERT INTO bayesdb_population (name, tabname) VALUES ('p', 't')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO bayesdb_generator (name, population_id, backend)
             VALUES ('g', 1, 'toy')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO bayesdb_generator_model (generator_id, modelno, iterations)
             VALUES (1, 0, 7)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_newer_version_fails() {
        let conn = fresh_conn();
        ensure_schema(&conn, true).unwrap();
        conn.execute(
            "UPDATE bayesdb_metadata SET value = ?1 WHERE key = 'version'",
            [(CURRENT_VERSION + 1).to_string()],
        )
        .unwrap();
        assert!(matches!(
            ensure_schema(&conn, true),
            Err(BqlError::Schema(_))
        ));
        // Override allows opening anyway.
        ensure_schema(&conn, false).unwrap();
    }

    #[test]
    fn test_model_cascade() {
        let conn = fresh_conn();
        ensure_schema(&conn, true).unwrap();
        conn.execute(
            "INSERT INTO bayesdb_population (name, tabname) VALUES ('p', 't')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO bayesdb_generator (name, population_id, backend)
             VALUES ('g', 1, 'toy')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO bayesdb_generator_model (generator_id, modelno) VALUES (1, 0)",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM bayesdb_generator WHERE id = 1", [])
            .unwrap();
        let models: i64 = conn
            .query_row("SELECT COUNT(*) FROM bayesdb_generator_model", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(models, 0);
    }

    #[test]
    fn test_population_delete_restricted_by_generator() {
        let conn = fresh_conn();
        ensure_schema(&conn, true).unwrap();
        conn.execute(
            "INSERT INTO bayesdb_population (name, tabname) VALUES ('p', 't')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO bayesdb_generator (name, population_id, backend)
             VALUES ('g', 1, 'toy')",
            [],
        )
        .unwrap();
        assert!(conn
            .execute("DELETE FROM bayesdb_population WHERE id = 1", [])
            .is_err());
    }
}
