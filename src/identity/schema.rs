//! Identity map schema and migration logic.

use rusqlite::{Connection, Result};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the identity map database.
pub const SCHEMA_SQL: &str = r"
    -- One row per local↔remote correlation. Issue numbers and milestone
    -- numbers are independent sequences on the tracker side, so the
    -- bijection is scoped per kind: UNIQUE(kind, remote_id).
    CREATE TABLE IF NOT EXISTS mappings (
        local_id TEXT PRIMARY KEY,
        remote_id INTEGER NOT NULL,
        kind TEXT NOT NULL DEFAULT 'task',
        local_fingerprint TEXT NOT NULL DEFAULT '',
        remote_fingerprint TEXT NOT NULL DEFAULT '',
        last_synced_direction TEXT NOT NULL DEFAULT 'none',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (kind, remote_id),
        CHECK (kind IN ('task', 'phase')),
        CHECK (last_synced_direction IN ('local_to_remote', 'remote_to_local', 'none'))
    );

    CREATE INDEX IF NOT EXISTS idx_mappings_kind ON mappings(kind);

    -- Items the operator's policy retired; reconciliation must not
    -- resurrect them. Covers phases, whose removal has no document line
    -- to carry a tag the way removed tasks have.
    CREATE TABLE IF NOT EXISTS tombstones (
        local_id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        created_at TEXT NOT NULL,
        CHECK (kind IN ('task', 'phase'))
    );

    -- Workspace metadata (schema version, last cycle time).
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// Apply the schema and stamp the version.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO NOTHING",
        [CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}
