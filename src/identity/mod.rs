//! Persistent identity map: local task/phase ids ↔ remote issue/milestone ids.
//!
//! The store is the durable source of correlation across sync runs. Without
//! it, re-running sync would either duplicate remote issues or lose the
//! correlation entirely; title matching is rejected as unreliable since
//! titles are user-editable on both sides.
//!
//! Backed by `SQLite`. One cycle holds an EXCLUSIVE transaction from
//! `begin_cycle` to `commit_cycle`, so two concurrent cycles cannot
//! double-create issues for the same local id.

mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::error::{Result, RoadsyncError};
use crate::model::SyncDirection;
use schema::apply_schema;

/// Whether a mapping correlates a task/issue or a phase/milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingKind {
    Task,
    Phase,
}

impl MappingKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Phase => "phase",
        }
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MappingKind {
    type Err = RoadsyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "task" => Ok(Self::Task),
            "phase" => Ok(Self::Phase),
            other => Err(RoadsyncError::Config(format!("invalid mapping kind: {other}"))),
        }
    }
}

/// One durable correlation record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Mapping {
    pub local_id: String,
    pub remote_id: u64,
    pub kind: MappingKind,
    pub local_fingerprint: String,
    pub remote_fingerprint: String,
    pub last_synced_direction: SyncDirection,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed identity map.
#[derive(Debug)]
pub struct IdentityStore {
    conn: Connection,
    path: PathBuf,
    in_cycle: bool,
}

impl IdentityStore {
    /// Open (or create) the store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the
    /// schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, 5_000)
    }

    /// Open with an explicit busy timeout (ms) for lock contention.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the
    /// schema cannot be applied.
    pub fn open_with_timeout(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
        // Another cycle's EXCLUSIVE lock can surface as busy here already.
        if let Err(e) = init_connection(&conn) {
            if is_busy(&e) {
                return Err(RoadsyncError::StoreLocked {
                    path: path.to_path_buf(),
                });
            }
            return Err(e.into());
        }
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            in_cycle: false,
        })
    }

    /// In-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if schema application fails.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
            in_cycle: false,
        })
    }

    /// Take the cycle-wide exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns `StoreLocked` if another cycle holds the lock past the busy
    /// timeout.
    pub fn begin_cycle(&mut self) -> Result<()> {
        match self.conn.execute_batch("BEGIN EXCLUSIVE") {
            Ok(()) => {
                self.in_cycle = true;
                debug!(path = %self.path.display(), "cycle lock acquired");
                Ok(())
            }
            Err(e) if is_busy(&e) => Err(RoadsyncError::StoreLocked {
                path: self.path.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Commit the cycle's map updates and release the lock.
    ///
    /// # Errors
    ///
    /// Returns a database error if the commit fails.
    pub fn commit_cycle(&mut self) -> Result<()> {
        if self.in_cycle {
            self.conn.execute_batch("COMMIT")?;
            self.in_cycle = false;
        }
        Ok(())
    }

    /// Roll back map updates (dry-run, fatal abort) and release the lock.
    ///
    /// # Errors
    ///
    /// Returns a database error if the rollback fails.
    pub fn rollback_cycle(&mut self) -> Result<()> {
        if self.in_cycle {
            self.conn.execute_batch("ROLLBACK")?;
            self.in_cycle = false;
        }
        Ok(())
    }

    /// Look up the mapping for a local id.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub fn lookup(&self, local_id: &str) -> Result<Option<Mapping>> {
        self.conn
            .query_row(
                "SELECT local_id, remote_id, kind, local_fingerprint, remote_fingerprint,
                        last_synced_direction, created_at, updated_at
                 FROM mappings WHERE local_id = ?1",
                params![local_id],
                row_to_mapping,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Look up the mapping for a remote id of the given kind. Issue and
    /// milestone numbers are independent sequences on the tracker, so a
    /// bare remote id is ambiguous without the kind.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub fn lookup_reverse(&self, remote_id: u64, kind: MappingKind) -> Result<Option<Mapping>> {
        self.conn
            .query_row(
                "SELECT local_id, remote_id, kind, local_fingerprint, remote_fingerprint,
                        last_synced_direction, created_at, updated_at
                 FROM mappings WHERE remote_id = ?1 AND kind = ?2",
                params![remote_id, kind.as_str()],
                row_to_mapping,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Create a new binding. Fails if either side is already bound to a
    /// different counterpart (bijection invariant).
    ///
    /// # Errors
    ///
    /// Returns `MappingConflict` on a bijection violation, or a database
    /// error on insert failure.
    pub fn bind(&mut self, local_id: &str, remote_id: u64, kind: MappingKind) -> Result<()> {
        if let Some(existing) = self.lookup(local_id)? {
            if existing.remote_id == remote_id {
                return Ok(()); // already bound as requested
            }
            return Err(RoadsyncError::MappingConflict {
                local_id: local_id.to_string(),
                remote_id,
            });
        }
        if let Some(existing) = self.lookup_reverse(remote_id, kind)? {
            if existing.local_id != local_id {
                return Err(RoadsyncError::MappingConflict {
                    local_id: local_id.to_string(),
                    remote_id,
                });
            }
        }

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO mappings
                 (local_id, remote_id, kind, local_fingerprint, remote_fingerprint,
                  last_synced_direction, created_at, updated_at)
             VALUES (?1, ?2, ?3, '', '', 'none', ?4, ?4)",
            params![local_id, remote_id, kind.as_str(), now],
        )?;
        debug!(local_id, remote_id, kind = %kind, "bound mapping");
        Ok(())
    }

    /// Destroy a binding (explicit unlink when removed on both sides).
    ///
    /// # Errors
    ///
    /// Returns `MappingNotFound` if no binding exists.
    pub fn unbind(&mut self, local_id: &str) -> Result<()> {
        let n = self
            .conn
            .execute("DELETE FROM mappings WHERE local_id = ?1", params![local_id])?;
        if n == 0 {
            return Err(RoadsyncError::MappingNotFound {
                local_id: local_id.to_string(),
            });
        }
        Ok(())
    }

    /// Remember that an item was retired under the mark-removed policy so
    /// later cycles do not recreate it remotely.
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub fn add_tombstone(&mut self, local_id: &str, kind: MappingKind) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO tombstones (local_id, kind, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(local_id) DO NOTHING",
            params![local_id, kind.as_str(), now],
        )?;
        debug!(local_id, kind = %kind, "tombstoned");
        Ok(())
    }

    /// Whether the item was previously retired.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub fn is_tombstoned(&self, local_id: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT local_id FROM tombstones WHERE local_id = ?1",
                params![local_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Forget a tombstone (recreate policy, or the item came back). No-op
    /// when none exists.
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub fn clear_tombstone(&mut self, local_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM tombstones WHERE local_id = ?1", params![local_id])?;
        Ok(())
    }

    /// Record the outcome of a successful sync for one item: direction plus
    /// both fingerprints as of this write.
    ///
    /// # Errors
    ///
    /// Returns `MappingNotFound` if no binding exists.
    pub fn record_sync(
        &mut self,
        local_id: &str,
        direction: SyncDirection,
        local_fingerprint: &str,
        remote_fingerprint: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let n = self.conn.execute(
            "UPDATE mappings
             SET local_fingerprint = ?2, remote_fingerprint = ?3,
                 last_synced_direction = ?4, updated_at = ?5
             WHERE local_id = ?1",
            params![
                local_id,
                local_fingerprint,
                remote_fingerprint,
                direction.as_str(),
                now
            ],
        )?;
        if n == 0 {
            return Err(RoadsyncError::MappingNotFound {
                local_id: local_id.to_string(),
            });
        }
        Ok(())
    }

    /// All mappings, ordered by local id.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub fn all_mappings(&self) -> Result<Vec<Mapping>> {
        let mut stmt = self.conn.prepare(
            "SELECT local_id, remote_id, kind, local_fingerprint, remote_fingerprint,
                    last_synced_direction, created_at, updated_at
             FROM mappings ORDER BY local_id",
        )?;
        let rows = stmt.query_map([], row_to_mapping)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Store a metadata value (e.g. last cycle timestamp).
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub fn set_meta(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Read a metadata value.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }
}

impl Drop for IdentityStore {
    fn drop(&mut self) {
        // An interrupted cycle must not leave a half-written map behind.
        if self.in_cycle {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

fn init_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    apply_schema(conn)
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn row_to_mapping(row: &rusqlite::Row<'_>) -> rusqlite::Result<Mapping> {
    let kind_str: String = row.get(2)?;
    let direction_str: String = row.get(5)?;
    let created: String = row.get(6)?;
    let updated: String = row.get(7)?;
    Ok(Mapping {
        local_id: row.get(0)?,
        remote_id: row.get::<_, i64>(1)? as u64,
        kind: kind_str.parse().unwrap_or(MappingKind::Task),
        local_fingerprint: row.get(3)?,
        remote_fingerprint: row.get(4)?,
        last_synced_direction: direction_str.parse().unwrap_or(SyncDirection::None),
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_lookup_both_directions() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        store.bind("tasks.md#T008", 42, MappingKind::Task).unwrap();

        let by_local = store.lookup("tasks.md#T008").unwrap().unwrap();
        assert_eq!(by_local.remote_id, 42);
        assert_eq!(by_local.kind, MappingKind::Task);
        assert_eq!(by_local.last_synced_direction, SyncDirection::None);

        let by_remote = store.lookup_reverse(42, MappingKind::Task).unwrap().unwrap();
        assert_eq!(by_remote.local_id, "tasks.md#T008");
        assert!(store.lookup_reverse(42, MappingKind::Phase).unwrap().is_none());
    }

    #[test]
    fn issue_and_milestone_numbers_do_not_collide() {
        // A fresh tracker hands out issue #1 and milestone #1 in the same
        // cycle; both bindings must stick.
        let mut store = IdentityStore::open_in_memory().unwrap();
        store.bind("tasks.md#phase-1", 1, MappingKind::Phase).unwrap();
        store.bind("tasks.md#T001", 1, MappingKind::Task).unwrap();

        let phase = store.lookup_reverse(1, MappingKind::Phase).unwrap().unwrap();
        assert_eq!(phase.local_id, "tasks.md#phase-1");
        let task = store.lookup_reverse(1, MappingKind::Task).unwrap().unwrap();
        assert_eq!(task.local_id, "tasks.md#T001");
    }

    #[test]
    fn bind_enforces_bijection() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        store.bind("tasks.md#T001", 1, MappingKind::Task).unwrap();

        // Same local, different remote.
        let err = store.bind("tasks.md#T001", 2, MappingKind::Task).unwrap_err();
        assert!(matches!(err, RoadsyncError::MappingConflict { .. }));

        // Different local, same remote.
        let err = store.bind("tasks.md#T002", 1, MappingKind::Task).unwrap_err();
        assert!(matches!(err, RoadsyncError::MappingConflict { .. }));

        // Re-binding the identical pair is a no-op.
        store.bind("tasks.md#T001", 1, MappingKind::Task).unwrap();
    }

    #[test]
    fn record_sync_updates_fingerprints_and_direction() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        store.bind("tasks.md#T001", 1, MappingKind::Task).unwrap();
        store
            .record_sync("tasks.md#T001", SyncDirection::LocalToRemote, "lfp", "rfp")
            .unwrap();

        let m = store.lookup("tasks.md#T001").unwrap().unwrap();
        assert_eq!(m.local_fingerprint, "lfp");
        assert_eq!(m.remote_fingerprint, "rfp");
        assert_eq!(m.last_synced_direction, SyncDirection::LocalToRemote);
    }

    #[test]
    fn unbind_removes_and_errors_on_missing() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        store.bind("tasks.md#T001", 1, MappingKind::Task).unwrap();
        store.unbind("tasks.md#T001").unwrap();
        assert!(store.lookup("tasks.md#T001").unwrap().is_none());

        let err = store.unbind("tasks.md#T001").unwrap_err();
        assert!(matches!(err, RoadsyncError::MappingNotFound { .. }));
    }

    #[test]
    fn rollback_discards_cycle_writes() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        store.begin_cycle().unwrap();
        store.bind("tasks.md#T001", 1, MappingKind::Task).unwrap();
        store.rollback_cycle().unwrap();
        assert!(store.lookup("tasks.md#T001").unwrap().is_none());
    }

    #[test]
    fn meta_roundtrip() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        assert!(store.get_meta("last_cycle_at").unwrap().is_none());
        store.set_meta("last_cycle_at", "2026-01-01T00:00:00Z").unwrap();
        store.set_meta("last_cycle_at", "2026-02-01T00:00:00Z").unwrap();
        assert_eq!(
            store.get_meta("last_cycle_at").unwrap().as_deref(),
            Some("2026-02-01T00:00:00Z")
        );
    }

    #[test]
    fn tombstone_roundtrip() {
        let mut store = IdentityStore::open_in_memory().unwrap();
        assert!(!store.is_tombstoned("roadmap.md#phase-2").unwrap());

        store.add_tombstone("roadmap.md#phase-2", MappingKind::Phase).unwrap();
        // Repeat writes are absorbed.
        store.add_tombstone("roadmap.md#phase-2", MappingKind::Phase).unwrap();
        assert!(store.is_tombstoned("roadmap.md#phase-2").unwrap());

        store.clear_tombstone("roadmap.md#phase-2").unwrap();
        assert!(!store.is_tombstoned("roadmap.md#phase-2").unwrap());
        // Clearing an absent tombstone is fine.
        store.clear_tombstone("roadmap.md#phase-2").unwrap();
    }

    #[test]
    fn open_during_anothers_cycle_reports_store_locked() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("identity.db");

        let mut holder = IdentityStore::open(&db).unwrap();
        holder.begin_cycle().unwrap();

        let err = IdentityStore::open_with_timeout(&db, 50).unwrap_err();
        assert!(matches!(err, RoadsyncError::StoreLocked { .. }));

        holder.rollback_cycle().unwrap();
        // Lock released: the open succeeds now.
        IdentityStore::open_with_timeout(&db, 50).unwrap();
    }

    #[test]
    fn second_store_sees_committed_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("identity.db");

        let mut a = IdentityStore::open(&db).unwrap();
        a.begin_cycle().unwrap();
        a.bind("tasks.md#T001", 7, MappingKind::Task).unwrap();
        a.commit_cycle().unwrap();
        drop(a);

        let b = IdentityStore::open(&db).unwrap();
        assert_eq!(b.lookup("tasks.md#T001").unwrap().unwrap().remote_id, 7);
    }
}
