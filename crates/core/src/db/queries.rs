//! Typed query helpers for every table in the Lingosync database.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{
    AuditEntry, ConflictRecord, ConflictStatus, PendingEdit, Resolution, ResolutionChoice,
    Revision, StringUnit, UnitState,
};
use crate::stats::TranslationStats;

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `sync_cycles` table.
#[derive(Debug, Clone)]
pub struct SyncCycleEntry {
    pub id: i64,
    pub repository_id: String,
    pub trigger: String,
    pub actor: String,
    pub outcome: String,
    pub revision: Option<String>,
    pub details: Option<String>,
    pub started_at: String,
    pub completed_at: String,
}

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub repository_id: Option<String>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

/// Everything a successful cycle persists, written in one transaction.
#[derive(Debug, Clone)]
pub struct CycleCommit {
    pub repository_id: String,
    /// Revision every tracked file's sync point advances to.
    pub revision: Revision,
    pub files: Vec<String>,
    /// Ids of pending edits now present upstream.
    pub consumed_edits: Vec<String>,
    pub conflicts: Vec<ConflictRecord>,
    pub stats: Vec<(String, TranslationStats)>,
    pub cycle: SyncCycleEntry,
    pub audit: AuditEntry,
}

const CONFLICT_COLUMNS: &str = "id, repository_id, file_path, unit_key, base_target, local_target,
     local_state, remote_source, remote_target, remote_state, resolution, status, choice,
     resolved_by, created_at, resolved_at";

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- sync_points --------------------------------------------------------

    /// Last revision `file_path` was reconciled at.
    pub fn get_sync_point(
        &self,
        repository_id: &str,
        file_path: &str,
    ) -> Result<Option<Revision>, DatabaseError> {
        let conn = self.conn();
        let rev: Option<String> = conn
            .query_row(
                "SELECT revision FROM sync_points WHERE repository_id = ?1 AND file_path = ?2",
                params![repository_id, file_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rev.map(Revision::new))
    }

    /// All sync points of a repository, ordered by file path.
    pub fn list_sync_points(
        &self,
        repository_id: &str,
    ) -> Result<Vec<(String, Revision)>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT file_path, revision FROM sync_points WHERE repository_id = ?1 ORDER BY file_path",
        )?;
        let points = stmt
            .query_map(params![repository_id], |row| {
                Ok((row.get::<_, String>(0)?, Revision::new(row.get::<_, String>(1)?)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(points)
    }

    /// Set the sync point of a single file outside a cycle.
    pub fn set_sync_point(
        &self,
        repository_id: &str,
        file_path: &str,
        revision: &Revision,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        upsert_sync_point(&conn, repository_id, file_path, revision)
    }

    // -- pending_edits ------------------------------------------------------

    /// Store a translator edit. An earlier edit of the same unit is replaced,
    /// including its id, so a cycle that snapshotted the old edit never
    /// consumes the new one.
    pub fn add_pending_edit(&self, edit: &PendingEdit) -> Result<(), DatabaseError> {
        let conn = self.conn();
        upsert_pending_edit(&conn, edit)?;
        debug!(
            repository = %edit.repository_id,
            path = %edit.file_path,
            key = %edit.unit_key,
            "stored pending edit"
        );
        Ok(())
    }

    /// All pending edits of a repository, oldest first.
    pub fn list_pending_edits(&self, repository_id: &str) -> Result<Vec<PendingEdit>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, repository_id, file_path, unit_key, target, state, author, created_at,
                    reviewed_target
             FROM pending_edits WHERE repository_id = ?1 ORDER BY created_at, id",
        )?;
        let edits = stmt
            .query_map(params![repository_id], row_to_pending_edit)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edits)
    }

    pub fn count_pending_edits(&self, repository_id: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_edits WHERE repository_id = ?1",
            params![repository_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- conflicts ----------------------------------------------------------

    /// Conflicts of a repository, optionally filtered by status, newest first.
    pub fn list_conflicts(
        &self,
        repository_id: &str,
        status: Option<ConflictStatus>,
    ) -> Result<Vec<ConflictRecord>, DatabaseError> {
        let conn = self.conn();
        let records = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CONFLICT_COLUMNS} FROM conflicts
                     WHERE repository_id = ?1 AND status = ?2 ORDER BY created_at DESC"
                ))?;
                let rows = stmt
                    .query_map(params![repository_id, status.as_str()], row_to_conflict)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CONFLICT_COLUMNS} FROM conflicts
                     WHERE repository_id = ?1 ORDER BY created_at DESC"
                ))?;
                let rows = stmt
                    .query_map(params![repository_id], row_to_conflict)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(records)
    }

    /// Fetch a single conflict by ID.
    pub fn get_conflict(&self, id: &str) -> Result<Option<ConflictRecord>, DatabaseError> {
        let conn = self.conn();
        let record = conn
            .query_row(
                &format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = ?1"),
                params![id],
                row_to_conflict,
            )
            .optional()?;
        Ok(record)
    }

    /// Conflicts whose id starts with `prefix`, across repositories.
    pub fn find_conflicts_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<ConflictRecord>, DatabaseError> {
        let conn = self.conn();
        let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts
             WHERE id LIKE ?1 ESCAPE '\\' ORDER BY created_at DESC"
        ))?;
        let records = stmt
            .query_map(params![format!("{escaped}%")], row_to_conflict)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Insert a conflict, or refresh the open conflict of the same unit.
    /// Returns the id of the stored row.
    pub fn upsert_conflict(&self, record: &ConflictRecord) -> Result<String, DatabaseError> {
        let conn = self.conn();
        upsert_conflict(&conn, record)
    }

    /// Upsert several conflicts in one transaction.
    pub fn record_conflicts(&self, records: &[ConflictRecord]) -> Result<(), DatabaseError> {
        self.transaction(|conn| {
            for record in records {
                upsert_conflict(conn, record)?;
            }
            Ok(())
        })
    }

    pub fn count_open_conflicts(&self, repository_id: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conflicts WHERE repository_id = ?1 AND status = 'open'",
            params![repository_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark an open conflict resolved and apply the choice to the pending
    /// edit of its unit, atomically.
    ///
    /// Returns `false` when the conflict was not open.
    pub fn resolve_conflict(
        &self,
        record: &ConflictRecord,
        choice: &ResolutionChoice,
        resolved_by: &str,
    ) -> Result<bool, DatabaseError> {
        self.transaction(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE conflicts SET status = 'resolved', choice = ?1, resolved_by = ?2,
                 resolved_at = ?3 WHERE id = ?4 AND status = 'open'",
                params![choice.as_str(), resolved_by, now, record.id],
            )?;
            if changed == 0 {
                return Ok(false);
            }

            // The reviewer saw the upstream target; later cycles honour the
            // choice until upstream changes it again.
            let reviewed = record.remote.as_ref().map(|u| u.target.clone());
            match choice {
                ResolutionChoice::KeepLocal => {
                    // The edit may have been removed meanwhile; restore it
                    // from the conflict so the next cycle still applies it.
                    let mut edit = PendingEdit::new(
                        record.repository_id.as_str(),
                        record.file_path.as_str(),
                        record.unit_key.as_str(),
                        record.local_target.as_str(),
                        record.local_state,
                        resolved_by,
                    );
                    edit.reviewed_target = reviewed;
                    conn.execute(
                        "INSERT INTO pending_edits
                         (id, repository_id, file_path, unit_key, target, state, author, created_at,
                          reviewed_target)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                         ON CONFLICT(repository_id, file_path, unit_key) DO UPDATE SET
                         reviewed_target = excluded.reviewed_target",
                        params![
                            edit.id,
                            edit.repository_id,
                            edit.file_path,
                            edit.unit_key,
                            edit.target,
                            edit.state.as_str(),
                            edit.author,
                            edit.created_at.to_rfc3339(),
                            edit.reviewed_target,
                        ],
                    )?;
                }
                ResolutionChoice::KeepRemote => {
                    conn.execute(
                        "DELETE FROM pending_edits
                         WHERE repository_id = ?1 AND file_path = ?2 AND unit_key = ?3",
                        params![record.repository_id, record.file_path, record.unit_key],
                    )?;
                }
                ResolutionChoice::Custom(text) => {
                    let mut edit = PendingEdit::new(
                        record.repository_id.as_str(),
                        record.file_path.as_str(),
                        record.unit_key.as_str(),
                        text.as_str(),
                        UnitState::Translated,
                        resolved_by,
                    );
                    edit.reviewed_target = reviewed;
                    upsert_pending_edit(conn, &edit)?;
                }
            }
            debug!(id = %record.id, choice = choice.as_str(), "resolved conflict");
            Ok(true)
        })
    }

    // -- sync_cycles --------------------------------------------------------

    /// Record a cycle outside the success transaction (failures, busy).
    pub fn insert_sync_cycle(&self, entry: &SyncCycleEntry) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        insert_sync_cycle(&conn, entry)
    }

    /// Most recent cycles of a repository.
    pub fn list_sync_cycles(
        &self,
        repository_id: &str,
        limit: u32,
    ) -> Result<Vec<SyncCycleEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, repository_id, trigger_kind, actor, outcome, revision, details,
                    started_at, completed_at
             FROM sync_cycles WHERE repository_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![repository_id, limit], |row| {
                Ok(SyncCycleEntry {
                    id: row.get(0)?,
                    repository_id: row.get(1)?,
                    trigger: row.get(2)?,
                    actor: row.get(3)?,
                    outcome: row.get(4)?,
                    revision: row.get(5)?,
                    details: row.get(6)?,
                    started_at: row.get(7)?,
                    completed_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// The latest cycle of a repository, if any.
    pub fn last_sync_cycle(&self, repository_id: &str) -> Result<Option<SyncCycleEntry>, DatabaseError> {
        Ok(self.list_sync_cycles(repository_id, 1)?.into_iter().next())
    }

    // -- file_stats ---------------------------------------------------------

    pub fn list_file_stats(
        &self,
        repository_id: &str,
    ) -> Result<Vec<(String, TranslationStats)>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT file_path, stats_json FROM file_stats WHERE repository_id = ?1 ORDER BY file_path",
        )?;
        let rows = stmt
            .query_map(params![repository_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(path, json)| {
                let stats = serde_json::from_str(&json).map_err(|e| DatabaseError::Corrupt {
                    entity: "file_stats".into(),
                    detail: format!("{path}: {e}"),
                })?;
                Ok((path, stats))
            })
            .collect()
    }

    // -- cycle commit -------------------------------------------------------

    /// Persist the outcome of a successful cycle atomically: sync points,
    /// consumed edits, conflicts, statistics, cycle history and audit entry.
    pub fn commit_cycle(&self, commit: &CycleCommit) -> Result<(), DatabaseError> {
        self.transaction(|conn| {
            for file in &commit.files {
                upsert_sync_point(conn, &commit.repository_id, file, &commit.revision)?;
            }
            for id in &commit.consumed_edits {
                conn.execute("DELETE FROM pending_edits WHERE id = ?1", params![id])?;
            }
            for record in &commit.conflicts {
                upsert_conflict(conn, record)?;
            }
            let now = Utc::now().to_rfc3339();
            for (file, stats) in &commit.stats {
                let json = serde_json::to_string(stats).map_err(|e| DatabaseError::Corrupt {
                    entity: "file_stats".into(),
                    detail: e.to_string(),
                })?;
                conn.execute(
                    "INSERT INTO file_stats (repository_id, file_path, stats_json, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(repository_id, file_path) DO UPDATE SET
                     stats_json = excluded.stats_json, updated_at = excluded.updated_at",
                    params![commit.repository_id, file, json, now],
                )?;
            }
            insert_sync_cycle(conn, &commit.cycle)?;
            insert_audit(conn, &commit.audit)?;
            debug!(
                repository = %commit.repository_id,
                revision = %commit.revision,
                consumed = commit.consumed_edits.len(),
                conflicts = commit.conflicts.len(),
                "committed cycle state"
            );
            Ok(())
        })
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit entry from a model struct.
    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        insert_audit(&conn, entry)
    }

    /// List recent audit-log entries.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, repository_id, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    repository_id: row.get(2)?,
                    details: row.get(3)?,
                    success: row.get::<_, i64>(4)? != 0,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Count failed audit entries.
    pub fn count_errors(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE success = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- kv_state -----------------------------------------------------------

    /// Get a key-value state entry.
    pub fn get_state(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a key-value state entry (upsert).
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        debug!(key, value, "set kv_state");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers (usable inside transactions)
// ---------------------------------------------------------------------------

fn upsert_sync_point(
    conn: &Connection,
    repository_id: &str,
    file_path: &str,
    revision: &Revision,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO sync_points (repository_id, file_path, revision, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(repository_id, file_path) DO UPDATE SET
         revision = excluded.revision, updated_at = excluded.updated_at",
        params![repository_id, file_path, revision.as_str(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn upsert_pending_edit(conn: &Connection, edit: &PendingEdit) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO pending_edits
         (id, repository_id, file_path, unit_key, target, state, author, created_at, reviewed_target)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(repository_id, file_path, unit_key) DO UPDATE SET
         id = excluded.id, target = excluded.target, state = excluded.state,
         author = excluded.author, created_at = excluded.created_at,
         reviewed_target = excluded.reviewed_target",
        params![
            edit.id,
            edit.repository_id,
            edit.file_path,
            edit.unit_key,
            edit.target,
            edit.state.as_str(),
            edit.author,
            edit.created_at.to_rfc3339(),
            edit.reviewed_target,
        ],
    )?;
    Ok(())
}

fn upsert_conflict(conn: &Connection, record: &ConflictRecord) -> Result<String, DatabaseError> {
    let (remote_source, remote_target, remote_state) = match &record.remote {
        Some(unit) => (
            Some(unit.source.as_str()),
            Some(unit.target.as_str()),
            Some(unit.state.as_str()),
        ),
        None => (None, None, None),
    };

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM conflicts WHERE repository_id = ?1 AND file_path = ?2
             AND unit_key = ?3 AND status = 'open'",
            params![record.repository_id, record.file_path, record.unit_key],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        conn.execute(
            "UPDATE conflicts SET base_target = ?1, local_target = ?2, local_state = ?3,
             remote_source = ?4, remote_target = ?5, remote_state = ?6, resolution = ?7
             WHERE id = ?8",
            params![
                record.base_target,
                record.local_target,
                record.local_state.as_str(),
                remote_source,
                remote_target,
                remote_state,
                record.resolution.as_str(),
                id,
            ],
        )?;
        debug!(id = %id, key = %record.unit_key, "refreshed open conflict");
        return Ok(id);
    }

    conn.execute(
        &format!(
            "INSERT INTO conflicts ({CONFLICT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        ),
        params![
            record.id,
            record.repository_id,
            record.file_path,
            record.unit_key,
            record.base_target,
            record.local_target,
            record.local_state.as_str(),
            remote_source,
            remote_target,
            remote_state,
            record.resolution.as_str(),
            record.status.as_str(),
            record.choice,
            record.resolved_by,
            record.created_at.to_rfc3339(),
            record.resolved_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    debug!(id = %record.id, key = %record.unit_key, "inserted conflict");
    Ok(record.id.clone())
}

fn insert_sync_cycle(conn: &Connection, entry: &SyncCycleEntry) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO sync_cycles
         (repository_id, trigger_kind, actor, outcome, revision, details, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.repository_id,
            entry.trigger,
            entry.actor,
            entry.outcome,
            entry.revision,
            entry.details,
            entry.started_at,
            entry.completed_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_audit(conn: &Connection, entry: &AuditEntry) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO audit_log (action, repository_id, details, success, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.action,
            entry.repository_id,
            entry.details,
            entry.success as i64,
            entry.timestamp.to_rfc3339(),
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, action = %entry.action, "inserted audit_log entry");
    Ok(id)
}

fn row_to_pending_edit(row: &Row<'_>) -> rusqlite::Result<PendingEdit> {
    Ok(PendingEdit {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        file_path: row.get(2)?,
        unit_key: row.get(3)?,
        target: row.get(4)?,
        state: UnitState::from_str_val(&row.get::<_, String>(5)?),
        author: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        reviewed_target: row.get(8)?,
    })
}

fn row_to_conflict(row: &Row<'_>) -> rusqlite::Result<ConflictRecord> {
    let unit_key: String = row.get(3)?;
    let remote_source: Option<String> = row.get(7)?;
    let remote_target: Option<String> = row.get(8)?;
    let remote_state: Option<String> = row.get(9)?;
    let remote = remote_target.map(|target| StringUnit {
        key: unit_key.clone(),
        source: remote_source.unwrap_or_default(),
        target,
        state: remote_state
            .as_deref()
            .map(UnitState::from_str_val)
            .unwrap_or_default(),
    });

    Ok(ConflictRecord {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        file_path: row.get(2)?,
        unit_key,
        base_target: row.get(4)?,
        local_target: row.get(5)?,
        local_state: UnitState::from_str_val(&row.get::<_, String>(6)?),
        remote,
        resolution: Resolution::from_str_val(&row.get::<_, String>(10)?),
        status: ConflictStatus::from_str_val(&row.get::<_, String>(11)?),
        choice: row.get(12)?,
        resolved_by: row.get(13)?,
        created_at: parse_datetime(&row.get::<_, String>(14)?),
        resolved_at: row
            .get::<_, Option<String>>(15)?
            .as_deref()
            .map(parse_datetime),
    })
}

/// Parse an RFC 3339 timestamp, falling back to the Unix epoch.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn edit(key: &str, target: &str) -> PendingEdit {
        PendingEdit::new("web", "es.json", key, target, UnitState::Translated, "ana")
    }

    fn conflict_for(edit: &PendingEdit) -> ConflictRecord {
        let remote = StringUnit::new(edit.unit_key.as_str(), "Hello", "Buenas", UnitState::Translated);
        ConflictRecord::new(edit, None, Some(&remote), Resolution::NeedsManualReview)
    }

    fn cycle_entry(outcome: &str) -> SyncCycleEntry {
        let now = Utc::now().to_rfc3339();
        SyncCycleEntry {
            id: 0,
            repository_id: "web".into(),
            trigger: "manual".into(),
            actor: "ops".into(),
            outcome: outcome.into(),
            revision: Some("abc".into()),
            details: None,
            started_at: now.clone(),
            completed_at: now,
        }
    }

    #[test]
    fn test_sync_point_crud() {
        let db = setup_db();
        assert_eq!(db.get_sync_point("web", "es.json").unwrap(), None);
        db.set_sync_point("web", "es.json", &Revision::new("r1")).unwrap();
        db.set_sync_point("web", "es.json", &Revision::new("r2")).unwrap();
        assert_eq!(
            db.get_sync_point("web", "es.json").unwrap(),
            Some(Revision::new("r2"))
        );
        assert_eq!(db.list_sync_points("web").unwrap().len(), 1);
    }

    #[test]
    fn test_pending_edit_replaced_per_unit() {
        let db = setup_db();
        let first = edit("greeting", "Hola");
        let second = edit("greeting", "Buenas");
        db.add_pending_edit(&first).unwrap();
        db.add_pending_edit(&second).unwrap();
        db.add_pending_edit(&edit("farewell", "Adios")).unwrap();

        let edits = db.list_pending_edits("web").unwrap();
        assert_eq!(edits.len(), 2);
        let greeting = edits.iter().find(|e| e.unit_key == "greeting").unwrap();
        assert_eq!(greeting.target, "Buenas");
        assert_eq!(greeting.id, second.id);
    }

    #[test]
    fn test_conflict_upsert_refreshes_open_row() {
        let db = setup_db();
        let e = edit("greeting", "Hola");
        let first = conflict_for(&e);
        let id = db.upsert_conflict(&first).unwrap();

        let mut again = conflict_for(&e);
        again.local_target = "Hola!".into();
        assert_eq!(db.upsert_conflict(&again).unwrap(), id);

        let open = db.list_conflicts("web", Some(ConflictStatus::Open)).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].local_target, "Hola!");
        assert_eq!(open[0].remote.as_ref().unwrap().target, "Buenas");
    }

    #[test]
    fn test_find_conflicts_by_prefix() {
        let db = setup_db();
        let record = conflict_for(&edit("greeting", "Hola"));
        let id = db.upsert_conflict(&record).unwrap();

        let found = db.find_conflicts_by_prefix(&id[..8]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert!(db.find_conflicts_by_prefix("%").unwrap().is_empty());
    }

    #[test]
    fn test_resolve_keep_remote_drops_edit() {
        let db = setup_db();
        let e = edit("greeting", "Hola");
        db.add_pending_edit(&e).unwrap();
        let record = conflict_for(&e);
        db.upsert_conflict(&record).unwrap();

        assert!(db
            .resolve_conflict(&record, &ResolutionChoice::KeepRemote, "rev")
            .unwrap());
        assert!(db.list_pending_edits("web").unwrap().is_empty());
        let stored = db.get_conflict(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, ConflictStatus::Resolved);
        assert_eq!(stored.choice.as_deref(), Some("keep_remote"));

        // Second resolution is refused.
        assert!(!db
            .resolve_conflict(&record, &ResolutionChoice::KeepLocal, "rev")
            .unwrap());
    }

    #[test]
    fn test_resolve_custom_replaces_edit() {
        let db = setup_db();
        let e = edit("greeting", "Hola");
        db.add_pending_edit(&e).unwrap();
        let record = conflict_for(&e);
        db.upsert_conflict(&record).unwrap();

        db.resolve_conflict(&record, &ResolutionChoice::Custom("Saludos".into()), "rev")
            .unwrap();
        let edits = db.list_pending_edits("web").unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].target, "Saludos");
        assert_eq!(edits[0].state, UnitState::Translated);
        assert_eq!(edits[0].author, "rev");
        assert_eq!(edits[0].reviewed_target.as_deref(), Some("Buenas"));
    }

    #[test]
    fn test_resolve_keep_local_restores_missing_edit() {
        let db = setup_db();
        let e = edit("greeting", "Hola");
        let record = conflict_for(&e);
        db.upsert_conflict(&record).unwrap();

        db.resolve_conflict(&record, &ResolutionChoice::KeepLocal, "rev")
            .unwrap();
        let edits = db.list_pending_edits("web").unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].target, "Hola");
        assert_eq!(edits[0].reviewed_target.as_deref(), Some("Buenas"));
    }

    #[test]
    fn test_resolve_keep_local_marks_existing_edit() {
        let db = setup_db();
        let e = edit("greeting", "Hola");
        db.add_pending_edit(&e).unwrap();
        let record = conflict_for(&e);
        db.upsert_conflict(&record).unwrap();

        db.resolve_conflict(&record, &ResolutionChoice::KeepLocal, "rev")
            .unwrap();
        let edits = db.list_pending_edits("web").unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].id, e.id);
        assert_eq!(edits[0].author, "ana");
        assert_eq!(edits[0].reviewed_target.as_deref(), Some("Buenas"));
    }

    #[test]
    fn test_commit_cycle_is_atomic_unit() {
        let db = setup_db();
        let applied = edit("greeting", "Hola");
        let held = edit("farewell", "Adios");
        db.add_pending_edit(&applied).unwrap();
        db.add_pending_edit(&held).unwrap();

        let commit = CycleCommit {
            repository_id: "web".into(),
            revision: Revision::new("r2"),
            files: vec!["es.json".into()],
            consumed_edits: vec![applied.id.clone()],
            conflicts: vec![conflict_for(&held)],
            stats: vec![("es.json".into(), TranslationStats::default())],
            cycle: cycle_entry("done"),
            audit: AuditEntry::success("sync", Some("web"), "committed r2"),
        };
        db.commit_cycle(&commit).unwrap();

        assert_eq!(
            db.get_sync_point("web", "es.json").unwrap(),
            Some(Revision::new("r2"))
        );
        let edits = db.list_pending_edits("web").unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].unit_key, "farewell");
        assert_eq!(db.count_open_conflicts("web").unwrap(), 1);
        assert_eq!(db.list_file_stats("web").unwrap().len(), 1);
        assert_eq!(db.last_sync_cycle("web").unwrap().unwrap().outcome, "done");
        assert_eq!(db.list_audit_log(10).unwrap().len(), 1);
    }

    #[test]
    fn test_audit_log() {
        let db = setup_db();
        db.insert_audit_entry(&AuditEntry::success("sync", Some("web"), "ok"))
            .unwrap();
        db.insert_audit_entry(&AuditEntry::failure("sync", Some("web"), "push rejected"))
            .unwrap();
        let entries = db.list_audit_log(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].success);
        assert_eq!(db.count_errors().unwrap(), 1);
    }

    #[test]
    fn test_kv_state() {
        let db = setup_db();
        assert_eq!(db.get_state("foo").unwrap(), None);
        db.set_state("foo", "bar").unwrap();
        assert_eq!(db.get_state("foo").unwrap(), Some("bar".to_string()));
        db.set_state("foo", "baz").unwrap();
        assert_eq!(db.get_state("foo").unwrap(), Some("baz".to_string()));
    }
}
