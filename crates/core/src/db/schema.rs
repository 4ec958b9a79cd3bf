//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `user_version`
//! pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS sync_points (
            repository_id   TEXT NOT NULL,
            file_path       TEXT NOT NULL,
            revision        TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            PRIMARY KEY (repository_id, file_path)
        );

        CREATE TABLE IF NOT EXISTS pending_edits (
            id              TEXT PRIMARY KEY,
            repository_id   TEXT NOT NULL,
            file_path       TEXT NOT NULL,
            unit_key        TEXT NOT NULL,
            target          TEXT NOT NULL,
            state           TEXT NOT NULL,
            author          TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL,
            reviewed_target TEXT,
            UNIQUE (repository_id, file_path, unit_key)
        );

        CREATE INDEX IF NOT EXISTS idx_pending_edits_repo ON pending_edits (repository_id);

        CREATE TABLE IF NOT EXISTS conflicts (
            id              TEXT PRIMARY KEY,
            repository_id   TEXT NOT NULL,
            file_path       TEXT NOT NULL,
            unit_key        TEXT NOT NULL,
            base_target     TEXT,
            local_target    TEXT NOT NULL,
            local_state     TEXT NOT NULL,
            remote_source   TEXT,
            remote_target   TEXT,
            remote_state    TEXT,
            resolution      TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'open',
            choice          TEXT,
            resolved_by     TEXT,
            created_at      TEXT NOT NULL,
            resolved_at     TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_conflicts_repo_status ON conflicts (repository_id, status);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_conflicts_open_unit
            ON conflicts (repository_id, file_path, unit_key) WHERE status = 'open';

        CREATE TABLE IF NOT EXISTS sync_cycles (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            repository_id   TEXT NOT NULL,
            trigger_kind    TEXT NOT NULL,
            actor           TEXT NOT NULL DEFAULT '',
            outcome         TEXT NOT NULL,
            revision        TEXT,
            details         TEXT,
            started_at      TEXT NOT NULL,
            completed_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sync_cycles_repo ON sync_cycles (repository_id, id);

        CREATE TABLE IF NOT EXISTS audit_log (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            action          TEXT NOT NULL,
            repository_id   TEXT,
            details         TEXT,
            success         INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);

        CREATE TABLE IF NOT EXISTS kv_state (
            key             TEXT PRIMARY KEY,
            value           TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        "#,
    ),
    (
        2,
        "per-file translation statistics",
        r#"
        CREATE TABLE IF NOT EXISTS file_stats (
            repository_id   TEXT NOT NULL,
            file_path       TEXT NOT NULL,
            stats_json      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            PRIMARY KEY (repository_id, file_path)
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        for table in [
            "sync_points",
            "pending_edits",
            "conflicts",
            "sync_cycles",
            "audit_log",
            "kv_state",
            "file_stats",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_only_one_open_conflict_per_unit() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let insert = "INSERT INTO conflicts (id, repository_id, file_path, unit_key, local_target,
                      local_state, resolution, status, created_at)
                      VALUES (?1, 'web', 'es.json', 'greeting', 'Hola', 'translated',
                      'needs_manual_review', ?2, '2026-01-01T00:00:00Z')";
        conn.execute(insert, rusqlite::params!["a", "open"]).unwrap();
        conn.execute(insert, rusqlite::params!["b", "resolved"]).unwrap();
        assert!(conn.execute(insert, rusqlite::params!["c", "open"]).is_err());
    }
}
