use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use inkflow_core::error::{InkflowError, Result};
use inkflow_core::traits::ProjectStore;
use inkflow_core::types::VersionSnapshot;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS versions (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_versions_project
        ON versions(project_id);";

/// SQLite-backed project store: version history plus each project's current content.
pub struct SqliteProjectStore {
    conn: Mutex<Connection>,
}

fn db_err(e: impl std::fmt::Display) -> InkflowError {
    InkflowError::Database(e.to_string())
}

impl SqliteProjectStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                InkflowError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Project store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_timestamp(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl ProjectStore for SqliteProjectStore {
    fn append_version(
        &self,
        project_id: &str,
        snapshot: &VersionSnapshot,
    ) -> BoxFuture<'_, Result<()>> {
        let project_id = project_id.to_string();
        let snapshot = snapshot.clone();

        Box::pin(async move {
            let mut conn = self.conn.lock().map_err(db_err)?;
            let tx = conn.transaction().map_err(db_err)?;
            let timestamp = snapshot.timestamp.to_rfc3339();

            tx.execute(
                "INSERT INTO versions (id, project_id, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![snapshot.id, project_id, snapshot.content, timestamp],
            )
            .map_err(db_err)?;
            tx.execute(
                "INSERT INTO projects (id, content, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
                params![project_id, snapshot.content, timestamp],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;

            debug!(project_id = %project_id, version = %snapshot.id, "Version appended");
            Ok(())
        })
    }

    fn history(&self, project_id: &str) -> BoxFuture<'_, Result<Vec<VersionSnapshot>>> {
        let project_id = project_id.to_string();

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, content, timestamp FROM versions
                     WHERE project_id = ?1
                     ORDER BY rowid ASC",
                )
                .map_err(db_err)?;

            let rows = stmt
                .query_map(params![project_id], |row| {
                    let ts: String = row.get(2)?;
                    Ok(VersionSnapshot {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        timestamp: parse_timestamp(&ts),
                    })
                })
                .map_err(db_err)?;

            let versions = rows
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(versions)
        })
    }

    fn current_content(&self, project_id: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let project_id = project_id.to_string();

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let content = conn
                .query_row(
                    "SELECT content FROM projects WHERE id = ?1",
                    params![project_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            Ok(content)
        })
    }
}
