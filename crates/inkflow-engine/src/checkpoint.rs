use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use inkflow_core::error::{InkflowError, Result};

use crate::context::ExecutionContext;

/// Progress of a run after its most recent completed node.
#[derive(Debug, Clone)]
pub struct RunCheckpoint {
    pub project_id: String,
    pub run_id: String,
    /// Node ids that finished, in completion order.
    pub completed: Vec<String>,
    /// Context as it stood after the last completed node.
    pub context: ExecutionContext,
    pub timestamp: DateTime<Utc>,
}

/// Persistent checkpoint store backed by SQLite.
///
/// Only the latest checkpoint per project is kept.
pub struct CheckpointStore {
    conn: Mutex<Connection>,
}

fn db_err(context: &str, e: impl std::fmt::Display) -> InkflowError {
    InkflowError::Database(format!("{}: {}", context, e))
}

impl CheckpointStore {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn =
            Connection::open(path).map_err(|e| db_err("Failed to open checkpoint store", e))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS run_checkpoints (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 project_id TEXT NOT NULL,
                 run_id TEXT NOT NULL,
                 completed_json TEXT NOT NULL,
                 context_json TEXT NOT NULL,
                 timestamp TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_rcp_project
                 ON run_checkpoints(project_id, id DESC);",
        )
        .map_err(|e| db_err("Failed to initialize checkpoint schema", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Save a checkpoint, replacing any earlier one for the project.
    pub fn save(&self, cp: &RunCheckpoint) -> Result<()> {
        let completed_json = serde_json::to_string(&cp.completed)?;
        let context_json = serde_json::to_string(&cp.context)?;
        let conn = self.conn.lock().map_err(|e| db_err("Checkpoint lock poisoned", e))?;

        conn.execute(
            "DELETE FROM run_checkpoints WHERE project_id = ?1",
            params![cp.project_id],
        )
        .map_err(|e| db_err("Failed to clean old checkpoints", e))?;

        conn.execute(
            "INSERT INTO run_checkpoints (project_id, run_id, completed_json, context_json, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cp.project_id,
                cp.run_id,
                completed_json,
                context_json,
                cp.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| db_err("Failed to save checkpoint", e))?;

        Ok(())
    }

    /// Load the latest checkpoint for a project.
    pub fn load_latest(&self, project_id: &str) -> Result<Option<RunCheckpoint>> {
        let conn = self.conn.lock().map_err(|e| db_err("Checkpoint lock poisoned", e))?;
        let row = conn
            .query_row(
                "SELECT project_id, run_id, completed_json, context_json, timestamp
                 FROM run_checkpoints
                 WHERE project_id = ?1
                 ORDER BY id DESC
                 LIMIT 1",
                params![project_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| db_err("Failed to load checkpoint", e))?;

        let Some((project_id, run_id, completed_json, context_json, ts)) = row else {
            return Ok(None);
        };
        Ok(Some(RunCheckpoint {
            project_id,
            run_id,
            completed: serde_json::from_str(&completed_json)?,
            context: serde_json::from_str(&context_json)?,
            timestamp: DateTime::parse_from_rfc3339(&ts)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    /// Delete the project's checkpoint. Returns the number of rows removed.
    pub fn delete(&self, project_id: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| db_err("Checkpoint lock poisoned", e))?;
        conn.execute(
            "DELETE FROM run_checkpoints WHERE project_id = ?1",
            params![project_id],
        )
        .map_err(|e| db_err("Failed to delete checkpoint", e))
    }
}
