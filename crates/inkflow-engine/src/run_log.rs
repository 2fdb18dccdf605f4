use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use inkflow_core::types::ProgressEvent;

/// JSONL run logger.
///
/// Consumes the progress stream and writes one JSON object per line to
/// `{log_dir}/{project_id}/{timestamp}.jsonl`, flushing after every line so a
/// crashed run still leaves a readable log.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    project_id: &'a str,
    #[serde(flatten)]
    event: &'a ProgressEvent,
}

impl RunLogger {
    /// `level` controls verbosity: 1=run outcome, 2=steps, 3=warnings and chapters.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Write events until the run ends, the channel closes, or `cancel` fires.
    ///
    /// Returns the log file path, or `None` when the file could not be opened.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<ProgressEvent>,
        project_id: String,
        cancel: CancellationToken,
    ) -> Option<PathBuf> {
        let project_dir = self.log_dir.join(&project_id);
        if let Err(e) = tokio::fs::create_dir_all(&project_dir).await {
            error!(error = %e, "Failed to create log directory");
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = project_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return None;
            }
        };

        info!(path = %log_path.display(), "Run log started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Run log cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if self.accepts(&event) {
                                let entry = LogEntry {
                                    timestamp: Utc::now().to_rfc3339(),
                                    project_id: &project_id,
                                    event: &event,
                                };
                                if let Ok(json) = serde_json::to_string(&entry) {
                                    if let Err(e) = writer.write_all(format!("{}\n", json).as_bytes()).await {
                                        error!(error = %e, "Failed to write log entry");
                                        break;
                                    }
                                    if let Err(e) = writer.flush().await {
                                        error!(error = %e, "Failed to flush log");
                                    }
                                }
                            }
                            if event.is_terminal() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "Run log lagged, skipped events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("Event bus closed, run log stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "Run log finished");
        Some(log_path)
    }

    fn accepts(&self, event: &ProgressEvent) -> bool {
        let required = match event {
            ProgressEvent::RunCompleted { .. } | ProgressEvent::RunFailed { .. } => 1,
            ProgressEvent::StepStarted { .. }
            | ProgressEvent::StepCompleted { .. }
            | ProgressEvent::StepFailed { .. }
            | ProgressEvent::StepSkipped { .. } => 2,
            ProgressEvent::Warning { .. } | ProgressEvent::ChapterCompleted { .. } => 3,
        };
        self.level >= required
    }
}
