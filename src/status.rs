//! Run status records and the file-backed status store.

use crate::session::sanitize_test_name;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Done,
    Failed,
    Unknown,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "queued"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Done => write!(f, "done"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One line of run history: written at job start and again at completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
}

impl RunRecord {
    pub fn now(status: RunStatus) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn write(&self, test_name: &str, status: RunStatus) -> anyhow::Result<()>;
    async fn read(&self, test_name: &str) -> RunRecord;
}

/// Writes `<dir>/<test>.status.json`, one record per test, last write wins.
pub struct FileStatusStore {
    dir: PathBuf,
}

impl FileStatusStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, test_name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.status.json", sanitize_test_name(test_name)))
    }
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn write(&self, test_name: &str, status: RunStatus) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let record = RunRecord::now(status);
        let json = serde_json::to_string(&record)?;
        tokio::fs::write(self.path_for(test_name), json).await?;
        Ok(())
    }

    async fn read(&self, test_name: &str) -> RunRecord {
        match tokio::fs::read_to_string(self.path_for(test_name)).await {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|_| RunRecord {
                status: RunStatus::Unknown,
                timestamp: Utc::now(),
            }),
            Err(_) => RunRecord {
                status: RunStatus::Unknown,
                timestamp: Utc::now(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStatusStore::new(dir.path().to_path_buf());
        store.write("checkout", RunStatus::Running).await.unwrap();
        assert_eq!(store.read("checkout").await.status, RunStatus::Running);
        store.write("checkout", RunStatus::Failed).await.unwrap();
        assert_eq!(store.read("checkout").await.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn missing_record_reads_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStatusStore::new(dir.path().to_path_buf());
        assert_eq!(store.read("nope").await.status, RunStatus::Unknown);
    }
}
