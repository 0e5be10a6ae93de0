//! Unified progress surface consumed by the polling status API.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{write_atomic, LockRegistry};
use crate::config::Settings;
use crate::error::Result;
use crate::types::{ProgressRecord, ProgressStatus};

/// Key addressing one tracked operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressKey {
    Document(String),
    Comparison(String),
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressKey::Document(id) => write!(f, "document:{id}"),
            ProgressKey::Comparison(id) => write!(f, "comparison:{id}"),
        }
    }
}

impl ProgressKey {
    fn file_name(&self) -> String {
        match self {
            ProgressKey::Document(id) => format!("document_{id}.json"),
            ProgressKey::Comparison(id) => format!("comparison_{id}.json"),
        }
    }
}

/// File-backed keyed store of [`ProgressRecord`]s.
///
/// Updates are last-writer-wins, with two guards: `status` never regresses,
/// and `progress` never decreases unless the status moves to failed.
pub struct ProgressReporter {
    base_dir: PathBuf,
    locks: LockRegistry,
}

impl ProgressReporter {
    /// Open (and create) the progress directory.
    pub fn new(settings: &Settings) -> Result<Self> {
        let base_dir = settings.progress_dir();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            locks: LockRegistry::new(),
        })
    }

    /// Open a reporter rooted at an explicit directory (used by tests).
    pub fn at_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            locks: LockRegistry::new(),
        })
    }

    fn path_for(&self, key: &ProgressKey) -> PathBuf {
        self.base_dir.join(key.file_name())
    }

    /// Record a progress update, applying the monotonicity guards.
    pub async fn update(&self, key: &ProgressKey, record: ProgressRecord) -> Result<()> {
        let lock_key = key.to_string();
        let _guard = self.locks.acquire(&lock_key).await?;

        let merged = match self.read(key).await? {
            Some(existing) => merge(existing, record),
            None => record,
        };

        let path = self.path_for(key);
        let bytes = serde_json::to_vec_pretty(&merged)?;
        write_atomic(&path, &bytes).await?;
        debug!(key = %key, progress = merged.progress, status = ?merged.status, "progress update");
        Ok(())
    }

    /// Current progress for `key`, if any was ever recorded.
    pub async fn get(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>> {
        self.read(key).await
    }

    /// Remove the record for `key` (used when its subject is deleted).
    pub async fn remove(&self, key: &ProgressKey) -> Result<()> {
        let lock_key = key.to_string();
        let _guard = self.locks.acquire(&lock_key).await?;
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Merge an incoming record over the stored one under the monotonicity rules.
fn merge(existing: ProgressRecord, incoming: ProgressRecord) -> ProgressRecord {
    // A stale writer may not pull the status backwards.
    if incoming.status.rank() < existing.status.rank() {
        return existing;
    }

    let mut merged = incoming;
    if merged.status != ProgressStatus::Failed {
        merged.progress = merged.progress.max(existing.progress);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn reporter() -> (TempDir, ProgressReporter) {
        let dir = TempDir::new().unwrap();
        let reporter = ProgressReporter::at_dir(dir.path()).unwrap();
        (dir, reporter)
    }

    #[tokio::test]
    async fn progress_never_decreases_while_running() {
        let (_dir, reporter) = reporter().await;
        let key = ProgressKey::Document("doc-1".into());

        reporter.update(&key, ProgressRecord::running(60, "sections")).await.unwrap();
        reporter.update(&key, ProgressRecord::running(40, "late writer")).await.unwrap();

        let record = reporter.get(&key).await.unwrap().unwrap();
        assert_eq!(record.progress, 60);
        // The step text itself is last-writer-wins.
        assert_eq!(record.step, "late writer");
    }

    #[tokio::test]
    async fn status_never_regresses() {
        let (_dir, reporter) = reporter().await;
        let key = ProgressKey::Comparison("cmp-1".into());

        reporter.update(&key, ProgressRecord::completed("done")).await.unwrap();
        reporter.update(&key, ProgressRecord::running(10, "stale")).await.unwrap();

        let record = reporter.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, ProgressStatus::Completed);
        assert_eq!(record.progress, 100);
    }

    #[tokio::test]
    async fn failure_may_drop_progress() {
        let (_dir, reporter) = reporter().await;
        let key = ProgressKey::Document("doc-1".into());

        reporter.update(&key, ProgressRecord::running(80, "almost")).await.unwrap();
        reporter.update(&key, ProgressRecord::failed("corrupt PDF")).await.unwrap();

        let record = reporter.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, ProgressStatus::Failed);
        assert_eq!(record.progress, 0);
        assert_eq!(record.error.as_deref(), Some("corrupt PDF"));
    }

    #[tokio::test]
    async fn document_and_comparison_keys_do_not_collide() {
        let (_dir, reporter) = reporter().await;
        let doc = ProgressKey::Document("x".into());
        let cmp = ProgressKey::Comparison("x".into());

        reporter.update(&doc, ProgressRecord::running(10, "doc")).await.unwrap();
        reporter.update(&cmp, ProgressRecord::running(90, "cmp")).await.unwrap();

        assert_eq!(reporter.get(&doc).await.unwrap().unwrap().progress, 10);
        assert_eq!(reporter.get(&cmp).await.unwrap().unwrap().progress, 90);
    }
}
