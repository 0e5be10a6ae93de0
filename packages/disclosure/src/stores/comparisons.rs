//! Comparison artifacts, one JSON file per comparison id.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{write_atomic, LockRegistry};
use crate::config::Settings;
use crate::error::{DisclosureError, Result};
use crate::types::{ComparisonDescriptor, ComparisonRecord};

/// File-backed store for comparison artifacts and history.
pub struct ComparisonStore {
    base_dir: PathBuf,
    locks: LockRegistry,
}

impl ComparisonStore {
    /// Open (and create) the comparisons directory.
    pub fn new(settings: &Settings) -> Result<Self> {
        let base_dir = settings.comparisons_dir();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            locks: LockRegistry::new(),
        })
    }

    /// Open a store rooted at an explicit directory (used by tests).
    pub fn at_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            locks: LockRegistry::new(),
        })
    }

    fn path_for(&self, comparison_id: &str) -> PathBuf {
        self.base_dir.join(format!("{comparison_id}.json"))
    }

    /// Persist an artifact as a full-record rewrite.
    pub async fn save(&self, record: &ComparisonRecord) -> Result<()> {
        let _guard = self.locks.acquire(&record.comparison_id).await?;
        let path = self.path_for(&record.comparison_id);
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &bytes).await?;
        debug!(comparison_id = %record.comparison_id, "saved comparison");
        Ok(())
    }

    pub async fn load(&self, comparison_id: &str) -> Result<ComparisonRecord> {
        let path = self.path_for(comparison_id);
        let raw = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DisclosureError::NotFound(format!("comparison {comparison_id:?}"))
            } else {
                e.into()
            }
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Apply a mutation to an artifact under its lock.
    pub async fn update<F>(&self, comparison_id: &str, mutate: F) -> Result<ComparisonRecord>
    where
        F: FnOnce(&mut ComparisonRecord),
    {
        let _guard = self.locks.acquire(comparison_id).await?;
        let path = self.path_for(comparison_id);
        let raw = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DisclosureError::NotFound(format!("comparison {comparison_id:?}"))
            } else {
                DisclosureError::from(e)
            }
        })?;
        let mut record: ComparisonRecord = serde_json::from_slice(&raw)?;
        mutate(&mut record);
        let bytes = serde_json::to_vec_pretty(&record)?;
        write_atomic(&path, &bytes).await?;
        Ok(record)
    }

    /// History descriptors, newest first. Corrupt files are skipped.
    pub async fn list(&self) -> Result<Vec<ComparisonDescriptor>> {
        let mut descriptors = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<ComparisonRecord>(&raw) {
                    Ok(record) => descriptors.push(record.descriptor()),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt comparison"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable comparison"),
            }
        }

        descriptors.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(descriptors)
    }

    pub async fn delete(&self, comparison_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(comparison_id).await?;
        match tokio::fs::remove_file(self.path_for(comparison_id)).await {
            Ok(()) => {
                info!(comparison_id, "deleted comparison");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DisclosureError::NotFound(
                format!("comparison {comparison_id:?}"),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComparisonMode, DocumentInfo};
    use tempfile::TempDir;

    fn info(id: &str) -> DocumentInfo {
        DocumentInfo {
            document_id: id.into(),
            filename: format!("{id}.pdf"),
            document_type: Some("securities_report".into()),
            document_type_label: None,
            company_name: Some("株式会社テスト".into()),
            fiscal_year: Some(2024),
            extraction_confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn save_load_list_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ComparisonStore::at_dir(dir.path()).unwrap();

        let record = ComparisonRecord::new(
            "cmp-1",
            ComparisonMode::DiffAnalysisYear,
            vec![info("doc-1"), info("doc-2")],
        );
        store.save(&record).await.unwrap();

        let loaded = store.load("cmp-1").await.unwrap();
        assert_eq!(loaded.mode, ComparisonMode::DiffAnalysisYear);
        assert_eq!(loaded.document_ids, vec!["doc-1", "doc-2"]);

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].comparison_id, "cmp-1");
        assert_eq!(listed[0].filenames, vec!["doc-1.pdf", "doc-2.pdf"]);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ComparisonStore::at_dir(dir.path()).unwrap();
        assert!(matches!(
            store.load("nope").await,
            Err(DisclosureError::NotFound(_))
        ));
    }
}
