//! Durable per-document records, one JSON file per identifier.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{write_atomic, LockRegistry};
use crate::config::Settings;
use crate::error::{DisclosureError, Result};
use crate::types::{
    DocumentRecord, ExtractionMetadata, ExtractionMethod, ProcessingStatus, StructuredData,
};

/// File-backed mapping from document id to [`DocumentRecord`].
pub struct MetadataStore {
    base_dir: PathBuf,
    locks: LockRegistry,
}

impl MetadataStore {
    /// Open (and create) the metadata directory.
    pub fn new(settings: &Settings) -> Result<Self> {
        let base_dir = settings.metadata_dir();
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

    fn path_for(&self, document_id: &str) -> PathBuf {
        self.base_dir.join(format!("{document_id}.json"))
    }

    /// Persist a freshly created record.
    pub async fn create(&self, record: &DocumentRecord) -> Result<()> {
        let _guard = self.locks.acquire(&record.document_id).await?;
        self.write_record(record).await?;
        debug!(document_id = %record.document_id, "created document record");
        Ok(())
    }

    /// Load a record, enforcing the retention horizon: an expired record
    /// yields a typed `RetentionExpired` failure, never stale payloads.
    pub async fn load(&self, document_id: &str) -> Result<DocumentRecord> {
        let record = self.load_any(document_id).await?;
        if record.is_expired_at(Utc::now()) {
            return Err(DisclosureError::RetentionExpired(document_id.to_string()));
        }
        Ok(record)
    }

    /// Load a record without the expiry check. Used by the retention sweeper,
    /// which must see expired records to clean them up.
    pub async fn load_any(&self, document_id: &str) -> Result<DocumentRecord> {
        let path = self.path_for(document_id);
        let raw = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DisclosureError::NotFound(format!("document {document_id:?}"))
            } else {
                e.into()
            }
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// All records, newest first. Corrupt files are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<DocumentRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<DocumentRecord>(&raw) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt record"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Apply a mutation to a record under its lock and rewrite it in full.
    pub async fn update<F>(&self, document_id: &str, mutate: F) -> Result<DocumentRecord>
    where
        F: FnOnce(&mut DocumentRecord),
    {
        let _guard = self.locks.acquire(document_id).await?;
        let mut record = self.load_any(document_id).await?;
        mutate(&mut record);
        record.touch();
        self.write_record(&record).await?;
        Ok(record)
    }

    /// Record a status transition, with an optional human-readable step.
    pub async fn update_status(
        &self,
        document_id: &str,
        status: ProcessingStatus,
        step: Option<&str>,
    ) -> Result<DocumentRecord> {
        let step = step.map(str::to_string);
        self.update(document_id, |record| {
            record.processing_status = status;
            record.status_step = step;
        })
        .await
    }

    /// Record a terminal failure, preserving the error string.
    pub async fn mark_failed(&self, document_id: &str, error: &str) -> Result<DocumentRecord> {
        let error = error.to_string();
        self.update(document_id, |record| {
            record.processing_status = ProcessingStatus::Failed;
            record.last_error = Some(error);
        })
        .await
    }

    /// Attach the structured payload produced by the pipeline.
    pub async fn save_structured(
        &self,
        document_id: &str,
        payload: StructuredData,
        method: ExtractionMethod,
        metadata: ExtractionMetadata,
    ) -> Result<DocumentRecord> {
        self.update(document_id, |record| {
            record.structured_data = Some(payload);
            record.extraction_method = Some(method);
            record.extraction_metadata = metadata;
        })
        .await
    }

    /// Documents whose retention deadline has passed at `now`, excluding
    /// records the sweeper already expired.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| {
                r.processing_status != ProcessingStatus::Expired && r.retention_deadline <= now
            })
            .map(|r| r.document_id)
            .collect())
    }

    /// Expire a record in place: delete the source PDF, drop the structured
    /// payload, and leave a tombstone so later reads fail typed.
    pub async fn expire(&self, document_id: &str) -> Result<()> {
        let record = self
            .update(document_id, |record| {
                record.structured_data = None;
                record.processing_status = ProcessingStatus::Expired;
            })
            .await?;

        if record.stored_path.exists() {
            if let Err(e) = tokio::fs::remove_file(&record.stored_path).await {
                warn!(document_id, error = %e, "failed to delete source PDF");
            }
        }

        info!(document_id, "expired document");
        Ok(())
    }

    /// Remove a record and its source PDF entirely.
    pub async fn delete(&self, document_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(document_id).await?;

        if let Ok(record) = self.load_any(document_id).await {
            if record.stored_path.exists() {
                if let Err(e) = tokio::fs::remove_file(&record.stored_path).await {
                    warn!(document_id, error = %e, "failed to delete source PDF");
                }
            }
        }

        let path = self.path_for(document_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(document_id, "deleted document record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DisclosureError::NotFound(format!("document {document_id:?}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, record: &DocumentRecord) -> Result<()> {
        let path = self.path_for(&record.document_id);
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &bytes).await
    }
}
