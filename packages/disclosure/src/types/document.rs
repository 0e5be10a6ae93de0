//! The durable per-document record.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::structured::StructuredData;

/// Schema version written into every persisted record.
pub const DOCUMENT_SCHEMA_VERSION: u32 = 1;

/// Per-document processing status. Transitions are strictly ordered within
/// one document; see the structuring orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Queued,
    /// Classification returned `unknown`; structuring waits for an override.
    PendingClassification,
    Processing,
    ExtractingText,
    ExtractingVision,
    ExtractingTables,
    DetectingSections,
    ExtractingSectionContent,
    Structured,
    Failed,
    /// Retention deadline passed; payloads removed by the sweeper.
    Expired,
}

/// How the final page text was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Text,
    Vision,
    Hybrid,
}

/// Outcome of one structuring stage, recorded win or lose.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageOutcome {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_count: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_count: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Non-fatal per-item failures (e.g. a single vision page, a single
    /// section whose model response could not be parsed).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StageOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_page_count(mut self, count: usize) -> Self {
        self.page_count = Some(count);
        self
    }

    pub fn with_table_count(mut self, count: usize) -> Self {
        self.table_count = Some(count);
        self
    }

    pub fn with_section_count(mut self, count: usize) -> Self {
        self.section_count = Some(count);
        self
    }

    pub fn with_tokens_used(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Per-stage outcomes of the structuring pipeline, keyed by stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_extraction: Option<StageOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_extraction: Option<StageOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_extraction: Option<StageOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_detection: Option<StageOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_content: Option<StageOutcome>,
}

/// Durable record for one uploaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub schema_version: u32,

    pub document_id: String,
    pub filename: String,
    pub stored_path: PathBuf,
    pub size_bytes: u64,

    pub uploaded_at: DateTime<Utc>,
    pub retention_deadline: DateTime<Utc>,

    /// Classifier output; `unknown` when no template matched confidently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_reason: Option<String>,

    /// Manual override; takes precedence over `detected_type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_type: Option<String>,

    /// Manual overrides for the comparison profile; take precedence over the
    /// LLM-extracted company name and fiscal year.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiscal_year: Option<i32>,

    pub processing_status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_step: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<StructuredData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<ExtractionMethod>,
    #[serde(default)]
    pub extraction_metadata: ExtractionMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DocumentRecord {
    /// Generate a fresh opaque document identifier for an accepted upload.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Create a fresh record for an accepted upload.
    pub fn new(
        document_id: impl Into<String>,
        filename: impl Into<String>,
        stored_path: PathBuf,
        size_bytes: u64,
        retention_deadline: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            schema_version: DOCUMENT_SCHEMA_VERSION,
            document_id: document_id.into(),
            filename: filename.into(),
            stored_path,
            size_bytes,
            uploaded_at: now,
            retention_deadline,
            detected_type: None,
            detection_confidence: None,
            matched_keywords: Vec::new(),
            detection_reason: None,
            manual_type: None,
            company_name: None,
            fiscal_year: None,
            processing_status: ProcessingStatus::Queued,
            status_step: None,
            created_at: now,
            updated_at: now,
            structured_data: None,
            extraction_method: None,
            extraction_metadata: ExtractionMetadata::default(),
            last_error: None,
        }
    }

    /// The effective document type: manual override first, else the
    /// classifier's answer. `unknown` counts as no type.
    pub fn effective_type(&self) -> Option<&str> {
        self.manual_type
            .as_deref()
            .or(self.detected_type.as_deref())
            .filter(|t| *t != "unknown")
    }

    pub fn is_structured(&self) -> bool {
        self.processing_status == ProcessingStatus::Structured
    }

    /// Whether the retention deadline has passed relative to `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.processing_status == ProcessingStatus::Expired || self.retention_deadline <= now
    }

    /// Refresh the updated-at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(deadline_offset: Duration) -> DocumentRecord {
        DocumentRecord::new(
            "doc-1",
            "report.pdf",
            PathBuf::from("/tmp/report.pdf"),
            1024,
            Utc::now() + deadline_offset,
        )
    }

    #[test]
    fn effective_type_prefers_manual_and_ignores_unknown() {
        let mut doc = record(Duration::hours(24));
        assert_eq!(doc.effective_type(), None);

        doc.detected_type = Some("unknown".into());
        assert_eq!(doc.effective_type(), None);

        doc.detected_type = Some("securities_report".into());
        assert_eq!(doc.effective_type(), Some("securities_report"));

        doc.manual_type = Some("earnings_report".into());
        assert_eq!(doc.effective_type(), Some("earnings_report"));
    }

    #[test]
    fn generated_ids_are_opaque_and_unique() {
        let a = DocumentRecord::generate_id();
        let b = DocumentRecord::generate_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let doc = record(Duration::seconds(-1));
        assert!(doc.is_expired_at(Utc::now()));

        let doc = record(Duration::hours(1));
        assert!(!doc.is_expired_at(Utc::now()));
    }
}
