//! The language-model seam used by both pipelines.
//!
//! The trait exposes domain-shaped operations rather than raw prompts, so
//! orchestrators stay free of provider specifics and tests can substitute
//! canned responses. Every operation follows the same recovery contract:
//! implementations retry a malformed response once, then surface a model
//! error for the caller to substitute the documented empty value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{
    ComparisonMode, ExtractedContent, Importance, NumericalChange, TextChanges, ToneAnalysis,
};

/// Text read off one rendered page image.
#[derive(Debug, Clone, Default)]
pub struct VisionPageText {
    pub text: String,
    pub tokens_used: u64,
}

/// Tail context handed from one section-detection batch to the next.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchContext {
    /// Last section detected in the previous batch.
    pub last_section: String,
    /// Last page of the previous batch.
    pub last_page: u32,
    /// Sections still open at the end of the previous batch.
    #[serde(default)]
    pub ongoing_sections: Vec<String>,
}

/// One batch of pages submitted for section detection.
#[derive(Debug, Clone)]
pub struct SectionDetectRequest {
    pub document_type_label: String,
    /// Expected section hierarchy rendered as an indented tree.
    pub section_tree: String,
    /// Flattened expected section names, including alternatives.
    pub expected_sections: Vec<String>,
    /// Page texts with explicit page markers.
    pub batch_text: String,
    pub batch_start: u32,
    pub batch_end: u32,
    pub previous_context: Option<BatchContext>,
}

/// Sections the model recognized within one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionBatchResponse {
    #[serde(default)]
    pub sections: Vec<DetectedSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One section claim within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedSection {
    pub section_name: String,
    pub start_page: u32,
    pub end_page: u32,
    /// Defaults to 0.5 downstream when the model omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Whether the section continues past the end of the batch.
    #[serde(default)]
    pub is_continuing: bool,
}

/// One section submitted for content extraction.
#[derive(Debug, Clone)]
pub struct SectionContentRequest {
    pub section_name: String,
    /// Section text, already capped by the caller.
    pub text: String,
    /// Compact summary of the tables overlapping the section.
    pub tables_summary: String,
}

/// Company and fiscal-year profile extracted from a document head sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentProfile {
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub fiscal_year: Option<i32>,
    #[serde(default)]
    pub confidence: f32,
}

/// One side of a section pair under analysis.
#[derive(Debug, Clone)]
pub struct AnalysisSide {
    pub section_name: String,
    pub page_range: String,
    /// Compact rendering of the side's ExtractedContent, or capped raw text
    /// when no content was extracted.
    pub rendered_content: String,
}

/// A mapped section pair submitted for detailed analysis.
#[derive(Debug, Clone)]
pub struct SectionAnalysisRequest {
    pub mode: ComparisonMode,
    pub document_type_label: String,
    pub section_name: String,
    pub side1: AnalysisSide,
    pub side2: AnalysisSide,
    pub company1: Option<String>,
    pub company2: Option<String>,
    /// Passages pulled in by earlier re-exploration rounds.
    pub additional_context: Option<String>,
}

/// The model's analysis of one section pair.
#[derive(Debug, Clone)]
pub struct SectionAnalysis {
    pub text_changes: TextChanges,
    pub numerical_changes: Vec<NumericalChange>,
    pub tone_analysis: ToneAnalysis,
    pub importance: Importance,
    pub importance_reason: String,
    pub summary: String,
}

/// A candidate document type offered to the classifier.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierOption {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub keywords: Vec<String>,
}

/// Classifier verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub document_type: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Language-model operations used by the structuring pipeline, the
/// comparison engine and the classifier adapter.
#[async_trait]
pub trait DisclosureModel: Send + Sync {
    /// Read raw text off one rendered page image, preserving the original
    /// order and layout; no summarization. `carry_over` is the tail of the
    /// previous page's text, for continuity across page breaks.
    async fn read_page_image(
        &self,
        image_png_base64: &str,
        page_number: u32,
        carry_over: &str,
    ) -> Result<VisionPageText>;

    /// Detect which expected sections appear in one batch of pages.
    async fn detect_sections(&self, request: &SectionDetectRequest)
        -> Result<SectionBatchResponse>;

    /// Extract the four verbatim content buckets from one section.
    async fn extract_section_content(
        &self,
        request: &SectionContentRequest,
    ) -> Result<ExtractedContent>;

    /// Extract the company name and fiscal year from a document head sample.
    async fn extract_document_profile(&self, text_sample: &str) -> Result<DocumentProfile>;

    /// Run the mode-specific detailed analysis of one section pair.
    async fn analyze_section(&self, request: &SectionAnalysisRequest) -> Result<SectionAnalysis>;

    /// Propose up to `max_keywords` search phrases for what remains
    /// unexplained after an analysis round.
    async fn propose_search_keywords(
        &self,
        section_name: &str,
        analysis_summary: &str,
        max_keywords: usize,
    ) -> Result<Vec<String>>;

    /// Classify a document into one of the offered types.
    async fn classify_document(
        &self,
        filename: &str,
        text_sample: &str,
        options: &[ClassifierOption],
    ) -> Result<Classification>;
}
