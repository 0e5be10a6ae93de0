//! Testing utilities including mock implementations.
//!
//! Useful for exercising the pipelines without real model or embedding
//! calls. Both mocks return deterministic, configurable responses and track
//! their calls for assertions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{DisclosureError, Result};
use crate::traits::{
    Classification, ClassifierOption, DisclosureModel, DocumentProfile, Embedder, SectionAnalysis,
    SectionAnalysisRequest, SectionBatchResponse, SectionContentRequest, SectionDetectRequest,
    VisionPageText,
};
use crate::types::{ExtractedContent, Importance, TextChanges, ToneAnalysis};

/// Record of a call made to the mock model.
#[derive(Debug, Clone)]
pub enum MockModelCall {
    ReadPageImage { page_number: u32, has_carry_over: bool },
    DetectSections { batch_start: u32, batch_end: u32 },
    ExtractSectionContent { section_name: String },
    ExtractDocumentProfile { sample_len: usize },
    AnalyzeSection { section_name: String, has_additional_context: bool },
    ProposeSearchKeywords { section_name: String },
    ClassifyDocument { filename: String },
}

/// A mock [`DisclosureModel`] with canned, per-key responses.
#[derive(Default)]
pub struct MockModel {
    /// Vision text per page number.
    vision_pages: Arc<RwLock<HashMap<u32, String>>>,
    /// Section batches keyed by batch start page.
    section_batches: Arc<RwLock<HashMap<u32, SectionBatchResponse>>>,
    /// Extracted content per section name.
    contents: Arc<RwLock<HashMap<String, ExtractedContent>>>,
    /// The canned document profile.
    profile: Arc<RwLock<Option<DocumentProfile>>>,
    /// Analyses per section name.
    analyses: Arc<RwLock<HashMap<String, SectionAnalysis>>>,
    /// Keywords proposed on every request.
    keywords: Arc<RwLock<Vec<String>>>,
    /// The canned classification.
    classification: Arc<RwLock<Option<Classification>>>,
    /// Call tracking for assertions.
    calls: Arc<RwLock<Vec<MockModelCall>>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned vision text for one page.
    pub fn with_vision_page(self, page_number: u32, text: impl Into<String>) -> Self {
        self.vision_pages
            .write()
            .unwrap()
            .insert(page_number, text.into());
        self
    }

    /// Canned detection response for the batch starting at `batch_start`.
    pub fn with_section_batch(self, batch_start: u32, response: SectionBatchResponse) -> Self {
        self.section_batches
            .write()
            .unwrap()
            .insert(batch_start, response);
        self
    }

    /// Canned extracted content for one section.
    pub fn with_content(self, section: impl Into<String>, content: ExtractedContent) -> Self {
        self.contents.write().unwrap().insert(section.into(), content);
        self
    }

    /// Canned document profile.
    pub fn with_profile(self, profile: DocumentProfile) -> Self {
        *self.profile.write().unwrap() = Some(profile);
        self
    }

    /// Canned analysis for one section.
    pub fn with_analysis(self, section: impl Into<String>, analysis: SectionAnalysis) -> Self {
        self.analyses.write().unwrap().insert(section.into(), analysis);
        self
    }

    /// Keywords proposed on every re-exploration request.
    pub fn with_keywords(self, keywords: Vec<String>) -> Self {
        *self.keywords.write().unwrap() = keywords;
        self
    }

    /// Canned classification verdict.
    pub fn with_classification(self, classification: Classification) -> Self {
        *self.classification.write().unwrap() = Some(classification);
        self
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<MockModelCall> {
        self.calls.read().unwrap().clone()
    }

    /// Number of analysis calls for one section (re-exploration re-runs
    /// included).
    pub fn analysis_call_count(&self, section: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                matches!(call, MockModelCall::AnalyzeSection { section_name, .. } if section_name == section)
            })
            .count()
    }

    fn record(&self, call: MockModelCall) {
        self.calls.write().unwrap().push(call);
    }
}

#[async_trait]
impl DisclosureModel for MockModel {
    async fn read_page_image(
        &self,
        _image_png_base64: &str,
        page_number: u32,
        carry_over: &str,
    ) -> Result<VisionPageText> {
        self.record(MockModelCall::ReadPageImage {
            page_number,
            has_carry_over: !carry_over.is_empty(),
        });

        let text = self
            .vision_pages
            .read()
            .unwrap()
            .get(&page_number)
            .cloned()
            .unwrap_or_else(|| format!("ページ{page_number}のテキスト"));

        Ok(VisionPageText {
            text,
            tokens_used: 100,
        })
    }

    async fn detect_sections(
        &self,
        request: &SectionDetectRequest,
    ) -> Result<SectionBatchResponse> {
        self.record(MockModelCall::DetectSections {
            batch_start: request.batch_start,
            batch_end: request.batch_end,
        });

        Ok(self
            .section_batches
            .read()
            .unwrap()
            .get(&request.batch_start)
            .cloned()
            .unwrap_or_default())
    }

    async fn extract_section_content(
        &self,
        request: &SectionContentRequest,
    ) -> Result<ExtractedContent> {
        self.record(MockModelCall::ExtractSectionContent {
            section_name: request.section_name.clone(),
        });

        self.contents
            .read()
            .unwrap()
            .get(&request.section_name)
            .cloned()
            .ok_or_else(|| {
                DisclosureError::Model(format!(
                    "no canned content for section {:?}",
                    request.section_name
                ))
            })
    }

    async fn extract_document_profile(&self, text_sample: &str) -> Result<DocumentProfile> {
        self.record(MockModelCall::ExtractDocumentProfile {
            sample_len: text_sample.chars().count(),
        });

        Ok(self.profile.read().unwrap().clone().unwrap_or_default())
    }

    async fn analyze_section(&self, request: &SectionAnalysisRequest) -> Result<SectionAnalysis> {
        self.record(MockModelCall::AnalyzeSection {
            section_name: request.section_name.clone(),
            has_additional_context: request.additional_context.is_some(),
        });

        Ok(self
            .analyses
            .read()
            .unwrap()
            .get(&request.section_name)
            .cloned()
            .unwrap_or_else(|| neutral_analysis(request.mode)))
    }

    async fn propose_search_keywords(
        &self,
        section_name: &str,
        _analysis_summary: &str,
        max_keywords: usize,
    ) -> Result<Vec<String>> {
        self.record(MockModelCall::ProposeSearchKeywords {
            section_name: section_name.to_string(),
        });

        let mut keywords = self.keywords.read().unwrap().clone();
        keywords.truncate(max_keywords);
        Ok(keywords)
    }

    async fn classify_document(
        &self,
        filename: &str,
        _text_sample: &str,
        _options: &[ClassifierOption],
    ) -> Result<Classification> {
        self.record(MockModelCall::ClassifyDocument {
            filename: filename.to_string(),
        });

        Ok(self
            .classification
            .read()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Classification {
                document_type: "unknown".to_string(),
                confidence: 0.0,
                reason: None,
            }))
    }
}

/// A do-nothing analysis for sections no canned response was given for.
pub fn neutral_analysis(mode: crate::types::ComparisonMode) -> SectionAnalysis {
    SectionAnalysis {
        text_changes: TextChanges::empty_for(mode),
        numerical_changes: Vec::new(),
        tone_analysis: ToneAnalysis::default(),
        importance: Importance::Low,
        importance_reason: "差異なし".to_string(),
        summary: "大きな差異は検出されなかった".to_string(),
    }
}

/// A mock [`Embedder`] with canned vectors and a deterministic fallback.
pub struct MockEmbedder {
    dimension: usize,
    vectors: Arc<RwLock<HashMap<String, Vec<f32>>>>,
    calls: Arc<RwLock<usize>>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(0)),
        }
    }

    /// Canned vector for an exact input text.
    pub fn with_vector(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.write().unwrap().insert(text.into(), vector);
        self
    }

    /// Number of embed calls made.
    pub fn call_count(&self) -> usize {
        *self.calls.read().unwrap()
    }

    /// Deterministic pseudo-vector: same text, same vector.
    fn fallback_vector(&self, text: &str) -> Vec<f32> {
        let mut seed: u64 = 1469598103934665603; // FNV offset basis
        for byte in text.as_bytes() {
            seed ^= *byte as u64;
            seed = seed.wrapping_mul(1099511628211);
        }

        (0..self.dimension)
            .map(|i| {
                let x = seed.wrapping_add(i as u64).wrapping_mul(6364136223846793005);
                ((x >> 33) as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.write().unwrap() += 1;

        Ok(texts
            .iter()
            .map(|text| {
                self.vectors
                    .read()
                    .unwrap()
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| self.fallback_vector(text))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(8);
        let a = embedder.embed(&["同じテキスト".into()]).await.unwrap();
        let b = embedder.embed(&["同じテキスト".into()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);
        assert_eq!(embedder.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_model_tracks_calls() {
        let model = MockModel::new();
        let _ = model.read_page_image("AAAA", 3, "前文").await.unwrap();
        let calls = model.calls();
        assert!(matches!(
            calls[0],
            MockModelCall::ReadPageImage {
                page_number: 3,
                has_carry_over: true
            }
        ));
    }
}
