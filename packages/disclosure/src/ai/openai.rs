//! OpenAI-backed implementations of [`DisclosureModel`] and [`Embedder`].
//!
//! Every JSON-mode response is parsed through a total function: strip any
//! code fence the model wrapped the payload in, deserialize into an explicit
//! response struct, and retry the whole call once on failure. A second
//! failure surfaces a model error; the caller substitutes the documented
//! empty value. Parse errors never escape as panics.

use async_trait::async_trait;
use openai_client::{ChatRequest, Message, OpenAIClient};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::prompts;
use crate::config::Settings;
use crate::error::{DisclosureError, Result};
use crate::traits::{
    Classification, ClassifierOption, DisclosureModel, DocumentProfile, Embedder,
    SectionAnalysis, SectionAnalysisRequest, SectionBatchResponse, SectionContentRequest,
    SectionDetectRequest, VisionPageText,
};
use crate::types::{
    ComparisonMode, ExtractedContent, Importance, ModifiedItem, NumericalChange, TextChanges,
    Tone, ToneAnalysis,
};

/// OpenAI-backed disclosure model.
#[derive(Clone)]
pub struct OpenAiDisclosureModel {
    client: OpenAIClient,
    model: String,
}

impl OpenAiDisclosureModel {
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Build from settings; fails fast when the API key is missing.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            build_client(settings)?,
            settings.openai_model.clone(),
        ))
    }

    /// One JSON-mode chat call with a single retry on failure.
    async fn chat_json<T: DeserializeOwned>(&self, system: &str, user: &str) -> Result<T> {
        match self.chat_json_once(system, user).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_model_error() => {
                warn!(error = %err, "model call failed, retrying once");
                self.chat_json_once(system, user).await
            }
            Err(err) => Err(err),
        }
    }

    async fn chat_json_once<T: DeserializeOwned>(&self, system: &str, user: &str) -> Result<T> {
        let request = ChatRequest::new(&self.model)
            .message(Message::system(system))
            .message(Message::user(user))
            .temperature(0.1)
            .json_mode();

        let response = self.client.chat_completion(request).await?;
        parse_json_payload(&response.content)
    }
}

fn build_client(settings: &Settings) -> Result<OpenAIClient> {
    let api_key = settings.require_api_key()?;
    let mut client = OpenAIClient::new(api_key).with_timeout(settings.openai_timeout);

    if settings.uses_azure() {
        let endpoint = settings.azure_openai_endpoint.as_deref().ok_or_else(|| {
            DisclosureError::Config("AZURE_OPENAI_ENDPOINT required for azure provider".into())
        })?;
        let api_version = settings
            .azure_openai_api_version
            .as_deref()
            .unwrap_or("2024-06-01");
        client = client.with_azure(endpoint, api_version);
    }

    Ok(client)
}

/// Parse a JSON payload from a model response, tolerating code fences and
/// leading prose.
fn parse_json_payload<T: DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    // The model sometimes wraps the object in ```json fences or prose;
    // fall back to the outermost brace pair.
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            return serde_json::from_str(&trimmed[start..=end])
                .map_err(|e| DisclosureError::Model(format!("malformed JSON response: {e}")));
        }
    }

    Err(DisclosureError::Model(
        "response contained no JSON object".into(),
    ))
}

// =============================================================================
// Raw model responses (before transformation into domain types)
// =============================================================================

#[derive(Debug, Deserialize)]
struct AiProfileResponse {
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    fiscal_year: Option<i32>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct AiKeywordResponse {
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AiAnalysisResponse {
    #[serde(default)]
    text_changes: serde_json::Value,
    #[serde(default)]
    numerical_changes: Vec<NumericalChange>,
    #[serde(default)]
    tone_analysis: AiToneAnalysis,
    #[serde(default)]
    importance: Option<String>,
    #[serde(default)]
    importance_reason: String,
    #[serde(default)]
    summary: String,
}

/// Tone fields as the model reports them; the company-mode prompt uses
/// `company1_*` names, the temporal prompts use bare names.
#[derive(Debug, Default, Deserialize)]
struct AiToneAnalysis {
    #[serde(default, alias = "company1_tone")]
    tone1: Option<Tone>,
    #[serde(default, alias = "company2_tone")]
    tone2: Option<Tone>,
    #[serde(default, alias = "company1_negativity_score")]
    negativity_score1: Option<f32>,
    #[serde(default, alias = "company2_negativity_score")]
    negativity_score2: Option<f32>,
    #[serde(default, alias = "company1_detail_level")]
    detail_level1: Option<String>,
    #[serde(default, alias = "company2_detail_level")]
    detail_level2: Option<String>,
    #[serde(default, alias = "style_difference")]
    difference: Option<String>,
}

impl From<AiToneAnalysis> for ToneAnalysis {
    fn from(raw: AiToneAnalysis) -> Self {
        ToneAnalysis {
            tone1: raw.tone1,
            tone2: raw.tone2,
            negativity_score1: raw.negativity_score1,
            negativity_score2: raw.negativity_score2,
            detail_level1: raw.detail_level1,
            detail_level2: raw.detail_level2,
            difference: raw.difference,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AiConsistencyChanges {
    #[serde(default)]
    contradictions: Vec<String>,
    #[serde(default)]
    normal_differences: Vec<String>,
    #[serde(default)]
    complementary_info: Vec<String>,
    #[serde(default)]
    consistency_score: Option<u8>,
    #[serde(default)]
    consistency_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AiYearChanges {
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    removed: Vec<String>,
    #[serde(default)]
    modified: Vec<ModifiedItem>,
}

#[derive(Debug, Default, Deserialize)]
struct AiCompanyChanges {
    #[serde(default)]
    only_in_company1: Vec<String>,
    #[serde(default)]
    only_in_company2: Vec<String>,
    #[serde(default)]
    different_approaches: Vec<crate::types::ApproachDifference>,
}

/// Convert the mode-free `text_changes` object the model returns into the
/// tagged union. Unexpected shapes degrade to the mode's empty variant.
fn parse_text_changes(mode: ComparisonMode, value: serde_json::Value) -> TextChanges {
    match mode {
        ComparisonMode::ConsistencyCheck => {
            let raw: AiConsistencyChanges = serde_json::from_value(value).unwrap_or_default();
            TextChanges::Consistency {
                contradictions: raw.contradictions,
                normal_differences: raw.normal_differences,
                complementary_info: raw.complementary_info,
                consistency_score: raw.consistency_score,
                consistency_reason: raw.consistency_reason,
            }
        }
        ComparisonMode::DiffAnalysisYear => {
            let raw: AiYearChanges = serde_json::from_value(value).unwrap_or_default();
            TextChanges::Year {
                added: raw.added,
                removed: raw.removed,
                modified: raw.modified,
            }
        }
        ComparisonMode::DiffAnalysisCompany | ComparisonMode::MultiDocument => {
            let raw: AiCompanyChanges = serde_json::from_value(value).unwrap_or_default();
            TextChanges::Company {
                only_in_company1: raw.only_in_company1,
                only_in_company2: raw.only_in_company2,
                different_approaches: raw.different_approaches,
            }
        }
    }
}

fn parse_importance(raw: Option<&str>) -> Importance {
    match raw.map(str::trim) {
        Some(s) if s.eq_ignore_ascii_case("high") => Importance::High,
        Some(s) if s.eq_ignore_ascii_case("low") => Importance::Low,
        _ => Importance::Medium,
    }
}

#[async_trait]
impl DisclosureModel for OpenAiDisclosureModel {
    async fn read_page_image(
        &self,
        image_png_base64: &str,
        page_number: u32,
        carry_over: &str,
    ) -> Result<VisionPageText> {
        let user_prompt = prompts::build_vision_prompt(page_number, carry_over);
        let data_url = format!("data:image/png;base64,{image_png_base64}");

        let request = ChatRequest::new(&self.model)
            .message(Message::system(prompts::VISION_SYSTEM_PROMPT))
            .message(Message::user_with_image(user_prompt, data_url))
            .max_tokens(4096);

        let response = self.client.chat_completion(request).await?;
        let tokens_used = response.usage.map(|u| u.total_tokens as u64).unwrap_or(0);

        debug!(page_number, tokens_used, "vision page read");

        Ok(VisionPageText {
            text: response.content,
            tokens_used,
        })
    }

    async fn detect_sections(
        &self,
        request: &SectionDetectRequest,
    ) -> Result<SectionBatchResponse> {
        let prompt = prompts::build_section_detect_prompt(request);
        let response: SectionBatchResponse = self
            .chat_json(prompts::SECTION_DETECT_SYSTEM_PROMPT, &prompt)
            .await?;

        debug!(
            batch_start = request.batch_start,
            batch_end = request.batch_end,
            sections = response.sections.len(),
            "section detection batch"
        );
        Ok(response)
    }

    async fn extract_section_content(
        &self,
        request: &SectionContentRequest,
    ) -> Result<ExtractedContent> {
        let prompt = prompts::build_content_extract_prompt(
            &request.section_name,
            &request.text,
            &request.tables_summary,
        );
        self.chat_json(prompts::CONTENT_EXTRACT_SYSTEM_PROMPT, &prompt)
            .await
    }

    async fn extract_document_profile(&self, text_sample: &str) -> Result<DocumentProfile> {
        let prompt = prompts::build_profile_prompt(text_sample);
        let raw: AiProfileResponse = self
            .chat_json(prompts::PROFILE_SYSTEM_PROMPT, &prompt)
            .await?;

        Ok(DocumentProfile {
            company_name: raw.company_name.filter(|n| !n.is_empty()),
            fiscal_year: raw.fiscal_year,
            confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        })
    }

    async fn analyze_section(&self, request: &SectionAnalysisRequest) -> Result<SectionAnalysis> {
        let system = prompts::analysis_system_prompt(request.mode, &request.document_type_label);
        let prompt = prompts::build_analysis_prompt(request);
        let raw: AiAnalysisResponse = self.chat_json(&system, &prompt).await?;

        Ok(SectionAnalysis {
            text_changes: parse_text_changes(request.mode, raw.text_changes),
            numerical_changes: raw.numerical_changes,
            tone_analysis: raw.tone_analysis.into(),
            importance: parse_importance(raw.importance.as_deref()),
            importance_reason: raw.importance_reason,
            summary: raw.summary,
        })
    }

    async fn propose_search_keywords(
        &self,
        section_name: &str,
        analysis_summary: &str,
        max_keywords: usize,
    ) -> Result<Vec<String>> {
        let prompt = prompts::build_keyword_prompt(section_name, analysis_summary, max_keywords);
        let raw: AiKeywordResponse = self
            .chat_json(prompts::PROFILE_SYSTEM_PROMPT, &prompt)
            .await?;

        let mut keywords = raw.keywords;
        keywords.truncate(max_keywords);
        Ok(keywords)
    }

    async fn classify_document(
        &self,
        filename: &str,
        text_sample: &str,
        options: &[ClassifierOption],
    ) -> Result<Classification> {
        let options_json = serde_json::to_string_pretty(options)?;
        let prompt = prompts::build_classify_prompt(filename, text_sample, &options_json);
        self.chat_json(prompts::CLASSIFY_SYSTEM_PROMPT, &prompt)
            .await
    }
}

// =============================================================================
// Embeddings
// =============================================================================

/// OpenAI-backed embedder with per-call batching.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: OpenAIClient,
    model: String,
    batch_limit: usize,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            batch_limit: 100,
        }
    }

    /// Build from settings; fails fast when the API key is missing.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            build_client(settings)?,
            settings.openai_embedding_model.clone(),
        ))
    }

    /// Maximum inputs per API call.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_limit) {
            let batch = self.client.create_embeddings(chunk, &self.model).await?;
            vectors.extend(batch);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_payload_strips_fences_and_prose() {
        let fenced = "```json\n{\"keywords\": [\"a\", \"b\"]}\n```";
        let parsed: AiKeywordResponse = parse_json_payload(fenced).unwrap();
        assert_eq!(parsed.keywords, vec!["a", "b"]);

        let prose = "Here you go: {\"keywords\": []} hope that helps";
        let parsed: AiKeywordResponse = parse_json_payload(prose).unwrap();
        assert!(parsed.keywords.is_empty());

        let garbage: Result<AiKeywordResponse> = parse_json_payload("no json here");
        assert!(matches!(garbage, Err(DisclosureError::Model(_))));
    }

    #[test]
    fn text_changes_parse_by_mode_and_degrade_to_empty() {
        let value = serde_json::json!({
            "contradictions": ["売上高が一致しない"],
            "consistency_score": 2
        });
        let changes = parse_text_changes(ComparisonMode::ConsistencyCheck, value);
        assert_eq!(changes.contradictions().len(), 1);

        // A wrong-shaped payload degrades to the mode's empty variant.
        let changes =
            parse_text_changes(ComparisonMode::DiffAnalysisYear, serde_json::json!([1, 2, 3]));
        assert_eq!(changes, TextChanges::empty_for(ComparisonMode::DiffAnalysisYear));
    }

    #[test]
    fn importance_parsing_defaults_to_medium() {
        assert_eq!(parse_importance(Some("high")), Importance::High);
        assert_eq!(parse_importance(Some("LOW")), Importance::Low);
        assert_eq!(parse_importance(Some("whatever")), Importance::Medium);
        assert_eq!(parse_importance(None), Importance::Medium);
    }

    #[test]
    fn company_tone_aliases_map_to_shared_fields() {
        let raw: AiToneAnalysis = serde_json::from_value(serde_json::json!({
            "company1_tone": "negative",
            "company2_tone": "neutral",
            "company1_negativity_score": 4.0,
            "style_difference": "A社はより詳細"
        }))
        .unwrap();

        let tone: ToneAnalysis = raw.into();
        assert_eq!(tone.tone1, Some(Tone::Negative));
        assert_eq!(tone.negativity_score1, Some(4.0));
        assert_eq!(tone.difference.as_deref(), Some("A社はより詳細"));
    }
}
