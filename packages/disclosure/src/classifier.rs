//! Thin document-type classification front door.
//!
//! Keyword matching over the template registry, with an optional single
//! model call to settle ambiguous cases. Anything unconvincing lands on the
//! `unknown` sentinel, which gates structuring until an operator overrides.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::templates::TemplateRegistry;
use crate::traits::{ClassifierOption, DisclosureModel};

/// Sentinel type for documents no template matched confidently.
pub const UNKNOWN_TYPE: &str = "unknown";

/// Classifier verdict enriched with the matching evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationOutcome {
    pub document_type: String,
    pub display_name: String,
    pub confidence: f32,
    pub matched_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Classifies uploads into template document types.
pub struct DocumentClassifier {
    templates: Arc<TemplateRegistry>,
    model: Option<Arc<dyn DisclosureModel>>,
    max_prompt_chars: usize,
}

impl DocumentClassifier {
    pub fn new(
        settings: &Settings,
        templates: Arc<TemplateRegistry>,
        model: Option<Arc<dyn DisclosureModel>>,
    ) -> Self {
        let model = if settings.document_classification_use_llm {
            model
        } else {
            None
        };
        Self {
            templates,
            model,
            max_prompt_chars: settings.document_classification_max_prompt_chars,
        }
    }

    /// Classify by filename plus a text sample of the document head.
    pub async fn classify(&self, filename: &str, text_sample: &str) -> Result<ClassificationOutcome> {
        let haystack = format!("{filename} {text_sample}").to_lowercase();
        let keyword_verdict = self.classify_with_keywords(&haystack);

        let Some(model) = &self.model else {
            return Ok(keyword_verdict);
        };

        let sample: String = text_sample.chars().take(self.max_prompt_chars).collect();
        let options = self.llm_options();

        match model.classify_document(filename, &sample, &options).await {
            Ok(verdict) => {
                let document_type = if self.templates.list_types().contains(&verdict.document_type)
                {
                    verdict.document_type
                } else {
                    UNKNOWN_TYPE.to_string()
                };
                Ok(ClassificationOutcome {
                    display_name: self.display_name(&document_type),
                    document_type,
                    confidence: verdict.confidence.clamp(0.0, 1.0),
                    matched_keywords: keyword_verdict.matched_keywords,
                    reason: verdict.reason,
                })
            }
            Err(e) => {
                // The keyword verdict is a serviceable fallback.
                warn!(error = %e, "LLM classification failed, using keyword match");
                Ok(keyword_verdict)
            }
        }
    }

    fn classify_with_keywords(&self, haystack: &str) -> ClassificationOutcome {
        let mut best: Option<(String, Vec<String>, usize)> = None;

        for doc_type in self.templates.list_types() {
            let template = self.templates.load(&doc_type);
            let matched: Vec<String> = template
                .keywords_for_detection
                .iter()
                .filter(|kw| haystack.contains(&kw.to_lowercase()))
                .cloned()
                .collect();

            let total = template.keywords_for_detection.len();
            if !matched.is_empty()
                && best
                    .as_ref()
                    .map(|(_, m, _)| matched.len() > m.len())
                    .unwrap_or(true)
            {
                best = Some((doc_type, matched, total));
            }
        }

        match best {
            Some((document_type, matched, total)) => {
                let confidence = matched.len() as f32 / total.max(1) as f32;
                debug!(document_type, ?matched, "keyword classification");
                ClassificationOutcome {
                    display_name: self.display_name(&document_type),
                    document_type,
                    confidence: confidence.min(1.0),
                    matched_keywords: matched,
                    reason: None,
                }
            }
            None => ClassificationOutcome {
                document_type: UNKNOWN_TYPE.to_string(),
                display_name: self.display_name(UNKNOWN_TYPE),
                confidence: 0.0,
                matched_keywords: Vec::new(),
                reason: None,
            },
        }
    }

    fn llm_options(&self) -> Vec<ClassifierOption> {
        let mut options: Vec<ClassifierOption> = self
            .templates
            .list_types()
            .into_iter()
            .map(|doc_type| {
                let template = self.templates.load(&doc_type);
                ClassifierOption {
                    id: doc_type.clone(),
                    display_name: self.display_name(&doc_type),
                    description: template.description.clone(),
                    keywords: template
                        .keywords_for_detection
                        .iter()
                        .take(8)
                        .cloned()
                        .collect(),
                }
            })
            .collect();

        options.push(ClassifierOption {
            id: UNKNOWN_TYPE.to_string(),
            display_name: "未判定".to_string(),
            description: "どのテンプレートにも明確に該当しない場合".to_string(),
            keywords: Vec::new(),
        });

        options
    }

    fn display_name(&self, doc_type: &str) -> String {
        if doc_type == UNKNOWN_TYPE {
            return "未判定".to_string();
        }
        self.templates.display_name(doc_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentTemplate;

    fn registry() -> Arc<TemplateRegistry> {
        Arc::new(TemplateRegistry::from_templates([
            DocumentTemplate {
                document_type: "securities_report".into(),
                display_name: "有価証券報告書".into(),
                keywords_for_detection: vec!["有価証券報告書".into(), "金融商品取引法".into()],
                ..Default::default()
            },
            DocumentTemplate {
                document_type: "earnings_report".into(),
                display_name: "決算短信".into(),
                keywords_for_detection: vec!["決算短信".into()],
                ..Default::default()
            },
        ]))
    }

    fn classifier() -> DocumentClassifier {
        DocumentClassifier::new(&Settings::default(), registry(), None)
    }

    #[tokio::test]
    async fn keyword_match_picks_the_best_template() {
        let outcome = classifier()
            .classify("2024_有価証券報告書.pdf", "金融商品取引法に基づく有価証券報告書")
            .await
            .unwrap();
        assert_eq!(outcome.document_type, "securities_report");
        assert_eq!(outcome.matched_keywords.len(), 2);
        assert!((outcome.confidence - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn no_match_lands_on_unknown() {
        let outcome = classifier()
            .classify("menu.pdf", "本日のランチメニュー")
            .await
            .unwrap();
        assert_eq!(outcome.document_type, UNKNOWN_TYPE);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.display_name, "未判定");
    }
}
