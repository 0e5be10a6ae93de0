//! Per-section semantic content extraction.
//!
//! Each detected section goes to the model once, asking for the four
//! verbatim buckets. Sections run in parallel on a bounded pool; there is no
//! inter-section ordering requirement.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{DisclosureError, Result};
use crate::traits::{DisclosureModel, SectionContentRequest};
use crate::types::{ExtractedContent, StructuredData, Table};

/// Tunables for content extraction.
#[derive(Debug, Clone)]
pub struct SectionContentConfig {
    /// Concurrent section requests.
    pub max_workers: usize,
    /// Character cap for one section's prompt text.
    pub text_cap: usize,
    /// Sections shorter than this are skipped outright.
    pub min_section_chars: usize,
}

impl Default for SectionContentConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            text_cap: 10_000,
            min_section_chars: 100,
        }
    }
}

/// Extracts the four content buckets for every detected section.
pub struct SectionContentExtractor {
    model: Arc<dyn DisclosureModel>,
    config: SectionContentConfig,
}

impl SectionContentExtractor {
    pub fn new(model: Arc<dyn DisclosureModel>) -> Self {
        Self {
            model,
            config: SectionContentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SectionContentConfig) -> Self {
        self.config = config;
        self
    }

    /// Extract content for every section in `data`, attaching the results
    /// in place. Returns per-section warnings for the stage record.
    pub async fn extract_all(&self, data: &mut StructuredData) -> Result<Vec<String>> {
        if data.sections.is_empty() {
            return Ok(Vec::new());
        }

        let total = data.sections.len();
        info!(sections = total, workers = self.config.max_workers, "content extraction started");

        // Snapshot the per-section inputs first so the fan-out owns its data.
        let mut jobs = Vec::with_capacity(total);
        for (name, info) in &data.sections {
            let text = data.section_text(info);
            if text.trim().chars().count() < self.config.min_section_chars {
                debug!(section = %name, "section too short, skipped");
                continue;
            }
            let tables_summary = summarize_tables(&data.section_tables(info));
            jobs.push(SectionContentRequest {
                section_name: name.clone(),
                text: cap_head_tail(&text, self.config.text_cap),
                tables_summary,
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut futures = Vec::with_capacity(jobs.len());

        for request in jobs {
            let model = Arc::clone(&self.model);
            let semaphore = Arc::clone(&semaphore);
            futures.push(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|_| {
                    DisclosureError::Concurrency("content worker pool closed".into())
                })?;
                let name = request.section_name.clone();
                let result = model.extract_section_content(&request).await;
                Ok::<_, DisclosureError>((name, result))
            });
        }

        let mut warnings = Vec::new();
        let mut extracted = 0usize;

        for outcome in join_all(futures).await {
            let (name, result) = outcome?;
            match result {
                Ok(content) => {
                    extracted += 1;
                    if let Some(info) = data.sections.get_mut(&name) {
                        info.extracted_content = Some(content);
                    }
                }
                Err(e) => {
                    // The model already retried once; substitute empty
                    // buckets and keep the failure on record.
                    warn!(section = %name, error = %e, "content extraction failed");
                    warnings.push(format!("{name}: {e}"));
                    if let Some(info) = data.sections.get_mut(&name) {
                        info.extracted_content = Some(ExtractedContent::default());
                    }
                }
            }
        }

        info!(extracted, skipped = total - extracted, "content extraction complete");
        Ok(warnings)
    }
}

/// Cap text at `max_chars`, keeping the head and tail and eliding the middle.
pub(crate) fn cap_head_tail(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let marker = "\n\n...（中略）...\n\n";
    let head = max_chars / 2;
    let tail = max_chars - head;

    let mut capped: String = chars[..head].iter().collect();
    capped.push_str(marker);
    capped.extend(chars[chars.len() - tail..].iter());
    capped
}

/// Compact textual summary of a section's tables for the prompt.
pub(crate) fn summarize_tables(tables: &[&Table]) -> String {
    if tables.is_empty() {
        return "テーブルなし".to_string();
    }

    let mut parts = Vec::new();
    for (i, table) in tables.iter().take(10).enumerate() {
        let preview: Vec<String> = std::iter::once(table.header.join(" | "))
            .chain(table.rows.iter().take(5).map(|row| row.join(" | ")))
            .collect();

        let mut summary = format!(
            "テーブル{} (ページ{}): {}行 x {}列\n{}",
            i + 1,
            table.page_number,
            table.row_count,
            table.column_count,
            preview.join("\n")
        );
        if table.row_count > 5 {
            summary.push_str(&format!("\n  ... 他 {} 行", table.row_count - 5));
        }
        parts.push(summary);
    }

    if tables.len() > 10 {
        parts.push(format!("... 他 {} 個のテーブル", tables.len() - 10));
    }

    parts.join("\n\n")
}

/// Textual projection of a section used for embedding-based mapping:
/// the section name plus a compact rendering of its extracted content.
pub fn embedding_text(section_name: &str, content: Option<&ExtractedContent>) -> String {
    let mut parts = vec![format!("セクション名: {section_name}")];

    let Some(content) = content else {
        return parts.pop().unwrap_or_default();
    };

    if !content.financial_data.is_empty() {
        let items: Vec<&str> = content
            .financial_data
            .iter()
            .take(10)
            .map(|f| f.item.as_str())
            .collect();
        parts.push(format!("財務指標: {}", items.join(", ")));
    }

    if !content.accounting_notes.is_empty() {
        let topics: Vec<&str> = content
            .accounting_notes
            .iter()
            .take(5)
            .map(|n| n.topic.as_str())
            .collect();
        parts.push(format!("会計トピック: {}", topics.join(", ")));
    }

    if !content.factual_info.is_empty() {
        let facts: Vec<String> = content
            .factual_info
            .iter()
            .take(10)
            .map(|f| format!("{}: {}", f.category, f.item))
            .collect();
        parts.push(format!("事実情報: {}", facts.join(", ")));
    }

    if !content.messages.is_empty() {
        let kinds: Vec<&str> = content
            .messages
            .iter()
            .take(10)
            .map(|m| m.message_type.as_str())
            .collect();
        parts.push(format!("メッセージ種類: {}", kinds.join(", ")));

        let previews: Vec<String> = content
            .messages
            .iter()
            .take(3)
            .map(|m| m.content.chars().take(100).collect())
            .collect();
        parts.push(format!("メッセージ内容: {}", previews.join(" | ")));
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FactValue, FinancialFact, ScalarValue};

    #[test]
    fn cap_keeps_head_and_tail_around_a_marker() {
        let text = "あ".repeat(60) + &"ん".repeat(60);
        let capped = cap_head_tail(&text, 40);
        assert!(capped.starts_with(&"あ".repeat(20)));
        assert!(capped.ends_with(&"ん".repeat(20)));
        assert!(capped.contains("（中略）"));

        let short = "短いテキスト";
        assert_eq!(cap_head_tail(short, 100), short);
    }

    #[test]
    fn table_summary_includes_header_and_row_preview() {
        let table = Table {
            page_number: 4,
            table_index: 0,
            header: vec!["項目".into(), "金額".into()],
            rows: vec![vec!["売上高".into(), "1,200".into()]],
            records: vec![],
            row_count: 1,
            column_count: 2,
            is_numerical: true,
        };
        let summary = summarize_tables(&[&table]);
        assert!(summary.contains("テーブル1 (ページ4)"));
        assert!(summary.contains("項目 | 金額"));
        assert!(summary.contains("売上高 | 1,200"));

        assert_eq!(summarize_tables(&[]), "テーブルなし");
    }

    #[test]
    fn embedding_text_projects_content_compactly() {
        let content = ExtractedContent {
            financial_data: vec![FinancialFact {
                item: "売上高".into(),
                value: FactValue::Scalar(ScalarValue::Number(1200.0)),
                unit: Some("百万円".into()),
                period: None,
                context: None,
            }],
            ..Default::default()
        };

        let text = embedding_text("経営成績", Some(&content));
        assert!(text.contains("セクション名: 経営成績"));
        assert!(text.contains("財務指標: 売上高"));

        let bare = embedding_text("経営成績", None);
        assert_eq!(bare, "セクション名: 経営成績");
    }
}
