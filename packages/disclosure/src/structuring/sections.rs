//! Template-guided section detection across batched page ranges.
//!
//! Pages go to the model in fixed-size batches on a bounded pool. Batch
//! results are keyed by batch index and stitched strictly in page order, so
//! out-of-order completion can never reorder or fragment sections.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::{DisclosureError, Result};
use crate::traits::{DetectedSection, DisclosureModel, SectionDetectRequest};
use crate::types::{DocumentTemplate, Page, SectionInfo};

/// Confidence assigned when the model omits one.
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Per-page prompt text cap.
const PAGE_TEXT_CAP: usize = 2_000;

/// Whole-batch prompt text cap.
const BATCH_TEXT_CAP: usize = 15_000;

/// Tunables for section detection.
#[derive(Debug, Clone)]
pub struct SectionDetectConfig {
    /// Pages per model request.
    pub batch_size: usize,
    /// Concurrent batch requests.
    pub max_workers: usize,
}

impl Default for SectionDetectConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_workers: 5,
        }
    }
}

/// Detects named sections in a page sequence using the document template.
pub struct SectionDetector {
    model: Arc<dyn DisclosureModel>,
    template: DocumentTemplate,
    display_name: String,
    config: SectionDetectConfig,
}

impl SectionDetector {
    pub fn new(model: Arc<dyn DisclosureModel>, template: DocumentTemplate) -> Self {
        let display_name = if template.display_name.is_empty() {
            template.document_type.clone()
        } else {
            template.display_name.clone()
        };
        Self {
            model,
            template,
            display_name,
            config: SectionDetectConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SectionDetectConfig) -> Self {
        self.config = config;
        self
    }

    /// Detect sections over the full page sequence.
    pub async fn detect(&self, pages: &[Page]) -> Result<BTreeMap<String, SectionInfo>> {
        if pages.is_empty() {
            warn!("no pages to detect sections in");
            return Ok(BTreeMap::new());
        }

        let batch_size = self.config.batch_size.max(1);
        let expected_sections = self.template.flattened_section_names();
        let section_tree = self.template.render_tree();

        info!(
            pages = pages.len(),
            batch_size,
            workers = self.config.max_workers,
            "section detection started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut batch_futures = Vec::new();

        for (batch_index, batch) in pages.chunks(batch_size).enumerate() {
            let batch_start = batch[0].page_number;
            let batch_end = batch[batch.len() - 1].page_number;

            let request = SectionDetectRequest {
                document_type_label: self.display_name.clone(),
                section_tree: section_tree.clone(),
                expected_sections: expected_sections.clone(),
                batch_text: format_batch_text(batch),
                batch_start,
                batch_end,
                // Batches run concurrently, so no prior batch result is
                // available; the stitcher fuses spanning sections instead.
                previous_context: None,
            };

            let model = Arc::clone(&self.model);
            let semaphore = Arc::clone(&semaphore);

            batch_futures.push(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|_| {
                    DisclosureError::Concurrency("section worker pool closed".into())
                })?;
                let response = model.detect_sections(&request).await;
                Ok::<_, DisclosureError>((batch_index, response))
            });
        }

        // Key results by batch index, never by completion order.
        let mut batch_results: BTreeMap<usize, Vec<DetectedSection>> = BTreeMap::new();
        for outcome in join_all(batch_futures).await {
            let (batch_index, response) = outcome?;
            match response {
                Ok(batch) => {
                    batch_results.insert(batch_index, batch.sections);
                }
                Err(e) => {
                    // A failed batch loses its pages but not the run.
                    error!(batch_index, error = %e, "section batch failed");
                }
            }
        }

        let mut sections = stitch_batches(batch_results, pages.len() as u32);
        resolve_overlaps(&mut sections);
        recompute_char_counts(&mut sections, pages);

        info!(sections = sections.len(), "section detection complete");
        Ok(sections)
    }
}

/// Page texts with explicit page markers, capped per page and per batch.
fn format_batch_text(batch: &[Page]) -> String {
    let mut formatted = String::new();
    for page in batch {
        let text: String = page.text.chars().take(PAGE_TEXT_CAP).collect();
        formatted.push_str(&format!("=== ページ {} ===\n{}\n\n", page.page_number, text));
        if formatted.chars().count() > BATCH_TEXT_CAP {
            break;
        }
    }
    if formatted.chars().count() > BATCH_TEXT_CAP {
        formatted = formatted.chars().take(BATCH_TEXT_CAP).collect();
    }
    formatted
}

/// Stitch batch results in index order. Adjacent claims of the same name
/// with contiguous page ranges fuse into one section whose confidence is the
/// minimum of the merged confidences.
fn stitch_batches(
    batch_results: BTreeMap<usize, Vec<DetectedSection>>,
    total_pages: u32,
) -> BTreeMap<String, SectionInfo> {
    let mut sections: BTreeMap<String, SectionInfo> = BTreeMap::new();

    for (_, detected) in batch_results {
        for claim in detected {
            let start = claim.start_page.clamp(1, total_pages);
            let end = claim.end_page.clamp(start, total_pages);
            let confidence = claim
                .confidence
                .unwrap_or(DEFAULT_CONFIDENCE)
                .clamp(0.0, 1.0);

            match sections.get_mut(&claim.section_name) {
                Some(existing) => {
                    // Contiguous continuation from a later batch.
                    if start <= existing.end_page + 1 && end > existing.end_page {
                        existing.end_page = end;
                        existing.confidence = existing.confidence.min(confidence);
                    } else if end > existing.end_page {
                        warn!(
                            section = %claim.section_name,
                            existing_end = existing.end_page,
                            claimed_start = start,
                            "non-contiguous re-detection ignored"
                        );
                    }
                }
                None => {
                    sections.insert(
                        claim.section_name,
                        SectionInfo {
                            start_page: start,
                            end_page: end,
                            char_count: 0,
                            confidence,
                            extracted_content: None,
                        },
                    );
                }
            }
        }
    }

    sections
}

/// Resolve overlapping page claims: the section with the earlier start wins
/// the disputed pages; the later one is truncated to begin after them and
/// dropped when nothing remains.
fn resolve_overlaps(sections: &mut BTreeMap<String, SectionInfo>) {
    let mut order: Vec<(String, u32, u32)> = sections
        .iter()
        .map(|(name, info)| (name.clone(), info.start_page, info.end_page))
        .collect();
    // Earlier start wins; ties broken by name for determinism.
    order.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut claimed_through: u32 = 0;
    for (name, start, end) in order {
        if start > claimed_through {
            claimed_through = end.max(claimed_through);
            continue;
        }

        // Disputed range [start, claimed_through]: truncate this section.
        let new_start = claimed_through + 1;
        if new_start > end {
            warn!(section = %name, "section fully shadowed by earlier sections, dropped");
            sections.remove(&name);
        } else if let Some(info) = sections.get_mut(&name) {
            info.start_page = new_start;
            claimed_through = end;
        }
    }
}

/// Character counts always come from the page records, not from the model.
fn recompute_char_counts(sections: &mut BTreeMap<String, SectionInfo>, pages: &[Page]) {
    for info in sections.values_mut() {
        info.char_count = pages
            .iter()
            .filter(|p| p.page_number >= info.start_page && p.page_number <= info.end_page)
            .map(|p| p.char_count)
            .sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(name: &str, start: u32, end: u32, confidence: Option<f32>) -> DetectedSection {
        DetectedSection {
            section_name: name.into(),
            start_page: start,
            end_page: end,
            confidence,
            is_continuing: false,
        }
    }

    fn pages(count: u32) -> Vec<Page> {
        (1..=count)
            .map(|n| Page::new(n, format!("page {n} body"), false))
            .collect()
    }

    #[test]
    fn spanning_sections_fuse_with_min_confidence() {
        let mut batches = BTreeMap::new();
        batches.insert(0, vec![claim("事業等のリスク", 8, 10, Some(0.9))]);
        batches.insert(1, vec![claim("事業等のリスク", 11, 14, Some(0.7))]);

        let sections = stitch_batches(batches, 20);
        let info = &sections["事業等のリスク"];
        assert_eq!((info.start_page, info.end_page), (8, 14));
        assert!((info.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn stitching_is_independent_of_completion_order() {
        // BTreeMap keying guarantees index order regardless of insertion order.
        let mut late_first = BTreeMap::new();
        late_first.insert(1, vec![claim("企業情報", 11, 18, Some(0.8))]);
        late_first.insert(0, vec![claim("企業情報", 2, 10, Some(0.95))]);

        let sections = stitch_batches(late_first, 20);
        let info = &sections["企業情報"];
        assert_eq!((info.start_page, info.end_page), (2, 18));
        assert!((info.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn missing_confidence_defaults() {
        let mut batches = BTreeMap::new();
        batches.insert(0, vec![claim("表紙", 1, 1, None)]);
        let sections = stitch_batches(batches, 5);
        assert!((sections["表紙"].confidence - DEFAULT_CONFIDENCE).abs() < 1e-6);
    }

    #[test]
    fn overlap_goes_to_the_earlier_start() {
        let mut batches = BTreeMap::new();
        batches.insert(
            0,
            vec![claim("企業情報", 2, 8, Some(0.9)), claim("経理の状況", 6, 12, Some(0.9))],
        );
        let mut sections = stitch_batches(batches, 20);
        resolve_overlaps(&mut sections);

        assert_eq!(sections["企業情報"].end_page, 8);
        assert_eq!(sections["経理の状況"].start_page, 9);
        assert_eq!(sections["経理の状況"].end_page, 12);
    }

    #[test]
    fn fully_shadowed_section_is_dropped() {
        let mut batches = BTreeMap::new();
        batches.insert(
            0,
            vec![claim("企業情報", 1, 10, Some(0.9)), claim("表紙", 2, 4, Some(0.5))],
        );
        let mut sections = stitch_batches(batches, 20);
        resolve_overlaps(&mut sections);

        assert!(sections.contains_key("企業情報"));
        assert!(!sections.contains_key("表紙"));
    }

    #[test]
    fn char_counts_come_from_pages() {
        let pages = pages(5);
        let mut batches = BTreeMap::new();
        batches.insert(0, vec![claim("表紙", 1, 2, Some(1.0))]);
        let mut sections = stitch_batches(batches, 5);
        recompute_char_counts(&mut sections, &pages);

        let expected: usize = pages[..2].iter().map(|p| p.char_count).sum();
        assert_eq!(sections["表紙"].char_count, expected);
    }

    #[test]
    fn page_ranges_are_clamped_to_the_document() {
        let mut batches = BTreeMap::new();
        batches.insert(0, vec![claim("経理の状況", 18, 45, Some(0.8))]);
        let sections = stitch_batches(batches, 20);
        assert_eq!(sections["経理の状況"].end_page, 20);
    }

    #[test]
    fn batch_text_carries_page_markers() {
        let text = format_batch_text(&pages(2));
        assert!(text.contains("=== ページ 1 ==="));
        assert!(text.contains("=== ページ 2 ==="));
    }
}
