//! Vision-based fallback extraction for scanned documents.
//!
//! Pages are rendered to PNG and read by the vision model in fixed-size
//! batches. Batches run concurrently on a bounded pool; within a batch pages
//! run sequentially so each page's prompt can carry the tail of the previous
//! page's text for continuity across page breaks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::text::{join_pages, run_blocking};
use crate::error::{DisclosureError, Result};
use crate::pdf;
use crate::traits::DisclosureModel;
use crate::types::Page;

/// Characters of the previous page's tail fed into the next page's prompt.
const CARRY_OVER_CHARS: usize = 500;

/// Tunables for the vision extractor.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// DPI for page rasterization.
    pub dpi: f32,
    /// Pages per batch; carry-over context flows within a batch.
    pub batch_size: usize,
    /// Concurrent batches.
    pub max_workers: usize,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            dpi: 150.0,
            batch_size: 10,
            max_workers: 10,
        }
    }
}

/// Result of vision extraction.
#[derive(Debug, Clone)]
pub struct VisionExtractionResult {
    pub success: bool,
    pub pages: Vec<Page>,
    pub full_text: String,
    pub error: Option<String>,
    /// Cumulative model tokens across all pages.
    pub tokens_used: u64,
    /// Per-page failures that did not fail the run.
    pub page_warnings: Vec<String>,
}

/// Reads scanned pages through the vision model.
pub struct VisionExtractor {
    model: Arc<dyn DisclosureModel>,
    config: VisionConfig,
}

impl VisionExtractor {
    pub fn new(model: Arc<dyn DisclosureModel>) -> Self {
        Self {
            model,
            config: VisionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: VisionConfig) -> Self {
        self.config = config;
        self
    }

    /// Extract every page of the document.
    pub async fn extract(&self, pdf_path: &Path) -> Result<VisionExtractionResult> {
        let path = pdf_path.to_path_buf();
        let total = run_blocking(move || pdf::page_count(&path)).await?;
        self.extract_indices(pdf_path, (0..total).collect()).await
    }

    /// Extract a 1-based inclusive page range.
    pub async fn extract_page_range(
        &self,
        pdf_path: &Path,
        start_page: usize,
        end_page: usize,
    ) -> Result<VisionExtractionResult> {
        let path = pdf_path.to_path_buf();
        let total = run_blocking(move || pdf::page_count(&path)).await?;

        if start_page < 1 || end_page > total || start_page > end_page {
            return Err(DisclosureError::Input(format!(
                "invalid page range: {start_page}-{end_page} (total: {total})"
            )));
        }

        self.extract_indices(pdf_path, (start_page - 1..end_page).collect())
            .await
    }

    async fn extract_indices(
        &self,
        pdf_path: &Path,
        page_indices: Vec<usize>,
    ) -> Result<VisionExtractionResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let batch_size = self.config.batch_size.max(1);

        let mut batch_futures = Vec::new();
        for batch in page_indices.chunks(batch_size) {
            let batch: Vec<usize> = batch.to_vec();
            let semaphore = Arc::clone(&semaphore);
            let model = Arc::clone(&self.model);
            let path = pdf_path.to_path_buf();
            let dpi = self.config.dpi;

            info!(
                path = %path.display(),
                first_page = batch[0] + 1,
                last_page = batch[batch.len() - 1] + 1,
                "vision batch queued"
            );

            batch_futures.push(async move {
                // The permit bounds how many batches hold a model slot at once.
                let _permit = semaphore.acquire_owned().await.map_err(|_| {
                    DisclosureError::Concurrency("vision worker pool closed".into())
                })?;
                process_batch(&*model, &path, &batch, dpi).await
            });
        }

        let mut pages = Vec::new();
        let mut tokens_used = 0u64;
        let mut page_warnings = Vec::new();

        // Batches complete in arbitrary order; page order is restored below.
        for outcome in join_all(batch_futures).await {
            let batch_result = outcome?;
            tokens_used += batch_result.tokens_used;
            page_warnings.extend(batch_result.warnings);
            pages.extend(batch_result.pages);
        }

        pages.sort_by_key(|p| p.page_number);
        let full_text = join_pages(&pages);

        Ok(VisionExtractionResult {
            success: !pages.is_empty(),
            full_text,
            pages,
            error: None,
            tokens_used,
            page_warnings,
        })
    }
}

struct BatchResult {
    pages: Vec<Page>,
    tokens_used: u64,
    warnings: Vec<String>,
}

/// Process one batch sequentially, threading carry-over context page to page.
async fn process_batch(
    model: &dyn DisclosureModel,
    pdf_path: &Path,
    page_indices: &[usize],
    dpi: f32,
) -> Result<BatchResult> {
    let mut pages = Vec::with_capacity(page_indices.len());
    let mut tokens_used = 0u64;
    let mut warnings = Vec::new();
    let mut carry_over = String::new();

    for &index in page_indices {
        let page_number = index as u32 + 1;

        match read_one_page(model, pdf_path, index, dpi, &carry_over).await {
            Ok(read) => {
                tokens_used += read.tokens_used;
                carry_over = tail_chars(&read.text, CARRY_OVER_CHARS);
                pages.push(Page::new(page_number, read.text, true));
            }
            Err(e) => {
                // A single failed page never fails the batch; the page is
                // recorded empty and the failure is surfaced as a warning.
                warn!(page_number, error = %e, "vision page failed");
                warnings.push(format!("page {page_number}: {e}"));
                carry_over.clear();
                pages.push(Page::new(page_number, String::new(), true));
            }
        }
    }

    Ok(BatchResult {
        pages,
        tokens_used,
        warnings,
    })
}

async fn read_one_page(
    model: &dyn DisclosureModel,
    pdf_path: &Path,
    page_index: usize,
    dpi: f32,
    carry_over: &str,
) -> Result<crate::traits::VisionPageText> {
    let path: PathBuf = pdf_path.to_path_buf();
    let image = run_blocking(move || pdf::render_page_png_base64(&path, page_index, dpi)).await?;
    model
        .read_page_image(&image, page_index as u32 + 1, carry_over)
        .await
}

/// The last `max_chars` characters of `text`, on a char boundary.
fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_chars_respects_multibyte_boundaries() {
        let text = "あいうえお";
        assert_eq!(tail_chars(text, 2), "えお");
        assert_eq!(tail_chars(text, 10), "あいうえお");
        assert_eq!(tail_chars("", 5), "");
    }
}
