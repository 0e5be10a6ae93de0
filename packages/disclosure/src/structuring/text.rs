//! Direct text extraction with a chars-per-page quality gate.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::pdf;
use crate::types::Page;

/// Minimum average characters per page for direct extraction to count as
/// sufficient. Below this the document is likely scanned and the vision
/// fallback takes over.
pub const MIN_CHARS_PER_PAGE: usize = 50;

/// Result of direct text extraction.
#[derive(Debug, Clone)]
pub struct TextExtractionResult {
    /// Whether the quality gate passed.
    pub success: bool,
    pub pages: Vec<Page>,
    pub full_text: String,
    /// Why the gate failed, when it failed for a readable document.
    pub error: Option<String>,
}

impl TextExtractionResult {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Extracts embedded text from PDF pages.
pub struct TextExtractor {
    min_chars_per_page: usize,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor {
    pub fn new() -> Self {
        Self {
            min_chars_per_page: MIN_CHARS_PER_PAGE,
        }
    }

    /// Override the quality-gate threshold.
    pub fn with_threshold(mut self, min_chars_per_page: usize) -> Self {
        self.min_chars_per_page = min_chars_per_page;
        self
    }

    /// Extract all pages.
    ///
    /// Irrecoverable I/O or parse failures return an `Extraction` error; an
    /// empty-but-valid PDF returns `success = false` with no error.
    pub async fn extract(&self, pdf_path: &Path) -> Result<TextExtractionResult> {
        let path = pdf_path.to_path_buf();
        let pages = run_blocking(move || pdf::read_pages(&path)).await?;
        Ok(self.gate(pdf_path, pages))
    }

    /// Extract a 1-based inclusive page range.
    pub async fn extract_page_range(
        &self,
        pdf_path: &Path,
        start_page: usize,
        end_page: usize,
    ) -> Result<TextExtractionResult> {
        let path = pdf_path.to_path_buf();
        let pages =
            run_blocking(move || pdf::read_page_range(&path, start_page, end_page)).await?;
        Ok(self.gate(pdf_path, pages))
    }

    fn gate(&self, pdf_path: &Path, pages: Vec<Page>) -> TextExtractionResult {
        let full_text = join_pages(&pages);
        let total_chars: usize = pages.iter().map(|p| p.char_count).sum();
        let page_count = pages.len();

        let avg_chars = if page_count > 0 {
            total_chars as f64 / page_count as f64
        } else {
            0.0
        };
        let success = page_count > 0 && avg_chars >= self.min_chars_per_page as f64;

        if success {
            debug!(
                path = %pdf_path.display(),
                page_count,
                avg_chars,
                "text extraction sufficient"
            );
        } else {
            warn!(
                path = %pdf_path.display(),
                page_count,
                avg_chars,
                threshold = self.min_chars_per_page,
                "text extraction insufficient"
            );
        }

        let error = if !success && total_chars > 0 {
            Some("insufficient text content detected".to_string())
        } else {
            None
        };

        TextExtractionResult {
            success,
            pages,
            full_text,
            error,
        }
    }
}

/// Join page texts with newlines, in page order.
pub(crate) fn join_pages(pages: &[Page]) -> String {
    pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| crate::error::DisclosureError::Extraction(format!("worker panicked: {e}")))?
}
