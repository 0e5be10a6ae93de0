//! Synchronous pdfium wrapper: page text, raster rendering, text cells.
//!
//! Every function opens the document fresh and returns owned data, so async
//! callers can wrap calls in `tokio::task::spawn_blocking` without holding
//! non-Send pdfium handles across await points.

use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pdfium_render::prelude::*;

use crate::error::{DisclosureError, Result};
use crate::types::Page;

/// A text run extracted from a page with its bounding box, in page points
/// with a top-left origin.
#[derive(Debug, Clone)]
pub struct TextCell {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl TextCell {
    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

fn bind_pdfium() -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| DisclosureError::Extraction(format!("failed to bind pdfium: {e}")))?;
    Ok(Pdfium::new(bindings))
}

fn load_document<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>> {
    if !path.exists() {
        return Err(DisclosureError::Extraction(format!(
            "file not found: {}",
            path.display()
        )));
    }
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| DisclosureError::Extraction(format!("failed to open {}: {e}", path.display())))
}

/// Number of pages in the document.
pub fn page_count(path: &Path) -> Result<usize> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, path)?;
    Ok(document.pages().len() as usize)
}

/// Read every page's text and embedded-image flag.
pub fn read_pages(path: &Path) -> Result<Vec<Page>> {
    read_page_range(path, 1, usize::MAX)
}

/// Read a 1-based inclusive page range. `end` is clamped to the page count.
pub fn read_page_range(path: &Path, start: usize, end: usize) -> Result<Vec<Page>> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, path)?;
    let total = document.pages().len() as usize;

    if total == 0 {
        return Ok(Vec::new());
    }
    if start < 1 || start > end || start > total {
        return Err(DisclosureError::Input(format!(
            "invalid page range: {start}-{end} (total: {total})"
        )));
    }
    let end = end.min(total);

    let mut pages = Vec::with_capacity(end.saturating_sub(start) + 1);
    for (index, page) in document.pages().iter().enumerate() {
        let page_number = index + 1;
        if page_number < start || page_number > end {
            continue;
        }

        let text = page
            .text()
            .map(|t| t.all())
            .map_err(|e| DisclosureError::Extraction(format!("page {page_number} text: {e}")))?;

        let has_images = page
            .objects()
            .iter()
            .any(|object| object.object_type() == PdfPageObjectType::Image);

        pages.push(Page::new(page_number as u32, text, has_images));
    }

    Ok(pages)
}

/// Render one page (0-based index) to a base64 PNG at the given DPI.
pub fn render_page_png_base64(path: &Path, page_index: usize, dpi: f32) -> Result<String> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, path)?;

    let page = document
        .pages()
        .get(page_index as u16)
        .map_err(|e| DisclosureError::Extraction(format!("page {} missing: {e}", page_index + 1)))?;

    // PDF points are 72 per inch.
    let scale = dpi / 72.0;
    let pixel_width = (page.width().value * scale) as i32;
    let pixel_height = (page.height().value * scale) as i32;

    let bitmap = page
        .render_with_config(
            &PdfRenderConfig::new()
                .set_target_width(pixel_width)
                .set_target_height(pixel_height)
                .render_form_data(true)
                .render_annotations(true),
        )
        .map_err(|e| {
            DisclosureError::Extraction(format!("failed to render page {}: {e}", page_index + 1))
        })?;

    let image = bitmap.as_image();
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| DisclosureError::Extraction(format!("png encode failed: {e}")))?;

    Ok(BASE64.encode(buffer.into_inner()))
}

/// Extract text cells with bounding boxes for every page, for table
/// detection. Returns `(page_number, cells)` pairs in page order.
pub fn read_text_cells(path: &Path) -> Result<Vec<(u32, Vec<TextCell>)>> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, path)?;

    let mut result = Vec::new();
    for (index, page) in document.pages().iter().enumerate() {
        let page_number = index as u32 + 1;
        let page_height = page.height().value;

        let text = page
            .text()
            .map_err(|e| DisclosureError::Extraction(format!("page {page_number} text: {e}")))?;

        let mut cells = Vec::new();
        for segment in text.segments().iter() {
            let content = segment.text();
            let content = content.trim();
            if content.is_empty() {
                continue;
            }

            let bounds = segment.bounds();

            // Convert from PDF's bottom-left origin to top-left origin.
            let x = bounds.left().value;
            let y = page_height - bounds.top().value;
            let width = bounds.right().value - bounds.left().value;
            let height = bounds.top().value - bounds.bottom().value;

            cells.push(TextCell {
                text: content.to_string(),
                x,
                y,
                width,
                height,
            });
        }

        // Sort by position: top to bottom, left to right.
        cells.sort_by(|a, b| {
            a.y.partial_cmp(&b.y)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
        });

        result.push((page_number, cells));
    }

    Ok(result)
}
