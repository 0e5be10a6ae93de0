//! Sequences the structuring stages for one document.
//!
//! Status transitions are written to the metadata store after each step and
//! mirrored to the progress reporter. Any unrecoverable failure marks the
//! document failed with the error preserved; output from stages that had
//! already succeeded is retained. Cancellation is checked between stages:
//! the current stage finishes, the next is not started, and the status stays
//! at the last-completed stage.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::content::SectionContentExtractor;
use super::sections::SectionDetector;
use super::tables::TableExtractor;
use super::text::{join_pages, TextExtractor};
use super::vision::{VisionConfig, VisionExtractor};
use crate::error::{DisclosureError, Result};
use crate::stores::{MetadataStore, ProgressKey, ProgressReporter};
use crate::templates::TemplateRegistry;
use crate::traits::DisclosureModel;
use crate::types::{
    ExtractionMetadata, ExtractionMethod, ProcessingStatus, ProgressRecord, StageOutcome,
    StructuredData,
};

/// Tunables for one structuring run.
#[derive(Debug, Clone, Default)]
pub struct StructuringConfig {
    pub vision: VisionConfig,
    pub sections: super::sections::SectionDetectConfig,
    pub content: super::content::SectionContentConfig,
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuringOutcome {
    /// The document was structured by this run.
    Structured,
    /// The document was already structured; nothing was done.
    AlreadyStructured,
    /// Classification is unknown; structuring is gated until overridden.
    PendingClassification,
}

/// Drives one document through the structuring pipeline.
pub struct StructuringOrchestrator {
    metadata: Arc<MetadataStore>,
    progress: Arc<ProgressReporter>,
    templates: Arc<TemplateRegistry>,
    model: Arc<dyn DisclosureModel>,
    config: StructuringConfig,
    cancel: CancellationToken,
}

impl StructuringOrchestrator {
    pub fn new(
        metadata: Arc<MetadataStore>,
        progress: Arc<ProgressReporter>,
        templates: Arc<TemplateRegistry>,
        model: Arc<dyn DisclosureModel>,
    ) -> Self {
        Self {
            metadata,
            progress,
            templates,
            model,
            config: StructuringConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: StructuringConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a cancellation token checked between stages.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Structure one document. Idempotent: an already-structured document
    /// returns immediately without touching its payload.
    pub async fn structure_document(&self, document_id: &str) -> Result<StructuringOutcome> {
        let record = self.metadata.load(document_id).await?;
        let progress_key = ProgressKey::Document(document_id.to_string());

        if record.is_structured() {
            info!(document_id, "already structured, skipping");
            return Ok(StructuringOutcome::AlreadyStructured);
        }

        let Some(document_type) = record.effective_type().map(str::to_string) else {
            info!(document_id, "document type unknown, gating on classification");
            self.metadata
                .update_status(document_id, ProcessingStatus::PendingClassification, None)
                .await?;
            self.progress
                .update(&progress_key, ProgressRecord::queued())
                .await?;
            return Ok(StructuringOutcome::PendingClassification);
        };

        match self
            .run_pipeline(document_id, &document_type, &progress_key)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(DisclosureError::Cancelled) => {
                // The status stays at the last-completed stage.
                info!(document_id, "structuring cancelled");
                Err(DisclosureError::Cancelled)
            }
            Err(e) => {
                warn!(document_id, error = %e, "structuring failed");
                let _ = self.metadata.mark_failed(document_id, &e.to_string()).await;
                let _ = self
                    .progress
                    .update(&progress_key, ProgressRecord::failed(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        document_id: &str,
        document_type: &str,
        progress_key: &ProgressKey,
    ) -> Result<StructuringOutcome> {
        let record = self.metadata.load(document_id).await?;
        let pdf_path = record.stored_path.clone();

        self.metadata
            .update_status(document_id, ProcessingStatus::Processing, None)
            .await?;
        self.progress
            .update(progress_key, ProgressRecord::running(5, "processing"))
            .await?;

        let mut metadata = ExtractionMetadata::default();
        let mut method = ExtractionMethod::Text;

        // Stage 1: direct text extraction.
        self.metadata
            .update_status(document_id, ProcessingStatus::ExtractingText, Some("text"))
            .await?;
        self.progress
            .update(progress_key, ProgressRecord::running(10, "extracting text"))
            .await?;

        let text_extractor = TextExtractor::new();
        let text_result = text_extractor.extract(&pdf_path).await?;
        metadata.text_extraction = Some({
            let mut outcome = if text_result.success {
                StageOutcome::ok()
            } else {
                StageOutcome {
                    success: false,
                    error: text_result.error.clone(),
                    ..Default::default()
                }
            };
            outcome.page_count = Some(text_result.page_count());
            outcome
        });

        let mut pages = text_result.pages;

        self.check_cancelled()?;

        // Stage 2: vision fallback when the quality gate failed.
        if !text_result.success {
            self.metadata
                .update_status(document_id, ProcessingStatus::ExtractingVision, Some("vision"))
                .await?;
            self.progress
                .update(progress_key, ProgressRecord::running(30, "extracting via vision"))
                .await?;

            let vision = VisionExtractor::new(Arc::clone(&self.model))
                .with_config(self.config.vision.clone());

            match vision.extract(&pdf_path).await {
                Ok(vision_result) => {
                    metadata.vision_extraction = Some(
                        StageOutcome::ok()
                            .with_page_count(vision_result.pages.len())
                            .with_tokens_used(vision_result.tokens_used)
                            .with_warnings(vision_result.page_warnings.clone()),
                    );

                    // Pages the vision model could not read fall back to
                    // whatever the text path extracted for them; only then
                    // is the result a hybrid of both extractors.
                    let mut vision_pages = vision_result.pages;
                    let mut substituted = false;
                    for vision_page in &mut vision_pages {
                        if vision_page.text.trim().is_empty() {
                            if let Some(text_page) = pages.iter().find(|p| {
                                p.page_number == vision_page.page_number
                                    && !p.text.trim().is_empty()
                            }) {
                                *vision_page = text_page.clone();
                                substituted = true;
                            }
                        }
                    }

                    method = if substituted {
                        ExtractionMethod::Hybrid
                    } else {
                        ExtractionMethod::Vision
                    };
                    pages = vision_pages;
                }
                Err(e) => {
                    // Vision failing entirely leaves the text-path pages in
                    // place; the document may still structure poorly rather
                    // than not at all.
                    warn!(document_id, error = %e, "vision extraction failed");
                    metadata.vision_extraction = Some(StageOutcome::failed(e.to_string()));
                }
            }
        }

        self.check_cancelled()?;

        // Stage 3: tables, regardless of how the text was obtained.
        self.metadata
            .update_status(document_id, ProcessingStatus::ExtractingTables, Some("tables"))
            .await?;
        self.progress
            .update(progress_key, ProgressRecord::running(50, "extracting tables"))
            .await?;

        let tables = match TableExtractor::new().extract(&pdf_path).await {
            Ok(tables) => {
                metadata.table_extraction = Some(StageOutcome::ok().with_table_count(tables.len()));
                tables
            }
            Err(e) => {
                warn!(document_id, error = %e, "table extraction failed");
                metadata.table_extraction = Some(StageOutcome::failed(e.to_string()));
                Vec::new()
            }
        };

        let mut data = StructuredData {
            full_text: join_pages(&pages),
            pages,
            tables,
            sections: Default::default(),
        };

        self.check_cancelled()?;

        // Stage 4: template-guided section detection.
        if !data.pages.is_empty() {
            self.metadata
                .update_status(document_id, ProcessingStatus::DetectingSections, Some("sections"))
                .await?;
            self.progress
                .update(progress_key, ProgressRecord::running(65, "detecting sections"))
                .await?;

            let template = self.templates.load(document_type);
            let detector = SectionDetector::new(Arc::clone(&self.model), template)
                .with_config(self.config.sections.clone());

            match detector.detect(&data.pages).await {
                Ok(sections) => {
                    metadata.section_detection =
                        Some(StageOutcome::ok().with_section_count(sections.len()));
                    data.sections = sections;
                }
                Err(e) => {
                    warn!(document_id, error = %e, "section detection failed");
                    metadata.section_detection = Some(StageOutcome::failed(e.to_string()));
                }
            }
        }

        self.check_cancelled()?;

        // Stage 5: per-section content extraction.
        if !data.sections.is_empty() {
            self.metadata
                .update_status(
                    document_id,
                    ProcessingStatus::ExtractingSectionContent,
                    Some("section content"),
                )
                .await?;
            self.progress
                .update(progress_key, ProgressRecord::running(80, "extracting section content"))
                .await?;

            let extractor = SectionContentExtractor::new(Arc::clone(&self.model))
                .with_config(self.config.content.clone());

            match extractor.extract_all(&mut data).await {
                Ok(warnings) => {
                    metadata.section_content = Some(
                        StageOutcome::ok()
                            .with_section_count(data.sections.len())
                            .with_warnings(warnings),
                    );
                }
                Err(e) => {
                    warn!(document_id, error = %e, "section content extraction failed");
                    metadata.section_content = Some(StageOutcome::failed(e.to_string()));
                }
            }
        }

        // Finalize: a structured document always carries a valid payload.
        data.validate().map_err(DisclosureError::Extraction)?;

        self.metadata
            .save_structured(document_id, data, method, metadata)
            .await?;
        self.metadata
            .update_status(document_id, ProcessingStatus::Structured, None)
            .await?;
        self.progress
            .update(progress_key, ProgressRecord::completed("structured"))
            .await?;

        info!(document_id, ?method, "document structured");
        Ok(StructuringOutcome::Structured)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DisclosureError::Cancelled);
        }
        Ok(())
    }
}
