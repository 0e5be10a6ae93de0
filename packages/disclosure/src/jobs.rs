//! Entry points for the external background-task runtime, plus the
//! retention sweeper.
//!
//! The job runner invokes these with crash-restart semantics: both entry
//! points are idempotent on re-entry, and the per-stage status transitions
//! plus progress records are the only resumption anchors.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::comparison::{ComparisonConfig, ComparisonOrchestrator};
use crate::config::Settings;
use crate::error::Result;
use crate::stores::{ComparisonStore, MetadataStore, ProgressKey, ProgressReporter};
use crate::structuring::{StructuringConfig, StructuringOrchestrator, StructuringOutcome};
use crate::templates::TemplateRegistry;
use crate::traits::{DisclosureModel, Embedder};
use crate::types::{ComparisonRecord, IterativeSearchMode};

/// Shared dependencies handed to every job invocation.
#[derive(Clone)]
pub struct CoreContext {
    pub settings: Settings,
    pub metadata: Arc<MetadataStore>,
    pub comparisons: Arc<ComparisonStore>,
    pub progress: Arc<ProgressReporter>,
    pub templates: Arc<TemplateRegistry>,
    pub model: Arc<dyn DisclosureModel>,
    pub embedder: Arc<dyn Embedder>,
    pub cancel: CancellationToken,
}

impl CoreContext {
    /// Wire the production components from settings. Fails fast on missing
    /// required configuration.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let model = crate::ai::OpenAiDisclosureModel::from_settings(&settings)?;
        let embedder = crate::ai::OpenAiEmbedder::from_settings(&settings)?;

        Ok(Self {
            metadata: Arc::new(MetadataStore::new(&settings)?),
            comparisons: Arc::new(ComparisonStore::new(&settings)?),
            progress: Arc::new(ProgressReporter::new(&settings)?),
            templates: Arc::new(TemplateRegistry::load_dir(&settings.templates_dir)?),
            model: Arc::new(model),
            embedder: Arc::new(embedder),
            cancel: CancellationToken::new(),
            settings,
        })
    }

    /// Assemble a context from explicit components (used by tests, which
    /// substitute mock model/embedder implementations).
    #[allow(clippy::too_many_arguments)]
    pub fn with_components(
        settings: Settings,
        metadata: Arc<MetadataStore>,
        comparisons: Arc<ComparisonStore>,
        progress: Arc<ProgressReporter>,
        templates: Arc<TemplateRegistry>,
        model: Arc<dyn DisclosureModel>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            settings,
            metadata,
            comparisons,
            progress,
            templates,
            model,
            embedder,
            cancel: CancellationToken::new(),
        }
    }
}

/// Structure one document. Idempotent: an already-structured document
/// returns immediately with its payload untouched.
pub async fn structure_document(
    ctx: &CoreContext,
    document_id: &str,
) -> Result<StructuringOutcome> {
    let orchestrator = StructuringOrchestrator::new(
        Arc::clone(&ctx.metadata),
        Arc::clone(&ctx.progress),
        Arc::clone(&ctx.templates),
        Arc::clone(&ctx.model),
    )
    .with_config(StructuringConfig::default())
    .with_cancel(ctx.cancel.clone());

    orchestrator.structure_document(document_id).await
}

/// Outcome of one document within a batch run.
#[derive(Debug, Clone)]
pub struct BatchItemOutcome {
    pub document_id: String,
    pub outcome: std::result::Result<StructuringOutcome, String>,
}

/// Structure a batch of documents sequentially, then piggyback a retention
/// sweep. One failing document never aborts the batch.
pub async fn process_documents(ctx: &CoreContext, document_ids: &[String]) -> Vec<BatchItemOutcome> {
    let mut processed = Vec::with_capacity(document_ids.len());

    for document_id in document_ids {
        let outcome = structure_document(ctx, document_id)
            .await
            .map_err(|e| e.to_string());
        if let Err(error) = &outcome {
            warn!(document_id, error, "batch item failed");
        }
        processed.push(BatchItemOutcome {
            document_id: document_id.clone(),
            outcome,
        });
    }

    if let Err(e) = sweep_once(ctx).await {
        warn!(error = %e, "post-batch cleanup failed");
    }

    processed
}

/// Run one comparison. Idempotent: a completed artifact is returned as-is.
pub async fn run_comparison(
    ctx: &CoreContext,
    comparison_id: &str,
    document_ids: &[String],
    iterative_mode: IterativeSearchMode,
) -> Result<ComparisonRecord> {
    let orchestrator = ComparisonOrchestrator::new(
        Arc::clone(&ctx.metadata),
        Arc::clone(&ctx.comparisons),
        Arc::clone(&ctx.progress),
        Arc::clone(&ctx.templates),
        Arc::clone(&ctx.model),
        Arc::clone(&ctx.embedder),
    )
    .with_config(ComparisonConfig::default())
    .with_cancel(ctx.cancel.clone());

    orchestrator
        .run_comparison(comparison_id, document_ids, iterative_mode)
        .await
}

/// Periodically expires documents past their retention deadline and prunes
/// the comparisons that referenced them.
pub struct RetentionSweeper {
    ctx: CoreContext,
    cadence: Duration,
}

impl RetentionSweeper {
    pub fn new(ctx: CoreContext) -> Self {
        Self {
            ctx,
            cadence: Duration::from_secs(3600),
        }
    }

    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    /// Run until cancelled. Spawn as a background task.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => {
                    info!("retention sweeper stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = sweep_once(&self.ctx).await {
                        error!(error = %e, "retention sweep failed");
                    }
                }
            }
        }
    }
}

/// One sweep pass. Returns the number of documents expired.
pub async fn sweep_once(ctx: &CoreContext) -> Result<usize> {
    let now = chrono::Utc::now();
    let expired = ctx.metadata.list_expired(now).await?;

    for document_id in &expired {
        if let Err(e) = ctx.metadata.expire(document_id).await {
            warn!(document_id, error = %e, "failed to expire document");
            continue;
        }
        let _ = ctx
            .progress
            .remove(&ProgressKey::Document(document_id.clone()))
            .await;
    }

    if !expired.is_empty() {
        info!(count = expired.len(), "expired documents");
    }

    prune_comparisons(ctx).await?;
    Ok(expired.len())
}

/// Delete comparisons whose inputs are all expired; for partially-expired
/// comparisons, drop the expired side's payload bodies while keeping the
/// identifiers and DocumentInfo snapshots.
async fn prune_comparisons(ctx: &CoreContext) -> Result<()> {
    let descriptors = ctx.comparisons.list().await?;

    for descriptor in descriptors {
        let record = match ctx.comparisons.load(&descriptor.comparison_id).await {
            Ok(record) => record,
            Err(_) => continue,
        };

        let mut live = Vec::with_capacity(record.document_ids.len());
        for document_id in &record.document_ids {
            live.push(ctx.metadata.load(document_id).await.is_ok());
        }

        if live.iter().all(|alive| !alive) {
            info!(comparison_id = %record.comparison_id, "all inputs expired, deleting comparison");
            let _ = ctx.comparisons.delete(&record.comparison_id).await;
            let _ = ctx
                .progress
                .remove(&ProgressKey::Comparison(record.comparison_id.clone()))
                .await;
            continue;
        }

        let expired_sides: Vec<u8> = live
            .iter()
            .enumerate()
            .filter(|(_, alive)| !**alive)
            .map(|(i, _)| i as u8 + 1)
            .collect();

        if expired_sides.is_empty() {
            continue;
        }

        ctx.comparisons
            .update(&record.comparison_id, move |record| {
                redact_expired_sides(record, &expired_sides);
            })
            .await?;
    }

    Ok(())
}

/// Remove verbatim content sourced from expired documents: text-diff deltas
/// (which interleave both sides) and re-exploration excerpts from the
/// expired side. Mappings, metrics and DocumentInfo snapshots remain.
fn redact_expired_sides(record: &mut ComparisonRecord, expired_sides: &[u8]) {
    for diff in &mut record.text_differences {
        diff.added_text.clear();
        diff.removed_text.clear();
        diff.changed_text.clear();
    }

    for section in &mut record.section_detailed_comparisons {
        if let Some(searches) = &mut section.additional_searches {
            for round in searches {
                for passage in &mut round.found_sections {
                    if expired_sides.contains(&passage.side) {
                        passage.excerpt.clear();
                    }
                }
            }
        }
    }
}
