//! Mode selection and the per-comparison orchestration.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::iterative::{explore_section, IterativeConfig};
use super::{mapping, numeric, textdiff};
use crate::error::{DisclosureError, Result};
use crate::stores::{ComparisonStore, MetadataStore, ProgressKey, ProgressReporter};
use crate::templates::TemplateRegistry;
use crate::traits::{
    AnalysisSide, DisclosureModel, Embedder, SectionAnalysis, SectionAnalysisRequest,
};
use crate::types::{
    ComparisonMode, ComparisonRecord, DocumentInfo, DocumentRecord, Importance,
    IterativeSearchMode, ProgressRecord, SectionDetailedComparison, SectionMapping,
    StructuredData, TextChanges,
};

/// Characters of structured text sampled for profile extraction.
const PROFILE_SAMPLE_CHARS: usize = 4_000;

/// Raw-text cap per side when a section has no extracted content.
const RAW_TEXT_CAP: usize = 3_000;

/// Tunables for one comparison run.
#[derive(Debug, Clone)]
pub struct ComparisonConfig {
    /// Concurrent per-section analyses.
    pub max_workers: usize,
    pub iterative: IterativeConfig,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            iterative: IterativeConfig::default(),
        }
    }
}

/// Deterministic mode selection over the document profiles.
pub fn select_mode(infos: &[DocumentInfo]) -> ComparisonMode {
    if infos.len() > 2 {
        return ComparisonMode::MultiDocument;
    }
    let [doc1, doc2] = infos else {
        return ComparisonMode::DiffAnalysisCompany;
    };

    let same_company = doc1.company_name.is_some() && doc1.company_name == doc2.company_name;
    let same_type = doc1.document_type.is_some() && doc1.document_type == doc2.document_type;
    let same_year = doc1.fiscal_year.is_some() && doc1.fiscal_year == doc2.fiscal_year;

    if same_company && !same_type {
        ComparisonMode::ConsistencyCheck
    } else if same_company && same_type && !same_year {
        ComparisonMode::DiffAnalysisYear
    } else {
        // Different companies with the same type, and every remaining
        // combination, fall through to the cross-company diff.
        ComparisonMode::DiffAnalysisCompany
    }
}

/// Drives one comparison: mode selection, mapping, per-section analysis,
/// optional re-exploration, persistence.
pub struct ComparisonOrchestrator {
    metadata: Arc<MetadataStore>,
    comparisons: Arc<ComparisonStore>,
    progress: Arc<ProgressReporter>,
    templates: Arc<TemplateRegistry>,
    model: Arc<dyn DisclosureModel>,
    embedder: Arc<dyn Embedder>,
    config: ComparisonConfig,
    cancel: CancellationToken,
}

impl ComparisonOrchestrator {
    pub fn new(
        metadata: Arc<MetadataStore>,
        comparisons: Arc<ComparisonStore>,
        progress: Arc<ProgressReporter>,
        templates: Arc<TemplateRegistry>,
        model: Arc<dyn DisclosureModel>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            metadata,
            comparisons,
            progress,
            templates,
            model,
            embedder,
            config: ComparisonConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: ComparisonConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a cancellation token checked between stages and batches.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one comparison. Idempotent: an already-completed artifact is
    /// returned as-is, and a crashed run re-enters without duplicating the
    /// per-section analyses that were already persisted.
    pub async fn run_comparison(
        &self,
        comparison_id: &str,
        document_ids: &[String],
        iterative_mode: IterativeSearchMode,
    ) -> Result<ComparisonRecord> {
        let progress_key = ProgressKey::Comparison(comparison_id.to_string());

        if let Ok(existing) = self.comparisons.load(comparison_id).await {
            if existing.progress.status == crate::types::ProgressStatus::Completed {
                info!(comparison_id, "comparison already completed, returning artifact");
                return Ok(existing);
            }
        }

        match self
            .run_inner(comparison_id, document_ids, iterative_mode, &progress_key)
            .await
        {
            Ok(record) => Ok(record),
            Err(DisclosureError::Cancelled) => Err(DisclosureError::Cancelled),
            Err(e) => {
                warn!(comparison_id, error = %e, "comparison failed");
                let _ = self
                    .progress
                    .update(&progress_key, ProgressRecord::failed(e.to_string()))
                    .await;
                let _ = self
                    .comparisons
                    .update(comparison_id, |record| {
                        record.progress = ProgressRecord::failed(e.to_string());
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        comparison_id: &str,
        document_ids: &[String],
        iterative_mode: IterativeSearchMode,
        progress_key: &ProgressKey,
    ) -> Result<ComparisonRecord> {
        if document_ids.len() < 2 {
            return Err(DisclosureError::Input(
                "a comparison needs at least two documents".into(),
            ));
        }

        self.progress
            .update(progress_key, ProgressRecord::running(10, "loading metadata"))
            .await?;

        // Load the inputs and build the DocumentInfo snapshots.
        let mut records = Vec::new();
        for document_id in document_ids {
            records.push(self.metadata.load(document_id).await?);
        }

        let mut infos = Vec::with_capacity(records.len());
        for record in &records {
            infos.push(self.document_info(record).await);
        }

        let mode = select_mode(&infos);
        info!(comparison_id, ?mode, "comparison mode selected");

        if document_ids.len() > 2 {
            return Err(DisclosureError::Input(
                "multi-document comparison is limited to pairwise runs in this core".into(),
            ));
        }

        let data1 = structured_payload(&records[0])?;
        let data2 = structured_payload(&records[1])?;

        // Resumption anchor: keep analyses a previous run already persisted.
        let mut completed_sections: Vec<SectionDetailedComparison> = self
            .comparisons
            .load(comparison_id)
            .await
            .map(|r| r.section_detailed_comparisons)
            .unwrap_or_default();

        let mut record = ComparisonRecord::new(comparison_id, mode, infos.clone());
        record.section_detailed_comparisons = completed_sections.clone();
        record.progress = ProgressRecord::running(30, "comparing");
        self.comparisons.save(&record).await?;

        self.check_cancelled()?;

        // Section mapping, then the cheap whole-artifact diffs.
        self.progress
            .update(progress_key, ProgressRecord::running(30, "mapping sections"))
            .await?;

        record.section_mappings =
            mapping::map_sections(&data1, &data2, self.embedder.as_ref()).await?;
        record.numerical_differences =
            numeric::diff_financial_data(&data1, &data2, &record.section_mappings);
        record.text_differences =
            textdiff::diff_mapped_sections(&data1, &data2, &record.section_mappings);
        self.comparisons.save(&record).await?;

        self.check_cancelled()?;

        // Detailed per-section analyses on a bounded pool.
        let pending: Vec<SectionMapping> = record
            .section_mappings
            .iter()
            .filter(|m| {
                !completed_sections
                    .iter()
                    .any(|s| s.doc1_section_name == m.doc1_section && s.doc2_section_name == m.doc2_section)
            })
            .cloned()
            .collect();

        let total = record.section_mappings.len();
        let doc_type_label = infos[0]
            .document_type
            .as_deref()
            .map(|t| self.templates.display_name(t))
            .unwrap_or_default();

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut analysis_futures = Vec::new();

        for section_mapping in pending {
            let Some(request) = self.build_analysis_request(
                mode,
                &doc_type_label,
                &infos,
                &section_mapping,
                &data1,
                &data2,
            ) else {
                continue;
            };

            let model = Arc::clone(&self.model);
            let semaphore = Arc::clone(&semaphore);

            analysis_futures.push(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|_| {
                    DisclosureError::Concurrency("analysis worker pool closed".into())
                })?;
                let analysis = model.analyze_section(&request).await;
                Ok::<_, DisclosureError>((section_mapping, request, analysis))
            });
        }

        let mut analyzed = Vec::new();
        let mut done_count = completed_sections.len();

        for outcome in join_all(analysis_futures).await {
            let (section_mapping, request, analysis) = outcome?;
            match analysis {
                Ok(analysis) => {
                    let detailed = promote_importance(
                        mode,
                        build_detailed(&section_mapping, &request, analysis),
                    );
                    done_count += 1;

                    let percent = 30 + (done_count * 60 / total.max(1)) as u8;
                    self.progress
                        .update(
                            progress_key,
                            ProgressRecord::running(percent, "analyzing sections").with_sections(
                                Some(section_mapping.doc1_section.clone()),
                                done_count,
                                total,
                            ),
                        )
                        .await?;

                    // Persist each analysis as it lands; this is the
                    // crash-restart resumption anchor.
                    let snapshot = detailed.clone();
                    self.comparisons
                        .update(comparison_id, move |record| {
                            record.section_detailed_comparisons.push(snapshot);
                        })
                        .await?;

                    analyzed.push((request, detailed));
                }
                Err(e) => {
                    // One failed section never fails the comparison.
                    warn!(section = %section_mapping.doc1_section, error = %e, "section analysis failed");
                }
            }
        }

        self.check_cancelled()?;

        // Optional iterative re-exploration.
        if iterative_mode != IterativeSearchMode::Off {
            for (request, detailed) in analyzed.iter_mut() {
                let qualifies = match iterative_mode {
                    IterativeSearchMode::All => true,
                    IterativeSearchMode::HighOnly => detailed.importance == Importance::High,
                    IterativeSearchMode::Off => false,
                };
                if !qualifies {
                    continue;
                }

                let first = SectionAnalysis {
                    text_changes: detailed.text_changes.clone(),
                    numerical_changes: detailed.numerical_changes.clone(),
                    tone_analysis: detailed.tone_analysis.clone(),
                    importance: detailed.importance,
                    importance_reason: detailed.importance_reason.clone(),
                    summary: detailed.summary.clone(),
                };

                let outcome = explore_section(
                    self.model.as_ref(),
                    self.embedder.as_ref(),
                    &self.config.iterative,
                    request,
                    &first,
                    &data1,
                    &data2,
                )
                .await?;

                if !outcome.rounds.is_empty() {
                    detailed.additional_searches = Some(outcome.rounds);
                }
                detailed.has_additional_context = outcome.has_additional_context;
            }
        }

        self.check_cancelled()?;

        self.progress
            .update(progress_key, ProgressRecord::running(90, "saving result"))
            .await?;

        // Assemble the final artifact: previously-completed analyses first,
        // then this run's, sorted by doc1 page range for deterministic
        // presentation.
        completed_sections.extend(analyzed.into_iter().map(|(_, detailed)| detailed));
        completed_sections.sort_by_key(page_range_sort_key);
        record.section_detailed_comparisons = completed_sections;
        record.priority = overall_priority(&record.section_detailed_comparisons);
        record.progress = ProgressRecord::completed("completed");

        self.comparisons.save(&record).await?;
        self.progress
            .update(progress_key, ProgressRecord::completed("completed"))
            .await?;

        info!(
            comparison_id,
            sections = record.section_detailed_comparisons.len(),
            "comparison complete"
        );
        Ok(record)
    }

    /// Build the DocumentInfo snapshot: manual overrides first, else one
    /// model call over the head of the structured text.
    async fn document_info(&self, record: &DocumentRecord) -> DocumentInfo {
        let document_type = record.effective_type().map(str::to_string);
        let document_type_label = document_type.as_deref().map(|t| self.templates.display_name(t));

        let mut info = DocumentInfo {
            document_id: record.document_id.clone(),
            filename: record.filename.clone(),
            document_type,
            document_type_label,
            company_name: record.company_name.clone(),
            fiscal_year: record.fiscal_year,
            extraction_confidence: 1.0,
        };

        if info.company_name.is_some() && info.fiscal_year.is_some() {
            return info;
        }

        let sample: String = record
            .structured_data
            .as_ref()
            .map(|d| d.full_text.chars().take(PROFILE_SAMPLE_CHARS).collect())
            .unwrap_or_default();

        if sample.is_empty() {
            info.extraction_confidence = 0.0;
            return info;
        }

        match self.model.extract_document_profile(&sample).await {
            Ok(profile) => {
                if info.company_name.is_none() {
                    info.company_name = profile.company_name;
                }
                if info.fiscal_year.is_none() {
                    info.fiscal_year = profile.fiscal_year;
                }
                info.extraction_confidence = profile.confidence;
            }
            Err(e) => {
                warn!(document_id = %record.document_id, error = %e, "profile extraction failed");
                info.extraction_confidence = 0.0;
            }
        }

        info
    }

    fn build_analysis_request(
        &self,
        mode: ComparisonMode,
        doc_type_label: &str,
        infos: &[DocumentInfo],
        section_mapping: &SectionMapping,
        data1: &StructuredData,
        data2: &StructuredData,
    ) -> Option<SectionAnalysisRequest> {
        let info1 = data1.sections.get(&section_mapping.doc1_section)?;
        let info2 = data2.sections.get(&section_mapping.doc2_section)?;

        Some(SectionAnalysisRequest {
            mode,
            document_type_label: doc_type_label.to_string(),
            section_name: section_mapping.doc1_section.clone(),
            side1: AnalysisSide {
                section_name: section_mapping.doc1_section.clone(),
                page_range: info1.page_range(),
                rendered_content: render_side(data1, &section_mapping.doc1_section),
            },
            side2: AnalysisSide {
                section_name: section_mapping.doc2_section.clone(),
                page_range: info2.page_range(),
                rendered_content: render_side(data2, &section_mapping.doc2_section),
            },
            company1: infos[0].company_name.clone(),
            company2: infos[1].company_name.clone(),
            additional_context: None,
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DisclosureError::Cancelled);
        }
        Ok(())
    }
}

fn structured_payload(record: &DocumentRecord) -> Result<StructuredData> {
    record.structured_data.clone().ok_or_else(|| {
        DisclosureError::Input(format!(
            "document {:?} is not structured yet",
            record.document_id
        ))
    })
}

/// Render one side for the analysis prompt: the extracted content when the
/// section has it, otherwise the raw page text, capped.
fn render_side(data: &StructuredData, section_name: &str) -> String {
    let Some(info) = data.sections.get(section_name) else {
        return String::new();
    };

    match info.extracted_content.as_ref().filter(|c| !c.is_empty()) {
        Some(content) => render_extracted_content(content),
        None => {
            let text = data.section_text(info);
            let capped: String = text.chars().take(RAW_TEXT_CAP).collect();
            format!("テキスト（抜粋）:\n{capped}")
        }
    }
}

/// Compact rendering of the four buckets, designed to hold prompt cost down
/// while preserving the verbatim values.
fn render_extracted_content(content: &crate::types::ExtractedContent) -> String {
    let mut parts = Vec::new();

    if !content.financial_data.is_empty() {
        let lines: Vec<String> = content
            .financial_data
            .iter()
            .take(30)
            .map(|f| {
                let value = serde_json::to_string(&f.value).unwrap_or_default();
                format!(
                    "- {}: {}{} {} {}",
                    f.item,
                    value,
                    f.unit.as_deref().map(|u| format!(" {u}")).unwrap_or_default(),
                    f.period.as_deref().unwrap_or(""),
                    f.context.as_deref().unwrap_or("")
                )
                .trim_end()
                .to_string()
            })
            .collect();
        parts.push(format!("財務指標:\n{}", lines.join("\n")));
    }

    if !content.accounting_notes.is_empty() {
        let lines: Vec<String> = content
            .accounting_notes
            .iter()
            .take(10)
            .map(|n| format!("- {}: {}", n.topic, n.content))
            .collect();
        parts.push(format!("会計コメント:\n{}", lines.join("\n")));
    }

    if !content.factual_info.is_empty() {
        let lines: Vec<String> = content
            .factual_info
            .iter()
            .take(20)
            .map(|f| {
                let value = serde_json::to_string(&f.value).unwrap_or_default();
                format!("- {} / {}: {}", f.category, f.item, value)
            })
            .collect();
        parts.push(format!("事実情報:\n{}", lines.join("\n")));
    }

    if !content.messages.is_empty() {
        let lines: Vec<String> = content
            .messages
            .iter()
            .take(10)
            .map(|m| format!("- [{}] {}", m.message_type, m.content))
            .collect();
        parts.push(format!("主張・メッセージ:\n{}", lines.join("\n")));
    }

    parts.join("\n\n")
}

fn build_detailed(
    section_mapping: &SectionMapping,
    request: &SectionAnalysisRequest,
    analysis: SectionAnalysis,
) -> SectionDetailedComparison {
    SectionDetailedComparison {
        section_name: section_mapping.doc1_section.clone(),
        doc1_page_range: request.side1.page_range.clone(),
        doc2_page_range: request.side2.page_range.clone(),
        doc1_section_name: section_mapping.doc1_section.clone(),
        doc2_section_name: section_mapping.doc2_section.clone(),
        mapping_confidence: section_mapping.confidence_score,
        mapping_method: section_mapping.mapping_method,
        text_changes: analysis.text_changes,
        numerical_changes: analysis.numerical_changes,
        tone_analysis: analysis.tone_analysis,
        importance: analysis.importance,
        importance_reason: analysis.importance_reason,
        summary: analysis.summary,
        additional_searches: None,
        has_additional_context: false,
    }
}

/// Importance promotion: material findings force `high` even when the model
/// said otherwise, and the reason is prefixed with the finding count.
fn promote_importance(
    mode: ComparisonMode,
    mut detailed: SectionDetailedComparison,
) -> SectionDetailedComparison {
    if detailed.importance == Importance::High {
        return detailed;
    }

    match (&detailed.text_changes, mode) {
        (TextChanges::Consistency { contradictions, .. }, ComparisonMode::ConsistencyCheck)
            if !contradictions.is_empty() =>
        {
            detailed.importance = Importance::High;
            detailed.importance_reason = format!(
                "{}件の矛盾を検出: {}",
                contradictions.len(),
                detailed.importance_reason
            );
        }
        (TextChanges::Year { modified, .. }, ComparisonMode::DiffAnalysisYear)
            if !modified.is_empty() =>
        {
            detailed.importance = Importance::High;
            detailed.importance_reason = format!(
                "{}件の重要な変更を検出: {}",
                modified.len(),
                detailed.importance_reason
            );
        }
        _ => {}
    }

    detailed
}

/// Sort key: ascending doc1 page range (start, then end).
fn page_range_sort_key(section: &SectionDetailedComparison) -> (u32, u32) {
    parse_page_range(&section.doc1_page_range)
}

fn parse_page_range(range: &str) -> (u32, u32) {
    let mut parts = range.splitn(2, '-');
    let start = parts.next().and_then(|s| s.parse().ok()).unwrap_or(u32::MAX);
    let end = parts.next().and_then(|s| s.parse().ok()).unwrap_or(start);
    (start, end)
}

fn overall_priority(sections: &[SectionDetailedComparison]) -> Importance {
    if sections.iter().any(|s| s.importance == Importance::High) {
        Importance::High
    } else if sections.iter().any(|s| s.importance == Importance::Medium) {
        Importance::Medium
    } else if sections.is_empty() {
        Importance::Medium
    } else {
        Importance::Low
    }
}
