//! Shared fixtures for integration tests: temp-dir stores, mock model and
//! embedder, and pre-structured document records.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use disclosure::config::Settings;
use disclosure::stores::{ComparisonStore, MetadataStore, ProgressReporter};
use disclosure::templates::TemplateRegistry;
use disclosure::testing::{MockEmbedder, MockModel};
use disclosure::types::{
    DocumentRecord, DocumentTemplate, ExtractedContent, FactValue, FinancialFact, Page,
    ProcessingStatus, ScalarValue, SectionInfo, StructuredData, TemplateSection,
};
use disclosure::CoreContext;

/// A context wired to temp-dir stores and the given mocks. The TempDir must
/// be kept alive by the caller.
pub fn build_context(model: Arc<MockModel>, embedder: Arc<MockEmbedder>) -> (TempDir, CoreContext) {
    let dir = TempDir::new().unwrap();
    let settings = Settings::default().with_storage_dir(dir.path());

    let metadata = Arc::new(MetadataStore::new(&settings).unwrap());
    let comparisons = Arc::new(ComparisonStore::new(&settings).unwrap());
    let progress = Arc::new(ProgressReporter::new(&settings).unwrap());
    let templates = Arc::new(TemplateRegistry::from_templates([
        template("securities_report", "有価証券報告書"),
        template("earnings_report", "決算短信"),
    ]));

    let ctx = CoreContext::with_components(
        settings,
        metadata,
        comparisons,
        progress,
        templates,
        model,
        embedder,
    );
    (dir, ctx)
}

fn template(doc_type: &str, display_name: &str) -> DocumentTemplate {
    DocumentTemplate {
        document_type: doc_type.into(),
        display_name: display_name.into(),
        sections: vec![
            TemplateSection {
                id: "risks".into(),
                name: "事業等のリスク".into(),
                required: true,
                ..Default::default()
            },
            TemplateSection {
                id: "results".into(),
                name: "経営成績".into(),
                required: true,
                ..Default::default()
            },
        ],
        keywords_for_detection: vec![display_name.into()],
        ..Default::default()
    }
}

/// One page of filler text long enough to clear content-extraction gates.
pub fn filler_page(page_number: u32, topic: &str) -> Page {
    let body = format!(
        "{topic}に関する記載です。当社の事業環境および経営方針について詳細に説明しています。"
    )
    .repeat(5);
    Page::new(page_number, body, false)
}

/// A structured payload with two sections over four pages.
pub fn structured_payload(revenue: f64) -> StructuredData {
    let pages = vec![
        filler_page(1, "事業等のリスク"),
        filler_page(2, "事業等のリスク"),
        filler_page(3, &format!("経営成績と売上高の推移（売上高 {revenue} 百万円）")),
        filler_page(4, "経営成績"),
    ];

    let mut sections = BTreeMap::new();
    sections.insert(
        "事業等のリスク".to_string(),
        SectionInfo {
            start_page: 1,
            end_page: 2,
            char_count: pages[0].char_count + pages[1].char_count,
            confidence: 0.95,
            extracted_content: Some(ExtractedContent::default()),
        },
    );
    sections.insert(
        "経営成績".to_string(),
        SectionInfo {
            start_page: 3,
            end_page: 4,
            char_count: pages[2].char_count + pages[3].char_count,
            confidence: 0.9,
            extracted_content: Some(ExtractedContent {
                financial_data: vec![FinancialFact {
                    item: "売上高".into(),
                    value: FactValue::Scalar(ScalarValue::Number(revenue)),
                    unit: Some("百万円".into()),
                    period: None,
                    context: None,
                }],
                ..Default::default()
            }),
        },
    );

    let full_text = pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    StructuredData {
        full_text,
        pages,
        tables: Vec::new(),
        sections,
    }
}

/// A fully structured document record ready for comparison.
pub async fn seed_structured_document(
    ctx: &CoreContext,
    document_id: &str,
    doc_type: &str,
    company: &str,
    fiscal_year: i32,
    revenue: f64,
) -> DocumentRecord {
    let mut record = DocumentRecord::new(
        document_id,
        format!("{document_id}.pdf"),
        PathBuf::from(format!("/nonexistent/{document_id}.pdf")),
        2048,
        Utc::now() + Duration::hours(24),
    );
    record.detected_type = Some(doc_type.to_string());
    record.company_name = Some(company.to_string());
    record.fiscal_year = Some(fiscal_year);
    record.processing_status = ProcessingStatus::Structured;
    record.structured_data = Some(structured_payload(revenue));

    ctx.metadata.create(&record).await.unwrap();
    record
}
