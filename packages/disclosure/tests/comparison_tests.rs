//! End-to-end comparison runs against mock model and embedder.

mod common;

use std::sync::Arc;

use disclosure::comparison::{ComparisonConfig, ComparisonOrchestrator, IterativeConfig};
use disclosure::testing::{neutral_analysis, MockEmbedder, MockModel};
use disclosure::traits::SectionAnalysis;
use disclosure::types::{
    ComparisonMode, Importance, IterativeSearchMode, MappingMethod, ProgressStatus, TextChanges,
};
use disclosure::{run_comparison, CoreContext};

use common::{build_context, seed_structured_document};

fn contradiction_analysis() -> SectionAnalysis {
    SectionAnalysis {
        text_changes: TextChanges::Consistency {
            contradictions: vec!["売上高が1,200百万円と1,100百万円で一致しない".into()],
            normal_differences: vec![],
            complementary_info: vec![],
            consistency_score: Some(2),
            consistency_reason: Some("数値の不一致".into()),
        },
        importance: Importance::Medium,
        importance_reason: "数値の食い違い".into(),
        summary: "経営成績の売上高が両資料で食い違っている".into(),
        ..neutral_analysis(ComparisonMode::ConsistencyCheck)
    }
}

fn orchestrator(ctx: &CoreContext, iterative: IterativeConfig) -> ComparisonOrchestrator {
    ComparisonOrchestrator::new(
        Arc::clone(&ctx.metadata),
        Arc::clone(&ctx.comparisons),
        Arc::clone(&ctx.progress),
        Arc::clone(&ctx.templates),
        Arc::clone(&ctx.model),
        Arc::clone(&ctx.embedder),
    )
    .with_config(ComparisonConfig {
        max_workers: 2,
        iterative,
    })
}

#[tokio::test]
async fn year_mode_maps_shared_sections_exactly() {
    let model = Arc::new(MockModel::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let (_dir, ctx) = build_context(Arc::clone(&model), embedder);

    seed_structured_document(&ctx, "doc-2023", "securities_report", "株式会社A", 2023, 1100.0).await;
    seed_structured_document(&ctx, "doc-2024", "securities_report", "株式会社A", 2024, 1200.0).await;

    let record = run_comparison(
        &ctx,
        "cmp-year",
        &["doc-2023".to_string(), "doc-2024".to_string()],
        IterativeSearchMode::Off,
    )
    .await
    .unwrap();

    assert_eq!(record.mode, ComparisonMode::DiffAnalysisYear);

    let risk_mapping = record
        .section_mappings
        .iter()
        .find(|m| m.doc1_section == "事業等のリスク")
        .expect("shared section must map");
    assert_eq!(risk_mapping.mapping_method, MappingMethod::Exact);
    assert_eq!(risk_mapping.confidence_score, 1.0);
    assert_eq!(risk_mapping.doc2_section, "事業等のリスク");

    // Numerical diff from the financial_data buckets: (1200-1100)/1100.
    let diff = record
        .numerical_differences
        .iter()
        .find(|d| d.item_name == "売上高")
        .expect("matched item must diff");
    let expected = (1_200_000_000.0f64 - 1_100_000_000.0) / 1_100_000_000.0f64;
    assert!((diff.difference_pct.unwrap() - expected).abs() < 1e-9);
    assert!(diff.is_significant);

    // Detailed comparisons are sorted by doc1 page range.
    let starts: Vec<String> = record
        .section_detailed_comparisons
        .iter()
        .map(|s| s.doc1_page_range.clone())
        .collect();
    assert_eq!(starts, vec!["1-2".to_string(), "3-4".to_string()]);

    // Progress surfaced as completed.
    let progress = ctx
        .progress
        .get(&disclosure::stores::ProgressKey::Comparison("cmp-year".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, ProgressStatus::Completed);
    assert_eq!(progress.progress, 100);
}

#[tokio::test]
async fn contradiction_forces_high_importance_in_consistency_mode() {
    let model = Arc::new(MockModel::new().with_analysis("経営成績", contradiction_analysis()));
    let embedder = Arc::new(MockEmbedder::new(8));
    let (_dir, ctx) = build_context(Arc::clone(&model), embedder);

    // Same company, different document types, same year -> consistency check.
    seed_structured_document(&ctx, "doc-sr", "securities_report", "株式会社A", 2024, 1200.0).await;
    seed_structured_document(&ctx, "doc-er", "earnings_report", "株式会社A", 2024, 1100.0).await;

    let record = run_comparison(
        &ctx,
        "cmp-consistency",
        &["doc-sr".to_string(), "doc-er".to_string()],
        IterativeSearchMode::Off,
    )
    .await
    .unwrap();

    assert_eq!(record.mode, ComparisonMode::ConsistencyCheck);

    let section = record
        .section_detailed_comparisons
        .iter()
        .find(|s| s.section_name == "経営成績")
        .expect("analyzed section present");

    // The model said medium; the contradiction promotes to high and the
    // reason leads with the count.
    assert_eq!(section.importance, Importance::High);
    assert!(section.importance_reason.starts_with("1件の矛盾を検出"));
    assert_eq!(record.priority, Importance::High);
}

#[tokio::test]
async fn iterative_off_leaves_no_additional_searches() {
    let model = Arc::new(MockModel::new().with_analysis("経営成績", contradiction_analysis()));
    let embedder = Arc::new(MockEmbedder::new(8));
    let (_dir, ctx) = build_context(Arc::clone(&model), embedder);

    seed_structured_document(&ctx, "doc-sr", "securities_report", "株式会社A", 2024, 1200.0).await;
    seed_structured_document(&ctx, "doc-er", "earnings_report", "株式会社A", 2024, 1100.0).await;

    let record = run_comparison(
        &ctx,
        "cmp-off",
        &["doc-sr".to_string(), "doc-er".to_string()],
        IterativeSearchMode::Off,
    )
    .await
    .unwrap();

    for section in &record.section_detailed_comparisons {
        assert!(section.additional_searches.is_none());
        assert!(!section.has_additional_context);
    }
}

#[tokio::test]
async fn high_only_reexplores_only_the_contradiction_section() {
    let model = Arc::new(
        MockModel::new()
            .with_analysis("経営成績", contradiction_analysis())
            .with_keywords(vec!["売上高の推移".into()]),
    );
    let embedder = Arc::new(MockEmbedder::new(8));
    let (_dir, ctx) = build_context(Arc::clone(&model), Arc::clone(&embedder));

    seed_structured_document(&ctx, "doc-sr", "securities_report", "株式会社A", 2024, 1200.0).await;
    seed_structured_document(&ctx, "doc-er", "earnings_report", "株式会社A", 2024, 1100.0).await;

    // Drop the similarity gate so the deterministic mock vectors always pass.
    let iterative = IterativeConfig {
        similarity_threshold: -1.0,
        ..IterativeConfig::default()
    };

    let record = orchestrator(&ctx, iterative)
        .run_comparison(
            "cmp-high-only",
            &["doc-sr".to_string(), "doc-er".to_string()],
            IterativeSearchMode::HighOnly,
        )
        .await
        .unwrap();

    let high_section = record
        .section_detailed_comparisons
        .iter()
        .find(|s| s.section_name == "経営成績")
        .unwrap();
    let other_section = record
        .section_detailed_comparisons
        .iter()
        .find(|s| s.section_name == "事業等のリスク")
        .unwrap();

    let searches = high_section
        .additional_searches
        .as_ref()
        .expect("high section gets re-exploration rounds");
    assert!(!searches.is_empty());
    assert!(high_section.has_additional_context);

    // The keyword hit the "売上高の推移" page text of both documents.
    let first_round = &searches[0];
    assert_eq!(first_round.iteration, 1);
    assert_eq!(first_round.search_keywords, vec!["売上高の推移"]);
    assert!(!first_round.found_sections.is_empty());
    assert!(first_round
        .found_sections
        .iter()
        .all(|p| p.excerpt.contains("売上高の推移")));

    assert!(other_section.additional_searches.is_none());
    assert!(!other_section.has_additional_context);
}

#[tokio::test]
async fn completed_comparison_is_idempotent_on_reentry() {
    let model = Arc::new(MockModel::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let (_dir, ctx) = build_context(Arc::clone(&model), embedder);

    seed_structured_document(&ctx, "doc-a", "securities_report", "株式会社A", 2023, 1000.0).await;
    seed_structured_document(&ctx, "doc-b", "securities_report", "株式会社A", 2024, 1050.0).await;

    let ids = vec!["doc-a".to_string(), "doc-b".to_string()];
    let first = run_comparison(&ctx, "cmp-idem", &ids, IterativeSearchMode::Off)
        .await
        .unwrap();
    let analyses_after_first = model.analysis_call_count("経営成績");

    let second = run_comparison(&ctx, "cmp-idem", &ids, IterativeSearchMode::Off)
        .await
        .unwrap();

    // No further model work on re-entry, and the artifact is unchanged.
    assert_eq!(model.analysis_call_count("経営成績"), analyses_after_first);
    assert_eq!(first.comparison_id, second.comparison_id);
    assert_eq!(
        first.section_detailed_comparisons.len(),
        second.section_detailed_comparisons.len()
    );

    // The history lists exactly one descriptor for it.
    let history = ctx.comparisons.list().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].comparison_id, "cmp-idem");
    assert_eq!(history[0].section_count, first.section_detailed_comparisons.len());
}

#[tokio::test]
async fn comparing_an_unstructured_document_fails_typed() {
    let model = Arc::new(MockModel::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let (_dir, ctx) = build_context(Arc::clone(&model), embedder);

    seed_structured_document(&ctx, "doc-ok", "securities_report", "株式会社A", 2023, 1000.0).await;

    // The second document exists but was never structured.
    let mut record = disclosure::types::DocumentRecord::new(
        "doc-raw",
        "doc-raw.pdf",
        std::path::PathBuf::from("/nonexistent/doc-raw.pdf"),
        128,
        chrono::Utc::now() + chrono::Duration::hours(24),
    );
    record.detected_type = Some("securities_report".into());
    ctx.metadata.create(&record).await.unwrap();

    let result = run_comparison(
        &ctx,
        "cmp-unstructured",
        &["doc-ok".to_string(), "doc-raw".to_string()],
        IterativeSearchMode::Off,
    )
    .await;

    assert!(matches!(result, Err(disclosure::DisclosureError::Input(_))));

    // The failure is visible on the progress surface.
    let progress = ctx
        .progress
        .get(&disclosure::stores::ProgressKey::Comparison("cmp-unstructured".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, ProgressStatus::Failed);
    assert!(progress.error.is_some());
}
