//! Structuring entry-point gating, idempotence, and retention sweeps.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};

use disclosure::jobs::sweep_once;
use disclosure::structuring::StructuringOutcome;
use disclosure::testing::{MockEmbedder, MockModel};
use disclosure::types::{DocumentRecord, IterativeSearchMode, ProcessingStatus};
use disclosure::{run_comparison, structure_document, DisclosureError};

use common::{build_context, seed_structured_document};

#[tokio::test]
async fn unknown_type_gates_on_classification() {
    let model = Arc::new(MockModel::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let (_dir, ctx) = build_context(model, embedder);

    let mut record = DocumentRecord::new(
        "doc-unclassified",
        "doc.pdf",
        PathBuf::from("/nonexistent/doc.pdf"),
        512,
        Utc::now() + Duration::hours(24),
    );
    record.detected_type = Some("unknown".into());
    ctx.metadata.create(&record).await.unwrap();

    let outcome = structure_document(&ctx, "doc-unclassified").await.unwrap();
    assert_eq!(outcome, StructuringOutcome::PendingClassification);

    let stored = ctx.metadata.load("doc-unclassified").await.unwrap();
    assert_eq!(
        stored.processing_status,
        ProcessingStatus::PendingClassification
    );
    assert!(stored.structured_data.is_none());
}

#[tokio::test]
async fn structured_document_is_a_no_op_on_reentry() {
    let model = Arc::new(MockModel::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let (_dir, ctx) = build_context(model, embedder);

    let seeded =
        seed_structured_document(&ctx, "doc-done", "securities_report", "株式会社A", 2024, 1200.0)
            .await;

    let outcome = structure_document(&ctx, "doc-done").await.unwrap();
    assert_eq!(outcome, StructuringOutcome::AlreadyStructured);

    // The payload is untouched, deep-equal to what was stored.
    let stored = ctx.metadata.load("doc-done").await.unwrap();
    assert_eq!(stored.structured_data, seeded.structured_data);
    assert_eq!(stored.processing_status, ProcessingStatus::Structured);
}

#[tokio::test]
async fn missing_document_fails_typed() {
    let model = Arc::new(MockModel::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let (_dir, ctx) = build_context(model, embedder);

    let result = structure_document(&ctx, "doc-missing").await;
    assert!(matches!(result, Err(DisclosureError::NotFound(_))));
}

#[tokio::test]
async fn batch_processing_tolerates_failing_items() {
    let model = Arc::new(MockModel::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let (_dir, ctx) = build_context(model, embedder);

    seed_structured_document(&ctx, "doc-ok", "securities_report", "株式会社A", 2024, 1000.0).await;

    let outcomes = disclosure::jobs::process_documents(
        &ctx,
        &["doc-ok".to_string(), "doc-gone".to_string()],
    )
    .await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        outcomes[0].outcome.as_ref().unwrap(),
        &StructuringOutcome::AlreadyStructured
    );
    assert!(outcomes[1].outcome.is_err());
}

#[tokio::test]
async fn sweep_expires_documents_and_prunes_comparisons() {
    let model = Arc::new(MockModel::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let (_dir, ctx) = build_context(model, embedder);

    // One live and one soon-to-expire structured document, compared once.
    seed_structured_document(&ctx, "doc-live", "securities_report", "株式会社A", 2023, 1000.0)
        .await;
    seed_structured_document(&ctx, "doc-old", "securities_report", "株式会社A", 2024, 1100.0)
        .await;

    let record = run_comparison(
        &ctx,
        "cmp-mixed",
        &["doc-live".to_string(), "doc-old".to_string()],
        IterativeSearchMode::Off,
    )
    .await
    .unwrap();

    // The two payloads differ in the revenue line, so the coarse diff
    // carries verbatim deltas the sweep must later remove.
    assert!(record
        .text_differences
        .iter()
        .any(|d| !d.changed_text.is_empty()));

    // A second comparison whose inputs will both expire.
    seed_structured_document(&ctx, "doc-old2", "securities_report", "株式会社B", 2024, 900.0)
        .await;
    run_comparison(
        &ctx,
        "cmp-doomed",
        &["doc-old".to_string(), "doc-old2".to_string()],
        IterativeSearchMode::Off,
    )
    .await
    .unwrap();

    // Backdate the retention deadlines of the expiring documents.
    for id in ["doc-old", "doc-old2"] {
        ctx.metadata
            .update(id, |record| {
                record.retention_deadline = Utc::now() - Duration::seconds(1);
            })
            .await
            .unwrap();
    }

    // They now show up as expired and sweep cleans them.
    let expired = ctx.metadata.list_expired(Utc::now()).await.unwrap();
    assert_eq!(expired.len(), 2);

    let swept = sweep_once(&ctx).await.unwrap();
    assert_eq!(swept, 2);

    // Reads of the expired side fail typed; the record is a tombstone, not
    // a missing file.
    assert!(matches!(
        ctx.metadata.load("doc-old").await,
        Err(DisclosureError::RetentionExpired(_))
    ));

    // The mixed comparison survives with identifiers and snapshots intact
    // but the expired side's payload bodies removed.
    let mixed = ctx.comparisons.load("cmp-mixed").await.unwrap();
    assert_eq!(mixed.document_ids, vec!["doc-live", "doc-old"]);
    assert_eq!(mixed.document_infos.len(), 2);
    assert_eq!(
        mixed.document_infos[1].company_name.as_deref(),
        Some("株式会社A")
    );
    for diff in &mixed.text_differences {
        assert!(diff.added_text.is_empty());
        assert!(diff.removed_text.is_empty());
        assert!(diff.changed_text.is_empty());
    }

    // The fully-expired comparison is gone.
    assert!(matches!(
        ctx.comparisons.load("cmp-doomed").await,
        Err(DisclosureError::NotFound(_))
    ));

    // A second sweep is a no-op.
    assert_eq!(sweep_once(&ctx).await.unwrap(), 0);
}
