//! Disclosure-document structuring and comparison core
//!
//! Corporate disclosure PDFs (annual securities reports, integrated reports,
//! earnings releases, statutory financial statements) are ingested, turned
//! into a navigable structured representation, and compared pairwise to
//! surface internal inconsistencies, year-over-year drift and cross-company
//! differences.
//!
//! # The two pipelines
//!
//! - [`structuring`] — a staged extractor (raw text, vision-OCR fallback,
//!   table extraction, template-guided section detection, per-section
//!   content extraction) that fills a [`types::StructuredData`] payload.
//! - [`comparison`] — a mode-selecting orchestrator that maps sections
//!   between two structured documents via embedding similarity, runs a
//!   per-section model analysis, and produces a typed
//!   [`types::ComparisonRecord`].
//!
//! # Seams
//!
//! Model access goes through [`traits::DisclosureModel`] and embedding
//! through [`traits::Embedder`]; production implementations live in [`ai`],
//! mock implementations in [`testing`]. Persistence is two file-backed
//! stores plus a progress reporter in [`stores`], all guarded by
//! per-identifier locks.
//!
//! # Entry points
//!
//! The external job runtime calls [`jobs::structure_document`] and
//! [`jobs::run_comparison`]; both are idempotent on re-entry and report
//! through the [`stores::ProgressReporter`].

pub mod ai;
pub mod classifier;
pub mod comparison;
pub mod config;
pub mod error;
pub mod jobs;
pub mod pdf;
pub mod stores;
pub mod structuring;
pub mod templates;
pub mod testing;
pub mod traits;
pub mod types;

pub use config::Settings;
pub use error::{DisclosureError, Result};
pub use jobs::{run_comparison, structure_document, CoreContext, RetentionSweeper};
pub use templates::TemplateRegistry;
