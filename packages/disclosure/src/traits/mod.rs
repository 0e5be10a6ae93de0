//! Core trait abstractions: the language model seam and the embedding seam.
//!
//! Implementations wrap specific providers (see `crate::ai`) or canned
//! responses for tests (see `crate::testing`).

pub mod embedder;
pub mod model;

pub use embedder::{cosine_similarity, Embedder};
pub use model::{
    AnalysisSide, BatchContext, Classification, ClassifierOption, DetectedSection,
    DisclosureModel, DocumentProfile, SectionAnalysis, SectionAnalysisRequest,
    SectionBatchResponse, SectionContentRequest, SectionDetectRequest, VisionPageText,
};
