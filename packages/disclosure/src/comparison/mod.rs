//! The comparison engine: mode selection, section mapping, numerical and
//! text diffing, per-section model analysis and iterative re-exploration.

pub mod engine;
pub mod iterative;
pub mod mapping;
pub mod numeric;
pub mod textdiff;

pub use engine::{select_mode, ComparisonConfig, ComparisonOrchestrator};
pub use iterative::IterativeConfig;
