//! File-backed stores: document metadata, comparison artifacts, progress.
//!
//! All three follow the same discipline: one JSON file per record, every
//! mutation is a read-modify-write of the whole record under a per-identifier
//! async lock, and writes go through a temp-file rename so readers never see
//! a torn record.

mod comparisons;
mod lock;
mod metadata;
mod progress;

pub use comparisons::ComparisonStore;
pub use metadata::MetadataStore;
pub use progress::{ProgressKey, ProgressReporter};

pub(crate) use lock::LockRegistry;

use std::path::Path;

use crate::error::Result;

/// Write `bytes` to `path` atomically via a sibling temp file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
