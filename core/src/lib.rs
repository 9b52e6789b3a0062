//! # tabrecon-core
//!
//! Reconciliation engine for two tabular datasets that should hold the same data
//! under different formatting, null conventions and column orders.
//!
//! Cells are normalized by content, rows are fingerprinted over a caller-supplied
//! list of column pairs, and fingerprints are matched with multiset semantics so
//! duplicate rows are never over-counted. Rows left unmatched get a column-level
//! diff against the row at the same position on the other side, filtered and
//! ranked by significance.
//!
//! Loading data, persisting results and any user interface belong to the caller.

pub mod config;
pub mod dataset;
pub mod diff;
pub mod error;
pub mod hash;
pub mod matching;
pub mod normalize;
pub mod quality;
pub mod reconcile;
pub mod report;

// Re-export the most commonly used types for convenience
pub use config::Config;
pub use dataset::{CellValue, ColumnPair, Dataset, Table};
pub use diff::{ColumnDifference, MismatchRecord, RowType};
pub use error::{ReconError, Result};
pub use hash::{DigestAlgorithm, RowFingerprint};
pub use normalize::{normalize, CanonicalKind, CanonicalValue, Normalizer, NormalizerOptions};
pub use reconcile::{
    reconcile, CancellationToken, ReconcileOptions, ReconcilePhase, ReconcileProgress,
    ReconciliationResult, Reconciler,
};

/// Version recorded in every run's metadata
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
