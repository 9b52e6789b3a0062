//! Reconciliation coordinator
//!
//! A run moves through `Initialized -> NormalizingAndHashing -> Matched ->
//! Differencing -> Completed`. Every step works on data already in memory, so
//! there are no retries: invalid column pairs are dropped up front, a cancelled
//! run stops with [`ReconError::Cancelled`], and everything else completes.

use crate::dataset::{ColumnPair, Dataset, DatasetSide, DroppedColumnPair, ResolvedPairs};
use crate::diff::{MismatchRecord, RowDiffer, RowType, DEFAULT_MIN_SIGNIFICANCE};
use crate::error::{ReconError, Result};
use crate::hash::{DigestAlgorithm, HashComputer};
use crate::matching::{match_buckets, BucketBuilder, ChunkProgress, HashBucket, MatchResult};
use crate::normalize::{Normalizer, NormalizerOptions};
use crate::quality::{column_statistics, ColumnStructure, QualityProfile};
use crate::report::match_rate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_MAX_DETAILED_MISMATCHES: usize = 5000;
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// States of a reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    Initialized,
    NormalizingAndHashing,
    Matched,
    Differencing,
    Completed,
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconcilePhase::Initialized => "initialization",
            ReconcilePhase::NormalizingAndHashing => "normalizing and hashing",
            ReconcilePhase::Matched => "matching",
            ReconcilePhase::Differencing => "differencing",
            ReconcilePhase::Completed => "completion",
        };
        write!(f, "{name}")
    }
}

/// Cooperative cancellation flag shared between the caller and a running reconciliation
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress information during reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileProgress {
    pub phase: ReconcilePhase,
    pub processed_rows: usize,
    pub total_rows: usize,
    pub message: String,
}

pub type ProgressCallback = Arc<dyn Fn(&ReconcileProgress) + Send + Sync>;

/// Options for a single reconciliation run
#[derive(Clone)]
pub struct ReconcileOptions {
    /// Unmatched rows that get a full column diff; the rest are reported by index only
    pub max_detailed_mismatches: usize,
    pub digest_algorithm: DigestAlgorithm,
    /// Rows hashed or diffed between cancellation checks
    pub chunk_size: usize,
    pub parallel: bool,
    /// Differences scoring below this are not reported
    pub min_significance: u8,
    /// Refuse datasets with more rows than this
    pub max_rows_per_side: Option<usize>,
    pub normalizer: NormalizerOptions,
    pub cancellation: CancellationToken,
    pub progress: Option<ProgressCallback>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_detailed_mismatches: DEFAULT_MAX_DETAILED_MISMATCHES,
            digest_algorithm: DigestAlgorithm::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallel: true,
            min_significance: DEFAULT_MIN_SIGNIFICANCE,
            max_rows_per_side: None,
            normalizer: NormalizerOptions::default(),
            cancellation: CancellationToken::new(),
            progress: None,
        }
    }
}

impl fmt::Debug for ReconcileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileOptions")
            .field("max_detailed_mismatches", &self.max_detailed_mismatches)
            .field("digest_algorithm", &self.digest_algorithm)
            .field("chunk_size", &self.chunk_size)
            .field("parallel", &self.parallel)
            .field("min_significance", &self.min_significance)
            .field("max_rows_per_side", &self.max_rows_per_side)
            .field("normalizer", &self.normalizer)
            .field("cancellation", &self.cancellation)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl ReconcileOptions {
    pub fn with_max_detailed_mismatches(mut self, max: usize) -> Self {
        self.max_detailed_mismatches = max;
        self
    }

    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_min_significance(mut self, min_significance: u8) -> Self {
        self.min_significance = min_significance;
        self
    }

    pub fn with_max_rows_per_side(mut self, limit: usize) -> Self {
        self.max_rows_per_side = Some(limit);
        self
    }

    pub fn with_normalizer(mut self, normalizer: NormalizerOptions) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ReconcileProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ReconError::invalid_input("chunk_size must be greater than zero"));
        }
        if !(1..=10).contains(&self.min_significance) {
            return Err(ReconError::invalid_input(format!(
                "min_significance must be between 1 and 10, got {}",
                self.min_significance
            )));
        }
        if self.max_rows_per_side == Some(0) {
            return Err(ReconError::invalid_input("max_rows_per_side must be greater than zero"));
        }
        Ok(())
    }

    fn report(
        &self,
        phase: ReconcilePhase,
        processed_rows: usize,
        total_rows: usize,
        message: impl Into<String>,
    ) {
        if let Some(callback) = &self.progress {
            callback(&ReconcileProgress {
                phase,
                processed_rows,
                total_rows,
                message: message.into(),
            });
        }
    }
}

/// Identity of one reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub engine_version: String,
    pub digest_algorithm: DigestAlgorithm,
}

impl RunMeta {
    fn start(digest_algorithm: DigestAlgorithm) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            engine_version: crate::ENGINE_VERSION.to_string(),
            digest_algorithm,
        }
    }
}

/// Everything a run produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub meta: RunMeta,
    pub source_rows: usize,
    pub target_rows: usize,
    pub common_row_count: usize,
    pub source_only_count: usize,
    pub target_only_count: usize,
    /// Every source-only row, ascending, including rows past the detail cap
    pub source_only_row_indices: Vec<usize>,
    pub target_only_row_indices: Vec<usize>,
    /// Detailed records for at most `max_detailed_mismatches` rows, source-only first
    pub mismatch_records: Vec<MismatchRecord>,
    pub mismatches_truncated: bool,
    /// Percentage of source rows with a match, two decimals
    pub match_rate: f64,
    pub column_pairs: Vec<ColumnPair>,
    pub dropped_column_pairs: Vec<DroppedColumnPair>,
    /// Set when no column pair could be resolved; all counts are zero
    pub no_comparable_columns: bool,
    pub warnings: Vec<String>,
    pub quality: Option<QualityProfile>,
}

impl ReconciliationResult {
    pub fn unmatched_count(&self) -> usize {
        self.source_only_count + self.target_only_count
    }

    pub fn is_fully_reconciled(&self) -> bool {
        !self.no_comparable_columns && self.unmatched_count() == 0
    }

    /// Records for one side
    pub fn records(&self, row_type: RowType) -> impl Iterator<Item = &MismatchRecord> {
        self.mismatch_records.iter().filter(move |r| r.row_type == row_type)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs reconciliations with a fixed set of options
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    pub fn reconcile<S, T>(
        &self,
        source: &S,
        target: &T,
        pairs: &[ColumnPair],
    ) -> Result<ReconciliationResult>
    where
        S: Dataset + ?Sized,
        T: Dataset + ?Sized,
    {
        let options = &self.options;
        options.validate()?;

        let meta = RunMeta::start(options.digest_algorithm);
        let source_rows = source.row_count();
        let target_rows = target.row_count();
        log::info!(
            "Starting reconciliation run {} ({source_rows} source rows, \
             {target_rows} target rows, {} column pairs)",
            meta.run_id,
            pairs.len()
        );

        check_row_limit(DatasetSide::Source, source_rows, options.max_rows_per_side)?;
        check_row_limit(DatasetSide::Target, target_rows, options.max_rows_per_side)?;

        // Initialized
        let (resolved, dropped) = ResolvedPairs::resolve(source, target, pairs);
        let mut warnings = Vec::new();
        for d in &dropped {
            let message = format!(
                "Dropped column pair '{}' -> '{}': {}",
                d.pair.source_column, d.pair.target_column, d.reason
            );
            log::warn!("{message}");
            warnings.push(message);
        }
        options.report(
            ReconcilePhase::Initialized,
            0,
            source_rows + target_rows,
            format!("{} of {} column pairs usable", resolved.len(), pairs.len()),
        );

        if resolved.is_empty() {
            let message =
                "No comparable columns: every column pair references a missing column".to_string();
            log::warn!("{message}");
            warnings.push(message);
            options.report(ReconcilePhase::Completed, 0, 0, "Nothing to compare");
            return Ok(ReconciliationResult {
                meta,
                source_rows,
                target_rows,
                common_row_count: 0,
                source_only_count: 0,
                target_only_count: 0,
                source_only_row_indices: Vec::new(),
                target_only_row_indices: Vec::new(),
                mismatch_records: Vec::new(),
                mismatches_truncated: false,
                match_rate: 0.0,
                column_pairs: Vec::new(),
                dropped_column_pairs: dropped,
                no_comparable_columns: true,
                warnings,
                quality: None,
            });
        }

        // NormalizingAndHashing
        let normalizer = Normalizer::new(options.normalizer);
        let computer = HashComputer::new(options.digest_algorithm, normalizer);
        let (source_bucket, target_bucket) =
            self.build_buckets(source, target, &resolved, &computer)?;

        // Matched
        let matched = match_buckets(&source_bucket, &target_bucket);
        options.report(
            ReconcilePhase::Matched,
            source_rows + target_rows,
            source_rows + target_rows,
            format!(
                "{} common rows, {} source-only, {} target-only",
                matched.common_row_count, matched.source_only_count, matched.target_only_count
            ),
        );
        let columns = column_statistics(source, target, &resolved, normalizer, options.parallel);
        let quality = QualityProfile::new(
            &source_bucket,
            &target_bucket,
            ColumnStructure::compare(source, target),
            columns,
        );
        drop(source_bucket);
        drop(target_bucket);

        // Differencing
        let (mismatch_records, mismatches_truncated) = if matched.unmatched_count() == 0 {
            log::info!("All rows matched, skipping differencing");
            (Vec::new(), false)
        } else {
            let differ = RowDiffer::new(source, target, &resolved, normalizer)
                .with_min_significance(options.min_significance);
            self.diff_unmatched(&differ, &matched)?
        };
        if mismatches_truncated {
            let message = format!(
                "{} unmatched rows exceed the detail limit of {}; \
                 remaining rows are reported by index only",
                matched.unmatched_count(),
                options.max_detailed_mismatches
            );
            log::warn!("{message}");
            warnings.push(message);
        }

        let result = ReconciliationResult {
            meta,
            source_rows,
            target_rows,
            common_row_count: matched.common_row_count,
            source_only_count: matched.source_only_count,
            target_only_count: matched.target_only_count,
            source_only_row_indices: matched.source_only_rows(),
            target_only_row_indices: matched.target_only_rows(),
            mismatch_records,
            mismatches_truncated,
            match_rate: match_rate(matched.common_row_count, source_rows),
            column_pairs: resolved.column_pairs(),
            dropped_column_pairs: dropped,
            no_comparable_columns: false,
            warnings,
            quality: Some(quality),
        };

        log::info!(
            "Reconciliation complete: {} common, {} source-only, {} target-only, match rate {:.2}%",
            result.common_row_count,
            result.source_only_count,
            result.target_only_count,
            result.match_rate
        );
        options.report(
            ReconcilePhase::Completed,
            result.unmatched_count(),
            result.unmatched_count(),
            "Reconciliation complete",
        );

        Ok(result)
    }

    fn build_buckets<S, T>(
        &self,
        source: &S,
        target: &T,
        pairs: &ResolvedPairs,
        computer: &HashComputer,
    ) -> Result<(HashBucket, HashBucket)>
    where
        S: Dataset + ?Sized,
        T: Dataset + ?Sized,
    {
        let options = &self.options;
        let builder = BucketBuilder::new(
            computer,
            options.chunk_size,
            options.parallel,
            &options.cancellation,
        );
        let source_columns = pairs.indices(DatasetSide::Source);
        let target_columns = pairs.indices(DatasetSide::Target);

        let on_source = |p: ChunkProgress| {
            options.report(
                ReconcilePhase::NormalizingAndHashing,
                p.processed_rows,
                p.total_rows,
                "Hashing source rows",
            )
        };
        let on_target = |p: ChunkProgress| {
            options.report(
                ReconcilePhase::NormalizingAndHashing,
                p.processed_rows,
                p.total_rows,
                "Hashing target rows",
            )
        };

        log::info!(
            "Building hash buckets with {} over {} columns",
            computer.algorithm(),
            pairs.len()
        );
        let (source_bucket, target_bucket) = if options.parallel {
            rayon::join(
                || builder.build(source, source_columns, &on_source),
                || builder.build(target, target_columns, &on_target),
            )
        } else {
            (
                builder.build(source, source_columns, &on_source),
                builder.build(target, target_columns, &on_target),
            )
        };
        let (source_bucket, target_bucket) = (source_bucket?, target_bucket?);

        log::info!(
            "Built hash buckets: source {} distinct of {} rows, target {} distinct of {} rows",
            source_bucket.distinct(),
            source_bucket.total_rows(),
            target_bucket.distinct(),
            target_bucket.total_rows()
        );

        Ok((source_bucket, target_bucket))
    }

    fn diff_unmatched<S, T>(
        &self,
        differ: &RowDiffer<'_, S, T>,
        matched: &MatchResult,
    ) -> Result<(Vec<MismatchRecord>, bool)>
    where
        S: Dataset + ?Sized,
        T: Dataset + ?Sized,
    {
        let options = &self.options;
        let cap = options.max_detailed_mismatches;
        let source_take = matched.source_only.len().min(cap);
        let target_take = matched.target_only.len().min(cap - source_take);
        let total = source_take + target_take;
        let truncated = matched.unmatched_count() > total;

        options.report(
            ReconcilePhase::Differencing,
            0,
            total,
            format!("Diffing {total} of {} unmatched rows", matched.unmatched_count()),
        );

        let mut records = differ.diff_rows(
            RowType::SourceOnly,
            &matched.source_only[..source_take],
            options.chunk_size,
            options.parallel,
            &options.cancellation,
        )?;
        options.report(
            ReconcilePhase::Differencing,
            records.len(),
            total,
            "Diffed source-only rows",
        );

        records.extend(differ.diff_rows(
            RowType::TargetOnly,
            &matched.target_only[..target_take],
            options.chunk_size,
            options.parallel,
            &options.cancellation,
        )?);
        options.report(
            ReconcilePhase::Differencing,
            records.len(),
            total,
            "Diffed target-only rows",
        );

        Ok((records, truncated))
    }
}

fn check_row_limit(side: DatasetSide, rows: usize, limit: Option<usize>) -> Result<()> {
    match limit {
        Some(limit) if rows > limit => Err(ReconError::ResourceLimit {
            side: side.to_string(),
            rows,
            limit,
        }),
        _ => Ok(()),
    }
}

/// Reconcile `source` against `target` over `pairs`
pub fn reconcile<S, T>(
    source: &S,
    target: &T,
    pairs: &[ColumnPair],
    options: ReconcileOptions,
) -> Result<ReconciliationResult>
where
    S: Dataset + ?Sized,
    T: Dataset + ?Sized,
{
    Reconciler::new(options).reconcile(source, target, pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Table;
    use std::sync::Mutex;

    fn table(rows: &[[&str; 2]]) -> Table {
        Table::from_rows(["id", "name"], rows.iter().map(|r| r.to_vec())).unwrap()
    }

    fn both() -> Vec<ColumnPair> {
        vec![ColumnPair::same("id"), ColumnPair::same("name")]
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        assert!(ReconcileOptions::default().validate().is_ok());
        assert!(ReconcileOptions::default().with_chunk_size(0).validate().is_err());
        assert!(ReconcileOptions::default().with_min_significance(0).validate().is_err());
        assert!(ReconcileOptions::default().with_min_significance(11).validate().is_err());
        assert!(ReconcileOptions::default().with_max_rows_per_side(0).validate().is_err());
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ReconcilePhase::NormalizingAndHashing.to_string(), "normalizing and hashing");
        assert_eq!(
            ReconError::Cancelled {
                phase: ReconcilePhase::Differencing
            }
            .to_string(),
            "Reconciliation cancelled during differencing"
        );
    }

    #[test]
    fn test_detail_cap_prefers_source_rows() {
        let source = table(&[["1", "a"], ["2", "b"], ["3", "c"]]);
        let target = table(&[["4", "d"], ["5", "e"]]);
        let options = ReconcileOptions::default().with_max_detailed_mismatches(4);

        let result = reconcile(&source, &target, &both(), options).unwrap();

        assert_eq!(result.source_only_count, 3);
        assert_eq!(result.target_only_count, 2);
        assert_eq!(result.mismatch_records.len(), 4);
        assert!(result.mismatches_truncated);
        assert_eq!(result.records(RowType::SourceOnly).count(), 3);
        assert_eq!(result.records(RowType::TargetOnly).count(), 1);
        assert_eq!(result.target_only_row_indices, vec![0, 1]);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_zero_cap_reports_indices_only() {
        let source = table(&[["1", "a"]]);
        let target = table(&[["2", "b"]]);
        let options = ReconcileOptions::default().with_max_detailed_mismatches(0);

        let result = reconcile(&source, &target, &both(), options).unwrap();
        assert!(result.mismatch_records.is_empty());
        assert!(result.mismatches_truncated);
        assert_eq!(result.source_only_row_indices, vec![0]);
    }

    #[test]
    fn test_row_limit_is_a_distinct_error() {
        let source = table(&[["1", "a"], ["2", "b"]]);
        let target = table(&[["1", "a"]]);
        let options = ReconcileOptions::default().with_max_rows_per_side(1);

        let err = reconcile(&source, &target, &both(), options).unwrap_err();
        match err {
            ReconError::ResourceLimit { side, rows, limit } => {
                assert_eq!(side, "source");
                assert_eq!(rows, 2);
                assert_eq!(limit, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_progress_walks_through_phases() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = ReconcileOptions::default()
            .with_chunk_size(1)
            .with_parallel(false)
            .with_progress(move |p| sink.lock().unwrap().push(p.phase));

        let source = table(&[["1", "a"], ["2", "b"]]);
        let target = table(&[["1", "a"]]);
        reconcile(&source, &target, &both(), options).unwrap();

        let phases = seen.lock().unwrap().clone();
        assert_eq!(phases.first(), Some(&ReconcilePhase::Initialized));
        assert_eq!(phases.last(), Some(&ReconcilePhase::Completed));
        let hashing = phases
            .iter()
            .filter(|p| **p == ReconcilePhase::NormalizingAndHashing)
            .count();
        assert_eq!(hashing, 3);
        assert!(phases.contains(&ReconcilePhase::Matched));
        assert!(phases.contains(&ReconcilePhase::Differencing));
    }

    #[test]
    fn test_differencing_skipped_when_everything_matches() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options =
            ReconcileOptions::default().with_progress(move |p| sink.lock().unwrap().push(p.phase));

        let rows = table(&[["1", "a"], ["2", "b"]]);
        let result = reconcile(&rows, &rows, &both(), options).unwrap();

        assert!(result.is_fully_reconciled());
        assert_eq!(result.match_rate, 100.0);
        assert!(!seen.lock().unwrap().contains(&ReconcilePhase::Differencing));
    }

    #[test]
    fn test_cancelled_run() {
        let token = CancellationToken::new();
        token.cancel();
        let options = ReconcileOptions::default().with_cancellation(token);
        let rows = table(&[["1", "a"]]);

        let err = reconcile(&rows, &rows, &both(), options).unwrap_err();
        assert!(matches!(
            err,
            ReconError::Cancelled {
                phase: ReconcilePhase::NormalizingAndHashing
            }
        ));
    }

    #[test]
    fn test_run_meta() {
        let rows = table(&[["1", "a"]]);
        let options = ReconcileOptions::default().with_digest_algorithm(DigestAlgorithm::Sha256);
        let result = reconcile(&rows, &rows, &both(), options).unwrap();
        assert_eq!(result.meta.engine_version, crate::ENGINE_VERSION);
        assert_eq!(result.meta.digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(result.meta.run_id.get_version_num(), 4);
    }
}
