//! Multiset row matching over fingerprint buckets

use crate::dataset::Dataset;
use crate::error::{ReconError, Result};
use crate::hash::{HashComputer, RowFingerprint, RowHash};
use crate::reconcile::{CancellationToken, ReconcilePhase};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rows of one dataset that share a fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketEntry {
    pub count: usize,
    pub row_indices: Vec<usize>,
}

/// Fingerprint -> rows map for one dataset, built once per run
#[derive(Debug, Default)]
pub struct HashBucket {
    entries: HashMap<RowFingerprint, BucketEntry>,
    total_rows: usize,
    null_cells: usize,
}

impl HashBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, row_index: usize, fingerprint: RowFingerprint) {
        let entry = self.entries.entry(fingerprint).or_default();
        entry.count += 1;
        entry.row_indices.push(row_index);
        self.total_rows += 1;
    }

    fn add_hash(&mut self, row_index: usize, hash: RowHash) {
        self.add_row(row_index, hash.fingerprint);
        self.null_cells += hash.null_cells;
    }

    pub fn contains(&self, fingerprint: &RowFingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    pub fn get(&self, fingerprint: &RowFingerprint) -> Option<&BucketEntry> {
        self.entries.get(fingerprint)
    }

    pub fn count(&self, fingerprint: &RowFingerprint) -> usize {
        self.entries.get(fingerprint).map_or(0, |e| e.count)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowFingerprint, &BucketEntry)> {
        self.entries.iter()
    }

    /// Number of distinct fingerprints
    pub fn distinct(&self) -> usize {
        self.entries.len()
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    /// Null-equivalent cells seen while hashing
    pub fn null_cells(&self) -> usize {
        self.null_cells
    }

    /// Rows beyond the first of each fingerprint
    pub fn duplicate_rows(&self) -> usize {
        self.entries.values().map(|e| e.count - 1).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A row left without a counterpart after multiset matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmatchedRow {
    pub row_index: usize,
    pub fingerprint: RowFingerprint,
    /// The fingerprint exists on the other side but its rows were all consumed
    pub duplicate_excess: bool,
}

/// Aggregate outcome of matching two buckets
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub common_row_count: usize,
    pub source_only_count: usize,
    pub target_only_count: usize,
    pub shared_fingerprints: usize,
    /// Sorted by row index
    pub source_only: Vec<UnmatchedRow>,
    /// Sorted by row index
    pub target_only: Vec<UnmatchedRow>,
}

impl MatchResult {
    pub fn source_only_rows(&self) -> Vec<usize> {
        self.source_only.iter().map(|r| r.row_index).collect()
    }

    pub fn target_only_rows(&self) -> Vec<usize> {
        self.target_only.iter().map(|r| r.row_index).collect()
    }

    pub fn unmatched_count(&self) -> usize {
        self.source_only_count + self.target_only_count
    }
}

/// Match two buckets with bag semantics
///
/// A fingerprint present `s` times in source and `t` times in target contributes
/// `min(s, t)` common rows; the first `min(s, t)` row indices on each side are the
/// matched ones and the trailing excess is reported as unmatched.
pub fn match_buckets(source: &HashBucket, target: &HashBucket) -> MatchResult {
    let mut result = MatchResult::default();

    for (fingerprint, entry) in source.iter() {
        let matched = entry.count.min(target.count(fingerprint));
        if matched > 0 {
            result.shared_fingerprints += 1;
            result.common_row_count += matched;
        }
        collect_unmatched(&mut result.source_only, fingerprint, entry, matched);
    }

    for (fingerprint, entry) in target.iter() {
        let matched = entry.count.min(source.count(fingerprint));
        collect_unmatched(&mut result.target_only, fingerprint, entry, matched);
    }

    result.source_only.sort_by_key(|r| r.row_index);
    result.target_only.sort_by_key(|r| r.row_index);
    result.source_only_count = result.source_only.len();
    result.target_only_count = result.target_only.len();

    log::info!(
        "Multiset match: {} common over {} shared fingerprints, {} source-only, {} target-only",
        result.common_row_count,
        result.shared_fingerprints,
        result.source_only_count,
        result.target_only_count
    );

    result
}

fn collect_unmatched(
    out: &mut Vec<UnmatchedRow>,
    fingerprint: &RowFingerprint,
    entry: &BucketEntry,
    matched: usize,
) {
    let duplicate_excess = matched > 0;
    out.extend(entry.row_indices.iter().skip(matched).map(|&row_index| UnmatchedRow {
        row_index,
        fingerprint: *fingerprint,
        duplicate_excess,
    }));
}

/// Counts reported after each hashed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkProgress {
    pub processed_rows: usize,
    pub total_rows: usize,
}

/// Builds a [`HashBucket`] in fixed-size chunks, checking for cancellation between chunks
pub struct BucketBuilder<'a> {
    computer: &'a HashComputer,
    chunk_size: usize,
    parallel: bool,
    cancellation: &'a CancellationToken,
}

impl<'a> BucketBuilder<'a> {
    pub fn new(
        computer: &'a HashComputer,
        chunk_size: usize,
        parallel: bool,
        cancellation: &'a CancellationToken,
    ) -> Self {
        Self {
            computer,
            chunk_size: chunk_size.max(1),
            parallel,
            cancellation,
        }
    }

    pub fn build<D: Dataset + ?Sized>(
        &self,
        dataset: &D,
        columns: &[usize],
        on_chunk: &(dyn Fn(ChunkProgress) + Sync),
    ) -> Result<HashBucket> {
        let total_rows = dataset.row_count();
        let mut bucket = HashBucket::new();
        let mut start = 0;

        while start < total_rows {
            if self.cancellation.is_cancelled() {
                return Err(ReconError::Cancelled {
                    phase: ReconcilePhase::NormalizingAndHashing,
                });
            }

            let end = (start + self.chunk_size).min(total_rows);
            let hashes: Vec<RowHash> = if self.parallel {
                (start..end)
                    .into_par_iter()
                    .map(|row| self.computer.hash_row(dataset, row, columns))
                    .collect()
            } else {
                (start..end).map(|row| self.computer.hash_row(dataset, row, columns)).collect()
            };

            for (offset, hash) in hashes.into_iter().enumerate() {
                bucket.add_hash(start + offset, hash);
            }

            on_chunk(ChunkProgress {
                processed_rows: end,
                total_rows,
            });
            start = end;
        }

        Ok(bucket)
    }
}
