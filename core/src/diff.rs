//! Row differ and significance scorer for unmatched rows
//!
//! Unmatched rows have no true counterpart. For display, each one is compared
//! with the row at the same index on the other side, when such a row exists. That
//! pairing is a positional guess and every record says so through
//! [`MismatchRecord::is_positional_guess`].

use crate::dataset::{
    display_row, display_value_truncated, row_values, CellValue, Dataset, DatasetSide,
    ResolvedPairs,
};
use crate::error::{ReconError, Result};
use crate::matching::UnmatchedRow;
use crate::normalize::{CanonicalValue, Normalizer};
use crate::reconcile::{CancellationToken, ReconcilePhase};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Differences scoring below this are dropped by default
pub const DEFAULT_MIN_SIGNIFICANCE: u8 = 3;

pub const NO_SIGNIFICANT_DIFFERENCES: &str = "No significant differences found";

/// Strings longer than this on both sides count as long-text differences
const LONG_TEXT_CHARS: usize = 10;

/// Which side an unmatched row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowType {
    SourceOnly,
    TargetOnly,
}

impl RowType {
    pub fn side(self) -> DatasetSide {
        match self {
            RowType::SourceOnly => DatasetSide::Source,
            RowType::TargetOnly => DatasetSide::Target,
        }
    }
}

impl From<DatasetSide> for RowType {
    fn from(side: DatasetSide) -> Self {
        match side {
            DatasetSide::Source => RowType::SourceOnly,
            DatasetSide::Target => RowType::TargetOnly,
        }
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowType::SourceOnly => write!(f, "source_only"),
            RowType::TargetOnly => write!(f, "target_only"),
        }
    }
}

/// One column that disagrees between an unmatched row and its display counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDifference {
    /// Source column name
    pub column: String,
    pub target_column: String,
    pub source_raw: String,
    pub target_raw: String,
    pub source_canonical: String,
    pub target_canonical: String,
    /// 1..=10
    pub significance: u8,
}

impl ColumnDifference {
    pub fn summary(&self) -> String {
        format!("{}: '{}' ≠ '{}'", self.column, self.source_raw, self.target_raw)
    }
}

/// Detailed report for one source-only or target-only row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MismatchRecord {
    /// 0-based index on the row's own side
    pub row_index: usize,
    /// Spreadsheet-style row number (index + 2)
    pub display_row: usize,
    pub row_type: RowType,
    /// Row at the same index on the other side, if any
    pub counterpart_index: Option<usize>,
    /// True whenever a counterpart was picked by position rather than by content
    pub is_positional_guess: bool,
    /// The row's fingerprint is shared with the other side but all its matches were used
    pub is_duplicate_excess: bool,
    pub fingerprint: String,
    /// Retained differences, most significant first
    pub differences: Vec<ColumnDifference>,
    pub summary: String,
    pub source_values: Option<IndexMap<String, String>>,
    pub target_values: Option<IndexMap<String, String>>,
}

impl MismatchRecord {
    pub fn max_significance(&self) -> Option<u8> {
        self.differences.iter().map(|d| d.significance).max()
    }
}

/// Score how meaningful a difference between two cells is, from 1 (noise) to 10
///
/// `source_raw` / `target_raw` are the raw cell texts, with null cells as empty strings.
pub fn score_significance(
    source_raw: &str,
    target_raw: &str,
    source: &CanonicalValue,
    target: &CanonicalValue,
) -> u8 {
    if source.is_null_equivalent() && target.is_null_equivalent() {
        return 1;
    }

    let left = source_raw.trim();
    let right = target_raw.trim();
    if left.to_lowercase() == right.to_lowercase() {
        return 2;
    }

    if let (Some(a), Some(b)) = (source.as_number(), target.as_number()) {
        let pct = (a - b).abs() / a.abs().max(1.0) * 100.0;
        return if pct > 10.0 {
            8
        } else if pct > 1.0 {
            5
        } else {
            3
        };
    }

    if !left.is_empty()
        && !right.is_empty()
        && left.chars().count() > LONG_TEXT_CHARS
        && right.chars().count() > LONG_TEXT_CHARS
    {
        return 7;
    }

    4
}

/// Join retained differences into a one-line summary
pub fn summarize(differences: &[ColumnDifference]) -> String {
    if differences.is_empty() {
        return NO_SIGNIFICANT_DIFFERENCES.to_string();
    }
    differences
        .iter()
        .map(ColumnDifference::summary)
        .collect::<Vec<_>>()
        .join("; ")
}

fn raw_text(value: Option<&CellValue>) -> String {
    match value {
        None | Some(CellValue::Null) => String::new(),
        Some(v) => v.to_string(),
    }
}

/// Produces [`MismatchRecord`]s for unmatched rows
pub struct RowDiffer<'a, S: ?Sized, T: ?Sized> {
    source: &'a S,
    target: &'a T,
    pairs: &'a ResolvedPairs,
    normalizer: Normalizer,
    min_significance: u8,
}

impl<'a, S, T> RowDiffer<'a, S, T>
where
    S: Dataset + ?Sized,
    T: Dataset + ?Sized,
{
    pub fn new(
        source: &'a S,
        target: &'a T,
        pairs: &'a ResolvedPairs,
        normalizer: Normalizer,
    ) -> Self {
        Self {
            source,
            target,
            pairs,
            normalizer,
            min_significance: DEFAULT_MIN_SIGNIFICANCE,
        }
    }

    pub fn with_min_significance(mut self, min_significance: u8) -> Self {
        self.min_significance = min_significance;
        self
    }

    /// Compare source row `source_row` with target row `target_row` over every column pair
    pub fn diff_pair(&self, source_row: usize, target_row: usize) -> Vec<ColumnDifference> {
        let mut differences: Vec<ColumnDifference> = self
            .pairs
            .iter()
            .filter_map(|pair| {
                let source_cell = self.source.cell(source_row, pair.source_index);
                let target_cell = self.target.cell(target_row, pair.target_index);
                let source_canonical = self.normalizer.normalize(source_cell);
                let target_canonical = self.normalizer.normalize(target_cell);
                // kinds may differ for the same value, e.g. identifier vs number digits
                if source_canonical.value == target_canonical.value {
                    return None;
                }

                let significance = score_significance(
                    &raw_text(source_cell),
                    &raw_text(target_cell),
                    &source_canonical,
                    &target_canonical,
                );
                if significance < self.min_significance {
                    return None;
                }

                Some(ColumnDifference {
                    column: pair.pair.source_column.clone(),
                    target_column: pair.pair.target_column.clone(),
                    source_raw: display_value_truncated(source_cell),
                    target_raw: display_value_truncated(target_cell),
                    source_canonical: source_canonical.value,
                    target_canonical: target_canonical.value,
                    significance,
                })
            })
            .collect();

        // stable: ties keep column-pair order
        differences.sort_by(|a, b| b.significance.cmp(&a.significance));
        differences
    }

    /// Build the record for one unmatched row
    pub fn diff_row(&self, row_type: RowType, row: &UnmatchedRow) -> MismatchRecord {
        let side = row_type.side();
        let other_count = match side {
            DatasetSide::Source => self.target.row_count(),
            DatasetSide::Target => self.source.row_count(),
        };
        let counterpart_index = (row.row_index < other_count).then_some(row.row_index);

        let (source_row, target_row) = match side {
            DatasetSide::Source => (Some(row.row_index), counterpart_index),
            DatasetSide::Target => (counterpart_index, Some(row.row_index)),
        };

        let (differences, summary) = match (source_row, target_row) {
            (Some(s), Some(t)) => {
                let differences = self.diff_pair(s, t);
                let summary = summarize(&differences);
                (differences, summary)
            }
            _ => (Vec::new(), format!("No {} row at the same position", side.other())),
        };

        MismatchRecord {
            row_index: row.row_index,
            display_row: display_row(row.row_index),
            row_type,
            counterpart_index,
            is_positional_guess: counterpart_index.is_some(),
            is_duplicate_excess: row.duplicate_excess,
            fingerprint: row.fingerprint.short(),
            differences,
            summary,
            source_values: source_row
                .and_then(|r| row_values(self.source, r, self.pairs.indices(DatasetSide::Source))),
            target_values: target_row
                .and_then(|r| row_values(self.target, r, self.pairs.indices(DatasetSide::Target))),
        }
    }

    /// Diff a batch of unmatched rows in chunks, checking for cancellation between chunks
    ///
    /// Output order follows `rows` regardless of `parallel`.
    pub fn diff_rows(
        &self,
        row_type: RowType,
        rows: &[UnmatchedRow],
        chunk_size: usize,
        parallel: bool,
        cancellation: &CancellationToken,
    ) -> Result<Vec<MismatchRecord>> {
        let mut records = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(chunk_size.max(1)) {
            if cancellation.is_cancelled() {
                return Err(ReconError::Cancelled {
                    phase: ReconcilePhase::Differencing,
                });
            }
            if parallel {
                records.par_extend(chunk.par_iter().map(|row| self.diff_row(row_type, row)));
            } else {
                records.extend(chunk.iter().map(|row| self.diff_row(row_type, row)));
            }
        }

        if log::log_enabled!(log::Level::Debug) {
            let with_differences = records.iter().filter(|r| !r.differences.is_empty()).count();
            log::debug!(
                "Diffed {} {row_type} rows, {with_differences} with significant differences",
                records.len()
            );
        }

        Ok(records)
    }
}
