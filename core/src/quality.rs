//! Row-count and data-quality checks for a run
//!
//! Null and duplicate counts come from the hash buckets. Column structure and
//! per-column statistics are computed from canonical values of the compared pairs.

use crate::dataset::{display_row, ColumnPair, Dataset, ResolvedPair, ResolvedPairs};
use crate::matching::HashBucket;
use crate::normalize::{CanonicalKind, CanonicalValue, Normalizer};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Display rows sampled per side from duplicated fingerprints
pub const DUPLICATE_SAMPLE_SIZE: usize = 3;

/// Most frequent values kept per side for categorical columns
pub const TOP_VALUE_COUNT: usize = 5;

/// A numeric statistic differing by more than this percentage is flagged
pub const STATISTIC_TOLERANCE_PERCENT: f64 = 10.0;

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64 * 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowCountCheck {
    pub source_rows: usize,
    pub target_rows: usize,
    pub difference: usize,
    /// Difference relative to the larger side
    pub percentage_difference: f64,
    pub counts_match: bool,
}

impl RowCountCheck {
    pub fn new(source_rows: usize, target_rows: usize) -> Self {
        let difference = source_rows.abs_diff(target_rows);
        let check = Self {
            source_rows,
            target_rows,
            difference,
            percentage_difference: percentage(difference, source_rows.max(target_rows)),
            counts_match: difference == 0,
        };

        if check.counts_match {
            log::info!("Row counts match: {source_rows} rows on each side");
        } else if source_rows > target_rows {
            log::warn!(
                "Source has {difference} more rows than target ({:.2}%)",
                check.percentage_difference
            );
        } else {
            log::warn!(
                "Target has {difference} more rows than source ({:.2}%)",
                check.percentage_difference
            );
        }

        check
    }
}

/// Null and duplicate statistics for one side over the compared columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideProfile {
    pub rows: usize,
    pub null_cells: usize,
    pub null_percentage: f64,
    /// Rows whose normalized content repeats an earlier row
    pub duplicate_rows: usize,
    /// Display row numbers of a few rows involved in duplication
    pub duplicate_sample_rows: Vec<usize>,
}

impl SideProfile {
    pub fn from_bucket(bucket: &HashBucket, column_count: usize) -> Self {
        let rows = bucket.total_rows();
        let null_cells = bucket.null_cells();

        let mut duplicated: Vec<usize> = bucket
            .iter()
            .filter(|(_, entry)| entry.count > 1)
            .flat_map(|(_, entry)| entry.row_indices.iter().copied())
            .collect();
        duplicated.sort_unstable();

        Self {
            rows,
            null_cells,
            null_percentage: percentage(null_cells, rows * column_count),
            duplicate_rows: bucket.duplicate_rows(),
            duplicate_sample_rows: duplicated
                .into_iter()
                .take(DUPLICATE_SAMPLE_SIZE)
                .map(display_row)
                .collect(),
        }
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Column counts and names present on only one side, compared case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnStructure {
    pub source_columns: usize,
    pub target_columns: usize,
    pub column_counts_match: bool,
    pub missing_in_target: Vec<String>,
    pub missing_in_source: Vec<String>,
}

impl ColumnStructure {
    pub fn compare<S, T>(source: &S, target: &T) -> Self
    where
        S: Dataset + ?Sized,
        T: Dataset + ?Sized,
    {
        let source_names = source.column_names();
        let target_names = target.column_names();
        let source_lower: HashSet<String> = source_names.iter().map(|c| c.to_lowercase()).collect();
        let target_lower: HashSet<String> = target_names.iter().map(|c| c.to_lowercase()).collect();

        let missing_in_target: Vec<String> = source_names
            .iter()
            .filter(|c| !target_lower.contains(&c.to_lowercase()))
            .cloned()
            .collect();
        let missing_in_source: Vec<String> = target_names
            .iter()
            .filter(|c| !source_lower.contains(&c.to_lowercase()))
            .cloned()
            .collect();

        let structure = Self {
            source_columns: source_names.len(),
            target_columns: target_names.len(),
            column_counts_match: source_names.len() == target_names.len(),
            missing_in_target,
            missing_in_source,
        };

        if !structure.column_counts_match {
            log::warn!(
                "Column count mismatch: source {}, target {}",
                structure.source_columns,
                structure.target_columns
            );
        }
        if !structure.missing_in_target.is_empty() {
            log::warn!("Columns missing in target: {:?}", structure.missing_in_target);
        }
        if !structure.missing_in_source.is_empty() {
            log::warn!("Columns missing in source: {:?}", structure.missing_in_source);
        }

        structure
    }

    pub fn column_names_match(&self) -> bool {
        self.missing_in_target.is_empty() && self.missing_in_source.is_empty()
    }
}

/// Min, max, mean and sample standard deviation of the numeric values in a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

impl NumericSummary {
    fn from_values(values: &[CanonicalValue]) -> Self {
        let numbers: Vec<f64> = values.iter().filter_map(CanonicalValue::as_number).collect();
        let count = numbers.len();
        if count == 0 {
            return Self {
                count,
                min: None,
                max: None,
                mean: None,
                std: None,
            };
        }

        let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
        let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = numbers.iter().sum::<f64>() / count as f64;
        let std = (count > 1).then(|| {
            let squares: f64 = numbers.iter().map(|v| (v - mean).powi(2)).sum();
            (squares / (count - 1) as f64).sqrt()
        });

        Self {
            count,
            min: Some(round6(min)),
            max: Some(round6(max)),
            mean: Some(round6(mean)),
            std: std.map(round6),
        }
    }

    fn statistic(&self, name: &str) -> Option<f64> {
        match name {
            "min" => self.min,
            "max" => self.max,
            "mean" => self.mean,
            _ => None,
        }
    }
}

/// A numeric statistic that moved by more than [`STATISTIC_TOLERANCE_PERCENT`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticDifference {
    pub statistic: String,
    pub source_value: f64,
    pub target_value: f64,
    pub difference_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericComparison {
    pub source: NumericSummary,
    pub target: NumericSummary,
    pub differences: Vec<StatisticDifference>,
}

impl NumericComparison {
    fn new(source: NumericSummary, target: NumericSummary) -> Self {
        let differences = ["min", "max", "mean"]
            .into_iter()
            .filter_map(|name| {
                let source_value = source.statistic(name)?;
                let target_value = target.statistic(name)?;
                if source_value == 0.0 {
                    return None;
                }
                let difference_percent =
                    (source_value - target_value).abs() / source_value.abs() * 100.0;
                (difference_percent > STATISTIC_TOLERANCE_PERCENT).then(|| StatisticDifference {
                    statistic: name.to_string(),
                    source_value,
                    target_value,
                    difference_percent: round2(difference_percent),
                })
            })
            .collect();

        Self {
            source,
            target,
            differences,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// Distinct canonical values of a column and the most frequent ones
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalSummary {
    pub unique_values: usize,
    pub top_values: Vec<ValueCount>,
}

impl CategoricalSummary {
    fn from_values(values: &[CanonicalValue]) -> Self {
        let mut counts: IndexMap<&str, usize> = IndexMap::new();
        for value in values.iter().filter(|v| !v.is_null_equivalent()) {
            *counts.entry(value.as_str()).or_insert(0) += 1;
        }

        let unique_values = counts.len();
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        Self {
            unique_values,
            top_values: ranked
                .into_iter()
                .take(TOP_VALUE_COUNT)
                .map(|(value, count)| ValueCount {
                    value: value.to_string(),
                    count,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalComparison {
    pub source: CategoricalSummary,
    pub target: CategoricalSummary,
    pub unique_match: bool,
}

/// Statistics for one compared column pair
///
/// A column is numeric when every non-null source value normalized to a number;
/// anything else is profiled as categorical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub pair: ColumnPair,
    pub source_nulls: usize,
    pub target_nulls: usize,
    pub numeric: Option<NumericComparison>,
    pub categorical: Option<CategoricalComparison>,
    pub statistics_match: bool,
}

impl ColumnStatistics {
    pub fn compute<S, T>(
        source: &S,
        target: &T,
        pair: &ResolvedPair,
        normalizer: &Normalizer,
    ) -> Self
    where
        S: Dataset + ?Sized,
        T: Dataset + ?Sized,
    {
        let source_values = canonical_column(source, pair.source_index, normalizer);
        let target_values = canonical_column(target, pair.target_index, normalizer);
        Self::from_values(pair.pair.clone(), &source_values, &target_values)
    }

    fn from_values(pair: ColumnPair, source: &[CanonicalValue], target: &[CanonicalValue]) -> Self {
        let nulls =
            |values: &[CanonicalValue]| values.iter().filter(|v| v.is_null_equivalent()).count();
        let numeric_column = source.iter().any(|v| v.kind == CanonicalKind::Number)
            && source
                .iter()
                .all(|v| v.is_null_equivalent() || v.kind == CanonicalKind::Number);

        let (numeric, categorical) = if numeric_column {
            let comparison = NumericComparison::new(
                NumericSummary::from_values(source),
                NumericSummary::from_values(target),
            );
            (Some(comparison), None)
        } else {
            let source = CategoricalSummary::from_values(source);
            let target = CategoricalSummary::from_values(target);
            let comparison = CategoricalComparison {
                unique_match: source.unique_values == target.unique_values,
                source,
                target,
            };
            (None, Some(comparison))
        };

        let statistics_match = numeric.as_ref().map_or(true, |n| n.differences.is_empty())
            && categorical.as_ref().map_or(true, |c| c.unique_match);
        if !statistics_match {
            log::warn!(
                "Column statistics differ for '{}' -> '{}'",
                pair.source_column,
                pair.target_column
            );
        }

        Self {
            pair,
            source_nulls: nulls(source),
            target_nulls: nulls(target),
            numeric,
            categorical,
            statistics_match,
        }
    }
}

fn canonical_column<D>(dataset: &D, column: usize, normalizer: &Normalizer) -> Vec<CanonicalValue>
where
    D: Dataset + ?Sized,
{
    (0..dataset.row_count())
        .map(|row| normalizer.normalize(dataset.cell(row, column)))
        .collect()
}

/// Statistics for every resolved pair, one column pair per task when `parallel`
pub fn column_statistics<S, T>(
    source: &S,
    target: &T,
    pairs: &ResolvedPairs,
    normalizer: Normalizer,
    parallel: bool,
) -> Vec<ColumnStatistics>
where
    S: Dataset + ?Sized,
    T: Dataset + ?Sized,
{
    let pairs: Vec<&ResolvedPair> = pairs.iter().collect();
    let compute =
        |pair: &&ResolvedPair| ColumnStatistics::compute(source, target, pair, &normalizer);
    if parallel {
        pairs.par_iter().map(compute).collect()
    } else {
        pairs.iter().map(compute).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub row_counts: RowCountCheck,
    pub structure: ColumnStructure,
    pub source: SideProfile,
    pub target: SideProfile,
    pub nulls_match: bool,
    pub duplicates_match: bool,
    pub columns: Vec<ColumnStatistics>,
    pub statistics_match: bool,
}

impl QualityProfile {
    pub fn new(
        source: &HashBucket,
        target: &HashBucket,
        structure: ColumnStructure,
        columns: Vec<ColumnStatistics>,
    ) -> Self {
        let column_count = columns.len();
        let source_profile = SideProfile::from_bucket(source, column_count);
        let target_profile = SideProfile::from_bucket(target, column_count);

        log::info!(
            "Null cells: source {} ({:.2}%), target {} ({:.2}%)",
            source_profile.null_cells,
            source_profile.null_percentage,
            target_profile.null_cells,
            target_profile.null_percentage
        );
        log::info!(
            "Duplicate rows (normalized): source {}, target {}",
            source_profile.duplicate_rows,
            target_profile.duplicate_rows
        );

        Self {
            row_counts: RowCountCheck::new(source.total_rows(), target.total_rows()),
            structure,
            nulls_match: source_profile.null_cells == target_profile.null_cells,
            duplicates_match: source_profile.duplicate_rows == target_profile.duplicate_rows,
            source: source_profile,
            target: target_profile,
            statistics_match: columns.iter().all(|c| c.statistics_match),
            columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Table;
    use crate::hash::HashComputer;

    #[test]
    fn test_row_count_check() {
        let check = RowCountCheck::new(100, 80);
        assert_eq!(check.difference, 20);
        assert_eq!(check.percentage_difference, 20.0);
        assert!(!check.counts_match);

        let check = RowCountCheck::new(3, 7);
        assert_eq!(check.percentage_difference, 57.14);

        let empty = RowCountCheck::new(0, 0);
        assert!(empty.counts_match);
        assert_eq!(empty.percentage_difference, 0.0);
    }

    #[test]
    fn test_side_profile_duplicates() {
        let computer = HashComputer::default();
        let mut bucket = HashBucket::new();
        for (i, v) in ["a", "b", "a", "c", "b", "a"].iter().enumerate() {
            bucket.add_row(i, computer.digest([*v]));
        }

        let profile = SideProfile::from_bucket(&bucket, 2);
        assert_eq!(profile.rows, 6);
        assert_eq!(profile.duplicate_rows, 3);
        assert_eq!(profile.duplicate_sample_rows, vec![2, 3, 4]);
        assert_eq!(profile.null_percentage, 0.0);
    }

    fn canonical(values: &[&str]) -> Vec<CanonicalValue> {
        let normalizer = Normalizer::default();
        values.iter().map(|v| normalizer.normalize_str(v)).collect()
    }

    #[test]
    fn test_numeric_statistics_flag_large_shifts() {
        let source = canonical(&["10", "20", "$30.00", ""]);
        let target = canonical(&["10", "20", "90", "NaN"]);

        let stats = ColumnStatistics::from_values(ColumnPair::same("amount"), &source, &target);

        assert_eq!(stats.source_nulls, 1);
        assert_eq!(stats.target_nulls, 1);
        assert!(stats.categorical.is_none());
        let numeric = stats.numeric.as_ref().unwrap();
        assert_eq!(numeric.source.count, 3);
        assert_eq!(numeric.source.min, Some(10.0));
        assert_eq!(numeric.source.max, Some(30.0));
        assert_eq!(numeric.source.mean, Some(20.0));
        assert_eq!(numeric.source.std, Some(10.0));
        let flagged: Vec<_> = numeric.differences.iter().map(|d| d.statistic.as_str()).collect();
        assert_eq!(flagged, vec!["max", "mean"]);
        assert_eq!(numeric.differences[0].difference_percent, 200.0);
        assert!(!stats.statistics_match);
    }

    #[test]
    fn test_small_numeric_drift_is_tolerated() {
        let source = canonical(&["100", "200"]);
        let target = canonical(&["105", "200"]);

        let stats = ColumnStatistics::from_values(ColumnPair::same("amount"), &source, &target);

        assert!(stats.numeric.unwrap().differences.is_empty());
        assert!(stats.statistics_match);
    }

    #[test]
    fn test_categorical_statistics() {
        let source = canonical(&["Red", "red ", "blue", "green", "a", "b", "c", ""]);
        let target = canonical(&["red", "blue", "blue"]);

        let stats = ColumnStatistics::from_values(ColumnPair::same("colour"), &source, &target);

        assert!(stats.numeric.is_none());
        let categorical = stats.categorical.as_ref().unwrap();
        assert_eq!(categorical.source.unique_values, 6);
        assert_eq!(categorical.target.unique_values, 2);
        assert_eq!(categorical.source.top_values.len(), TOP_VALUE_COUNT);
        assert_eq!(
            categorical.source.top_values[0],
            ValueCount {
                value: "red".to_string(),
                count: 2
            }
        );
        // ties are ordered by value
        assert_eq!(categorical.source.top_values[1].value, "a");
        assert_eq!(categorical.target.top_values[0].value, "blue");
        assert!(!categorical.unique_match);
        assert!(!stats.statistics_match);
    }

    #[test]
    fn test_column_structure_is_case_insensitive() {
        let source = Table::new(["ID", "Name", "Email"]);
        let target = Table::new(["id", "name", "phone", "city"]);

        let structure = ColumnStructure::compare(&source, &target);

        assert_eq!(structure.source_columns, 3);
        assert_eq!(structure.target_columns, 4);
        assert!(!structure.column_counts_match);
        assert_eq!(structure.missing_in_target, vec!["Email"]);
        assert_eq!(structure.missing_in_source, vec!["phone", "city"]);
        assert!(!structure.column_names_match());
    }

    #[test]
    fn test_column_statistics_parallel_matches_sequential() {
        let source = Table::from_rows(
            ["id", "amount"],
            vec![vec!["1", "10"], vec!["2", "20"], vec!["3", "30"]],
        )
        .unwrap();
        let target =
            Table::from_rows(["id", "amount"], vec![vec!["1", "10"], vec!["2", "20"]]).unwrap();
        let (pairs, _) = ResolvedPairs::resolve(
            &source,
            &target,
            &[ColumnPair::same("id"), ColumnPair::same("amount")],
        );

        let parallel = column_statistics(&source, &target, &pairs, Normalizer::default(), true);
        let sequential = column_statistics(&source, &target, &pairs, Normalizer::default(), false);

        assert_eq!(parallel, sequential);
        assert_eq!(parallel.len(), 2);
        assert_eq!(parallel[1].pair, ColumnPair::same("amount"));
        assert_eq!(parallel[1].numeric.as_ref().unwrap().target.mean, Some(15.0));
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(0.004), 0.0);
    }
}
