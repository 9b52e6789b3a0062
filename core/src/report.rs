//! Summaries, pagination and plain-text rendering of reconciliation results

use crate::dataset::{display_row, truncate_display};
use crate::diff::MismatchRecord;
use crate::error::{ReconError, Result};
use crate::quality::{round2, QualityProfile, SideProfile};
use crate::reconcile::ReconciliationResult;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Percentage of source rows that found a match, rounded to two decimals
pub fn match_rate(common_row_count: usize, source_rows: usize) -> f64 {
    if source_rows == 0 {
        return 0.0;
    }
    round2(common_row_count as f64 / source_rows as f64 * 100.0)
}

/// One page of row indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowPage {
    pub rows: Vec<usize>,
    /// 1-based
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_rows: usize,
    /// 1-based position of the first row on this page, 0 when empty
    pub start_index: usize,
    /// 1-based position of the last row on this page, 0 when empty
    pub end_index: usize,
}

impl RowPage {
    /// Display row numbers of the rows on this page
    pub fn display_rows(&self) -> Vec<usize> {
        self.rows.iter().copied().map(display_row).collect()
    }
}

/// Slice sorted row indices into a page; out-of-range pages are clamped
pub fn page_rows(indices: &[usize], page: usize, page_size: usize) -> Result<RowPage> {
    if page_size == 0 {
        return Err(ReconError::invalid_input("page_size must be greater than zero"));
    }

    let mut sorted = indices.to_vec();
    sorted.sort_unstable();

    let total_rows = sorted.len();
    let total_pages = total_rows.div_ceil(page_size).max(1);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * page_size;
    let end = (start + page_size).min(total_rows);
    let rows = sorted.get(start..end).map(<[usize]>::to_vec).unwrap_or_default();

    Ok(RowPage {
        start_index: if rows.is_empty() { 0 } else { start + 1 },
        end_index: end,
        rows,
        page,
        page_size,
        total_pages,
        total_rows,
    })
}

fn tree_prefix(i: usize, len: usize) -> &'static str {
    if i + 1 == len {
        "└─"
    } else {
        "├─"
    }
}

fn write_side(out: &mut String, label: &str, profile: &SideProfile) {
    let indent = "│  ";
    let _ = writeln!(out, "   ├─ {label}");
    let _ = writeln!(
        out,
        "   {indent}├─ Null cells: {} ({:.2}%)",
        profile.null_cells, profile.null_percentage
    );
    let samples = if profile.duplicate_sample_rows.is_empty() {
        String::new()
    } else {
        let rows: Vec<String> = profile
            .duplicate_sample_rows
            .iter()
            .map(|r| format!("Row {r}"))
            .collect();
        format!(" [{}]", rows.join(", "))
    };
    let _ = writeln!(out, "   {indent}└─ Duplicate rows: {}{samples}", profile.duplicate_rows);
}

fn write_columns(out: &mut String, quality: &QualityProfile) {
    let structure = &quality.structure;
    let _ = writeln!(
        out,
        "   └─ Columns: source {}, target {}",
        structure.source_columns, structure.target_columns
    );

    let mut notes = Vec::new();
    if !structure.missing_in_target.is_empty() {
        notes.push(format!("Missing in target: {}", structure.missing_in_target.join(", ")));
    }
    if !structure.missing_in_source.is_empty() {
        notes.push(format!("Missing in source: {}", structure.missing_in_source.join(", ")));
    }
    for stats in quality.columns.iter().filter(|c| !c.statistics_match) {
        notes.push(format!("Statistics differ: {}", stats.pair.source_column));
    }
    for (i, note) in notes.iter().enumerate() {
        let _ = writeln!(out, "      {} {note}", tree_prefix(i, notes.len()));
    }
}

/// Tree-style overview of a run
pub fn render_summary(result: &ReconciliationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Reconciliation {}", result.meta.run_id);
    let _ = writeln!(
        out,
        "├─ Started: {}",
        result.meta.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(
        out,
        "├─ Engine: {} ({})",
        result.meta.engine_version, result.meta.digest_algorithm
    );

    if result.no_comparable_columns {
        let _ = writeln!(out, "└─ No comparable columns");
        for (i, dropped) in result.dropped_column_pairs.iter().enumerate() {
            let _ = writeln!(
                out,
                "   {} {} -> {}: {}",
                tree_prefix(i, result.dropped_column_pairs.len()),
                dropped.pair.source_column,
                dropped.pair.target_column,
                dropped.reason
            );
        }
        return out;
    }

    let _ = writeln!(out, "├─ Rows: source {}, target {}", result.source_rows, result.target_rows);
    let _ = writeln!(out, "├─ Common rows: {}", result.common_row_count);
    let _ = writeln!(out, "├─ Source-only rows: {}", result.source_only_count);
    let _ = writeln!(out, "├─ Target-only rows: {}", result.target_only_count);
    let _ = writeln!(out, "├─ Match rate: {:.2}%", result.match_rate);

    let _ = writeln!(out, "├─ Columns compared: {}", result.column_pairs.len());
    for (i, pair) in result.column_pairs.iter().enumerate() {
        let _ = writeln!(
            out,
            "│  {} {} -> {}",
            tree_prefix(i, result.column_pairs.len()),
            pair.source_column,
            pair.target_column
        );
    }
    if !result.dropped_column_pairs.is_empty() {
        let _ = writeln!(out, "├─ Dropped column pairs: {}", result.dropped_column_pairs.len());
        for (i, dropped) in result.dropped_column_pairs.iter().enumerate() {
            let _ = writeln!(
                out,
                "│  {} {} -> {}: {}",
                tree_prefix(i, result.dropped_column_pairs.len()),
                dropped.pair.source_column,
                dropped.pair.target_column,
                dropped.reason
            );
        }
    }

    let detail = if result.mismatches_truncated {
        format!(
            "{} of {} unmatched rows (limit reached)",
            result.mismatch_records.len(),
            result.unmatched_count()
        )
    } else {
        format!("{} rows", result.mismatch_records.len())
    };

    match &result.quality {
        Some(quality) => {
            let _ = writeln!(out, "├─ Detailed mismatches: {detail}");
            let _ = writeln!(
                out,
                "└─ Data quality: row count difference {} ({:.2}%)",
                quality.row_counts.difference, quality.row_counts.percentage_difference
            );
            write_side(&mut out, "Source", &quality.source);
            write_side(&mut out, "Target", &quality.target);
            write_columns(&mut out, quality);
        }
        None => {
            let _ = writeln!(out, "└─ Detailed mismatches: {detail}");
        }
    }

    out
}

fn cell(text: &str, width: usize) -> String {
    let shown: String = if text.chars().count() > width {
        let cut: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    };
    format!("{shown:<width$}")
}

const TABLE_COLUMNS: [(&str, usize); 6] = [
    ("Row", 7),
    ("Type", 11),
    ("Counterpart", 11),
    ("Max", 3),
    ("Fingerprint", 11),
    ("Differences", 0),
];

fn table_line(values: [&str; 6]) -> String {
    let mut line = String::new();
    for (value, (_, width)) in values.iter().zip(TABLE_COLUMNS.iter()) {
        if *width == 0 {
            line.push_str(value);
        } else {
            line.push_str(&cell(value, *width));
            line.push_str(" │ ");
        }
    }
    line.trim_end().to_string()
}

fn record_line(record: &MismatchRecord) -> String {
    let counterpart = match (record.counterpart_index, record.is_positional_guess) {
        (Some(idx), true) => format!("~{}", display_row(idx)),
        (Some(idx), false) => display_row(idx).to_string(),
        (None, _) => "-".to_string(),
    };
    let max = record
        .max_significance()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let summary = truncate_display(record.summary.clone());
    let row = record.display_row.to_string();
    let row_type = record.row_type.to_string();

    table_line([
        row.as_str(),
        row_type.as_str(),
        counterpart.as_str(),
        max.as_str(),
        record.fingerprint.as_str(),
        summary.as_str(),
    ])
}

/// Table of the first `limit` mismatch records
///
/// Counterparts prefixed with `~` were chosen by row position, not by content.
pub fn render_mismatch_table(result: &ReconciliationResult, limit: usize) -> String {
    if result.mismatch_records.is_empty() {
        return if result.unmatched_count() == 0 {
            "No mismatches found.\n".to_string()
        } else {
            format!(
                "{} unmatched rows, no detailed records available.\n",
                result.unmatched_count()
            )
        };
    }

    let mut out = String::new();
    let header = table_line(TABLE_COLUMNS.map(|(name, _)| name));
    let _ = writeln!(out, "{header}");
    let _ = writeln!(out, "{}", "─".repeat(header.chars().count().max(60)));

    for record in result.mismatch_records.iter().take(limit) {
        let _ = writeln!(out, "{}", record_line(record));
    }

    let shown = limit.min(result.mismatch_records.len());
    if shown < result.mismatch_records.len() {
        let _ = writeln!(out, "... {} more records", result.mismatch_records.len() - shown);
    }
    if result.mismatch_records.iter().take(limit).any(|r| r.is_positional_guess) {
        let _ = writeln!(out, "~ counterpart is the row at the same position, not a content match");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_rate() {
        assert_eq!(match_rate(2, 3), 66.67);
        assert_eq!(match_rate(0, 0), 0.0);
        assert_eq!(match_rate(5, 5), 100.0);
    }

    #[test]
    fn test_page_rows() {
        let indices = vec![9, 1, 5, 3, 7];

        let page = page_rows(&indices, 1, 2).unwrap();
        assert_eq!(page.rows, vec![1, 3]);
        assert_eq!(page.total_pages, 3);
        assert_eq!((page.start_index, page.end_index), (1, 2));
        assert_eq!(page.display_rows(), vec![3, 5]);

        let last = page_rows(&indices, 3, 2).unwrap();
        assert_eq!(last.rows, vec![9]);
        assert_eq!((last.start_index, last.end_index), (5, 5));
    }

    #[test]
    fn test_page_rows_clamps_and_validates() {
        let indices = vec![0, 1, 2];
        assert_eq!(page_rows(&indices, 99, 2).unwrap().page, 2);
        assert_eq!(page_rows(&indices, 0, 2).unwrap().page, 1);
        assert!(matches!(page_rows(&indices, 1, 0), Err(ReconError::InvalidInput(_))));

        let empty = page_rows(&[], 4, 10).unwrap();
        assert_eq!(empty.page, 1);
        assert_eq!(empty.total_pages, 1);
        assert!(empty.rows.is_empty());
        assert_eq!((empty.start_index, empty.end_index), (0, 0));
    }

    #[test]
    fn test_cell_padding_and_truncation() {
        assert_eq!(cell("ab", 4), "ab  ");
        assert_eq!(cell("abcdefgh", 6), "abc...");
    }
}
