//! End-to-end reconciliation tests

mod common;

use chrono::NaiveDate;
use common::{customers, init_logging, same_pairs, text_table, typed_table};
use tabrecon_core::dataset::DropReason;
use tabrecon_core::report::{page_rows, render_mismatch_table, render_summary};
use tabrecon_core::{
    reconcile, CellValue, ColumnPair, DigestAlgorithm, NormalizerOptions, ReconcileOptions,
    ReconciliationResult, RowType,
};

fn run(
    source: &tabrecon_core::Table,
    target: &tabrecon_core::Table,
    pairs: &[ColumnPair],
) -> ReconciliationResult {
    reconcile(source, target, pairs, ReconcileOptions::default()).expect("reconcile failed")
}

#[test]
fn test_case_and_whitespace_rows_match() {
    init_logging();
    let source = text_table(&["id", "name"], &[&["1", "Bob "]]);
    let target = text_table(&["id", "name"], &[&["1", "bob"]]);

    let result = run(&source, &target, &[ColumnPair::same("name")]);

    assert_eq!(result.common_row_count, 1);
    assert_eq!(result.source_only_count, 0);
    assert_eq!(result.target_only_count, 0);
    assert!(result.mismatch_records.is_empty());
    assert!(result.is_fully_reconciled());
}

#[test]
fn test_extra_source_row() {
    init_logging();
    let rows: &[&[&str]] = &[&["1", "a"], &["2", "b"], &["3", "c"]];
    let target = text_table(&["id", "name"], rows);
    let source = text_table(&["id", "name"], &[&["1", "a"], &["2", "b"], &["3", "c"], &["4", "d"]]);

    let result = run(&source, &target, &same_pairs(&["id", "name"]));

    assert_eq!(result.common_row_count, 3);
    assert_eq!(result.source_only_count, 1);
    assert_eq!(result.target_only_count, 0);
    assert_eq!(result.source_only_row_indices, vec![3]);
    assert_eq!(result.match_rate, 75.0);

    let record = &result.mismatch_records[0];
    assert_eq!(record.row_type, RowType::SourceOnly);
    assert_eq!(record.display_row, 5);
    assert_eq!(record.counterpart_index, None);
    assert!(!record.is_positional_guess);
    assert_eq!(record.summary, "No target row at the same position");
}

#[test]
fn test_numeric_change_is_significant() {
    init_logging();
    let source = text_table(&["id", "name", "amount"], &[&["1", "Widget", "100"]]);
    let target = text_table(&["id", "name", "amount"], &[&["1", "Widget", "150"]]);

    let result = run(&source, &target, &same_pairs(&["id", "name", "amount"]));

    assert_eq!(result.common_row_count, 0);
    assert_eq!(result.source_only_count, 1);
    assert_eq!(result.target_only_count, 1);

    let record = result.records(RowType::SourceOnly).next().unwrap();
    assert!(record.is_positional_guess);
    assert_eq!(record.counterpart_index, Some(0));
    assert_eq!(record.differences.len(), 1);
    let difference = &record.differences[0];
    assert_eq!(difference.column, "amount");
    assert_eq!(difference.significance, 8);
    assert_eq!(record.summary, "amount: '100' ≠ '150'");

    let mirror = result.records(RowType::TargetOnly).next().unwrap();
    assert_eq!(mirror.differences[0].significance, 8);
}

#[test]
fn test_duplicates_are_matched_as_a_multiset() {
    init_logging();
    let source = text_table(&["v"], &[&["A"], &["A"], &["B"]]);
    let target = text_table(&["v"], &[&["A"]]);

    let result = run(&source, &target, &same_pairs(&["v"]));
    assert_eq!(result.common_row_count, 1);
    assert_eq!(result.source_only_count, 2);
    assert_eq!(result.target_only_count, 0);
    assert_eq!(result.source_only_row_indices, vec![1, 2]);
    assert!(result.mismatch_records[0].is_duplicate_excess);
    assert!(!result.mismatch_records[1].is_duplicate_excess);

    let reversed = run(&target, &source, &same_pairs(&["v"]));
    assert_eq!(reversed.common_row_count, result.common_row_count);
    assert_eq!(reversed.target_only_count, result.source_only_count);

    let quality = result.quality.as_ref().unwrap();
    assert_eq!(quality.source.duplicate_rows, 1);
    assert_eq!(quality.source.duplicate_sample_rows, vec![2, 3]);
    assert!(!quality.duplicates_match);
}

#[test]
fn test_differently_formatted_datasets_reconcile() {
    init_logging();
    let source = customers();
    let target = typed_table(
        &["customer_email", "customer_id", "full_name", "total", "joined_on"],
        vec![
            vec![
                "Carol@Example.com ".into(),
                CellValue::Int(3),
                "CAROL   WHITE".into(),
                CellValue::Float(0.0),
                CellValue::Date(NaiveDate::from_ymd_opt(2023, 3, 1).unwrap()),
            ],
            vec![
                "alice@example.com".into(),
                "0001".into(),
                "alice smith".into(),
                CellValue::Float(1234.5),
                CellValue::Int(1_673_740_800_000),
            ],
            vec![
                "bob@example.com".into(),
                CellValue::Int(2),
                "Bob Jones".into(),
                "99".into(),
                "2023-02-15".into(),
            ],
        ],
    );
    let pairs = vec![
        ColumnPair::new("id", "customer_id"),
        ColumnPair::new("name", "full_name"),
        ColumnPair::new("email", "customer_email"),
        ColumnPair::new("amount", "total"),
        ColumnPair::new("joined", "joined_on"),
    ];

    // joined_on holds millisecond timestamps
    let options = ReconcileOptions::default().with_normalizer(NormalizerOptions {
        epoch_timestamps: true,
        ..Default::default()
    });
    let result = reconcile(&source, &target, &pairs, options).unwrap();

    assert_eq!(result.common_row_count, 3);
    assert!(result.is_fully_reconciled());
    assert_eq!(result.match_rate, 100.0);
    assert_eq!(result.column_pairs, pairs);
}

#[test]
fn test_null_only_differences_never_reported() {
    init_logging();
    let source = text_table(&["id", "name", "note"], &[&["1", "Anna", ""]]);
    let target = text_table(&["id", "name", "note"], &[&["1", "Hannah", "   "]]);

    let result = run(&source, &target, &same_pairs(&["id", "name", "note"]));

    for record in &result.mismatch_records {
        assert!(record.differences.iter().all(|d| d.column != "note"));
        assert!(record.differences.iter().all(|d| d.significance >= 3));
    }
    let record = &result.mismatch_records[0];
    assert_eq!(record.differences.len(), 1);
    assert_eq!(record.differences[0].column, "name");
    assert_eq!(record.differences[0].significance, 4);
}

#[test]
fn test_blank_and_empty_cells_match() {
    init_logging();
    let source = text_table(&["id", "note"], &[&["1", ""], &["2", "N/A"]]);
    let target = text_table(&["id", "note"], &[&["1", "   "], &["2", ""]]);

    let result = run(&source, &target, &same_pairs(&["id", "note"]));

    assert_eq!(result.common_row_count, 2);
    assert!(result.is_fully_reconciled());
}

#[test]
fn test_typed_and_text_cells_of_one_value_match() {
    init_logging();
    let source = typed_table(
        &["account", "opened", "phone"],
        vec![vec![
            CellValue::Int(447_911_123_456),
            CellValue::Int(20230115),
            "555-123-4567".into(),
        ]],
    );
    let target = text_table(
        &["account", "opened", "phone"],
        &[&["447911123456", "2023-01-15", "5551234567"]],
    );

    let result = run(&source, &target, &same_pairs(&["account", "opened", "phone"]));

    assert_eq!(result.common_row_count, 1);
    assert!(result.is_fully_reconciled());
}

#[test]
fn test_only_differing_canonical_values_are_reported() {
    init_logging();
    let source = text_table(&["phone", "amount"], &[&["555-123-4567", "100"]]);
    let target = text_table(&["phone", "amount"], &[&["5551234567", "150"]]);

    let result = run(&source, &target, &same_pairs(&["phone", "amount"]));

    let record = &result.mismatch_records[0];
    assert_eq!(record.differences.len(), 1);
    assert_eq!(record.differences[0].column, "amount");
}

#[test]
fn test_dropped_pairs_are_reported() {
    init_logging();
    let source = text_table(&["id", "name"], &[&["1", "a"]]);
    let target = text_table(&["id", "label"], &[&["1", "a"]]);
    let pairs = vec![ColumnPair::same("id"), ColumnPair::same("name")];

    let result = run(&source, &target, &pairs);

    assert!(!result.no_comparable_columns);
    assert_eq!(result.column_pairs, vec![ColumnPair::same("id")]);
    assert_eq!(result.dropped_column_pairs.len(), 1);
    assert_eq!(result.dropped_column_pairs[0].reason, DropReason::MissingTargetColumn);
    assert_eq!(result.common_row_count, 1);
    assert!(result.warnings.iter().any(|w| w.contains("name")));
}

#[test]
fn test_quality_profile_covers_columns() {
    init_logging();
    let source = text_table(
        &["id", "amount", "status", "legacy"],
        &[&["1", "100", "open", "x"], &["2", "200", "closed", "y"], &["3", "300", "open", "z"]],
    );
    let target = text_table(
        &["ID", "amount", "status", "region"],
        &[&["1", "100", "open", "eu"], &["2", "200", "open", "us"], &["3", "900", "open", "eu"]],
    );
    let pairs = vec![
        ColumnPair::new("id", "ID"),
        ColumnPair::same("amount"),
        ColumnPair::same("status"),
    ];

    let result = run(&source, &target, &pairs);
    let quality = result.quality.as_ref().unwrap();

    assert!(quality.structure.column_counts_match);
    assert_eq!(quality.structure.missing_in_target, vec!["legacy"]);
    assert_eq!(quality.structure.missing_in_source, vec!["region"]);

    assert_eq!(quality.columns.len(), 3);
    assert!(quality.columns[0].statistics_match);
    let amount = quality.columns[1].numeric.as_ref().unwrap();
    assert_eq!(amount.target.max, Some(900.0));
    assert_eq!(amount.differences.len(), 2);
    let status = quality.columns[2].categorical.as_ref().unwrap();
    assert_eq!(status.source.unique_values, 2);
    assert_eq!(status.target.unique_values, 1);
    assert!(!quality.statistics_match);

    let summary = render_summary(&result);
    assert!(summary.contains("└─ Columns: source 4, target 4"));
    assert!(summary.contains("Missing in target: legacy"));
    assert!(summary.contains("Statistics differ: amount"));
}

#[test]
fn test_no_comparable_columns_is_flagged() {
    init_logging();
    let source = text_table(&["a"], &[&["1"]]);
    let target = text_table(&["b"], &[&["1"]]);

    let result = run(&source, &target, &[ColumnPair::same("a")]);

    assert!(result.no_comparable_columns);
    assert!(!result.is_fully_reconciled());
    assert_eq!(result.common_row_count, 0);
    assert_eq!(result.source_only_count, 0);
    assert_eq!(result.target_only_count, 0);
    assert_eq!(result.dropped_column_pairs.len(), 1);
    assert!(result.quality.is_none());
    assert!(render_summary(&result).contains("No comparable columns"));
}

#[test]
fn test_parallel_and_sequential_runs_agree() {
    init_logging();
    let rows: Vec<Vec<String>> = (0..500)
        .map(|i| vec![(i % 37).to_string(), format!("name {}", i % 11)])
        .collect();
    let source = tabrecon_core::Table::from_rows(["k", "v"], rows.clone()).unwrap();
    let target = tabrecon_core::Table::from_rows(["k", "v"], rows.into_iter().skip(50)).unwrap();
    let pairs = same_pairs(&["k", "v"]);

    let parallel = reconcile(
        &source,
        &target,
        &pairs,
        ReconcileOptions::default().with_chunk_size(64),
    )
    .unwrap();
    let sequential = reconcile(
        &source,
        &target,
        &pairs,
        ReconcileOptions::default()
            .with_parallel(false)
            .with_digest_algorithm(DigestAlgorithm::Sha256),
    )
    .unwrap();

    assert_eq!(parallel.common_row_count, 450);
    assert_eq!(parallel.common_row_count, sequential.common_row_count);
    assert_eq!(parallel.source_only_row_indices, sequential.source_only_row_indices);
    assert_eq!(parallel.target_only_row_indices, sequential.target_only_row_indices);
    assert_eq!(parallel.mismatch_records.len(), sequential.mismatch_records.len());
    for (a, b) in parallel.mismatch_records.iter().zip(&sequential.mismatch_records) {
        assert_eq!(a.row_index, b.row_index);
        assert_eq!(a.differences, b.differences);
    }
}

#[test]
fn test_result_serializes_to_json() {
    init_logging();
    let source = text_table(&["id", "amount"], &[&["1", "100"], &["2", "5"]]);
    let target = text_table(&["id", "amount"], &[&["1", "150"]]);

    let result = run(&source, &target, &same_pairs(&["id", "amount"]));
    let json = result.to_json_pretty().unwrap();

    assert!(json.contains("\"row_type\": \"source_only\""));
    assert!(json.contains("\"is_positional_guess\": true"));
    let parsed: ReconciliationResult = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, result);
}

#[test]
fn test_rendering_and_paging() {
    init_logging();
    let source = text_table(&["id"], &[&["1"], &["2"], &["3"], &["4"], &["5"]]);
    let target = text_table(&["id"], &[&["9"]]);

    let result = run(&source, &target, &same_pairs(&["id"]));

    let summary = render_summary(&result);
    assert!(summary.contains("├─ Source-only rows: 5"));
    assert!(summary.contains("├─ Match rate: 0.00%"));

    let table = render_mismatch_table(&result, 2);
    assert!(table.contains("source_only"));
    assert!(table.contains("... 4 more records"));
    assert!(table.contains("~2"));

    let page = page_rows(&result.source_only_row_indices, 2, 2).unwrap();
    assert_eq!(page.rows, vec![2, 3]);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.display_rows(), vec![4, 5]);
}
