//! Common test utilities and fixtures

#![allow(dead_code)]

use tabrecon_core::{CellValue, ColumnPair, Table};

/// Install a test logger once; later calls are no-ops
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Build a table from string cells
pub fn text_table(columns: &[&str], rows: &[&[&str]]) -> Table {
    Table::from_rows(
        columns.iter().copied(),
        rows.iter().map(|row| row.iter().copied()),
    )
    .expect("Failed to build test table")
}

/// Build a table from typed cells
pub fn typed_table(columns: &[&str], rows: Vec<Vec<CellValue>>) -> Table {
    Table::from_rows(columns.iter().copied(), rows).expect("Failed to build test table")
}

/// Pair every listed column with the identically named target column
pub fn same_pairs(columns: &[&str]) -> Vec<ColumnPair> {
    columns.iter().map(|c| ColumnPair::same(*c)).collect()
}

/// Customer rows shared by several scenarios
pub fn customers() -> Table {
    text_table(
        &["id", "name", "email", "amount", "joined"],
        &[
            &["1", "Alice Smith", "alice@example.com", "1,234.50", "2023-01-15"],
            &["2", "Bob Jones", "BOB@example.com", "$99.00", "15/02/2023"],
            &["3", "Carol White", "carol@example.com", "0", "2023/03/01"],
        ],
    )
}
