//! Tabular dataset access for the reconciliation engine
//!
//! The engine never loads data itself. Callers hand over anything implementing
//! [`Dataset`]; [`Table`] is the in-memory implementation used by tests and by
//! callers that already hold rows in memory.

use crate::error::{ReconError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Display values longer than this are truncated
pub const MAX_DISPLAY_CHARS: usize = 100;

/// Offset between a 0-based row index and the row number a spreadsheet user sees
/// (1-based numbering plus one header line)
pub const DISPLAY_ROW_OFFSET: usize = 2;

/// A raw cell value as delivered by the data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Int(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        CellValue::Date(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Null)
    }
}

/// Read-only accessor over a rectangular dataset
pub trait Dataset: Sync {
    /// Ordered column names
    fn column_names(&self) -> &[String];

    /// Number of rows
    fn row_count(&self) -> usize;

    /// Cell at (row, column position); `None` when out of range
    fn cell(&self, row: usize, column: usize) -> Option<&CellValue>;

    /// Position of a column by exact name
    fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names().iter().position(|c| c == name)
    }

    /// Cell at (row, column name)
    fn cell_at(&self, row: usize, column: &str) -> Option<&CellValue> {
        self.column_index(column).and_then(|idx| self.cell(row, idx))
    }
}

/// In-memory, row-major table
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    lookup: HashMap<String, usize>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new<C: Into<String>>(columns: impl IntoIterator<Item = C>) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let lookup = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            columns,
            lookup,
            rows: Vec::new(),
        }
    }

    /// Build a table from columns and rows, rejecting rows of the wrong width
    pub fn from_rows<C, R, V>(
        columns: impl IntoIterator<Item = C>,
        rows: impl IntoIterator<Item = R>,
    ) -> Result<Self>
    where
        C: Into<String>,
        R: IntoIterator<Item = V>,
        V: Into<CellValue>,
    {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row.into_iter().map(Into::into).collect())?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(ReconError::invalid_input(format!(
                "Row {} has {} cells but the table has {} columns",
                self.rows.len(),
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }
}

impl Dataset for Table {
    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn cell(&self, row: usize, column: usize) -> Option<&CellValue> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }
}

/// Which side of the comparison a dataset sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSide {
    Source,
    Target,
}

impl DatasetSide {
    pub fn other(self) -> Self {
        match self {
            DatasetSide::Source => DatasetSide::Target,
            DatasetSide::Target => DatasetSide::Source,
        }
    }
}

impl fmt::Display for DatasetSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSide::Source => write!(f, "source"),
            DatasetSide::Target => write!(f, "target"),
        }
    }
}

/// A source column compared against a target column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnPair {
    pub source_column: String,
    pub target_column: String,
}

impl ColumnPair {
    pub fn new<S: Into<String>, T: Into<String>>(source_column: S, target_column: T) -> Self {
        Self {
            source_column: source_column.into(),
            target_column: target_column.into(),
        }
    }

    /// Pair a column with the identically named column on the other side
    pub fn same<S: Into<String>>(column: S) -> Self {
        let column = column.into();
        Self {
            target_column: column.clone(),
            source_column: column,
        }
    }
}

/// Why a column pair was excluded from matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingSourceColumn,
    MissingTargetColumn,
    MissingBothColumns,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::MissingSourceColumn => write!(f, "source column not found"),
            DropReason::MissingTargetColumn => write!(f, "target column not found"),
            DropReason::MissingBothColumns => write!(f, "column not found on either side"),
        }
    }
}

/// A column pair that could not be used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedColumnPair {
    pub pair: ColumnPair,
    pub reason: DropReason,
}

/// A column pair bound to column positions on both datasets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPair {
    pub pair: ColumnPair,
    pub source_index: usize,
    pub target_index: usize,
}

/// Column pairs that survived resolution, in caller order
#[derive(Debug, Clone, Default)]
pub struct ResolvedPairs {
    pairs: Vec<ResolvedPair>,
    source_indices: Vec<usize>,
    target_indices: Vec<usize>,
}

impl ResolvedPairs {
    /// Bind pairs to both datasets, splitting off the ones that reference missing columns
    pub fn resolve<S, T>(
        source: &S,
        target: &T,
        pairs: &[ColumnPair],
    ) -> (Self, Vec<DroppedColumnPair>)
    where
        S: Dataset + ?Sized,
        T: Dataset + ?Sized,
    {
        let mut resolved = Self::default();
        let mut dropped = Vec::new();

        for pair in pairs {
            let source_index = source.column_index(&pair.source_column);
            let target_index = target.column_index(&pair.target_column);
            match (source_index, target_index) {
                (Some(source_index), Some(target_index)) => {
                    resolved.source_indices.push(source_index);
                    resolved.target_indices.push(target_index);
                    resolved.pairs.push(ResolvedPair {
                        pair: pair.clone(),
                        source_index,
                        target_index,
                    });
                }
                (None, Some(_)) => dropped.push(DroppedColumnPair {
                    pair: pair.clone(),
                    reason: DropReason::MissingSourceColumn,
                }),
                (Some(_), None) => dropped.push(DroppedColumnPair {
                    pair: pair.clone(),
                    reason: DropReason::MissingTargetColumn,
                }),
                (None, None) => dropped.push(DroppedColumnPair {
                    pair: pair.clone(),
                    reason: DropReason::MissingBothColumns,
                }),
            }
        }

        (resolved, dropped)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedPair> {
        self.pairs.iter()
    }

    /// Column positions on one side, in pair order
    pub fn indices(&self, side: DatasetSide) -> &[usize] {
        match side {
            DatasetSide::Source => &self.source_indices,
            DatasetSide::Target => &self.target_indices,
        }
    }

    /// Column names on one side, in pair order
    pub fn names(&self, side: DatasetSide) -> Vec<&str> {
        self.pairs
            .iter()
            .map(|p| match side {
                DatasetSide::Source => p.pair.source_column.as_str(),
                DatasetSide::Target => p.pair.target_column.as_str(),
            })
            .collect()
    }

    pub fn column_pairs(&self) -> Vec<ColumnPair> {
        self.pairs.iter().map(|p| p.pair.clone()).collect()
    }
}

/// Full display string for a cell; nulls render as `NULL`
pub fn display_value(value: Option<&CellValue>) -> String {
    match value {
        None | Some(CellValue::Null) => "NULL".to_string(),
        Some(v) => v.to_string(),
    }
}

/// Display string cut to [`MAX_DISPLAY_CHARS`]
pub fn display_value_truncated(value: Option<&CellValue>) -> String {
    truncate_display(display_value(value))
}

pub(crate) fn truncate_display(text: String) -> String {
    if text.chars().count() > MAX_DISPLAY_CHARS {
        let cut: String = text.chars().take(MAX_DISPLAY_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        text
    }
}

/// Row number as shown to a spreadsheet user
pub fn display_row(row_index: usize) -> usize {
    row_index + DISPLAY_ROW_OFFSET
}

/// Ordered column -> display value map for one row, `None` when the row does not exist
pub fn row_values<D: Dataset + ?Sized>(
    dataset: &D,
    row: usize,
    columns: &[usize],
) -> Option<IndexMap<String, String>> {
    if row >= dataset.row_count() {
        return None;
    }
    let names = dataset.column_names();
    let values = columns
        .iter()
        .filter_map(|&col| {
            names
                .get(col)
                .map(|name| (name.clone(), display_value_truncated(dataset.cell(row, col))))
        })
        .collect();
    Some(values)
}
