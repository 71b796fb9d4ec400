// SPDX-License-Identifier: MIT

//! Tabular sample model.
//!
//! Ring stores hold sequences of tables: named columns, string cells, and a
//! per-column `sense` annotation distinguishing absolute values from
//! monotonic counters. The cascade sampler reduces runs of tables that
//! share identical column metadata.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("row has {got} cells, table has {want} columns")]
    RowWidth { got: usize, want: usize },
    #[error("empty table text")]
    Empty,
}

/// How a column's values behave over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnSense {
    /// Point-in-time absolute value.
    #[default]
    Abs,
    /// Monotonic counter; differences carry the information.
    Cnt,
}

impl ColumnSense {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnSense::Abs => "abs",
            ColumnSense::Cnt => "cnt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub sense: ColumnSense,
}

impl Column {
    pub fn abs(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sense: ColumnSense::Abs,
        }
    }

    pub fn cnt(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sense: ColumnSense::Cnt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                got: row.len(),
                want: self.columns.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.columns.iter().position(|c| c.name == column)?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// Parse tab-separated text: a header line of column names, an optional
    /// `#sense` line of per-column annotations, then one row per line.
    pub fn from_tsv(text: &str) -> Result<Self, TableError> {
        let mut lines = text.lines().filter(|l| !l.is_empty());
        let header = lines.next().ok_or(TableError::Empty)?;
        let mut table = Table::new(header.split('\t').map(Column::abs).collect());

        let mut rest = lines.peekable();
        if let Some(line) = rest.peek() {
            if let Some(senses) = line.strip_prefix("#sense\t") {
                for (col, sense) in table.columns.iter_mut().zip(senses.split('\t')) {
                    if sense == "cnt" {
                        col.sense = ColumnSense::Cnt;
                    }
                }
                rest.next();
            }
        }

        for line in rest {
            table.push_row(line.split('\t').map(str::to_string).collect())?;
        }
        Ok(table)
    }

    /// Emit tab-separated text in the shape `from_tsv` accepts. The
    /// `#sense` line is included only when some column is a counter.
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        out.push_str(&names.join("\t"));
        out.push('\n');
        if self.columns.iter().any(|c| c.sense == ColumnSense::Cnt) {
            out.push_str("#sense\t");
            let senses: Vec<&str> = self.columns.iter().map(|c| c.sense.as_str()).collect();
            out.push_str(&senses.join("\t"));
            out.push('\n');
        }
        for row in &self.rows {
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        out
    }

    /// Column metadata equality defines span membership in the cascade
    /// sampler.
    pub fn same_shape(&self, other: &Table) -> bool {
        self.columns == other.columns
    }
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod tests;
