//! Column-major tables used both as source working buffers and as the
//! unified import output.
//!
//! A [`Table`] stores one `Vec<Cell>` per named column. Source tables are
//! loaded as raw text and then overwritten in place by column repair, so the
//! same structure carries raw strings before repair and typed values after.
//! [`SourceSet`] groups the primary per-sample table with any auxiliary
//! metadata tables of a multi-file format.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    data::{Cell, Value, cell_display},
    error::ImportError,
};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    name: String,
    headers: Vec<String>,
    columns: Vec<Vec<Cell>>,
    rows: usize,
}

impl Table {
    /// Creates an empty table of `rows` rows and no columns.
    pub fn with_row_count(name: impl Into<String>, rows: usize) -> Self {
        Self {
            name: name.into(),
            headers: Vec::new(),
            columns: Vec::new(),
            rows,
        }
    }

    /// Builds a table from raw text rows. Empty fields become the null
    /// sentinel; short rows are padded with nulls.
    pub fn from_text_rows(
        name: impl Into<String>,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        let row_count = rows.len();
        let mut columns = vec![Vec::with_capacity(row_count); headers.len()];
        for row in rows {
            let mut fields = row.into_iter();
            for column in columns.iter_mut() {
                let cell = fields
                    .next()
                    .filter(|field| !field.is_empty())
                    .map(Value::String);
                column.push(cell);
            }
        }
        let headers = headers
            .into_iter()
            .map(|header| header.trim().to_string())
            .collect();
        Self {
            name: name.into(),
            headers,
            columns,
            rows: row_count,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&[Cell]> {
        self.column_index(name)
            .map(|idx| self.columns[idx].as_slice())
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Vec<Cell>> {
        let idx = self.column_index(name)?;
        Some(&mut self.columns[idx])
    }

    /// Adds a column or replaces an existing one of the same name.
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) -> Result<(), ImportError> {
        if values.len() != self.rows {
            return Err(ImportError::ColumnLength {
                table: self.name.clone(),
                column: name.to_string(),
                expected: self.rows,
                actual: values.len(),
            });
        }
        match self.column_index(name) {
            Some(idx) => self.columns[idx] = values,
            None => {
                self.headers.push(name.to_string());
                self.columns.push(values);
            }
        }
        Ok(())
    }

    /// Rearranges columns into `order`; columns not listed are dropped and
    /// listed columns that are absent are added as all-null.
    pub fn arrange_columns(&mut self, order: &[&str]) {
        let mut columns = Vec::with_capacity(order.len());
        for name in order {
            let values = match self.column_index(name) {
                Some(idx) => std::mem::take(&mut self.columns[idx]),
                None => vec![None; self.rows],
            };
            columns.push(values);
        }
        self.headers = order.iter().map(|name| name.to_string()).collect();
        self.columns = columns;
    }

    /// Deletes the given rows once, keeping the relative order of the rest.
    pub fn delete_rows(&mut self, rows: &BTreeSet<usize>) {
        if rows.is_empty() {
            return;
        }
        for column in &mut self.columns {
            let mut idx = 0usize;
            column.retain(|_| {
                let keep = !rows.contains(&idx);
                idx += 1;
                keep
            });
        }
        self.rows -= rows.iter().filter(|&&row| row < self.rows).count();
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        self.column(column).and_then(|values| values.get(row))
    }

    /// Row `idx` rendered as text fields in header order.
    pub fn display_row(&self, idx: usize) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| column.get(idx).map(cell_display).unwrap_or_default())
            .collect()
    }
}

/// The working set of source tables for one conversion attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSet {
    primary: Table,
    auxiliary: BTreeMap<String, Table>,
}

impl SourceSet {
    pub fn new(primary: Table) -> Self {
        Self {
            primary,
            auxiliary: BTreeMap::new(),
        }
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.insert(table);
        self
    }

    /// Adds an auxiliary table. A table named like the primary replaces it.
    pub fn insert(&mut self, table: Table) {
        if table.name() == self.primary.name() {
            self.primary = table;
        } else {
            self.auxiliary.insert(table.name().to_string(), table);
        }
    }

    pub fn primary(&self) -> &Table {
        &self.primary
    }

    pub fn primary_mut(&mut self) -> &mut Table {
        &mut self.primary
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        if name == self.primary.name() {
            Some(&self.primary)
        } else {
            self.auxiliary.get(name)
        }
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Table> {
        if name == self.primary.name() {
            Some(&mut self.primary)
        } else {
            self.auxiliary.get_mut(name)
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&[Cell]> {
        self.get(table).and_then(|t| t.column(column))
    }

    pub fn column_mut(&mut self, table: &str, column: &str) -> Option<&mut Vec<Cell>> {
        self.get_mut(table).and_then(|t| t.column_mut(column))
    }

    pub fn row_count(&self) -> usize {
        self.primary.row_count()
    }
}
