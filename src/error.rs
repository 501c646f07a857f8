//! Error taxonomy for the import pipeline.
//!
//! Row-level corruption never shows up here: it is resolved by deleting or
//! repairing rows and surfaces only as inaccuracy text. What remains are the
//! hard failures a caller must react to immediately.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::converter::ConverterState;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("'{operation}' called while the converter is {state}; call is_convertable first")]
    ExecutionOrder {
        operation: &'static str,
        state: ConverterState,
    },

    #[error("an import session is already open")]
    SessionAlreadyOpen,

    #[error("no import session is open")]
    SessionNotOpen,

    #[error("unknown import format '{0}'")]
    UnknownFormat(String),

    #[error("structurally invalid input: {0}")]
    Structural(String),

    #[error("column '{column}' of table '{table}' has {actual} row(s), expected {expected}")]
    ColumnLength {
        table: String,
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("repair of column(s) {columns} failed")]
    RepairFailed { columns: String },

    #[error("calculation of column(s) {columns} failed")]
    CalculationFailed { columns: String },

    #[error("unable to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to decode text with encoding {0}")]
    Decode(&'static str),
}
