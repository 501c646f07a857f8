//! Conversion of one source format into the unified table.
//!
//! [`DataConverter`] drives the calculators a [`SourceFormat`] provides
//! through an explicit state machine:
//!
//! ```text
//! Unvalidated --is_convertable--> Validated --convert_to_data--> Converted
//!      |
//!      +------is_convertable----> Rejected
//! ```
//!
//! `is_convertable` performs the structural check and asks every calculator
//! whether its column is repairable. `search_inaccuracies` enumerates fatal
//! and repairable rows and renders them as text. `convert_to_data` deletes the
//! fatal rows once, repairs the source in dependency order and assembles the
//! unified table.
//!
//! Rows the format marks irrelevant are trimmed before any calculator looks
//! at the source, so they never count as trajectory neighbours.

use std::{borrow::Cow, fmt};

use itertools::Itertools;
use log::{debug, info, warn};

use crate::{
    calculator::{ColumnCalculator, TokenDictionary},
    column::Column,
    data::Value,
    error::ImportError,
    io_utils::DEFAULT_CSV_DELIMITER,
    repair::RowSet,
    table::{SourceSet, Table},
};

const MAX_LISTED_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterState {
    Unvalidated,
    Validated,
    Converted,
    Rejected,
}

impl fmt::Display for ConverterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConverterState::Unvalidated => "unvalidated",
            ConverterState::Validated => "validated",
            ConverterState::Converted => "converted",
            ConverterState::Rejected => "rejected",
        };
        f.write_str(label)
    }
}

/// One table a format reads and the columns it cannot do without.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRole {
    pub name: &'static str,
    /// File-stem suffix for multi-file formats, matched as `<n>_<suffix>`.
    pub file_suffix: Option<&'static str>,
    pub required_columns: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    /// The per-sample table, read in chunks.
    pub primary: TableRole,
    /// Small metadata tables loaded once per session.
    pub auxiliary: Vec<TableRole>,
}

impl TableLayout {
    pub fn single(primary: TableRole) -> Self {
        Self {
            primary,
            auxiliary: Vec::new(),
        }
    }

    pub fn roles(&self) -> impl Iterator<Item = &TableRole> {
        std::iter::once(&self.primary).chain(self.auxiliary.iter())
    }

    /// Human-readable structural problems of `source`; empty when sound.
    pub fn structural_problems(&self, source: &SourceSet) -> Vec<String> {
        let mut problems = Vec::new();
        for role in self.roles() {
            let Some(table) = source.get(role.name) else {
                problems.push(format!("Missing source table '{}'", role.name));
                continue;
            };
            let missing = role
                .required_columns
                .iter()
                .filter(|column| !table.has_column(column))
                .collect::<Vec<_>>();
            if !missing.is_empty() {
                problems.push(format!(
                    "Source table '{}' lacks required column(s): {}",
                    role.name,
                    missing.iter().join(", ")
                ));
            }
        }
        problems
    }
}

/// What one source format contributes to a [`DataConverter`].
pub trait SourceFormat {
    fn name(&self) -> &'static str;

    fn separator(&self) -> u8 {
        DEFAULT_CSV_DELIMITER
    }

    fn layout(&self) -> TableLayout;

    /// The calculators for one conversion attempt, in repair order within
    /// each stage.
    fn calculators(
        &self,
        source: &SourceSet,
        tokens: &TokenDictionary,
    ) -> Vec<Box<dyn ColumnCalculator>>;

    /// Rows of the primary table that do not describe a sample of this
    /// format and are trimmed together with the fatal rows.
    fn irrelevant_rows(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn open_session(&mut self) {}

    fn close_session(&mut self) {}
}

/// The protocol the import session talks to.
pub trait Converter {
    fn name(&self) -> &str;

    /// Field delimiter expected when the source is read from text.
    fn get_separator(&self) -> u8 {
        DEFAULT_CSV_DELIMITER
    }

    fn layout(&self) -> TableLayout;

    fn state(&self) -> ConverterState;

    fn open_session(&mut self) {}

    fn close_session(&mut self) {}

    fn is_convertable(&mut self, source: &SourceSet) -> bool;

    fn search_inaccuracies(&mut self, source: &SourceSet) -> Result<Vec<String>, ImportError>;

    fn convert_to_data(&mut self, source: &mut SourceSet) -> Result<Table, ImportError>;
}

/// Fatal and repairable rows found by one calculator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorruptionRecord {
    pub columns: Vec<Column>,
    pub sources: Vec<String>,
    pub fatal: RowSet,
    pub repairable: RowSet,
}

impl CorruptionRecord {
    fn column_label(&self) -> String {
        self.columns.iter().map(|c| c.name()).join("/")
    }

    fn source_label(&self) -> String {
        if self.sources.is_empty() {
            "derived values".to_string()
        } else {
            self.sources.join(", ")
        }
    }
}

/// `source` without the `irrelevant` primary rows, plus the source index of
/// every row kept.
fn relevant_rows<'a>(
    source: &'a SourceSet,
    irrelevant: &RowSet,
) -> (Cow<'a, SourceSet>, Vec<usize>) {
    let kept = (0..source.row_count())
        .filter(|row| !irrelevant.contains(row))
        .collect();
    if irrelevant.is_empty() {
        return (Cow::Borrowed(source), kept);
    }
    let mut trimmed = source.clone();
    trimmed.primary_mut().delete_rows(irrelevant);
    (Cow::Owned(trimmed), kept)
}

fn render_rows(rows: &RowSet) -> String {
    let listed = rows.iter().take(MAX_LISTED_ROWS).join(", ");
    if rows.len() > MAX_LISTED_ROWS {
        format!("{listed} (+{} more)", rows.len() - MAX_LISTED_ROWS)
    } else {
        listed
    }
}

struct Validation {
    calculators: Vec<Box<dyn ColumnCalculator>>,
    records: Option<Vec<CorruptionRecord>>,
}

enum Phase {
    Unvalidated,
    Validated(Validation),
    Converted,
    Rejected {
        problems: Vec<String>,
        invalid: Vec<(Vec<Column>, Vec<String>)>,
    },
}

pub struct DataConverter<F: SourceFormat> {
    format: F,
    tokens: TokenDictionary,
    phase: Phase,
}

impl<F: SourceFormat> DataConverter<F> {
    pub fn new(format: F) -> Self {
        Self {
            format,
            tokens: TokenDictionary::default(),
            phase: Phase::Unvalidated,
        }
    }

    pub fn format(&self) -> &F {
        &self.format
    }

    /// Corruptions found on the relevant rows, as indices into `source`.
    fn collect_records(
        calculators: &[Box<dyn ColumnCalculator>],
        source: &SourceSet,
        irrelevant: &RowSet,
    ) -> Vec<CorruptionRecord> {
        let (relevant, kept) = relevant_rows(source, irrelevant);
        let to_source = |rows: RowSet| -> RowSet {
            rows.into_iter()
                .filter_map(|row| kept.get(row).copied())
                .collect()
        };
        calculators
            .iter()
            .map(|calculator| {
                let fatal = to_source(calculator.find_fatal_corruptions(&relevant));
                let repairable = to_source(calculator.find_repairable_corruptions(&relevant))
                    .into_iter()
                    .filter(|row| !fatal.contains(row))
                    .collect();
                CorruptionRecord {
                    columns: calculator.targets().to_vec(),
                    sources: calculator.sources(),
                    fatal,
                    repairable,
                }
            })
            .collect()
    }
}

impl<F: SourceFormat> Converter for DataConverter<F> {
    fn name(&self) -> &str {
        self.format.name()
    }

    fn get_separator(&self) -> u8 {
        self.format.separator()
    }

    fn layout(&self) -> TableLayout {
        self.format.layout()
    }

    fn state(&self) -> ConverterState {
        match self.phase {
            Phase::Unvalidated => ConverterState::Unvalidated,
            Phase::Validated(_) => ConverterState::Validated,
            Phase::Converted => ConverterState::Converted,
            Phase::Rejected { .. } => ConverterState::Rejected,
        }
    }

    fn open_session(&mut self) {
        self.tokens.clear();
        self.phase = Phase::Unvalidated;
        self.format.open_session();
    }

    fn close_session(&mut self) {
        self.format.close_session();
        self.tokens.clear();
        self.phase = Phase::Unvalidated;
    }

    fn is_convertable(&mut self, source: &SourceSet) -> bool {
        self.phase = Phase::Unvalidated;
        let problems = self.format.layout().structural_problems(source);
        if !problems.is_empty() {
            for problem in &problems {
                warn!("{}: {problem}", self.format.name());
            }
            self.phase = Phase::Rejected {
                problems,
                invalid: Vec::new(),
            };
            return false;
        }

        let irrelevant = self.format.irrelevant_rows(source);
        let (relevant, _) = relevant_rows(source, &irrelevant);
        let calculators = self.format.calculators(&relevant, &self.tokens);
        let invalid = calculators
            .iter()
            .filter(|calculator| !calculator.is_repairable(&relevant))
            .map(|calculator| (calculator.targets().to_vec(), calculator.sources()))
            .collect::<Vec<_>>();
        if !invalid.is_empty() {
            warn!(
                "{}: column(s) {} cannot be derived from the source",
                self.format.name(),
                invalid.iter().flat_map(|(columns, _)| columns).join(", ")
            );
            self.phase = Phase::Rejected {
                problems: Vec::new(),
                invalid,
            };
            return false;
        }

        debug!(
            "{}: {} row(s) validated with {} calculator(s)",
            self.format.name(),
            source.row_count(),
            calculators.len()
        );
        self.phase = Phase::Validated(Validation {
            calculators,
            records: None,
        });
        true
    }

    fn search_inaccuracies(&mut self, source: &SourceSet) -> Result<Vec<String>, ImportError> {
        let state = self.state();
        match &mut self.phase {
            Phase::Rejected { problems, invalid } => {
                let mut messages = problems.clone();
                messages.extend(invalid.iter().map(|(columns, sources)| {
                    let sources = if sources.is_empty() {
                        "the source".to_string()
                    } else {
                        sources.join(", ")
                    };
                    format!(
                        "Column '{}' cannot be derived: no usable value in {sources}",
                        columns.iter().map(|c| c.name()).join("/")
                    )
                }));
                Ok(messages)
            }
            Phase::Validated(validation) => {
                let irrelevant = self.format.irrelevant_rows(source);
                let records = Self::collect_records(&validation.calculators, source, &irrelevant);
                let mut messages = Vec::new();
                for record in records.iter().filter(|r| !r.repairable.is_empty()) {
                    messages.push(format!(
                        "Column '{}': {} repairable value(s) in {} at row(s) {}",
                        record.column_label(),
                        record.repairable.len(),
                        record.source_label(),
                        render_rows(&record.repairable)
                    ));
                }
                for record in records.iter().filter(|r| !r.fatal.is_empty()) {
                    messages.push(format!(
                        "Column '{}': {} row(s) with unrepairable values in {} will be dropped: {}",
                        record.column_label(),
                        record.fatal.len(),
                        record.source_label(),
                        render_rows(&record.fatal)
                    ));
                }
                validation.records = Some(records);
                Ok(messages)
            }
            Phase::Unvalidated | Phase::Converted => Err(ImportError::ExecutionOrder {
                operation: "search_inaccuracies",
                state,
            }),
        }
    }

    fn convert_to_data(&mut self, source: &mut SourceSet) -> Result<Table, ImportError> {
        let state = self.state();
        let validation = match std::mem::replace(&mut self.phase, Phase::Unvalidated) {
            Phase::Validated(validation) => validation,
            other => {
                self.phase = other;
                return Err(ImportError::ExecutionOrder {
                    operation: "convert_to_data",
                    state,
                });
            }
        };
        let Validation {
            mut calculators,
            records,
        } = validation;
        let mut dropped = self.format.irrelevant_rows(source);
        let records =
            records.unwrap_or_else(|| Self::collect_records(&calculators, source, &dropped));

        let trimmed = dropped.len();
        for record in &records {
            dropped.extend(record.fatal.iter().copied());
        }
        source.primary_mut().delete_rows(&dropped);
        if !dropped.is_empty() {
            info!(
                "{}: dropped {} row(s) ({} irrelevant, {} corrupt)",
                self.format.name(),
                dropped.len(),
                trimmed,
                dropped.len() - trimmed
            );
        }

        calculators.sort_by_key(|calculator| calculator.stage());
        for calculator in &calculators {
            if !calculator.repair_column(source) {
                return Err(ImportError::RepairFailed {
                    columns: calculator.targets().iter().join(", "),
                });
            }
        }

        let rows = source.row_count();
        let mut destination = Table::with_row_count(source.primary().name(), rows);
        for calculator in &calculators {
            if !calculator.calculate_column(source, &mut destination) {
                return Err(ImportError::CalculationFailed {
                    columns: calculator.targets().iter().join(", "),
                });
            }
        }

        let order = (0..rows).map(|idx| Some(Value::Integer(idx as i64))).collect();
        destination.set_column(Column::Order.name(), order)?;
        let names = Column::ALL.map(Column::name);
        destination.arrange_columns(&names);

        self.phase = Phase::Converted;
        debug!("{}: converted {rows} row(s)", self.format.name());
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        calculator::{ConstantCalculator, NumericCalculator, SourceColumn},
        repair::NumericPolicy,
    };

    struct Toy;

    impl SourceFormat for Toy {
        fn name(&self) -> &'static str {
            "toy"
        }

        fn layout(&self) -> TableLayout {
            TableLayout::single(TableRole {
                name: "toy",
                file_suffix: None,
                required_columns: &["lat"],
            })
        }

        fn calculators(
            &self,
            _source: &SourceSet,
            _tokens: &TokenDictionary,
        ) -> Vec<Box<dyn ColumnCalculator>> {
            vec![
                Box::new(NumericCalculator::new(
                    Column::Latitude,
                    SourceColumn::new("toy", "lat"),
                    NumericPolicy::new(Column::Latitude.value_range()),
                )),
                Box::new(ConstantCalculator::new(Column::VehicleType, Value::String("Car".into()))),
            ]
        }
    }

    fn source(values: &[&str]) -> SourceSet {
        SourceSet::new(Table::from_text_rows(
            "toy",
            vec!["lat".into()],
            values.iter().map(|v| vec![v.to_string()]).collect(),
        ))
    }

    #[test]
    fn conversion_requires_prior_validation() {
        let mut converter = DataConverter::new(Toy);
        let err = converter.convert_to_data(&mut source(&["1"])).unwrap_err();
        assert!(matches!(
            err,
            ImportError::ExecutionOrder {
                state: ConverterState::Unvalidated,
                ..
            }
        ));
        assert!(converter.search_inaccuracies(&source(&["1"])).is_err());
    }

    #[test]
    fn rejected_conversion_reports_invalid_columns() {
        let mut converter = DataConverter::new(Toy);
        let input = source(&["x", "999"]);
        assert!(!converter.is_convertable(&input));
        assert_eq!(converter.state(), ConverterState::Rejected);
        let messages = converter.search_inaccuracies(&input).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("latitude"), "{messages:?}");
        assert!(converter.convert_to_data(&mut input.clone()).is_err());
    }

    #[test]
    fn structural_problems_reject_before_column_checks() {
        let mut converter = DataConverter::new(Toy);
        let input = SourceSet::new(Table::from_text_rows("toy", vec!["lon".into()], vec![]));
        assert!(!converter.is_convertable(&input));
        let messages = converter.search_inaccuracies(&input).unwrap();
        assert!(messages[0].contains("lacks required column(s): lat"));
    }

    #[test]
    fn converted_table_has_full_schema_and_dense_order() {
        let mut converter = DataConverter::new(Toy);
        let mut input = source(&["1", "", "3"]);
        assert!(converter.is_convertable(&input));
        let messages = converter.search_inaccuracies(&input).unwrap();
        assert_eq!(messages, vec!["Column 'latitude': 1 repairable value(s) in toy.lat at row(s) 1"]);
        let table = converter.convert_to_data(&mut input).unwrap();
        assert_eq!(converter.state(), ConverterState::Converted);
        assert_eq!(table.headers().len(), Column::ALL.len());
        assert_eq!(table.column("latitude").unwrap()[1], Some(Value::Float(2.0)));
        assert_eq!(table.column("speed").unwrap(), &[None, None, None]);
        assert_eq!(
            table.column("order").unwrap(),
            &[Some(Value::Integer(0)), Some(Value::Integer(1)), Some(Value::Integer(2))]
        );
        assert!(converter.convert_to_data(&mut input).is_err());
    }

    #[test]
    fn row_lists_are_capped() {
        let rows: RowSet = (0..13).collect();
        assert_eq!(render_rows(&rows), "0, 1, 2, 3, 4, 5, 6, 7, 8, 9 (+3 more)");
    }
}
