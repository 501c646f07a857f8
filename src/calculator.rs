//! The column calculator protocol and the calculators shared across formats.
//!
//! A [`ColumnCalculator`] owns one or two unified columns for one source
//! format. It can tell whether its source data is usable at all, which rows
//! are beyond repair, which rows its repair policy will patch, repair the
//! source columns in place and finally write the unified column(s).
//!
//! Row indices always refer to the primary (per-sample) table of the
//! [`SourceSet`].

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use log::warn;
use uuid::Uuid;

use crate::{
    column::{Column, RepairStage, ValueRange},
    data::{
        Cell, Value, cell_date, cell_datetime, cell_epoch_millis, cell_flag, cell_text, cell_time,
    },
    repair::{
        self, NumericPolicy, RowSet, Vocabulary, category_values, classify_temporal,
        fill_forward_backward, grouped_fatal_rows, grouped_repairable_rows, has_valid_numeric,
        invalid_category_rows, invalid_numeric_rows, numeric_values, repair_grouped,
        repair_numeric, repair_temporal,
    },
    table::{SourceSet, Table},
};

pub trait ColumnCalculator {
    /// Unified columns written by [`ColumnCalculator::calculate_column`].
    fn targets(&self) -> &[Column];

    /// Source columns read, rendered as `table.column`.
    fn sources(&self) -> Vec<String>;

    fn stage(&self) -> RepairStage {
        self.targets()
            .iter()
            .map(|column| column.repair_stage())
            .max()
            .unwrap_or(RepairStage::Structure)
    }

    /// True iff at least one row carries enough information to derive the
    /// target column(s). Derived and constant columns are always repairable.
    fn is_repairable(&self, source: &SourceSet) -> bool;

    /// Rows the repair policy cannot fix; they are deleted before conversion.
    fn find_fatal_corruptions(&self, source: &SourceSet) -> RowSet;

    /// Rows the repair policy will patch.
    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet;

    /// Cleans the source column(s) in place.
    fn repair_column(&self, source: &mut SourceSet) -> bool;

    /// Writes the finished unified column(s) into `destination`.
    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub table: String,
    pub column: String,
}

impl SourceColumn {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    pub fn cells<'a>(&self, source: &'a SourceSet) -> Option<&'a [Cell]> {
        source.column(&self.table, &self.column)
    }

    pub fn cells_mut<'a>(&self, source: &'a mut SourceSet) -> Option<&'a mut Vec<Cell>> {
        source.column_mut(&self.table, &self.column)
    }

    /// Trimmed text of every row; used for trajectory and group keys.
    pub fn texts(&self, source: &SourceSet) -> Vec<Option<String>> {
        match self.cells(source) {
            Some(cells) => cells.iter().map(cell_text).collect(),
            None => vec![None; source.row_count()],
        }
    }
}

impl fmt::Display for SourceColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Writes computed columns, logging instead of panicking on length errors.
pub fn write_columns(destination: &mut Table, columns: Vec<(Column, Vec<Cell>)>) -> bool {
    for (column, values) in columns {
        if let Err(err) = destination.set_column(column.name(), values) {
            warn!("Unable to write column '{column}': {err}");
            return false;
        }
    }
    true
}

/// Replaces a source column with typed values.
pub fn overwrite(source: &mut SourceSet, column: &SourceColumn, values: Vec<Cell>) -> bool {
    match column.cells_mut(source) {
        Some(cells) if cells.len() == values.len() => {
            *cells = values;
            true
        }
        Some(cells) => {
            warn!(
                "Repair of {column} produced {} value(s) for {} row(s)",
                values.len(),
                cells.len()
            );
            false
        }
        None => false,
    }
}

/// Trajectory key → generated token, shared for a whole import session so a
/// trajectory split across chunks keeps its identifier.
#[derive(Debug, Clone, Default)]
pub struct TokenDictionary(Rc<RefCell<HashMap<String, Uuid>>>);

impl TokenDictionary {
    pub fn token_for(&self, key: &str) -> Uuid {
        *self
            .0
            .borrow_mut()
            .entry(key.to_string())
            .or_insert_with(Uuid::new_v4)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

/// Fresh unique token per row.
pub struct RowIdCalculator;

impl ColumnCalculator for RowIdCalculator {
    fn targets(&self) -> &[Column] {
        &[Column::Id]
    }

    fn sources(&self) -> Vec<String> {
        Vec::new()
    }

    fn is_repairable(&self, _source: &SourceSet) -> bool {
        true
    }

    fn find_fatal_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn find_repairable_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn repair_column(&self, _source: &mut SourceSet) -> bool {
        true
    }

    fn calculate_column(&self, _source: &SourceSet, destination: &mut Table) -> bool {
        let ids = (0..destination.row_count())
            .map(|_| Some(Value::Guid(Uuid::new_v4())))
            .collect();
        write_columns(destination, vec![(Column::Id, ids)])
    }
}

/// Maps each distinct source trajectory key to one generated token.
pub struct TrajectoryIdCalculator {
    key: SourceColumn,
    vocabulary: Vocabulary,
    tokens: TokenDictionary,
}

impl TrajectoryIdCalculator {
    pub fn new(key: SourceColumn, vocabulary: Vocabulary, tokens: TokenDictionary) -> Self {
        Self {
            key,
            vocabulary,
            tokens,
        }
    }
}

impl ColumnCalculator for TrajectoryIdCalculator {
    fn targets(&self) -> &[Column] {
        &[Column::TrajectoryId]
    }

    fn sources(&self) -> Vec<String> {
        vec![self.key.to_string()]
    }

    fn is_repairable(&self, source: &SourceSet) -> bool {
        self.key.cells(source).is_some_and(|cells| {
            category_values(cells, &self.vocabulary)
                .iter()
                .any(Option::is_some)
        })
    }

    fn find_fatal_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        self.key
            .cells(source)
            .map(|cells| invalid_category_rows(cells, &self.vocabulary))
            .unwrap_or_default()
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        let Some(cells) = self.key.cells(source) else {
            return false;
        };
        let values = category_values(cells, &self.vocabulary);
        let filled = fill_forward_backward(&values, repair::UNKNOWN.to_string())
            .into_iter()
            .map(|key| Some(Value::String(key)))
            .collect();
        overwrite(source, &self.key, filled)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let Some(cells) = self.key.cells(source) else {
            return false;
        };
        let tokens = category_values(cells, &self.vocabulary)
            .into_iter()
            .map(|key| key.map(|key| Value::Guid(self.tokens.token_for(&key))))
            .collect();
        write_columns(destination, vec![(Column::TrajectoryId, tokens)])
    }
}

/// A numeric source column copied (and unit-scaled) into one unified column.
pub struct NumericCalculator {
    target: [Column; 1],
    source: SourceColumn,
    policy: NumericPolicy,
    scale: f64,
    optional: bool,
}

impl NumericCalculator {
    pub fn new(target: Column, source: SourceColumn, policy: NumericPolicy) -> Self {
        Self {
            target: [target],
            source,
            policy,
            scale: 1.0,
            optional: false,
        }
    }

    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// A missing or entirely empty source yields a null column instead of
    /// rejecting the conversion.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    fn usable(&self, source: &SourceSet) -> bool {
        self.source
            .cells(source)
            .is_some_and(|cells| has_valid_numeric(cells, self.policy.range))
    }
}

impl ColumnCalculator for NumericCalculator {
    fn targets(&self) -> &[Column] {
        &self.target
    }

    fn sources(&self) -> Vec<String> {
        vec![self.source.to_string()]
    }

    fn is_repairable(&self, source: &SourceSet) -> bool {
        self.optional || self.usable(source)
    }

    fn find_fatal_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        if !self.usable(source) {
            return RowSet::new();
        }
        self.source
            .cells(source)
            .map(|cells| invalid_numeric_rows(cells, self.policy.range))
            .unwrap_or_default()
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        if !self.usable(source) {
            return self.optional;
        }
        let Some(cells) = self.source.cells(source) else {
            return false;
        };
        let repaired = repair_numeric(cells, &self.policy)
            .into_iter()
            .map(|value| Some(Value::Float(value)))
            .collect();
        overwrite(source, &self.source, repaired)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let values = match self.source.cells(source) {
            Some(cells) if self.usable(source) => numeric_values(cells, self.policy.range)
                .into_iter()
                .map(|value| value.map(|v| Value::Float(v * self.scale)))
                .collect(),
            _ if self.optional => vec![None; destination.row_count()],
            _ => return false,
        };
        write_columns(destination, vec![(self.target[0], values)])
    }
}

/// A text column repaired by forward/back fill with a default sentinel.
pub struct CategoryCalculator {
    target: [Column; 1],
    source: SourceColumn,
    default: String,
}

impl CategoryCalculator {
    pub fn new(target: Column, source: SourceColumn) -> Self {
        Self {
            target: [target],
            source,
            default: repair::UNKNOWN.to_string(),
        }
    }
}

impl ColumnCalculator for CategoryCalculator {
    fn targets(&self) -> &[Column] {
        &self.target
    }

    fn sources(&self) -> Vec<String> {
        vec![self.source.to_string()]
    }

    fn is_repairable(&self, source: &SourceSet) -> bool {
        self.source.cells(source).is_some()
    }

    fn find_fatal_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        self.source
            .cells(source)
            .map(|cells| invalid_category_rows(cells, &Vocabulary::Any))
            .unwrap_or_default()
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        let Some(cells) = self.source.cells(source) else {
            return false;
        };
        let values = category_values(cells, &Vocabulary::Any);
        let filled = fill_forward_backward(&values, self.default.clone())
            .into_iter()
            .map(|value| Some(Value::String(value)))
            .collect();
        overwrite(source, &self.source, filled)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let Some(cells) = self.source.cells(source) else {
            return false;
        };
        let values = category_values(cells, &Vocabulary::Any)
            .into_iter()
            .map(|value| value.map(Value::String))
            .collect();
        write_columns(destination, vec![(self.target[0], values)])
    }
}

/// A boolean column repaired like a categorical one.
pub struct FlagCalculator {
    target: [Column; 1],
    source: SourceColumn,
    default: bool,
}

impl FlagCalculator {
    pub fn new(target: Column, source: SourceColumn, default: bool) -> Self {
        Self {
            target: [target],
            source,
            default,
        }
    }

    fn flags(cells: &[Cell]) -> Vec<Option<bool>> {
        cells.iter().map(cell_flag).collect()
    }
}

impl ColumnCalculator for FlagCalculator {
    fn targets(&self) -> &[Column] {
        &self.target
    }

    fn sources(&self) -> Vec<String> {
        vec![self.source.to_string()]
    }

    fn is_repairable(&self, source: &SourceSet) -> bool {
        self.source.cells(source).is_some()
    }

    fn find_fatal_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        self.source
            .cells(source)
            .map(|cells| {
                Self::flags(cells)
                    .iter()
                    .enumerate()
                    .filter(|(_, flag)| flag.is_none())
                    .map(|(idx, _)| idx)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        let Some(cells) = self.source.cells(source) else {
            return false;
        };
        let filled = fill_forward_backward(&Self::flags(cells), self.default)
            .into_iter()
            .map(|flag| Some(Value::Boolean(flag)))
            .collect();
        overwrite(source, &self.source, filled)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let Some(cells) = self.source.cells(source) else {
            return false;
        };
        let values = Self::flags(cells)
            .into_iter()
            .map(|flag| flag.map(Value::Boolean))
            .collect();
        write_columns(destination, vec![(self.target[0], values)])
    }
}

/// A numeric value that must hold for every row sharing a group key, such
/// as a speed limit per road type. Without any valid value the column is
/// treated as not supplied.
pub struct GroupedNumericCalculator {
    target: [Column; 1],
    source: SourceColumn,
    group: SourceColumn,
    range: Option<ValueRange>,
}

impl GroupedNumericCalculator {
    pub fn new(target: Column, source: SourceColumn, group: SourceColumn) -> Self {
        Self {
            target: [target],
            source,
            group,
            range: target.value_range(),
        }
    }

    fn supplied_values(&self, source: &SourceSet) -> Option<Vec<Option<f64>>> {
        let values = numeric_values(self.source.cells(source)?, self.range);
        values.iter().any(Option::is_some).then_some(values)
    }

    /// Group keys; without a group column every row shares one group.
    fn groups(&self, source: &SourceSet) -> Vec<Option<String>> {
        if self.group.cells(source).is_some() {
            self.group.texts(source)
        } else {
            vec![Some(String::new()); source.row_count()]
        }
    }
}

impl ColumnCalculator for GroupedNumericCalculator {
    fn targets(&self) -> &[Column] {
        &self.target
    }

    fn sources(&self) -> Vec<String> {
        vec![self.source.to_string(), self.group.to_string()]
    }

    fn is_repairable(&self, _source: &SourceSet) -> bool {
        true
    }

    fn find_fatal_corruptions(&self, source: &SourceSet) -> RowSet {
        self.supplied_values(source)
            .map(|values| grouped_fatal_rows(&values, &self.groups(source)))
            .unwrap_or_default()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        self.supplied_values(source)
            .map(|values| grouped_repairable_rows(&values, &self.groups(source)))
            .unwrap_or_default()
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        let Some(values) = self.supplied_values(source) else {
            return true;
        };
        let repaired = repair_grouped(&values, &self.groups(source))
            .into_iter()
            .map(|value| value.map(Value::Float))
            .collect();
        overwrite(source, &self.source, repaired)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let values = match self.supplied_values(source) {
            Some(values) => values.into_iter().map(|v| v.map(Value::Float)).collect(),
            None => vec![None; destination.row_count()],
        };
        write_columns(destination, vec![(self.target[0], values)])
    }
}

/// The same value, possibly the null sentinel, on every row.
pub struct ConstantCalculator {
    target: [Column; 1],
    value: Cell,
}

impl ConstantCalculator {
    pub fn new(target: Column, value: Value) -> Self {
        Self {
            target: [target],
            value: Some(value),
        }
    }

    pub fn null(target: Column) -> Self {
        Self {
            target: [target],
            value: None,
        }
    }
}

impl ColumnCalculator for ConstantCalculator {
    fn targets(&self) -> &[Column] {
        &self.target
    }

    fn sources(&self) -> Vec<String> {
        Vec::new()
    }

    fn is_repairable(&self, _source: &SourceSet) -> bool {
        true
    }

    fn find_fatal_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn find_repairable_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn repair_column(&self, _source: &mut SourceSet) -> bool {
        true
    }

    fn calculate_column(&self, _source: &SourceSet, destination: &mut Table) -> bool {
        let values = vec![self.value.clone(); destination.row_count()];
        write_columns(destination, vec![(self.target[0], values)])
    }
}

/// How a temporal source column encodes its instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalEncoding {
    Date,
    TimeOfDay,
    DateTime,
    EpochMillis,
}

impl TemporalEncoding {
    fn targets(self) -> &'static [Column] {
        match self {
            TemporalEncoding::Date => &[Column::Date],
            TemporalEncoding::TimeOfDay => &[Column::Time],
            TemporalEncoding::DateTime | TemporalEncoding::EpochMillis => {
                &[Column::Date, Column::Time]
            }
        }
    }

    fn tick(self, cell: &Cell) -> Option<i64> {
        match self {
            TemporalEncoding::Date => cell_date(cell).map(date_tick),
            TemporalEncoding::TimeOfDay => cell_time(cell).map(time_tick),
            TemporalEncoding::DateTime => cell_datetime(cell).map(datetime_tick),
            TemporalEncoding::EpochMillis => cell_epoch_millis(cell).map(datetime_tick),
        }
    }

    fn value(self, tick: i64) -> Option<Value> {
        match self {
            TemporalEncoding::Date => date_from_tick(tick).map(Value::Date),
            TemporalEncoding::TimeOfDay => time_from_tick(tick).map(Value::Time),
            TemporalEncoding::DateTime | TemporalEncoding::EpochMillis => {
                datetime_from_tick(tick).map(Value::DateTime)
            }
        }
    }
}

pub fn date_tick(date: NaiveDate) -> i64 {
    date.num_days_from_ce() as i64
}

pub fn time_tick(time: NaiveTime) -> i64 {
    time.num_seconds_from_midnight() as i64 * 1000 + (time.nanosecond() / 1_000_000) as i64
}

pub fn datetime_tick(datetime: NaiveDateTime) -> i64 {
    datetime.and_utc().timestamp_millis()
}

fn date_from_tick(tick: i64) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(i32::try_from(tick).ok()?)
}

fn time_from_tick(tick: i64) -> Option<NaiveTime> {
    let secs = u32::try_from(tick.div_euclid(1000)).ok()?;
    let nanos = u32::try_from(tick.rem_euclid(1000) * 1_000_000).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
}

fn datetime_from_tick(tick: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(tick).map(|dt| dt.naive_utc())
}

/// Date and/or time columns repaired with the per-trajectory midpoint policy.
pub struct TemporalCalculator {
    source: SourceColumn,
    key: Option<SourceColumn>,
    encoding: TemporalEncoding,
}

impl TemporalCalculator {
    pub fn new(source: SourceColumn, encoding: TemporalEncoding) -> Self {
        Self {
            source,
            key: None,
            encoding,
        }
    }

    /// Groups rows into trajectories by `key`; without it the whole table is
    /// one trajectory.
    pub fn keyed_by(mut self, key: SourceColumn) -> Self {
        self.key = Some(key);
        self
    }

    fn ticks(&self, source: &SourceSet) -> Option<Vec<Option<i64>>> {
        self.source
            .cells(source)
            .map(|cells| cells.iter().map(|cell| self.encoding.tick(cell)).collect())
    }

    fn keys(&self, source: &SourceSet) -> Vec<Option<String>> {
        match &self.key {
            Some(key) => key.texts(source),
            None => vec![None; source.row_count()],
        }
    }
}

impl ColumnCalculator for TemporalCalculator {
    fn targets(&self) -> &[Column] {
        self.encoding.targets()
    }

    fn sources(&self) -> Vec<String> {
        vec![self.source.to_string()]
    }

    fn is_repairable(&self, source: &SourceSet) -> bool {
        self.ticks(source)
            .is_some_and(|ticks| ticks.iter().any(Option::is_some))
    }

    fn find_fatal_corruptions(&self, source: &SourceSet) -> RowSet {
        self.ticks(source)
            .map(|ticks| classify_temporal(&ticks, &self.keys(source)).fatal)
            .unwrap_or_default()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        self.ticks(source)
            .map(|ticks| classify_temporal(&ticks, &self.keys(source)).repairable)
            .unwrap_or_default()
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        let Some(ticks) = self.ticks(source) else {
            return false;
        };
        let repaired = repair_temporal(&ticks, &self.keys(source));
        let Some(cells) = self.source.cells(source) else {
            return false;
        };
        let values = repaired
            .iter()
            .zip(cells)
            .map(|(tick, original)| match tick {
                Some(tick) => self.encoding.value(*tick),
                None => original.clone(),
            })
            .collect();
        overwrite(source, &self.source, values)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let Some(ticks) = self.ticks(source) else {
            return false;
        };
        let columns = self
            .targets()
            .iter()
            .map(|&column| {
                let values = ticks
                    .iter()
                    .map(|tick| {
                        let tick = (*tick)?;
                        match (self.encoding, column) {
                            (TemporalEncoding::Date, _) => date_from_tick(tick).map(Value::Date),
                            (TemporalEncoding::TimeOfDay, _) => {
                                time_from_tick(tick).map(Value::Time)
                            }
                            (_, Column::Date) => {
                                datetime_from_tick(tick).map(|dt| Value::Date(dt.date()))
                            }
                            _ => datetime_from_tick(tick).map(|dt| Value::Time(dt.time())),
                        }
                    })
                    .collect();
                (column, values)
            })
            .collect();
        write_columns(destination, columns)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn text_table(name: &str, headers: &[&str], rows: &[&[&str]]) -> Table {
        Table::from_text_rows(
            name,
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn trajectory_tokens_follow_repaired_keys() {
        let table = text_table("t", &["trip"], &[&["1"], &["-5"], &["x"], &["-5"]]);
        let mut source = SourceSet::new(table);
        let calculator = TrajectoryIdCalculator::new(
            SourceColumn::new("t", "trip"),
            Vocabulary::Integer,
            TokenDictionary::default(),
        );
        assert_eq!(
            calculator.find_repairable_corruptions(&source),
            RowSet::from([2])
        );

        source.primary_mut().delete_rows(&RowSet::from([3]));
        assert!(calculator.repair_column(&mut source));
        let mut destination = Table::with_row_count("out", 3);
        assert!(calculator.calculate_column(&source, &mut destination));

        let tokens = destination.column("trajectory_id").unwrap();
        assert_eq!(tokens[1], tokens[2]);
        assert_ne!(tokens[0], tokens[1]);
        assert!(tokens.iter().all(Option::is_some));
    }

    #[test]
    fn row_ids_are_unique() {
        let source = SourceSet::new(text_table("t", &["a"], &[&["1"], &["2"], &["3"]]));
        let mut destination = Table::with_row_count("out", 3);
        assert!(RowIdCalculator.calculate_column(&source, &mut destination));
        let ids: HashSet<String> = (0..3)
            .map(|row| destination.display_row(row)[0].clone())
            .collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn numeric_calculator_repairs_then_scales() {
        let table = text_table("t", &["v"], &[&["2"], &[""], &["abc"], &["6"]]);
        let mut source = SourceSet::new(table);
        let calculator = NumericCalculator::new(
            Column::Speed,
            SourceColumn::new("t", "v"),
            NumericPolicy::new(None),
        )
        .scaled(3.6);
        assert!(calculator.is_repairable(&source));
        assert_eq!(calculator.find_repairable_corruptions(&source), RowSet::from([1, 2]));
        assert!(calculator.repair_column(&mut source));
        assert!(calculator.find_repairable_corruptions(&source).is_empty());

        let mut destination = Table::with_row_count("out", 4);
        assert!(calculator.calculate_column(&source, &mut destination));
        let speeds = destination.column("speed").unwrap();
        assert_eq!(speeds[1], Some(Value::Float(4.0 * 3.6)));
    }

    #[test]
    fn optional_numeric_without_values_yields_nulls() {
        let source = SourceSet::new(text_table("t", &["v"], &[&[""], &["n/a"]]));
        let calculator = NumericCalculator::new(
            Column::SpeedLimit,
            SourceColumn::new("t", "v"),
            NumericPolicy::new(None),
        );
        assert!(!calculator.is_repairable(&source));
        let optional = calculator.optional();
        assert!(optional.is_repairable(&source));
        let mut destination = Table::with_row_count("out", 2);
        assert!(optional.calculate_column(&source, &mut destination));
        assert_eq!(destination.column("speed_limit").unwrap(), &[None, None]);
    }

    #[test]
    fn temporal_calculator_splits_datetime_and_repairs_midpoint() {
        let table = text_table(
            "t",
            &["trip", "ts"],
            &[
                &["1", "2024-05-06 10:00:00"],
                &["1", "garbage"],
                &["1", "2024-05-06 10:00:10"],
                &["1", ""],
            ],
        );
        let mut source = SourceSet::new(table);
        let calculator = TemporalCalculator::new(SourceColumn::new("t", "ts"), TemporalEncoding::DateTime)
            .keyed_by(SourceColumn::new("t", "trip"));
        assert_eq!(calculator.targets(), &[Column::Date, Column::Time]);
        assert_eq!(calculator.find_fatal_corruptions(&source), RowSet::from([3]));
        assert_eq!(calculator.find_repairable_corruptions(&source), RowSet::from([1]));

        source.primary_mut().delete_rows(&RowSet::from([3]));
        assert!(calculator.repair_column(&mut source));
        assert!(calculator.find_fatal_corruptions(&source).is_empty());

        let mut destination = Table::with_row_count("out", 3);
        assert!(calculator.calculate_column(&source, &mut destination));
        assert_eq!(destination.display_row(1), vec!["2024-05-06", "10:00:05"]);
    }

    #[test]
    fn flag_calculator_fills_from_neighbours() {
        let mut source = SourceSet::new(text_table("t", &["f"], &[&["yes"], &["?"], &["0"]]));
        let calculator = FlagCalculator::new(Column::OneWay, SourceColumn::new("t", "f"), false);
        assert_eq!(calculator.find_repairable_corruptions(&source), RowSet::from([1]));
        assert!(calculator.repair_column(&mut source));
        let mut destination = Table::with_row_count("out", 3);
        assert!(calculator.calculate_column(&source, &mut destination));
        assert_eq!(destination.display_row(1), vec!["true"]);
    }

    #[test]
    fn grouped_speed_limit_propagates_within_road_type() {
        let table = text_table(
            "t",
            &["limit", "road"],
            &[
                &["", "primary"],
                &["50", "primary"],
                &["abc", "primary"],
                &["", "track"],
                &["", "track"],
                &["30", ""],
            ],
        );
        let mut source = SourceSet::new(table);
        let calculator = GroupedNumericCalculator::new(
            Column::SpeedLimit,
            SourceColumn::new("t", "limit"),
            SourceColumn::new("t", "road"),
        );
        assert_eq!(calculator.find_fatal_corruptions(&source), RowSet::from([3, 4]));
        assert_eq!(calculator.find_repairable_corruptions(&source), RowSet::from([0, 2]));

        source.primary_mut().delete_rows(&RowSet::from([3, 4]));
        assert!(calculator.repair_column(&mut source));
        let mut destination = Table::with_row_count("out", 4);
        assert!(calculator.calculate_column(&source, &mut destination));
        let limits = destination.column("speed_limit").unwrap();
        assert_eq!(limits[..3], [Some(Value::Float(50.0)), Some(Value::Float(50.0)), Some(Value::Float(50.0))]);
        assert_eq!(limits[3], Some(Value::Float(30.0)));
    }

    #[test]
    fn grouped_column_without_values_is_not_supplied() {
        let source = SourceSet::new(text_table("t", &["limit", "road"], &[&["", "a"], &["-", "b"]]));
        let calculator = GroupedNumericCalculator::new(
            Column::SpeedLimit,
            SourceColumn::new("t", "limit"),
            SourceColumn::new("t", "road"),
        );
        assert!(calculator.find_fatal_corruptions(&source).is_empty());
        let mut destination = Table::with_row_count("out", 2);
        assert!(calculator.calculate_column(&source, &mut destination));
        assert_eq!(destination.column("speed_limit").unwrap(), &[None, None]);
    }

    #[test]
    fn speed_limit_without_road_type_column_is_one_group() {
        let mut source = SourceSet::new(text_table("t", &["limit"], &[&["70"], &[""], &["x"]]));
        let calculator = GroupedNumericCalculator::new(
            Column::SpeedLimit,
            SourceColumn::new("t", "limit"),
            SourceColumn::new("t", "road"),
        );
        assert!(calculator.find_fatal_corruptions(&source).is_empty());
        assert_eq!(calculator.find_repairable_corruptions(&source), RowSet::from([1, 2]));
        assert!(calculator.repair_column(&mut source));
        let mut destination = Table::with_row_count("out", 3);
        assert!(calculator.calculate_column(&source, &mut destination));
        assert_eq!(
            destination.column("speed_limit").unwrap().to_vec(),
            vec![Some(Value::Float(70.0)); 3]
        );
    }

    #[test]
    fn token_dictionary_is_shared_between_clones() {
        let tokens = TokenDictionary::default();
        let clone = tokens.clone();
        let first = tokens.token_for("7");
        assert_eq!(clone.token_for("7"), first);
        assert_eq!(clone.len(), 1);
        tokens.clear();
        assert!(clone.is_empty());
    }
}
