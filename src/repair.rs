//! Format-agnostic repair primitives.
//!
//! Every policy works on plain slices so the calculators of each source
//! format can share them:
//!
//! - **Numeric**: invalid entries are nulled, optionally linearly
//!   interpolated, then patched with the mean of the nearest valid value on
//!   each side (or the single available neighbour, or a default when the whole
//!   column is invalid).
//! - **Temporal**: values reduced to integer ticks are classified per
//!   trajectory into fatal and repairable rows and patched with midpoints.
//! - **Categorical / flag**: forward-fill, back-fill, then a default.
//! - **Grouped**: a value valid anywhere in its group propagates to the group.
//!
//! A duplicate-key detector completes the toolbox.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    column::ValueRange,
    data::{Cell, cell_f64, cell_text},
};

pub type RowSet = BTreeSet<usize>;

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericPolicy {
    pub range: Option<ValueRange>,
    pub interpolate: bool,
    pub default: f64,
}

impl NumericPolicy {
    pub fn new(range: Option<ValueRange>) -> Self {
        Self {
            range,
            interpolate: false,
            default: 0.0,
        }
    }

    pub fn interpolated(mut self) -> Self {
        self.interpolate = true;
        self
    }

    pub fn with_default(mut self, default: f64) -> Self {
        self.default = default;
        self
    }
}

pub fn numeric_value(cell: &Cell, range: Option<ValueRange>) -> Option<f64> {
    cell_f64(cell).filter(|value| range.is_none_or(|r| r.contains(*value)))
}

pub fn numeric_values(cells: &[Cell], range: Option<ValueRange>) -> Vec<Option<f64>> {
    cells.iter().map(|cell| numeric_value(cell, range)).collect()
}

pub fn has_valid_numeric(cells: &[Cell], range: Option<ValueRange>) -> bool {
    cells.iter().any(|cell| numeric_value(cell, range).is_some())
}

pub fn invalid_numeric_rows(cells: &[Cell], range: Option<ValueRange>) -> RowSet {
    cells
        .iter()
        .enumerate()
        .filter(|(_, cell)| numeric_value(cell, range).is_none())
        .map(|(idx, _)| idx)
        .collect()
}

/// Resolves every null of `values` according to `policy`.
pub fn fill_numeric(values: &[Option<f64>], policy: &NumericPolicy) -> Vec<f64> {
    if values.iter().all(Option::is_none) {
        return vec![policy.default; values.len()];
    }
    let mut filled = values.to_vec();
    if policy.interpolate {
        interpolate_gaps(&mut filled);
    }
    let previous = nearest_valid_before(&filled);
    let next = nearest_valid_after(&filled);
    filled
        .iter()
        .enumerate()
        .map(|(idx, value)| match (value, previous[idx], next[idx]) {
            (Some(v), _, _) => *v,
            (None, Some(left), Some(right)) => (left + right) / 2.0,
            (None, Some(only), None) | (None, None, Some(only)) => only,
            (None, None, None) => policy.default,
        })
        .collect()
}

/// Parses, repairs and returns a numeric column in one step.
pub fn repair_numeric(cells: &[Cell], policy: &NumericPolicy) -> Vec<f64> {
    fill_numeric(&numeric_values(cells, policy.range), policy)
}

fn interpolate_gaps(values: &mut [Option<f64>]) {
    let mut last_valid: Option<(usize, f64)> = None;
    for idx in 0..values.len() {
        let Some(current) = values[idx] else {
            continue;
        };
        if let Some((start, from)) = last_valid {
            let span = (idx - start) as f64;
            for gap in start + 1..idx {
                let t = (gap - start) as f64 / span;
                values[gap] = Some(from + (current - from) * t);
            }
        }
        last_valid = Some((idx, current));
    }
}

fn nearest_valid_before(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut seen = None;
    values
        .iter()
        .map(|value| {
            let before = seen;
            if value.is_some() {
                seen = *value;
            }
            before
        })
        .collect()
}

fn nearest_valid_after(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut after = nearest_valid_before(&values.iter().rev().copied().collect::<Vec<_>>());
    after.reverse();
    after
}

/// Boundaries of trajectories: maximal runs of rows sharing the same key.
pub fn segments<K: PartialEq>(keys: &[K]) -> Vec<(usize, usize)> {
    let mut bounds = Vec::new();
    let mut start = 0usize;
    for idx in 1..=keys.len() {
        if idx == keys.len() || keys[idx] != keys[start] {
            if idx > start {
                bounds.push((start, idx - 1));
            }
            start = idx;
        }
    }
    bounds
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemporalDefects {
    pub fatal: RowSet,
    pub repairable: RowSet,
}

/// Classifies invalid ticks per trajectory.
///
/// An invalid row is fatal when it opens or closes its trajectory, or when
/// its immediate predecessor or successor in the trajectory is invalid too.
/// The rule is symmetric, so runs of invalid rows are fatal as a whole.
pub fn classify_temporal<K: PartialEq>(ticks: &[Option<i64>], keys: &[K]) -> TemporalDefects {
    let mut defects = TemporalDefects::default();
    for (start, end) in segments(keys) {
        for idx in start..=end {
            if ticks[idx].is_some() {
                continue;
            }
            let at_edge = idx == start || idx == end;
            let neighbour_invalid =
                (idx > start && ticks[idx - 1].is_none()) || (idx < end && ticks[idx + 1].is_none());
            if at_edge || neighbour_invalid {
                defects.fatal.insert(idx);
            } else {
                defects.repairable.insert(idx);
            }
        }
    }
    defects
}

/// Fills every invalid tick that has at least one valid anchor in its
/// trajectory: the midpoint of the nearest valid ticks on both sides, or a
/// copy of the only anchor. Rows of all-invalid trajectories stay `None`.
pub fn repair_temporal<K: PartialEq>(ticks: &[Option<i64>], keys: &[K]) -> Vec<Option<i64>> {
    let mut repaired = ticks.to_vec();
    for (start, end) in segments(keys) {
        let segment = &ticks[start..=end];
        for (offset, tick) in segment.iter().enumerate() {
            if tick.is_some() {
                continue;
            }
            let before = segment[..offset].iter().rev().find_map(|t| *t);
            let after = segment[offset + 1..].iter().find_map(|t| *t);
            repaired[start + offset] = match (before, after) {
                (Some(a), Some(b)) => Some(a + (b - a) / 2),
                (Some(only), None) | (None, Some(only)) => Some(only),
                (None, None) => None,
            };
        }
    }
    repaired
}

/// Largest magnitude an integral float keeps exactly.
const MAX_EXACT_INTEGRAL: f64 = 9_007_199_254_740_992.0;

/// Which text values a categorical column accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Vocabulary {
    Any,
    Integer,
    /// Integers, also written as integral floats; `"7.0"` reads as `"7"`.
    IntegralNumber,
}

impl Vocabulary {
    pub fn accepts(&self, value: &str) -> bool {
        self.canonical(value).is_some()
    }

    /// The key a value stands for, or `None` when it is not accepted.
    pub fn canonical(&self, value: &str) -> Option<String> {
        match self {
            Vocabulary::Any => Some(value.to_string()),
            Vocabulary::Integer => value.parse::<i64>().ok().map(|_| value.to_string()),
            Vocabulary::IntegralNumber => {
                if let Ok(integer) = value.parse::<i64>() {
                    return Some(integer.to_string());
                }
                let number = value.parse::<f64>().ok()?;
                (number.is_finite() && number.fract() == 0.0 && number.abs() <= MAX_EXACT_INTEGRAL)
                    .then(|| (number as i64).to_string())
            }
        }
    }
}

pub fn category_values(cells: &[Cell], vocabulary: &Vocabulary) -> Vec<Option<String>> {
    cells
        .iter()
        .map(|cell| cell_text(cell).and_then(|text| vocabulary.canonical(&text)))
        .collect()
}

pub fn invalid_category_rows(cells: &[Cell], vocabulary: &Vocabulary) -> RowSet {
    category_values(cells, vocabulary)
        .iter()
        .enumerate()
        .filter(|(_, value)| value.is_none())
        .map(|(idx, _)| idx)
        .collect()
}

/// Forward-fill, then back-fill, then `default` when nothing is valid.
pub fn fill_forward_backward<T: Clone>(values: &[Option<T>], default: T) -> Vec<T> {
    let mut filled: Vec<Option<T>> = values.to_vec();
    let mut last: Option<T> = None;
    for value in filled.iter_mut() {
        match value {
            Some(v) => last = Some(v.clone()),
            None => *value = last.clone(),
        }
    }
    let mut next: Option<T> = None;
    for value in filled.iter_mut().rev() {
        match value {
            Some(v) => next = Some(v.clone()),
            None => *value = next.clone(),
        }
    }
    filled
        .into_iter()
        .map(|value| value.unwrap_or_else(|| default.clone()))
        .collect()
}

/// Rows whose group has no valid value at all.
pub fn grouped_fatal_rows(values: &[Option<f64>], groups: &[Option<String>]) -> RowSet {
    let anchors = group_anchors(values, groups);
    values
        .iter()
        .zip(groups)
        .enumerate()
        .filter(|(_, (value, group))| match group {
            Some(key) => !anchors.contains_key(key),
            None => value.is_none(),
        })
        .map(|(idx, _)| idx)
        .collect()
}

/// Rows that are invalid themselves but whose group carries a valid value.
pub fn grouped_repairable_rows(values: &[Option<f64>], groups: &[Option<String>]) -> RowSet {
    let anchors = group_anchors(values, groups);
    values
        .iter()
        .zip(groups)
        .enumerate()
        .filter(|(_, (value, group))| {
            value.is_none() && group.as_ref().is_some_and(|key| anchors.contains_key(key))
        })
        .map(|(idx, _)| idx)
        .collect()
}

/// Propagates the first valid value of each group to every row of the group.
pub fn repair_grouped(values: &[Option<f64>], groups: &[Option<String>]) -> Vec<Option<f64>> {
    let anchors = group_anchors(values, groups);
    values
        .iter()
        .zip(groups)
        .map(|(value, group)| match group {
            Some(key) => anchors.get(key).copied().or(*value),
            None => *value,
        })
        .collect()
}

fn group_anchors(values: &[Option<f64>], groups: &[Option<String>]) -> HashMap<String, f64> {
    let mut anchors = HashMap::new();
    for (value, group) in values.iter().zip(groups) {
        if let (Some(value), Some(key)) = (value, group) {
            anchors.entry(key.clone()).or_insert(*value);
        }
    }
    anchors
}

/// Rows repeating a key already seen earlier; the first occurrence is kept.
pub fn duplicate_rows(keys: &[Option<String>]) -> RowSet {
    let mut seen = HashSet::new();
    keys.iter()
        .enumerate()
        .filter(|(_, key)| key.as_ref().is_some_and(|k| !seen.insert(k.clone())))
        .map(|(idx, _)| idx)
        .collect()
}
