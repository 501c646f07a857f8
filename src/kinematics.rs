//! Derived motion columns.
//!
//! Speed, speed direction, acceleration and acceleration direction are read
//! from provided source columns when a format has them, and otherwise
//! computed from consecutive samples of the same trajectory: haversine
//! distance over elapsed time for speed, the initial great-circle bearing for
//! speed direction, and differenced velocity vectors for acceleration. The
//! first sample of a trajectory has nothing to difference against and
//! inherits the first computed value of its trajectory.

use std::rc::Rc;

use chrono::NaiveDateTime;

use crate::{
    calculator::{ColumnCalculator, SourceColumn, overwrite, write_columns},
    column::{Column, SPEED_RANGE},
    data::{Cell, Value, cell_datetime, cell_epoch_millis},
    geo::{GeoPoint, haversine_distance, heading, initial_bearing, local_displacement},
    repair::{
        NumericPolicy, RowSet, fill_numeric, has_valid_numeric, invalid_numeric_rows,
        numeric_values, repair_numeric, segments,
    },
    table::{SourceSet, Table},
};

pub const MPS_TO_KMH: f64 = 3.6;

/// Where a format keeps the trajectory key, position and timestamp of each
/// sample. Implementations read the already repaired source columns.
pub trait MotionSource {
    fn trajectory_keys(&self, source: &SourceSet) -> Vec<Option<String>>;
    fn positions(&self, source: &SourceSet) -> Vec<Option<GeoPoint>>;
    fn instants(&self, source: &SourceSet) -> Vec<Option<NaiveDateTime>>;
}

/// Positions in separate latitude/longitude columns.
pub struct ColumnMotion {
    pub key: Option<SourceColumn>,
    pub latitude: SourceColumn,
    pub longitude: SourceColumn,
    pub timestamp: SourceColumn,
    pub epoch_millis: bool,
}

impl MotionSource for ColumnMotion {
    fn trajectory_keys(&self, source: &SourceSet) -> Vec<Option<String>> {
        match &self.key {
            Some(key) => key.texts(source),
            None => vec![None; source.row_count()],
        }
    }

    fn positions(&self, source: &SourceSet) -> Vec<Option<GeoPoint>> {
        let (Some(lat), Some(lon)) = (self.latitude.cells(source), self.longitude.cells(source))
        else {
            return vec![None; source.row_count()];
        };
        let lats = numeric_values(lat, None);
        let lons = numeric_values(lon, None);
        lats.into_iter()
            .zip(lons)
            .map(|(lat, lon)| GeoPoint::new(lat?, lon?))
            .collect()
    }

    fn instants(&self, source: &SourceSet) -> Vec<Option<NaiveDateTime>> {
        let Some(cells) = self.timestamp.cells(source) else {
            return vec![None; source.row_count()];
        };
        cells
            .iter()
            .map(|cell| {
                if self.epoch_millis {
                    cell_epoch_millis(cell)
                } else {
                    cell_datetime(cell)
                }
            })
            .collect()
    }
}

fn elapsed_secs(from: Option<NaiveDateTime>, to: Option<NaiveDateTime>) -> Option<f64> {
    let secs = (to? - from?).num_milliseconds() as f64 / 1000.0;
    (secs > 0.0).then_some(secs)
}

/// Leading gaps of every trajectory take the first computed value.
fn inherit_leading<K: PartialEq>(values: &mut [Option<f64>], keys: &[K]) {
    for (start, end) in segments(keys) {
        if let Some(first) = values[start..=end].iter().find_map(|v| *v) {
            for value in values[start..=end].iter_mut() {
                if value.is_some() {
                    break;
                }
                *value = Some(first);
            }
        }
    }
}

/// Remaining gaps are patched per trajectory with the numeric policy.
fn fill_per_trajectory<K: PartialEq>(values: &[Option<f64>], keys: &[K]) -> Vec<f64> {
    let policy = NumericPolicy::new(None);
    let mut filled = Vec::with_capacity(values.len());
    for (start, end) in segments(keys) {
        filled.extend(fill_numeric(&values[start..=end], &policy));
    }
    filled
}

/// Speeds in m/s from consecutive positions.
pub fn finite_speeds<K: PartialEq>(
    keys: &[K],
    positions: &[Option<GeoPoint>],
    instants: &[Option<NaiveDateTime>],
) -> Vec<f64> {
    let mut speeds = vec![None; keys.len()];
    for (start, end) in segments(keys) {
        for idx in start + 1..=end {
            if let (Some(from), Some(to), Some(dt)) = (
                positions[idx - 1],
                positions[idx],
                elapsed_secs(instants[idx - 1], instants[idx]),
            ) {
                speeds[idx] = Some(haversine_distance(from, to) / dt);
            }
        }
    }
    inherit_leading(&mut speeds, keys);
    fill_per_trajectory(&speeds, keys)
}

/// Compass bearings of consecutive displacements.
pub fn finite_headings<K: PartialEq>(keys: &[K], positions: &[Option<GeoPoint>]) -> Vec<f64> {
    let mut headings = vec![None; keys.len()];
    for (start, end) in segments(keys) {
        for idx in start + 1..=end {
            if let (Some(from), Some(to)) = (positions[idx - 1], positions[idx])
                && haversine_distance(from, to) > 0.0
            {
                headings[idx] = Some(initial_bearing(from, to));
            }
        }
    }
    inherit_leading(&mut headings, keys);
    fill_per_trajectory(&headings, keys)
}

/// Accelerations in m/s² from consecutive speeds given in m/s.
pub fn finite_accelerations<K: PartialEq>(
    keys: &[K],
    speeds: &[f64],
    instants: &[Option<NaiveDateTime>],
) -> Vec<f64> {
    let mut accelerations = vec![None; keys.len()];
    for (start, end) in segments(keys) {
        for idx in start + 1..=end {
            if let Some(dt) = elapsed_secs(instants[idx - 1], instants[idx]) {
                accelerations[idx] = Some((speeds[idx] - speeds[idx - 1]) / dt);
            }
        }
    }
    inherit_leading(&mut accelerations, keys);
    fill_per_trajectory(&accelerations, keys)
}

/// Compass heading of the differenced velocity vectors.
pub fn acceleration_headings<K: PartialEq>(
    keys: &[K],
    positions: &[Option<GeoPoint>],
    instants: &[Option<NaiveDateTime>],
) -> Vec<f64> {
    let mut velocities: Vec<Option<(f64, f64)>> = vec![None; keys.len()];
    for (start, end) in segments(keys) {
        for idx in start + 1..=end {
            if let (Some(from), Some(to), Some(dt)) = (
                positions[idx - 1],
                positions[idx],
                elapsed_secs(instants[idx - 1], instants[idx]),
            ) {
                let (east, north) = local_displacement(from, to);
                velocities[idx] = Some((east / dt, north / dt));
            }
        }
    }
    let mut headings = vec![None; keys.len()];
    for (start, end) in segments(keys) {
        for idx in start + 1..=end {
            if let (Some((ve0, vn0)), Some((ve1, vn1)), Some(dt)) = (
                velocities[idx - 1],
                velocities[idx],
                elapsed_secs(instants[idx - 1], instants[idx]),
            ) {
                let (ae, an) = ((ve1 - ve0) / dt, (vn1 - vn0) / dt);
                if ae != 0.0 || an != 0.0 {
                    headings[idx] = Some(heading(ae, an));
                }
            }
        }
    }
    inherit_leading(&mut headings, keys);
    fill_per_trajectory(&headings, keys)
}

fn floats(values: impl IntoIterator<Item = f64>) -> Vec<Cell> {
    values.into_iter().map(|v| Some(Value::Float(v))).collect()
}

/// Speed in km/h, from a provided column when usable.
pub struct DerivedSpeed {
    motion: Rc<dyn MotionSource>,
    provided: Option<SourceColumn>,
}

impl DerivedSpeed {
    pub fn new(motion: Rc<dyn MotionSource>) -> Self {
        Self {
            motion,
            provided: None,
        }
    }

    /// Prefers `column`, given in km/h, whenever it has a valid value.
    pub fn provided_by(mut self, column: SourceColumn) -> Self {
        self.provided = Some(column);
        self
    }

    fn provided_cells<'a>(&self, source: &'a SourceSet) -> Option<&'a [Cell]> {
        self.provided
            .as_ref()
            .and_then(|column| column.cells(source))
            .filter(|cells| has_valid_numeric(cells, Some(SPEED_RANGE)))
    }
}

impl ColumnCalculator for DerivedSpeed {
    fn targets(&self) -> &[Column] {
        &[Column::Speed]
    }

    fn sources(&self) -> Vec<String> {
        self.provided.iter().map(ToString::to_string).collect()
    }

    fn is_repairable(&self, _source: &SourceSet) -> bool {
        true
    }

    fn find_fatal_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        self.provided_cells(source)
            .map(|cells| invalid_numeric_rows(cells, Some(SPEED_RANGE)))
            .unwrap_or_default()
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        let (Some(cells), Some(column)) = (self.provided_cells(source), self.provided.as_ref())
        else {
            return true;
        };
        let repaired = floats(repair_numeric(cells, &NumericPolicy::new(Some(SPEED_RANGE))));
        overwrite(source, column, repaired)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let speeds = match self.provided_cells(source) {
            Some(cells) => numeric_values(cells, Some(SPEED_RANGE))
                .into_iter()
                .map(|v| v.map(Value::Float))
                .collect(),
            None => {
                let keys = self.motion.trajectory_keys(source);
                let speeds = finite_speeds(
                    &keys,
                    &self.motion.positions(source),
                    &self.motion.instants(source),
                );
                floats(speeds.into_iter().map(|v| v * MPS_TO_KMH))
            }
        };
        write_columns(destination, vec![(Column::Speed, speeds)])
    }
}

/// Heading of travel between consecutive samples.
pub struct DerivedSpeedDirection {
    motion: Rc<dyn MotionSource>,
}

impl DerivedSpeedDirection {
    pub fn new(motion: Rc<dyn MotionSource>) -> Self {
        Self { motion }
    }
}

impl ColumnCalculator for DerivedSpeedDirection {
    fn targets(&self) -> &[Column] {
        &[Column::SpeedDirection]
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

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let keys = self.motion.trajectory_keys(source);
        let headings = finite_headings(&keys, &self.motion.positions(source));
        write_columns(destination, vec![(Column::SpeedDirection, floats(headings))])
    }
}

/// Longitudinal acceleration in m/s² from consecutive speeds.
pub struct DerivedAcceleration {
    motion: Rc<dyn MotionSource>,
    speed: Option<SourceColumn>,
}

impl DerivedAcceleration {
    pub fn new(motion: Rc<dyn MotionSource>) -> Self {
        Self {
            motion,
            speed: None,
        }
    }

    /// Differentiates the provided km/h speed column when it is usable.
    pub fn from_speed(mut self, column: SourceColumn) -> Self {
        self.speed = Some(column);
        self
    }

    fn speeds_mps(&self, source: &SourceSet, keys: &[Option<String>]) -> Vec<f64> {
        let provided = self
            .speed
            .as_ref()
            .and_then(|column| column.cells(source))
            .filter(|cells| has_valid_numeric(cells, Some(SPEED_RANGE)));
        match provided {
            Some(cells) => repair_numeric(cells, &NumericPolicy::new(Some(SPEED_RANGE)))
                .into_iter()
                .map(|kmh| kmh / MPS_TO_KMH)
                .collect(),
            None => finite_speeds(
                keys,
                &self.motion.positions(source),
                &self.motion.instants(source),
            ),
        }
    }
}

impl ColumnCalculator for DerivedAcceleration {
    fn targets(&self) -> &[Column] {
        &[Column::Acceleration]
    }

    fn sources(&self) -> Vec<String> {
        self.speed.iter().map(ToString::to_string).collect()
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

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let keys = self.motion.trajectory_keys(source);
        let speeds = self.speeds_mps(source, &keys);
        let accelerations = finite_accelerations(&keys, &speeds, &self.motion.instants(source));
        write_columns(destination, vec![(Column::Acceleration, floats(accelerations))])
    }
}

/// Heading of the change of velocity between consecutive samples.
pub struct DerivedAccelerationDirection {
    motion: Rc<dyn MotionSource>,
}

impl DerivedAccelerationDirection {
    pub fn new(motion: Rc<dyn MotionSource>) -> Self {
        Self { motion }
    }
}

impl ColumnCalculator for DerivedAccelerationDirection {
    fn targets(&self) -> &[Column] {
        &[Column::AccelerationDirection]
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

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let keys = self.motion.trajectory_keys(source);
        let headings = acceleration_headings(
            &keys,
            &self.motion.positions(source),
            &self.motion.instants(source),
        );
        write_columns(
            destination,
            vec![(Column::AccelerationDirection, floats(headings))],
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn at(secs: i64) -> Option<NaiveDateTime> {
        Some(start() + Duration::seconds(secs))
    }

    #[test]
    fn first_sample_inherits_second_speed() {
        let keys = ["a"; 3];
        let positions = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.001, 0.0),
            GeoPoint::new(0.003, 0.0),
        ];
        let instants = [at(0), at(10), at(20)];
        let speeds = finite_speeds(&keys, &positions, &instants);
        let step = haversine_distance(GeoPoint::new(0.0, 0.0).unwrap(), GeoPoint::new(0.001, 0.0).unwrap()) / 10.0;
        assert!((speeds[0] - step).abs() < 1e-9);
        assert!((speeds[1] - step).abs() < 1e-9);
        assert!((speeds[2] - 2.0 * step).abs() < 1e-6);
    }

    #[test]
    fn trajectories_are_differenced_separately() {
        let keys = ["a", "a", "b", "b"];
        let positions = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.001),
            GeoPoint::new(10.0, 10.0),
            GeoPoint::new(10.001, 10.0),
        ];
        let headings = finite_headings(&keys, &positions);
        assert!((headings[0] - 90.0).abs() < 1e-3);
        assert!(headings[2].abs() < 1e-9);
        assert!(headings[3].abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_time_is_filled_from_neighbours() {
        let keys = ["a"; 3];
        let positions = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.001, 0.0),
            GeoPoint::new(0.002, 0.0),
        ];
        let instants = [at(0), at(0), at(10)];
        let speeds = finite_speeds(&keys, &positions, &instants);
        assert!(speeds.iter().all(|v| v.is_finite()));
        assert_eq!(speeds[0], speeds[2]);
    }

    #[test]
    fn accelerations_follow_speed_changes() {
        let keys = ["a"; 3];
        let accelerations = finite_accelerations(&keys, &[0.0, 2.0, 6.0], &[at(0), at(1), at(2)]);
        assert_eq!(accelerations, vec![2.0, 2.0, 4.0]);
    }

    #[test]
    fn braking_northbound_points_acceleration_south() {
        let keys = ["a"; 4];
        let positions = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0003, 0.0),
            GeoPoint::new(0.0005, 0.0),
            GeoPoint::new(0.0006, 0.0),
        ];
        let instants = [at(0), at(1), at(2), at(3)];
        let headings = acceleration_headings(&keys, &positions, &instants);
        for heading in headings {
            assert!((heading - 180.0).abs() < 1e-6, "{heading}");
        }
    }
}
