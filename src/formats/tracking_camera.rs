//! Drone/tracking-camera export: three related tables per recording.
//!
//! - `<n>_recordingMeta`: one row of recording constants (frame rate, start
//!   date and time, geographic origin, speed limit in m/s, location).
//! - `<n>_tracksMeta`: one row per track with its vehicle class.
//! - `<n>_tracks`: one row per track and frame, positions and motion vectors
//!   in a local metric frame (x east, y north).
//!
//! The recording constants and the track lookup are joined once per
//! validation into a [`RecordingIndex`] that every handler shares.

use std::{collections::HashMap, rc::Rc};

use chrono::{NaiveDateTime, TimeDelta};

use crate::{
    calculator::{
        ColumnCalculator, ConstantCalculator, RowIdCalculator, SourceColumn, TokenDictionary,
        TrajectoryIdCalculator, overwrite, write_columns,
    },
    column::Column,
    converter::{SourceFormat, TableLayout, TableRole},
    data::{Cell, Value, cell_date, cell_f64, cell_text, cell_time},
    geo::{GeoPoint, heading, offset},
    kinematics::MPS_TO_KMH,
    repair::{
        self, NumericPolicy, RowSet, Vocabulary, category_values, classify_temporal,
        fill_forward_backward, fill_numeric, has_valid_numeric, invalid_category_rows,
        invalid_numeric_rows, numeric_values, repair_temporal, segments,
    },
    table::{SourceSet, Table},
};

pub(super) const NAME: &str = "tracking_camera";

const RECORDING_META: &str = "recordingMeta";
const TRACKS_META: &str = "tracksMeta";
const TRACKS: &str = "tracks";

fn tracks(column: &str) -> SourceColumn {
    SourceColumn::new(TRACKS, column)
}

/// Integer track ids, normalised so `"7"` and `"7.0"` agree.
fn track_key(cell: &Cell) -> Option<String> {
    cell_text(cell).and_then(|text| Vocabulary::IntegralNumber.canonical(&text))
}

fn track_keys(column: &SourceColumn, source: &SourceSet) -> Vec<Option<String>> {
    match column.cells(source) {
        Some(cells) => cells.iter().map(track_key).collect(),
        None => vec![None; source.row_count()],
    }
}

fn frame_tick(cell: &Cell) -> Option<i64> {
    cell_f64(cell)
        .filter(|frame| *frame >= 0.0 && frame.fract() == 0.0)
        .map(|frame| frame as i64)
}

/// Recording-level constants plus the track id → vehicle class lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingIndex {
    pub frame_rate: Option<f64>,
    pub start: Option<NaiveDateTime>,
    pub origin: Option<GeoPoint>,
    /// km/h; the export writes -1 m/s when no limit applies.
    pub speed_limit: Option<f64>,
    pub location_id: Option<String>,
    classes: HashMap<String, Option<String>>,
}

impl RecordingIndex {
    pub fn build(source: &SourceSet) -> Self {
        let meta = |column: &str| {
            source
                .column(RECORDING_META, column)
                .and_then(|cells| cells.first())
        };
        let frame_rate = meta("frameRate")
            .and_then(cell_f64)
            .filter(|rate| *rate > 0.0);
        let start = match (meta("date").and_then(cell_date), meta("startTime").and_then(cell_time)) {
            (Some(date), Some(time)) => Some(NaiveDateTime::new(date, time)),
            _ => None,
        };
        let origin = match (
            meta("latLocation").and_then(cell_f64),
            meta("lonLocation").and_then(cell_f64),
        ) {
            (Some(lat), Some(lon)) => GeoPoint::new(lat, lon),
            _ => None,
        };
        let speed_limit = meta("speedLimit")
            .and_then(cell_f64)
            .filter(|limit| *limit >= 0.0)
            .map(|mps| mps * MPS_TO_KMH);
        let location_id = meta("locationId").and_then(cell_text);

        let mut classes = HashMap::new();
        if let (Some(ids), Some(kinds)) = (
            source.column(TRACKS_META, "id"),
            source.column(TRACKS_META, "class"),
        ) {
            for (id, kind) in ids.iter().zip(kinds) {
                if let Some(id) = track_key(id) {
                    classes.entry(id).or_insert_with(|| cell_text(kind));
                }
            }
        }

        Self {
            frame_rate,
            start,
            origin,
            speed_limit,
            location_id,
            classes,
        }
    }

    pub fn track_count(&self) -> usize {
        self.classes.len()
    }

    pub fn knows_track(&self, track: &str) -> bool {
        self.classes.contains_key(track)
    }

    /// Vehicle class of a known track; a blank class reads as unknown.
    pub fn class_of(&self, track: &str) -> Option<&str> {
        self.classes
            .get(track)
            .map(|class| class.as_deref().unwrap_or(repair::UNKNOWN))
    }

    /// Wall-clock instant of a frame; `None` when it is not representable.
    pub fn instant(&self, frame: i64) -> Option<NaiveDateTime> {
        let millis = (frame as f64 / self.frame_rate? * 1000.0).round();
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return None;
        }
        self.start?
            .checked_add_signed(TimeDelta::try_milliseconds(millis as i64)?)
    }
}

/// Two numeric source columns forming a vector in the local frame.
#[derive(Debug, Clone)]
struct VectorColumns {
    x: SourceColumn,
    y: SourceColumn,
    track: SourceColumn,
}

impl VectorColumns {
    fn new(x: &str, y: &str) -> Self {
        Self {
            x: tracks(x),
            y: tracks(y),
            track: tracks("id"),
        }
    }

    fn policy() -> NumericPolicy {
        NumericPolicy::new(None).interpolated()
    }

    fn sources(&self) -> Vec<String> {
        vec![self.x.to_string(), self.y.to_string()]
    }

    fn usable(&self, source: &SourceSet) -> bool {
        [&self.x, &self.y].iter().all(|column| {
            column
                .cells(source)
                .is_some_and(|cells| has_valid_numeric(cells, None))
        })
    }

    fn invalid_rows(&self, source: &SourceSet) -> RowSet {
        [&self.x, &self.y]
            .iter()
            .filter_map(|column| column.cells(source))
            .flat_map(|cells| invalid_numeric_rows(cells, None))
            .collect()
    }

    /// Fills gaps from samples of the same track only.
    fn repair(&self, source: &mut SourceSet) -> bool {
        let keys = track_keys(&self.track, source);
        for column in [&self.x, &self.y] {
            let Some(cells) = column.cells(source) else {
                return false;
            };
            let values = numeric_values(cells, None);
            let repaired = segments(&keys)
                .into_iter()
                .flat_map(|(start, end)| fill_numeric(&values[start..=end], &Self::policy()))
                .map(|value| Some(Value::Float(value)))
                .collect();
            if !overwrite(source, column, repaired) {
                return false;
            }
        }
        true
    }

    fn components(&self, source: &SourceSet) -> Vec<Option<(f64, f64)>> {
        let (Some(xs), Some(ys)) = (self.x.cells(source), self.y.cells(source)) else {
            return vec![None; source.row_count()];
        };
        numeric_values(xs, None)
            .into_iter()
            .zip(numeric_values(ys, None))
            .map(|(x, y)| Some((x?, y?)))
            .collect()
    }
}

/// Date and time from frame numbers; frames are repaired per track with the
/// temporal midpoint policy.
struct FrameClock {
    index: Rc<RecordingIndex>,
    frame: SourceColumn,
    track: SourceColumn,
}

impl FrameClock {
    /// Frames with a representable wall-clock instant.
    fn ticks(&self, source: &SourceSet) -> Option<Vec<Option<i64>>> {
        self.frame.cells(source).map(|cells| {
            cells
                .iter()
                .map(|cell| frame_tick(cell).filter(|frame| self.index.instant(*frame).is_some()))
                .collect()
        })
    }
}

impl ColumnCalculator for FrameClock {
    fn targets(&self) -> &[Column] {
        &[Column::Date, Column::Time]
    }

    fn sources(&self) -> Vec<String> {
        vec![
            self.frame.to_string(),
            format!("{RECORDING_META}.frameRate"),
            format!("{RECORDING_META}.startTime"),
        ]
    }

    fn is_repairable(&self, source: &SourceSet) -> bool {
        self.index.frame_rate.is_some()
            && self.index.start.is_some()
            && self
                .ticks(source)
                .is_some_and(|ticks| ticks.iter().any(Option::is_some))
    }

    fn find_fatal_corruptions(&self, source: &SourceSet) -> RowSet {
        self.ticks(source)
            .map(|ticks| classify_temporal(&ticks, &track_keys(&self.track, source)).fatal)
            .unwrap_or_default()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        self.ticks(source)
            .map(|ticks| classify_temporal(&ticks, &track_keys(&self.track, source)).repairable)
            .unwrap_or_default()
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        let Some(ticks) = self.ticks(source) else {
            return false;
        };
        let repaired = repair_temporal(&ticks, &track_keys(&self.track, source))
            .into_iter()
            .map(|tick| tick.map(Value::Integer))
            .collect();
        overwrite(source, &self.frame, repaired)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let Some(ticks) = self.ticks(source) else {
            return false;
        };
        let instants = ticks
            .iter()
            .map(|tick| tick.and_then(|frame| self.index.instant(frame)))
            .collect::<Vec<_>>();
        let dates = instants
            .iter()
            .map(|instant| instant.map(|dt| Value::Date(dt.date())))
            .collect();
        let times = instants
            .iter()
            .map(|instant| instant.map(|dt| Value::Time(dt.time())))
            .collect();
        write_columns(destination, vec![(Column::Date, dates), (Column::Time, times)])
    }
}

/// Latitude and longitude from metric offsets to the recording origin.
struct CameraPosition {
    index: Rc<RecordingIndex>,
    offsets: VectorColumns,
}

impl ColumnCalculator for CameraPosition {
    fn targets(&self) -> &[Column] {
        &[Column::Latitude, Column::Longitude]
    }

    fn sources(&self) -> Vec<String> {
        self.offsets.sources()
    }

    fn is_repairable(&self, source: &SourceSet) -> bool {
        self.index.origin.is_some() && self.offsets.usable(source)
    }

    fn find_fatal_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        self.offsets.invalid_rows(source)
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        self.offsets.repair(source)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let Some(origin) = self.index.origin else {
            return false;
        };
        let (latitudes, longitudes) = self
            .offsets
            .components(source)
            .into_iter()
            .map(|vector| match vector {
                Some((east, north)) => {
                    let point = offset(origin, east, north);
                    (Some(Value::Float(point.lat)), Some(Value::Float(point.lon)))
                }
                None => (None, None),
            })
            .unzip();
        write_columns(
            destination,
            vec![
                (Column::Latitude, latitudes),
                (Column::Longitude, longitudes),
            ],
        )
    }
}

/// Speed in km/h and heading from the velocity vector.
struct CameraVelocity {
    velocity: VectorColumns,
}

impl ColumnCalculator for CameraVelocity {
    fn targets(&self) -> &[Column] {
        &[Column::Speed, Column::SpeedDirection]
    }

    fn sources(&self) -> Vec<String> {
        self.velocity.sources()
    }

    fn is_repairable(&self, source: &SourceSet) -> bool {
        self.velocity.usable(source)
    }

    fn find_fatal_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        self.velocity.invalid_rows(source)
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        self.velocity.repair(source)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let (speeds, headings) = self
            .velocity
            .components(source)
            .into_iter()
            .map(|vector| match vector {
                Some((vx, vy)) => (
                    Some(Value::Float(vx.hypot(vy) * MPS_TO_KMH)),
                    Some(Value::Float(heading(vx, vy))),
                ),
                None => (None, None),
            })
            .unzip();
        write_columns(
            destination,
            vec![(Column::Speed, speeds), (Column::SpeedDirection, headings)],
        )
    }
}

/// Acceleration magnitude, negative when braking, and its heading.
struct CameraAcceleration {
    acceleration: VectorColumns,
    velocity: VectorColumns,
}

impl ColumnCalculator for CameraAcceleration {
    fn targets(&self) -> &[Column] {
        &[Column::Acceleration, Column::AccelerationDirection]
    }

    fn sources(&self) -> Vec<String> {
        self.acceleration.sources()
    }

    fn is_repairable(&self, source: &SourceSet) -> bool {
        self.acceleration.usable(source)
    }

    fn find_fatal_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        self.acceleration.invalid_rows(source)
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        self.acceleration.repair(source)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let velocities = self.velocity.components(source);
        let (magnitudes, headings) = self
            .acceleration
            .components(source)
            .into_iter()
            .zip(velocities)
            .map(|(acceleration, velocity)| {
                let Some((ax, ay)) = acceleration else {
                    return (None, None);
                };
                let magnitude = ax.hypot(ay);
                let signed = match velocity {
                    Some((vx, vy)) if ax * vx + ay * vy < 0.0 => -magnitude,
                    _ => magnitude,
                };
                (
                    Some(Value::Float(signed)),
                    Some(Value::Float(heading(ax, ay))),
                )
            })
            .unzip();
        write_columns(
            destination,
            vec![
                (Column::Acceleration, magnitudes),
                (Column::AccelerationDirection, headings),
            ],
        )
    }
}

/// Road id `<locationId>:<laneId>`, lanes filled like a category.
struct LaneRoadId {
    index: Rc<RecordingIndex>,
    lane: SourceColumn,
}

impl ColumnCalculator for LaneRoadId {
    fn targets(&self) -> &[Column] {
        &[Column::RoadId]
    }

    fn sources(&self) -> Vec<String> {
        vec![self.lane.to_string()]
    }

    fn is_repairable(&self, source: &SourceSet) -> bool {
        self.lane.cells(source).is_some()
    }

    fn find_fatal_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn find_repairable_corruptions(&self, source: &SourceSet) -> RowSet {
        self.lane
            .cells(source)
            .map(|cells| invalid_category_rows(cells, &Vocabulary::IntegralNumber))
            .unwrap_or_default()
    }

    fn repair_column(&self, source: &mut SourceSet) -> bool {
        let Some(cells) = self.lane.cells(source) else {
            return false;
        };
        let lanes = category_values(cells, &Vocabulary::IntegralNumber);
        let filled = fill_forward_backward(&lanes, repair::UNKNOWN.to_string())
            .into_iter()
            .map(|lane| Some(Value::String(lane)))
            .collect();
        overwrite(source, &self.lane, filled)
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let Some(cells) = self.lane.cells(source) else {
            return false;
        };
        let road_ids = cells
            .iter()
            .map(|cell| {
                let lane = cell_text(cell)?;
                let road = match &self.index.location_id {
                    Some(location) => format!("{location}:{lane}"),
                    None => lane,
                };
                Some(Value::String(road))
            })
            .collect();
        write_columns(destination, vec![(Column::RoadId, road_ids)])
    }
}

/// Vehicle class looked up through tracksMeta. A sample whose track has no
/// metadata row cannot be classified and is dropped.
struct VehicleClass {
    index: Rc<RecordingIndex>,
    track: SourceColumn,
}

impl ColumnCalculator for VehicleClass {
    fn targets(&self) -> &[Column] {
        &[Column::VehicleType]
    }

    fn sources(&self) -> Vec<String> {
        vec![self.track.to_string(), format!("{TRACKS_META}.class")]
    }

    fn is_repairable(&self, _source: &SourceSet) -> bool {
        self.index.track_count() > 0
    }

    fn find_fatal_corruptions(&self, source: &SourceSet) -> RowSet {
        let Some(cells) = self.track.cells(source) else {
            return RowSet::new();
        };
        cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| track_key(cell).is_some_and(|id| !self.index.knows_track(&id)))
            .map(|(idx, _)| idx)
            .collect()
    }

    fn find_repairable_corruptions(&self, _source: &SourceSet) -> RowSet {
        RowSet::new()
    }

    fn repair_column(&self, _source: &mut SourceSet) -> bool {
        true
    }

    fn calculate_column(&self, source: &SourceSet, destination: &mut Table) -> bool {
        let Some(cells) = self.track.cells(source) else {
            return false;
        };
        let classes = cells
            .iter()
            .map(|cell| {
                let id = track_key(cell)?;
                self.index
                    .class_of(&id)
                    .map(|class| Value::String(class.to_string()))
            })
            .collect();
        write_columns(destination, vec![(Column::VehicleType, classes)])
    }
}

#[derive(Debug, Default)]
pub struct TrackingCamera;

impl SourceFormat for TrackingCamera {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> TableLayout {
        TableLayout {
            primary: TableRole {
                name: TRACKS,
                file_suffix: Some(TRACKS),
                required_columns: &[
                    "frame",
                    "id",
                    "x",
                    "y",
                    "xVelocity",
                    "yVelocity",
                    "xAcceleration",
                    "yAcceleration",
                ],
            },
            auxiliary: vec![
                TableRole {
                    name: RECORDING_META,
                    file_suffix: Some(RECORDING_META),
                    required_columns: &[
                        "id",
                        "frameRate",
                        "date",
                        "startTime",
                        "latLocation",
                        "lonLocation",
                    ],
                },
                TableRole {
                    name: TRACKS_META,
                    file_suffix: Some(TRACKS_META),
                    required_columns: &["id", "class"],
                },
            ],
        }
    }

    fn calculators(
        &self,
        source: &SourceSet,
        tokens: &TokenDictionary,
    ) -> Vec<Box<dyn ColumnCalculator>> {
        let index = Rc::new(RecordingIndex::build(source));
        let speed_limit: Box<dyn ColumnCalculator> = match index.speed_limit {
            Some(limit) => Box::new(ConstantCalculator::new(
                Column::SpeedLimit,
                Value::Float(limit),
            )),
            None => Box::new(ConstantCalculator::null(Column::SpeedLimit)),
        };
        let road_id: Box<dyn ColumnCalculator> = if source.column(TRACKS, "laneId").is_some() {
            Box::new(LaneRoadId {
                index: Rc::clone(&index),
                lane: tracks("laneId"),
            })
        } else {
            Box::new(ConstantCalculator::null(Column::RoadId))
        };

        vec![
            Box::new(RowIdCalculator),
            Box::new(TrajectoryIdCalculator::new(
                tracks("id"),
                Vocabulary::IntegralNumber,
                tokens.clone(),
            )),
            Box::new(FrameClock {
                index: Rc::clone(&index),
                frame: tracks("frame"),
                track: tracks("id"),
            }),
            Box::new(CameraPosition {
                index: Rc::clone(&index),
                offsets: VectorColumns::new("x", "y"),
            }),
            speed_limit,
            Box::new(ConstantCalculator::null(Column::RoadType)),
            road_id,
            Box::new(ConstantCalculator::null(Column::OneWay)),
            Box::new(VehicleClass {
                index,
                track: tracks("id"),
            }),
            Box::new(CameraVelocity {
                velocity: VectorColumns::new("xVelocity", "yVelocity"),
            }),
            Box::new(CameraAcceleration {
                acceleration: VectorColumns::new("xAcceleration", "yAcceleration"),
                velocity: VectorColumns::new("xVelocity", "yVelocity"),
            }),
        ]
    }
}
