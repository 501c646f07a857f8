//! Generic point-cloud export: one row per GPS fix, the position encoded as a
//! WKT `POINT (<lon> <lat>)` geometry. Exports repeat a point once per road
//! segment it touches; only the first occurrence of a `point_id` is kept.

use std::rc::Rc;

use chrono::NaiveDateTime;

use crate::{
    calculator::{
        ColumnCalculator, GroupedNumericCalculator, RowIdCalculator, SourceColumn,
        TemporalCalculator, TemporalEncoding, TokenDictionary, TrajectoryIdCalculator,
        write_columns,
    },
    column::Column,
    converter::{SourceFormat, TableLayout, TableRole},
    data::{Value, cell_datetime, cell_text},
    geo::{GeoPoint, parse_wkt_point},
    kinematics::{
        DerivedAcceleration, DerivedAccelerationDirection, DerivedSpeed, DerivedSpeedDirection,
        MotionSource,
    },
    repair::{RowSet, Vocabulary, duplicate_rows},
    table::{SourceSet, Table},
};

use super::{optional_category, optional_flag};

pub(super) const NAME: &str = "geo_points";
const TABLE: &str = "geo_points";

const POINT_ID: &str = "point_id";
const TRIP_ID: &str = "trip_id";
const TIMESTAMP: &str = "timestamp";
const GEOMETRY: &str = "geometry";

fn column(name: &str) -> SourceColumn {
    SourceColumn::new(TABLE, name)
}

fn points(source: &SourceSet) -> Vec<Option<GeoPoint>> {
    match source.column(TABLE, GEOMETRY) {
        Some(cells) => cells
            .iter()
            .map(|cell| cell_text(cell).and_then(|text| parse_wkt_point(&text)))
            .collect(),
        None => vec![None; source.row_count()],
    }
}

/// Latitude and longitude from the geometry column. Geometry is never
/// repaired: a row whose geometry does not parse is dropped.
struct GeometryCalculator;

impl ColumnCalculator for GeometryCalculator {
    fn targets(&self) -> &[Column] {
        &[Column::Latitude, Column::Longitude]
    }

    fn sources(&self) -> Vec<String> {
        vec![column(GEOMETRY).to_string()]
    }

    fn is_repairable(&self, source: &SourceSet) -> bool {
        points(source).iter().any(Option::is_some)
    }

    fn find_fatal_corruptions(&self, source: &SourceSet) -> RowSet {
        points(source)
            .iter()
            .enumerate()
            .filter(|(_, point)| point.is_none())
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
        let (latitudes, longitudes) = points(source)
            .into_iter()
            .map(|point| match point {
                Some(p) => (Some(Value::Float(p.lat)), Some(Value::Float(p.lon))),
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

struct GeometryMotion;

impl MotionSource for GeometryMotion {
    fn trajectory_keys(&self, source: &SourceSet) -> Vec<Option<String>> {
        column(TRIP_ID).texts(source)
    }

    fn positions(&self, source: &SourceSet) -> Vec<Option<GeoPoint>> {
        points(source)
    }

    fn instants(&self, source: &SourceSet) -> Vec<Option<NaiveDateTime>> {
        match source.column(TABLE, TIMESTAMP) {
            Some(cells) => cells.iter().map(cell_datetime).collect(),
            None => vec![None; source.row_count()],
        }
    }
}

#[derive(Debug, Default)]
pub struct GeoPoints;

impl SourceFormat for GeoPoints {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> TableLayout {
        TableLayout::single(TableRole {
            name: TABLE,
            file_suffix: None,
            required_columns: &[POINT_ID, TRIP_ID, TIMESTAMP, GEOMETRY],
        })
    }

    fn calculators(
        &self,
        source: &SourceSet,
        tokens: &TokenDictionary,
    ) -> Vec<Box<dyn ColumnCalculator>> {
        let motion: Rc<dyn MotionSource> = Rc::new(GeometryMotion);
        vec![
            Box::new(RowIdCalculator),
            Box::new(TrajectoryIdCalculator::new(
                column(TRIP_ID),
                Vocabulary::Integer,
                tokens.clone(),
            )),
            Box::new(
                TemporalCalculator::new(column(TIMESTAMP), TemporalEncoding::DateTime)
                    .keyed_by(column(TRIP_ID)),
            ),
            Box::new(GeometryCalculator),
            Box::new(GroupedNumericCalculator::new(
                Column::SpeedLimit,
                column("speed_limit"),
                column("road_type"),
            )),
            optional_category(source, Column::RoadType, column("road_type")),
            optional_category(source, Column::RoadId, column("road_id")),
            optional_flag(source, Column::OneWay, column("one_way"), false),
            optional_category(source, Column::VehicleType, column("vehicle_type")),
            Box::new(DerivedSpeed::new(Rc::clone(&motion)).provided_by(column("speed"))),
            Box::new(DerivedSpeedDirection::new(Rc::clone(&motion))),
            Box::new(DerivedAcceleration::new(Rc::clone(&motion)).from_speed(column("speed"))),
            Box::new(DerivedAccelerationDirection::new(motion)),
        ]
    }

    /// Repeated `point_id`s; the first occurrence is kept.
    fn irrelevant_rows(&self, source: &SourceSet) -> RowSet {
        duplicate_rows(&column(POINT_ID).texts(source))
    }
}
