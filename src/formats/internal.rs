//! The tool's own export format: the unified columns written back out,
//! separated by semicolons. Only the identity and position columns are
//! required; everything else is read when present and derived or null-filled
//! otherwise.

use std::rc::Rc;

use chrono::NaiveDateTime;

use crate::{
    calculator::{
        ColumnCalculator, NumericCalculator, RowIdCalculator, SourceColumn, TemporalCalculator,
        TemporalEncoding, TokenDictionary, TrajectoryIdCalculator,
    },
    column::Column,
    converter::{SourceFormat, TableLayout, TableRole},
    data::{cell_date, cell_time},
    geo::GeoPoint,
    kinematics::{
        DerivedAcceleration, DerivedAccelerationDirection, DerivedSpeed, DerivedSpeedDirection,
        MotionSource,
    },
    repair::{NumericPolicy, Vocabulary, has_valid_numeric, numeric_values},
    table::SourceSet,
};

use super::{optional_category, optional_flag};

pub(super) const NAME: &str = "internal";
const TABLE: &str = "internal";

fn column(name: &str) -> SourceColumn {
    SourceColumn::new(TABLE, name)
}

/// Date and time of day kept in two columns.
struct SplitClockMotion;

impl MotionSource for SplitClockMotion {
    fn trajectory_keys(&self, source: &SourceSet) -> Vec<Option<String>> {
        column(Column::TrajectoryId.name()).texts(source)
    }

    fn positions(&self, source: &SourceSet) -> Vec<Option<GeoPoint>> {
        let (Some(lat), Some(lon)) = (
            source.column(TABLE, Column::Latitude.name()),
            source.column(TABLE, Column::Longitude.name()),
        ) else {
            return vec![None; source.row_count()];
        };
        numeric_values(lat, None)
            .into_iter()
            .zip(numeric_values(lon, None))
            .map(|(lat, lon)| GeoPoint::new(lat?, lon?))
            .collect()
    }

    fn instants(&self, source: &SourceSet) -> Vec<Option<NaiveDateTime>> {
        let (Some(dates), Some(times)) = (
            source.column(TABLE, Column::Date.name()),
            source.column(TABLE, Column::Time.name()),
        ) else {
            return vec![None; source.row_count()];
        };
        dates
            .iter()
            .zip(times)
            .map(|(date, time)| Some(NaiveDateTime::new(cell_date(date)?, cell_time(time)?)))
            .collect()
    }
}

/// The provided numeric column when it carries any valid value, else the
/// derived calculator.
fn provided_or(
    source: &SourceSet,
    target: Column,
    derived: Box<dyn ColumnCalculator>,
) -> Box<dyn ColumnCalculator> {
    let provided = column(target.name());
    let usable = provided
        .cells(source)
        .is_some_and(|cells| has_valid_numeric(cells, target.value_range()));
    if usable {
        Box::new(NumericCalculator::new(
            target,
            provided,
            NumericPolicy::new(target.value_range()),
        ))
    } else {
        derived
    }
}

#[derive(Debug, Default)]
pub struct Internal;

impl SourceFormat for Internal {
    fn name(&self) -> &'static str {
        NAME
    }

    fn separator(&self) -> u8 {
        b';'
    }

    fn layout(&self) -> TableLayout {
        TableLayout::single(TableRole {
            name: TABLE,
            file_suffix: None,
            required_columns: &["trajectory_id", "date", "time", "latitude", "longitude"],
        })
    }

    fn calculators(
        &self,
        source: &SourceSet,
        tokens: &TokenDictionary,
    ) -> Vec<Box<dyn ColumnCalculator>> {
        let trajectory = column(Column::TrajectoryId.name());
        let motion: Rc<dyn MotionSource> = Rc::new(SplitClockMotion);
        let position = |target: Column| {
            NumericCalculator::new(
                target,
                column(target.name()),
                NumericPolicy::new(target.value_range()).interpolated(),
            )
        };

        vec![
            Box::new(RowIdCalculator),
            Box::new(TrajectoryIdCalculator::new(
                trajectory.clone(),
                Vocabulary::Any,
                tokens.clone(),
            )),
            Box::new(
                TemporalCalculator::new(column(Column::Date.name()), TemporalEncoding::Date)
                    .keyed_by(trajectory.clone()),
            ),
            Box::new(
                TemporalCalculator::new(column(Column::Time.name()), TemporalEncoding::TimeOfDay)
                    .keyed_by(trajectory),
            ),
            Box::new(position(Column::Latitude)),
            Box::new(position(Column::Longitude)),
            Box::new(
                NumericCalculator::new(
                    Column::SpeedLimit,
                    column(Column::SpeedLimit.name()),
                    NumericPolicy::new(Column::SpeedLimit.value_range()),
                )
                .optional(),
            ),
            optional_category(source, Column::RoadType, column(Column::RoadType.name())),
            optional_category(source, Column::RoadId, column(Column::RoadId.name())),
            optional_flag(source, Column::OneWay, column(Column::OneWay.name()), false),
            optional_category(source, Column::VehicleType, column(Column::VehicleType.name())),
            optional_flag(source, Column::Filtered, column(Column::Filtered.name()), false),
            Box::new(
                DerivedSpeed::new(Rc::clone(&motion)).provided_by(column(Column::Speed.name())),
            ),
            provided_or(
                source,
                Column::SpeedDirection,
                Box::new(DerivedSpeedDirection::new(Rc::clone(&motion))),
            ),
            provided_or(
                source,
                Column::Acceleration,
                Box::new(
                    DerivedAcceleration::new(Rc::clone(&motion))
                        .from_speed(column(Column::Speed.name())),
                ),
            ),
            provided_or(
                source,
                Column::AccelerationDirection,
                Box::new(DerivedAccelerationDirection::new(motion)),
            ),
        ]
    }
}
