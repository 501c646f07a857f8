//! Bicycle-mounted phone logger. A log is one ride: every row belongs to the
//! same trajectory, whose token is drawn once per import session. The logger
//! interleaves accelerometer-only rows without a position; those are trimmed.

use std::rc::Rc;

use log::debug;
use uuid::Uuid;

use crate::{
    calculator::{
        ColumnCalculator, ConstantCalculator, NumericCalculator, RowIdCalculator, SourceColumn,
        TemporalCalculator, TemporalEncoding, TokenDictionary,
    },
    column::Column,
    converter::{SourceFormat, TableLayout, TableRole},
    data::Value,
    kinematics::{
        ColumnMotion, DerivedAcceleration, DerivedAccelerationDirection, DerivedSpeed,
        DerivedSpeedDirection, MotionSource,
    },
    repair::{NumericPolicy, RowSet},
    table::SourceSet,
};

pub(super) const NAME: &str = "bicycle";
const TABLE: &str = "bicycle";
const VEHICLE: &str = "Bicycle";

fn column(name: &str) -> SourceColumn {
    SourceColumn::new(TABLE, name)
}

#[derive(Debug)]
pub struct Bicycle {
    ride: Uuid,
}

impl Bicycle {
    pub fn ride(&self) -> Uuid {
        self.ride
    }
}

impl Default for Bicycle {
    fn default() -> Self {
        Self {
            ride: Uuid::new_v4(),
        }
    }
}

impl SourceFormat for Bicycle {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> TableLayout {
        TableLayout::single(TableRole {
            name: TABLE,
            file_suffix: None,
            required_columns: &["lat", "lon", "timeStamp"],
        })
    }

    fn calculators(
        &self,
        _source: &SourceSet,
        _tokens: &TokenDictionary,
    ) -> Vec<Box<dyn ColumnCalculator>> {
        let motion: Rc<dyn MotionSource> = Rc::new(ColumnMotion {
            key: None,
            latitude: column("lat"),
            longitude: column("lon"),
            timestamp: column("timeStamp"),
            epoch_millis: true,
        });
        let position = |target: Column, name: &str| {
            NumericCalculator::new(
                target,
                column(name),
                NumericPolicy::new(target.value_range()).interpolated(),
            )
        };
        vec![
            Box::new(RowIdCalculator),
            Box::new(ConstantCalculator::new(
                Column::TrajectoryId,
                Value::Guid(self.ride),
            )),
            Box::new(TemporalCalculator::new(
                column("timeStamp"),
                TemporalEncoding::EpochMillis,
            )),
            Box::new(position(Column::Latitude, "lat")),
            Box::new(position(Column::Longitude, "lon")),
            Box::new(ConstantCalculator::new(
                Column::VehicleType,
                Value::String(VEHICLE.to_string()),
            )),
            Box::new(DerivedSpeed::new(Rc::clone(&motion))),
            Box::new(DerivedSpeedDirection::new(Rc::clone(&motion))),
            Box::new(DerivedAcceleration::new(Rc::clone(&motion))),
            Box::new(DerivedAccelerationDirection::new(motion)),
        ]
    }

    /// Accelerometer-only rows: neither latitude nor longitude is present.
    fn irrelevant_rows(&self, source: &SourceSet) -> RowSet {
        let lats = column("lat").texts(source);
        let lons = column("lon").texts(source);
        lats.iter()
            .zip(&lons)
            .enumerate()
            .filter(|(_, (lat, lon))| lat.is_none() && lon.is_none())
            .map(|(idx, _)| idx)
            .collect()
    }

    fn open_session(&mut self) {
        self.ride = Uuid::new_v4();
        debug!("Bicycle ride token {}", self.ride);
    }
}
