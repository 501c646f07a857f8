//! The unified column vocabulary shared by every import format.
//!
//! [`Column`] is the closed set of fields a unified table carries. Each column
//! knows its canonical name, how it is filtered downstream
//! ([`Classification`]), its admissible numeric range ([`ValueRange`]) and the
//! [`RepairStage`] in which its source data is cleaned during conversion.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Column {
    Id,
    TrajectoryId,
    Date,
    Time,
    Latitude,
    Longitude,
    Speed,
    SpeedLimit,
    Acceleration,
    SpeedDirection,
    AccelerationDirection,
    RoadType,
    RoadId,
    OneWay,
    VehicleType,
    Filtered,
    Order,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    Numeric,
    Date,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Discrete,
    Interval(IntervalKind),
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Discrete => write!(f, "discrete"),
            Classification::Interval(IntervalKind::Numeric) => write!(f, "interval/numeric"),
            Classification::Interval(IntervalKind::Date) => write!(f, "interval/date"),
            Classification::Interval(IntervalKind::Time) => write!(f, "interval/time"),
        }
    }
}

/// Inclusive bounds of a numeric column, with an optionally open upper end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    pub max_inclusive: bool,
}

impl ValueRange {
    pub const fn closed(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            max_inclusive: true,
        }
    }

    pub const fn half_open(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            max_inclusive: false,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() || value < self.min {
            return false;
        }
        if self.max_inclusive {
            value <= self.max
        } else {
            value < self.max
        }
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let close = if self.max_inclusive { ']' } else { ')' };
        write!(f, "[{}, {}{close}", self.min, self.max)
    }
}

/// Source columns are repaired stage by stage: motion depends on clean
/// positions and timestamps, acceleration on clean motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepairStage {
    Structure,
    Motion,
    Acceleration,
}

pub const LATITUDE_RANGE: ValueRange = ValueRange::closed(-90.0, 90.0);
pub const LONGITUDE_RANGE: ValueRange = ValueRange::closed(-180.0, 180.0);
pub const SPEED_RANGE: ValueRange = ValueRange::closed(0.0, 500.0);
pub const SPEED_LIMIT_RANGE: ValueRange = ValueRange::closed(0.0, 300.0);
pub const ACCELERATION_RANGE: ValueRange = ValueRange::closed(-50.0, 50.0);
pub const HEADING_RANGE: ValueRange = ValueRange::half_open(0.0, 360.0);

impl Column {
    pub const ALL: [Column; 17] = [
        Column::Id,
        Column::TrajectoryId,
        Column::Date,
        Column::Time,
        Column::Latitude,
        Column::Longitude,
        Column::Speed,
        Column::SpeedLimit,
        Column::Acceleration,
        Column::SpeedDirection,
        Column::AccelerationDirection,
        Column::RoadType,
        Column::RoadId,
        Column::OneWay,
        Column::VehicleType,
        Column::Filtered,
        Column::Order,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::TrajectoryId => "trajectory_id",
            Column::Date => "date",
            Column::Time => "time",
            Column::Latitude => "latitude",
            Column::Longitude => "longitude",
            Column::Speed => "speed",
            Column::SpeedLimit => "speed_limit",
            Column::Acceleration => "acceleration",
            Column::SpeedDirection => "speed_direction",
            Column::AccelerationDirection => "acceleration_direction",
            Column::RoadType => "road_type",
            Column::RoadId => "road_id",
            Column::OneWay => "one_way",
            Column::VehicleType => "vehicle_type",
            Column::Filtered => "filtered",
            Column::Order => "order",
        }
    }

    pub fn classification(self) -> Classification {
        match self {
            Column::Id
            | Column::TrajectoryId
            | Column::RoadType
            | Column::RoadId
            | Column::OneWay
            | Column::VehicleType
            | Column::Filtered => Classification::Discrete,
            Column::Date => Classification::Interval(IntervalKind::Date),
            Column::Time => Classification::Interval(IntervalKind::Time),
            Column::Latitude
            | Column::Longitude
            | Column::Speed
            | Column::SpeedLimit
            | Column::Acceleration
            | Column::SpeedDirection
            | Column::AccelerationDirection
            | Column::Order => Classification::Interval(IntervalKind::Numeric),
        }
    }

    pub fn value_range(self) -> Option<ValueRange> {
        match self {
            Column::Latitude => Some(LATITUDE_RANGE),
            Column::Longitude => Some(LONGITUDE_RANGE),
            Column::Speed => Some(SPEED_RANGE),
            Column::SpeedLimit => Some(SPEED_LIMIT_RANGE),
            Column::Acceleration => Some(ACCELERATION_RANGE),
            Column::SpeedDirection | Column::AccelerationDirection => Some(HEADING_RANGE),
            Column::Order => Some(ValueRange::closed(0.0, i64::MAX as f64)),
            _ => None,
        }
    }

    pub fn repair_stage(self) -> RepairStage {
        match self {
            Column::Speed | Column::SpeedDirection => RepairStage::Motion,
            Column::Acceleration | Column::AccelerationDirection => RepairStage::Acceleration,
            _ => RepairStage::Structure,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Column::ALL
            .into_iter()
            .find(|column| column.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| anyhow!("Unknown unified column '{s}'"))
    }
}

pub fn column_names() -> Vec<String> {
    Column::ALL.iter().map(|c| c.name().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for column in Column::ALL {
            assert_eq!(column.name().parse::<Column>().unwrap(), column);
        }
        assert!("altitude".parse::<Column>().is_err());
    }

    #[test]
    fn heading_range_excludes_full_turn() {
        assert!(HEADING_RANGE.contains(0.0));
        assert!(HEADING_RANGE.contains(359.9));
        assert!(!HEADING_RANGE.contains(360.0));
        assert!(LATITUDE_RANGE.contains(90.0));
        assert!(!LATITUDE_RANGE.contains(f64::NAN));
    }

    #[test]
    fn stages_order_motion_after_structure() {
        assert_eq!(Column::Latitude.repair_stage(), RepairStage::Structure);
        assert!(Column::Speed.repair_stage() < Column::Acceleration.repair_stage());
        assert_eq!(
            Column::Date.classification(),
            Classification::Interval(IntervalKind::Date)
        );
    }
}
