use std::fmt;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A table cell. `None` is the null sentinel used for absent information.
pub type Cell = Option<Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Guid(Uuid),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            Value::Guid(g) => g.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Renders a cell for text output; the null sentinel becomes an empty field.
pub fn cell_display(cell: &Cell) -> String {
    cell.as_ref().map(Value::as_display).unwrap_or_default()
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d.%m.%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_utc());
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

pub fn parse_naive_time(value: &str) -> Result<NaiveTime> {
    const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];
    for fmt in TIME_FORMATS {
        if let Ok(parsed) = NaiveTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as time"))
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Non-empty textual content of a cell. Typed values are rendered.
pub fn cell_text(cell: &Cell) -> Option<String> {
    match cell {
        None => None,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(other) => Some(other.as_display()),
    }
}

/// Finite numeric content of a cell.
pub fn cell_f64(cell: &Cell) -> Option<f64> {
    let parsed = match cell.as_ref()? {
        Value::Float(f) => *f,
        Value::Integer(i) => *i as f64,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}

pub fn cell_flag(cell: &Cell) -> Option<bool> {
    match cell.as_ref()? {
        Value::Boolean(b) => Some(*b),
        Value::Integer(0) => Some(false),
        Value::Integer(1) => Some(true),
        Value::String(s) => parse_flag(s),
        _ => None,
    }
}

pub fn cell_date(cell: &Cell) -> Option<NaiveDate> {
    match cell.as_ref()? {
        Value::Date(d) => Some(*d),
        Value::DateTime(dt) => Some(dt.date()),
        Value::String(s) => parse_naive_date(s.trim()).ok(),
        _ => None,
    }
}

pub fn cell_time(cell: &Cell) -> Option<NaiveTime> {
    match cell.as_ref()? {
        Value::Time(t) => Some(*t),
        Value::DateTime(dt) => Some(dt.time()),
        Value::String(s) => parse_naive_time(s.trim()).ok(),
        _ => None,
    }
}

pub fn cell_datetime(cell: &Cell) -> Option<NaiveDateTime> {
    match cell.as_ref()? {
        Value::DateTime(dt) => Some(*dt),
        Value::String(s) => parse_naive_datetime(s.trim()).ok(),
        _ => None,
    }
}

/// Epoch-millisecond timestamps, as written by phone sensor loggers.
pub fn cell_epoch_millis(cell: &Cell) -> Option<NaiveDateTime> {
    let millis = match cell.as_ref()? {
        Value::DateTime(dt) => return Some(*dt),
        Value::Integer(i) => *i,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    if millis < 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_naive_date_supports_multiple_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert_eq!(parse_naive_date("2024-05-06").unwrap(), expected);
        assert_eq!(parse_naive_date("06/05/2024").unwrap(), expected);
        assert_eq!(parse_naive_date("06.05.2024").unwrap(), expected);
        assert!(parse_naive_date("2024-13-06").is_err());
    }

    #[test]
    fn parse_naive_datetime_accepts_fractional_seconds() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_milli_opt(14, 30, 0, 250)
            .unwrap();
        assert_eq!(
            parse_naive_datetime("2024-05-06T14:30:00.250").unwrap(),
            expected
        );
        assert_eq!(
            parse_naive_datetime("2024-05-06T14:30:00.250Z").unwrap(),
            expected
        );
        assert!(parse_naive_datetime("yesterday").is_err());
    }

    #[test]
    fn cell_f64_rejects_non_finite_and_text() {
        assert_eq!(cell_f64(&Some(Value::String(" 4.5 ".into()))), Some(4.5));
        assert_eq!(cell_f64(&Some(Value::Integer(3))), Some(3.0));
        assert_eq!(cell_f64(&Some(Value::String("NaN".into()))), None);
        assert_eq!(cell_f64(&Some(Value::String("abc".into()))), None);
        assert_eq!(cell_f64(&None), None);
    }

    #[test]
    fn cell_text_treats_blank_strings_as_missing() {
        assert_eq!(cell_text(&Some(Value::String("  ".into()))), None);
        assert_eq!(
            cell_text(&Some(Value::String(" Car ".into()))),
            Some("Car".to_string())
        );
        assert_eq!(cell_text(&Some(Value::Integer(7))), Some("7".to_string()));
    }

    #[test]
    fn cell_epoch_millis_converts_to_utc() {
        let parsed = cell_epoch_millis(&Some(Value::String("1546300800500".into()))).unwrap();
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2019, 1, 1)
                .unwrap()
                .and_hms_milli_opt(0, 0, 0, 500)
                .unwrap()
        );
        assert_eq!(cell_epoch_millis(&Some(Value::String("-5".into()))), None);
    }

    #[test]
    fn display_renders_integral_floats_without_fraction() {
        assert_eq!(Value::Float(50.0).as_display(), "50");
        assert_eq!(Value::Float(8.700645).as_display(), "8.700645");
        let time = NaiveTime::from_hms_milli_opt(8, 0, 1, 40).unwrap();
        assert_eq!(Value::Time(time).as_display(), "08:00:01.040");
        assert_eq!(cell_display(&None), "");
    }
}
