//! Unit parsing and conversion to the canonical metric units
//!
//! Canonical units: °C, %, hPa, km/h, degrees, mm and mm/h. Sources report
//! values in whatever the provider or the station settings produce, so every
//! client funnels them through [`Unit::to_metric`] or [`parse_measurement`].

use std::str::FromStr;

/// Unit conversion error
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum UnitError {
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Not a number: {0}")]
    NotANumber(String),

    #[error("Cannot convert {from:?} to {to:?}")]
    ConversionNotSupported { from: UnitGroup, to: UnitGroup },
}

/// Physical quantity a unit measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitGroup {
    Temperature,
    Pressure,
    Speed,
    Rain,
    RainRate,
    Humidity,
    Direction,
}

/// Units seen in station and forecast payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Celsius,
    Fahrenheit,
    Hectopascal,
    InchMercury,
    MillimeterMercury,
    Kilopascal,
    KilometersPerHour,
    MetersPerSecond,
    MilesPerHour,
    Knots,
    Beaufort,
    Millimeter,
    Inch,
    MillimeterPerHour,
    InchPerHour,
    Percent,
    Degree,
}

/// Beaufort force (0..=12) to km/h, lower bound of each force
pub const BEAUFORT_KMH: [f64; 13] = [
    0.0, 1.0, 5.0, 11.0, 19.0, 28.0, 38.0, 49.0, 61.0, 74.0, 88.0, 102.0, 117.0,
];

impl Unit {
    pub fn group(&self) -> UnitGroup {
        match self {
            Unit::Celsius | Unit::Fahrenheit => UnitGroup::Temperature,
            Unit::Hectopascal | Unit::InchMercury | Unit::MillimeterMercury | Unit::Kilopascal => {
                UnitGroup::Pressure
            }
            Unit::KilometersPerHour
            | Unit::MetersPerSecond
            | Unit::MilesPerHour
            | Unit::Knots
            | Unit::Beaufort => UnitGroup::Speed,
            Unit::Millimeter | Unit::Inch => UnitGroup::Rain,
            Unit::MillimeterPerHour | Unit::InchPerHour => UnitGroup::RainRate,
            Unit::Percent => UnitGroup::Humidity,
            Unit::Degree => UnitGroup::Direction,
        }
    }

    /// Canonical metric unit of the same group
    pub fn metric(group: UnitGroup) -> Unit {
        match group {
            UnitGroup::Temperature => Unit::Celsius,
            UnitGroup::Pressure => Unit::Hectopascal,
            UnitGroup::Speed => Unit::KilometersPerHour,
            UnitGroup::Rain => Unit::Millimeter,
            UnitGroup::RainRate => Unit::MillimeterPerHour,
            UnitGroup::Humidity => Unit::Percent,
            UnitGroup::Direction => Unit::Degree,
        }
    }

    /// Convert a value in this unit to the canonical metric unit
    pub fn to_metric(&self, value: f64) -> f64 {
        match self {
            Unit::Fahrenheit => fahrenheit_to_celsius(value),
            Unit::InchMercury => value * 33.8639,
            Unit::MillimeterMercury => value * 1.33322,
            Unit::Kilopascal => value * 10.0,
            Unit::MetersPerSecond => ms_to_kmh(value),
            Unit::MilesPerHour => value * 1.60934,
            Unit::Knots => value * 1.852,
            Unit::Beaufort => beaufort_to_kmh(value),
            Unit::Inch | Unit::InchPerHour => value * 25.4,
            Unit::Celsius
            | Unit::Hectopascal
            | Unit::KilometersPerHour
            | Unit::Millimeter
            | Unit::MillimeterPerHour
            | Unit::Percent
            | Unit::Degree => value,
        }
    }

    /// Convert to metric, checking that the unit measures the expected quantity
    pub fn to_metric_checked(&self, value: f64, expected: UnitGroup) -> Result<f64, UnitError> {
        if self.group() != expected {
            return Err(UnitError::ConversionNotSupported {
                from: self.group(),
                to: expected,
            });
        }
        Ok(self.to_metric(value))
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(' ', "");
        let unit = match normalized.as_str() {
            "℃" | "°c" | "ºc" | "c" | "degc" => Unit::Celsius,
            "℉" | "°f" | "ºf" | "f" | "degf" => Unit::Fahrenheit,
            "hpa" | "mbar" | "mb" => Unit::Hectopascal,
            "inhg" => Unit::InchMercury,
            "mmhg" => Unit::MillimeterMercury,
            "kpa" => Unit::Kilopascal,
            "km/h" | "kmh" | "kph" | "km/hr" => Unit::KilometersPerHour,
            "m/s" | "ms" | "mps" => Unit::MetersPerSecond,
            "mph" => Unit::MilesPerHour,
            "kt" | "kts" | "knot" | "knots" => Unit::Knots,
            "bft" | "bf" | "beaufort" => Unit::Beaufort,
            "mm" => Unit::Millimeter,
            "in" | "inch" | "inches" => Unit::Inch,
            "mm/h" | "mm/hr" => Unit::MillimeterPerHour,
            "in/h" | "in/hr" => Unit::InchPerHour,
            "%" => Unit::Percent,
            "°" | "º" | "deg" => Unit::Degree,
            _ => return Err(UnitError::UnknownUnit(s.trim().to_string())),
        };
        Ok(unit)
    }
}

pub fn fahrenheit_to_celsius(value: f64) -> f64 {
    (value - 32.0) * 5.0 / 9.0
}

pub fn ms_to_kmh(value: f64) -> f64 {
    value * 3.6
}

pub fn kmh_to_ms(value: f64) -> f64 {
    value / 3.6
}

/// Beaufort force to km/h; fractional forces round, out-of-scale forces clamp
pub fn beaufort_to_kmh(force: f64) -> f64 {
    let idx = force.round().clamp(0.0, 12.0) as usize;
    BEAUFORT_KMH[idx]
}

/// Bring a pressure reading into hPa when a sensor or export used the wrong scale
///
/// Returns `None` for values no plausible scale can explain.
pub fn repair_pressure(value: f64) -> Option<f64> {
    match value {
        v if (800.0..=1100.0).contains(&v) => Some(v),
        v if (8000.0..=11000.0).contains(&v) => Some(v / 10.0),
        v if (80000.0..=110000.0).contains(&v) => Some(v / 100.0),
        v if (50.0..=200.0).contains(&v) => Some(v * 10.0),
        _ => None,
    }
}

/// Split `"12.5 km/h"` into its number and optional unit suffix
///
/// Decimal commas are accepted. A trailing `%` or unit is optional.
pub fn split_measurement(s: &str) -> Result<(f64, Option<Unit>), UnitError> {
    let s = s.trim().replace(',', ".");
    let split = s
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let (number, suffix) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| UnitError::NotANumber(s.to_string()))?;

    let suffix = suffix.trim();
    if suffix.is_empty() {
        Ok((value, None))
    } else {
        Ok((value, Some(suffix.parse()?)))
    }
}

/// Parse a value with optional unit suffix into the metric unit of `default`'s group
pub fn parse_measurement(s: &str, default: Unit) -> Result<f64, UnitError> {
    let (value, unit) = split_measurement(s)?;
    unit.unwrap_or(default)
        .to_metric_checked(value, default.group())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_conversion() {
        assert!((Unit::Fahrenheit.to_metric(32.0) - 0.0).abs() < 0.001);
        assert!((Unit::Fahrenheit.to_metric(212.0) - 100.0).abs() < 0.001);
        assert_eq!(Unit::Celsius.to_metric(21.5), 21.5);
    }

    #[test]
    fn test_speed_conversion() {
        assert!((Unit::MetersPerSecond.to_metric(10.0) - 36.0).abs() < 0.001);
        assert!((Unit::Knots.to_metric(10.0) - 18.52).abs() < 0.001);
        assert!((Unit::MilesPerHour.to_metric(10.0) - 16.0934).abs() < 0.001);
        assert!((kmh_to_ms(36.0) - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_beaufort_table() {
        assert_eq!(beaufort_to_kmh(0.0), 0.0);
        assert_eq!(beaufort_to_kmh(4.4), 19.0);
        assert_eq!(beaufort_to_kmh(12.0), 117.0);
        assert_eq!(beaufort_to_kmh(15.0), 117.0);
        assert_eq!(beaufort_to_kmh(-3.0), 0.0);
    }

    #[test]
    fn test_repair_pressure() {
        assert_eq!(repair_pressure(1013.2), Some(1013.2));
        assert_eq!(repair_pressure(10132.0), Some(1013.2));
        assert_eq!(repair_pressure(101320.0), Some(1013.2));
        assert_eq!(repair_pressure(101.3), Some(1013.0));
        assert_eq!(repair_pressure(0.0), None);
        assert_eq!(repair_pressure(5000.0), None);
    }

    #[test]
    fn test_unit_parsing() {
        assert_eq!("℃".parse::<Unit>(), Ok(Unit::Celsius));
        assert_eq!("km/h".parse::<Unit>(), Ok(Unit::KilometersPerHour));
        assert_eq!(" M/S ".parse::<Unit>(), Ok(Unit::MetersPerSecond));
        assert_eq!("inHg".parse::<Unit>(), Ok(Unit::InchMercury));
        assert_eq!("mm/Hr".parse::<Unit>(), Ok(Unit::MillimeterPerHour));
        assert!("furlongs".parse::<Unit>().is_err());
    }

    #[test]
    fn test_parse_measurement() {
        let kmh = Unit::KilometersPerHour;
        assert_eq!(parse_measurement("12.5", kmh), Ok(12.5));
        assert!((parse_measurement("10 m/s", kmh).unwrap() - 36.0).abs() < 0.001);
        assert_eq!(parse_measurement("3bft", kmh), Ok(11.0));
        assert_eq!(parse_measurement("2,5 km/h", kmh), Ok(2.5));
        assert_eq!(parse_measurement("65%", Unit::Percent), Ok(65.0));
        assert_eq!(parse_measurement("-4.0 C", Unit::Celsius), Ok(-4.0));
        assert!(parse_measurement("calm", kmh).is_err());
        assert!(parse_measurement("10 hPa", kmh).is_err());
    }

    #[test]
    fn test_default_unit_applies_without_suffix() {
        let value = parse_measurement("10", Unit::MetersPerSecond).unwrap();
        assert!((value - 36.0).abs() < 0.001);
    }
}
