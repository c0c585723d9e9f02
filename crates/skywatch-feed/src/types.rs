//! Reading types shared by sources, the poller and consumers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::FeedError;

/// An environmental quantity the dashboard tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Temperature,
    Humidity,
}

impl Metric {
    /// Durable storage key holding the last observed value.
    pub fn last_value_key(&self) -> &'static str {
        match self {
            Metric::Temperature => "latestTemperature",
            Metric::Humidity => "latestHumidity",
        }
    }

    /// Variable name used by the Open-Meteo API.
    pub fn open_meteo_variable(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature_2m",
            Metric::Humidity => "relative_humidity_2m",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "temperature" => Ok(Metric::Temperature),
            "humidity" => Ok(Metric::Humidity),
            other => Err(format!(
                "unknown metric '{}', expected temperature or humidity",
                other
            )),
        }
    }
}

/// A location queried for readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl Default for GeoPoint {
    /// Agadir, the station the dashboard was built around.
    fn default() -> Self {
        Self::new(30.4202, -9.5982)
    }
}

/// A single scalar reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Direction of change relative to the previous reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendState {
    Up,
    Down,
    Stable,
}

/// The latest reading together with its derived trend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendReading {
    #[serde(flatten)]
    pub reading: Reading,
    pub trend: TrendState,
}

/// Index-aligned timestamps and values.
///
/// `timestamps[i]` belongs to `values[i]`; both always have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadingSeries {
    timestamps: Vec<DateTime<Utc>>,
    values: Vec<f64>,
}

impl ReadingSeries {
    /// Build a series, rejecting sequences of different lengths.
    pub fn new(timestamps: Vec<DateTime<Utc>>, values: Vec<f64>) -> Result<Self, FeedError> {
        if timestamps.len() != values.len() {
            return Err(FeedError::MisalignedSeries {
                timestamps: timestamps.len(),
                values: values.len(),
            });
        }
        Ok(Self { timestamps, values })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Readings in series order.
    pub fn iter(&self) -> impl Iterator<Item = Reading> + '_ {
        self.timestamps
            .iter()
            .zip(&self.values)
            .map(|(timestamp, value)| Reading {
                timestamp: *timestamp,
                value: *value,
            })
    }

    pub fn last(&self) -> Option<Reading> {
        self.iter().last()
    }

    /// True when timestamps never decrease.
    pub fn is_sorted(&self) -> bool {
        self.timestamps.windows(2).all(|w| w[0] <= w[1])
    }

    /// Copy of `[start, end)`, clipped to the series bounds.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let start = start.min(end);
        Self {
            timestamps: self.timestamps[start..end].to_vec(),
            values: self.values[start..end].to_vec(),
        }
    }

    /// The last `count` readings.
    pub fn tail(&self, count: usize) -> Self {
        self.slice(self.len().saturating_sub(count), self.len())
    }
}

impl FromIterator<Reading> for ReadingSeries {
    fn from_iter<I: IntoIterator<Item = Reading>>(iter: I) -> Self {
        let (timestamps, values) = iter.into_iter().map(|r| (r.timestamp, r.value)).unzip();
        Self { timestamps, values }
    }
}

/// Aggregates for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Daily aggregates over the past week, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeeklyStats {
    pub days: Vec<DailyStats>,
}

/// Hourly forecast for one day ahead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Days after today, starting at 1 for tomorrow.
    pub day: u8,
    pub date: NaiveDate,
    pub hourly: ReadingSeries,
}

impl Prediction {
    pub fn min(&self) -> Option<f64> {
        self.hourly.values().iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.hourly.values().iter().copied().reduce(f64::max)
    }

    pub fn avg(&self) -> Option<f64> {
        let values = self.hourly.values();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Parse a timestamp as sent by either source.
///
/// RFC 3339 strings keep their offset. Zone-less ISO-8601 strings (the local
/// backend and Open-Meteo with `timezone=GMT`) are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("unrecognized timestamp '{}'", raw))
}

/// Parse a calendar date (`YYYY-MM-DD`).
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| format!("invalid date '{}': {}", raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn series_rejects_misaligned_lengths() {
        let result = ReadingSeries::new(vec![at(0), at(1)], vec![1.0]);
        assert!(matches!(
            result,
            Err(FeedError::MisalignedSeries {
                timestamps: 2,
                values: 1
            })
        ));
    }

    #[test]
    fn series_slice_and_tail_clip() {
        let series = ReadingSeries::new(vec![at(0), at(1), at(2)], vec![1.0, 2.0, 3.0]).unwrap();

        assert_eq!(series.slice(1, 10).values(), &[2.0, 3.0]);
        assert_eq!(series.slice(5, 10).len(), 0);
        assert_eq!(series.tail(2).values(), &[2.0, 3.0]);
        assert_eq!(series.tail(10).len(), 3);
        assert_eq!(series.last().map(|r| r.value), Some(3.0));
    }

    #[test]
    fn series_sortedness() {
        let sorted = ReadingSeries::new(vec![at(0), at(0), at(1)], vec![1.0, 1.0, 2.0]).unwrap();
        let unsorted = ReadingSeries::new(vec![at(2), at(1)], vec![1.0, 2.0]).unwrap();

        assert!(sorted.is_sorted());
        assert!(!unsorted.is_sorted());
        assert!(ReadingSeries::empty().is_sorted());
    }

    #[test]
    fn series_collects_from_readings() {
        let series: ReadingSeries = [
            Reading {
                timestamp: at(0),
                value: 1.5,
            },
            Reading {
                timestamp: at(1),
                value: 2.5,
            },
        ]
        .into_iter()
        .collect();

        assert_eq!(series.timestamps(), &[at(0), at(1)]);
        assert_eq!(series.values(), &[1.5, 2.5]);
    }

    #[test]
    fn parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2025-03-01T05:00").unwrap(), at(5));
        assert_eq!(parse_timestamp("2025-03-01T05:00:00Z").unwrap(), at(5));
        assert_eq!(parse_timestamp("2025-03-01T06:00:00+01:00").unwrap(), at(5));
        assert_eq!(
            parse_timestamp("2025-03-01T05:00:00.123456").unwrap(),
            at(5) + chrono::Duration::microseconds(123_456)
        );
        assert_eq!(parse_timestamp("2025-03-01 05:00").unwrap(), at(5));
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn metric_names_round_trip_through_from_str() {
        for metric in [Metric::Temperature, Metric::Humidity] {
            assert_eq!(metric.as_str().parse::<Metric>().unwrap(), metric);
        }
        assert!("pressure".parse::<Metric>().is_err());
    }

    #[test]
    fn prediction_aggregates() {
        let prediction = Prediction {
            day: 1,
            date: NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
            hourly: ReadingSeries::new(vec![at(0), at(1), at(2)], vec![14.0, 20.0, 17.0]).unwrap(),
        };

        assert_eq!(prediction.min(), Some(14.0));
        assert_eq!(prediction.max(), Some(20.0));
        assert_eq!(prediction.avg(), Some(17.0));

        let empty = Prediction {
            hourly: ReadingSeries::empty(),
            ..prediction
        };
        assert_eq!(empty.min(), None);
        assert_eq!(empty.avg(), None);
    }

    #[test]
    fn trend_reading_serializes_flat() {
        let reading = TrendReading {
            reading: Reading {
                timestamp: at(5),
                value: 21.0,
            },
            trend: TrendState::Up,
        };

        let json = serde_json::to_value(reading).unwrap();
        assert_eq!(json["value"], 21.0);
        assert_eq!(json["trend"], "up");
        assert!(json["timestamp"].is_string());
    }
}
