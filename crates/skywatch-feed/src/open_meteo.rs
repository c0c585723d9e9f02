//! Adapter for the public Open-Meteo forecast API.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::window::extract;
use crate::{
    DailyStats, PREDICTION_DAYS, Payload, Prediction, QueryKind, Reading, ReadingSeries, Source,
    SourceError, SourceQuery, WeeklyStats, parse_date, parse_timestamp,
};

/// Open-Meteo keeps at most this many days of past data.
const MAX_PAST_DAYS: usize = 92;

const WEEK_DAYS: usize = 7;

/// A block keyed by `time` plus one entry per requested variable.
#[derive(Debug, Deserialize)]
struct Block<T> {
    time: T,
    #[serde(flatten)]
    variables: HashMap<String, Value>,
}

impl<T> Block<T> {
    fn variable(&self, name: &str) -> Result<&Value, SourceError> {
        self.variables
            .get(name)
            .ok_or_else(|| SourceError::Parse(format!("missing variable `{}`", name)))
    }

    fn column(&self, name: &str) -> Result<Vec<Option<f64>>, SourceError> {
        let column: Vec<Option<f64>> = serde_json::from_value(self.variable(name)?.clone())?;
        Ok(column)
    }
}

#[derive(Debug, Deserialize)]
struct CurrentBody {
    current: Block<String>,
}

#[derive(Debug, Deserialize)]
struct HourlyBody {
    hourly: Block<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct DailyBody {
    daily: Block<Vec<String>>,
}

/// The public forecast API. Serves every metric and needs no credentials.
pub struct OpenMeteoSource {
    http: Client,
    url: String,
}

impl OpenMeteoSource {
    pub fn new(http: Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        query: &SourceQuery,
        params: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("latitude", query.location.latitude.to_string()),
                ("longitude", query.location.longitude.to_string()),
                ("timezone", "GMT".to_string()),
            ])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http { status });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl Source for OpenMeteoSource {
    fn name(&self) -> &str {
        "open-meteo"
    }

    async fn fetch(&self, query: &SourceQuery) -> Result<Payload, SourceError> {
        let variable = query.metric.open_meteo_variable();

        match query.kind {
            QueryKind::Latest => {
                let body: CurrentBody = self
                    .get(query, &[("current", variable.to_string())])
                    .await?;
                let value = body.current.variable(variable)?.as_f64().ok_or_else(|| {
                    SourceError::Parse(format!("`{}` is not a number", variable))
                })?;
                let timestamp = parse_timestamp(&body.current.time).map_err(SourceError::Parse)?;
                Ok(Payload::Latest(Reading { timestamp, value }))
            }
            QueryKind::History { reference, count } => {
                let past_days = count.div_ceil(24).clamp(1, MAX_PAST_DAYS);
                let body: HourlyBody = self
                    .get(
                        query,
                        &[
                            ("hourly", variable.to_string()),
                            ("past_days", past_days.to_string()),
                            ("forecast_days", "1".to_string()),
                        ],
                    )
                    .await?;

                let series = hourly_series(&body.hourly, variable)?;
                let window = extract(&series, reference, count);
                debug!(
                    available = series.len(),
                    points = window.len(),
                    "open-meteo history"
                );
                Ok(Payload::History(window))
            }
            QueryKind::Weekly => {
                let daily = format!("{v}_min,{v}_max,{v}_mean", v = variable);
                let body: DailyBody = self
                    .get(
                        query,
                        &[
                            ("daily", daily),
                            ("past_days", WEEK_DAYS.to_string()),
                            ("forecast_days", "1".to_string()),
                        ],
                    )
                    .await?;
                Ok(Payload::Weekly(weekly_stats(&body.daily, variable)?))
            }
            QueryKind::Prediction { today, day } => {
                if !PREDICTION_DAYS.contains(&day) {
                    return Err(SourceError::Unsupported(format!(
                        "prediction day {} out of range",
                        day
                    )));
                }
                // The forecast starts today, so day N is the (N + 1)th day
                let body: HourlyBody = self
                    .get(
                        query,
                        &[
                            ("hourly", variable.to_string()),
                            ("forecast_days", (day + 1).to_string()),
                        ],
                    )
                    .await?;

                let date = today + chrono::Days::new(u64::from(day));
                let hourly: ReadingSeries = hourly_series(&body.hourly, variable)?
                    .iter()
                    .filter(|reading| reading.timestamp.date_naive() == date)
                    .collect();
                debug!(day, %date, points = hourly.len(), "open-meteo prediction");
                Ok(Payload::Prediction(Prediction { day, date, hourly }))
            }
        }
    }
}

/// Align hourly timestamps with their values, dropping hours without data.
fn hourly_series(block: &Block<Vec<String>>, variable: &str) -> Result<ReadingSeries, SourceError> {
    let values = block.column(variable)?;
    if values.len() != block.time.len() {
        return Err(SourceError::Parse(format!(
            "{} timestamps but {} values",
            block.time.len(),
            values.len()
        )));
    }

    block
        .time
        .iter()
        .zip(values)
        .filter_map(|(raw, value)| value.map(|value| (raw, value)))
        .map(|(raw, value)| {
            Ok(Reading {
                timestamp: parse_timestamp(raw).map_err(SourceError::Parse)?,
                value,
            })
        })
        .collect()
}

/// The first week of daily aggregates; days missing any aggregate are skipped.
fn weekly_stats(block: &Block<Vec<String>>, variable: &str) -> Result<WeeklyStats, SourceError> {
    let min = block.column(&format!("{}_min", variable))?;
    let max = block.column(&format!("{}_max", variable))?;
    let avg = block.column(&format!("{}_mean", variable))?;

    let mut days = Vec::with_capacity(WEEK_DAYS);
    for (i, raw) in block.time.iter().enumerate().take(WEEK_DAYS) {
        let (Some(Some(lo)), Some(Some(hi)), Some(Some(mean))) =
            (min.get(i), max.get(i), avg.get(i))
        else {
            continue;
        };
        days.push(DailyStats {
            date: parse_date(raw).map_err(SourceError::Parse)?,
            min: *lo,
            max: *hi,
            avg: *mean,
        });
    }

    Ok(WeeklyStats { days })
}
