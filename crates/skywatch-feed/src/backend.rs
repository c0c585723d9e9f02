//! Adapter for the local sensor backend.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use skywatch_session::SessionManager;
use tracing::debug;

use crate::window::extract;
use crate::{
    DailyStats, Metric, PREDICTION_DAYS, Payload, Prediction, QueryKind, Reading, ReadingSeries,
    Source, SourceError, SourceQuery, WeeklyStats, parse_date, parse_timestamp,
};

/// `GET /api/latest`
#[derive(Debug, Deserialize)]
struct LatestBody {
    time: String,
    temperature: f64,
}

/// `GET /api/history`, in either of the shapes the backend has served.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryBody {
    /// Already cut to the most recent readings.
    #[serde(rename_all = "camelCase")]
    Recent {
        last_timestamps: Vec<String>,
        last_temperatures: Vec<f64>,
    },
    /// Raw hourly series.
    Hourly { hourly: HourlyBlock },
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    temperature_2m: Vec<f64>,
}

/// `GET /api/weekly-stats`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeeklyBody {
    dates: Vec<String>,
    min_temps: Vec<f64>,
    max_temps: Vec<f64>,
    avg_temps: Vec<f64>,
    /// Set when the backend caught an exception but still answered 200.
    error: Option<String>,
}

/// `GET /api/predict?day=N`
#[derive(Debug, Deserialize)]
struct PredictionBody {
    date: Option<String>,
    #[serde(default)]
    timestamps: Vec<String>,
    #[serde(default)]
    predictions: Vec<f64>,
    /// Set for a rejected day or a failed model run, still with a 200.
    error: Option<String>,
}

/// The local backend. Serves temperature only.
///
/// When a session manager is attached, requests carry the session's
/// credential and unauthorized responses invalidate the session.
pub struct BackendSource {
    http: Client,
    base_url: String,
    session: Option<Arc<SessionManager>>,
}

impl BackendSource {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: None,
        }
    }

    /// Route requests through a session manager.
    pub fn with_session(mut self, session: Arc<SessionManager>) -> Self {
        self.session = Some(session);
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &SourceQuery,
        params: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let request = self
            .http
            .get(&url)
            .query(&[
                ("latitude", query.location.latitude.to_string()),
                ("longitude", query.location.longitude.to_string()),
            ])
            .query(params);

        let response = self.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http { status });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, SourceError> {
        match &self.session {
            Some(session) => Ok(session.send(request).await?),
            None => Ok(request.send().await?),
        }
    }
}

#[async_trait]
impl Source for BackendSource {
    fn name(&self) -> &str {
        "backend"
    }

    async fn fetch(&self, query: &SourceQuery) -> Result<Payload, SourceError> {
        if query.metric != Metric::Temperature {
            return Err(SourceError::Unsupported(format!(
                "backend does not serve {}",
                query.metric
            )));
        }

        match query.kind {
            QueryKind::Latest => {
                let body: LatestBody = self.get("/api/latest", query, &[]).await?;
                let timestamp = parse_timestamp(&body.time).map_err(SourceError::Parse)?;
                Ok(Payload::Latest(Reading {
                    timestamp,
                    value: body.temperature,
                }))
            }
            QueryKind::History { reference, count } => {
                let body: HistoryBody = self.get("/api/history", query, &[]).await?;
                let series = match body {
                    HistoryBody::Recent {
                        last_timestamps,
                        last_temperatures,
                    } => to_series(&last_timestamps, last_temperatures)?.tail(count),
                    HistoryBody::Hourly { hourly } => {
                        let series = to_series(&hourly.time, hourly.temperature_2m)?;
                        extract(&series, reference, count)
                    }
                };
                debug!(points = series.len(), "backend history");
                Ok(Payload::History(series))
            }
            QueryKind::Weekly => {
                let body: WeeklyBody = self.get("/api/weekly-stats", query, &[]).await?;
                if let Some(error) = body.error {
                    return Err(SourceError::Parse(format!("backend reported: {}", error)));
                }
                Ok(Payload::Weekly(to_weekly(body)?))
            }
            QueryKind::Prediction { today, day } => {
                if !PREDICTION_DAYS.contains(&day) {
                    return Err(SourceError::Unsupported(format!(
                        "prediction day {} out of range",
                        day
                    )));
                }
                let body: PredictionBody = self
                    .get("/api/predict", query, &[("day", day.to_string())])
                    .await?;
                if let Some(error) = body.error {
                    return Err(SourceError::Parse(format!("backend reported: {}", error)));
                }
                let date = match body.date {
                    Some(raw) => parse_date(&raw).map_err(SourceError::Parse)?,
                    None => today + chrono::Days::new(u64::from(day)),
                };
                let hourly = to_series(&body.timestamps, body.predictions)?;
                debug!(day, %date, points = hourly.len(), "backend prediction");
                Ok(Payload::Prediction(Prediction { day, date, hourly }))
            }
        }
    }
}

fn to_series(timestamps: &[String], values: Vec<f64>) -> Result<ReadingSeries, SourceError> {
    let timestamps = timestamps
        .iter()
        .map(|raw| parse_timestamp(raw))
        .collect::<Result<Vec<_>, _>>()
        .map_err(SourceError::Parse)?;
    ReadingSeries::new(timestamps, values).map_err(|e| SourceError::Parse(e.to_string()))
}

fn to_weekly(body: WeeklyBody) -> Result<WeeklyStats, SourceError> {
    let len = body.dates.len();
    if body.min_temps.len() != len || body.max_temps.len() != len || body.avg_temps.len() != len {
        return Err(SourceError::Parse(
            "weekly stats columns differ in length".to_string(),
        ));
    }

    let days = body
        .dates
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            Ok(DailyStats {
                date: parse_date(raw).map_err(SourceError::Parse)?,
                min: body.min_temps[i],
                max: body.max_temps[i],
                avg: body.avg_temps[i],
            })
        })
        .collect::<Result<Vec<_>, SourceError>>()?;

    Ok(WeeklyStats { days })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeoPoint;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use skywatch_session::{AUTH_KEY, KeyValueStore, Route, RouteSignal, StorageTiers};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> BackendSource {
        BackendSource::new(Client::new(), server.uri())
    }

    #[tokio::test]
    async fn latest_reading() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/latest"))
            .and(query_param("latitude", "30.4202"))
            .and(query_param("longitude", "-9.5982"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "time": "2025-03-01T12:15:00.250000",
                "temperature": 19.4,
                "trend": "up",
                "is_live": true
            })))
            .mount(&server)
            .await;

        let payload = source(&server)
            .fetch(&SourceQuery::latest(GeoPoint::default(), Metric::Temperature))
            .await
            .unwrap();

        let reading = payload.into_latest().unwrap();
        assert_eq!(reading.value, 19.4);
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 15, 0).unwrap() + Duration::milliseconds(250)
        );
    }

    #[tokio::test]
    async fn error_object_with_200_is_a_parse_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/latest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "error": "database is locked" })),
            )
            .mount(&server)
            .await;

        let err = source(&server)
            .fetch(&SourceQuery::latest(GeoPoint::default(), Metric::Temperature))
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Parse(_)));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/latest"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/history"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        // 204 is a success status with no body: malformed, not HTTP
        let err = source(&server)
            .fetch(&SourceQuery::latest(GeoPoint::default(), Metric::Temperature))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));

        let err = source(&server)
            .fetch(&SourceQuery::history(
                GeoPoint::default(),
                Metric::Temperature,
                Utc::now(),
                10,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Http { status } if status.as_u16() == 503));
    }

    #[tokio::test]
    async fn recent_history_shape_keeps_the_tail() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "lastTimestamps": ["2025-03-01T10:00:00", "2025-03-01T10:00:30", "2025-03-01T10:01:00"],
                "lastTemperatures": [18.0, 18.5, 19.0],
                "updateInterval": 1,
                "count": 3,
                "isHourlyAverage": false
            })))
            .mount(&server)
            .await;

        let payload = source(&server)
            .fetch(&SourceQuery::history(
                GeoPoint::default(),
                Metric::Temperature,
                Utc::now(),
                2,
            ))
            .await
            .unwrap();

        let series = payload.into_history().unwrap();
        assert_eq!(series.values(), &[18.5, 19.0]);
    }

    #[tokio::test]
    async fn hourly_history_shape_is_windowed() {
        let server = MockServer::start().await;

        let times: Vec<String> = (0..24).map(|h| format!("2025-03-01T{:02}:00", h)).collect();
        let temps: Vec<f64> = (0..24).map(|h| h as f64).collect();

        Mock::given(method("GET"))
            .and(path("/api/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hourly": { "time": times, "temperature_2m": temps }
            })))
            .mount(&server)
            .await;

        let reference = Utc.with_ymd_and_hms(2025, 3, 1, 23, 0, 0).unwrap();
        let payload = source(&server)
            .fetch(&SourceQuery::history(
                GeoPoint::default(),
                Metric::Temperature,
                reference,
                10,
            ))
            .await
            .unwrap();

        let series = payload.into_history().unwrap();
        assert_eq!(series.len(), 10);
        assert_eq!(series.values()[0], 14.0);
        assert_eq!(series.values()[9], 23.0);
    }

    #[tokio::test]
    async fn misaligned_history_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "lastTimestamps": ["2025-03-01T10:00:00"],
                "lastTemperatures": [18.0, 18.5]
            })))
            .mount(&server)
            .await;

        let err = source(&server)
            .fetch(&SourceQuery::history(
                GeoPoint::default(),
                Metric::Temperature,
                Utc::now(),
                10,
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Parse(_)));
    }

    #[tokio::test]
    async fn weekly_stats() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/weekly-stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "dates": ["2025-02-27", "2025-02-28"],
                "minTemps": [12.0, 13.0],
                "maxTemps": [22.0, 23.5],
                "avgTemps": [17.0, 18.2]
            })))
            .mount(&server)
            .await;

        let stats = source(&server)
            .fetch(&SourceQuery::weekly(GeoPoint::default(), Metric::Temperature))
            .await
            .unwrap()
            .into_weekly()
            .unwrap();

        assert_eq!(stats.days.len(), 2);
        assert_eq!(stats.days[1].date.to_string(), "2025-02-28");
        assert_eq!(stats.days[1].max, 23.5);
    }

    #[tokio::test]
    async fn weekly_stats_error_field_is_a_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/weekly-stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "error": "no data",
                "dates": [],
                "minTemps": [],
                "maxTemps": [],
                "avgTemps": []
            })))
            .mount(&server)
            .await;

        let err = source(&server)
            .fetch(&SourceQuery::weekly(GeoPoint::default(), Metric::Temperature))
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Parse(ref m) if m.contains("no data")));
    }

    fn prediction_query(day: u8) -> SourceQuery {
        SourceQuery {
            location: GeoPoint::default(),
            metric: Metric::Temperature,
            kind: QueryKind::Prediction {
                today: chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                day,
            },
        }
    }

    #[tokio::test]
    async fn prediction_for_day() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/predict"))
            .and(query_param("day", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "day": 2,
                "date": "2025-03-03",
                "day_of_week": "Monday",
                "timestamps": ["2025-03-03T00:00:00", "2025-03-03T01:00:00", "2025-03-03T02:00:00"],
                "predictions": [14.2, 13.8, 13.5],
                "min_temp": 13.5,
                "max_temp": 14.2,
                "avg_temp": 13.83
            })))
            .expect(1)
            .mount(&server)
            .await;

        let prediction = source(&server)
            .fetch(&prediction_query(2))
            .await
            .unwrap()
            .into_prediction()
            .unwrap();

        assert_eq!(prediction.day, 2);
        assert_eq!(prediction.date.to_string(), "2025-03-03");
        assert_eq!(prediction.hourly.values(), &[14.2, 13.8, 13.5]);
        assert_eq!(
            prediction.hourly.timestamps()[1],
            Utc.with_ymd_and_hms(2025, 3, 3, 1, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn prediction_error_body_is_a_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "Not enough historical data for prediction"
            })))
            .mount(&server)
            .await;

        let err = source(&server).fetch(&prediction_query(1)).await.unwrap_err();

        assert!(matches!(err, SourceError::Parse(ref m) if m.contains("Not enough historical data")));
    }

    #[tokio::test]
    async fn prediction_day_out_of_range_sends_nothing() {
        let server = MockServer::start().await;

        for day in [0, 6] {
            let err = source(&server).fetch(&prediction_query(day)).await.unwrap_err();
            assert!(matches!(err, SourceError::Unsupported(_)));
        }
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn humidity_is_unsupported_without_a_request() {
        let server = MockServer::start().await;

        let err = source(&server)
            .fetch(&SourceQuery::latest(GeoPoint::default(), Metric::Humidity))
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Unsupported(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn requests_carry_session_credential() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/latest"))
            .and(header("Authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "time": "2025-03-01T12:00:00",
                "temperature": 20.0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tiers = StorageTiers::in_memory();
        tiers.durable.set(AUTH_KEY, "abc").await.unwrap();
        let session = Arc::new(SessionManager::new(
            Client::new(),
            server.uri(),
            tiers,
            Arc::new(RouteSignal::new(Route::Dashboard)),
        ));

        let source = BackendSource::new(Client::new(), server.uri()).with_session(session);
        let payload = source
            .fetch(&SourceQuery::latest(GeoPoint::default(), Metric::Temperature))
            .await
            .unwrap();

        assert_eq!(payload.into_latest().map(|r| r.value), Some(20.0));
    }

    #[tokio::test]
    async fn unauthorized_invalidates_session_and_fails_source() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/latest"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let tiers = StorageTiers::in_memory();
        tiers.tab.set(AUTH_KEY, "abc").await.unwrap();
        let routes = Arc::new(RouteSignal::new(Route::Dashboard));
        let session = Arc::new(SessionManager::new(
            Client::new(),
            server.uri(),
            tiers,
            routes.clone(),
        ));

        let source =
            BackendSource::new(Client::new(), server.uri()).with_session(Arc::clone(&session));
        let err = source
            .fetch(&SourceQuery::latest(GeoPoint::default(), Metric::Temperature))
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::SessionExpired));
        assert!(!session.is_authenticated().await);
        assert_eq!(routes.current(), Route::Login);
    }
}
