//! Data sources and ordered fallback resolution.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};

use crate::{
    FeedError, GeoPoint, Metric, PREDICTION_DAYS, Prediction, Reading, ReadingSeries, SourceError,
    SourceFailure, WeeklyStats,
};

/// What a query asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryKind {
    /// The most recent reading.
    Latest,
    /// A window of at most `count` readings aligned to `reference`.
    History {
        reference: DateTime<Utc>,
        count: usize,
    },
    /// Daily aggregates over the past week.
    Weekly,
    /// Hourly forecast for the day `day` days after `today`.
    Prediction { today: NaiveDate, day: u8 },
}

impl QueryKind {
    pub fn label(&self) -> &'static str {
        match self {
            QueryKind::Latest => "latest",
            QueryKind::History { .. } => "history",
            QueryKind::Weekly => "weekly",
            QueryKind::Prediction { .. } => "prediction",
        }
    }
}

/// The canonical query every source adapter understands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceQuery {
    pub location: GeoPoint,
    pub metric: Metric,
    pub kind: QueryKind,
}

impl SourceQuery {
    pub fn latest(location: GeoPoint, metric: Metric) -> Self {
        Self {
            location,
            metric,
            kind: QueryKind::Latest,
        }
    }

    pub fn history(
        location: GeoPoint,
        metric: Metric,
        reference: DateTime<Utc>,
        count: usize,
    ) -> Self {
        Self {
            location,
            metric,
            kind: QueryKind::History { reference, count },
        }
    }

    pub fn weekly(location: GeoPoint, metric: Metric) -> Self {
        Self {
            location,
            metric,
            kind: QueryKind::Weekly,
        }
    }

    /// Fails unless `day` lies in [`PREDICTION_DAYS`].
    pub fn prediction(
        location: GeoPoint,
        metric: Metric,
        today: NaiveDate,
        day: u8,
    ) -> Result<Self, FeedError> {
        if !PREDICTION_DAYS.contains(&day) {
            return Err(FeedError::InvalidPredictionDay { day });
        }
        Ok(Self {
            location,
            metric,
            kind: QueryKind::Prediction { today, day },
        })
    }
}

/// A normalized source answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Latest(Reading),
    History(ReadingSeries),
    Weekly(WeeklyStats),
    Prediction(Prediction),
}

impl Payload {
    /// Whether this payload answers a query of `kind`.
    pub fn answers(&self, kind: &QueryKind) -> bool {
        matches!(
            (self, kind),
            (Payload::Latest(_), QueryKind::Latest)
                | (Payload::History(_), QueryKind::History { .. })
                | (Payload::Weekly(_), QueryKind::Weekly)
                | (Payload::Prediction(_), QueryKind::Prediction { .. })
        )
    }

    pub fn into_latest(self) -> Option<Reading> {
        match self {
            Payload::Latest(reading) => Some(reading),
            _ => None,
        }
    }

    pub fn into_history(self) -> Option<ReadingSeries> {
        match self {
            Payload::History(series) => Some(series),
            _ => None,
        }
    }

    pub fn into_weekly(self) -> Option<WeeklyStats> {
        match self {
            Payload::Weekly(stats) => Some(stats),
            _ => None,
        }
    }

    pub fn into_prediction(self) -> Option<Prediction> {
        match self {
            Payload::Prediction(prediction) => Some(prediction),
            _ => None,
        }
    }
}

/// A provider of readings.
///
/// Adapters translate the canonical [`SourceQuery`] into their own wire
/// format. Any non-success status must be reported as an error.
#[async_trait]
pub trait Source: Send + Sync {
    /// Short name used in logs and failure reports.
    fn name(&self) -> &str;

    async fn fetch(&self, query: &SourceQuery) -> Result<Payload, SourceError>;
}

/// A value together with the source that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub source: String,
    pub value: T,
}

/// Queries sources in fixed priority order until one succeeds.
#[derive(Clone)]
pub struct SourceResolver {
    sources: Vec<Arc<dyn Source>>,
}

impl SourceResolver {
    /// Create a resolver; `sources` are tried in the given order.
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        Self { sources }
    }

    /// Names of the configured sources, in priority order.
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Resolve a query to the first successful payload.
    pub async fn resolve(&self, query: &SourceQuery) -> Result<Resolved<Payload>, FeedError> {
        self.resolve_as(query, |payload| {
            payload.answers(&query.kind).then_some(payload)
        })
        .await
    }

    /// Latest reading for `metric` at `location`.
    pub async fn latest(
        &self,
        location: GeoPoint,
        metric: Metric,
    ) -> Result<Resolved<Reading>, FeedError> {
        self.resolve_as(&SourceQuery::latest(location, metric), Payload::into_latest)
            .await
    }

    /// Most recent window of at most `count` readings aligned to `reference`.
    pub async fn history(
        &self,
        location: GeoPoint,
        metric: Metric,
        reference: DateTime<Utc>,
        count: usize,
    ) -> Result<Resolved<ReadingSeries>, FeedError> {
        let query = SourceQuery::history(location, metric, reference, count);
        self.resolve_as(&query, Payload::into_history).await
    }

    /// Daily aggregates for the past week.
    pub async fn weekly_stats(
        &self,
        location: GeoPoint,
        metric: Metric,
    ) -> Result<Resolved<WeeklyStats>, FeedError> {
        self.resolve_as(&SourceQuery::weekly(location, metric), Payload::into_weekly)
            .await
    }

    /// Hourly forecast `day` days after `today`. An out-of-range day fails
    /// before any source is queried.
    pub async fn prediction(
        &self,
        location: GeoPoint,
        metric: Metric,
        today: NaiveDate,
        day: u8,
    ) -> Result<Resolved<Prediction>, FeedError> {
        let query = SourceQuery::prediction(location, metric, today, day)?;
        self.resolve_as(&query, Payload::into_prediction).await
    }

    /// Try each source once, in order. A payload `pick` rejects counts as a
    /// failure of that source.
    #[tracing::instrument(skip(self, pick), fields(kind = query.kind.label(), metric = %query.metric))]
    async fn resolve_as<T>(
        &self,
        query: &SourceQuery,
        pick: impl Fn(Payload) -> Option<T> + Send,
    ) -> Result<Resolved<T>, FeedError> {
        let mut failures = Vec::new();

        for source in &self.sources {
            let error = match source.fetch(query).await {
                Ok(payload) => match pick(payload) {
                    Some(value) => {
                        debug!(source = source.name(), "source answered");
                        return Ok(Resolved {
                            source: source.name().to_string(),
                            value,
                        });
                    }
                    None => SourceError::Parse(format!(
                        "payload does not answer a {} query",
                        query.kind.label()
                    )),
                },
                Err(error) => error,
            };

            warn!(source = source.name(), error = %error, "source failed, falling through");
            failures.push(SourceFailure {
                source_name: source.name().to_string(),
                error,
            });
        }

        Err(FeedError::AllSourcesExhausted { failures })
    }
}
