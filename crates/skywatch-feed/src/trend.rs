//! Trend derivation against the last persisted reading.

use std::sync::Arc;

use skywatch_session::{KeyValueStore, StorageError};
use tracing::{debug, warn};

use crate::{Metric, TrendState};

/// Classify `current` against `previous`.
///
/// A missing previous value counts as `0.0`, so the very first positive
/// reading classifies as [`TrendState::Up`].
pub fn classify(previous: Option<f64>, current: f64) -> TrendState {
    let previous = previous.unwrap_or(0.0);
    if current > previous {
        TrendState::Up
    } else if current < previous {
        TrendState::Down
    } else {
        TrendState::Stable
    }
}

/// Last observed value per metric, kept in durable storage.
#[derive(Clone)]
pub struct ReadingStore {
    store: Arc<dyn KeyValueStore>,
}

impl ReadingStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The last recorded value, if any. Unparseable entries read as absent.
    pub async fn last_value(&self, metric: Metric) -> Option<f64> {
        let raw = self.store.get(metric.last_value_key()).await?;
        match raw.parse::<f64>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%metric, raw = %raw, "ignoring unparseable last value");
                None
            }
        }
    }

    pub async fn record(&self, metric: Metric, value: f64) -> Result<(), StorageError> {
        self.store
            .set(metric.last_value_key(), &value.to_string())
            .await
    }
}

/// Classifies readings and records them for the next classification.
///
/// The only writer of the persisted last value.
#[derive(Clone)]
pub struct TrendEngine {
    store: ReadingStore,
}

impl TrendEngine {
    pub fn new(store: ReadingStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ReadingStore {
        &self.store
    }

    /// Classify `current` against the persisted value without recording it.
    pub async fn assess(&self, metric: Metric, current: f64) -> TrendState {
        let previous = self.store.last_value(metric).await;
        let trend = classify(previous, current);
        debug!(%metric, ?previous, current, ?trend, "classified reading");
        trend
    }

    /// Record `current` as the value the next reading is classified against.
    ///
    /// A failed write is logged; the classification still stands.
    pub async fn commit(&self, metric: Metric, current: f64) {
        if let Err(e) = self.store.record(metric, current).await {
            warn!(%metric, error = %e, "failed to persist last value");
        }
    }

    /// Classify a freshly fetched value and persist it.
    pub async fn observe(&self, metric: Metric, current: f64) -> TrendState {
        let trend = self.assess(metric, current).await;
        self.commit(metric, current).await;
        trend
    }
}
