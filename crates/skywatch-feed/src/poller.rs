//! Periodic refresh of the dashboard readings.
//!
//! A [`Poller`] owns one timer task per epoch (see [`PollControl`]). Each
//! tick fetches the latest reading and the history window concurrently;
//! each result updates its own slice of [`DashboardState`] only if the
//! epoch it started under is still current.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
    FeedConfig, FeedError, GeoPoint, Metric, PollConfig, PollControl, PollOptions, Prediction,
    ReadingSeries, Resolved, SourceResolver, TrendEngine, TrendReading, WeeklyStats,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollPhase {
    #[default]
    Idle,
    Fetching,
}

/// What the dashboard shows.
///
/// Data is only replaced by newer successful fetches; a failure sets the
/// slice's error and leaves the last good data in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardState {
    pub phase: PollPhase,
    pub latest: Option<TrendReading>,
    pub history: Option<ReadingSeries>,
    pub latest_error: Option<String>,
    pub history_error: Option<String>,
    /// Epoch of the most recent tick that touched this state.
    pub epoch: u64,
    pub last_success: Option<DateTime<Utc>>,
}

impl DashboardState {
    /// Fetching with nothing to show yet.
    pub fn is_initial_load(&self) -> bool {
        self.phase == PollPhase::Fetching && self.latest.is_none() && self.history.is_none()
    }

    /// The first error to surface, if any.
    pub fn error(&self) -> Option<&str> {
        self.latest_error
            .as_deref()
            .or(self.history_error.as_deref())
    }
}

struct Schedule {
    control: PollControl,
    timer: Option<JoinHandle<()>>,
}

struct PollerInner {
    resolver: SourceResolver,
    trend: TrendEngine,
    location: GeoPoint,
    metric: Metric,
    options: PollOptions,
    schedule: Mutex<Schedule>,
    state: watch::Sender<DashboardState>,
}

impl PollerInner {
    fn is_current(&self, epoch: u64) -> bool {
        self.schedule.lock().control.is_current(epoch)
    }

    /// Apply `update` if `epoch` is still current. The check and the update
    /// happen under the schedule lock.
    fn apply(&self, epoch: u64, update: impl FnOnce(&mut DashboardState)) -> bool {
        let schedule = self.schedule.lock();
        if !schedule.control.is_current(epoch) {
            debug!(epoch, current = schedule.control.epoch(), "dropping stale result");
            return false;
        }
        self.state.send_modify(update);
        true
    }

    /// One fetch cycle. Returns `false` when the tick was skipped.
    async fn tick(self: Arc<Self>, epoch: u64) -> bool {
        let window_size = {
            let mut schedule = self.schedule.lock();
            if !schedule.control.try_begin(epoch) {
                debug!(epoch, "tick skipped, fetch in flight or epoch stale");
                return false;
            }
            schedule.control.config().window_size()
        };

        self.apply(epoch, |state| {
            state.phase = PollPhase::Fetching;
            state.epoch = epoch;
        });

        tokio::join!(
            self.refresh_latest(epoch),
            self.refresh_history(epoch, window_size)
        );

        let mut schedule = self.schedule.lock();
        schedule.control.finish(epoch);
        if schedule.control.is_current(epoch) {
            self.state.send_modify(|state| state.phase = PollPhase::Idle);
        }
        true
    }

    async fn refresh_latest(&self, epoch: u64) {
        match self.resolver.latest(self.location, self.metric).await {
            Ok(Resolved { source, value }) => {
                if !self.is_current(epoch) {
                    debug!(epoch, "dropping stale latest reading");
                    return;
                }
                let trend = self.trend.assess(self.metric, value.value).await;
                let applied = self.apply(epoch, |state| {
                    state.latest = Some(TrendReading {
                        reading: value,
                        trend,
                    });
                    state.latest_error = None;
                    state.last_success = Some(Utc::now());
                });
                // The persisted last value only moves for results the
                // dashboard accepted
                if applied {
                    self.trend.commit(self.metric, value.value).await;
                    debug!(%source, value = value.value, ?trend, "latest reading updated");
                }
            }
            Err(e) => {
                warn!(error = %e, "latest reading unavailable");
                self.apply(epoch, |state| state.latest_error = Some(e.to_string()));
            }
        }
    }

    async fn refresh_history(&self, epoch: u64, window_size: usize) {
        match self
            .resolver
            .history(self.location, self.metric, Utc::now(), window_size)
            .await
        {
            Ok(Resolved { source, value }) => {
                let points = value.len();
                let applied = self.apply(epoch, |state| {
                    state.history = Some(value);
                    state.history_error = None;
                    state.last_success = Some(Utc::now());
                });
                if applied {
                    debug!(%source, points, "history updated");
                }
            }
            Err(e) => {
                warn!(error = %e, "history unavailable");
                self.apply(epoch, |state| state.history_error = Some(e.to_string()));
            }
        }
    }
}

/// Builds a [`Poller`].
pub struct PollerBuilder {
    resolver: SourceResolver,
    trend: TrendEngine,
    location: GeoPoint,
    metric: Metric,
    config: PollConfig,
    options: PollOptions,
}

impl PollerBuilder {
    pub fn new(resolver: SourceResolver, trend: TrendEngine) -> Self {
        Self {
            resolver,
            trend,
            location: GeoPoint::default(),
            metric: Metric::Temperature,
            config: PollConfig::default(),
            options: PollOptions::default(),
        }
    }

    /// Take location, metric and polling settings from a feed configuration.
    pub fn feed_config(self, config: &FeedConfig) -> Self {
        self.location(config.location)
            .metric(config.metric)
            .config(config.poll)
            .options(config.options.clone())
    }

    pub fn location(mut self, location: GeoPoint) -> Self {
        self.location = location;
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    pub fn options(mut self, options: PollOptions) -> Self {
        self.options = options;
        self
    }

    /// Fails if the configuration is not one of the offered options.
    pub fn build(self) -> Result<Poller, FeedError> {
        self.options.validate(&self.config)?;

        let (state, _) = watch::channel(DashboardState::default());
        Ok(Poller {
            inner: Arc::new(PollerInner {
                resolver: self.resolver,
                trend: self.trend,
                location: self.location,
                metric: self.metric,
                options: self.options,
                schedule: Mutex::new(Schedule {
                    control: PollControl::new(self.config),
                    timer: None,
                }),
                state,
            }),
        })
    }
}

/// Periodically refreshes the dashboard state.
///
/// Must be started from within a tokio runtime. Dropping the poller stops
/// it.
pub struct Poller {
    inner: Arc<PollerInner>,
}

impl Poller {
    pub fn builder(resolver: SourceResolver, trend: TrendEngine) -> PollerBuilder {
        PollerBuilder::new(resolver, trend)
    }

    /// Start polling; the first fetch happens immediately. No-op when
    /// already running.
    pub fn start(&self) {
        let mut schedule = self.inner.schedule.lock();
        if schedule.control.is_active() {
            return;
        }
        let epoch = schedule.control.activate();
        info!(
            epoch,
            interval_secs = schedule.control.config().interval_secs(),
            metric = %self.inner.metric,
            "polling started"
        );
        spawn_timer(&self.inner, &mut schedule, epoch);
    }

    /// Stop polling. Fetches still in flight complete but are discarded.
    pub fn stop(&self) {
        let mut schedule = self.inner.schedule.lock();
        if let Some(timer) = schedule.timer.take() {
            timer.abort();
        }
        if schedule.control.is_active() {
            schedule.control.deactivate();
            info!(epoch = schedule.control.epoch(), "polling stopped");
        }
        self.inner.state.send_if_modified(|state| {
            std::mem::replace(&mut state.phase, PollPhase::Idle) != PollPhase::Idle
        });
    }

    /// Change interval and window size. A running schedule restarts under a
    /// new epoch, fetching immediately.
    pub fn set_config(&self, config: PollConfig) -> Result<(), FeedError> {
        self.inner.options.validate(&config)?;

        let mut schedule = self.inner.schedule.lock();
        if schedule.control.config() == config {
            return Ok(());
        }
        if let Some(epoch) = schedule.control.reconfigure(config) {
            info!(
                epoch,
                interval_secs = config.interval_secs(),
                window_size = config.window_size(),
                "polling restarted"
            );
            spawn_timer(&self.inner, &mut schedule, epoch);
        }
        Ok(())
    }

    /// Fetch now, outside the timer. Returns `false` if the poller is
    /// stopped or a fetch is already in flight.
    pub async fn refresh(&self) -> bool {
        let epoch = self.inner.schedule.lock().control.epoch();
        PollerInner::tick(Arc::clone(&self.inner), epoch).await
    }

    /// One-shot weekly statistics for the configured location and metric.
    pub async fn weekly_stats(&self) -> Result<Resolved<WeeklyStats>, FeedError> {
        self.inner
            .resolver
            .weekly_stats(self.inner.location, self.inner.metric)
            .await
    }

    /// One-shot hourly forecast `day` days from today (UTC), 1 being
    /// tomorrow.
    pub async fn prediction(&self, day: u8) -> Result<Resolved<Prediction>, FeedError> {
        self.inner
            .resolver
            .prediction(
                self.inner.location,
                self.inner.metric,
                Utc::now().date_naive(),
                day,
            )
            .await
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> DashboardState {
        self.inner.state.borrow().clone()
    }

    pub fn config(&self) -> PollConfig {
        self.inner.schedule.lock().control.config()
    }

    pub fn is_running(&self) -> bool {
        self.inner.schedule.lock().control.is_active()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Replace the timer with one ticking under `epoch`.
fn spawn_timer(inner: &Arc<PollerInner>, schedule: &mut Schedule, epoch: u64) {
    if let Some(timer) = schedule.timer.take() {
        timer.abort();
    }

    let period = schedule.control.config().interval();
    let inner: Weak<PollerInner> = Arc::downgrade(inner);

    schedule.timer = Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if !inner.is_current(epoch) {
                break;
            }
            tokio::spawn(PollerInner::tick(inner, epoch));
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Reading, TrendState};

    fn reading() -> TrendReading {
        TrendReading {
            reading: Reading {
                timestamp: Utc::now(),
                value: 20.0,
            },
            trend: TrendState::Up,
        }
    }

    #[test]
    fn initial_load_only_without_data() {
        let mut state = DashboardState {
            phase: PollPhase::Fetching,
            ..Default::default()
        };
        assert!(state.is_initial_load());

        state.latest = Some(reading());
        assert!(!state.is_initial_load());

        state.phase = PollPhase::Idle;
        state.latest = None;
        assert!(!state.is_initial_load());
    }

    #[test]
    fn latest_error_surfaces_first() {
        let state = DashboardState {
            latest_error: Some("latest".into()),
            history_error: Some("history".into()),
            ..Default::default()
        };
        assert_eq!(state.error(), Some("latest"));

        let state = DashboardState {
            history_error: Some("history".into()),
            ..Default::default()
        };
        assert_eq!(state.error(), Some("history"));
        assert_eq!(DashboardState::default().error(), None);
    }
}
