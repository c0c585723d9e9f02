//! Feed and polling configuration.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use skywatch_session::SessionManager;

use crate::{BackendSource, FeedError, GeoPoint, Metric, OpenMeteoSource, Source, SourceResolver};

/// Default local backend base URL.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";

/// Default Open-Meteo forecast endpoint.
pub const DEFAULT_PUBLIC_API_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Refresh intervals offered to the user, in seconds.
pub const REFRESH_INTERVALS: [u64; 4] = [5, 10, 30, 60];

/// Window sizes offered to the user.
pub const DEFAULT_WINDOW_SIZES: [usize; 7] = [5, 10, 20, 50, 100, 500, 1000];

/// Days ahead a prediction may be requested for, 1 being tomorrow.
pub const PREDICTION_DAYS: RangeInclusive<u8> = 1..=5;

const DEFAULT_INTERVAL_SECS: u64 = 10;
const DEFAULT_WINDOW_SIZE: usize = 10;

/// How often to poll and how many history points to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    interval_secs: u64,
    window_size: usize,
}

impl PollConfig {
    /// Both values must be positive.
    pub fn new(interval_secs: u64, window_size: usize) -> Result<Self, FeedError> {
        if interval_secs == 0 {
            return Err(FeedError::InvalidConfig(
                "refresh interval must be positive".to_string(),
            ));
        }
        if window_size == 0 {
            return Err(FeedError::InvalidConfig(
                "window size must be positive".to_string(),
            ));
        }
        Ok(Self {
            interval_secs,
            window_size,
        })
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// The choices a user may pick a [`PollConfig`] from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    pub refresh_intervals: Vec<u64>,
    pub window_sizes: Vec<usize>,
}

impl PollOptions {
    /// Reject configurations outside the offered choices.
    pub fn validate(&self, config: &PollConfig) -> Result<(), FeedError> {
        if !self.refresh_intervals.contains(&config.interval_secs) {
            return Err(FeedError::InvalidConfig(format!(
                "refresh interval {}s is not one of {:?}",
                config.interval_secs, self.refresh_intervals
            )));
        }
        if !self.window_sizes.contains(&config.window_size) {
            return Err(FeedError::InvalidConfig(format!(
                "window size {} is not one of {:?}",
                config.window_size, self.window_sizes
            )));
        }
        Ok(())
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            refresh_intervals: REFRESH_INTERVALS.to_vec(),
            window_sizes: DEFAULT_WINDOW_SIZES.to_vec(),
        }
    }
}

/// Everything needed to assemble the feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub backend_url: String,
    pub public_api_url: String,
    pub location: GeoPoint,
    pub metric: Metric,
    pub poll: PollConfig,
    pub options: PollOptions,
}

impl FeedConfig {
    /// Check the poll configuration against the offered options.
    pub fn validate(&self) -> Result<(), FeedError> {
        self.options.validate(&self.poll)
    }

    /// The standard resolver: local backend first, Open-Meteo second.
    ///
    /// Backend requests go through `session` when one is given; the public
    /// API never sees credentials.
    pub fn resolver(&self, http: Client, session: Option<Arc<SessionManager>>) -> SourceResolver {
        let mut backend = BackendSource::new(http.clone(), &self.backend_url);
        if let Some(session) = session {
            backend = backend.with_session(session);
        }
        let public = OpenMeteoSource::new(http, &self.public_api_url);

        SourceResolver::new(vec![
            Arc::new(backend) as Arc<dyn Source>,
            Arc::new(public) as Arc<dyn Source>,
        ])
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            public_api_url: DEFAULT_PUBLIC_API_URL.to_string(),
            location: GeoPoint::default(),
            metric: Metric::Temperature,
            poll: PollConfig::default(),
            options: PollOptions::default(),
        }
    }
}
