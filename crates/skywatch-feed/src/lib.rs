//! Reading feed for the Skywatch dashboard.
//!
//! This crate turns two independent data providers into one coherent stream
//! of readings:
//!
//! - **Sources**: the local backend and the public Open-Meteo API, each
//!   normalizing one canonical query into its own wire format
//! - **Resolver**: tries sources in priority order until one succeeds
//! - **Window**: cuts the most recent fixed-size window out of a series
//! - **Trend**: classifies a new reading against the last persisted value
//! - **Poller**: epoch-guarded periodic refresh exposing dashboard state

mod backend;
pub mod config;
pub mod control;
mod error;
mod open_meteo;
pub mod poller;
pub mod source;
pub mod trend;
mod types;
pub mod window;

pub use backend::BackendSource;
pub use config::{
    DEFAULT_BACKEND_URL, DEFAULT_PUBLIC_API_URL, DEFAULT_WINDOW_SIZES, FeedConfig, PREDICTION_DAYS,
    PollConfig, PollOptions, REFRESH_INTERVALS,
};
pub use control::PollControl;
pub use error::{FeedError, SourceError, SourceFailure};
pub use open_meteo::OpenMeteoSource;
pub use poller::{DashboardState, PollPhase, Poller, PollerBuilder};
pub use source::{Payload, QueryKind, Resolved, Source, SourceQuery, SourceResolver};
pub use trend::{ReadingStore, TrendEngine, classify};
pub use types::*;
pub use window::{extract, extract_with_lookback};
