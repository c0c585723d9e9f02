//! Session layer for the Skywatch dashboard.
//!
//! This crate owns everything credential-related on the client side:
//!
//! - **Storage tiers**: a durable key-value store that survives restarts and
//!   a tab-scoped store that lives only as long as the running shell
//! - **Session manager**: login, logout, credential injection and global
//!   invalidation when any request comes back unauthorized
//! - **Navigation**: an idempotent route signal the UI shell follows

mod error;
pub mod navigator;
mod session;
pub mod storage;

use std::time::Duration;

pub use error::{SessionError, StorageError};
pub use navigator::{Navigator, Route, RouteSignal};
pub use session::{
    AUTH_KEY, GENERIC_AUTH_FAILURE, REMEMBER_ME_KEY, REMEMBERED_USER_KEY, Session, SessionManager,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageTiers};

/// Build the HTTP client shared by the session manager and data sources.
pub fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
}
