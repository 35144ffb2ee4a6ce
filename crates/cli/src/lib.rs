//! pkgpulse - Package download and repository statistics
//!
//! The fetch layer around `pkgpulse-core`: a warehouse client for download
//! counts, a client for lifetime totals, a GitHub client for repository
//! statistics, a TTL cache in front of all three, and the [`pipeline`]
//! that combines them into reports.

pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod github;
pub mod http;
pub mod pipeline;
pub mod stats;
pub mod warehouse;

pub use config::Settings;
pub use error::{Error, Result};
pub use pipeline::{Dashboard, StatsRequest};
