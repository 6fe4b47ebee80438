//! X (Twitter) API client and engagement scoring policy.
//!
//! [`XApiClient`] wraps the v2 REST API: per-post public metrics and
//! per-handle follower counts, with typed failure classification
//! ([`XApiError`]). [`scoring`] holds the pure policy functions that turn
//! raw metrics into the bounded engagement sub-score and anomaly flag.

mod client;
mod error;
mod handle;
pub mod scoring;
mod types;

pub use client::XApiClient;
pub use error::XApiError;
pub use handle::{normalize_handle, post_id_from_url};
pub use scoring::{detect_anomaly, engagement_threshold, MAX_ENGAGEMENT_SCORE};
pub use types::PostMetrics;
