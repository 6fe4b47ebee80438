//! Engagement-metrics tracking scheduler and scoring pipeline.
//!
//! The [`Tracker`] is a process-wide singleton that periodically polls the
//! X API for post and account metrics on approved ambassador submissions,
//! recomputes the bounded engagement sub-score and anomaly flag for each,
//! and triggers a full recomputation of user standings.
//!
//! Scheduling model: one recurring daily cycle, one staggered timer per
//! region, and a single backoff-resumption timer after a platform rate
//! limit. All timers are cancellable tokio tasks so tests can run under
//! paused time. Exactly one batch executes at a time; overlapping triggers
//! are dropped with a zeroed summary.

mod clock;
mod outcome;
mod recalc;
mod scheduler;
mod status_log;
mod store;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use outcome::{classify, ErrorClass, SubmissionOutcome};
pub use scheduler::{MetricsSource, Tracker};
pub use status_log::{LogEntry, LogKind, StatusLog, LOG_CAP, LOG_RETENTION_HOURS};
pub use store::{MemoryStore, StoreError, TrackerStore};
pub use types::{
    EngagementCounts, Rating, RunSummary, Submission, SubmissionMetricsUpdate, SubmissionStatus,
    TrackedUser, TrackerSnapshot, TRACKING_WINDOW_DAYS,
};
