//! The collection-store seam.
//!
//! The tracker reads submissions and users, writes metric updates, and
//! triggers the standings recompute through [`TrackerStore`]. Production
//! uses the Postgres implementation in `amp-db`; tests (and local
//! development without a database) use [`MemoryStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Submission, SubmissionMetricsUpdate, SubmissionStatus, TrackedUser};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// Persistence operations the tracker needs. One implementation per
/// backend; the tracker itself is backend-agnostic.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Distinct, non-empty regions of active, non-admin users.
    async fn distinct_regions(&self) -> Result<Vec<String>, StoreError>;

    /// All approved submissions whose author lives in `region`.
    /// Eligibility (resolvable post id, tracking window) is the caller's
    /// concern.
    async fn approved_submissions(&self, region: &str) -> Result<Vec<Submission>, StoreError>;

    async fn user(&self, id: Uuid) -> Result<Option<TrackedUser>, StoreError>;

    /// Mean impression count across the region's approved submissions.
    /// Zero when the region has none.
    async fn region_avg_approved_impressions(&self, region: &str) -> Result<f64, StoreError>;

    /// Persist one submission's metrics, raw snapshot, scores, and anomaly
    /// fields as a single atomic write.
    async fn apply_metrics_update(
        &self,
        update: &SubmissionMetricsUpdate,
    ) -> Result<(), StoreError>;

    /// Patch a user's cached follower count.
    async fn update_user_followers(&self, user_id: Uuid, followers: u64)
        -> Result<(), StoreError>;

    /// Recompute aggregate user standings (points and rank) from scratch.
    /// Internals are opaque to the tracker; it only triggers the pass.
    async fn recompute_standings(&self) -> Result<(), StoreError>;
}

/// In-memory [`TrackerStore`] for tests and credential-less local runs.
///
/// Every user is treated as active and non-admin; the Postgres
/// implementation applies the real filters.
#[derive(Debug, Default)]
pub struct MemoryStore {
    submissions: Mutex<HashMap<Uuid, Submission>>,
    users: Mutex<HashMap<Uuid, TrackedUser>>,
    standings_recomputes: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn insert_submission(&self, submission: Submission) {
        self.submissions
            .lock()
            .expect("memory store lock poisoned")
            .insert(submission.id, submission);
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn insert_user(&self, user: TrackedUser) {
        self.users
            .lock()
            .expect("memory store lock poisoned")
            .insert(user.id, user);
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn submission(&self, id: Uuid) -> Option<Submission> {
        self.submissions
            .lock()
            .expect("memory store lock poisoned")
            .get(&id)
            .cloned()
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn user_sync(&self, id: Uuid) -> Option<TrackedUser> {
        self.users
            .lock()
            .expect("memory store lock poisoned")
            .get(&id)
            .cloned()
    }

    /// How many times the standings recompute was triggered.
    #[must_use]
    pub fn standings_recomputes(&self) -> usize {
        self.standings_recomputes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackerStore for MemoryStore {
    async fn distinct_regions(&self) -> Result<Vec<String>, StoreError> {
        let users = self.users.lock().expect("memory store lock poisoned");
        let mut regions: Vec<String> = users
            .values()
            .filter_map(|u| u.region.clone())
            .filter(|r| !r.is_empty())
            .collect();
        regions.sort();
        regions.dedup();
        Ok(regions)
    }

    async fn approved_submissions(&self, region: &str) -> Result<Vec<Submission>, StoreError> {
        let users = self.users.lock().expect("memory store lock poisoned");
        let submissions = self.submissions.lock().expect("memory store lock poisoned");
        let mut matched: Vec<Submission> = submissions
            .values()
            .filter(|s| s.status == SubmissionStatus::Approved)
            .filter(|s| {
                users
                    .get(&s.user_id)
                    .and_then(|u| u.region.as_deref())
                    .is_some_and(|r| r == region)
            })
            .cloned()
            .collect();
        // Deterministic order for tests: oldest approval first.
        matched.sort_by_key(|s| (s.approved_at, s.id));
        Ok(matched)
    }

    async fn user(&self, id: Uuid) -> Result<Option<TrackedUser>, StoreError> {
        Ok(self
            .users
            .lock()
            .expect("memory store lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn region_avg_approved_impressions(&self, region: &str) -> Result<f64, StoreError> {
        let subs = self.approved_submissions(region).await?;
        if subs.is_empty() {
            return Ok(0.0);
        }
        #[allow(clippy::cast_precision_loss)]
        let sum: f64 = subs.iter().map(|s| s.counts.impressions as f64).sum();
        #[allow(clippy::cast_precision_loss)]
        Ok(sum / subs.len() as f64)
    }

    async fn apply_metrics_update(
        &self,
        update: &SubmissionMetricsUpdate,
    ) -> Result<(), StoreError> {
        let mut submissions = self.submissions.lock().expect("memory store lock poisoned");
        let sub = submissions
            .get_mut(&update.submission_id)
            .ok_or_else(|| StoreError::NotFound(format!("submission {}", update.submission_id)))?;
        sub.counts = update.counts;
        sub.snapshot = Some(update.snapshot);
        sub.rating = Some(update.rating);
        sub.x_last_fetched_at = Some(update.fetched_at);
        sub.x_tracking_expires_at = Some(update.tracking_expires_at);
        sub.flagged_for_review = update.flagged_for_review;
        sub.flagged_reason = update.flagged_reason.clone();
        Ok(())
    }

    async fn update_user_followers(
        &self,
        user_id: Uuid,
        followers: u64,
    ) -> Result<(), StoreError> {
        let mut users = self.users.lock().expect("memory store lock poisoned");
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        user.x_followers = followers;
        Ok(())
    }

    async fn recompute_standings(&self) -> Result<(), StoreError> {
        self.standings_recomputes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
