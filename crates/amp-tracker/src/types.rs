//! Domain types shared by the batch runner, scheduler, and store seam.

use std::collections::BTreeMap;

use amp_xapi::{post_id_from_url, PostMetrics};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Days of metric tracking granted when a submission is approved.
pub const TRACKING_WINDOW_DAYS: i64 = 7;

/// Review status of an ambassador submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    NeedsEdits,
    Rejected,
}

impl SubmissionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::NeedsEdits => "needs_edits",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    /// Parse a stored status string. Unknown values map to `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SubmissionStatus::Pending),
            "approved" => Some(SubmissionStatus::Approved),
            "needs_edits" => Some(SubmissionStatus::NeedsEdits),
            "rejected" => Some(SubmissionStatus::Rejected),
            _ => None,
        }
    }
}

/// The scored portion of a submission.
///
/// `content_score` (the 0–80 editorial portion) is derived, not stored:
/// `total_score = content_score + engagement_score` is the invariant the
/// automated pipeline preserves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Rating {
    /// Engagement sub-score in `[0, 20]`. Never decreases across automated
    /// updates.
    pub engagement_score: f64,
    /// Total score in `[0, 100]`.
    pub total_score: f64,
}

impl Rating {
    /// The non-engagement portion of the total score.
    #[must_use]
    pub fn content_score(&self) -> f64 {
        self.total_score - self.engagement_score
    }
}

/// Public engagement counters mirrored onto the submission record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngagementCounts {
    pub impressions: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
}

impl From<PostMetrics> for EngagementCounts {
    fn from(m: PostMetrics) -> Self {
        Self {
            impressions: m.impressions,
            likes: m.likes,
            comments: m.replies,
            shares: m.reposts,
        }
    }
}

/// An ambassador submission as seen by the tracker.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub post_url: String,
    pub status: SubmissionStatus,
    pub counts: EngagementCounts,
    pub rating: Option<Rating>,
    /// Raw X metrics captured on the previous fetch, if any.
    pub snapshot: Option<PostMetrics>,
    pub x_last_fetched_at: Option<DateTime<Utc>>,
    pub x_tracking_expires_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub flagged_for_review: bool,
    pub flagged_reason: Option<String>,
}

impl Submission {
    /// The numeric X status id this submission resolves to, if any.
    #[must_use]
    pub fn post_id(&self) -> Option<String> {
        post_id_from_url(&self.post_url)
    }

    /// End of the tracking window: the persisted expiry when present,
    /// otherwise approval time plus [`TRACKING_WINDOW_DAYS`].
    #[must_use]
    pub fn tracking_expires_at(&self) -> Option<DateTime<Utc>> {
        self.x_tracking_expires_at
            .or_else(|| self.approved_at.map(|t| t + Duration::days(TRACKING_WINDOW_DAYS)))
    }

    /// Whether this submission is eligible for a metric refresh at `now`:
    /// approved, resolvable to a post id, and inside its tracking window.
    /// A submission with no known window end is never trackable.
    #[must_use]
    pub fn is_trackable(&self, now: DateTime<Utc>) -> bool {
        self.status == SubmissionStatus::Approved
            && self.post_id().is_some()
            && self.tracking_expires_at().is_some_and(|e| e > now)
    }
}

/// The slice of a user record the tracker reads and patches.
#[derive(Debug, Clone)]
pub struct TrackedUser {
    pub id: Uuid,
    pub region: Option<String>,
    pub x_handle: Option<String>,
    pub x_followers: u64,
}

/// Everything persisted for one submission after a successful fetch pair.
/// Applied atomically by the store.
#[derive(Debug, Clone)]
pub struct SubmissionMetricsUpdate {
    pub submission_id: Uuid,
    pub counts: EngagementCounts,
    pub snapshot: PostMetrics,
    pub rating: Rating,
    pub fetched_at: DateTime<Utc>,
    pub tracking_expires_at: DateTime<Utc>,
    pub flagged_for_review: bool,
    pub flagged_reason: Option<String>,
}

/// Result of one batch-runner invocation. The runner always returns a
/// summary, never an error.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// `None` for a manual all-regions run or a dropped trigger.
    pub region: Option<String>,
    pub reason: String,
    pub processed: u32,
    pub errors: u32,
    /// Eligible submissions beyond the batch cap, reported but not processed.
    pub remaining: u32,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl RunSummary {
    /// The zeroed summary returned when a trigger is dropped (overlap,
    /// active rate limit, missing credentials) without running a batch.
    #[must_use]
    pub fn dropped(reason: &str, region: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            region,
            reason: reason.to_string(),
            processed: 0,
            errors: 0,
            remaining: 0,
            duration_ms: 0,
            started_at: now,
        }
    }
}

/// Operator-facing status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSnapshot {
    pub configured: bool,
    pub running: bool,
    pub rate_limited_until: Option<DateTime<Utc>>,
    pub last_run: Option<RunSummary>,
    pub regions: Vec<String>,
    pub region_last_run: BTreeMap<String, DateTime<Utc>>,
    /// Soonest of: backoff resumption, a still-pending region timer, or the
    /// next daily cycle.
    pub next_wake_at: Option<DateTime<Utc>>,
    pub log: Vec<crate::status_log::LogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(status: SubmissionStatus, url: &str) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            post_url: url.to_string(),
            status,
            counts: EngagementCounts::default(),
            rating: None,
            snapshot: None,
            x_last_fetched_at: None,
            x_tracking_expires_at: None,
            approved_at: Some(Utc::now()),
            flagged_for_review: false,
            flagged_reason: None,
        }
    }

    #[test]
    fn approved_submission_with_post_link_is_trackable() {
        let sub = submission(SubmissionStatus::Approved, "https://x.com/a/status/1");
        assert!(sub.is_trackable(Utc::now()));
    }

    #[test]
    fn pending_submission_is_not_trackable() {
        let sub = submission(SubmissionStatus::Pending, "https://x.com/a/status/1");
        assert!(!sub.is_trackable(Utc::now()));
    }

    #[test]
    fn unresolvable_link_is_not_trackable() {
        let sub = submission(SubmissionStatus::Approved, "https://instagram.com/p/abc");
        assert!(!sub.is_trackable(Utc::now()));
    }

    #[test]
    fn tracking_window_defaults_to_seven_days_after_approval() {
        let sub = submission(SubmissionStatus::Approved, "https://x.com/a/status/1");
        let approved = sub.approved_at.unwrap();
        assert_eq!(
            sub.tracking_expires_at(),
            Some(approved + Duration::days(7))
        );
    }

    #[test]
    fn persisted_expiry_wins_over_derived_window() {
        let mut sub = submission(SubmissionStatus::Approved, "https://x.com/a/status/1");
        let explicit = Utc::now() + Duration::days(2);
        sub.x_tracking_expires_at = Some(explicit);
        assert_eq!(sub.tracking_expires_at(), Some(explicit));
    }

    #[test]
    fn expired_window_excludes_submission() {
        // Evaluated one minute past the seven-day mark.
        let mut sub = submission(SubmissionStatus::Approved, "https://x.com/a/status/1");
        let t0 = Utc::now() - Duration::days(7) - Duration::minutes(1);
        sub.approved_at = Some(t0);
        sub.x_tracking_expires_at = None;
        assert!(!sub.is_trackable(Utc::now()));
    }

    #[test]
    fn submission_with_no_approval_time_is_not_trackable() {
        let mut sub = submission(SubmissionStatus::Approved, "https://x.com/a/status/1");
        sub.approved_at = None;
        assert!(!sub.is_trackable(Utc::now()));
    }

    #[test]
    fn rating_content_score_is_derived() {
        let rating = Rating {
            engagement_score: 14.0,
            total_score: 86.5,
        };
        assert!((rating.content_score() - 72.5).abs() < f64::EPSILON);
    }

    #[test]
    fn counts_map_from_post_metrics() {
        let counts = EngagementCounts::from(PostMetrics {
            impressions: 100,
            likes: 10,
            replies: 3,
            reposts: 5,
        });
        assert_eq!(counts.comments, 3);
        assert_eq!(counts.shares, 5);
    }
}
