//! The per-region batch runner.
//!
//! One invocation refreshes up to [`BATCH_CAP`] eligible submissions for a
//! region: fetch post metrics, resolve the author's follower count (cached
//! per author within the batch), recompute the engagement sub-score and
//! anomaly flag, persist everything, and finish with one standings
//! recompute if anything changed. Individual failures never abort the
//! batch; only a platform rate limit does.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use amp_xapi::{detect_anomaly, engagement_threshold, normalize_handle, MAX_ENGAGEMENT_SCORE};
use chrono::Duration;

use crate::outcome::{classify, ErrorClass, SubmissionOutcome};
use crate::scheduler::{MetricsSource, Tracker, NOT_CONFIGURED_MSG, REGION_FRESH_HOURS};
use crate::status_log::{LogEntry, LogKind};
use crate::types::{
    Rating, RunSummary, Submission, SubmissionMetricsUpdate, TrackedUser, TRACKING_WINDOW_DAYS,
};

/// Most submissions refreshed in one region batch.
pub const BATCH_CAP: usize = 10;

/// Delay between consecutive submissions within a batch.
pub(crate) const PACING: StdDuration = StdDuration::from_millis(3_500);

impl Tracker {
    /// Run one region batch. Gates (rate limit, missing credentials,
    /// region freshness) return a zeroed summary instead of an error.
    pub(crate) async fn run_region_batch(
        &self,
        reason: &str,
        region: &str,
        force: bool,
        ignore_rate_limit: bool,
    ) -> RunSummary {
        let started = std::time::Instant::now();
        let now = self.clock.now();

        if !ignore_rate_limit {
            let mut st = self.state.lock().await;
            st.clear_expired_rate_limit(now);
            if let Some(until) = st.rate_limited_until {
                tracing::info!(region, until = %until, "tracker: run skipped, rate limited");
                return RunSummary::dropped(reason, Some(region.to_string()), now);
            }
        }

        let Some(source) = self.source.clone() else {
            let mut st = self.state.lock().await;
            st.log.push(
                LogEntry::new(now, LogKind::Error, NOT_CONFIGURED_MSG)
                    .region(region)
                    .critical(),
                now,
            );
            return RunSummary::dropped(reason, Some(region.to_string()), now);
        };

        if !force {
            let st = self.state.lock().await;
            let fresh = st
                .region_last_run
                .get(region)
                .is_some_and(|last| now - *last < Duration::hours(REGION_FRESH_HOURS));
            if fresh {
                tracing::info!(region, "tracker: region ran recently, skipping");
                return RunSummary::dropped(reason, Some(region.to_string()), now);
            }
        }

        let submissions = match self.store.approved_submissions(region).await {
            Ok(submissions) => submissions,
            Err(e) => {
                tracing::error!(region, error = %e, "tracker: failed to load submissions");
                let mut st = self.state.lock().await;
                st.log.push(
                    LogEntry::new(
                        now,
                        LogKind::Error,
                        format!("failed to load submissions for {region}: {e}"),
                    )
                    .region(region),
                    now,
                );
                let mut summary = RunSummary::dropped(reason, Some(region.to_string()), now);
                summary.errors = 1;
                return summary;
            }
        };

        let eligible: Vec<Submission> = submissions
            .into_iter()
            .filter(|s| s.is_trackable(now))
            .collect();
        let remaining = u32::try_from(eligible.len().saturating_sub(BATCH_CAP)).unwrap_or(u32::MAX);

        // Region baseline for anomaly detection, computed once per batch.
        let region_avg = match self.store.region_avg_approved_impressions(region).await {
            Ok(avg) => avg,
            Err(e) => {
                tracing::warn!(region, error = %e, "tracker: region average unavailable");
                0.0
            }
        };

        let mut follower_cache: HashMap<String, u64> = HashMap::new();
        let mut processed: u32 = 0;
        let mut errors: u32 = 0;
        let mut rate_limited = false;

        for sub in eligible.into_iter().take(BATCH_CAP) {
            let outcome = self
                .process_submission(source.as_ref(), &sub, region_avg, &mut follower_cache)
                .await;

            let logged_at = self.clock.now();
            let entry = match &outcome {
                SubmissionOutcome::Updated { message, .. } => {
                    processed += 1;
                    LogEntry::new(logged_at, LogKind::Updated, message.clone())
                        .region(region)
                        .submission(sub.id, sub.user_id)
                }
                SubmissionOutcome::Failed { class, message, .. } => {
                    errors += 1;
                    let entry = LogEntry::new(logged_at, LogKind::Error, message.clone())
                        .region(region)
                        .submission(sub.id, sub.user_id);
                    if *class == ErrorClass::Critical {
                        entry.critical()
                    } else {
                        entry
                    }
                }
            };
            {
                let mut st = self.state.lock().await;
                st.log.push(entry, logged_at);
            }

            if outcome.error_class() == Some(ErrorClass::RateLimit) {
                rate_limited = true;
                break;
            }
            tokio::time::sleep(PACING).await;
        }

        if rate_limited {
            self.enter_backoff(self.clock.now()).await;
        }

        if processed >= 1 {
            if let Err(e) = self.store.recompute_standings().await {
                tracing::error!(error = %e, "tracker: standings recompute failed");
            }
        }

        if !rate_limited {
            let mut st = self.state.lock().await;
            st.region_last_run.insert(region.to_string(), now);
        }

        RunSummary {
            region: Some(region.to_string()),
            reason: reason.to_string(),
            processed,
            errors,
            remaining,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            started_at: now,
        }
    }

    /// Refresh one submission: fetch, score, persist.
    async fn process_submission(
        &self,
        source: &dyn MetricsSource,
        sub: &Submission,
        region_avg: f64,
        follower_cache: &mut HashMap<String, u64>,
    ) -> SubmissionOutcome {
        let failed = |class: ErrorClass, message: String| SubmissionOutcome::Failed {
            submission_id: sub.id,
            user_id: sub.user_id,
            class,
            message,
        };

        // Eligibility filtering already required a resolvable id.
        let Some(post_id) = sub.post_id() else {
            return failed(
                ErrorClass::Transient,
                format!("post url not resolvable: {}", sub.post_url),
            );
        };

        let fresh = match source.post_metrics(&post_id).await {
            Ok(metrics) => metrics,
            Err(e) => return failed(classify(&e), e.to_string()),
        };

        let user = match self.store.user(sub.user_id).await {
            Ok(user) => user,
            Err(e) => {
                return failed(
                    ErrorClass::Transient,
                    format!("failed to load user {}: {e}", sub.user_id),
                )
            }
        };

        let handle = user
            .as_ref()
            .and_then(|u| u.x_handle.as_deref())
            .and_then(normalize_handle);
        let cache_key = handle
            .clone()
            .map_or_else(|| format!("user:{}", sub.user_id), |h| format!("handle:{h}"));

        let followers = if let Some(cached) = follower_cache.get(&cache_key) {
            *cached
        } else {
            // Authors without a linked handle fall back to the stored count;
            // no API call is spent on them.
            let fetched = match &handle {
                Some(h) => match source.followers(h).await {
                    Ok(count) => count,
                    Err(e) => return failed(classify(&e), e.to_string()),
                },
                None => user.as_ref().map_or(0, |u| u.x_followers),
            };
            follower_cache.insert(cache_key, fetched);
            fetched
        };

        // Scoring: the engagement sub-score only ever moves up, and the
        // non-engagement portion of the total is preserved as-is.
        let previous = sub.rating.unwrap_or_default();
        let threshold = engagement_threshold(fresh.impressions, followers);
        let engagement = if threshold > previous.engagement_score {
            threshold.min(MAX_ENGAGEMENT_SCORE)
        } else {
            previous.engagement_score
        };
        let total = round2(previous.content_score() + engagement).min(100.0);
        let rating = Rating {
            engagement_score: engagement,
            total_score: total,
        };

        let flagged_reason = detect_anomaly(sub.snapshot, fresh, region_avg, followers);
        if let Some(reason) = &flagged_reason {
            tracing::warn!(submission_id = %sub.id, reason, "tracker: metrics flagged for review");
        }

        let now = self.clock.now();
        let tracking_expires_at = sub
            .tracking_expires_at()
            .unwrap_or_else(|| now + Duration::days(TRACKING_WINDOW_DAYS));
        let update = SubmissionMetricsUpdate {
            submission_id: sub.id,
            counts: fresh.into(),
            snapshot: fresh,
            rating,
            fetched_at: now,
            tracking_expires_at,
            flagged_for_review: flagged_reason.is_some(),
            flagged_reason: flagged_reason.clone(),
        };
        if let Err(e) = self.store.apply_metrics_update(&update).await {
            return failed(
                ErrorClass::Transient,
                format!("failed to persist metrics for {}: {e}", sub.id),
            );
        }

        if let Some(TrackedUser { id, x_followers, .. }) = user {
            if followers > x_followers {
                if let Err(e) = self.store.update_user_followers(id, followers).await {
                    tracing::warn!(user_id = %id, error = %e, "tracker: follower patch failed");
                }
            }
        }

        SubmissionOutcome::Updated {
            submission_id: sub.id,
            user_id: sub.user_id,
            engagement_score: engagement,
            flagged: flagged_reason.is_some(),
            message: format!(
                "metrics updated: {} impressions, engagement score {engagement:.0}",
                fresh.impressions
            ),
        }
    }
}

/// Round to two decimal places, matching how scores are displayed.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
