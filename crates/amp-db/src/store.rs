//! Postgres implementation of the tracker's store seam.
//!
//! The tracker only ever sees active, non-admin users: every query here
//! carries those filters so the batch runner never has to re-apply them.

use amp_tracker::{
    Rating, StoreError, Submission, SubmissionMetricsUpdate, SubmissionStatus, TrackedUser,
    TrackerStore,
};
use amp_xapi::PostMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// [`TrackerStore`] backed by the `users` and `submissions` tables.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct SubmissionRow {
    id: Uuid,
    user_id: Uuid,
    post_url: String,
    status: String,
    impressions: i64,
    likes: i64,
    comments: i64,
    shares: i64,
    engagement_score: Option<f64>,
    total_score: Option<f64>,
    x_impressions: Option<i64>,
    x_likes: Option<i64>,
    x_replies: Option<i64>,
    x_reposts: Option<i64>,
    x_last_fetched_at: Option<DateTime<Utc>>,
    x_tracking_expires_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    flagged_for_review: bool,
    flagged_reason: Option<String>,
}

impl From<SubmissionRow> for Submission {
    fn from(row: SubmissionRow) -> Self {
        // A previous snapshot exists exactly when a fetch has been recorded.
        let snapshot = row.x_impressions.map(|impressions| PostMetrics {
            impressions: to_u64(impressions),
            likes: to_u64(row.x_likes.unwrap_or(0)),
            replies: to_u64(row.x_replies.unwrap_or(0)),
            reposts: to_u64(row.x_reposts.unwrap_or(0)),
        });
        let rating = match (row.engagement_score, row.total_score) {
            (Some(engagement_score), Some(total_score)) => Some(Rating {
                engagement_score,
                total_score,
            }),
            _ => None,
        };

        Submission {
            id: row.id,
            user_id: row.user_id,
            post_url: row.post_url,
            // The CHECK constraint keeps stored statuses in the known set.
            status: SubmissionStatus::parse(&row.status).unwrap_or(SubmissionStatus::Pending),
            counts: amp_tracker::EngagementCounts {
                impressions: to_u64(row.impressions),
                likes: to_u64(row.likes),
                comments: to_u64(row.comments),
                shares: to_u64(row.shares),
            },
            rating,
            snapshot,
            x_last_fetched_at: row.x_last_fetched_at,
            x_tracking_expires_at: row.x_tracking_expires_at,
            approved_at: row.approved_at,
            flagged_for_review: row.flagged_for_review,
            flagged_reason: row.flagged_reason,
        }
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    region: Option<String>,
    x_handle: Option<String>,
    x_followers: i64,
}

impl From<UserRow> for TrackedUser {
    fn from(row: UserRow) -> Self {
        TrackedUser {
            id: row.id,
            region: row.region,
            x_handle: row.x_handle,
            x_followers: to_u64(row.x_followers),
        }
    }
}

#[async_trait]
impl TrackerStore for PgStore {
    async fn distinct_regions(&self) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT region FROM users \
             WHERE region IS NOT NULL AND region <> '' \
               AND is_active AND NOT is_admin \
             ORDER BY region",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)
    }

    async fn approved_submissions(&self, region: &str) -> Result<Vec<Submission>, StoreError> {
        let rows = sqlx::query_as::<_, SubmissionRow>(
            "SELECT s.id, s.user_id, s.post_url, s.status, \
                    s.impressions, s.likes, s.comments, s.shares, \
                    s.engagement_score, s.total_score, \
                    s.x_impressions, s.x_likes, s.x_replies, s.x_reposts, \
                    s.x_last_fetched_at, s.x_tracking_expires_at, \
                    s.approved_at, s.flagged_for_review, s.flagged_reason \
             FROM submissions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.status = 'approved' AND u.region = $1 \
               AND u.is_active AND NOT u.is_admin \
             ORDER BY s.approved_at NULLS LAST, s.id",
        )
        .bind(region)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(rows.into_iter().map(Submission::from).collect())
    }

    async fn user(&self, id: Uuid) -> Result<Option<TrackedUser>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, region, x_handle, x_followers FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(row.map(TrackedUser::from))
    }

    async fn region_avg_approved_impressions(&self, region: &str) -> Result<f64, StoreError> {
        sqlx::query_scalar::<_, f64>(
            "SELECT COALESCE(AVG(s.impressions), 0)::float8 \
             FROM submissions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.status = 'approved' AND u.region = $1 \
               AND u.is_active AND NOT u.is_admin",
        )
        .bind(region)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)
    }

    async fn apply_metrics_update(
        &self,
        update: &SubmissionMetricsUpdate,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE submissions SET \
                impressions = $2, likes = $3, comments = $4, shares = $5, \
                content_score = $6, engagement_score = $7, total_score = $8, \
                x_impressions = $9, x_likes = $10, x_replies = $11, x_reposts = $12, \
                x_last_fetched_at = $13, x_tracking_expires_at = $14, \
                flagged_for_review = $15, flagged_reason = $16 \
             WHERE id = $1",
        )
        .bind(update.submission_id)
        .bind(to_i64(update.counts.impressions))
        .bind(to_i64(update.counts.likes))
        .bind(to_i64(update.counts.comments))
        .bind(to_i64(update.counts.shares))
        .bind(update.rating.content_score())
        .bind(update.rating.engagement_score)
        .bind(update.rating.total_score)
        .bind(to_i64(update.snapshot.impressions))
        .bind(to_i64(update.snapshot.likes))
        .bind(to_i64(update.snapshot.replies))
        .bind(to_i64(update.snapshot.reposts))
        .bind(update.fetched_at)
        .bind(update.tracking_expires_at)
        .bind(update.flagged_for_review)
        .bind(update.flagged_reason.as_deref())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "submission {}",
                update.submission_id
            )));
        }
        Ok(())
    }

    async fn update_user_followers(
        &self,
        user_id: Uuid,
        followers: u64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET x_followers = $2 WHERE id = $1")
            .bind(user_id)
            .bind(to_i64(followers))
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn recompute_standings(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        // Points: sum of the user's approved submissions' total scores.
        sqlx::query(
            "UPDATE users SET points = COALESCE(agg.total, 0) \
             FROM (SELECT u.id, SUM(s.total_score) AS total \
                   FROM users u \
                   LEFT JOIN submissions s \
                     ON s.user_id = u.id AND s.status = 'approved' \
                   GROUP BY u.id) AS agg \
             WHERE users.id = agg.id AND users.is_active AND NOT users.is_admin",
        )
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        // Rank: dense rank over points, ties share a rank.
        sqlx::query(
            "UPDATE users SET rank = ranked.r \
             FROM (SELECT id, DENSE_RANK() OVER (ORDER BY points DESC)::int AS r \
                   FROM users WHERE is_active AND NOT is_admin) AS ranked \
             WHERE users.id = ranked.id",
        )
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        tx.commit().await.map_err(StoreError::backend)
    }
}

// Counters are non-negative by construction; clamp rather than fail on the
// absurd overflow case.
fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_conversions_clamp_instead_of_wrapping() {
        assert_eq!(to_i64(u64::MAX), i64::MAX);
        assert_eq!(to_u64(-5), 0);
        assert_eq!(to_u64(42), 42);
    }
}
