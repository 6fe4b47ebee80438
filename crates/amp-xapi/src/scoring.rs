//! Pure scoring policy: engagement threshold and anomaly detection.
//!
//! Nothing here does I/O. The batch runner feeds in fresh metrics, the
//! previous stored snapshot, the region baseline, and the follower count;
//! these functions answer "what score does this reach earn" and "does this
//! jump look organic".

use crate::types::PostMetrics;

/// Upper bound of the engagement sub-score.
pub const MAX_ENGAGEMENT_SCORE: f64 = 20.0;

/// Compute the threshold engagement score for a post, in `[0, 20]`.
///
/// The score is the better of two ladders:
///
/// - **Reach ratio**: impressions relative to the author's follower count.
///   Rewards posts that travel beyond the author's own audience; a ratio of
///   5x or more earns the full 20.
/// - **Absolute reach**: a floor for small accounts, so a 500-follower
///   ambassador whose post hits 50k impressions is not stuck at the ratio
///   ladder's mercy of a noisy denominator.
///
/// A zero-follower account is treated as having one follower so the ratio
/// stays defined.
#[must_use]
pub fn engagement_threshold(impressions: u64, followers: u64) -> f64 {
    if impressions == 0 {
        return 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let ratio = impressions as f64 / followers.max(1) as f64;

    let by_ratio = match ratio {
        r if r >= 5.0 => 20.0,
        r if r >= 3.0 => 17.0,
        r if r >= 2.0 => 14.0,
        r if r >= 1.0 => 11.0,
        r if r >= 0.5 => 8.0,
        r if r >= 0.25 => 5.0,
        r if r >= 0.1 => 3.0,
        _ => 1.0,
    };

    let by_reach = match impressions {
        i if i >= 250_000 => 20.0,
        i if i >= 100_000 => 17.0,
        i if i >= 50_000 => 14.0,
        i if i >= 20_000 => 11.0,
        i if i >= 10_000 => 8.0,
        i if i >= 5_000 => 5.0,
        i if i >= 1_000 => 3.0,
        _ => 0.0,
    };

    f64::max(by_ratio, by_reach).min(MAX_ENGAGEMENT_SCORE)
}

/// Impressions must exceed this multiple of the previous snapshot to count
/// as a suspicious jump.
const GROWTH_MULTIPLE: u64 = 10;
/// Impressions must exceed this multiple of the region average to count as
/// a regional outlier.
const REGION_MULTIPLE: f64 = 20.0;
/// Impressions must exceed this multiple of the follower count to count as
/// implausible reach.
const AUDIENCE_MULTIPLE: u64 = 100;

/// Heuristic anomaly detection for a freshly fetched metric set.
///
/// Compares the fresh metrics against the submission's own previous
/// snapshot, the region's average approved-submission impressions, and the
/// author's follower count. Returns a human-readable reason for the first
/// rule that fires, or `None` when the metrics look organic.
///
/// All rules carry absolute floors so small accounts with naturally noisy
/// ratios are never flagged.
#[must_use]
pub fn detect_anomaly(
    previous: Option<PostMetrics>,
    fresh: PostMetrics,
    region_avg_impressions: f64,
    followers: u64,
) -> Option<String> {
    if fresh.impressions > 0 && fresh.likes > fresh.impressions {
        return Some(format!(
            "more likes ({}) than impressions ({})",
            fresh.likes, fresh.impressions
        ));
    }

    if let Some(prev) = previous {
        if prev.impressions >= 1_000
            && fresh.impressions > prev.impressions.saturating_mul(GROWTH_MULTIPLE)
        {
            return Some(format!(
                "impressions jumped {} -> {} since last fetch",
                prev.impressions, fresh.impressions
            ));
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let fresh_impressions = fresh.impressions as f64;
    if region_avg_impressions >= 1.0
        && fresh.impressions >= 10_000
        && fresh_impressions > region_avg_impressions * REGION_MULTIPLE
    {
        return Some(format!(
            "impressions {} exceed {REGION_MULTIPLE:.0}x the region average ({region_avg_impressions:.0})",
            fresh.impressions
        ));
    }

    if followers > 0
        && fresh.impressions >= 50_000
        && fresh.impressions > followers.saturating_mul(AUDIENCE_MULTIPLE)
    {
        return Some(format!(
            "reach {} implausible for an audience of {followers}",
            fresh.impressions
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(impressions: u64, likes: u64) -> PostMetrics {
        PostMetrics {
            impressions,
            likes,
            replies: 0,
            reposts: 0,
        }
    }

    #[test]
    fn zero_impressions_score_zero() {
        assert_eq!(engagement_threshold(0, 10_000), 0.0);
    }

    #[test]
    fn five_x_ratio_earns_maximum() {
        // 50k impressions on 10k followers is a 5x ratio.
        assert_eq!(engagement_threshold(50_000, 10_000), 20.0);
    }

    #[test]
    fn ratio_ladder_is_monotonic() {
        let followers = 10_000;
        let mut last = 0.0;
        for impressions in [500, 1_500, 3_000, 6_000, 12_000, 22_000, 35_000, 60_000] {
            let score = engagement_threshold(impressions, followers);
            assert!(
                score >= last,
                "score decreased at {impressions} impressions: {score} < {last}"
            );
            last = score;
        }
    }

    #[test]
    fn absolute_reach_floor_helps_small_accounts() {
        // 500 followers, 50k impressions: ratio already maxes out,
        // but even a modest 10k reach earns something meaningful.
        assert_eq!(engagement_threshold(50_000, 500), 20.0);
        assert!(engagement_threshold(10_000, 1_000_000) >= 8.0);
    }

    #[test]
    fn score_never_exceeds_bound() {
        for (i, f) in [(1u64, 1u64), (10_000_000, 1), (250_000, 0)] {
            assert!(engagement_threshold(i, f) <= MAX_ENGAGEMENT_SCORE);
        }
    }

    #[test]
    fn organic_metrics_are_not_flagged() {
        let flag = detect_anomaly(
            Some(metrics(8_000, 100)),
            metrics(12_000, 150),
            9_000.0,
            5_000,
        );
        assert_eq!(flag, None);
    }

    #[test]
    fn likes_exceeding_impressions_are_flagged() {
        let flag = detect_anomaly(None, metrics(100, 500), 0.0, 1_000);
        assert!(flag.is_some());
    }

    #[test]
    fn suspicious_growth_since_last_fetch_is_flagged() {
        let flag = detect_anomaly(Some(metrics(2_000, 10)), metrics(30_000, 40), 0.0, 5_000);
        let reason = flag.expect("10x jump from a real baseline should flag");
        assert!(reason.contains("jumped"), "reason: {reason}");
    }

    #[test]
    fn small_baseline_growth_is_not_flagged() {
        // 50 -> 2000 is a big multiple but the baseline is below the floor.
        let flag = detect_anomaly(Some(metrics(50, 1)), metrics(2_000, 20), 0.0, 5_000);
        assert_eq!(flag, None);
    }

    #[test]
    fn regional_outlier_is_flagged() {
        let flag = detect_anomaly(None, metrics(60_000, 300), 1_500.0, 60_000);
        let reason = flag.expect("20x the region average should flag");
        assert!(reason.contains("region average"), "reason: {reason}");
    }

    #[test]
    fn implausible_reach_for_audience_is_flagged() {
        let flag = detect_anomaly(None, metrics(120_000, 900), 0.0, 200);
        let reason = flag.expect("100x audience reach should flag");
        assert!(reason.contains("audience"), "reason: {reason}");
    }
}
