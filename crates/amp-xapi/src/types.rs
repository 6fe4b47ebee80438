use serde::Deserialize;

/// Public metrics for a single post, as reported by the X API.
///
/// Counts are trusted as-is; any field the API omits deserializes to 0
/// (the platform drops fields it cannot or will not report).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PostMetrics {
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub replies: u64,
    #[serde(default)]
    pub reposts: u64,
}

/// `GET /2/tweets/{id}` envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct TweetEnvelope {
    pub data: TweetData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TweetData {
    #[serde(default)]
    pub public_metrics: RawPostMetrics,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawPostMetrics {
    #[serde(default)]
    pub impression_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub quote_count: u64,
}

impl From<RawPostMetrics> for PostMetrics {
    fn from(raw: RawPostMetrics) -> Self {
        Self {
            impressions: raw.impression_count,
            likes: raw.like_count,
            replies: raw.reply_count,
            // Quote posts amplify reach the same way plain reposts do.
            reposts: raw.retweet_count + raw.quote_count,
        }
    }
}

/// `GET /2/users/by/username/{handle}` envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct UserEnvelope {
    pub data: UserData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserData {
    #[serde(default)]
    pub public_metrics: RawUserMetrics,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawUserMetrics {
    #[serde(default)]
    pub followers_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_metric_fields_default_to_zero() {
        let json = r#"{ "data": { "public_metrics": { "like_count": 7 } } }"#;
        let envelope: TweetEnvelope = serde_json::from_str(json).unwrap();
        let metrics = PostMetrics::from(envelope.data.public_metrics);
        assert_eq!(metrics.impressions, 0);
        assert_eq!(metrics.likes, 7);
        assert_eq!(metrics.replies, 0);
        assert_eq!(metrics.reposts, 0);
    }

    #[test]
    fn missing_public_metrics_object_defaults_to_zero() {
        let json = r#"{ "data": { "id": "123" } }"#;
        let envelope: TweetEnvelope = serde_json::from_str(json).unwrap();
        let metrics = PostMetrics::from(envelope.data.public_metrics);
        assert_eq!(metrics, PostMetrics::default());
    }

    #[test]
    fn reposts_include_quotes() {
        let json = r#"{ "data": { "public_metrics": { "retweet_count": 3, "quote_count": 2 } } }"#;
        let envelope: TweetEnvelope = serde_json::from_str(json).unwrap();
        let metrics = PostMetrics::from(envelope.data.public_metrics);
        assert_eq!(metrics.reposts, 5);
    }
}
