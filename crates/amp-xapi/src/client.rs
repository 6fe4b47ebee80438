//! HTTP client for the X API v2.
//!
//! Wraps `reqwest` with bearer-token auth and X-specific failure
//! classification: 429 becomes [`XApiError::RateLimited`], 401/403 become
//! [`XApiError::Auth`], and any other non-2xx status is surfaced with the
//! first 200 characters of the response body.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};

use crate::error::XApiError;
use crate::handle::normalize_handle;
use crate::types::{PostMetrics, TweetEnvelope, UserEnvelope};

const DEFAULT_BASE_URL: &str = "https://api.x.com/";

/// Maximum number of response-body characters embedded in an error.
const ERROR_BODY_SNIPPET_CHARS: usize = 200;

/// Client for the X API v2.
///
/// Manages the HTTP client, bearer token, and base URL. Use
/// [`XApiClient::new`] for production or [`XApiClient::with_base_url`] to
/// point at a mock server in tests.
pub struct XApiClient {
    client: Client,
    bearer_token: String,
    base_url: Url,
}

impl XApiClient {
    /// Creates a new client pointed at the production X API.
    ///
    /// # Errors
    ///
    /// Returns [`XApiError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(bearer_token: &str, timeout_secs: u64) -> Result<Self, XApiError> {
        Self::with_base_url(bearer_token, timeout_secs, DEFAULT_BASE_URL)
    }

    /// Creates a new client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`XApiError::Http`] if the underlying `reqwest::Client` cannot
    /// be constructed, or [`XApiError::UnexpectedStatus`] if `base_url` is not
    /// a valid URL.
    pub fn with_base_url(
        bearer_token: &str,
        timeout_secs: u64,
        base_url: &str,
    ) -> Result<Self, XApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("amp/0.1 (engagement-tracking)")
            .build()?;

        // Normalise: exactly one trailing slash so Url::join keeps the path.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| XApiError::UnexpectedStatus {
            status: 0,
            endpoint: base_url.to_string(),
            body: format!("invalid base URL: {e}"),
        })?;

        Ok(Self {
            client,
            bearer_token: bearer_token.to_owned(),
            base_url,
        })
    }

    /// Fetches public metrics for a single post.
    ///
    /// Missing metric fields default to 0; the platform drops fields it
    /// does not report for a given post.
    ///
    /// # Errors
    ///
    /// - [`XApiError::RateLimited`] on HTTP 429.
    /// - [`XApiError::Auth`] on HTTP 401/403.
    /// - [`XApiError::UnexpectedStatus`] on any other non-2xx status.
    /// - [`XApiError::Http`] on network failure.
    /// - [`XApiError::Deserialize`] if the response does not match the
    ///   expected shape.
    pub async fn fetch_post_metrics(&self, post_id: &str) -> Result<PostMetrics, XApiError> {
        let endpoint = format!("2/tweets/{post_id}");
        let mut url = self.join(&endpoint)?;
        url.query_pairs_mut()
            .append_pair("tweet.fields", "public_metrics");

        let body = self.request_json(url, &endpoint).await?;
        let envelope: TweetEnvelope =
            serde_json::from_value(body).map_err(|e| XApiError::Deserialize {
                context: format!("fetch_post_metrics(id={post_id})"),
                source: e,
            })?;

        Ok(PostMetrics::from(envelope.data.public_metrics))
    }

    /// Fetches the follower count for a handle.
    ///
    /// The handle may be bare, `@`-prefixed, or a full profile URL; it is
    /// normalized before the lookup.
    ///
    /// # Errors
    ///
    /// Same classification as [`Self::fetch_post_metrics`]. A handle that
    /// cannot be normalized is reported as [`XApiError::UnexpectedStatus`]
    /// with status 0.
    pub async fn fetch_followers(&self, handle: &str) -> Result<u64, XApiError> {
        let Some(normalized) = normalize_handle(handle) else {
            return Err(XApiError::UnexpectedStatus {
                status: 0,
                endpoint: "2/users/by/username".to_string(),
                body: format!("unusable handle: {handle:?}"),
            });
        };

        let endpoint = format!("2/users/by/username/{normalized}");
        let mut url = self.join(&endpoint)?;
        url.query_pairs_mut()
            .append_pair("user.fields", "public_metrics");

        let body = self.request_json(url, &endpoint).await?;
        let envelope: UserEnvelope =
            serde_json::from_value(body).map_err(|e| XApiError::Deserialize {
                context: format!("fetch_followers(handle={normalized})"),
                source: e,
            })?;

        Ok(envelope.data.public_metrics.followers_count)
    }

    fn join(&self, endpoint: &str) -> Result<Url, XApiError> {
        self.base_url
            .join(endpoint)
            .map_err(|e| XApiError::UnexpectedStatus {
                status: 0,
                endpoint: endpoint.to_string(),
                body: format!("invalid endpoint: {e}"),
            })
    }

    /// Sends an authenticated GET, classifies the status, and parses the body.
    async fn request_json(
        &self,
        url: Url,
        endpoint: &str,
    ) -> Result<serde_json::Value, XApiError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(endpoint, status = status.as_u16(), "X API response");
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(XApiError::RateLimited {
                endpoint: endpoint.to_string(),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(XApiError::Auth {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
                body: truncate_body(&body),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(XApiError::UnexpectedStatus {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
                body: truncate_body(&body),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| XApiError::Deserialize {
            context: endpoint.to_string(),
            source: e,
        })
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> XApiClient {
        XApiClient::with_base_url("test-token", 30, base_url)
            .expect("client construction should not fail")
    }

    #[tokio::test]
    async fn fetch_post_metrics_parses_public_metrics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/tweets/42"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "id": "42",
                    "public_metrics": {
                        "impression_count": 50_000,
                        "like_count": 1_200,
                        "reply_count": 80,
                        "retweet_count": 300,
                        "quote_count": 20
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let metrics = client.fetch_post_metrics("42").await.unwrap();
        assert_eq!(metrics.impressions, 50_000);
        assert_eq!(metrics.likes, 1_200);
        assert_eq!(metrics.replies, 80);
        assert_eq!(metrics.reposts, 320);
    }

    #[tokio::test]
    async fn fetch_followers_normalizes_profile_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/users/by/username/jess_w"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "public_metrics": { "followers_count": 10_000 } }
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let followers = client
            .fetch_followers("https://x.com/Jess_W")
            .await
            .unwrap();
        assert_eq!(followers, 10_000);
    }

    #[tokio::test]
    async fn status_429_classified_as_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/tweets/1"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.fetch_post_metrics("1").await.unwrap_err();
        assert!(matches!(err, XApiError::RateLimited { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn status_401_classified_as_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/tweets/1"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.fetch_post_metrics("1").await.unwrap_err();
        assert!(
            matches!(err, XApiError::Auth { status: 401, .. }),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn unexpected_status_embeds_truncated_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/tweets/1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(1_000)))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.fetch_post_metrics("1").await.unwrap_err();
        match err {
            XApiError::UnexpectedStatus { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), 200, "body should be truncated to 200 chars");
            }
            other => panic!("expected UnexpectedStatus, got: {other}"),
        }
    }

    #[tokio::test]
    async fn unusable_handle_is_rejected_without_a_request() {
        let client = test_client("http://127.0.0.1:9");
        let err = client.fetch_followers("not a handle").await.unwrap_err();
        assert!(matches!(err, XApiError::UnexpectedStatus { status: 0, .. }));
    }
}
