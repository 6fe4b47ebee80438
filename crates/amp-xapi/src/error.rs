use thiserror::Error;

/// Errors returned by the X API client.
#[derive(Debug, Error)]
pub enum XApiError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP 429: the platform has asked us to back off.
    #[error("rate limited by X API on {endpoint}")]
    RateLimited { endpoint: String },

    /// HTTP 401/403: credentials are missing, expired, or lack scope.
    #[error("X API auth failure ({status}) on {endpoint}: {body}")]
    Auth {
        status: u16,
        endpoint: String,
        body: String,
    },

    /// Any other non-2xx status. `body` carries the first 200 characters
    /// of the response for operator diagnosis.
    #[error("unexpected HTTP status {status} from {endpoint}: {body}")]
    UnexpectedStatus {
        status: u16,
        endpoint: String,
        body: String,
    },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}
