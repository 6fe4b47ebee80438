//! Per-submission outcome accumulation and error classification.

use amp_xapi::XApiError;
use uuid::Uuid;

/// How a batch should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// HTTP 429: abort the rest of the batch and enter backoff.
    RateLimit,
    /// Credential failures (401/403): retained in the log indefinitely,
    /// but the batch continues.
    Critical,
    /// Anything else: logged, pruned after the retention window, batch
    /// continues.
    Transient,
}

/// Classify an X API error. Pure, so the policy is testable on its own.
#[must_use]
pub fn classify(err: &XApiError) -> ErrorClass {
    match err {
        XApiError::RateLimited { .. } => ErrorClass::RateLimit,
        XApiError::Auth { .. } => ErrorClass::Critical,
        XApiError::Http(_) | XApiError::UnexpectedStatus { .. } | XApiError::Deserialize { .. } => {
            ErrorClass::Transient
        }
    }
}

/// The typed result of processing one submission in a batch.
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    Updated {
        submission_id: Uuid,
        user_id: Uuid,
        engagement_score: f64,
        flagged: bool,
        message: String,
    },
    Failed {
        submission_id: Uuid,
        user_id: Uuid,
        class: ErrorClass,
        message: String,
    },
}

impl SubmissionOutcome {
    #[must_use]
    pub fn is_updated(&self) -> bool {
        matches!(self, SubmissionOutcome::Updated { .. })
    }

    #[must_use]
    pub fn error_class(&self) -> Option<ErrorClass> {
        match self {
            SubmissionOutcome::Updated { .. } => None,
            SubmissionOutcome::Failed { class, .. } => Some(*class),
        }
    }
}
