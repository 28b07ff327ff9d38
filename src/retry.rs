//! C10 — Retry Classifier.
//!
//! Buckets errors into retryable/non-retryable categories with stable,
//! presentable user messages and raw technical detail for logs. Adapted from
//! the status-code-bucket + backoff-multiplier shape of
//! `api::gateway::{CircuitBreakerConfig, RetryConfig}`, narrowed to the fixed
//! taxonomy the specification defines.

use std::time::Duration;

/// Error category, per the specification's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// The provider rejected credentials.
    Authentication,
    /// Malformed input, unsupported parameters, or a malformed result.
    Validation,
    /// The provider is throttling; `retry_after` should be honored.
    RateLimit,
    /// A connection timeout, or poll-until-complete exhaustion.
    Timeout,
    /// Connection reset, host unreachable, or similar transport failure.
    Network,
    /// Default bucket for anything not otherwise classified.
    Unknown,
}

/// The result of classifying a raw error.
#[derive(Debug, Clone)]
pub struct Classification {
    /// The error's category.
    pub error_type: ErrorType,
    /// Whether a retry is worth attempting.
    pub retryable: bool,
    /// A stable, presentable message suitable for UI display.
    pub user_message: String,
    /// The raw provider/technical detail, for logs only.
    pub technical_details: String,
    /// Honor this delay before retrying, when the provider specified one.
    pub retry_after: Option<Duration>,
}

/// A raw error as seen by the classifier, ahead of classification.
#[derive(Debug, Clone)]
pub enum RawError {
    /// Provider rejected the request's credentials.
    AuthenticationRejected(String),
    /// Input failed validation (malformed input, parameter mismatch, bad
    /// frame decode).
    ValidationFailed(String),
    /// Provider responded with a rate-limit signal.
    RateLimited {
        /// Raw message from the provider.
        message: String,
        /// Provider-specified retry delay, when present.
        retry_after: Option<Duration>,
    },
    /// A request timed out.
    Timeout(String),
    /// Poll-until-complete exhausted its budget without reaching a terminal
    /// state. Classified as non-retryable (terminal) per the specification's
    /// resolved default.
    PollExhausted(String),
    /// Transport-level failure (connection reset, host unreachable, ...).
    Network(String),
    /// Anything else.
    Unknown(String),
}

const AUTH_MESSAGE: &str = "We couldn't authenticate with the generation service. Please contact support.";
const VALIDATION_MESSAGE: &str = "This request couldn't be processed. Please adjust your prompt and try again.";
const RATE_LIMIT_MESSAGE: &str = "The generation service is busy. We'll retry automatically.";
const TIMEOUT_MESSAGE: &str = "The generation service took too long to respond. Retrying.";
const POLL_EXHAUSTED_MESSAGE: &str = "Generation did not complete in time. Please try again.";
const NETWORK_MESSAGE: &str = "We couldn't reach the generation service. Retrying.";
const UNKNOWN_MESSAGE: &str = "Something went wrong while generating your sprite.";

/// Classify a raw error into its retry bucket.
pub fn classify(error: &RawError) -> Classification {
    match error {
        RawError::AuthenticationRejected(detail) => Classification {
            error_type: ErrorType::Authentication,
            retryable: false,
            user_message: AUTH_MESSAGE.to_string(),
            technical_details: detail.clone(),
            retry_after: None,
        },
        RawError::ValidationFailed(detail) => Classification {
            error_type: ErrorType::Validation,
            retryable: false,
            user_message: VALIDATION_MESSAGE.to_string(),
            technical_details: detail.clone(),
            retry_after: None,
        },
        RawError::RateLimited { message, retry_after } => Classification {
            error_type: ErrorType::RateLimit,
            retryable: true,
            user_message: RATE_LIMIT_MESSAGE.to_string(),
            technical_details: message.clone(),
            retry_after: *retry_after,
        },
        RawError::Timeout(detail) => Classification {
            error_type: ErrorType::Timeout,
            retryable: true,
            user_message: TIMEOUT_MESSAGE.to_string(),
            technical_details: detail.clone(),
            retry_after: None,
        },
        RawError::PollExhausted(detail) => Classification {
            error_type: ErrorType::Timeout,
            retryable: false,
            user_message: POLL_EXHAUSTED_MESSAGE.to_string(),
            technical_details: detail.clone(),
            retry_after: None,
        },
        RawError::Network(detail) => Classification {
            error_type: ErrorType::Network,
            retryable: true,
            user_message: NETWORK_MESSAGE.to_string(),
            technical_details: detail.clone(),
            retry_after: None,
        },
        RawError::Unknown(detail) => Classification {
            error_type: ErrorType::Unknown,
            retryable: false,
            user_message: UNKNOWN_MESSAGE.to_string(),
            technical_details: detail.clone(),
            retry_after: None,
        },
    }
}
