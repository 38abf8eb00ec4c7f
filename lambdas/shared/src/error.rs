//! Error types for the course recommender Lambda functions.

use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata};
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Service error codes that mean "slow down and try again".
const THROTTLING_CODES: &[&str] = &[
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

/// Message fragments that indicate throttling when no error code is available.
const THROTTLING_MESSAGES: &[&str] = &["request rate is too high", "throttling", "too many requests"];

/// Errors that can occur in the course recommender Lambda functions.
#[derive(Error, Debug)]
pub enum Error {
    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// The service asked us to back off
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Search collection error
    #[error("Search error: {0}")]
    Search(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Inbound event could not be understood
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an AWS SDK error, classifying throttling by its error code.
    pub fn from_sdk<E>(context: &str, err: E) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error,
    {
        let throttled = err
            .code()
            .is_some_and(|code| THROTTLING_CODES.contains(&code));
        let message = format!("{}: {}", context, DisplayErrorContext(&err));

        if throttled || looks_throttled(&message) {
            Error::Throttled(message)
        } else {
            Error::Aws(message)
        }
    }

    /// Whether retrying after a pause may succeed.
    pub fn is_throttling(&self) -> bool {
        match self {
            Error::Throttled(_) => true,
            Error::Aws(message) | Error::Search(message) => looks_throttled(message),
            _ => false,
        }
    }
}

fn looks_throttled(message: &str) -> bool {
    let message = message.to_lowercase();
    THROTTLING_MESSAGES
        .iter()
        .any(|fragment| message.contains(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_detected_from_message() {
        assert!(Error::Aws("Request rate is too high for model".to_string()).is_throttling());
        assert!(Error::Search("429 Too Many Requests".to_string()).is_throttling());
        assert!(Error::Throttled("slow down".to_string()).is_throttling());
    }

    #[test]
    fn test_other_errors_are_not_throttling() {
        assert!(!Error::Aws("AccessDeniedException".to_string()).is_throttling());
        assert!(!Error::Validation("throttling".to_string()).is_throttling());
    }
}
