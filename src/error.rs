//! Unified error handling for the trip-segments library.
//!
//! This module provides a consistent error type for all pipeline operations.
//! Skippable conditions (short trips, no confident matchings, "no match"
//! responses) never appear here — they are handled at the point of detection.
//! Everything in this enum aborts the batch run when it propagates to the top.

use std::fmt;

/// Unified error type for trip-segments operations.
#[derive(Debug, Clone)]
pub enum SegmentError {
    /// The map-matching service returned a non-ok response that is not a
    /// recognized "no match" code
    MatchServiceError {
        code: String,
        /// Unix timestamp of the first point in the rejected request
        first_timestamp: i64,
    },
    /// HTTP transport failure talking to the map-matching service
    HttpError {
        message: String,
        status_code: Option<u16>,
    },
    /// Persistence/storage error
    PersistenceError { message: String },
    /// Road-network or intersection-set resource could not be loaded
    ResourceError { message: String },
    /// Configuration error
    ConfigError { message: String },
    /// Generic internal error
    Internal { message: String },
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::MatchServiceError {
                code,
                first_timestamp,
            } => {
                write!(
                    f,
                    "Match service rejected request ({}) - at timestamp: {}",
                    code, first_timestamp
                )
            }
            SegmentError::HttpError {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "HTTP error ({}): {}", code, message)
                } else {
                    write!(f, "HTTP error: {}", message)
                }
            }
            SegmentError::PersistenceError { message } => {
                write!(f, "Persistence error: {}", message)
            }
            SegmentError::ResourceError { message } => {
                write!(f, "Resource error: {}", message)
            }
            SegmentError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            SegmentError::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for SegmentError {}

/// Result type alias for trip-segments operations.
pub type Result<T> = std::result::Result<T, SegmentError>;

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for SegmentError {
    fn from(err: rusqlite::Error) -> Self {
        SegmentError::PersistenceError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_service_error_display() {
        let err = SegmentError::MatchServiceError {
            code: "TooBig".to_string(),
            first_timestamp: 1570406400,
        };
        assert!(err.to_string().contains("TooBig"));
        assert!(err.to_string().contains("1570406400"));
    }

    #[test]
    fn test_http_error_display() {
        let err = SegmentError::HttpError {
            message: "bad gateway".to_string(),
            status_code: Some(502),
        };
        assert!(err.to_string().contains("502"));

        let err = SegmentError::HttpError {
            message: "timed out".to_string(),
            status_code: None,
        };
        assert!(!err.to_string().contains("("));
    }
}
