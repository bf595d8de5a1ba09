//! Unified error handling for the trail-matcher library.
//!
//! Only `NotFound` and `Persistence` ever reach callers of the match
//! operation. Decode, reference-load and HTTP failures are absorbed where they
//! happen and degrade to an empty path or a partial trail reference.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ActivityId;

/// Unified error type for trail-matcher operations.
#[derive(Debug, Clone, Error)]
pub enum TrailMatchError {
    /// Activity id absent from storage
    #[error("Activity {activity_id} not found")]
    NotFound { activity_id: ActivityId },

    /// Encoded path could not be decoded
    #[error("Path decode error: {message}")]
    Decode { message: String },

    /// A trail dataset failed to fetch or parse
    #[error("Trail dataset '{dataset}' failed to load: {message}")]
    ReferenceLoad { dataset: String, message: String },

    /// Reading or writing activity records failed
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// HTTP transport or status error
    #[error("HTTP error{}: {message}", status_suffix(.status_code))]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code
        .map(|code| format!(" ({})", code))
        .unwrap_or_default()
}

/// Error kind, as reported to invoking collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Decode,
    ReferenceLoad,
    Persistence,
    Http,
    Config,
}

impl TrailMatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrailMatchError::NotFound { .. } => ErrorKind::NotFound,
            TrailMatchError::Decode { .. } => ErrorKind::Decode,
            TrailMatchError::ReferenceLoad { .. } => ErrorKind::ReferenceLoad,
            TrailMatchError::Persistence { .. } => ErrorKind::Persistence,
            TrailMatchError::Http { .. } => ErrorKind::Http,
            TrailMatchError::Config { .. } => ErrorKind::Config,
        }
    }

    /// Whether the caller may retry the same operation.
    ///
    /// A failed persistence write leaves `matched_at` null, so the activity
    /// stays in the backlog either way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrailMatchError::Persistence { .. })
    }

    pub(crate) fn persistence(message: impl Into<String>) -> Self {
        TrailMatchError::Persistence {
            message: message.into(),
        }
    }

    pub(crate) fn reference_load(dataset: &str, message: impl Into<String>) -> Self {
        TrailMatchError::ReferenceLoad {
            dataset: dataset.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for trail-matcher operations.
pub type Result<T> = std::result::Result<T, TrailMatchError>;

/// Serializable `{kind, message}` error output of the match operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&TrailMatchError> for ErrorReport {
    fn from(err: &TrailMatchError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for TrailMatchError {
    fn from(err: std::io::Error) -> Self {
        TrailMatchError::persistence(err.to_string())
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for TrailMatchError {
    fn from(err: rusqlite::Error) -> Self {
        TrailMatchError::persistence(err.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TrailMatchError {
    fn from(err: reqwest::Error) -> Self {
        TrailMatchError::Http {
            status_code: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Extension trait for converting Option to TrailMatchError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a not-found error for the activity.
    fn ok_or_not_found(self, activity_id: ActivityId) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, activity_id: ActivityId) -> Result<T> {
        self.ok_or(TrailMatchError::NotFound { activity_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrailMatchError::NotFound { activity_id: 42 };
        assert_eq!(err.to_string(), "Activity 42 not found");

        let err = TrailMatchError::Http {
            message: "timeout".to_string(),
            status_code: Some(503),
        };
        assert_eq!(err.to_string(), "HTTP error (503): timeout");

        let err = TrailMatchError::Http {
            message: "dns".to_string(),
            status_code: None,
        };
        assert_eq!(err.to_string(), "HTTP error: dns");
    }

    #[test]
    fn test_only_persistence_is_retryable() {
        assert!(TrailMatchError::persistence("disk full").is_retryable());
        assert!(!TrailMatchError::NotFound { activity_id: 1 }.is_retryable());
        assert!(!TrailMatchError::reference_load("main", "bad json").is_retryable());
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_not_found(7);
        assert!(matches!(
            result,
            Err(TrailMatchError::NotFound { activity_id: 7 })
        ));
    }

    #[test]
    fn test_error_report_serializes_kind() {
        let report = ErrorReport::from(&TrailMatchError::NotFound { activity_id: 3 });
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"kind\":\"not_found\""));
        assert!(json.contains("Activity 3 not found"));
    }
}
