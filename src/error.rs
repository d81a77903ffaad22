//! Unified error handling for the run-tracker library.
//!
//! Sensor anomalies (noise, jumps, null coordinates) are filtering decisions
//! and never surface here. Permission and service failures propagate once to
//! the caller of the command that hit them; storage failures are usually
//! caught and logged at the call site, degrading durability only.

use thiserror::Error;

use crate::TrackingPhase;

/// Unified error type for run-tracker operations.
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum TrackingError {
    /// Location permission not granted
    #[error("Location permission not granted")]
    PermissionDenied,
    /// Device location services are disabled
    #[error("Location services are disabled")]
    ServiceUnavailable,
    /// Command not valid in the current phase
    #[error("Cannot {action} while {phase:?}")]
    InvalidTransition {
        action: &'static str,
        phase: TrackingPhase,
    },
    /// Finish requested before any time elapsed
    #[error("No elapsed time to finish")]
    NothingToFinish,
    /// Durable store read/write failed
    #[error("Storage error: {message}")]
    Storage { message: String },
    /// Persisted value could not be encoded or decoded
    #[error("Serialization error: {message}")]
    Serialization { message: String },
    /// Platform cannot run the background task variant
    #[error("Background task unavailable: {message}")]
    BackgroundTaskUnavailable { message: String },
    /// Repeating task could not be scheduled
    #[error("Scheduler error: {message}")]
    Scheduler { message: String },
    /// FFI entry point called before `tracker_init`
    #[error("Tracker not initialized")]
    NotInitialized,
}

impl TrackingError {
    /// Build a storage error from anything displayable.
    pub fn storage(message: impl std::fmt::Display) -> Self {
        TrackingError::Storage {
            message: message.to_string(),
        }
    }

    /// Whether this failure should block a `start()` but not end the session.
    pub fn is_permission_related(&self) -> bool {
        matches!(
            self,
            TrackingError::PermissionDenied | TrackingError::ServiceUnavailable
        )
    }
}

impl From<serde_json::Error> for TrackingError {
    fn from(err: serde_json::Error) -> Self {
        TrackingError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for TrackingError {
    fn from(err: rusqlite::Error) -> Self {
        TrackingError::storage(err)
    }
}

/// Result type alias for run-tracker operations.
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Extension trait for converting Option to TrackingError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a storage error naming the missing key.
    fn ok_or_missing_key(self, key: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_missing_key(self, key: &str) -> Result<T> {
        self.ok_or_else(|| TrackingError::Storage {
            message: format!("missing value for key '{}'", key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackingError::InvalidTransition {
            action: "pause",
            phase: TrackingPhase::Idle,
        };
        assert_eq!(err.to_string(), "Cannot pause while Idle");
        assert!(TrackingError::PermissionDenied.is_permission_related());
        assert!(!TrackingError::NothingToFinish.is_permission_related());
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_missing_key("run_tracker:active_run");
        assert!(matches!(result, Err(TrackingError::Storage { .. })));
        assert!(result.unwrap_err().to_string().contains("active_run"));
    }

    #[test]
    fn test_from_serde_error() {
        let err: TrackingError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, TrackingError::Serialization { .. }));
    }
}
