//! Unified error handling for the route-atlas library.
//!
//! Threshold rejections (two routes that simply don't match, a cell that isn't
//! frequent) are normal results and are reported as `None` or omissions.
//! Only invalid input that prevents any computation, and cooperative
//! cancellation, are errors.

use thiserror::Error;

/// Unified error type for route-atlas operations.
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error), uniffi(flat_error))]
pub enum RouteAtlasError {
    /// A configuration value is out of range or thresholds are mis-ordered
    #[error("Configuration error: {message}")]
    InvalidConfig { message: String },

    /// Route has insufficient valid points for processing
    #[error("Route '{activity_id}' has {point_count} valid points, minimum {minimum_required} required")]
    InsufficientPoints {
        activity_id: String,
        point_count: usize,
        minimum_required: usize,
    },

    /// Flat coordinate buffer and its offsets/ids disagree
    #[error("Malformed flat buffer: {message}")]
    MalformedBuffer { message: String },

    /// The caller requested a stop through a cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

impl RouteAtlasError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        RouteAtlasError::InvalidConfig {
            message: message.into(),
        }
    }

    /// True if this error is a user-initiated abort rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RouteAtlasError::Cancelled)
    }
}

/// Result type alias for route-atlas operations.
pub type Result<T> = std::result::Result<T, RouteAtlasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RouteAtlasError::InsufficientPoints {
            activity_id: "test-1".to_string(),
            point_count: 1,
            minimum_required: 2,
        };
        assert!(err.to_string().contains("test-1"));
        assert!(err.to_string().contains("1 valid points"));
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(RouteAtlasError::Cancelled.is_cancelled());
        assert!(!RouteAtlasError::config("bad").is_cancelled());
        assert_eq!(
            RouteAtlasError::config("bad").to_string(),
            "Configuration error: bad"
        );
    }
}
