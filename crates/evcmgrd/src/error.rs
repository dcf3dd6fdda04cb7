//! Error types for EVC operations.
//!
//! All errors implement `std::error::Error` via `thiserror`.

use thiserror::Error;

/// Result type alias for EVC operations.
pub type EvcResult<T> = Result<T, EvcError>;

/// Errors that can occur while provisioning and maintaining circuits.
#[derive(Debug, Error)]
pub enum EvcError {
    /// A circuit request failed validation.
    #[error("Validation failed for {field}: {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// The path-computation service returned no usable path.
    #[error("No path available between {path_source} and {destination}")]
    PathNotFound {
        /// Source interface id.
        path_source: String,
        /// Destination interface id.
        destination: String,
    },

    /// An interface id did not resolve in the topology.
    #[error("Interface '{id}' not found in topology")]
    InterfaceNotFound {
        /// The interface id.
        id: String,
    },

    /// A link's service-tag pool has no values left.
    #[error("Tag pool exhausted on link {link}")]
    TagExhausted {
        /// The link identity.
        link: String,
    },

    /// Pushing rules to a switch failed.
    #[error("Flow push to switch {switch} failed: {message}")]
    FlowPush {
        /// The target switch dpid.
        switch: String,
        /// Error message.
        message: String,
    },

    /// Circuit storage operation failed.
    #[error("Storage operation failed: {operation}: {message}")]
    Storage {
        /// The operation that failed (e.g., "save", "load").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl EvcError {
    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a path-not-found error.
    pub fn path_not_found(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::PathNotFound {
            path_source: source.into(),
            destination: destination.into(),
        }
    }

    /// Creates an interface-not-found error.
    pub fn interface_not_found(id: impl Into<String>) -> Self {
        Self::InterfaceNotFound { id: id.into() }
    }

    /// Creates a tag-exhausted error.
    pub fn tag_exhausted(link: impl Into<String>) -> Self {
        Self::TagExhausted { link: link.into() }
    }

    /// Creates a flow-push error.
    pub fn flow_push(switch: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FlowPush {
            switch: switch.into(),
            message: message.into(),
        }
    }

    /// Creates a storage error.
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EvcError::validation("uni_a", "tag 100 is not available");
        assert_eq!(
            err.to_string(),
            "Validation failed for uni_a: tag 100 is not available"
        );
    }

    #[test]
    fn test_flow_push_error() {
        let err = EvcError::flow_push("00:00:00:00:00:00:00:01", "connection refused");
        assert!(err.to_string().contains("00:00:00:00:00:00:00:01"));
        assert!(err.to_string().contains("connection refused"));
    }
}
