//! Sideload error types.

use thiserror::Error;

/// Errors raised while parsing, scoping, or resolving a request.
#[derive(Debug, Error)]
pub enum SideloadError {
    /// Unknown filter name/alias, guard rejection, or an unparseable value.
    #[error("bad filter '{name}': {reason}")]
    BadFilter { name: String, reason: String },

    /// One or more filters marked required were absent from the request.
    #[error("required filters missing: {}", .names.join(", "))]
    RequiredFilter { names: Vec<String> },

    #[error("Requested page size {size} is greater than max supported size {max}")]
    UnsupportedPageSize { size: u64, max: u64 },

    #[error("No stat configured for calculation '{calculation}' on attribute '{attribute}'")]
    StatNotFound {
        attribute: String,
        calculation: String,
    },

    /// Configuration-time validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no serializer registered for resource type '{resource_type}'")]
    MissingSerializer { resource_type: String },

    /// Failure inside the backing-store collaborator.
    #[error("backing store error")]
    Store(#[from] anyhow::Error),
}

impl SideloadError {
    pub(crate) fn bad_filter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadFilter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SideloadError::BadFilter { .. }
                | SideloadError::RequiredFilter { .. }
                | SideloadError::UnsupportedPageSize { .. }
                | SideloadError::StatNotFound { .. }
        )
    }
}

/// Result type alias using SideloadError.
pub type Result<T> = std::result::Result<T, SideloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_message_names_both_sizes() {
        let err = SideloadError::UnsupportedPageSize {
            size: 5000,
            max: 1000,
        };
        assert_eq!(
            err.to_string(),
            "Requested page size 5000 is greater than max supported size 1000"
        );
        assert!(err.is_client_error());
    }

    #[test]
    fn store_errors_are_server_errors() {
        let err = SideloadError::from(anyhow::anyhow!("connection reset"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn required_filter_lists_names() {
        let err = SideloadError::RequiredFilter {
            names: vec!["tenant".to_string(), "region".to_string()],
        };
        assert_eq!(err.to_string(), "required filters missing: tenant, region");
    }
}
