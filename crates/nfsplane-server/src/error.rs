//! Error types for export administration

use nfsplane_core::HandleError;
use thiserror::Error;

/// Export administration and validation failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExportError {
    /// No export with this key
    #[error("export {fs_id}:{export_id} not found")]
    NotFound {
        /// Filesystem id
        fs_id: u32,
        /// Export id
        export_id: u32,
    },
    /// Add of an export that is already published
    #[error("export {fs_id}:{export_id} already exists")]
    AlreadyExists {
        /// Filesystem id
        fs_id: u32,
        /// Export id
        export_id: u32,
    },
    /// Rule or entry failed validation
    #[error("invalid export rule: {reason}")]
    InvalidRule {
        /// What was wrong
        reason: String,
    },
    /// Two rules cover overlapping addresses with different options
    #[error("net rules {first} and {second} overlap with contradictory options")]
    ConflictingRules {
        /// Index of the earlier rule
        first: usize,
        /// Index of the later rule
        second: usize,
    },
    /// Handle could not be issued or parsed
    #[error("file handle error: {0}")]
    Handle(#[from] HandleError),
}

impl ExportError {
    /// Shorthand for [`ExportError::InvalidRule`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        ExportError::InvalidRule {
            reason: reason.into(),
        }
    }
}

/// Result type for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = ExportError::NotFound {
            fs_id: 3,
            export_id: 9,
        };
        assert_eq!(err.to_string(), "export 3:9 not found");
    }

    #[test]
    fn test_from_handle_error() {
        let err: ExportError = HandleError::OversizeFid { len: 50, max: 44 }.into();
        assert!(matches!(err, ExportError::Handle(_)));
        assert!(err.to_string().contains("50"));
    }
}
