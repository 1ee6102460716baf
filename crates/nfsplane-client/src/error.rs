//! Error types for mount sessions

use nfsplane_core::status::nfserr_name;
use nfsplane_core::{HandleError, NfsOp, WireError};
use thiserror::Error;

/// Failures surfaced to callers of a mount.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Soft mount gave up after exhausting its retransmissions
    #[error("{op} timed out after {attempts} attempts")]
    Timeout {
        /// Operation that timed out
        op: NfsOp,
        /// Attempts made, including the first
        attempts: u32,
    },
    /// No lock answer arrived in time; the registration was removed
    #[error("lock transaction {0} timed out")]
    LockTimeout(u64),
    /// Mount was declared dead
    #[error("mount is dead")]
    MountDead,
    /// Interruptible hard mount received a cancellation signal
    #[error("operation interrupted")]
    Interrupted,
    /// Mount is being unmounted
    #[error("operation cancelled")]
    Cancelled,
    /// Server returned an error status
    #[error("server returned {}", nfs_status_name(.status))]
    Nfs {
        /// NFS status code
        status: u32,
    },
    /// Version or handle format mismatch
    #[error("negotiation failed: {reason}")]
    Negotiation {
        /// What did not match
        reason: String,
    },
    /// A lock transaction id was registered twice
    #[error("duplicate lock transaction {0}")]
    DuplicateTransaction(u64),
    /// Lock request conflicts with a lock held by another owner
    #[error("lock denied")]
    LockDenied,
    /// Advisory locking is disabled on this mount
    #[error("locking disabled on this mount")]
    LockingDisabled,
    /// Identity lookup found nothing
    #[error("not found: {0}")]
    NotFound(String),
    /// Mount configuration rejected
    #[error("invalid mount configuration: {reason}")]
    Config {
        /// What was wrong
        reason: String,
    },
    /// File handle problem
    #[error("file handle error: {0}")]
    Handle(#[from] HandleError),
    /// Malformed wire record
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

fn nfs_status_name(status: &u32) -> String {
    match nfserr_name(*status) {
        Some(name) => format!("{} ({})", name, status),
        None => format!("status {}", status),
    }
}

impl ClientError {
    /// Shorthand for [`ClientError::Config`].
    pub fn config(reason: impl Into<String>) -> Self {
        ClientError::Config {
            reason: reason.into(),
        }
    }

    /// True if the failure is a timeout the caller may retry later.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. } | ClientError::LockTimeout(_)
        )
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use nfsplane_core::status::NFSERR_STALE;

    #[test]
    fn test_display() {
        let err = ClientError::Timeout {
            op: NfsOp::Read,
            attempts: 4,
        };
        assert_eq!(err.to_string(), "read timed out after 4 attempts");
        assert!(err.is_timeout());

        let err = ClientError::Nfs {
            status: NFSERR_STALE,
        };
        assert_eq!(err.to_string(), "server returned NFSERR_STALE (70)");

        assert!(ClientError::LockTimeout(7).is_timeout());
        assert!(!ClientError::MountDead.is_timeout());

        let err = ClientError::Nfs { status: 4242 };
        assert_eq!(err.to_string(), "server returned status 4242");
    }
}
