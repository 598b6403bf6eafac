//! Unified error types for the Rootlet workspace.
//!
//! Two classes run through the session: fatal errors abort with a distinct
//! exit code, recoverable ones are logged at the call site and the session
//! continues. Only fatal conditions become a [`RootletError`]; recoverable
//! conditions never leave the function that observed them.

use std::path::PathBuf;

use thiserror::Error;

/// Exit code for resolvable precondition failures (no chroot found,
/// invalid mount state, setup failed, insufficient privilege).
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for usage and argument errors.
pub const EXIT_USAGE: i32 = 2;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum RootletError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A mount-table operation failed.
    #[error("mount failure ({op}) at {path}: {source}")]
    Mount {
        /// Mount operation that failed (`bind`, `tmpfs`, `remount`, ...).
        op: &'static str,
        /// Mount point the operation targeted.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The selected guest exists but is not usable.
    #[error("invalid chroot {name}: {message}")]
    InvalidChroot {
        /// Name of the rejected guest.
        name: String,
        /// Reason the guest was rejected.
        message: String,
    },

    /// A permission or capability error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// A command could not be launched.
    #[error("failed to execute {program}: {source}")]
    Exec {
        /// Program that failed to launch.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Installing the session interruption handler failed.
    #[error("signal handling unavailable: {message}")]
    Signal {
        /// Description of the failure.
        message: String,
    },

    /// Invalid or conflicting arguments.
    #[error("usage error: {message}")]
    Usage {
        /// Description of the invalid invocation.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl RootletError {
    /// Maps the error to its process exit code.
    ///
    /// Usage errors exit with [`EXIT_USAGE`]; every other fatal condition
    /// exits with [`EXIT_FAILURE`].
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Usage { .. } => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RootletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_exit_with_two() {
        let err = RootletError::Usage {
            message: "-b conflicts with --init".into(),
        };
        assert_eq!(err.exit_code(), EXIT_USAGE);
    }

    #[test]
    fn structural_errors_exit_with_one() {
        let err = RootletError::NotFound {
            kind: "chroot",
            id: "trusty".into(),
        };
        assert_eq!(err.exit_code(), EXIT_FAILURE);
    }
}
