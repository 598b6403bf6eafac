//! Session configuration model.
//!
//! Everything that used to be an ambient toggle is an explicit field here,
//! passed into the session controller at construction.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, RootletError};
use crate::types::ExecutionMode;

/// Options for one session invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Guest name to enter. When absent, the chroots directory is scanned
    /// deterministically and the first usable entry wins.
    pub name: Option<String>,
    /// Directory holding guest roots.
    pub chroots_dir: PathBuf,
    /// Target guest user for login and user-command modes.
    pub user: Option<String>,
    /// Execution mode.
    pub mode: ExecutionMode,
    /// Detach into the background, transferring cleanup ownership.
    pub background: bool,
    /// Skip the automatic unmount on exit. Set by the recursive
    /// setup-script sub-invocation so the outer session keeps its mounts.
    pub keep_mounts: bool,
    /// Only select guests declaring this capability tag.
    pub require_capability: Option<String>,
    /// Export the weak-random override to setup and first-boot scripts,
    /// letting them elect the non-blocking entropy source.
    pub weak_random: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            name: None,
            chroots_dir: PathBuf::from(constants::DEFAULT_CHROOTS_DIR),
            user: None,
            mode: ExecutionMode::Login,
            background: false,
            keep_mounts: false,
            require_capability: None,
            weak_random: false,
        }
    }
}

impl SessionOptions {
    /// Rejects mutually exclusive combinations.
    ///
    /// # Errors
    ///
    /// Returns a usage error when background execution is combined with
    /// init attach, or a command is combined with init attach.
    pub fn validate(&self) -> Result<()> {
        if matches!(self.mode, ExecutionMode::InitAttach) && self.background {
            return Err(RootletError::Usage {
                message: "background execution conflicts with init attach".into(),
            });
        }
        if matches!(self.mode, ExecutionMode::InitAttach) && self.user.is_some() {
            return Err(RootletError::Usage {
                message: "a target user conflicts with init attach".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_validate() {
        assert!(SessionOptions::default().validate().is_ok());
    }

    #[test]
    fn background_init_attach_conflict() {
        let opts = SessionOptions {
            mode: ExecutionMode::InitAttach,
            background: true,
            ..SessionOptions::default()
        };
        let err = opts.validate().expect_err("should conflict");
        assert_eq!(err.exit_code(), crate::error::EXIT_USAGE);
    }

    #[test]
    fn user_init_attach_conflict() {
        let opts = SessionOptions {
            mode: ExecutionMode::InitAttach,
            user: Some("alice".into()),
            ..SessionOptions::default()
        };
        assert!(opts.validate().is_err());
    }
}
