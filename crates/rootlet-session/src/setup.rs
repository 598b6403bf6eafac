//! Setup-script detection and interactive prompts.
//!
//! A marker script left inside the guest means provisioning has not
//! completed. An elevated-but-restricted permission mode on the script
//! (exactly `0o500`) signals "finished but not yet cleaned"; anything else
//! is still pending.

use std::io::{BufRead, IsTerminal, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use rootlet_common::constants::SETUP_SCRIPT;
use rootlet_common::error::{Result, RootletError};

/// State of the guest's setup marker script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupScriptStatus {
    /// Provisioning work remains; offer to run the script.
    Pending,
    /// The script completed but was not removed; offer to delete it.
    FinishedNotCleaned,
}

/// Mode signalling a finished-but-uncleaned setup script.
const FINISHED_MODE: u32 = 0o500;

/// Inspects the guest for a setup marker script.
#[must_use]
pub fn setup_script_status(root: &Path) -> Option<SetupScriptStatus> {
    let script = root.join(SETUP_SCRIPT);
    let meta = std::fs::metadata(&script).ok()?;
    if meta.permissions().mode() & 0o777 == FINISHED_MODE {
        Some(SetupScriptStatus::FinishedNotCleaned)
    } else {
        Some(SetupScriptStatus::Pending)
    }
}

/// Removes the setup marker script.
///
/// # Errors
///
/// Returns an error if the script cannot be removed.
pub fn delete_setup_script(root: &Path) -> Result<()> {
    let script = root.join(SETUP_SCRIPT);
    std::fs::remove_file(&script).map_err(|e| RootletError::Io {
        path: script,
        source: e,
    })
}

/// Asks a yes/no question on the error stream. One line is read only when
/// standard input is attached to a terminal; otherwise the answer defaults
/// to yes.
#[must_use]
pub fn prompt_yes_no(question: &str) -> bool {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return true;
    }

    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{question} [Y/n] ");
    let _ = stderr.flush();

    let mut answer = String::new();
    if stdin.lock().read_line(&mut answer).is_err() {
        return true;
    }
    !matches!(answer.trim(), "n" | "N" | "no" | "NO" | "No")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::fs::Permissions;

    use super::*;

    #[test]
    fn no_script_means_no_status() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(setup_script_status(dir.path()), None);
    }

    #[test]
    fn executable_script_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join(SETUP_SCRIPT);
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, Permissions::from_mode(0o755)).unwrap();
        assert_eq!(setup_script_status(dir.path()), Some(SetupScriptStatus::Pending));
    }

    #[test]
    fn restricted_mode_signals_finished_not_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join(SETUP_SCRIPT);
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, Permissions::from_mode(0o500)).unwrap();
        assert_eq!(
            setup_script_status(dir.path()),
            Some(SetupScriptStatus::FinishedNotCleaned)
        );
    }

    #[test]
    fn delete_removes_the_marker() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join(SETUP_SCRIPT);
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        delete_setup_script(dir.path()).unwrap();
        assert_eq!(setup_script_status(dir.path()), None);
    }
}
