//! Background execution with cleanup ownership transfer.
//!
//! The session detaches into a child that outlives the caller: standard
//! input is duplicated before any redirection, standard output/error are
//! pointed away from a controlling terminal, and the cleanup registry's
//! final run happens inside the detached process once the wrapped command
//! completes. The foreground caller disarms its registry copy and returns
//! immediately.

use std::io::IsTerminal;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::process::{Command, Stdio};
use std::sync::PoisonError;

use nix::unistd::ForkResult;
use rootlet_common::error::{Result, RootletError, EXIT_FAILURE};
use rootlet_core::cleanup::{self, SharedRegistry};

/// Detaches `command` into the background.
///
/// On return in the caller, teardown responsibility has moved to the
/// detached process; the caller's registry is disarmed.
///
/// # Errors
///
/// Returns an error if the process cannot fork.
#[allow(unsafe_code)]
pub fn run_detached(command: Command, registry: &SharedRegistry) -> Result<()> {
    // SAFETY: the child only execs the prepared command after re-wiring
    // its descriptors; no locks are held across the fork.
    match unsafe { nix::unistd::fork() } {
        Ok(ForkResult::Parent { child }) => {
            tracing::info!(pid = child.as_raw(), "session detached to background");
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .disarm();
            Ok(())
        }
        Ok(ForkResult::Child) => {
            let code = detached_child(command, registry);
            std::process::exit(code);
        }
        Err(e) => Err(RootletError::Exec {
            program: "fork".into(),
            source: std::io::Error::from_raw_os_error(e as i32),
        }),
    }
}

#[allow(unsafe_code)]
fn detached_child(mut command: Command, registry: &SharedRegistry) -> i32 {
    let _ = nix::unistd::setsid();

    // Duplicate stdin before anything is redirected so the wrapped command
    // still reads the caller's input.
    // SAFETY: fd 0 is valid; the duplicate is owned below.
    let saved_stdin = unsafe { libc::dup(0) };
    if saved_stdin >= 0 {
        // SAFETY: saved_stdin is a fresh descriptor we own.
        let stdin = unsafe { OwnedFd::from_raw_fd(saved_stdin) };
        let _ = command.stdin(Stdio::from(stdin));
    }

    if std::io::stdout().is_terminal() || std::io::stderr().is_terminal() {
        if let Ok(null) = std::fs::OpenOptions::new().write(true).open("/dev/null") {
            // SAFETY: both descriptors are valid for the duration of dup2.
            unsafe {
                let _ = libc::dup2(null.as_raw_fd(), 1);
                let _ = libc::dup2(null.as_raw_fd(), 2);
            }
        }
    }

    let code = match command.status() {
        Ok(status) => status.code().unwrap_or(EXIT_FAILURE),
        Err(e) => {
            tracing::warn!(error = %e, "background command failed to start");
            EXIT_FAILURE
        }
    };

    cleanup::run_shared(registry);
    code
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn parent_registry_is_disarmed_after_detach() {
        let registry = cleanup::shared();
        let fired = std::sync::Arc::new(std::sync::Mutex::new(false));
        {
            let fired = std::sync::Arc::clone(&fired);
            registry
                .lock()
                .unwrap()
                .register("probe", move || *fired.lock().unwrap() = true);
        }

        let mut command = Command::new("true");
        let _ = command.stdout(Stdio::null()).stderr(Stdio::null());
        run_detached(command, &registry).unwrap();

        // The foreground copy must not run its actions.
        cleanup::run_shared(&registry);
        assert!(!*fired.lock().unwrap());
    }
}
