//! # rootlet-session
//!
//! The session lifecycle engine: resolves which guest to enter, drives the
//! fixed base mount sequence, runs the setup-script workflow, mounts shares,
//! reconciles group identities, launches guest daemons, executes the
//! requested mode, and guarantees teardown on every exit path.

pub mod background;
pub mod groups;
pub mod guest;
pub mod metadata;
pub mod select;
pub mod services;
pub mod session;
pub mod setup;

pub use session::SessionController;

use rootlet_common::error::{Result, RootletError};

/// Verifies the invoking process holds root privilege.
///
/// # Errors
///
/// Returns a permission error when the effective UID is not root.
pub fn ensure_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(RootletError::PermissionDenied {
            message: "entering a chroot requires root privilege".into(),
        })
    }
}
