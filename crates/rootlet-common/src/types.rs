//! Domain primitive types used across the Rootlet workspace.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Immutable description of the guest a session runs against.
///
/// Built once during chroot resolution and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChrootDescriptor {
    /// Guest name (chroots-directory entry name).
    pub name: String,
    /// Absolute host path of the guest root.
    pub root: PathBuf,
    /// Release tag the guest was provisioned from.
    pub release: String,
    /// Whether an external init system manages `/tmp` and `/proc`
    /// inside the guest.
    pub external_init: bool,
    /// Capability tags declared in the guest metadata.
    pub capabilities: BTreeSet<String>,
}

/// Session lifecycle states, forward-only except a controlled loop-back
/// in `RunningSetup` while a setup script reports unfinished work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SessionState {
    /// Validating the argument combination.
    ParsingArgs,
    /// Selecting and validating the guest.
    ResolvingChroot,
    /// Performing the fixed base mount sequence.
    MountingBase,
    /// Running setup / first-boot scripts.
    RunningSetup,
    /// Expanding the share configuration into mounts.
    MountingShares,
    /// Synchronizing host and guest group IDs.
    ReconcilingGroups,
    /// Starting guest-side daemons.
    LaunchingServices,
    /// Running the requested command or shell.
    Executing,
    /// Unwinding the cleanup registry.
    TearingDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ParsingArgs => "parsing-args",
            Self::ResolvingChroot => "resolving-chroot",
            Self::MountingBase => "mounting-base",
            Self::RunningSetup => "running-setup",
            Self::MountingShares => "mounting-shares",
            Self::ReconcilingGroups => "reconciling-groups",
            Self::LaunchingServices => "launching-services",
            Self::Executing => "executing",
            Self::TearingDown => "tearing-down",
        };
        write!(f, "{name}")
    }
}

/// How the session executes inside the guest. Modes are mutually
/// exclusive; conflicts are rejected while parsing arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Direct execution without a login shell; the environment is cleared
    /// except for the terminal type.
    Direct {
        /// Program and arguments, guest-relative.
        command: Vec<String>,
    },
    /// Login-shell substitution using the guest user's configured
    /// shell and home.
    Login,
    /// Explicit command run through the target guest user's shell,
    /// re-quoted for the guest interpreter.
    UserCommand {
        /// Command words as given on the host command line.
        command: Vec<String>,
    },
    /// Start or locate an init process inside the guest's namespaces and
    /// attach via namespace entry rather than chroot.
    InitAttach,
}

impl ExecutionMode {
    /// Whether this mode counts as a login-style entry (shares are
    /// mounted and the share config template is materialized).
    #[must_use]
    pub const fn is_login(&self) -> bool {
        matches!(self, Self::Login | Self::UserCommand { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_states_order_forward() {
        assert!(SessionState::ParsingArgs < SessionState::ResolvingChroot);
        assert!(SessionState::MountingBase < SessionState::RunningSetup);
        assert!(SessionState::Executing < SessionState::TearingDown);
    }

    #[test]
    fn login_modes() {
        assert!(ExecutionMode::Login.is_login());
        assert!(ExecutionMode::UserCommand { command: vec![] }.is_login());
        assert!(!ExecutionMode::InitAttach.is_login());
        assert!(!ExecutionMode::Direct { command: vec![] }.is_login());
    }
}
