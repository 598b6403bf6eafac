//! `rootlet enter` — Mount and enter a guest chroot.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use rootlet_common::config::SessionOptions;
use rootlet_common::constants::DEFAULT_CHROOTS_DIR;
use rootlet_common::types::ExecutionMode;
use rootlet_core::SysMounter;
use rootlet_session::SessionController;

/// Arguments for the `enter` command.
#[derive(Args, Debug)]
pub struct EnterArgs {
    /// Guest name. The chroots directory is scanned when omitted.
    #[arg(short, long)]
    pub name: Option<String>,

    /// Directory holding guest root filesystems.
    #[arg(short = 'c', long, default_value = DEFAULT_CHROOTS_DIR)]
    pub chroots_dir: PathBuf,

    /// Guest user to run as. Defaults to the first regular account.
    #[arg(short, long)]
    pub user: Option<String>,

    /// Detach the command into the background, leaving mounts to it.
    #[arg(short, long)]
    pub background: bool,

    /// Run COMMAND directly, without a login shell or shares.
    #[arg(short = 'x', long = "no-login", requires = "command")]
    pub no_login: bool,

    /// Start or attach to the guest's own init instead of a shell.
    #[arg(long, conflicts_with_all = ["command", "user", "background"])]
    pub init: bool,

    /// Leave the guest mounted on exit.
    #[arg(short = 'k', long)]
    pub keep: bool,

    /// Only select guests declaring this capability tag.
    #[arg(long = "cap", value_name = "TAG")]
    pub require_capability: Option<String>,

    /// Point setup and first-boot scripts at the non-blocking entropy
    /// source.
    #[arg(long)]
    pub weak_random: bool,

    /// Command to run inside the guest. Opens a login shell when omitted.
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl EnterArgs {
    fn mode(&self) -> ExecutionMode {
        if self.init {
            ExecutionMode::InitAttach
        } else if self.command.is_empty() {
            ExecutionMode::Login
        } else if self.no_login {
            ExecutionMode::Direct {
                command: self.command.clone(),
            }
        } else {
            ExecutionMode::UserCommand {
                command: self.command.clone(),
            }
        }
    }
}

/// Executes the `enter` command.
///
/// Runs a full session against the selected guest and exits with the guest
/// command's exit code.
///
/// # Errors
///
/// Returns an error when the caller is not root, the guest cannot be
/// resolved, or a fatal session step fails.
pub fn execute(args: EnterArgs) -> anyhow::Result<()> {
    rootlet_session::ensure_root()?;

    let opts = SessionOptions {
        mode: args.mode(),
        name: args.name,
        chroots_dir: args.chroots_dir,
        user: args.user,
        background: args.background,
        keep_mounts: args.keep,
        require_capability: args.require_capability,
        weak_random: args.weak_random,
    };

    let mut controller = SessionController::new(opts, Arc::new(SysMounter));
    let code = controller.run()?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> EnterArgs {
        use clap::Parser;

        #[derive(Parser)]
        struct Harness {
            #[command(flatten)]
            inner: EnterArgs,
        }
        Harness::parse_from(std::iter::once("rootlet").chain(argv.iter().copied())).inner
    }

    #[test]
    fn bare_invocation_is_a_login() {
        assert_eq!(args(&[]).mode(), ExecutionMode::Login);
    }

    #[test]
    fn command_runs_through_the_user_shell() {
        let mode = args(&["--", "ls", "-l"]).mode();
        assert_eq!(
            mode,
            ExecutionMode::UserCommand {
                command: vec!["ls".into(), "-l".into()]
            }
        );
    }

    #[test]
    fn no_login_makes_the_command_direct() {
        let mode = args(&["-x", "--", "/bin/sh"]).mode();
        assert_eq!(
            mode,
            ExecutionMode::Direct {
                command: vec!["/bin/sh".into()]
            }
        );
    }

    #[test]
    fn init_flag_selects_init_attach() {
        assert_eq!(args(&["--init"]).mode(), ExecutionMode::InitAttach);
    }
}
