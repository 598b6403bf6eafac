//! CLI command definitions and dispatch.

pub mod enter;
pub mod list;

use clap::{Parser, Subcommand};

/// Rootlet — enter guest chroots sharing the host kernel and devices.
#[derive(Parser, Debug)]
#[command(name = "rootlet", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount and enter a guest chroot.
    Enter(enter::EnterArgs),
    /// List the guests in the chroots directory.
    List(list::ListArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Enter(args) => enter::execute(args),
        Command::List(args) => list::execute(args),
    }
}
