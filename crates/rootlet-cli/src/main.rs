//! # rootlet — chroot session CLI
//!
//! Enters isolated guest root filesystems that share the host's kernel,
//! devices, and display. Single binary for entering and listing guests.

mod commands;

use clap::Parser;
use rootlet_common::error::{RootletError, EXIT_FAILURE};

use crate::commands::Cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = commands::execute(cli) {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("rootlet: {err:#}");
        }
        let code = err
            .downcast_ref::<RootletError>()
            .map_or(EXIT_FAILURE, RootletError::exit_code);
        std::process::exit(code);
    }
}
