//! `rootlet list` — List the guests in the chroots directory.

use std::path::PathBuf;

use clap::Args;
use rootlet_common::constants::DEFAULT_CHROOTS_DIR;
use rootlet_session::select;

/// Arguments for the `list` command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Directory holding guest root filesystems.
    #[arg(short = 'c', long, default_value = DEFAULT_CHROOTS_DIR)]
    pub chroots_dir: PathBuf,

    /// Emit machine-readable JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `list` command.
///
/// # Errors
///
/// Returns an error if the chroots directory cannot be read or the JSON
/// serialization fails.
pub fn execute(args: ListArgs) -> anyhow::Result<()> {
    let chroots = select::list_chroots(&args.chroots_dir)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&chroots)?);
        return Ok(());
    }

    if chroots.is_empty() {
        println!("No chroots found in {}.", args.chroots_dir.display());
        return Ok(());
    }

    println!("{:<20} {:<12} {:<8} CAPABILITIES", "NAME", "RELEASE", "INIT");
    for c in &chroots {
        let caps = c
            .capabilities
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<20} {:<12} {:<8} {}",
            c.name,
            c.release,
            if c.external_init { "extern" } else { "-" },
            if caps.is_empty() { "-".to_owned() } else { caps },
        );
    }

    Ok(())
}
