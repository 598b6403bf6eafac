//! Guest-side daemon launch.
//!
//! Startup is fire-and-forget: a daemon that fails to launch is a warning
//! and the session continues without it.

use std::process::Stdio;

use crate::guest::GuestContext;

/// Daemons started on entry, as (label, guest-relative init script).
/// Scripts the guest does not ship are skipped silently.
const SERVICES: &[(&str, &str)] = &[
    ("dbus", "/etc/init.d/dbus"),
    ("audio-proxy", "/etc/init.d/audio-proxy"),
];

/// Launches every applicable guest daemon. Returns how many were started.
pub fn launch_all(ctx: &GuestContext) -> usize {
    let mut started = 0;
    for (label, script) in SERVICES {
        let in_guest = ctx.root().join(script.trim_start_matches('/'));
        if !in_guest.exists() {
            tracing::debug!(service = label, "guest does not ship this service");
            continue;
        }

        let spawned = ctx
            .command(script)
            .arg("start")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(_) => {
                tracing::info!(service = label, "guest daemon launched");
                started += 1;
            }
            Err(e) => {
                tracing::warn!(service = label, error = %e, "guest daemon failed to launch");
            }
        }
    }
    started
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn missing_service_scripts_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = GuestContext::new(dir.path());
        assert_eq!(launch_all(&ctx), 0);
    }
}
