//! Expansion of parsed share rules into orchestrated guest mounts.
//!
//! Any single share's failure is reported and skipped; it never aborts the
//! remaining shares.

use std::path::{Path, PathBuf};

use rootlet_common::constants;
use rootlet_common::error::Result;
use rootlet_core::mount::{MountOpts, MountOrchestrator};

use crate::parser::{ShareCategory, ShareRule};

/// Host base directories backing each share category.
///
/// A base may be unavailable this session (no interactive host user);
/// rules against it are skipped with a warning.
#[derive(Debug, Clone)]
pub struct ShareBases {
    /// Base for [`ShareCategory::MyFiles`].
    pub myfiles: PathBuf,
    /// Base for [`ShareCategory::Downloads`].
    pub downloads: PathBuf,
    /// Base for [`ShareCategory::Encrypted`].
    pub encrypted: PathBuf,
    /// Base for [`ShareCategory::Shared`].
    pub shared: PathBuf,
}

impl Default for ShareBases {
    fn default() -> Self {
        Self {
            myfiles: PathBuf::from(constants::HOST_USER_DIR),
            downloads: PathBuf::from(constants::HOST_DOWNLOADS_DIR),
            encrypted: PathBuf::from(constants::HOST_VAULT_DIR),
            shared: PathBuf::from(constants::HOST_SHARED_DIR),
        }
    }
}

impl ShareBases {
    fn dir(&self, category: ShareCategory) -> Option<&Path> {
        match category {
            ShareCategory::MyFiles => Some(&self.myfiles),
            ShareCategory::Downloads => Some(&self.downloads),
            ShareCategory::Encrypted => Some(&self.encrypted),
            ShareCategory::Shared => Some(&self.shared),
            ShareCategory::Invalid => None,
        }
    }
}

/// Mounts accepted share rules into the guest.
pub struct ShareMounter<'a> {
    orchestrator: &'a MountOrchestrator,
    bases: ShareBases,
    /// Guest-absolute home of the entering user, when one was resolved.
    user_home: Option<PathBuf>,
}

impl<'a> ShareMounter<'a> {
    /// Creates a share mounter over the session's orchestrator.
    #[must_use]
    pub fn new(
        orchestrator: &'a MountOrchestrator,
        bases: ShareBases,
        user_home: Option<PathBuf>,
    ) -> Self {
        Self {
            orchestrator,
            bases,
            user_home,
        }
    }

    /// Mounts every rule, skipping failures with a warning. Returns the
    /// number of mounts actually made (idempotent repeats excluded).
    pub fn mount_all(&self, rules: &[ShareRule]) -> usize {
        let mut mounted = 0;
        for rule in rules {
            match self.mount_rule(rule) {
                Ok(true) => mounted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(rule = %rule, error = %e, "share skipped");
                }
            }
        }
        mounted
    }

    /// Mounts one rule. `Ok(false)` covers both idempotent repeats and
    /// skip-with-warning cases.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind mount itself fails.
    pub fn mount_rule(&self, rule: &ShareRule) -> Result<bool> {
        let Some(base) = self.bases.dir(rule.category) else {
            tracing::warn!(rule = %rule, "unknown share source category, skipping");
            return Ok(false);
        };

        let source = base.join(rule.suffix.trim_end_matches('/'));
        if !source.exists() {
            tracing::warn!(
                source = %source.display(),
                "host directory unavailable this session, skipping share"
            );
            return Ok(false);
        }

        let Some(dest) = self.rewrite_dest(&rule.dest) else {
            tracing::warn!(
                dest = %rule.dest,
                "no guest user home to expand '~', skipping share"
            );
            return Ok(false);
        };

        let opts = MountOpts::parse(
            &rule.options.iter().cloned().collect::<Vec<_>>().join(","),
        );
        // The remount pass re-applies exactly the rule's flags, clearing
        // whatever the bind inherited from the host side (ro, noexec).
        self.orchestrator
            .bind(&source, &dest, &MountOpts::default(), Some(&opts))
    }

    /// Rewrites the destination spec to a guest-absolute path: a leading
    /// `~` maps to the entering user's home, `~name` to `/home/name`.
    fn rewrite_dest(&self, dest: &str) -> Option<PathBuf> {
        if let Some(rest) = dest.strip_prefix("~/") {
            return self.user_home.as_ref().map(|home| home.join(rest));
        }
        if dest == "~" {
            return self.user_home.clone();
        }
        if let Some(rest) = dest.strip_prefix('~') {
            let (name, below) = rest.split_once('/').unwrap_or((rest, ""));
            return Some(Path::new("/home").join(name).join(below));
        }
        Some(PathBuf::from(dest))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use rootlet_core::cleanup;
    use rootlet_core::mount::{FakeMounter, Mounter};

    use crate::parser;

    use super::*;

    struct Fixture {
        _host: tempfile::TempDir,
        guest: tempfile::TempDir,
        bases: ShareBases,
        mounter: Arc<FakeMounter>,
    }

    fn fixture() -> Fixture {
        let host = tempfile::tempdir().unwrap();
        for dir in ["user/Downloads", "vault", "shared"] {
            std::fs::create_dir_all(host.path().join(dir)).unwrap();
        }
        let bases = ShareBases {
            myfiles: host.path().join("user"),
            downloads: host.path().join("user/Downloads"),
            encrypted: host.path().join("vault"),
            shared: host.path().join("shared"),
        };
        Fixture {
            guest: tempfile::tempdir().unwrap(),
            bases,
            mounter: Arc::new(FakeMounter::new()),
            _host: host,
        }
    }

    fn mount_text(fx: &Fixture, text: &str, home: Option<PathBuf>) -> usize {
        let registry = cleanup::shared();
        let orch = MountOrchestrator::new(
            fx.guest.path(),
            Arc::clone(&fx.mounter) as Arc<dyn Mounter>,
            registry,
        );
        let config = parser::parse(text);
        assert!(config.errors.is_empty(), "{:?}", config.errors);
        ShareMounter::new(&orch, fx.bases.clone(), home).mount_all(&config.rules)
    }

    #[test]
    fn downloads_mounts_into_user_home() {
        let fx = fixture();
        let mounted = mount_text(&fx, "downloads ~/Downloads", Some("/home/alice".into()));
        assert_eq!(mounted, 1);
        assert_eq!(
            fx.mounter.mounted(),
            vec![fx.guest.path().join("home/alice/Downloads")]
        );
    }

    #[test]
    fn tilde_user_dest_expands_to_home_dir() {
        let fx = fixture();
        let mounted = mount_text(&fx, "shared ~bob/shared", None);
        assert_eq!(mounted, 1);
        assert_eq!(
            fx.mounter.mounted(),
            vec![fx.guest.path().join("home/bob/shared")]
        );
    }

    #[test]
    fn tilde_without_resolved_home_is_skipped() {
        let fx = fixture();
        let mounted = mount_text(&fx, "downloads ~/Downloads", None);
        assert_eq!(mounted, 0);
        assert!(fx.mounter.mounted().is_empty());
    }

    #[test]
    fn missing_host_directory_is_skipped_not_fatal() {
        let fx = fixture();
        let text = "myfiles/NoSuchDir /srv/missing\nshared /mnt/shared\n";
        let mounted = mount_text(&fx, text, None);
        assert_eq!(mounted, 1);
        assert_eq!(fx.mounter.mounted(), vec![fx.guest.path().join("mnt/shared")]);
    }

    #[test]
    fn invalid_category_is_skipped() {
        let fx = fixture();
        let mounted = mount_text(&fx, "sideload /srv/x", None);
        assert_eq!(mounted, 0);
    }

    #[test]
    fn readonly_option_triggers_remount_pass() {
        let fx = fixture();
        let mounted = mount_text(&fx, "shared /mnt/shared ro", None);
        assert_eq!(mounted, 1);
        // Bind plus remount.
        assert_eq!(fx.mounter.mount_calls().len(), 2);
    }

    #[test]
    fn default_exec_option_clears_inherited_flags() {
        let fx = fixture();
        let mounted = mount_text(&fx, "shared /mnt/shared", None);
        assert_eq!(mounted, 1);
        // Even a bare rule gets the remount pass, so a noexec or ro flag
        // inherited from the host filesystem is dropped.
        assert_eq!(fx.mounter.mount_calls().len(), 2);
    }
}
