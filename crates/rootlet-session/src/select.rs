//! Guest selection and descriptor loading.
//!
//! With no name given, the chroots directory is scanned in sorted order;
//! entries lacking both a usable directory structure and an encryption
//! marker are skipped, and the first match wins.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rootlet_common::config::SessionOptions;
use rootlet_common::constants::{ENCRYPTION_MARKER, GUEST_META_DIR};
use rootlet_common::error::{Result, RootletError};
use rootlet_common::types::ChrootDescriptor;

/// Loads the descriptor for a guest root, tolerating missing metadata.
#[must_use]
pub fn load_descriptor(name: &str, root: &Path) -> ChrootDescriptor {
    let meta = root.join(GUEST_META_DIR);

    let release = std::fs::read_to_string(meta.join("release"))
        .map_or_else(|_| "unknown".to_owned(), |s| s.trim().to_owned());

    let capabilities: BTreeSet<String> = std::fs::read_to_string(meta.join("capabilities"))
        .map(|s| {
            s.split_whitespace()
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    ChrootDescriptor {
        name: name.to_owned(),
        root: root.to_path_buf(),
        release,
        external_init: meta.join("external-init").exists(),
        capabilities,
    }
}

/// Whether a chroots-directory entry is selectable: it has either a usable
/// directory structure or an encryption marker.
fn is_candidate(root: &Path) -> bool {
    root.join("etc").is_dir() || root.join(ENCRYPTION_MARKER).exists()
}

/// Resolves the session's guest.
///
/// # Errors
///
/// Fatal when the named guest does not exist, when no guest qualifies, or
/// when none declares the required capability. The two scan failures carry
/// distinct messages.
pub fn select_chroot(opts: &SessionOptions) -> Result<ChrootDescriptor> {
    if let Some(name) = &opts.name {
        let root = opts.chroots_dir.join(name);
        if !root.is_dir() {
            return Err(RootletError::NotFound {
                kind: "chroot",
                id: name.clone(),
            });
        }
        let desc = load_descriptor(name, &root);
        if let Some(tag) = &opts.require_capability {
            if !desc.capabilities.contains(tag) {
                return Err(RootletError::InvalidChroot {
                    name: name.clone(),
                    message: format!("does not declare capability {tag:?}"),
                });
            }
        }
        return Ok(desc);
    }

    let mut names: Vec<(String, PathBuf)> = std::fs::read_dir(&opts.chroots_dir)
        .map_err(|e| RootletError::Io {
            path: opts.chroots_dir.clone(),
            source: e,
        })?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .collect();
    names.sort();

    let mut saw_candidate = false;
    for (name, root) in names {
        if !is_candidate(&root) {
            tracing::debug!(%name, "skipping entry without structure or marker");
            continue;
        }
        saw_candidate = true;
        let desc = load_descriptor(&name, &root);
        if let Some(tag) = &opts.require_capability {
            if !desc.capabilities.contains(tag) {
                tracing::debug!(%name, %tag, "skipping chroot without capability");
                continue;
            }
        }
        return Ok(desc);
    }

    match (&opts.require_capability, saw_candidate) {
        (Some(tag), true) => Err(RootletError::NotFound {
            kind: "chroot with capability",
            id: tag.clone(),
        }),
        _ => Err(RootletError::NotFound {
            kind: "chroot",
            id: opts.chroots_dir.display().to_string(),
        }),
    }
}

/// Lists every selectable guest, for display.
///
/// # Errors
///
/// Returns an error if the chroots directory cannot be read.
pub fn list_chroots(chroots_dir: &Path) -> Result<Vec<ChrootDescriptor>> {
    let mut names: Vec<(String, PathBuf)> = std::fs::read_dir(chroots_dir)
        .map_err(|e| RootletError::Io {
            path: chroots_dir.to_path_buf(),
            source: e,
        })?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .collect();
    names.sort();

    Ok(names
        .into_iter()
        .filter(|(_, root)| is_candidate(root))
        .map(|(name, root)| load_descriptor(&name, &root))
        .collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn make_guest(base: &Path, name: &str, caps: Option<&str>) {
        let meta = base.join(name).join(GUEST_META_DIR);
        std::fs::create_dir_all(&meta).unwrap();
        std::fs::write(meta.join("release"), "stable\n").unwrap();
        if let Some(caps) = caps {
            std::fs::write(meta.join("capabilities"), caps).unwrap();
        }
    }

    fn options(dir: &Path) -> SessionOptions {
        SessionOptions {
            chroots_dir: dir.to_path_buf(),
            ..SessionOptions::default()
        }
    }

    #[test]
    fn scan_picks_first_sorted_candidate() {
        let dir = tempfile::tempdir().unwrap();
        make_guest(dir.path(), "zesty", None);
        make_guest(dir.path(), "artful", None);

        let desc = select_chroot(&options(dir.path())).unwrap();
        assert_eq!(desc.name, "artful");
        assert_eq!(desc.release, "stable");
    }

    #[test]
    fn entries_without_structure_or_marker_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("junk")).unwrap();
        make_guest(dir.path(), "zesty", None);

        let desc = select_chroot(&options(dir.path())).unwrap();
        assert_eq!(desc.name, "zesty");
    }

    #[test]
    fn encrypted_marker_makes_an_entry_selectable() {
        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::write(locked.join(ENCRYPTION_MARKER), "").unwrap();

        let desc = select_chroot(&options(dir.path())).unwrap();
        assert_eq!(desc.name, "locked");
        assert_eq!(desc.release, "unknown");
    }

    #[test]
    fn capability_filter_applies_during_scan() {
        let dir = tempfile::tempdir().unwrap();
        make_guest(dir.path(), "plain", None);
        make_guest(dir.path(), "xorg", Some("x11 audio\n"));

        let mut opts = options(dir.path());
        opts.require_capability = Some("x11".into());
        let desc = select_chroot(&opts).unwrap();
        assert_eq!(desc.name, "xorg");
    }

    #[test]
    fn no_chroots_and_no_capable_chroot_are_distinct_errors() {
        let dir = tempfile::tempdir().unwrap();
        let empty = select_chroot(&options(dir.path())).unwrap_err();
        assert!(empty.to_string().contains("chroot not found"));

        make_guest(dir.path(), "plain", None);
        let mut opts = options(dir.path());
        opts.require_capability = Some("x11".into());
        let uncapable = select_chroot(&opts).unwrap_err();
        assert!(uncapable.to_string().contains("capability"));
        assert_ne!(empty.to_string(), uncapable.to_string());
    }

    #[test]
    fn named_guest_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.name = Some("missing".into());
        assert!(select_chroot(&opts).is_err());
    }

    #[test]
    fn external_init_flag_is_read_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        make_guest(dir.path(), "sysd", None);
        std::fs::write(
            dir.path().join("sysd").join(GUEST_META_DIR).join("external-init"),
            "",
        )
        .unwrap();

        let desc = select_chroot(&options(dir.path())).unwrap();
        assert!(desc.external_init);
    }

    #[test]
    fn list_reports_all_candidates() {
        let dir = tempfile::tempdir().unwrap();
        make_guest(dir.path(), "a", None);
        make_guest(dir.path(), "b", Some("x11"));
        std::fs::create_dir_all(dir.path().join("junk")).unwrap();

        let all = list_chroots(dir.path()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "a");
        assert!(all[1].capabilities.contains("x11"));
    }
}
