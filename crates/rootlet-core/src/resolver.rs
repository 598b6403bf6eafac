//! Symlink resolution confined to the guest root.
//!
//! A guest-internal absolute symlink must never escape the guest root: its
//! target is reinterpreted as rooted at the guest root rather than the real
//! host root. Resolution is bounded; hitting the bound returns the best
//! partial result instead of failing.

use std::collections::VecDeque;
use std::path::{Component, Path, PathBuf};

use rootlet_common::constants::SYMLINK_HOP_LIMIT;

/// Resolves guest paths without ever leaving the guest root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Creates a resolver for the given guest root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the guest root this resolver confines to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` (interpreted as absolute inside the guest) to a host
    /// path under the guest root.
    ///
    /// Symlinks are followed component by component. Absolute targets are
    /// re-rooted at the guest root; `..` never ascends above it. After
    /// [`SYMLINK_HOP_LIMIT`] link hops the remaining components are appended
    /// literally (best-effort, not fatal).
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let mut pending: VecDeque<PathBuf> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(n) => Some(PathBuf::from(n)),
                Component::ParentDir => Some(PathBuf::from("..")),
                _ => None,
            })
            .collect();

        let mut out = self.root.clone();
        let mut hops = 0u32;

        while let Some(comp) = pending.pop_front() {
            if comp.as_os_str() == ".." {
                if out != self.root {
                    let _ = out.pop();
                }
                continue;
            }

            let candidate = out.join(&comp);
            if hops >= SYMLINK_HOP_LIMIT {
                out = candidate;
                continue;
            }

            match std::fs::read_link(&candidate) {
                Ok(target) => {
                    hops += 1;
                    if target.is_absolute() {
                        out = self.root.clone();
                    }
                    for piece in target
                        .components()
                        .filter_map(|c| match c {
                            Component::Normal(n) => Some(PathBuf::from(n)),
                            Component::ParentDir => Some(PathBuf::from("..")),
                            _ => None,
                        })
                        .rev()
                    {
                        pending.push_front(piece);
                    }
                }
                Err(_) => out = candidate,
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::os::unix::fs::symlink;

    use super::*;

    #[test]
    fn plain_path_lands_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path());
        let resolved = resolver.resolve(Path::new("/usr/share/zoneinfo"));
        assert_eq!(resolved, dir.path().join("usr/share/zoneinfo"));
    }

    #[test]
    fn absolute_symlink_is_rerooted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("var")).unwrap();
        std::fs::create_dir_all(dir.path().join("run")).unwrap();
        // /var/run -> /run, pointing at the host root if taken literally.
        symlink("/run", dir.path().join("var/run")).unwrap();

        let resolver = PathResolver::new(dir.path());
        let resolved = resolver.resolve(Path::new("/var/run/lock"));
        assert_eq!(resolved, dir.path().join("run/lock"));
    }

    #[test]
    fn escape_via_symlink_stays_confined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        symlink("/etc/passwd", dir.path().join("etc/leak")).unwrap();

        let resolver = PathResolver::new(dir.path());
        let resolved = resolver.resolve(Path::new("/etc/leak"));
        assert!(resolved.starts_with(dir.path()));
        assert_eq!(resolved, dir.path().join("etc/passwd"));
    }

    #[test]
    fn parent_segments_cannot_ascend_above_root() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path());
        let resolved = resolver.resolve(Path::new("/../../etc"));
        assert_eq!(resolved, dir.path().join("etc"));
    }

    #[test]
    fn relative_symlink_resolves_in_place() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("opt/app")).unwrap();
        symlink("app", dir.path().join("opt/current")).unwrap();

        let resolver = PathResolver::new(dir.path());
        let resolved = resolver.resolve(Path::new("/opt/current/bin"));
        assert_eq!(resolved, dir.path().join("opt/app/bin"));
    }

    #[test]
    fn symlink_loop_hits_cutoff_with_partial_result() {
        let dir = tempfile::tempdir().unwrap();
        symlink("b", dir.path().join("a")).unwrap();
        symlink("a", dir.path().join("b")).unwrap();

        let resolver = PathResolver::new(dir.path());
        let resolved = resolver.resolve(Path::new("/a/tail"));
        assert!(resolved.starts_with(dir.path()));
        assert!(resolved.ends_with("tail"));
    }
}
