//! Execution inside the guest: chroot'd commands, guest user lookup, and
//! shell re-quoting.

use std::path::{Path, PathBuf};
use std::process::Command;

use rootlet_common::error::{Result, RootletError};

/// A guest the session runs commands against.
#[derive(Debug, Clone)]
pub struct GuestContext {
    root: PathBuf,
}

pub(crate) fn errno_to_io(e: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}

impl GuestContext {
    /// Creates a context for the given guest root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the guest root path on the host.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Builds a command chroot'd into the guest, running as root with the
    /// guest root as working directory.
    #[must_use]
    #[allow(unsafe_code)]
    pub fn command(&self, program: &str) -> Command {
        use std::os::unix::process::CommandExt;

        let root = self.root.clone();
        let mut cmd = Command::new(program);
        // SAFETY: only async-signal-safe syscalls run between fork and exec.
        unsafe {
            let _ = cmd.pre_exec(move || {
                nix::unistd::chroot(&root).map_err(errno_to_io)?;
                nix::unistd::chdir("/").map_err(errno_to_io)?;
                Ok(())
            });
        }
        cmd
    }

    /// Builds a command chroot'd into the guest and dropped to the given
    /// guest user, with the user's home as working directory.
    #[must_use]
    #[allow(unsafe_code)]
    pub fn command_as(&self, program: &str, user: &GuestUser) -> Command {
        use std::os::unix::process::CommandExt;

        let root = self.root.clone();
        let home = user.home.clone();
        let uid = nix::unistd::Uid::from_raw(user.uid);
        let gid = nix::unistd::Gid::from_raw(user.gid);
        let name = std::ffi::CString::new(user.name.clone()).unwrap_or_default();

        let mut cmd = Command::new(program);
        // SAFETY: only async-signal-safe syscalls run between fork and exec.
        unsafe {
            let _ = cmd.pre_exec(move || {
                nix::unistd::chroot(&root).map_err(errno_to_io)?;
                nix::unistd::setgid(gid).map_err(errno_to_io)?;
                nix::unistd::initgroups(&name, gid).map_err(errno_to_io)?;
                nix::unistd::setuid(uid).map_err(errno_to_io)?;
                if nix::unistd::chdir(&home).is_err() {
                    nix::unistd::chdir("/").map_err(errno_to_io)?;
                }
                Ok(())
            });
        }
        cmd
    }
}

/// One guest user, resolved from the guest's own password database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestUser {
    /// Login name.
    pub name: String,
    /// Numeric user id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
    /// Home directory, guest-absolute.
    pub home: PathBuf,
    /// Login shell, guest-absolute.
    pub shell: PathBuf,
}

/// Parses a passwd-format database.
#[must_use]
pub fn parse_passwd(content: &str) -> Vec<GuestUser> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(GuestUser {
                name: fields[0].to_owned(),
                uid: fields[2].parse().ok()?,
                gid: fields[3].parse().ok()?,
                home: PathBuf::from(fields[5]),
                shell: PathBuf::from(fields[6]),
            })
        })
        .collect()
}

/// Resolves the requested identity against the guest password database.
///
/// With no name given, the first regular user (uid >= 1000) wins, falling
/// back to root.
///
/// # Errors
///
/// Returns an error if the guest database is unreadable or the named user
/// does not exist.
pub fn lookup_user(root: &Path, who: Option<&str>) -> Result<GuestUser> {
    let passwd = root.join("etc/passwd");
    let content = std::fs::read_to_string(&passwd).map_err(|e| RootletError::Io {
        path: passwd,
        source: e,
    })?;
    let users = parse_passwd(&content);

    match who {
        Some(name) => users
            .into_iter()
            .find(|u| u.name == name)
            .ok_or_else(|| RootletError::NotFound {
                kind: "guest user",
                id: name.to_owned(),
            }),
        None => {
            let fallback = users.iter().find(|u| u.name == "root").cloned();
            users
                .iter()
                .find(|u| u.uid >= 1000 && u.uid < 65534)
                .cloned()
                .or(fallback)
                .ok_or(RootletError::NotFound {
                    kind: "guest user",
                    id: "(default)".to_owned(),
                })
        }
    }
}

/// Quotes one word for the guest's POSIX shell.
#[must_use]
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | '@'))
    {
        return word.to_owned();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Re-quotes a host command line for safe execution by the guest shell.
#[must_use]
pub fn shell_join(words: &[String]) -> String {
    words
        .iter()
        .map(|w| shell_quote(w))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
alice:x:1000:1000:Alice:/home/alice:/bin/zsh
bob:x:1001:1001::/home/bob:/bin/bash
nobody:x:65534:65534::/nonexistent:/usr/sbin/nologin
";

    fn guest_with_passwd() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(dir.path().join("etc/passwd"), PASSWD).unwrap();
        dir
    }

    #[test]
    fn default_user_is_first_regular_account() {
        let dir = guest_with_passwd();
        let user = lookup_user(dir.path(), None).unwrap();
        assert_eq!(user.name, "alice");
        assert_eq!(user.uid, 1000);
        assert_eq!(user.shell, PathBuf::from("/bin/zsh"));
    }

    #[test]
    fn named_user_is_found() {
        let dir = guest_with_passwd();
        let user = lookup_user(dir.path(), Some("bob")).unwrap();
        assert_eq!(user.uid, 1001);
        assert_eq!(user.home, PathBuf::from("/home/bob"));
    }

    #[test]
    fn unknown_user_is_an_error() {
        let dir = guest_with_passwd();
        assert!(lookup_user(dir.path(), Some("mallory")).is_err());
    }

    #[test]
    fn unreadable_database_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(lookup_user(dir.path(), None).is_err());
    }

    #[test]
    fn root_is_the_fallback_without_regular_users() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(
            dir.path().join("etc/passwd"),
            "root:x:0:0:root:/root:/bin/sh\n",
        )
        .unwrap();
        let user = lookup_user(dir.path(), None).unwrap();
        assert_eq!(user.name, "root");
    }

    #[test]
    fn quote_plain_word_unchanged() {
        assert_eq!(shell_quote("ls"), "ls");
        assert_eq!(shell_quote("/usr/bin/env"), "/usr/bin/env");
    }

    #[test]
    fn quote_word_with_spaces_and_quotes() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn join_requotes_full_command() {
        let cmd = vec!["echo".to_owned(), "hello world".to_owned()];
        assert_eq!(shell_join(&cmd), "echo 'hello world'");
    }
}
