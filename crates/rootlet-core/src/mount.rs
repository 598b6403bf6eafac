//! Idempotent bind and tmpfs mount orchestration.
//!
//! Every mount targets the guest's view of the filesystem: destinations are
//! resolved through [`PathResolver`] so symlinked destinations cannot escape
//! the guest root. A destination that is already mounted is a no-op success;
//! idempotence is re-derived each run by probing the live mount table, never
//! from persisted state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use nix::mount::{MntFlags, MsFlags};
use rootlet_common::error::{Result, RootletError};

use crate::cleanup::SharedRegistry;
use crate::resolver::PathResolver;

/// Parsed mount options: syscall flags plus leftover filesystem data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOpts {
    /// Mount flags recognized from the option string.
    pub flags: MsFlags,
    /// Remaining comma-separated options passed through as mount data
    /// (e.g. `mode=0755`).
    pub data: Option<String>,
}

impl Default for MountOpts {
    fn default() -> Self {
        Self {
            flags: MsFlags::empty(),
            data: None,
        }
    }
}

impl MountOpts {
    /// Parses a comma-separated option string such as `ro,noexec,mode=0755`.
    ///
    /// Recognized names map to mount flags; `rw`, `exec`, `suid`, and `dev`
    /// are the kernel defaults and parse to nothing. Everything else is
    /// carried as filesystem data.
    #[must_use]
    pub fn parse(options: &str) -> Self {
        let mut flags = MsFlags::empty();
        let mut data = Vec::new();
        for opt in options.split(',').filter(|o| !o.is_empty()) {
            match opt {
                "ro" => flags |= MsFlags::MS_RDONLY,
                "nosuid" => flags |= MsFlags::MS_NOSUID,
                "nodev" => flags |= MsFlags::MS_NODEV,
                "noexec" => flags |= MsFlags::MS_NOEXEC,
                "noatime" => flags |= MsFlags::MS_NOATIME,
                "sync" => flags |= MsFlags::MS_SYNCHRONOUS,
                "rec" => flags |= MsFlags::MS_REC,
                "rw" | "exec" | "suid" | "dev" => {}
                other => data.push(other.to_owned()),
            }
        }
        Self {
            flags,
            data: if data.is_empty() {
                None
            } else {
                Some(data.join(","))
            },
        }
    }

    /// Whether any recognized flag or data option was given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.data.is_none()
    }
}

/// Low-level mount-table backend.
///
/// The real implementation issues `mount(2)`/`umount2(2)` and probes
/// `/proc/self/mounts`; tests substitute an in-memory fake.
pub trait Mounter: Send + Sync {
    /// Performs one mount syscall.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying mount operation fails.
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()>;

    /// Unmounts a mount point.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails.
    fn unmount(&self, target: &Path) -> Result<()>;

    /// Whether `target` is currently a mount point.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    fn is_mounted(&self, target: &Path) -> Result<bool>;
}

/// [`Mounter`] implementation backed by real syscalls and
/// `/proc/self/mounts`.
#[derive(Debug, Default)]
pub struct SysMounter;

impl SysMounter {
    /// Creates the syscall-backed mounter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Mounter for SysMounter {
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        tracing::debug!(
            source = source.map(|s| s.display().to_string()),
            target = %target.display(),
            ?fstype,
            ?flags,
            ?data,
            "mount"
        );
        nix::mount::mount(source, target, fstype, flags, data).map_err(|e| {
            RootletError::Mount {
                op: "mount",
                path: target.to_path_buf(),
                source: std::io::Error::from_raw_os_error(e as i32),
            }
        })
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        tracing::debug!(target = %target.display(), "umount");
        nix::mount::umount2(target, MntFlags::MNT_DETACH).map_err(|e| RootletError::Mount {
            op: "umount",
            path: target.to_path_buf(),
            source: std::io::Error::from_raw_os_error(e as i32),
        })
    }

    fn is_mounted(&self, target: &Path) -> Result<bool> {
        let table =
            std::fs::read_to_string("/proc/self/mounts").map_err(|e| RootletError::Io {
                path: PathBuf::from("/proc/self/mounts"),
                source: e,
            })?;
        Ok(table
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|point| decode_mount_point(point) == *target))
    }
}

/// Decodes the octal escapes (`\040` space, `\011` tab, `\012` newline,
/// `\134` backslash) used in `/proc/self/mounts` mount-point fields.
fn decode_mount_point(field: &str) -> PathBuf {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let digits: String = chars.by_ref().take(3).collect();
        match u8::from_str_radix(&digits, 8) {
            Ok(byte) => out.push(byte as char),
            Err(_) => {
                out.push('\\');
                out.push_str(&digits);
            }
        }
    }
    PathBuf::from(out)
}

/// In-memory [`Mounter`] recording every call, for tests.
#[derive(Debug, Default)]
pub struct FakeMounter {
    state: Mutex<FakeState>,
}

#[derive(Debug, Default)]
struct FakeState {
    mounted: Vec<PathBuf>,
    mount_calls: Vec<PathBuf>,
    unmount_calls: Vec<PathBuf>,
}

impl FakeMounter {
    /// Creates an empty fake mount table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mount points currently held, in mount order.
    #[must_use]
    pub fn mounted(&self) -> Vec<PathBuf> {
        self.state().mounted.clone()
    }

    /// Every mount call seen, including remounts, in call order.
    #[must_use]
    pub fn mount_calls(&self) -> Vec<PathBuf> {
        self.state().mount_calls.clone()
    }

    /// Every unmount call seen, in call order.
    #[must_use]
    pub fn unmount_calls(&self) -> Vec<PathBuf> {
        self.state().unmount_calls.clone()
    }
}

impl Mounter for FakeMounter {
    fn mount(
        &self,
        _source: Option<&Path>,
        target: &Path,
        _fstype: Option<&str>,
        flags: MsFlags,
        _data: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state();
        state.mount_calls.push(target.to_path_buf());
        let is_new = !flags.contains(MsFlags::MS_REMOUNT)
            && !flags.contains(MsFlags::MS_SHARED)
            && !flags.contains(MsFlags::MS_SLAVE);
        if is_new && !state.mounted.contains(&target.to_path_buf()) {
            state.mounted.push(target.to_path_buf());
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let mut state = self.state();
        state.unmount_calls.push(target.to_path_buf());
        state.mounted.retain(|p| p != target);
        Ok(())
    }

    fn is_mounted(&self, target: &Path) -> Result<bool> {
        Ok(self.state().mounted.iter().any(|p| p == target))
    }
}

/// High-level idempotent mount operations into one guest root.
///
/// Every successful mount registers its unmount with the cleanup registry,
/// so teardown unwinds exactly what this session added.
pub struct MountOrchestrator {
    resolver: PathResolver,
    mounter: Arc<dyn Mounter>,
    registry: SharedRegistry,
}

impl MountOrchestrator {
    /// Creates an orchestrator for the given guest root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, mounter: Arc<dyn Mounter>, registry: SharedRegistry) -> Self {
        Self {
            resolver: PathResolver::new(root),
            mounter,
            registry,
        }
    }

    /// Returns the confined path resolver for this guest.
    #[must_use]
    pub const fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Whether the guest-relative destination is currently mounted.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be probed.
    pub fn is_mounted(&self, dest: &Path) -> Result<bool> {
        self.mounter.is_mounted(&self.resolver.resolve(dest))
    }

    /// Bind-mounts a host `source` at the guest-relative `dest`.
    ///
    /// No-op success if the destination is already mounted. When
    /// `remount` options are given, a second `MS_REMOUNT|MS_BIND` pass
    /// applies them; a bind mount inherits its source's flags and cannot
    /// take mount-only flags such as read-only in one step.
    ///
    /// Returns whether a new mount was made.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be created or a mount
    /// syscall fails.
    pub fn bind(
        &self,
        source: &Path,
        dest: &Path,
        opts: &MountOpts,
        remount: Option<&MountOpts>,
    ) -> Result<bool> {
        let target = self.prepare_dest(dest)?;
        if self.mounter.is_mounted(&target)? {
            tracing::debug!(target = %target.display(), "already mounted, skipping");
            return Ok(false);
        }

        self.mounter.mount(
            Some(source),
            &target,
            None,
            MsFlags::MS_BIND | opts.flags,
            None,
        )?;
        self.register_unmount(&target);

        if let Some(remount) = remount {
            self.mounter.mount(
                None,
                &target,
                None,
                MsFlags::MS_REMOUNT | MsFlags::MS_BIND | remount.flags,
                remount.data.as_deref(),
            )?;
        }
        Ok(true)
    }

    /// Bind-mounts a host path at the same path inside the guest.
    ///
    /// # Errors
    ///
    /// Propagates from [`MountOrchestrator::bind`].
    pub fn bind_self(&self, source: &Path, opts: &MountOpts) -> Result<bool> {
        self.bind(source, source, opts, None)
    }

    /// Mounts a fresh empty tmpfs at the guest-relative `dest`.
    ///
    /// No-op success if the destination is already mounted.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be created or the mount
    /// syscall fails.
    pub fn tmpfs(&self, dest: &Path, opts: &MountOpts) -> Result<bool> {
        self.pseudo("tmpfs", dest, opts)
    }

    /// Mounts a kernel pseudo-filesystem (`tmpfs`, `proc`, ...) at the
    /// guest-relative `dest`, with the same idempotence check as binds.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be created or the mount
    /// syscall fails.
    pub fn pseudo(&self, fstype: &str, dest: &Path, opts: &MountOpts) -> Result<bool> {
        let target = self.prepare_dest(dest)?;
        if self.mounter.is_mounted(&target)? {
            tracing::debug!(target = %target.display(), "already mounted, skipping");
            return Ok(false);
        }

        self.mounter.mount(
            Some(Path::new(fstype)),
            &target,
            Some(fstype),
            opts.flags,
            opts.data.as_deref(),
        )?;
        self.register_unmount(&target);
        Ok(true)
    }

    /// Marks a guest mount shared so host mount events propagate in.
    ///
    /// # Errors
    ///
    /// Returns an error if the propagation change fails.
    pub fn make_shared(&self, dest: &Path, recursive: bool) -> Result<()> {
        self.set_propagation(dest, MsFlags::MS_SHARED, recursive)
    }

    /// Marks a guest mount slave so guest-side changes never propagate
    /// back to the host.
    ///
    /// # Errors
    ///
    /// Returns an error if the propagation change fails.
    pub fn make_slave(&self, dest: &Path, recursive: bool) -> Result<()> {
        self.set_propagation(dest, MsFlags::MS_SLAVE, recursive)
    }

    fn set_propagation(&self, dest: &Path, mode: MsFlags, recursive: bool) -> Result<()> {
        let target = self.resolver.resolve(dest);
        let flags = if recursive { mode | MsFlags::MS_REC } else { mode };
        self.mounter.mount(None, &target, None, flags, None)
    }

    fn prepare_dest(&self, dest: &Path) -> Result<PathBuf> {
        let target = self.resolver.resolve(dest);
        std::fs::create_dir_all(&target).map_err(|e| RootletError::Io {
            path: target.clone(),
            source: e,
        })?;
        Ok(target)
    }

    fn register_unmount(&self, target: &Path) {
        let mounter = Arc::clone(&self.mounter);
        let target = target.to_path_buf();
        let label = format!("umount {}", target.display());
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(label, move || {
                if let Err(e) = mounter.unmount(&target) {
                    tracing::warn!(target = %target.display(), error = %e, "unmount failed");
                }
            });
    }
}
