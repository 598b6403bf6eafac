//! System-wide constants and default paths.

/// Default directory holding guest root filesystems on the host.
pub const DEFAULT_CHROOTS_DIR: &str = "/var/lib/rootlet/chroots";

/// Guest-relative directory holding Rootlet metadata (name, release,
/// capabilities, refreshed host credential copies).
pub const GUEST_META_DIR: &str = "etc/rootlet";

/// Guest-relative path of the directory-sharing configuration file.
pub const SHARE_CONFIG_FILE: &str = "etc/rootlet/shares";

/// Guest-relative path of the provisioning marker script. While it exists,
/// guest setup has not completed.
pub const SETUP_SCRIPT: &str = "prepare.sh";

/// Guest-relative path of the first-boot script, run once when the guest
/// run directory was not yet mounted.
pub const FIRSTBOOT_SCRIPT: &str = "etc/rootlet/firstboot";

/// Guest-relative pidfile of an externally managed init process.
pub const INIT_PIDFILE: &str = "run/rootlet-init.pid";

/// Marker file identifying an encrypted, not-yet-unlocked guest.
pub const ENCRYPTION_MARKER: &str = ".ecryptfs";

/// Host directory backing the `myfiles` share category.
pub const HOST_USER_DIR: &str = "/home/host/user";

/// Host directory backing the `downloads` share category.
pub const HOST_DOWNLOADS_DIR: &str = "/home/host/user/Downloads";

/// Host directory backing the `encrypted` share category.
pub const HOST_VAULT_DIR: &str = "/home/host/vault";

/// Host directory backing the `shared` share category.
pub const HOST_SHARED_DIR: &str = "/var/lib/rootlet/shared";

/// Host socket directory of the IPC message bus.
pub const HOST_DBUS_DIR: &str = "/run/dbus";

/// Host socket directory of the network-state manager.
pub const HOST_NETWORK_DIR: &str = "/run/network";

/// Host timezone database, bound read-only into the guest.
pub const HOST_ZONEINFO_DIR: &str = "/usr/share/zoneinfo";

/// Host kernel module tree, bound read-only into the guest.
pub const HOST_MODULES_DIR: &str = "/lib/modules";

/// Host removable-media tree, bound shared so hot-plug events propagate.
pub const HOST_MEDIA_DIR: &str = "/media";

/// Host OS release file copied into the guest metadata directory.
pub const HOST_RELEASE_FILE: &str = "/etc/lsb-release";

/// Host audio-server version file copied into the guest metadata directory.
pub const HOST_AUDIO_VERSION_FILE: &str = "/run/audio-server/version";

/// Device-class trees bound individually into the guest. Entries that do
/// not exist on this host (inapplicable hardware) are filtered out.
pub const DEVICE_CLASS_DIRS: &[&str] = &[
    "/dev/dri",
    "/dev/input",
    "/dev/snd",
    "/dev/bus/usb",
    "/dev/v4l",
];

/// Access-control filesystem under `/sys` that is neutralized with an empty
/// permissive placeholder after the recursive `/sys` bind.
pub const SYS_ACCESS_CONTROL_DIR: &str = "sys/fs/selinux";

/// Group identities synchronized from host to guest, as
/// (host name, guest name) pairs.
pub const GROUP_SYNC_PAIRS: &[(&str, &str)] = &[
    ("video", "video"),
    ("audio", "audio"),
    ("input", "input"),
    ("serial", "dialout"),
];

/// Upper bound on symlink hops during confined path resolution. Resolution
/// past this bound returns the best partial result instead of failing.
pub const SYMLINK_HOP_LIMIT: u32 = 64;

/// Application name used in CLI output and guest metadata.
pub const APP_NAME: &str = "rootlet";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "rootlet";
