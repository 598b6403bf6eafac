//! Guest metadata refresh.
//!
//! Each entry rewrites the guest's self-identifying name file and copies
//! select host version/credential files (OS release, audio-server version,
//! display authority token) under the fixed guest metadata directory.

use std::path::{Path, PathBuf};

use rootlet_common::constants::{
    GUEST_META_DIR, HOST_AUDIO_VERSION_FILE, HOST_RELEASE_FILE, HOST_USER_DIR,
};
use rootlet_common::error::{Result, RootletError};
use rootlet_common::types::ChrootDescriptor;

/// Refreshes guest metadata for this entry. Individual copy failures are
/// warnings; only an uncreatable metadata directory is an error.
///
/// # Errors
///
/// Returns an error if the metadata directory cannot be created or the
/// name file cannot be written.
pub fn refresh(desc: &ChrootDescriptor) -> Result<()> {
    let meta = desc.root.join(GUEST_META_DIR);
    std::fs::create_dir_all(&meta).map_err(|e| RootletError::Io {
        path: meta.clone(),
        source: e,
    })?;

    let name_file = meta.join("name");
    std::fs::write(&name_file, format!("{}\n", desc.name)).map_err(|e| RootletError::Io {
        path: name_file,
        source: e,
    })?;

    copy_host_file(Path::new(HOST_RELEASE_FILE), &meta.join("host-release"));
    copy_host_file(
        Path::new(HOST_AUDIO_VERSION_FILE),
        &meta.join("audio-version"),
    );
    if let Some(authority) = display_authority_path() {
        copy_host_file(&authority, &meta.join("xauthority"));
    }

    Ok(())
}

/// The host display authority token: `$XAUTHORITY` when set, otherwise the
/// interactive host user's default location.
fn display_authority_path() -> Option<PathBuf> {
    std::env::var_os("XAUTHORITY").map_or_else(
        || {
            let default = Path::new(HOST_USER_DIR).join(".Xauthority");
            default.exists().then_some(default)
        },
        |p| Some(PathBuf::from(p)),
    )
}

fn copy_host_file(source: &Path, dest: &Path) {
    match std::fs::copy(source, dest) {
        Ok(_) => tracing::debug!(source = %source.display(), "refreshed guest copy"),
        Err(e) => tracing::warn!(
            source = %source.display(),
            error = %e,
            "host file not copied into guest"
        ),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn refresh_writes_name_and_tolerates_missing_host_files() {
        let dir = tempfile::tempdir().unwrap();
        let desc = ChrootDescriptor {
            name: "trusty".into(),
            root: dir.path().to_path_buf(),
            release: "stable".into(),
            external_init: false,
            capabilities: BTreeSet::new(),
        };

        refresh(&desc).unwrap();

        let name = std::fs::read_to_string(dir.path().join(GUEST_META_DIR).join("name")).unwrap();
        assert_eq!(name, "trusty\n");
    }
}
