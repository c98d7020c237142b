//! The atomic publish transaction.
//!
//! A provider snapshot is built in a staging directory under `<folder>` and
//! published by a symlink-then-rename swap: a symlink to the staging
//! directory is created at `<folder>/<name>` and renamed over the publish
//! path `<web>/.well-known/csaf-aggregator/<name>`. Rename is atomic on the
//! same filesystem, so consumers observe either the previous snapshot or the
//! new one, never partial state. The previous snapshot directory is removed
//! only after the swap.

use crate::error::{MirrorError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Subpath below the web root where provider symlinks are published.
pub const AGGREGATOR_SUBDIR: &str = ".well-known/csaf-aggregator";

/// Create a fresh staging directory for a provider, named after the provider
/// and the current time. `<folder>/<name>` itself stays free for the
/// transient symlink of the commit.
pub fn make_staging_dir(folder: &Path, name: &str) -> Result<PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    make_uniq_dir(folder, &format!("{name}-{stamp}"))
}

/// Create a fresh directory `<base>/<name>`, suffixing `-1`, `-2`, … if the
/// plain name is occupied.
pub fn make_uniq_dir(base: &Path, name: &str) -> Result<PathBuf> {
    let mut candidate = base.join(name);
    let mut attempt = 0u32;
    loop {
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                attempt += 1;
                if attempt > 10_000 {
                    return Err(MirrorError::orchestration(format!(
                        "cannot create a unique directory for '{name}' in {}",
                        base.display()
                    )));
                }
                candidate = base.join(format!("{name}-{attempt}"));
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Atomically publish `staging` as the mirror of `name`.
///
/// Failures before the rename leave the previously published snapshot
/// untouched; the caller removes the staging directory on error. Failures
/// after the rename are logged but not rolled back.
pub fn commit(staging: &Path, folder: &Path, web: &Path, name: &str) -> Result<()> {
    let publish_dir = web.join(AGGREGATOR_SUBDIR);
    fs::create_dir_all(&publish_dir)?;
    let publish = publish_dir.join(name);

    // Resolve the currently published snapshot, to be removed later.
    let old_target = match fs::symlink_metadata(&publish) {
        Ok(_) => Some(fs::canonicalize(&publish)?),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };

    // Clear whatever occupies <folder>/<name>.
    let link = folder.join(name);
    match fs::symlink_metadata(&link) {
        Ok(meta) => {
            if meta.is_dir() {
                fs::remove_dir_all(&link)?;
            } else {
                fs::remove_file(&link)?;
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let staging_abs = fs::canonicalize(staging)?;
    debug!(from = %staging_abs.display(), to = %link.display(), "creating symlink");
    std::os::unix::fs::symlink(&staging_abs, &link)?;

    debug!(from = %link.display(), to = %publish.display(), "moving symlink");
    fs::rename(&link, &publish)?;

    // Finally remove the old snapshot.
    if let Some(old) = old_target {
        if old != staging_abs {
            if let Err(err) = fs::remove_dir_all(&old) {
                error!(path = %old.display(), %err, "could not remove old snapshot");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_make_uniq_dir_suffixes() {
        let base = tempdir().unwrap();
        let first = make_uniq_dir(base.path(), "acme").unwrap();
        let second = make_uniq_dir(base.path(), "acme").unwrap();
        assert_eq!(first, base.path().join("acme"));
        assert_eq!(second, base.path().join("acme-1"));
        assert!(first.is_dir());
        assert!(second.is_dir());
    }

    #[test]
    fn test_commit_publishes_symlink() {
        let root = tempdir().unwrap();
        let folder = root.path().join("folder");
        let web = root.path().join("web");
        fs::create_dir_all(&folder).unwrap();
        fs::create_dir_all(&web).unwrap();

        let staging = make_staging_dir(&folder, "acme").unwrap();
        fs::write(staging.join("provider-metadata.json"), b"{}").unwrap();

        commit(&staging, &folder, &web, "acme").unwrap();

        let publish = web.join(AGGREGATOR_SUBDIR).join("acme");
        let meta = fs::symlink_metadata(&publish).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(
            fs::canonicalize(&publish).unwrap(),
            fs::canonicalize(&staging).unwrap()
        );
        assert!(publish.join("provider-metadata.json").is_file());
        // The intermediate symlink was renamed away.
        assert!(fs::symlink_metadata(folder.join("acme")).is_err());
    }

    #[test]
    fn test_commit_replaces_and_reaps_old_snapshot() {
        let root = tempdir().unwrap();
        let folder = root.path().join("folder");
        let web = root.path().join("web");
        fs::create_dir_all(&folder).unwrap();
        fs::create_dir_all(&web).unwrap();

        let first = make_uniq_dir(&folder, "acme-20240101T000000").unwrap();
        fs::write(first.join("marker"), b"one").unwrap();
        commit(&first, &folder, &web, "acme").unwrap();

        let second = make_uniq_dir(&folder, "acme-20240202T000000").unwrap();
        fs::write(second.join("marker"), b"two").unwrap();
        commit(&second, &folder, &web, "acme").unwrap();

        let publish = web.join(AGGREGATOR_SUBDIR).join("acme");
        let marker = fs::read(publish.join("marker")).unwrap();
        assert_eq!(marker, b"two");
        // The first snapshot was reaped after the swap.
        assert!(!first.exists());
        assert!(second.exists());
    }
}
