//! Committed firmware storage.
//!
//! Publishing never edits the committed tree in place. The new tree is copied
//! into a sibling staging directory, the current tree is renamed aside, and
//! the staging directory is renamed into place. A crash between the two
//! renames leaves the previous tree in the `.old` sibling, which
//! [`FirmwareStore::recover_interrupted_publish`] puts back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Invalid firmware location: {0}")]
    InvalidLocation(PathBuf),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Owns the committed firmware directory and the persisted version string.
#[derive(Debug)]
pub struct FirmwareStore {
    firmware_dir: PathBuf,
    version_file: PathBuf,
    lock: Mutex<()>,
}

impl FirmwareStore {
    pub fn new(firmware_dir: impl Into<PathBuf>, version_file: impl Into<PathBuf>) -> Self {
        Self {
            firmware_dir: firmware_dir.into(),
            version_file: version_file.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn firmware_dir(&self) -> &Path {
        &self.firmware_dir
    }

    pub fn version_file(&self) -> &Path {
        &self.version_file
    }

    pub fn is_installed(&self) -> bool {
        self.firmware_dir.is_dir()
    }

    fn sibling(&self, suffix: &str) -> Result<PathBuf, StoreError> {
        let (Some(parent), Some(name)) = (self.firmware_dir.parent(), self.firmware_dir.file_name())
        else {
            return Err(StoreError::InvalidLocation(self.firmware_dir.clone()));
        };
        Ok(parent.join(format!(".{}.{}", name.to_string_lossy(), suffix)))
    }

    fn staging_dir(&self) -> Result<PathBuf, StoreError> {
        self.sibling("staging")
    }

    fn old_dir(&self) -> Result<PathBuf, StoreError> {
        self.sibling("old")
    }

    /// Replace the committed tree with a copy of `source`.
    #[instrument(skip(self), fields(source = %source.display(), target = %self.firmware_dir.display()))]
    pub fn publish(&self, source: &Path) -> Result<(), StoreError> {
        if !source.is_dir() {
            return Err(StoreError::NotADirectory(source.to_path_buf()));
        }
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.recover_locked()?;

        let staging = self.staging_dir()?;
        let old = self.old_dir()?;
        if let Some(parent) = self.firmware_dir.parent() {
            fs::create_dir_all(parent)?;
        }

        let files = copy_tree(source, &staging)?;
        debug!(files, staging = %staging.display(), "Staged firmware");

        let had_previous = swap_in(&staging, &self.firmware_dir, &old, |from, to| {
            fs::rename(from, to)
        })?;

        if had_previous && let Err(e) = fs::remove_dir_all(&old) {
            warn!(path = %old.display(), error = %e, "Cannot remove previous firmware");
        }

        info!(files, "Firmware published");
        Ok(())
    }

    /// Undo the traces of a publish that did not finish.
    ///
    /// Returns `true` when a previous tree had to be moved back into place.
    pub fn recover_interrupted_publish(&self) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.recover_locked()
    }

    fn recover_locked(&self) -> Result<bool, StoreError> {
        let staging = self.staging_dir()?;
        let old = self.old_dir()?;
        let mut restored = false;

        if old.exists() {
            if self.firmware_dir.exists() {
                debug!(path = %old.display(), "Removing leftover previous firmware");
                fs::remove_dir_all(&old)?;
            } else {
                warn!("Restoring firmware from interrupted publish");
                fs::rename(&old, &self.firmware_dir)?;
                restored = true;
            }
        }

        if staging.exists() {
            debug!(path = %staging.display(), "Removing leftover staging directory");
            fs::remove_dir_all(&staging)?;
        }

        Ok(restored)
    }

    /// Publish `source` and record `version` as installed.
    ///
    /// The version is written to a temp file before the tree is touched, so a
    /// failure to write it leaves the previous firmware in place. Once the
    /// tree is replaced only the final rename of the version file remains;
    /// if that fails the firmware stays published and the mismatch is logged.
    pub fn commit(&self, source: &Path, version: &str) -> Result<(), StoreError> {
        let staged = self.stage_version(version)?;
        if let Err(e) = self.publish(source) {
            let _ = fs::remove_file(&staged);
            return Err(e);
        }
        if let Err(e) = fs::rename(&staged, &self.version_file) {
            warn!(
                version,
                path = %self.version_file.display(),
                error = %e,
                "Firmware published but version file not updated"
            );
        }
        Ok(())
    }

    /// Atomically write the installed firmware version.
    pub fn persist_version(&self, version: &str) -> Result<(), StoreError> {
        let staged = self.stage_version(version)?;
        fs::rename(&staged, &self.version_file)?;
        debug!(version, "Persisted firmware version");
        Ok(())
    }

    fn stage_version(&self, version: &str) -> Result<PathBuf, StoreError> {
        if let Some(parent) = self.version_file.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.version_file.with_extension("tmp");
        fs::write(&tmp, version)?;
        Ok(tmp)
    }

    /// The persisted version, if any.
    pub fn installed_version(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(&self.version_file) {
            Ok(content) => {
                let version = content.trim();
                Ok((!version.is_empty()).then(|| version.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Rename `staging` onto `target`, parking any current tree at `old`.
///
/// Returns whether a previous tree was parked. If the second rename fails the
/// previous tree is moved back and staging is dropped.
fn swap_in(
    staging: &Path,
    target: &Path,
    old: &Path,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> io::Result<bool> {
    let had_previous = target.exists();
    if had_previous {
        rename(target, old)?;
    }

    if let Err(e) = rename(staging, target) {
        if had_previous && let Err(undo) = rename(old, target) {
            warn!(error = %undo, "Cannot restore previous firmware");
        }
        let _ = fs::remove_dir_all(staging);
        return Err(e);
    }
    Ok(had_previous)
}

/// Recursively copy `src` into a fresh `dst`. Returns the number of files.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<usize> {
    fs::create_dir_all(dst)?;
    let mut files = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            files += copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &Path) -> FirmwareStore {
        FirmwareStore::new(
            root.join("system/registered"),
            root.join("firmware_version"),
        )
    }

    fn tree(root: &Path, files: &[(&str, &[u8])]) {
        for (name, data) in files {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, data).unwrap();
        }
    }

    fn siblings(store: &FirmwareStore) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(store.firmware_dir().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_publish_into_empty_store() {
        let root = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        tree(src.path(), &[("a.nca", b"a"), ("b.nca", b"b")]);

        let store = store(root.path());
        assert!(!store.is_installed());
        store.publish(src.path()).unwrap();

        assert!(store.is_installed());
        assert_eq!(fs::read(store.firmware_dir().join("a.nca")).unwrap(), b"a");
        assert_eq!(siblings(&store), vec!["registered"]);
        // source is left intact
        assert!(src.path().join("b.nca").exists());
    }

    #[test]
    fn test_publish_replaces_whole_tree() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());

        let first = tempfile::tempdir().unwrap();
        tree(first.path(), &[("old.nca", b"1"), ("nested/deep.nca", b"1")]);
        store.publish(first.path()).unwrap();

        let second = tempfile::tempdir().unwrap();
        tree(second.path(), &[("new.nca", b"2")]);
        store.publish(second.path()).unwrap();

        let dir = store.firmware_dir();
        assert!(dir.join("new.nca").exists());
        assert!(!dir.join("old.nca").exists());
        assert!(!dir.join("nested").exists());
        assert_eq!(siblings(&store), vec!["registered"]);
    }

    #[test]
    fn test_publish_rejects_missing_source() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        assert!(matches!(
            store.publish(&root.path().join("absent")),
            Err(StoreError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_recover_restores_previous_tree() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        // Crash after the committed tree was renamed aside.
        tree(
            &root.path().join("system/.registered.old"),
            &[("kept.nca", b"k")],
        );
        tree(
            &root.path().join("system/.registered.staging"),
            &[("half.nca", b"h")],
        );

        assert!(store.recover_interrupted_publish().unwrap());
        assert!(store.firmware_dir().join("kept.nca").exists());
        assert_eq!(siblings(&store), vec!["registered"]);
        assert!(!store.recover_interrupted_publish().unwrap());
    }

    #[test]
    fn test_recover_drops_stale_old_tree() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        tree(store.firmware_dir(), &[("current.nca", b"c")]);
        tree(
            &root.path().join("system/.registered.old"),
            &[("stale.nca", b"s")],
        );

        assert!(!store.recover_interrupted_publish().unwrap());
        assert!(store.firmware_dir().join("current.nca").exists());
        assert_eq!(siblings(&store), vec!["registered"]);
    }

    #[test]
    fn test_version_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        assert_eq!(store.installed_version().unwrap(), None);

        store.persist_version("17.0.1").unwrap();
        assert_eq!(store.installed_version().unwrap().as_deref(), Some("17.0.1"));
        assert!(!root.path().join("firmware_version.tmp").exists());

        store.persist_version("18.0.0").unwrap();
        assert_eq!(store.installed_version().unwrap().as_deref(), Some("18.0.0"));
    }

    #[test]
    fn test_failed_swap_restores_previous_tree() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("registered");
        let staging = root.path().join(".registered.staging");
        let old = root.path().join(".registered.old");
        tree(&target, &[("kept.nca", b"k")]);
        tree(&staging, &[("new.nca", b"n")]);

        let err = swap_in(&staging, &target, &old, |from, to| {
            if from == staging.as_path() {
                Err(io::Error::other("rename refused"))
            } else {
                fs::rename(from, to)
            }
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "rename refused");
        assert!(target.join("kept.nca").exists());
        assert!(!target.join("new.nca").exists());
        assert!(!old.exists());
        assert!(!staging.exists());
    }

    #[test]
    fn test_commit_records_version() {
        let root = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        tree(src.path(), &[("a.nca", b"a")]);

        let store = store(root.path());
        store.commit(src.path(), "17.0.0").unwrap();

        assert!(store.firmware_dir().join("a.nca").exists());
        assert_eq!(store.installed_version().unwrap().as_deref(), Some("17.0.0"));
        assert!(!root.path().join("firmware_version.tmp").exists());
    }

    #[test]
    fn test_commit_leaves_tree_when_version_cannot_be_written() {
        let root = tempfile::tempdir().unwrap();
        // A regular file where the version file's directory should be.
        fs::write(root.path().join("state"), b"").unwrap();
        let store = FirmwareStore::new(
            root.path().join("system/registered"),
            root.path().join("state/firmware_version"),
        );
        tree(store.firmware_dir(), &[("old.nca", b"o")]);

        let src = tempfile::tempdir().unwrap();
        tree(src.path(), &[("new.nca", b"n")]);

        assert!(matches!(
            store.commit(src.path(), "18.0.0"),
            Err(StoreError::Io(_))
        ));
        assert!(store.firmware_dir().join("old.nca").exists());
        assert!(!store.firmware_dir().join("new.nca").exists());
    }
}
