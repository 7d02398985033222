//! Mock introspector for testing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::traits::{FirmwareIntrospector, IntrospectError};

/// Mock introspector for exercising validation and import logic.
#[derive(Clone, Default)]
pub struct MockIntrospector {
    /// Version reported for every firmware directory.
    version: Arc<Mutex<String>>,
    /// Firmware directories passed to `firmware_version`.
    version_calls: Arc<Mutex<Vec<PathBuf>>>,
    /// Output directories passed to `extract_fonts`.
    font_calls: Arc<Mutex<Vec<PathBuf>>>,
    /// Avatar archives written by `extract_avatar_assets` (relative path, bytes).
    avatar_assets: Arc<Mutex<Vec<(PathBuf, Vec<u8>)>>>,
    /// Whether font extraction reports an error.
    fail_fonts: Arc<Mutex<bool>>,
}

impl MockIntrospector {
    /// Mock that finds no version.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock that reports `version` for any directory.
    pub fn with_version(version: &str) -> Self {
        let mock = Self::new();
        mock.set_version(version);
        mock
    }

    pub fn set_version(&self, version: &str) {
        *self.version.lock().unwrap() = version.to_string();
    }

    /// Queue an avatar archive to be dropped into the avatar directory.
    pub fn add_avatar_asset(&self, relative: impl Into<PathBuf>, data: Vec<u8>) {
        self.avatar_assets
            .lock()
            .unwrap()
            .push((relative.into(), data));
    }

    /// Make `extract_fonts` fail.
    pub fn fail_font_extraction(&self) {
        *self.fail_fonts.lock().unwrap() = true;
    }

    pub fn version_calls(&self) -> Vec<PathBuf> {
        self.version_calls.lock().unwrap().clone()
    }

    pub fn font_calls(&self) -> Vec<PathBuf> {
        self.font_calls.lock().unwrap().clone()
    }
}

impl FirmwareIntrospector for MockIntrospector {
    fn firmware_version(
        &self,
        firmware_dir: &Path,
        _keys_dir: &Path,
    ) -> Result<String, IntrospectError> {
        self.version_calls
            .lock()
            .unwrap()
            .push(firmware_dir.to_path_buf());
        Ok(self.version.lock().unwrap().clone())
    }

    fn extract_fonts(
        &self,
        _firmware_dir: &Path,
        _keys_dir: &Path,
        output_dir: &Path,
    ) -> Result<(), IntrospectError> {
        self.font_calls
            .lock()
            .unwrap()
            .push(output_dir.to_path_buf());
        if *self.fail_fonts.lock().unwrap() {
            return Err(IntrospectError::NotConfigured("mock font failure".into()));
        }
        Ok(())
    }

    fn extract_avatar_assets(
        &self,
        _firmware_dir: &Path,
        _keys_dir: &Path,
        avatar_dir: &Path,
    ) -> Result<(), IntrospectError> {
        for (relative, data) in self.avatar_assets.lock().unwrap().iter() {
            let path = avatar_dir.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, data)?;
        }
        Ok(())
    }
}
