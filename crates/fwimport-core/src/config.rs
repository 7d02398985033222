//! Importer configuration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::extract::ExtractOptions;
use crate::introspect::CommandIntrospectorConfig;

/// Data root used when nothing else is configured.
pub const DEFAULT_ROOT: &str = "fwimport-data";

/// Where the importer reads and writes, plus tool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Committed firmware directory (registered NCAs).
    pub firmware_dir: PathBuf,
    /// Console key files.
    pub keys_dir: PathBuf,
    /// Shared font output.
    pub fonts_dir: PathBuf,
    /// Compressed avatar archives and the PNGs decoded from them.
    pub avatar_dir: PathBuf,
    /// Parent of per-import scratch directories.
    pub scratch_root: PathBuf,
    /// File holding the installed firmware version.
    pub version_file: PathBuf,
    pub extract: ExtractOptions,
    /// External tools; required by the CLI, unused with an injected introspector.
    pub introspector: Option<CommandIntrospectorConfig>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self::with_root(DEFAULT_ROOT)
    }
}

impl ImportConfig {
    /// Standard layout below `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            firmware_dir: root.join("switch/nand/system/Contents/registered"),
            keys_dir: root.join("keys"),
            fonts_dir: root.join("fonts"),
            avatar_dir: root.join("avatar"),
            scratch_root: root.join("cache"),
            version_file: root.join("firmware_version"),
            extract: ExtractOptions::default(),
            introspector: None,
        }
    }

    /// Whether any key file is present. Imports need keys to read NCAs.
    pub fn keys_available(&self) -> bool {
        fs::read_dir(&self.keys_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ImportConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
