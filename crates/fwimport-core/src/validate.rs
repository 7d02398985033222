//! Structural firmware validation.
//!
//! A firmware dump is a flat directory of NCA containers. Anything else in it
//! means the archive was not a firmware dump. The version lookup itself is left
//! to the introspector.

use std::fmt;
use std::fs;
use std::path::Path;

use tracing::{debug, info, instrument, warn};

use crate::introspect::FirmwareIntrospector;

/// File name suffix of firmware container entries.
pub const CONTAINER_EXTENSION: &str = ".nca";

/// Outcome of validating one unpacked firmware directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareValidity {
    Valid { version: String },
    Invalid,
}

impl FirmwareValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, FirmwareValidity::Valid { .. })
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            FirmwareValidity::Valid { version } => Some(version),
            FirmwareValidity::Invalid => None,
        }
    }
}

impl fmt::Display for FirmwareValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareValidity::Valid { version } => write!(f, "valid ({})", version),
            FirmwareValidity::Invalid => write!(f, "invalid"),
        }
    }
}

/// Entry counts of a candidate firmware directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryCensus {
    pub total: usize,
    pub containers: usize,
}

impl EntryCensus {
    /// Count the direct entries of `dir`.
    pub fn of(dir: &Path) -> std::io::Result<Self> {
        let mut census = Self::default();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            census.total += 1;
            if entry
                .file_name()
                .to_string_lossy()
                .ends_with(CONTAINER_EXTENSION)
            {
                census.containers += 1;
            }
        }
        Ok(census)
    }

    pub fn only_containers(&self) -> bool {
        self.total == self.containers
    }
}

/// Decide whether `dir` holds a firmware dump and which version it is.
#[instrument(skip(dir, keys_dir, introspector), fields(dir = %dir.display()))]
pub fn validate(
    dir: &Path,
    keys_dir: &Path,
    introspector: &dyn FirmwareIntrospector,
) -> FirmwareValidity {
    let census = match EntryCensus::of(dir) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Cannot list firmware directory");
            return FirmwareValidity::Invalid;
        }
    };
    debug!(
        total = census.total,
        containers = census.containers,
        "Counted firmware entries"
    );

    if !census.only_containers() {
        info!(
            stray = census.total - census.containers,
            "Directory contains non-container entries"
        );
        return FirmwareValidity::Invalid;
    }

    match introspector.firmware_version(dir, keys_dir) {
        Ok(version) if !version.is_empty() => {
            info!(version = %version, "Firmware version found");
            FirmwareValidity::Valid { version }
        }
        Ok(_) => {
            info!("No firmware version found");
            FirmwareValidity::Invalid
        }
        Err(e) => {
            warn!(error = %e, "Firmware version lookup failed");
            FirmwareValidity::Invalid
        }
    }
}
