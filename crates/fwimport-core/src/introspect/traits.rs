//! Firmware introspection abstraction.
//!
//! Reading anything out of the firmware containers needs console keys and
//! native container parsing, neither of which lives in this crate. The
//! `FirmwareIntrospector` trait is the narrow seam to that service.

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntrospectError {
    #[error("Introspection tool not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Tool output is not valid UTF-8")]
    InvalidOutput,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract firmware introspection service.
///
/// This trait enables:
/// - External-tool implementation ([`CommandIntrospector`](super::CommandIntrospector))
/// - Mock implementation for unit testing
pub trait FirmwareIntrospector: Send + Sync {
    /// Look up the firmware version stored in `firmware_dir`.
    ///
    /// An empty string means no version could be found.
    fn firmware_version(
        &self,
        firmware_dir: &Path,
        keys_dir: &Path,
    ) -> Result<String, IntrospectError>;

    /// Extract the shared system fonts into `output_dir`.
    fn extract_fonts(
        &self,
        firmware_dir: &Path,
        keys_dir: &Path,
        output_dir: &Path,
    ) -> Result<(), IntrospectError>;

    /// Extract the compressed avatar archives into `avatar_dir`.
    ///
    /// Optional; the default leaves `avatar_dir` as it is.
    fn extract_avatar_assets(
        &self,
        _firmware_dir: &Path,
        _keys_dir: &Path,
        _avatar_dir: &Path,
    ) -> Result<(), IntrospectError> {
        Ok(())
    }
}

impl<T: FirmwareIntrospector + ?Sized> FirmwareIntrospector for std::sync::Arc<T> {
    fn firmware_version(
        &self,
        firmware_dir: &Path,
        keys_dir: &Path,
    ) -> Result<String, IntrospectError> {
        (**self).firmware_version(firmware_dir, keys_dir)
    }

    fn extract_fonts(
        &self,
        firmware_dir: &Path,
        keys_dir: &Path,
        output_dir: &Path,
    ) -> Result<(), IntrospectError> {
        (**self).extract_fonts(firmware_dir, keys_dir, output_dir)
    }

    fn extract_avatar_assets(
        &self,
        firmware_dir: &Path,
        keys_dir: &Path,
        avatar_dir: &Path,
    ) -> Result<(), IntrospectError> {
        (**self).extract_avatar_assets(firmware_dir, keys_dir, avatar_dir)
    }
}
