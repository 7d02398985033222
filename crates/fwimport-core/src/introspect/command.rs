//! Introspector backed by external command-line tools.
//!
//! Each operation is a configured argv. The placeholders `{firmware}`, `{keys}`
//! and `{output}` are replaced with the corresponding paths before launch. The
//! version tool prints the version on stdout; the other tools are judged by
//! their exit status only.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::traits::{FirmwareIntrospector, IntrospectError};

/// Argv templates for the external tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandIntrospectorConfig {
    /// Prints the firmware version, e.g. `["fwtool", "version", "{firmware}", "--keys", "{keys}"]`.
    pub version_command: Vec<String>,
    /// Extracts shared fonts into `{output}`.
    pub fonts_command: Vec<String>,
    /// Extracts Yaz0 avatar archives into `{output}`. Optional.
    pub avatar_command: Vec<String>,
}

/// Runs the configured tools for every introspection request.
#[derive(Debug, Clone)]
pub struct CommandIntrospector {
    config: CommandIntrospectorConfig,
}

impl CommandIntrospector {
    pub fn new(config: CommandIntrospectorConfig) -> Self {
        Self { config }
    }

    #[instrument(skip(self, argv), fields(program = argv.first().map(String::as_str).unwrap_or("")))]
    fn run(
        &self,
        argv: &[String],
        firmware_dir: &Path,
        keys_dir: &Path,
        output_dir: Option<&Path>,
    ) -> Result<String, IntrospectError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| IntrospectError::NotConfigured("empty command".into()))?;

        let args: Vec<String> = args
            .iter()
            .map(|arg| expand(arg, firmware_dir, keys_dir, output_dir))
            .collect();
        debug!(?args, "Launching introspection tool");

        let output = Command::new(program)
            .args(&args)
            .output()
            .map_err(|source| IntrospectError::Launch {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(IntrospectError::ToolFailed {
                program: program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8(output.stdout).map_err(|_| IntrospectError::InvalidOutput)?;
        Ok(stdout.trim().to_string())
    }
}

fn expand(arg: &str, firmware_dir: &Path, keys_dir: &Path, output_dir: Option<&Path>) -> String {
    let mut arg = arg
        .replace("{firmware}", &firmware_dir.to_string_lossy())
        .replace("{keys}", &keys_dir.to_string_lossy());
    if let Some(output) = output_dir {
        arg = arg.replace("{output}", &output.to_string_lossy());
    }
    arg
}

impl FirmwareIntrospector for CommandIntrospector {
    fn firmware_version(
        &self,
        firmware_dir: &Path,
        keys_dir: &Path,
    ) -> Result<String, IntrospectError> {
        if self.config.version_command.is_empty() {
            return Err(IntrospectError::NotConfigured("version_command".into()));
        }
        self.run(&self.config.version_command, firmware_dir, keys_dir, None)
    }

    fn extract_fonts(
        &self,
        firmware_dir: &Path,
        keys_dir: &Path,
        output_dir: &Path,
    ) -> Result<(), IntrospectError> {
        if self.config.fonts_command.is_empty() {
            return Err(IntrospectError::NotConfigured("fonts_command".into()));
        }
        std::fs::create_dir_all(output_dir)?;
        self.run(
            &self.config.fonts_command,
            firmware_dir,
            keys_dir,
            Some(output_dir),
        )
        .map(|_| ())
    }

    fn extract_avatar_assets(
        &self,
        firmware_dir: &Path,
        keys_dir: &Path,
        avatar_dir: &Path,
    ) -> Result<(), IntrospectError> {
        if self.config.avatar_command.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(avatar_dir)?;
        self.run(
            &self.config.avatar_command,
            firmware_dir,
            keys_dir,
            Some(avatar_dir),
        )
        .map(|_| ())
    }
}
