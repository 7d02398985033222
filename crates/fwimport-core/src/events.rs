//! Event system for UI decoupling.
//!
//! Lets a CLI or GUI follow an import without being coupled to the core logic.

use std::fmt;
use std::path::PathBuf;

use crate::extract::ExtractionReport;

/// Import phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    /// Unpacking the archive into scratch.
    Unpacking,
    /// Checking the unpacked tree and looking up its version.
    Validating,
    /// Publishing the validated tree.
    Committing,
    /// Extracting shared fonts.
    Fonts,
    /// Decoding avatar images.
    Avatars,
    /// All steps finished.
    Complete,
    /// The import stopped with an error.
    Failed,
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportPhase::Unpacking => write!(f, "Unpacking"),
            ImportPhase::Validating => write!(f, "Validating"),
            ImportPhase::Committing => write!(f, "Committing"),
            ImportPhase::Fonts => write!(f, "Fonts"),
            ImportPhase::Avatars => write!(f, "Avatars"),
            ImportPhase::Complete => write!(f, "Complete"),
            ImportPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Events emitted by the importer.
#[derive(Debug, Clone)]
pub enum ImportEvent {
    /// Phase changed.
    PhaseChanged { from: ImportPhase, to: ImportPhase },
    /// Archive unpacked into scratch.
    Unpacked { files: usize },
    /// Validation found a firmware version.
    VersionDetected { version: String },
    /// Firmware tree published.
    Committed { path: PathBuf },
    /// A best-effort step failed; the import continues.
    StepFailed { phase: ImportPhase, message: String },
    /// Avatar extraction finished.
    AvatarsExtracted { report: ExtractionReport },
    /// Import failed.
    Error { message: String },
    /// Import completed successfully.
    Complete { version: String },
}

/// Observer trait for receiving import events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait ImportObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &ImportEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl ImportObserver for NullObserver {
    fn on_event(&self, _event: &ImportEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl ImportObserver for TracingObserver {
    fn on_event(&self, event: &ImportEvent) {
        match event {
            ImportEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            ImportEvent::Unpacked { files } => {
                tracing::debug!(files, "Archive unpacked");
            }
            ImportEvent::VersionDetected { version } => {
                tracing::info!(version = %version, "Firmware version detected");
            }
            ImportEvent::Committed { path } => {
                tracing::info!(path = %path.display(), "Firmware committed");
            }
            ImportEvent::StepFailed { phase, message } => {
                tracing::warn!(phase = %phase, "Step failed: {}", message);
            }
            ImportEvent::AvatarsExtracted { report } => {
                tracing::info!(
                    succeeded = report.succeeded,
                    skipped = report.skipped,
                    cancelled = report.cancelled,
                    "Avatars extracted"
                );
            }
            ImportEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            ImportEvent::Complete { version } => {
                tracing::info!(version = %version, "Import complete");
            }
        }
    }
}
