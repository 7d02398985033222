//! Firmware import - high-level orchestrator for the whole flow.
//!
//! unpack into scratch → validate → publish → fonts → avatars. The scratch
//! directory is a [`tempfile::TempDir`], so it is removed on every exit path.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::ImportConfig;
use crate::events::{ImportEvent, ImportObserver, ImportPhase, TracingObserver};
use crate::extract::{ExtractionReport, ExtractionScheduler};
use crate::introspect::FirmwareIntrospector;
use crate::store::{FirmwareStore, StoreError};
use crate::unpack::{ArchiveUnpacker, ReadSeek, UnpackError};
use crate::validate::{FirmwareValidity, validate};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to unpack archive: {0}")]
    Unpack(#[from] UnpackError),

    #[error("Archive does not contain a valid firmware")]
    InvalidFirmware,

    #[error("Failed to commit firmware: {0}")]
    Commit(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Import cancelled")]
    Cancelled,
}

/// What a successful import did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub version: String,
    pub unpacked_files: usize,
    pub fonts_extracted: bool,
    pub avatars: ExtractionReport,
}

/// Firmware importer - owns the collaborators and runs imports.
pub struct FirmwareImporter<O: ImportObserver> {
    config: ImportConfig,
    introspector: Arc<dyn FirmwareIntrospector>,
    unpacker: Box<dyn ArchiveUnpacker>,
    observer: Arc<O>,
    store: FirmwareStore,
    scheduler: ExtractionScheduler,
    cancel: Arc<AtomicBool>,
}

impl FirmwareImporter<TracingObserver> {
    /// Create an importer with the default tracing observer.
    pub fn new(
        config: ImportConfig,
        introspector: Arc<dyn FirmwareIntrospector>,
        unpacker: Box<dyn ArchiveUnpacker>,
    ) -> Self {
        Self::with_observer(config, introspector, unpacker, Arc::new(TracingObserver))
    }
}

impl<O: ImportObserver> FirmwareImporter<O> {
    /// Create an importer with a custom observer.
    pub fn with_observer(
        config: ImportConfig,
        introspector: Arc<dyn FirmwareIntrospector>,
        unpacker: Box<dyn ArchiveUnpacker>,
        observer: Arc<O>,
    ) -> Self {
        let store = FirmwareStore::new(&config.firmware_dir, &config.version_file);
        let scheduler = ExtractionScheduler::new(config.extract.clone());
        Self {
            config,
            introspector,
            unpacker,
            observer,
            store,
            scheduler,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn store(&self) -> &FirmwareStore {
        &self.store
    }

    /// Shared flag that cancels the running import when set.
    ///
    /// Checked between phases and before each avatar. Before the commit a
    /// cancellation aborts with [`ImportError::Cancelled`]; afterwards it only
    /// stops the remaining avatar work. The flag is cleared when an import ends.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn installed_version(&self) -> Result<Option<String>, StoreError> {
        self.store.installed_version()
    }

    pub fn keys_available(&self) -> bool {
        self.config.keys_available()
    }

    /// Import the archive at `path`.
    pub fn import_file(&self, path: &Path) -> Result<ImportSummary, ImportError> {
        let file = File::open(path).map_err(UnpackError::from)?;
        self.import(&mut BufReader::new(file))
    }

    /// Run a complete import from an archive stream.
    #[instrument(skip_all)]
    pub fn import(&self, archive: &mut dyn ReadSeek) -> Result<ImportSummary, ImportError> {
        let mut phase = ImportPhase::Unpacking;
        self.observer.on_event(&ImportEvent::PhaseChanged {
            from: phase,
            to: phase,
        });

        let result = self.run(archive, &mut phase);
        self.cancel.store(false, Ordering::Relaxed);

        if let Err(e) = &result {
            warn!(phase = %phase, error = %e, "Import failed");
            self.observer.on_event(&ImportEvent::Error {
                message: e.to_string(),
            });
            self.transition(&mut phase, ImportPhase::Failed);
        }
        result
    }

    fn run(
        &self,
        archive: &mut dyn ReadSeek,
        phase: &mut ImportPhase,
    ) -> Result<ImportSummary, ImportError> {
        fs::create_dir_all(&self.config.scratch_root)?;
        let scratch = tempfile::Builder::new()
            .prefix("import-")
            .tempdir_in(&self.config.scratch_root)?;

        let unpacked_files = self.unpacker.unpack(archive, scratch.path())?;
        self.observer.on_event(&ImportEvent::Unpacked {
            files: unpacked_files,
        });
        self.check_cancelled()?;

        self.transition(phase, ImportPhase::Validating);
        let version = match validate(
            scratch.path(),
            &self.config.keys_dir,
            self.introspector.as_ref(),
        ) {
            FirmwareValidity::Valid { version } => version,
            FirmwareValidity::Invalid => return Err(ImportError::InvalidFirmware),
        };
        self.observer.on_event(&ImportEvent::VersionDetected {
            version: version.clone(),
        });
        self.check_cancelled()?;

        self.transition(phase, ImportPhase::Committing);
        self.store.commit(scratch.path(), &version)?;
        self.observer.on_event(&ImportEvent::Committed {
            path: self.config.firmware_dir.clone(),
        });
        if let Err(e) = scratch.close() {
            warn!(error = %e, "Cannot remove scratch directory");
        }

        let firmware_dir = &self.config.firmware_dir;
        let keys_dir = &self.config.keys_dir;

        self.transition(phase, ImportPhase::Fonts);
        let fonts_extracted =
            match self
                .introspector
                .extract_fonts(firmware_dir, keys_dir, &self.config.fonts_dir)
            {
                Ok(()) => true,
                Err(e) => {
                    self.step_failed(*phase, e.to_string());
                    false
                }
            };

        self.transition(phase, ImportPhase::Avatars);
        if let Err(e) =
            self.introspector
                .extract_avatar_assets(firmware_dir, keys_dir, &self.config.avatar_dir)
        {
            self.step_failed(*phase, e.to_string());
        }
        let avatars = self.scheduler.extract_all_cancellable(
            &self.config.avatar_dir,
            &self.config.avatar_dir,
            &self.cancel,
        );
        self.observer
            .on_event(&ImportEvent::AvatarsExtracted { report: avatars });

        self.transition(phase, ImportPhase::Complete);
        self.observer.on_event(&ImportEvent::Complete {
            version: version.clone(),
        });
        info!(version = %version, "Firmware imported");

        Ok(ImportSummary {
            version,
            unpacked_files,
            fonts_extracted,
            avatars,
        })
    }

    fn transition(&self, phase: &mut ImportPhase, to: ImportPhase) {
        self.observer.on_event(&ImportEvent::PhaseChanged { from: *phase, to });
        *phase = to;
    }

    fn step_failed(&self, phase: ImportPhase, message: String) {
        warn!(phase = %phase, error = %message, "Best-effort step failed");
        self.observer
            .on_event(&ImportEvent::StepFailed { phase, message });
    }

    fn check_cancelled(&self) -> Result<(), ImportError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(ImportError::Cancelled);
        }
        Ok(())
    }
}
