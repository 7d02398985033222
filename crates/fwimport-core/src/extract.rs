//! Parallel avatar extraction.
//!
//! Every Yaz0 archive under the source directory is an independent unit of
//! work: decode, assemble, write PNG. Units run on a rayon pool and the
//! scheduler only returns once all of them have finished. A unit that fails is
//! counted and dropped; it never affects its siblings.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::codec::{DecodeError, decode_bounded};
use crate::pixel::{AssembleError, PAYLOAD_SIZE, assemble};

pub const DEFAULT_ASSET_EXTENSION: &str = "szs";
pub const DEFAULT_IMAGE_EXTENSION: &str = "png";
/// Largest declared size the scheduler will allocate for one asset.
pub const DEFAULT_MAX_DECODED_SIZE: usize = 64 * PAYLOAD_SIZE;

/// Extraction tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    /// Extension (without dot) of compressed avatar archives.
    pub asset_extension: String,
    /// Extension (without dot) substituted for written images.
    pub image_extension: String,
    /// Dedicated worker count; `None` uses the global rayon pool.
    pub threads: Option<usize>,
    /// Upper bound on a header's declared decompressed size.
    pub max_decoded_size: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            asset_extension: DEFAULT_ASSET_EXTENSION.to_string(),
            image_extension: DEFAULT_IMAGE_EXTENSION.to_string(),
            threads: None,
            max_decoded_size: DEFAULT_MAX_DECODED_SIZE,
        }
    }
}

/// Why a single asset was dropped.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("Assembly failed: {0}")]
    Assemble(#[from] AssembleError),
}

/// Per-batch counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub succeeded: usize,
    pub skipped: usize,
    /// Assets never started because the batch was cancelled.
    pub cancelled: usize,
}

impl ExtractionReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetOutcome {
    Written,
    Skipped,
    Cancelled,
}

/// Fans avatar archives out over a worker pool.
#[derive(Debug, Clone, Default)]
pub struct ExtractionScheduler {
    options: ExtractOptions,
}

impl ExtractionScheduler {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Extract every archive under `source_dir` into `output_dir`.
    pub fn extract_all(&self, source_dir: &Path, output_dir: &Path) -> ExtractionReport {
        let never = AtomicBool::new(false);
        self.extract_all_cancellable(source_dir, output_dir, &never)
    }

    /// Like [`extract_all`](Self::extract_all), but units that have not started
    /// yet are abandoned once `cancel_signal` is set.
    #[instrument(skip_all, fields(source = %source_dir.display(), output = %output_dir.display()))]
    pub fn extract_all_cancellable(
        &self,
        source_dir: &Path,
        output_dir: &Path,
        cancel_signal: &AtomicBool,
    ) -> ExtractionReport {
        let assets = find_files(source_dir, &self.options.asset_extension);
        if assets.is_empty() {
            info!("No avatar archives found");
            return ExtractionReport::default();
        }
        info!(count = assets.len(), "Extracting avatar archives");

        let run = || -> Vec<AssetOutcome> {
            assets
                .par_iter()
                .map(|asset| self.run_unit(source_dir, output_dir, asset, cancel_signal))
                .collect()
        };

        let outcomes = match self.options.threads {
            Some(n) => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                Ok(pool) => pool.install(run),
                Err(e) => {
                    warn!(error = %e, "Cannot build worker pool, using global pool");
                    run()
                }
            },
            None => run(),
        };

        let mut report = ExtractionReport::default();
        for outcome in outcomes {
            match outcome {
                AssetOutcome::Written => report.succeeded += 1,
                AssetOutcome::Skipped => report.skipped += 1,
                AssetOutcome::Cancelled => report.cancelled += 1,
            }
        }

        info!(
            succeeded = report.succeeded,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Avatar extraction finished"
        );
        report
    }

    fn run_unit(
        &self,
        source_dir: &Path,
        output_dir: &Path,
        asset: &Path,
        cancel_signal: &AtomicBool,
    ) -> AssetOutcome {
        if cancel_signal.load(Ordering::Relaxed) {
            return AssetOutcome::Cancelled;
        }

        let target = output_path(source_dir, output_dir, asset, &self.options.image_extension);
        match extract_asset(asset, &target, self.options.max_decoded_size) {
            Ok(()) => {
                debug!(asset = %asset.display(), image = %target.display(), "Wrote avatar");
                AssetOutcome::Written
            }
            Err(e) => {
                debug!(asset = %asset.display(), error = %e, "Skipping avatar");
                AssetOutcome::Skipped
            }
        }
    }
}

/// Decode one archive and write it as a PNG at `target`.
pub fn extract_asset(asset: &Path, target: &Path, max_decoded_size: usize) -> Result<(), AssetError> {
    let data = fs::read(asset)?;
    let payload = decode_bounded(&data, max_decoded_size)?;
    let grid = assemble(payload)?;
    grid.write_png(target)?;
    Ok(())
}

/// Images previously written under `dir`, sorted by path.
pub fn list_images(dir: &Path, image_extension: &str) -> Vec<PathBuf> {
    find_files(dir, image_extension)
}

fn output_path(source_dir: &Path, output_dir: &Path, asset: &Path, image_extension: &str) -> PathBuf {
    let relative = asset.strip_prefix(source_dir).unwrap_or(asset);
    output_dir.join(relative).with_extension(image_extension)
}

/// Recursively collect files under `root` with the given extension.
fn find_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    let extension = OsStr::new(extension);
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot read directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                pending.push(path);
            } else if path.extension() == Some(extension) && path.is_file() {
                found.push(path);
            }
        }
    }

    found.sort();
    found
}
