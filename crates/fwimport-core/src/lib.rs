//! fwimport-core: console firmware import and avatar extraction.
//!
//! This crate takes a firmware dump archive, checks that it really is a
//! firmware dump, installs it, and decodes the Yaz0-compressed avatar images it
//! ships into PNG files.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Codec**: Yaz0 header parsing and decompression
//! - **Pixel**: avatar payload → 256×256 ARGB grid → PNG
//! - **Validate**: structural firmware check plus version lookup
//! - **Extract**: parallel avatar extraction on a rayon pool
//! - **Introspect**: firmware introspection collaborator (external tools, mock)
//! - **Unpack**: archive unpacking collaborator (zip, mock-able)
//! - **Store**: committed firmware tree with atomic publish
//! - **Events**: Observer pattern for UI decoupling
//! - **Import**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use fwimport_core::{
//!     CommandIntrospector, CommandIntrospectorConfig, FirmwareImporter, ImportConfig, ZipUnpacker,
//! };
//!
//! let config = ImportConfig::with_root("/var/lib/emu");
//! let introspector = CommandIntrospector::new(CommandIntrospectorConfig {
//!     version_command: vec!["fwtool".into(), "version".into(), "{firmware}".into()],
//!     fonts_command: vec!["fwtool".into(), "fonts".into(), "{firmware}".into(), "{output}".into()],
//!     ..Default::default()
//! });
//!
//! let importer = FirmwareImporter::new(config, Arc::new(introspector), Box::new(ZipUnpacker::new()));
//! let summary = importer.import_file(Path::new("firmware.zip")).expect("import failed");
//! println!("Installed firmware {}", summary.version);
//! ```

pub mod codec;
pub mod config;
pub mod events;
pub mod extract;
pub mod import;
pub mod introspect;
pub mod pixel;
pub mod store;
pub mod unpack;
pub mod validate;

// Re-exports for convenience
pub use codec::{DecodeError, DecodedPayload, Yaz0Header, decode, decode_bounded, is_yaz0};
pub use config::ImportConfig;
pub use events::{ImportEvent, ImportObserver, ImportPhase, NullObserver, TracingObserver};
pub use extract::{
    AssetError, ExtractOptions, ExtractionReport, ExtractionScheduler, extract_asset, list_images,
};
pub use import::{FirmwareImporter, ImportError, ImportSummary};
pub use introspect::{
    CommandIntrospector, CommandIntrospectorConfig, FirmwareIntrospector, IntrospectError,
    MockIntrospector,
};
pub use pixel::{AssembleError, PixelGrid, assemble};
pub use store::{FirmwareStore, StoreError};
pub use unpack::{ArchiveUnpacker, ReadSeek, UnpackError, ZipUnpacker};
pub use validate::{EntryCensus, FirmwareValidity, validate};
