//! Archive unpacking.
//!
//! The importer only needs "unpack this archive into that directory". The
//! [`ArchiveUnpacker`] trait is that seam; [`ZipUnpacker`] is the bundled
//! adapter for the zip files firmware dumps are usually shipped in.

pub mod traits;
pub mod zip;

pub use traits::{ArchiveUnpacker, ReadSeek, UnpackError};
pub use zip::ZipUnpacker;
