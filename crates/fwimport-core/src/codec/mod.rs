//! Yaz0 decompression.
//!
//! Yaz0 is a byte-oriented LZ77 variant used for the avatar image archives
//! shipped inside system firmware. Only the decode direction exists here.
//!
//! ```text
//! 0x00  "Yaz0"
//! 0x04  decompressed size (u32, big-endian)
//! 0x08  reserved (8 bytes)
//! 0x10  group blocks: [control byte][up to 8 units]...
//! ```

pub mod header;
pub mod yaz0;

pub use header::{YAZ0_MAGIC, Yaz0Header, is_yaz0};
pub use yaz0::{DecodeError, DecodedPayload, decode, decode_bounded};
