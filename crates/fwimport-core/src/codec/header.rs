//! Yaz0 container header.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

use super::yaz0::DecodeError;

/// Container magic, the first four bytes of every Yaz0 stream.
pub const YAZ0_MAGIC: &[u8; 4] = b"Yaz0";

/// Yaz0 Header (16 bytes / 0x10)
///
/// Group blocks start right after it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Yaz0Header {
    pub decompressed_size: u32,
    pub reserved: [u32; 2],
}

impl Yaz0Header {
    pub const SIZE: usize = 0x10;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < YAZ0_MAGIC.len() {
            return Err(DecodeError::HeaderTooShort {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        if !is_yaz0(data) {
            return Err(DecodeError::InvalidMagic {
                found: [data[0], data[1], data[2], data[3]],
            });
        }
        if data.len() < Self::SIZE {
            return Err(DecodeError::HeaderTooShort {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }

        let mut cursor = Cursor::new(&data[YAZ0_MAGIC.len()..Self::SIZE]);
        Ok(Self {
            decompressed_size: cursor.read_u32::<BigEndian>()?,
            reserved: [
                cursor.read_u32::<BigEndian>()?,
                cursor.read_u32::<BigEndian>()?,
            ],
        })
    }
}

/// Returns true if `data` starts with the Yaz0 magic.
pub fn is_yaz0(data: &[u8]) -> bool {
    data.starts_with(YAZ0_MAGIC)
}
