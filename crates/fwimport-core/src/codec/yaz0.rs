//! Yaz0 group-block decoder.

use thiserror::Error;
use tracing::trace;

use super::header::Yaz0Header;

/// Back-references with a zero length nibble take an extra byte, biased by this.
const LONG_COPY_BIAS: usize = 0x12;
/// Short back-reference lengths are biased by this.
const SHORT_COPY_BIAS: usize = 2;

/// Every way a Yaz0 stream can be malformed. All of them mean "invalid format";
/// the variants only exist to make logs useful.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid Yaz0 magic: {found:02X?}")]
    InvalidMagic { found: [u8; 4] },
    #[error("Header too short: expected {expected} bytes, got {actual}")]
    HeaderTooShort { expected: usize, actual: usize },
    #[error("Truncated stream at input offset {offset}: produced {produced} of {expected} bytes")]
    Truncated {
        offset: usize,
        produced: usize,
        expected: usize,
    },
    #[error("Back-reference {distance} bytes behind output position {position}")]
    DistanceOutOfRange { distance: usize, position: usize },
    #[error("Declared size {declared} exceeds limit {limit}")]
    SizeLimitExceeded { declared: usize, limit: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decompressed bytes; length always equals the size declared in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload(Vec<u8>);

impl DecodedPayload {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for DecodedPayload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Bounds-checked reader over the compressed input.
struct InputCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> InputCursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn next(&mut self, produced: usize, expected: usize) -> Result<u8, DecodeError> {
        let byte = self
            .data
            .get(self.pos)
            .copied()
            .ok_or(DecodeError::Truncated {
                offset: self.pos,
                produced,
                expected,
            })?;
        self.pos += 1;
        Ok(byte)
    }
}

/// Decode a complete Yaz0 stream.
pub fn decode(input: &[u8]) -> Result<DecodedPayload, DecodeError> {
    decode_bounded(input, usize::MAX)
}

/// Decode a Yaz0 stream, refusing headers that declare more than `limit` bytes.
///
/// The limit is checked before the output buffer is allocated.
pub fn decode_bounded(input: &[u8], limit: usize) -> Result<DecodedPayload, DecodeError> {
    let header = Yaz0Header::parse(input)?;
    let size = header.decompressed_size as usize;
    if size > limit {
        return Err(DecodeError::SizeLimitExceeded {
            declared: size,
            limit,
        });
    }

    let mut out = vec![0u8; size];
    let mut src = InputCursor::new(input, Yaz0Header::SIZE);
    let mut dst = 0usize;

    let mut group = 0u8;
    let mut units_left = 0u8;

    while dst < size {
        if units_left == 0 {
            group = src.next(dst, size)?;
            units_left = 8;
        }
        units_left -= 1;

        if group & 0x80 != 0 {
            out[dst] = src.next(dst, size)?;
            dst += 1;
        } else {
            let b1 = src.next(dst, size)?;
            let b2 = src.next(dst, size)?;

            let distance = ((((b1 & 0x0F) as usize) << 8) | b2 as usize) + 1;
            if distance > dst {
                return Err(DecodeError::DistanceOutOfRange {
                    distance,
                    position: dst,
                });
            }

            let length = match b1 >> 4 {
                0 => src.next(dst, size)? as usize + LONG_COPY_BIAS,
                n => n as usize + SHORT_COPY_BIAS,
            };

            // Byte at a time: the source may overlap bytes written by this copy.
            let end = (dst + length).min(size);
            let mut copy_src = dst - distance;
            while dst < end {
                out[dst] = out[copy_src];
                dst += 1;
                copy_src += 1;
            }
        }

        group <<= 1;
    }

    trace!(size, consumed = src.pos, "Decoded Yaz0 stream");
    Ok(DecodedPayload(out))
}
