//! Read-only zip adapter.
//!
//! Zip archives are read from the end:
//!
//! ```text
//! [local header][data] ... [central directory] [end of central directory][comment]
//! ```
//!
//! Only what firmware dumps need is supported: single-disk archives with
//! stored or deflated entries. Zip64 and encrypted entries are refused.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::CrcWriter;
use flate2::read::DeflateDecoder;
use tracing::{debug, instrument, trace};

use super::traits::{ArchiveUnpacker, ReadSeek, UnpackError};

/// Largest comment the format allows; bounds the EOCD search.
const MAX_COMMENT_SIZE: u64 = 65535;
const FLAG_ENCRYPTED: u16 = 0x0001;
const ZIP64_MARKER: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            other => CompressionMethod::Unknown(other),
        }
    }
}

/// End of central directory record (22 bytes plus comment).
#[derive(Debug)]
struct EndOfCentralDirectory {
    archive_size: u64,
    total_entries: u16,
    cd_size: u32,
    cd_offset: u32,
}

impl EndOfCentralDirectory {
    const SIGNATURE: &'static [u8; 4] = b"PK\x05\x06";
    const SIZE: usize = 22;

    fn from_bytes(data: &[u8], archive_size: u64) -> Result<Self, UnpackError> {
        let mut cursor = Cursor::new(&data[4..]);
        let disk_number = cursor.read_u16::<LittleEndian>()?;
        let disk_with_cd = cursor.read_u16::<LittleEndian>()?;
        let _disk_entries = cursor.read_u16::<LittleEndian>()?;
        let total_entries = cursor.read_u16::<LittleEndian>()?;
        let cd_size = cursor.read_u32::<LittleEndian>()?;
        let cd_offset = cursor.read_u32::<LittleEndian>()?;

        if disk_number != 0 || disk_with_cd != 0 {
            return Err(UnpackError::Unsupported("multi-disk archive".into()));
        }
        if cd_offset == ZIP64_MARKER || cd_size == ZIP64_MARKER || total_entries == u16::MAX {
            return Err(UnpackError::Unsupported("zip64 archive".into()));
        }

        Ok(Self {
            archive_size,
            total_entries,
            cd_size,
            cd_offset,
        })
    }
}

/// Central directory file header (46 bytes plus variable fields).
#[derive(Debug, Clone)]
struct CentralEntry {
    name: String,
    flags: u16,
    method: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
}

impl CentralEntry {
    const SIGNATURE: &'static [u8; 4] = b"PK\x01\x02";

    fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self, UnpackError> {
        let mut signature = [0u8; 4];
        cursor.read_exact(&mut signature)?;
        if &signature != Self::SIGNATURE {
            return Err(UnpackError::Corrupt(format!(
                "bad central directory signature at {}",
                cursor.position() - 4
            )));
        }

        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let method = cursor.read_u16::<LittleEndian>()?;
        let _mod_time = cursor.read_u16::<LittleEndian>()?;
        let _mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as i64;
        let comment_len = cursor.read_u16::<LittleEndian>()? as i64;
        let _disk_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let local_header_offset = cursor.read_u32::<LittleEndian>()?;

        let mut name = vec![0u8; name_len];
        cursor.read_exact(&mut name)?;
        cursor.seek(SeekFrom::Current(extra_len + comment_len))?;
        let name = String::from_utf8_lossy(&name).into_owned();

        if compressed_size == ZIP64_MARKER
            || uncompressed_size == ZIP64_MARKER
            || local_header_offset == ZIP64_MARKER
        {
            return Err(UnpackError::Unsupported(format!("zip64 entry {}", name)));
        }

        Ok(Self {
            name,
            flags,
            method,
            crc32,
            compressed_size: compressed_size as u64,
            uncompressed_size: uncompressed_size as u64,
            local_header_offset: local_header_offset as u64,
        })
    }

    fn is_dir(&self) -> bool {
        self.name.ends_with('/') || self.name.ends_with('\\')
    }
}

/// Local file header: signature plus 26 fixed bytes.
const LOCAL_HEADER_SIGNATURE: &[u8; 4] = b"PK\x03\x04";
const LOCAL_HEADER_SIZE: usize = 30;

/// Unpacks zip archives with stored or deflated entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipUnpacker;

impl ZipUnpacker {
    pub fn new() -> Self {
        Self
    }

    fn find_eocd(archive: &mut dyn ReadSeek) -> Result<EndOfCentralDirectory, UnpackError> {
        let size = archive.seek(SeekFrom::End(0))?;
        let record = EndOfCentralDirectory::SIZE as u64;
        if size < record {
            return Err(UnpackError::NotAnArchive(format!("{} bytes", size)));
        }

        let search = (MAX_COMMENT_SIZE + record).min(size);
        archive.seek(SeekFrom::Start(size - search))?;
        let mut buf = vec![0u8; search as usize];
        archive.read_exact(&mut buf)?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if i + EndOfCentralDirectory::SIZE + comment_len == buf.len() {
                return EndOfCentralDirectory::from_bytes(
                    &buf[i..i + EndOfCentralDirectory::SIZE],
                    size,
                );
            }
        }

        Err(UnpackError::NotAnArchive(
            "end of central directory not found".into(),
        ))
    }

    fn read_central_directory(
        archive: &mut dyn ReadSeek,
        eocd: &EndOfCentralDirectory,
    ) -> Result<Vec<CentralEntry>, UnpackError> {
        let cd_end = eocd.cd_offset as u64 + eocd.cd_size as u64;
        if cd_end > eocd.archive_size {
            return Err(UnpackError::Corrupt(format!(
                "central directory ends at {} past archive end {}",
                cd_end, eocd.archive_size
            )));
        }

        archive.seek(SeekFrom::Start(eocd.cd_offset as u64))?;
        let mut buf = vec![0u8; eocd.cd_size as usize];
        archive.read_exact(&mut buf)?;

        let mut cursor = Cursor::new(buf.as_slice());
        (0..eocd.total_entries)
            .map(|_| CentralEntry::parse(&mut cursor))
            .collect()
    }

    fn data_offset(archive: &mut dyn ReadSeek, entry: &CentralEntry) -> Result<u64, UnpackError> {
        archive.seek(SeekFrom::Start(entry.local_header_offset))?;
        let mut header = [0u8; LOCAL_HEADER_SIZE];
        archive.read_exact(&mut header)?;

        if &header[..4] != LOCAL_HEADER_SIGNATURE {
            return Err(UnpackError::Corrupt(format!(
                "bad local header for {}",
                entry.name
            )));
        }

        let name_len = u16::from_le_bytes([header[26], header[27]]) as u64;
        let extra_len = u16::from_le_bytes([header[28], header[29]]) as u64;
        Ok(entry.local_header_offset + LOCAL_HEADER_SIZE as u64 + name_len + extra_len)
    }

    fn extract_entry(
        archive: &mut dyn ReadSeek,
        entry: &CentralEntry,
        target: &Path,
    ) -> Result<(), UnpackError> {
        if entry.flags & FLAG_ENCRYPTED != 0 {
            return Err(UnpackError::Unsupported(format!(
                "encrypted entry {}",
                entry.name
            )));
        }
        let method = CompressionMethod::from_u16(entry.method);
        if let CompressionMethod::Unknown(m) = method {
            return Err(UnpackError::Unsupported(format!(
                "compression method {} for {}",
                m, entry.name
            )));
        }

        let offset = Self::data_offset(archive, entry)?;
        archive.seek(SeekFrom::Start(offset))?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = CrcWriter::new(File::create(target)?);
        let raw = Read::take(&mut *archive, entry.compressed_size);

        // One byte past the declared size is enough to detect an overrun.
        let limit = entry.uncompressed_size + 1;
        let written = match method {
            CompressionMethod::Deflate => {
                io::copy(&mut DeflateDecoder::new(raw).take(limit), &mut out)?
            }
            _ => io::copy(&mut raw.take(limit), &mut out)?,
        };
        out.flush()?;

        if written != entry.uncompressed_size {
            return Err(UnpackError::Corrupt(format!(
                "{}: expected {} bytes, got {}",
                entry.name, entry.uncompressed_size, written
            )));
        }

        let actual = out.crc().sum();
        if actual != entry.crc32 {
            return Err(UnpackError::ChecksumMismatch {
                name: entry.name.clone(),
                expected: entry.crc32,
                actual,
            });
        }
        Ok(())
    }
}

/// Map an entry name to a path relative to the destination.
fn safe_relative_path(name: &str) -> Result<PathBuf, UnpackError> {
    let normalized = name.replace('\\', "/");
    let mut path = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return Err(UnpackError::UnsafePath(name.to_string())),
        }
    }
    if path.as_os_str().is_empty() {
        return Err(UnpackError::UnsafePath(name.to_string()));
    }
    Ok(path)
}

impl ArchiveUnpacker for ZipUnpacker {
    #[instrument(skip_all, fields(dest = %dest.display()))]
    fn unpack(&self, archive: &mut dyn ReadSeek, dest: &Path) -> Result<usize, UnpackError> {
        let eocd = Self::find_eocd(archive)?;
        let entries = Self::read_central_directory(archive, &eocd)?;
        debug!(entries = entries.len(), "Read central directory");

        // Reject the whole archive before anything is written.
        let targets = entries
            .iter()
            .map(|entry| safe_relative_path(&entry.name).map(|rel| dest.join(rel)))
            .collect::<Result<Vec<_>, _>>()?;

        fs::create_dir_all(dest)?;
        let mut files = 0;
        for (entry, target) in entries.iter().zip(&targets) {
            if entry.is_dir() {
                fs::create_dir_all(target)?;
                continue;
            }
            trace!(name = %entry.name, size = entry.uncompressed_size, "Extracting entry");
            Self::extract_entry(archive, entry, target)?;
            files += 1;
        }

        debug!(files, "Archive unpacked");
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;

    struct Entry<'a> {
        name: &'a str,
        data: &'a [u8],
        deflate: bool,
    }

    fn stored<'a>(name: &'a str, data: &'a [u8]) -> Entry<'a> {
        Entry {
            name,
            data,
            deflate: false,
        }
    }

    fn build_zip(entries: &[Entry], comment: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for entry in entries {
            let mut crc = flate2::Crc::new();
            crc.update(entry.data);
            let payload = if entry.deflate {
                let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
                enc.write_all(entry.data).unwrap();
                enc.finish().unwrap()
            } else {
                entry.data.to_vec()
            };
            let method: u16 = if entry.deflate { 8 } else { 0 };
            let offset = out.len() as u32;

            out.extend_from_slice(LOCAL_HEADER_SIGNATURE);
            out.write_u16::<LittleEndian>(20).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(method).unwrap();
            out.write_u32::<LittleEndian>(0).unwrap(); // time + date
            out.write_u32::<LittleEndian>(crc.sum()).unwrap();
            out.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(entry.data.len() as u32).unwrap();
            out.write_u16::<LittleEndian>(entry.name.len() as u16).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&payload);

            central.extend_from_slice(CentralEntry::SIGNATURE);
            central.write_u16::<LittleEndian>(20).unwrap();
            central.write_u16::<LittleEndian>(20).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(method).unwrap();
            central.write_u32::<LittleEndian>(0).unwrap();
            central.write_u32::<LittleEndian>(crc.sum()).unwrap();
            central.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
            central.write_u32::<LittleEndian>(entry.data.len() as u32).unwrap();
            central.write_u16::<LittleEndian>(entry.name.len() as u16).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u32::<LittleEndian>(0).unwrap();
            central.write_u32::<LittleEndian>(offset).unwrap();
            central.extend_from_slice(entry.name.as_bytes());
        }

        let cd_offset = out.len() as u32;
        out.extend_from_slice(&central);
        out.extend_from_slice(EndOfCentralDirectory::SIGNATURE);
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
        out.write_u32::<LittleEndian>(central.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(cd_offset).unwrap();
        out.write_u16::<LittleEndian>(comment.len() as u16).unwrap();
        out.extend_from_slice(comment);
        out
    }

    fn unpack(zip: Vec<u8>, dest: &Path) -> Result<usize, UnpackError> {
        ZipUnpacker::new().unpack(&mut Cursor::new(zip), dest)
    }

    #[test]
    fn test_stored_and_deflated_entries() {
        let big = vec![0x5Au8; 10_000];
        let zip = build_zip(
            &[
                stored("a.nca", b"first"),
                stored("fw/", b""),
                Entry {
                    name: "fw/sub/b.nca",
                    data: &big,
                    deflate: true,
                },
            ],
            b"",
        );
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(unpack(zip, dir.path()).unwrap(), 2);
        assert_eq!(fs::read(dir.path().join("a.nca")).unwrap(), b"first");
        assert_eq!(fs::read(dir.path().join("fw/sub/b.nca")).unwrap(), big);
        assert!(dir.path().join("fw").is_dir());
    }

    #[test]
    fn test_archive_with_comment() {
        let zip = build_zip(&[stored("x.nca", b"data")], b"dumped by a tool");
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unpack(zip, dir.path()).unwrap(), 1);
    }

    #[test]
    fn test_parent_traversal_rejected() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("dest");
        let zip = build_zip(
            &[stored("ok.nca", b"fine"), stored("../evil.nca", b"boom")],
            b"",
        );

        let err = unpack(zip, &dest).unwrap_err();
        assert!(matches!(err, UnpackError::UnsafePath(name) if name == "../evil.nca"));
        assert!(!root.path().join("evil.nca").exists());
        assert!(!dest.join("ok.nca").exists());
    }

    #[test]
    fn test_absolute_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let zip = build_zip(&[stored("/abs.nca", b"boom")], b"");
        assert!(matches!(
            unpack(zip, dir.path()),
            Err(UnpackError::UnsafePath(_))
        ));
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            unpack(b"definitely not a zip archive".to_vec(), dir.path()),
            Err(UnpackError::NotAnArchive(_))
        ));
        assert!(matches!(
            unpack(b"tiny".to_vec(), dir.path()),
            Err(UnpackError::NotAnArchive(_))
        ));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut zip = build_zip(&[stored("a.nca", b"payload")], b"");
        // Data starts after the 30-byte local header and the 5-byte name.
        zip[LOCAL_HEADER_SIZE + 5] ^= 0xFF;
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            unpack(zip, dir.path()),
            Err(UnpackError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_encrypted_entry_rejected() {
        let mut zip = build_zip(&[stored("a.nca", b"payload")], b"");
        let eocd = zip.len() - EndOfCentralDirectory::SIZE;
        let cd_offset = u32::from_le_bytes(zip[eocd + 16..eocd + 20].try_into().unwrap()) as usize;
        zip[cd_offset + 8] |= FLAG_ENCRYPTED as u8;

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            unpack(zip, dir.path()),
            Err(UnpackError::Unsupported(_))
        ));
    }

    #[test]
    fn test_oversized_entry_stops_at_declared_size() {
        let big = vec![0u8; 8 * 1024 * 1024];
        let mut zip = build_zip(
            &[Entry {
                name: "a.nca",
                data: &big,
                deflate: true,
            }],
            b"",
        );
        // Shrink the declared uncompressed size to 10 in the local and central headers.
        let eocd = zip.len() - EndOfCentralDirectory::SIZE;
        let cd_offset = u32::from_le_bytes(zip[eocd + 16..eocd + 20].try_into().unwrap()) as usize;
        zip[22..26].copy_from_slice(&10u32.to_le_bytes());
        zip[cd_offset + 24..cd_offset + 28].copy_from_slice(&10u32.to_le_bytes());
        assert!(zip.len() < big.len() / 100);

        let dir = tempfile::tempdir().unwrap();
        let err = unpack(zip, dir.path()).unwrap_err();
        assert!(matches!(err, UnpackError::Corrupt(_)));
        let written = fs::metadata(dir.path().join("a.nca")).unwrap().len();
        assert!(written <= 11, "wrote {} bytes for a 10-byte entry", written);
    }

    #[test]
    fn test_central_directory_past_end_rejected() {
        let mut zip = build_zip(&[stored("a.nca", b"payload")], b"");
        let eocd = zip.len() - EndOfCentralDirectory::SIZE;
        zip[eocd + 12..eocd + 16].copy_from_slice(&0x7FFF_FFFFu32.to_le_bytes());

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            unpack(zip, dir.path()),
            Err(UnpackError::Corrupt(_))
        ));
    }

    #[test]
    fn test_safe_relative_path() {
        assert_eq!(
            safe_relative_path("./fw\\a.nca").unwrap(),
            PathBuf::from("fw/a.nca")
        );
        assert!(safe_relative_path("").is_err());
        assert!(safe_relative_path("fw/../../x").is_err());
    }
}
