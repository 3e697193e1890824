//! Minimal zip codec.
//!
//! Reading locates the end-of-central-directory record, walks the central
//! directory and slices each entry's compressed data out of the buffer using
//! the central sizes, so entries written with data descriptors need no
//! special handling. Writing produces byte-reproducible archives: every
//! entry gets the DOS timestamp 1980-01-01 00:00, no extra fields and no
//! comments. Zip64, encryption and multi-disk archives are rejected.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use tracex_config::{ArchiveSettings, CompressionMode};

use crate::error::ArchiveError;

/// Compression method for stored entries.
pub const METHOD_STORED: u16 = 0;
/// Compression method for deflated entries.
pub const METHOD_DEFLATED: u16 = 8;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_SIG: u32 = 0x0605_4b50;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;

const END_OF_CENTRAL_LEN: usize = 22;
const ZIP64_LOCATOR_LEN: usize = 20;
const LOCAL_HEADER_LEN: usize = 30;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_UTF8: u16 = 0x0800;

const VERSION_MADE_BY: u16 = 20;
const DOS_TIME: u16 = 0;
// 1980-01-01: day 1, month 1, year offset 0.
const DOS_DATE: u16 = (1 << 5) | 1;

/// One archive entry with its data still compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Entry name as stored in the archive.
    pub name: String,
    /// Compression method ([`METHOD_STORED`] or [`METHOD_DEFLATED`]).
    pub method: u16,
    /// CRC-32 of the uncompressed bytes.
    pub crc32: u32,
    /// Size of the uncompressed bytes.
    pub uncompressed_size: u32,
    /// The entry's data exactly as stored.
    pub compressed: Vec<u8>,
}

impl RawEntry {
    /// Returns `true` for directory entries.
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Decompresses the entry, verifying its size and CRC-32.
    pub fn decompress(&self) -> Result<Vec<u8>, ArchiveError> {
        let data = match self.method {
            METHOD_STORED => self.compressed.clone(),
            METHOD_DEFLATED => {
                let mut out = Vec::new();
                DeflateDecoder::new(self.compressed.as_slice())
                    .read_to_end(&mut out)
                    .map_err(|e| ArchiveError::CorruptEntry {
                        entry: self.name.clone(),
                        reason: e.to_string(),
                    })?;
                out
            }
            other => {
                return Err(ArchiveError::CorruptEntry {
                    entry: self.name.clone(),
                    reason: format!("unknown compression method {other}"),
                })
            }
        };
        if data.len() != self.uncompressed_size as usize {
            return Err(ArchiveError::CorruptEntry {
                entry: self.name.clone(),
                reason: format!(
                    "expected {} bytes, got {}",
                    self.uncompressed_size,
                    data.len()
                ),
            });
        }
        let actual = crc32(&data);
        if actual != self.crc32 {
            return Err(ArchiveError::CrcMismatch {
                entry: self.name.clone(),
                expected: self.crc32,
                actual,
            });
        }
        Ok(data)
    }
}

/// A parsed archive: its entries in central-directory order.
#[derive(Debug, Clone, Default)]
pub struct ZipArchive {
    entries: Vec<RawEntry>,
}

impl ZipArchive {
    /// Reads and parses the archive at `path`.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let data = std::fs::read(path).map_err(|e| ArchiveError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_bytes(path, &data)
    }

    /// Parses an in-memory archive. `path` is used in error messages only.
    pub fn from_bytes(path: &Path, data: &[u8]) -> Result<Self, ArchiveError> {
        let eocd = find_end_of_central(data).ok_or_else(|| ArchiveError::Malformed {
            path: path.to_path_buf(),
            reason: "end of central directory not found".to_string(),
        })?;
        if eocd >= ZIP64_LOCATOR_LEN
            && data[eocd - ZIP64_LOCATOR_LEN..eocd - ZIP64_LOCATOR_LEN + 4]
                == ZIP64_LOCATOR_SIG.to_le_bytes()
        {
            return Err(unsupported(path, "zip64"));
        }

        let mut r = LeReader::new(path, data, eocd + 4);
        let disk = r.u16()?;
        let central_disk = r.u16()?;
        let disk_entries = r.u16()?;
        let total = r.u16()?;
        let central_size = r.u32()?;
        let central_offset = r.u32()?;
        if disk != 0 || central_disk != 0 || disk_entries != total {
            return Err(unsupported(path, "multi-disk archive"));
        }
        if total == u16::MAX || central_size == u32::MAX || central_offset == u32::MAX {
            return Err(unsupported(path, "zip64"));
        }

        let mut entries = Vec::with_capacity(total as usize);
        let mut r = LeReader::new(path, data, central_offset as usize);
        for _ in 0..total {
            if r.u32()? != CENTRAL_HEADER_SIG {
                return Err(r.malformed("bad central directory signature"));
            }
            r.skip(4)?;
            let flags = r.u16()?;
            let method = r.u16()?;
            r.skip(4)?;
            let crc32 = r.u32()?;
            let compressed_size = r.u32()?;
            let uncompressed_size = r.u32()?;
            let name_len = r.u16()? as usize;
            let extra_len = r.u16()? as usize;
            let comment_len = r.u16()? as usize;
            r.skip(8)?;
            let local_offset = r.u32()?;
            let name = String::from_utf8(r.take(name_len)?.to_vec())
                .map_err(|_| r.malformed("entry name is not UTF-8"))?;
            r.skip(extra_len + comment_len)?;

            if compressed_size == u32::MAX
                || uncompressed_size == u32::MAX
                || local_offset == u32::MAX
            {
                return Err(unsupported(path, "zip64"));
            }
            if flags & FLAG_ENCRYPTED != 0 {
                return Err(unsupported(path, "encryption"));
            }
            if method != METHOD_STORED && method != METHOD_DEFLATED {
                return Err(unsupported(
                    path,
                    &format!("compression method {method} in {name}"),
                ));
            }

            let mut local = LeReader::new(path, data, local_offset as usize);
            if local.u32()? != LOCAL_HEADER_SIG {
                return Err(local.malformed("bad local header signature"));
            }
            local.skip(LOCAL_HEADER_LEN - 8)?;
            let local_name_len = local.u16()? as usize;
            let local_extra_len = local.u16()? as usize;
            local.skip(local_name_len + local_extra_len)?;
            let compressed = local.take(compressed_size as usize)?.to_vec();

            entries.push(RawEntry {
                name,
                method,
                crc32,
                uncompressed_size,
                compressed,
            });
        }

        Ok(Self { entries })
    }

    /// The entries in central-directory order.
    pub fn entries(&self) -> &[RawEntry] {
        &self.entries
    }

    /// Consumes the archive, returning its entries.
    pub fn into_entries(self) -> Vec<RawEntry> {
        self.entries
    }
}

/// Streaming writer for deterministic archives.
///
/// Entries are written in call order; callers sort them first.
pub struct ZipWriter<W: Write> {
    out: W,
    path: PathBuf,
    settings: ArchiveSettings,
    offset: u64,
    central: Vec<u8>,
    count: usize,
}

impl<W: Write> ZipWriter<W> {
    /// Creates a writer. `path` is used in error messages only.
    pub fn new(out: W, path: &Path, settings: ArchiveSettings) -> Self {
        Self {
            out,
            path: path.to_path_buf(),
            settings,
            offset: 0,
            central: Vec::new(),
            count: 0,
        }
    }

    /// Compresses `data` with the configured settings and appends it.
    pub fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
        let uncompressed_size =
            u32::try_from(data.len()).map_err(|_| unsupported(&self.path, "zip64"))?;
        let crc = crc32(data);
        match self.settings.compression {
            CompressionMode::Stored => {
                self.write_record(name, METHOD_STORED, crc, data, uncompressed_size)
            }
            CompressionMode::Deflate => {
                let mut encoder =
                    DeflateEncoder::new(Vec::new(), Compression::new(self.settings.level));
                let compressed = encoder
                    .write_all(data)
                    .and_then(|()| encoder.finish())
                    .map_err(|e| self.io_error(e))?;
                self.write_record(name, METHOD_DEFLATED, crc, &compressed, uncompressed_size)
            }
        }
    }

    /// Appends an entry copied from another archive without recompressing.
    pub fn add_raw(&mut self, entry: &RawEntry) -> Result<(), ArchiveError> {
        self.write_record(
            &entry.name,
            entry.method,
            entry.crc32,
            &entry.compressed,
            entry.uncompressed_size,
        )
    }

    /// Writes the central directory and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, ArchiveError> {
        let count = u16::try_from(self.count).map_err(|_| unsupported(&self.path, "zip64"))?;
        let central_offset =
            u32::try_from(self.offset).map_err(|_| unsupported(&self.path, "zip64"))?;
        let central_size =
            u32::try_from(self.central.len()).map_err(|_| unsupported(&self.path, "zip64"))?;

        let mut eocd = Vec::with_capacity(END_OF_CENTRAL_LEN);
        put_u32(&mut eocd, END_OF_CENTRAL_SIG);
        put_u16(&mut eocd, 0);
        put_u16(&mut eocd, 0);
        put_u16(&mut eocd, count);
        put_u16(&mut eocd, count);
        put_u32(&mut eocd, central_size);
        put_u32(&mut eocd, central_offset);
        put_u16(&mut eocd, 0);

        let central = std::mem::take(&mut self.central);
        self.out
            .write_all(&central)
            .and_then(|()| self.out.write_all(&eocd))
            .and_then(|()| self.out.flush())
            .map_err(|e| self.io_error(e))?;
        Ok(self.out)
    }

    fn write_record(
        &mut self,
        name: &str,
        method: u16,
        crc: u32,
        compressed: &[u8],
        uncompressed_size: u32,
    ) -> Result<(), ArchiveError> {
        let local_offset =
            u32::try_from(self.offset).map_err(|_| unsupported(&self.path, "zip64"))?;
        let compressed_size =
            u32::try_from(compressed.len()).map_err(|_| unsupported(&self.path, "zip64"))?;
        let name_len = u16::try_from(name.len()).map_err(|_| ArchiveError::Malformed {
            path: self.path.clone(),
            reason: format!("entry name too long: {name}"),
        })?;
        let flags = if name.is_ascii() { 0 } else { FLAG_UTF8 };
        let version_needed = if method == METHOD_DEFLATED { 20 } else { 10 };

        let mut local = Vec::with_capacity(LOCAL_HEADER_LEN + name.len());
        put_u32(&mut local, LOCAL_HEADER_SIG);
        put_u16(&mut local, version_needed);
        put_u16(&mut local, flags);
        put_u16(&mut local, method);
        put_u16(&mut local, DOS_TIME);
        put_u16(&mut local, DOS_DATE);
        put_u32(&mut local, crc);
        put_u32(&mut local, compressed_size);
        put_u32(&mut local, uncompressed_size);
        put_u16(&mut local, name_len);
        put_u16(&mut local, 0);
        local.extend_from_slice(name.as_bytes());

        let central = &mut self.central;
        put_u32(central, CENTRAL_HEADER_SIG);
        put_u16(central, VERSION_MADE_BY);
        put_u16(central, version_needed);
        put_u16(central, flags);
        put_u16(central, method);
        put_u16(central, DOS_TIME);
        put_u16(central, DOS_DATE);
        put_u32(central, crc);
        put_u32(central, compressed_size);
        put_u32(central, uncompressed_size);
        put_u16(central, name_len);
        put_u16(central, 0); // extra
        put_u16(central, 0); // comment
        put_u16(central, 0); // disk
        put_u16(central, 0); // internal attributes
        put_u32(central, 0); // external attributes
        put_u32(central, local_offset);
        central.extend_from_slice(name.as_bytes());

        self.out
            .write_all(&local)
            .and_then(|()| self.out.write_all(compressed))
            .map_err(|e| self.io_error(e))?;
        self.offset += (local.len() + compressed.len()) as u64;
        self.count += 1;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> ArchiveError {
        ArchiveError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// CRC-32 as used by zip.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

fn find_end_of_central(data: &[u8]) -> Option<usize> {
    let last = data.len().checked_sub(END_OF_CENTRAL_LEN)?;
    let first = last.saturating_sub(u16::MAX as usize);
    (first..=last).rev().find(|&pos| {
        data[pos..pos + 4] == END_OF_CENTRAL_SIG.to_le_bytes() && {
            let comment_len = u16::from_le_bytes([data[pos + 20], data[pos + 21]]) as usize;
            pos + END_OF_CENTRAL_LEN + comment_len <= data.len()
        }
    })
}

fn unsupported(path: &Path, feature: &str) -> ArchiveError {
    ArchiveError::Unsupported {
        path: path.to_path_buf(),
        feature: feature.to_string(),
    }
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Bounds-checked little-endian cursor over an archive buffer.
struct LeReader<'a> {
    path: &'a Path,
    data: &'a [u8],
    pos: usize,
}

impl<'a> LeReader<'a> {
    fn new(path: &'a Path, data: &'a [u8], pos: usize) -> Self {
        Self { path, data, pos }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ArchiveError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.malformed("unexpected end of archive"))?;
        let data: &'a [u8] = self.data;
        let slice = &data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), ArchiveError> {
        self.take(n).map(|_| ())
    }

    fn u16(&mut self) -> Result<u16, ArchiveError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ArchiveError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn malformed(&self, reason: &str) -> ArchiveError {
        ArchiveError::Malformed {
            path: self.path.to_path_buf(),
            reason: format!("{reason} at offset {}", self.pos),
        }
    }
}
