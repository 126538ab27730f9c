use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use bzip2::read::BzDecoder;
use flate2::read::DeflateDecoder;
use log::{debug, warn};
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;
use xz2::read::XzDecoder;
use xz2::stream::Stream;

use super::{ArchiveAccess, ArchiveEntry, DosDateTime};
use crate::remote::{ByteSource, RangeReader};

/// Maximum size to read for the End of Central Directory search (64KB should be enough)
const EOCD_SEARCH_SIZE: u64 = 65536;

/// Minimum size for EOCD (4 bytes signature + 18 bytes data)
const MIN_EOCD_SIZE: usize = 22;

/// ZIP64 End of Central Directory locator, stored right before the EOCD
const ZIP64_LOCATOR_SIZE: usize = 20;

/// ZIP64 End of Central Directory record (fixed portion)
const ZIP64_EOCD_SIZE: usize = 56;

/// Header ID of the ZIP64 extended information extra field
const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Central Directory File Header minimum size (fixed portion)
const CDFH_MIN_SIZE: usize = 46;

/// Local File Header minimum size (fixed portion)
const LOCAL_HEADER_MIN_SIZE: usize = 30;

/// ZIP compression methods
const COMPRESSION_STORED: u16 = 0;
const COMPRESSION_DEFLATE: u16 = 8;
const COMPRESSION_BZIP2: u16 = 12;
const COMPRESSION_LZMA: u16 = 14;

/// General purpose flag bits
const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_LZMA_EOS: u16 = 0x0002;
const FLAG_UTF8: u16 = 0x0800;

/// Code page 437 for bytes 0x80..=0xFF; the lower half is ASCII
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐',
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧',
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀',
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩',
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

fn decode_cp437(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x00..=0x7f => b as char,
            _ => CP437_HIGH[(b - 0x80) as usize],
        })
        .collect()
}

fn u16_le(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn u32_le(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn u64_le(data: &[u8], at: usize) -> u64 {
    data[at..at + 8]
        .iter()
        .rev()
        .fold(0, |acc, &b| (acc << 8) | b as u64)
}

/// Information extracted from the End of Central Directory record
#[derive(Debug)]
struct EocdInfo {
    /// Offset of the EOCD within the searched buffer
    position: usize,
    entry_count: u64,
    central_dir_offset: u64,
    central_dir_size: u64,
}

impl EocdInfo {
    /// Whether any field is saturated, meaning the real value lives in the ZIP64 record
    fn has_zip64_placeholders(&self) -> bool {
        self.entry_count == u16::MAX as u64
            || self.central_dir_size == u32::MAX as u64
            || self.central_dir_offset == u32::MAX as u64
    }
}

/// Central directory record for one entry
#[derive(Debug, Clone)]
struct ZipEntry {
    meta: ArchiveEntry,
    flags: u16,
    compression_method: u16,
    compressed_size: u64,
    local_header_offset: u64,
}

/// A ZIP archive read through a [`ByteSource`].
///
/// Opening fetches the tail of the object and the central directory; entry
/// payloads are only fetched when an entry reader is consumed.
pub struct ZipArchive {
    source: Arc<dyn ByteSource>,
    entries: Vec<ArchiveEntry>,
    records: Vec<ZipEntry>,
    by_name: HashMap<String, usize>,
}

impl ZipArchive {
    /// Read the central directory of the archive behind `source`
    pub fn open(source: Arc<dyn ByteSource>) -> Result<Self> {
        let size = source.size();
        if size < MIN_EOCD_SIZE as u64 {
            return Err(anyhow!("File too small to be a valid ZIP archive"));
        }

        // Step 1: Read the end of the file to locate the End of Central Directory (EOCD)
        let eocd_data = source
            .read_tail(EOCD_SEARCH_SIZE.min(size))
            .context("Failed to read ZIP trailer")?;
        let tail_start = size - eocd_data.len() as u64;

        // Step 2: Parse the EOCD to find the central directory location,
        // switching to the ZIP64 record when the archive has one
        let mut eocd_info = Self::find_eocd(&eocd_data)?;
        match Self::read_zip64_eocd(source.as_ref(), &eocd_data, tail_start, eocd_info.position)? {
            Some(zip64) => eocd_info = zip64,
            None if eocd_info.has_zip64_placeholders() => {
                return Err(anyhow!(
                    "End of Central Directory uses ZIP64 placeholder values but no ZIP64 locator was found"
                ));
            }
            None => {}
        }

        let cd_end = eocd_info
            .central_dir_offset
            .checked_add(eocd_info.central_dir_size)
            .ok_or_else(|| anyhow!("Central directory bounds overflow"))?;

        if cd_end > size {
            return Err(anyhow!(
                "Central directory extends beyond file bounds (offset {} + size {} > file size {})",
                eocd_info.central_dir_offset,
                eocd_info.central_dir_size,
                size
            ));
        }

        // Step 3: Read the central directory
        let central_dir_data = source
            .read_range(eocd_info.central_dir_offset, eocd_info.central_dir_size)
            .context("Failed to read ZIP central directory")?;

        // Step 4: Parse central directory headers
        let records = Self::parse_central_directory(&central_dir_data, size)?;
        if records.len() as u64 != eocd_info.entry_count {
            warn!(
                "central directory lists {} entries but EOCD declares {}",
                records.len(),
                eocd_info.entry_count
            );
        }
        debug!("read {} entries from ZIP central directory", records.len());

        let entries = records.iter().map(|r| r.meta.clone()).collect();
        let by_name = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.meta.path.clone(), i))
            .collect();

        Ok(ZipArchive {
            source,
            entries,
            records,
            by_name,
        })
    }

    /// Find the End of Central Directory record in the buffer.
    /// Returns information about the central directory location.
    fn find_eocd(data: &[u8]) -> Result<EocdInfo> {
        // EOCD signature: 0x06054b50 (little endian)
        const EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];

        if data.len() < MIN_EOCD_SIZE {
            return Err(anyhow!("Could not find End of Central Directory record"));
        }

        // Search backwards from the end for the EOCD signature
        for i in (0..=data.len() - MIN_EOCD_SIZE).rev() {
            if !data[i..].starts_with(&EOCD_SIGNATURE) {
                continue;
            }
            let eocd = &data[i..];

            // Multi-disk archives are not supported
            let disk_number = u16_le(eocd, 4);
            let disk_with_cd = u16_le(eocd, 6);

            if disk_number != 0 || disk_with_cd != 0 {
                return Err(anyhow!(
                    "Multi-disk ZIP archives are not supported (disk {}, CD disk {})",
                    disk_number,
                    disk_with_cd
                ));
            }

            return Ok(EocdInfo {
                position: i,
                entry_count: u16_le(eocd, 10) as u64,
                central_dir_size: u32_le(eocd, 12) as u64,
                central_dir_offset: u32_le(eocd, 16) as u64,
            });
        }

        Err(anyhow!("Could not find End of Central Directory record"))
    }

    /// Read the ZIP64 End of Central Directory record, if the archive has one.
    ///
    /// ZIP64 archives put a 20-byte locator right before the EOCD:
    /// - 4 bytes: signature (0x07064b50)
    /// - 4 bytes: disk with the ZIP64 EOCD record
    /// - 8 bytes: absolute offset of the ZIP64 EOCD record
    /// - 4 bytes: total number of disks
    ///
    /// The record itself usually sits right before the locator, inside the
    /// tail that was already fetched.
    fn read_zip64_eocd(
        source: &dyn ByteSource,
        tail: &Bytes,
        tail_start: u64,
        eocd_position: usize,
    ) -> Result<Option<EocdInfo>> {
        const LOCATOR_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x07];
        const ZIP64_EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x06];

        if eocd_position < ZIP64_LOCATOR_SIZE {
            return Ok(None);
        }
        let locator = &tail[eocd_position - ZIP64_LOCATOR_SIZE..eocd_position];
        if !locator.starts_with(&LOCATOR_SIGNATURE) {
            return Ok(None);
        }

        let disk_with_record = u32_le(locator, 4);
        let record_offset = u64_le(locator, 8);
        let total_disks = u32_le(locator, 16);
        if disk_with_record != 0 || total_disks > 1 {
            return Err(anyhow!(
                "Multi-disk ZIP archives are not supported ({} disks)",
                total_disks
            ));
        }

        let record_end = record_offset
            .checked_add(ZIP64_EOCD_SIZE as u64)
            .filter(|&end| end <= source.size())
            .ok_or_else(|| anyhow!("Invalid ZIP64 End of Central Directory offset {}", record_offset))?;

        let record = if record_offset >= tail_start && record_end <= tail_start + tail.len() as u64 {
            let at = (record_offset - tail_start) as usize;
            tail.slice(at..at + ZIP64_EOCD_SIZE)
        } else {
            source
                .read_range(record_offset, ZIP64_EOCD_SIZE as u64)
                .context("Failed to read ZIP64 End of Central Directory")?
        };

        if !record.starts_with(&ZIP64_EOCD_SIGNATURE) {
            return Err(anyhow!(
                "Invalid ZIP64 End of Central Directory signature at offset {}",
                record_offset
            ));
        }

        let disk_number = u32_le(&record, 16);
        let disk_with_cd = u32_le(&record, 20);
        if disk_number != 0 || disk_with_cd != 0 {
            return Err(anyhow!(
                "Multi-disk ZIP archives are not supported (disk {}, CD disk {})",
                disk_number,
                disk_with_cd
            ));
        }

        Ok(Some(EocdInfo {
            position: eocd_position,
            entry_count: u64_le(&record, 32),
            central_dir_size: u64_le(&record, 40),
            central_dir_offset: u64_le(&record, 48),
        }))
    }

    /// The 64-bit values of a ZIP64 extended information extra field, in order
    fn zip64_extra_values(extra: &[u8]) -> Option<impl Iterator<Item = u64> + '_> {
        let mut pos = 0;
        while pos + 4 <= extra.len() {
            let id = u16_le(extra, pos);
            let len = u16_le(extra, pos + 2) as usize;
            let body = &extra[pos + 4..(pos + 4 + len).min(extra.len())];
            if id == ZIP64_EXTRA_ID {
                return Some(body.chunks_exact(8).map(|chunk| u64_le(chunk, 0)));
            }
            pos += 4 + len;
        }
        None
    }

    /// Parse central directory file headers, keeping archive order.
    ///
    /// Central Directory File Header format (46 bytes fixed + variable):
    /// - 4 bytes: signature (0x02014b50)
    /// - 2 bytes: version made by
    /// - 2 bytes: version needed to extract
    /// - 2 bytes: general purpose bit flag
    /// - 2 bytes: compression method
    /// - 2 bytes: last mod file time
    /// - 2 bytes: last mod file date
    /// - 4 bytes: crc-32
    /// - 4 bytes: compressed size
    /// - 4 bytes: uncompressed size
    /// - 2 bytes: file name length
    /// - 2 bytes: extra field length
    /// - 2 bytes: file comment length
    /// - 2 bytes: disk number start
    /// - 2 bytes: internal file attributes
    /// - 4 bytes: external file attributes
    /// - 4 bytes: relative offset of local header
    /// - (variable): file name
    /// - (variable): extra field
    /// - (variable): file comment
    ///
    /// Sizes and the offset saturated at 0xFFFFFFFF are taken from the ZIP64
    /// extra field, which stores only those values, in the order uncompressed
    /// size, compressed size, local header offset.
    fn parse_central_directory(data: &[u8], archive_size: u64) -> Result<Vec<ZipEntry>> {
        const CDFH_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];

        let mut records = Vec::new();
        let mut pos = 0;

        while pos + CDFH_MIN_SIZE <= data.len() {
            if !data[pos..].starts_with(&CDFH_SIGNATURE) {
                // Reached end of central directory entries
                break;
            }

            let flags = u16_le(data, pos + 8);
            let compression_method = u16_le(data, pos + 10);
            let mod_time = u16_le(data, pos + 12);
            let mod_date = u16_le(data, pos + 14);
            let compressed_size_raw = u32_le(data, pos + 20);
            let uncompressed_size_raw = u32_le(data, pos + 24);
            let local_header_offset_raw = u32_le(data, pos + 42);

            let filename_len = u16_le(data, pos + 28) as usize;
            let extra_len = u16_le(data, pos + 30) as usize;
            let comment_len = u16_le(data, pos + 32) as usize;

            let end = pos + CDFH_MIN_SIZE + filename_len + extra_len + comment_len;
            if end > data.len() {
                return Err(anyhow!(
                    "Truncated central directory entry at position {}",
                    pos
                ));
            }

            let name_start = pos + CDFH_MIN_SIZE;
            let filename_bytes = &data[name_start..name_start + filename_len];
            let filename = if flags & FLAG_UTF8 != 0 {
                String::from_utf8_lossy(filename_bytes).to_string()
            } else {
                decode_cp437(filename_bytes)
            };

            let mut uncompressed_size = uncompressed_size_raw as u64;
            let mut compressed_size = compressed_size_raw as u64;
            let mut local_header_offset = local_header_offset_raw as u64;

            if uncompressed_size_raw == u32::MAX
                || compressed_size_raw == u32::MAX
                || local_header_offset_raw == u32::MAX
            {
                let extra = &data[name_start + filename_len..name_start + filename_len + extra_len];
                let mut values = Self::zip64_extra_values(extra).ok_or_else(|| {
                    anyhow!("Entry {} uses ZIP64 placeholder values but has no ZIP64 extra field", filename)
                })?;
                let mut next = |field: &str| {
                    values.next().ok_or_else(|| {
                        anyhow!("ZIP64 extra field of {} is missing the {}", filename, field)
                    })
                };

                if uncompressed_size_raw == u32::MAX {
                    uncompressed_size = next("uncompressed size")?;
                }
                if compressed_size_raw == u32::MAX {
                    compressed_size = next("compressed size")?;
                }
                if local_header_offset_raw == u32::MAX {
                    local_header_offset = next("local header offset")?;
                }
            }

            if local_header_offset >= archive_size {
                return Err(anyhow!(
                    "Invalid local header offset {} for archive size {}",
                    local_header_offset,
                    archive_size
                ));
            }

            records.push(ZipEntry {
                meta: ArchiveEntry {
                    is_dir: filename.ends_with('/'),
                    path: filename,
                    size: uncompressed_size,
                    modified: DosDateTime::from_dos(mod_date, mod_time),
                },
                flags,
                compression_method,
                compressed_size,
                local_header_offset,
            });

            pos = end;
        }

        Ok(records)
    }

    /// Locate the first byte of an entry's compressed data by reading its local header
    fn data_offset(&self, record: &ZipEntry) -> Result<u64> {
        let file_size = self.source.size();
        let local_header = self
            .source
            .read_range(
                record.local_header_offset,
                (LOCAL_HEADER_MIN_SIZE as u64).min(file_size - record.local_header_offset),
            )
            .context("Failed to read local file header")?;

        if local_header.len() < LOCAL_HEADER_MIN_SIZE
            || !local_header.starts_with(&[0x50, 0x4b, 0x03, 0x04])
        {
            return Err(anyhow!(
                "Invalid local file header signature for {}",
                record.meta.path
            ));
        }

        // Local name and extra lengths may differ from the central directory copy
        let filename_len = u16_le(&local_header, 26) as u64;
        let extra_len = u16_le(&local_header, 28) as u64;

        let data_offset = record.local_header_offset + LOCAL_HEADER_MIN_SIZE as u64 + filename_len + extra_len;
        let data_end = data_offset
            .checked_add(record.compressed_size)
            .ok_or_else(|| anyhow!("Data end calculation overflow"))?;

        if data_end > file_size {
            return Err(anyhow!(
                "Compressed data extends beyond file bounds (offset {} + size {} > file size {})",
                data_offset,
                record.compressed_size,
                file_size
            ));
        }

        Ok(data_offset)
    }

    /// Decoder for an LZMA entry.
    ///
    /// The payload starts with a 4-byte header (LZMA SDK version, properties
    /// length) and 5 bytes of LZMA properties. liblzma reads the `.lzma`
    /// container, so the properties are rewrapped in its 13-byte header. An
    /// unknown size there makes the decoder stop at the end-of-stream marker.
    fn lzma_decoder(
        mut raw: RangeReader<Arc<dyn ByteSource>>,
        record: &ZipEntry,
    ) -> Result<Box<dyn Read + Send>> {
        let mut header = [0u8; 4];
        raw.read_exact(&mut header)
            .context("Failed to read LZMA header")?;
        let props_len = u16_le(&header, 2);
        if props_len != 5 {
            return Err(anyhow!(
                "Unsupported LZMA properties length {} in {}",
                props_len,
                record.meta.path
            ));
        }

        let mut alone_header = [0u8; 13];
        raw.read_exact(&mut alone_header[..5])
            .context("Failed to read LZMA properties")?;
        let declared_size = if record.flags & FLAG_LZMA_EOS != 0 {
            u64::MAX
        } else {
            record.meta.size
        };
        alone_header[5..].copy_from_slice(&declared_size.to_le_bytes());

        let stream = Stream::new_lzma_decoder(u64::MAX).context("Failed to create LZMA decoder")?;
        let input = io::Cursor::new(alone_header).chain(raw);
        Ok(Box::new(XzDecoder::new_stream(input, stream)))
    }
}

impl ArchiveAccess for ZipArchive {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn open_entry(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        self.open_entry_at(path, 0)
    }

    /// Stored entries are addressed directly, so only the requested part is
    /// fetched. Compressed entries decompress and discard up to `offset`.
    fn open_entry_at(&self, path: &str, offset: u64) -> Result<Box<dyn Read + Send>> {
        let record = self
            .by_name
            .get(path)
            .map(|&i| &self.records[i])
            .ok_or_else(|| anyhow!("File not found in archive: {path}"))?;

        if record.meta.is_dir {
            return Err(anyhow!("Cannot extract directory: {path}"));
        }

        if record.flags & FLAG_ENCRYPTED != 0 {
            return Err(anyhow!("Encrypted ZIP entries are not supported: {path}"));
        }

        if record.compressed_size == 0 {
            if record.meta.size != 0 {
                return Err(anyhow!(
                    "Invalid ZIP entry: compressed size is 0 but uncompressed size is {}",
                    record.meta.size
                ));
            }
            return Ok(Box::new(io::empty()));
        }

        let data_offset = self.data_offset(record)?;

        if record.compression_method == COMPRESSION_STORED {
            if record.compressed_size != record.meta.size {
                return Err(anyhow!(
                    "Invalid ZIP entry: stored file has mismatched sizes (compressed={}, uncompressed={})",
                    record.compressed_size,
                    record.meta.size
                ));
            }
            let skip = offset.min(record.compressed_size);
            return Ok(Box::new(RangeReader::window(
                Arc::clone(&self.source),
                data_offset + skip,
                record.compressed_size - skip,
            )));
        }

        let raw = RangeReader::window(
            Arc::clone(&self.source),
            data_offset,
            record.compressed_size,
        );
        let decoder: Box<dyn Read + Send> = match record.compression_method {
            COMPRESSION_DEFLATE => Box::new(DeflateDecoder::new(raw)),
            COMPRESSION_BZIP2 => Box::new(BzDecoder::new(raw)),
            COMPRESSION_LZMA => Self::lzma_decoder(raw, record)?,
            other => {
                return Err(anyhow!(
                    "Unsupported compression method: {}. Only stored (0), deflate (8), bzip2 (12) and LZMA (14) are supported.",
                    other
                ));
            }
        };

        let mut decoder = decoder.take(record.meta.size);
        io::copy(&mut (&mut decoder).take(offset), &mut io::sink())
            .with_context(|| format!("Failed to seek to offset {offset} in {path}"))?;
        Ok(Box::new(decoder))
    }
}
