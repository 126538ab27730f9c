pub mod zip;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::io::{self, Read};

pub use self::zip::ZipArchive;

/// Calendar fields of an entry's stored modification time.
///
/// ZIP keeps MS-DOS local time with no zone, so these are treated as UTC
/// when converted to an absolute timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DosDateTime {
    /// Decode the packed MS-DOS date and time words
    pub fn from_dos(date: u16, time: u16) -> Self {
        DosDateTime {
            year: (date >> 9) + 1980,
            month: ((date >> 5) & 0x0f) as u8,
            day: (date & 0x1f) as u8,
            hour: (time >> 11) as u8,
            minute: ((time >> 5) & 0x3f) as u8,
            second: ((time & 0x1f) * 2) as u8,
        }
    }

    /// Seconds since the Unix epoch, reading the fields as UTC.
    /// `None` for field combinations that are not a real calendar time.
    pub fn to_unix_seconds(&self) -> Option<i64> {
        let dt = NaiveDate::from_ymd_opt(self.year.into(), self.month.into(), self.day.into())?
            .and_hms_opt(self.hour.into(), self.minute.into(), self.second.into())?;
        Some(dt.and_utc().timestamp())
    }
}

/// Metadata about one entry of an archive, in archive order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Name as stored in the archive (directories end with `/`)
    pub path: String,
    /// Uncompressed size
    pub size: u64,
    pub is_dir: bool,
    pub modified: DosDateTime,
}

/// Read access to an opened archive
pub trait ArchiveAccess: Send {
    /// All entries, in the order the archive lists them
    fn entries(&self) -> &[ArchiveEntry];

    /// Open a fresh sequential reader over an entry's decompressed bytes
    fn open_entry(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Open a reader positioned `offset` bytes into the decompressed entry.
    ///
    /// The provided method decompresses and discards the leading bytes. If
    /// the entry is shorter than `offset` the reader yields nothing.
    fn open_entry_at(&self, path: &str, offset: u64) -> Result<Box<dyn Read + Send>> {
        let mut reader = self.open_entry(path)?;
        io::copy(&mut (&mut reader).take(offset), &mut io::sink())
            .with_context(|| format!("Failed to seek to offset {offset} in {path}"))?;
        Ok(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_dos_fields() {
        // 2021-07-15 13:45:30
        let date = ((2021 - 1980) << 9) | (7 << 5) | 15;
        let time = (13 << 11) | (45 << 5) | (30 / 2);
        let dt = DosDateTime::from_dos(date, time);
        assert_eq!(
            dt,
            DosDateTime {
                year: 2021,
                month: 7,
                day: 15,
                hour: 13,
                minute: 45,
                second: 30
            }
        );
    }

    #[test]
    fn test_to_unix_seconds_is_naive_utc() {
        let dt = DosDateTime {
            year: 1980,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert_eq!(dt.to_unix_seconds(), Some(315_532_800));
    }

    #[test]
    fn test_to_unix_seconds_rejects_zeroed_date() {
        // An all-zero DOS date decodes to month 0 / day 0
        assert_eq!(DosDateTime::from_dos(0, 0).to_unix_seconds(), None);
    }
}
