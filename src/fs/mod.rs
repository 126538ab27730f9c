//! The read-only filesystem over an archive index.
//!
//! [`FilesystemOps`] is the path-based operation surface a mount driver
//! calls into. [`ZipFs`] answers lookups from the prebuilt [`ArchiveIndex`]
//! and reads by opening a fresh decompressing stream per call. Mutating
//! operations are rejected by the trait's provided methods before any path
//! is looked at.

pub mod attr;

pub use attr::FileAttributes;

use anyhow::Context;
use bytes::Bytes;
use log::{debug, trace};
use std::io::Read;

use crate::archive::ArchiveAccess;
use crate::error::{FsError, Result};
use crate::vfs::{ArchiveIndex, PathResolver, Resolved};

/// Handle returned by `open` and `create`; no per-handle state is kept
pub const NO_HANDLE: u64 = 0;

fn read_only<T>(op: &str, path: &str) -> Result<T> {
    debug!("{op}({path}) rejected: read-only file system");
    Err(FsError::ReadOnly)
}

/// Path-based filesystem operations
pub trait FilesystemOps {
    /// Attributes of the node at `path`
    fn getattr(&self, path: &str) -> Result<FileAttributes>;

    /// Names of the immediate children of the directory at `path`
    fn readdir(&self, path: &str) -> Result<Vec<String>>;

    /// Up to `length` bytes of the file at `path`, starting at `offset`
    fn read(&self, path: &str, offset: u64, length: u32) -> Result<Bytes>;

    fn open(&self, _path: &str, _flags: i32) -> Result<u64> {
        Ok(NO_HANDLE)
    }

    fn flush(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    fn write(&self, path: &str, _data: &[u8], _offset: u64) -> Result<usize> {
        read_only("write", path)
    }

    fn truncate(&self, path: &str, _length: u64) -> Result<()> {
        read_only("truncate", path)
    }

    fn create(&self, path: &str, _mode: u32) -> Result<u64> {
        read_only("create", path)
    }

    fn mkdir(&self, path: &str, _mode: u32) -> Result<()> {
        read_only("mkdir", path)
    }

    fn unlink(&self, path: &str) -> Result<()> {
        read_only("unlink", path)
    }

    fn rename(&self, from: &str, _to: &str) -> Result<()> {
        read_only("rename", from)
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        read_only("rmdir", path)
    }
}

/// A read-only filesystem over one opened archive
pub struct ZipFs<A> {
    archive: A,
    index: ArchiveIndex,
}

impl<A: ArchiveAccess> ZipFs<A> {
    /// Build the index from the archive's entry list
    pub fn new(archive: A) -> Self {
        let index = ArchiveIndex::build(archive.entries());
        ZipFs { archive, index }
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(&self.index)
    }
}

impl<A: ArchiveAccess> FilesystemOps for ZipFs<A> {
    fn getattr(&self, path: &str) -> Result<FileAttributes> {
        let resolved = self.resolver().resolve(path)?;
        Ok(FileAttributes::of(&resolved))
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let node = match self.resolver().resolve(path)? {
            Resolved::File(_) => return Err(FsError::not_found(path)),
            dir => dir.node(),
        };

        Ok(self
            .index
            .children(node)
            .map(|child| child.name.clone())
            .collect())
    }

    fn read(&self, path: &str, offset: u64, length: u32) -> Result<Bytes> {
        let node = match self.resolver().resolve(path)? {
            Resolved::File(node) => node,
            _ => return Err(FsError::not_found(path)),
        };

        if offset >= node.size || length == 0 {
            return Ok(Bytes::new());
        }

        let entry_name = node
            .entry_name
            .as_deref()
            .ok_or_else(|| FsError::not_found(path))?;
        trace!("read {} bytes of {} at offset {}", length, entry_name, offset);

        let stream = self.archive.open_entry_at(entry_name, offset)?;

        let wanted = (length as u64).min(node.size - offset);
        let mut buf = Vec::with_capacity(wanted as usize);
        stream
            .take(wanted)
            .read_to_end(&mut buf)
            .with_context(|| format!("Failed to read {entry_name}"))?;

        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveEntry, DosDateTime};
    use crate::vfs::NodeKind;
    use anyhow::anyhow;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory archive that records which entries were opened
    struct FakeArchive {
        entries: Vec<ArchiveEntry>,
        contents: HashMap<String, Vec<u8>>,
        opened: Mutex<Vec<String>>,
    }

    impl FakeArchive {
        fn new(files: &[(&str, &[u8])]) -> Self {
            let entries = files
                .iter()
                .map(|(path, data)| ArchiveEntry {
                    path: path.to_string(),
                    size: data.len() as u64,
                    is_dir: path.ends_with('/'),
                    modified: DosDateTime::from_dos(0x5021, 0x6000),
                })
                .collect();
            let contents = files
                .iter()
                .map(|(path, data)| (path.to_string(), data.to_vec()))
                .collect();
            FakeArchive {
                entries,
                contents,
                opened: Mutex::new(Vec::new()),
            }
        }
    }

    impl ArchiveAccess for FakeArchive {
        fn entries(&self) -> &[ArchiveEntry] {
            &self.entries
        }

        fn open_entry(&self, path: &str) -> anyhow::Result<Box<dyn Read + Send>> {
            self.opened.lock().unwrap().push(path.to_string());
            match self.contents.get(path) {
                Some(data) => Ok(Box::new(std::io::Cursor::new(data.clone()))),
                None => Err(anyhow!("File not found in archive: {path}")),
            }
        }
    }

    /// Archive whose entry streams always fail, like a dropped connection
    struct BrokenArchive(Vec<ArchiveEntry>);

    impl ArchiveAccess for BrokenArchive {
        fn entries(&self) -> &[ArchiveEntry] {
            &self.0
        }

        fn open_entry(&self, _path: &str) -> anyhow::Result<Box<dyn Read + Send>> {
            Err(anyhow!("connection reset by peer"))
        }
    }

    fn sample() -> ZipFs<FakeArchive> {
        ZipFs::new(FakeArchive::new(&[
            ("a.txt", b"hello"),
            ("dir/b.txt", b"world"),
        ]))
    }

    #[test]
    fn test_getattr() {
        let fs = sample();
        let attr = fs.getattr("/a.txt").unwrap();
        assert_eq!(attr.kind, NodeKind::File);
        assert_eq!(attr.size, 5);
        assert_eq!(fs.getattr("/dir").unwrap().kind, NodeKind::Directory);
        assert!(matches!(fs.getattr("/missing.txt"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_readdir() {
        let fs = sample();
        assert_eq!(fs.readdir("/").unwrap(), ["a.txt", "dir"]);
        assert_eq!(fs.readdir("/dir").unwrap(), ["b.txt"]);
        assert_eq!(fs.readdir("/").unwrap(), fs.readdir("/").unwrap());
        assert!(matches!(fs.readdir("/nope"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.readdir("/a.txt"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_read_slices() {
        let fs = sample();
        assert_eq!(fs.read("/a.txt", 0, 5).unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(fs.read("/a.txt", 3, 10).unwrap(), Bytes::from_static(b"lo"));
        assert_eq!(fs.read("/a.txt", 1, 2).unwrap(), Bytes::from_static(b"el"));
    }

    #[test]
    fn test_read_at_or_past_end_skips_stream() {
        let fs = sample();
        assert!(fs.read("/a.txt", 5, 10).unwrap().is_empty());
        assert!(fs.read("/a.txt", 500, 10).unwrap().is_empty());
        assert!(fs.read("/a.txt", 0, 0).unwrap().is_empty());
        assert!(fs.archive().opened.lock().unwrap().is_empty());
    }

    #[test]
    fn test_each_read_opens_fresh_stream() {
        let fs = sample();
        fs.read("/dir/b.txt", 0, 2).unwrap();
        fs.read("/dir/b.txt", 2, 2).unwrap();
        assert_eq!(*fs.archive().opened.lock().unwrap(), ["dir/b.txt", "dir/b.txt"]);
    }

    #[test]
    fn test_read_past_short_stream_is_empty() {
        let mut archive = FakeArchive::new(&[("short.bin", b"abc")]);
        archive.entries[0].size = 100;
        let fs = ZipFs::new(archive);

        assert!(fs.read("/short.bin", 50, 10).unwrap().is_empty());
        assert_eq!(fs.read("/short.bin", 1, 10).unwrap(), Bytes::from_static(b"bc"));
    }

    #[test]
    fn test_read_directory_or_missing_is_not_found() {
        let fs = sample();
        assert!(matches!(fs.read("/dir", 0, 1), Err(FsError::NotFound(_))));
        assert!(matches!(fs.read("/", 0, 1), Err(FsError::NotFound(_))));
        assert!(matches!(fs.read("/nope", 0, 1), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_collaborator_failure_is_io() {
        let fs = ZipFs::new(BrokenArchive(FakeArchive::new(&[("a.txt", b"hello")]).entries));
        let err = fs.read("/a.txt", 0, 5).unwrap_err();
        assert!(matches!(err, FsError::Io(_)));
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn test_open_and_flush_always_succeed() {
        let fs = sample();
        assert_eq!(fs.open("/a.txt", 0).unwrap(), NO_HANDLE);
        assert_eq!(fs.open("/does/not/exist", 0).unwrap(), NO_HANDLE);
        assert!(fs.flush("/a.txt").is_ok());
        assert!(fs.flush("/nope").is_ok());
    }

    #[test]
    fn test_mutations_rejected() {
        let fs = sample();
        for path in ["/a.txt", "/dir", "/", "/missing"] {
            assert!(matches!(fs.write(path, b"x", 0), Err(FsError::ReadOnly)));
            assert!(matches!(fs.truncate(path, 0), Err(FsError::ReadOnly)));
            assert!(matches!(fs.create(path, 0o644), Err(FsError::ReadOnly)));
            assert!(matches!(fs.mkdir(path, 0o755), Err(FsError::ReadOnly)));
            assert!(matches!(fs.unlink(path), Err(FsError::ReadOnly)));
            assert!(matches!(fs.rename(path, "/other"), Err(FsError::ReadOnly)));
            assert!(matches!(fs.rmdir(path), Err(FsError::ReadOnly)));
        }
        // Nothing changed
        assert_eq!(fs.readdir("/").unwrap(), ["a.txt", "dir"]);
    }
}
