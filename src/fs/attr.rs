use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::vfs::{NodeId, NodeKind, Resolved};

/// File type bits
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// Permission bits for directories (rwxr-xr-x)
pub const DIR_PERM: u16 = 0o755;
/// Permission bits for files (rwxrwxrwx); nothing is writable anyway
pub const FILE_PERM: u16 = 0o777;

/// POSIX-style attributes of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttributes {
    pub ino: NodeId,
    pub kind: NodeKind,
    pub perm: u16,
    pub nlink: u32,
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

impl FileAttributes {
    /// Synthesize attributes for a resolved node
    pub fn of(resolved: &Resolved<'_>) -> Self {
        let node = resolved.node();
        match resolved {
            Resolved::Root(_) => FileAttributes {
                ino: node.id,
                kind: NodeKind::Directory,
                perm: DIR_PERM,
                nlink: 2,
                size: 1,
                mtime: None,
            },
            Resolved::Directory(_) => FileAttributes {
                ino: node.id,
                kind: NodeKind::Directory,
                perm: DIR_PERM,
                nlink: 2,
                size: 0,
                mtime: None,
            },
            Resolved::File(_) => FileAttributes {
                ino: node.id,
                kind: NodeKind::File,
                perm: FILE_PERM,
                nlink: 1,
                size: node.size,
                mtime: node
                    .modified
                    .and_then(|m| m.to_unix_seconds())
                    .map(to_system_time),
            },
        }
    }

    /// Full `st_mode`: type bits plus permissions
    pub fn mode(&self) -> u32 {
        let type_bits = match self.kind {
            NodeKind::Directory => S_IFDIR,
            NodeKind::File => S_IFREG,
        };
        type_bits | self.perm as u32
    }
}

fn to_system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveEntry, DosDateTime};
    use crate::vfs::{ArchiveIndex, PathResolver};

    fn index() -> ArchiveIndex {
        ArchiveIndex::build(&[ArchiveEntry {
            path: "dir/b.txt".to_string(),
            size: 5,
            is_dir: false,
            modified: DosDateTime {
                year: 2001,
                month: 9,
                day: 9,
                hour: 1,
                minute: 46,
                second: 40,
            },
        }])
    }

    #[test]
    fn test_root_attributes() {
        let index = index();
        let attr = FileAttributes::of(&PathResolver::new(&index).resolve("/").unwrap());
        assert_eq!(attr.mode(), 0o040755);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.size, 1);
        assert!(attr.mtime.is_none());
    }

    #[test]
    fn test_directory_attributes() {
        let index = index();
        let attr = FileAttributes::of(&PathResolver::new(&index).resolve("/dir").unwrap());
        assert_eq!(attr.kind, NodeKind::Directory);
        assert_eq!(attr.mode(), S_IFDIR | 0o755);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn test_file_attributes() {
        let index = index();
        let attr = FileAttributes::of(&PathResolver::new(&index).resolve("/dir/b.txt").unwrap());
        assert_eq!(attr.kind, NodeKind::File);
        assert_eq!(attr.mode(), 0o100777);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.size, 5);
        // 2001-09-09 01:46:40 UTC
        assert_eq!(
            attr.mtime,
            Some(UNIX_EPOCH + Duration::from_secs(1_000_000_000))
        );
    }
}
