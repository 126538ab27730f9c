//! FUSE boundary for [`ZipFs`].
//!
//! The kernel speaks in inode numbers; the filesystem speaks in paths. Node
//! ids from the archive index are used directly as inode numbers (the root
//! is id 1, which is also `FUSE_ROOT_ID`), so translating back to a path is
//! a table lookup. This is also the only place where [`FsError`] becomes an
//! errno.

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use log::{debug, trace, warn};
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::archive::ArchiveAccess;
use crate::error::{FsError, Result};
use crate::fs::{FileAttributes, FilesystemOps, ZipFs};
use crate::vfs::{NodeKind, VirtualPath};

/// Time-to-live for cached attributes; the tree never changes
const TTL: Duration = Duration::from_secs(60);

/// Block size for filesystem statistics
const BLOCK_SIZE: u32 = 512;

/// Longest file name we report in statfs
const MAX_NAME_LEN: u32 = 255;

/// Errno for a mutation result. `ZipFs` never lets a mutation succeed, so a
/// success here is still reported as a read-only failure.
fn mutation_errno<T>(result: Result<T>) -> i32 {
    match result {
        Ok(_) => FsError::ReadOnly.errno(),
        Err(e) => e.errno(),
    }
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
    }
}

/// Adapter implementing `fuser::Filesystem` on top of [`ZipFs`]
pub struct ZipFuse<A> {
    fs: ZipFs<A>,
    uid: u32,
    gid: u32,
    mount_time: SystemTime,
}

impl<A: ArchiveAccess> ZipFuse<A> {
    pub fn new(fs: ZipFs<A>) -> Self {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };

        ZipFuse {
            fs,
            uid,
            gid,
            mount_time: SystemTime::now(),
        }
    }

    /// Path of an inode, or ENOENT
    fn path_of(&self, ino: u64) -> std::result::Result<String, i32> {
        self.fs
            .index()
            .get(ino)
            .map(|node| VirtualPath::parse(&node.path).to_string())
            .ok_or(libc::ENOENT)
    }

    /// Path of `name` inside the directory `parent`, or ENOENT
    fn child_path(&self, parent: u64, name: &OsStr) -> std::result::Result<String, i32> {
        let name = name.to_str().ok_or(libc::ENOENT)?;
        let node = self.fs.index().get(parent).ok_or(libc::ENOENT)?;
        Ok(VirtualPath::parse(&node.path).child(name).to_string())
    }

    fn to_fuse_attr(&self, attr: &FileAttributes) -> FileAttr {
        FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
            atime: self.mount_time,
            mtime: attr.mtime.unwrap_or(self.mount_time),
            ctime: self.mount_time,
            crtime: self.mount_time,
            kind: file_type(attr.kind),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

impl<A: ArchiveAccess> Filesystem for ZipFuse<A> {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!("lookup(parent={}, name={:?})", parent, name);

        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };

        match self.fs.getattr(&path) {
            Ok(attr) => reply.entry(&TTL, &self.to_fuse_attr(&attr), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!("getattr(ino={})", ino);

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };

        match self.fs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &self.to_fuse_attr(&attr)),
            Err(e) => {
                warn!("getattr {}: {}", path, e);
                reply.error(e.errno())
            }
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!("setattr(ino={}, size={:?})", ino, size);

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };

        match size {
            Some(length) => reply.error(mutation_errno(self.fs.truncate(&path, length))),
            None => reply.error(FsError::ReadOnly.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!("readdir(ino={}, offset={})", ino, offset);

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };

        let names = match self.fs.readdir(&path) {
            Ok(names) => names,
            Err(e) => return reply.error(e.errno()),
        };

        let index = self.fs.index();
        let (dir, parent) = match index.get(ino) {
            Some(node) => (VirtualPath::parse(&node.path), node.parent),
            None => return reply.error(libc::ENOENT),
        };

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent, FileType::Directory, "..".to_string()),
        ];

        for name in names {
            if let Some(child) = index.lookup(&dir.child(&name).key()) {
                entries.push((child.id, file_type(child.kind), name));
            }
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            // next_offset = i + 1
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }

        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!("open(ino={}, flags={:#x})", ino, flags);

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };

        match self.fs.open(&path, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!("read(ino={}, offset={}, size={})", ino, offset, size);

        if offset < 0 {
            return reply.error(libc::EINVAL);
        }

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };

        match self.fs.read(&path, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                warn!("read {} at {}: {:#}", path, offset, e);
                reply.error(e.errno())
            }
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };

        match self.fs.flush(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };

        match self.fs.write(&path, data, offset.max(0) as u64) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        match self.child_path(parent, name) {
            Ok(path) => reply.error(mutation_errno(self.fs.create(&path, mode))),
            Err(_) => reply.error(FsError::ReadOnly.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        match self.child_path(parent, name) {
            Ok(path) => reply.error(mutation_errno(self.fs.mkdir(&path, mode))),
            Err(_) => reply.error(FsError::ReadOnly.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.child_path(parent, name) {
            Ok(path) => reply.error(mutation_errno(self.fs.unlink(&path))),
            Err(_) => reply.error(FsError::ReadOnly.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.child_path(parent, name) {
            Ok(path) => reply.error(mutation_errno(self.fs.rmdir(&path))),
            Err(_) => reply.error(FsError::ReadOnly.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = self.child_path(parent, name);
        let to = self.child_path(newparent, newname);
        match (from, to) {
            (Ok(from), Ok(to)) => reply.error(mutation_errno(self.fs.rename(&from, &to))),
            _ => reply.error(FsError::ReadOnly.errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        trace!("statfs");

        let (_, total_size) = self.fs.index().file_totals();
        let blocks = total_size.div_ceil(BLOCK_SIZE as u64);
        let files = self.fs.index().len() as u64;

        reply.statfs(blocks, 0, 0, files, 0, BLOCK_SIZE, MAX_NAME_LEN, BLOCK_SIZE);
    }
}

/// Mount `fs` read-only at `mountpoint` and serve requests on the calling
/// thread, one at a time, until the filesystem is unmounted.
pub fn mount<A: ArchiveAccess>(fs: ZipFs<A>, mountpoint: &Path) -> io::Result<()> {
    let (files, bytes) = fs.index().file_totals();
    let options = vec![
        MountOption::RO,
        MountOption::FSName("zipmount".to_string()),
        MountOption::Subtype("zip".to_string()),
        MountOption::DefaultPermissions,
    ];

    debug!(
        "Mounting at {} with {} files ({} bytes uncompressed)",
        mountpoint.display(),
        files,
        bytes
    );

    fuser::mount2(ZipFuse::new(fs), mountpoint, &options)
        .map_err(|e| io::Error::other(format!("FUSE mount failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_errno() {
        assert_eq!(mutation_errno::<()>(Err(FsError::ReadOnly)), libc::EROFS);
        assert_eq!(mutation_errno(Ok(())), libc::EROFS);
        assert_eq!(mutation_errno::<()>(Err(FsError::not_found("/x"))), libc::ENOENT);
    }

    #[test]
    fn test_file_type() {
        assert_eq!(file_type(NodeKind::Directory), FileType::Directory);
        assert_eq!(file_type(NodeKind::File), FileType::RegularFile);
    }
}
