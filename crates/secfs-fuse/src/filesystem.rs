//! The FUSE request handlers.
//!
//! Every handler translates the kernel's inode-based request into a
//! path-based engine operation and maps the result back through
//! [`ToErrno`]. The engine stores no POSIX metadata, so attributes are
//! synthetic: files are 0644, directories 0755, everything is owned by the
//! mounting user, and all timestamps are the mount time.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use secfs_core::{Item, StorageSession};
use tracing::{debug, trace, warn};

use crate::error::ToErrno;
use crate::inode::{InodeTable, child_path};

/// How long the kernel may cache attributes and entries.
const ATTR_TTL: Duration = Duration::from_secs(1);

/// Block size reported to the kernel, unrelated to the engine's storage
/// block size.
const STAT_BLOCK_SIZE: u32 = 4096;

const FILE_PERM: u16 = 0o644;
const DIR_PERM: u16 = 0o755;

/// FUSE adapter over one mounted [`StorageSession`].
pub struct SecfsFilesystem {
    session: Arc<StorageSession>,
    inodes: InodeTable,
    uid: u32,
    gid: u32,
    mount_time: SystemTime,
}

impl SecfsFilesystem {
    pub fn new(session: Arc<StorageSession>) -> Self {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        SecfsFilesystem {
            session,
            inodes: InodeTable::new(),
            uid,
            gid,
            mount_time: SystemTime::now(),
        }
    }

    fn attr_for(&self, ino: u64, item: &Item) -> FileAttr {
        let (kind, perm, size, nlink) = if item.is_dir() {
            (FileType::Directory, DIR_PERM, 0, 2)
        } else {
            (FileType::RegularFile, FILE_PERM, item.size, 1)
        };
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(u64::from(STAT_BLOCK_SIZE)),
            atime: self.mount_time,
            mtime: self.mount_time,
            ctime: self.mount_time,
            crtime: self.mount_time,
            kind,
            perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: STAT_BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Engine path of `name` under the directory inode `parent`, or `None`
    /// if the parent is unknown or the name is not valid UTF-8.
    fn resolve_child(&self, parent: u64, name: &OsStr) -> Option<String> {
        let name = name.to_str()?;
        let dir = self.inodes.path_of(parent)?;
        Some(child_path(&dir, name))
    }
}

impl Filesystem for SecfsFilesystem {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, ?name, "lookup");
        let Some(path) = self.resolve_child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.session.lookup(&path) {
            Ok(item) => {
                let ino = self.inodes.get_or_insert(&path);
                reply.entry(&ATTR_TTL, &self.attr_for(ino, &item), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(ino, "getattr");
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.session.lookup(&path) {
            Ok(item) => reply.attr(&ATTR_TTL, &self.attr_for(ino, &item)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
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
        trace!(ino, ?mode, ?size, "setattr");
        // no permission or ownership model to change
        if mode.is_some() || uid.is_some() || gid.is_some() {
            reply.error(libc::ENOSYS);
            return;
        }
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if let Some(size) = size {
            if let Err(e) = self.session.truncate(&path, size) {
                reply.error(e.to_errno());
                return;
            }
        }
        // timestamp updates are accepted and ignored
        match self.session.lookup(&path) {
            Ok(item) => reply.attr(&ATTR_TTL, &self.attr_for(ino, &item)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        // the kernel falls back to create() for regular files
        reply.error(libc::ENOSYS);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, ?name, "mkdir");
        let Some(path) = self.resolve_child(parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.session.create_dir(&path) {
            Ok(item) => {
                let ino = self.inodes.get_or_insert(&path);
                reply.entry(&ATTR_TTL, &self.attr_for(ino, &item), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, ?name, "unlink");
        let Some(path) = self.resolve_child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.session.remove(&path) {
            Ok(()) => {
                self.inodes.remove_subtree(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, ?name, "rmdir");
        let Some(path) = self.resolve_child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.session.remove(&path) {
            Ok(()) => {
                self.inodes.remove_subtree(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        trace!(parent, ?name, newparent, ?newname, flags, "rename");
        if flags != 0 {
            // RENAME_NOREPLACE / RENAME_EXCHANGE are not supported
            reply.error(libc::EINVAL);
            return;
        }
        let (Some(src), Some(dst)) = (
            self.resolve_child(parent, name),
            self.resolve_child(newparent, newname),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.session.rename(&src, &dst) {
            Ok(()) => {
                self.inodes.remove_subtree(&dst);
                self.inodes.retarget_subtree(&src, &dst);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(ino, flags, "open");
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let truncate = flags & libc::O_TRUNC != 0;
        match self.session.open(&path, truncate) {
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(ino, fh, offset, size, "read");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.session.read(&path, offset as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(ino, fh, offset, size = data.len(), "write");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.session.write(&path, offset as u64, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // block content is already durable; metadata waits for the scheduler
        trace!(ino, fh, "flush");
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(ino, fh, "release");
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.error(libc::ENOSYS);
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(ino, "opendir");
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.session.lookup(&path) {
            Ok(item) if item.is_dir() => reply.opened(0, 0),
            Ok(_) => reply.error(libc::ENOTDIR),
            Err(e) => reply.error(e.to_errno()),
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
        trace!(ino, offset, "readdir");
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let children = match self.session.list_dir(&path) {
            Ok(children) => children,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ino, FileType::Directory, "..".to_string()),
        ];
        for child in children {
            let child_ino = self.inodes.get_or_insert(&child.path);
            let kind = if child.is_dir() {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            let name = child
                .path
                .rsplit('/')
                .next()
                .unwrap_or(&child.path)
                .to_string();
            entries.push((child_ino, kind, name));
        }

        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            // the next offset is the index after this entry
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        match nix::sys::statvfs::statvfs(self.session.data_dir()) {
            Ok(stat) => {
                let name_max = stat.name_max() as u32;
                let fragment_size = stat.fragment_size() as u32;
                reply.statfs(
                    u64::from(stat.blocks()),
                    u64::from(stat.blocks_free()),
                    u64::from(stat.blocks_available()),
                    u64::from(stat.files()),
                    u64::from(stat.files_free()),
                    fragment_size,
                    name_max,
                    fragment_size,
                );
            }
            Err(e) => {
                debug!(error = %e, "statvfs on the data directory failed, using defaults");
                let (_, entries) = self.session.usage();
                reply.statfs(
                    1_000_000,
                    500_000,
                    500_000,
                    entries,
                    1_000_000,
                    STAT_BLOCK_SIZE,
                    255,
                    STAT_BLOCK_SIZE,
                );
            }
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(ino, mask, "access");
        // no permission model; any known inode is accessible to the mounter
        if self.inodes.path_of(ino).is_some() {
            reply.ok();
        } else {
            reply.error(libc::ENOENT);
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        trace!(parent, ?name, "create");
        let Some(path) = self.resolve_child(parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.session.create_file(&path) {
            Ok(item) => {
                debug!(path, "created file");
                let ino = self.inodes.get_or_insert(&path);
                reply.created(&ATTR_TTL, &self.attr_for(ino, &item), 0, 0, 0);
            }
            Err(e) => {
                warn!(path, error = %e, "create failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyData) {
        reply.error(libc::ENOSYS);
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _link_name: &OsStr,
        _target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(libc::ENOSYS);
    }
}
