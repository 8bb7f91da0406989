//! Filesystem client: directory semantics, byte-offset file access, and
//! version-control passthroughs over the extent service.
//!
//! Every public operation takes the lock on the inode(s) it touches before
//! its first extent call and releases on every exit path. Operations that
//! touch a parent and a child (unlink, rmdir) acquire the parent first, then
//! the child, which gives a total acquisition order across clients.

use log::{debug, warn};
use mica_fs::dir::{self, DirEntry};
use mica_fs::{ExtentStore, FileType, Inum, Status, ROOT_INUM};
use mica_lock::LockClient;
use std::sync::Arc;
use thiserror::Error;

/// Client status set. The certificate-related variants belong to the outer
/// credential layer; the adapter above this crate surfaces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("rpc failure")]
    Rpc,
    #[error("no such file or directory")]
    NoEnt,
    #[error("i/o error")]
    Io,
    #[error("file exists")]
    Exist,
    #[error("pem file missing")]
    NoPem,
    #[error("invalid certificate")]
    BadPem,
    #[error("invalid argument")]
    Inval,
    #[error("certificate expired")]
    CertExpired,
    #[error("unknown user")]
    NoUser,
}

impl From<Status> for FsError {
    fn from(status: Status) -> Self {
        match status {
            Status::Rpc => FsError::Rpc,
            Status::NoEnt => FsError::NoEnt,
            Status::Io => FsError::Io,
            Status::Exist => FsError::Exist,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirInfo {
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

pub type SlinkInfo = FileInfo;

pub struct FsClient {
    ec: Arc<dyn ExtentStore>,
    lc: LockClient,
}

impl FsClient {
    /// Wires the client to an extent service and a lock service and
    /// initializes the root directory to empty content.
    pub fn new(ec: Arc<dyn ExtentStore>, lc: LockClient) -> Self {
        if let Err(e) = ec.put(ROOT_INUM, b"") {
            warn!("fs: init of root dir failed: {}", e);
        }
        Self { ec, lc }
    }

    fn with_lock<T>(&self, ino: Inum, f: impl FnOnce(&Self) -> T) -> T {
        self.lc.acquire(ino);
        let result = f(self);
        self.lc.release(ino);
        result
    }

    pub fn isfile(&self, ino: Inum) -> bool {
        self.with_lock(ino, |fs| fs.isfile_inner(ino))
    }

    pub fn isdir(&self, ino: Inum) -> bool {
        self.with_lock(ino, |fs| fs.isdir_inner(ino))
    }

    pub fn getfile(&self, ino: Inum) -> Result<FileInfo, FsError> {
        self.with_lock(ino, |fs| fs.getfile_inner(ino))
    }

    pub fn getdir(&self, ino: Inum) -> Result<DirInfo, FsError> {
        self.with_lock(ino, |fs| fs.getdir_inner(ino))
    }

    pub fn getslink(&self, ino: Inum) -> Result<SlinkInfo, FsError> {
        self.with_lock(ino, |fs| fs.getfile_inner(ino))
    }

    pub fn lookup(&self, parent: Inum, name: &str) -> Result<Option<Inum>, FsError> {
        self.with_lock(parent, |fs| fs.lookup_inner(parent, name))
    }

    pub fn readdir(&self, dirino: Inum) -> Result<Vec<DirEntry>, FsError> {
        self.with_lock(dirino, |fs| fs.readdir_inner(dirino))
    }

    pub fn create(&self, parent: Inum, name: &str) -> Result<Inum, FsError> {
        self.with_lock(parent, |fs| fs.create_inner(parent, name, FileType::File))
    }

    pub fn mkdir(&self, parent: Inum, name: &str) -> Result<Inum, FsError> {
        self.with_lock(parent, |fs| fs.create_inner(parent, name, FileType::Dir))
    }

    pub fn symlink(&self, parent: Inum, target: &str, name: &str) -> Result<Inum, FsError> {
        self.with_lock(parent, |fs| fs.symlink_inner(parent, target, name))
    }

    pub fn readslink(&self, ino: Inum) -> Result<String, FsError> {
        self.with_lock(ino, |fs| fs.readslink_inner(ino))
    }

    /// Truncates or zero-extends the content to `size` bytes.
    pub fn setattr(&self, ino: Inum, size: usize) -> Result<(), FsError> {
        self.with_lock(ino, |fs| fs.setattr_inner(ino, size))
    }

    pub fn read(&self, ino: Inum, size: usize, off: usize) -> Result<Vec<u8>, FsError> {
        self.with_lock(ino, |fs| fs.read_inner(ino, size, off))
    }

    pub fn write(&self, ino: Inum, off: usize, data: &[u8]) -> Result<usize, FsError> {
        self.with_lock(ino, |fs| fs.write_inner(ino, off, data))
    }

    pub fn unlink(&self, parent: Inum, name: &str) -> Result<(), FsError> {
        self.lc.acquire(parent);
        let target = match self.lookup_inner(parent, name) {
            Ok(Some(ino)) => ino,
            Ok(None) | Err(_) => {
                self.lc.release(parent);
                return Err(FsError::Io);
            }
        };
        self.lc.acquire(target);
        let result = self.unlink_inner(parent, name);
        self.lc.release(target);
        self.lc.release(parent);
        result
    }

    pub fn rmdir(&self, parent: Inum, name: &str) -> Result<(), FsError> {
        self.lc.acquire(parent);
        let target = match self.lookup_inner(parent, name) {
            Ok(Some(ino)) => ino,
            Ok(None) | Err(_) => {
                self.lc.release(parent);
                return Err(FsError::Io);
            }
        };
        self.lc.acquire(target);
        let result = self.rmdir_inner(parent, name);
        self.lc.release(target);
        self.lc.release(parent);
        result
    }

    pub fn commit(&self) -> Result<(), FsError> {
        Ok(self.ec.commit()?)
    }

    pub fn rollback(&self) -> Result<(), FsError> {
        Ok(self.ec.rollback()?)
    }

    pub fn forward(&self) -> Result<(), FsError> {
        Ok(self.ec.forward()?)
    }

    fn isfile_inner(&self, ino: Inum) -> bool {
        match self.ec.getattr(ino) {
            Ok(attr) => attr.ftype == FileType::File,
            Err(e) => {
                warn!("fs: isfile: getattr of {} failed: {}", ino, e);
                false
            }
        }
    }

    fn isdir_inner(&self, ino: Inum) -> bool {
        match self.ec.getattr(ino) {
            Ok(attr) => attr.ftype == FileType::Dir,
            Err(e) => {
                warn!("fs: isdir: getattr of {} failed: {}", ino, e);
                false
            }
        }
    }

    fn getfile_inner(&self, ino: Inum) -> Result<FileInfo, FsError> {
        let attr = self.ec.getattr(ino).map_err(|_| FsError::Io)?;
        debug!("fs: getfile {}, size {}", ino, attr.size);
        Ok(FileInfo {
            size: u64::from(attr.size),
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
        })
    }

    fn getdir_inner(&self, ino: Inum) -> Result<DirInfo, FsError> {
        let attr = self.ec.getattr(ino).map_err(|_| FsError::Io)?;
        Ok(DirInfo {
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
        })
    }

    fn readdir_inner(&self, dirino: Inum) -> Result<Vec<DirEntry>, FsError> {
        let content = self.ec.get(dirino).map_err(|_| FsError::Io)?;
        Ok(dir::decode(&content))
    }

    fn writedir_inner(&self, dirino: Inum, entries: &[DirEntry]) -> Result<(), FsError> {
        self.ec
            .put(dirino, &dir::encode(entries))
            .map_err(|_| FsError::Io)
    }

    fn lookup_inner(&self, parent: Inum, name: &str) -> Result<Option<Inum>, FsError> {
        let entries = self.readdir_inner(parent)?;
        let mut found = None;
        for entry in &entries {
            if entry.name == name {
                found = Some(entry.inum);
            }
        }
        Ok(found)
    }

    fn has_duplicate(&self, parent: Inum, name: &str) -> bool {
        match self.lookup_inner(parent, name) {
            Ok(found) => found.is_some(),
            Err(_) => true,
        }
    }

    fn add_entry_and_save(&self, parent: Inum, name: &str, ino: Inum) -> Result<(), FsError> {
        let mut entries = self.readdir_inner(parent)?;
        entries.push(DirEntry {
            name: name.to_string(),
            inum: ino,
        });
        self.writedir_inner(parent, &entries)
    }

    fn create_inner(&self, parent: Inum, name: &str, ftype: FileType) -> Result<Inum, FsError> {
        if self.has_duplicate(parent, name) {
            return Err(FsError::Exist);
        }
        let ino = self.ec.create(ftype).map_err(|e| {
            warn!("fs: create of {} failed: {}", name, e);
            FsError::Io
        })?;
        self.add_entry_and_save(parent, name, ino)?;
        Ok(ino)
    }

    fn symlink_inner(&self, parent: Inum, target: &str, name: &str) -> Result<Inum, FsError> {
        let ino = self.ec.create(FileType::Symlink).map_err(|e| {
            warn!("fs: symlink {} failed: {}", name, e);
            FsError::Io
        })?;
        self.ec
            .put(ino, target.as_bytes())
            .map_err(|_| FsError::Io)?;
        self.add_entry_and_save(parent, name, ino)?;
        Ok(ino)
    }

    fn readslink_inner(&self, ino: Inum) -> Result<String, FsError> {
        let content = self.ec.get(ino).map_err(|_| FsError::Io)?;
        String::from_utf8(content).map_err(|_| FsError::Io)
    }

    fn setattr_inner(&self, ino: Inum, size: usize) -> Result<(), FsError> {
        let mut content = self.ec.get(ino).map_err(|_| FsError::Io)?;
        if size == content.len() {
            return Ok(());
        }
        content.resize(size, 0);
        self.ec.put(ino, &content).map_err(|_| FsError::Io)
    }

    fn read_inner(&self, ino: Inum, size: usize, off: usize) -> Result<Vec<u8>, FsError> {
        let attr = self.ec.getattr(ino).map_err(|_| FsError::Io)?;
        if off >= attr.size as usize {
            warn!("fs: read at {} beyond size {}", off, attr.size);
            return Err(FsError::Io);
        }
        let content = self.ec.get(ino).map_err(|_| FsError::Io)?;
        let end = content.len().min(off + size);
        Ok(content[off..end].to_vec())
    }

    fn write_inner(&self, ino: Inum, off: usize, data: &[u8]) -> Result<usize, FsError> {
        let mut content = self.ec.get(ino).map_err(|_| FsError::Io)?;
        if off >= content.len() {
            // zero-fill the hole up to the write offset
            content.resize(off, 0);
            content.extend_from_slice(data);
        } else {
            // splice over existing bytes, extending past the end if needed
            let overlap = data.len().min(content.len() - off);
            content.splice(off..off + overlap, data.iter().copied());
        }
        self.ec.put(ino, &content).map_err(|_| FsError::Io)?;
        Ok(data.len())
    }

    fn unlink_inner(&self, parent: Inum, name: &str) -> Result<(), FsError> {
        debug!("fs: unlink {} from {}", name, parent);
        let mut entries = self.readdir_inner(parent)?;
        let pos = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or(FsError::Io)?;
        if !self.isfile_inner(entries[pos].inum) {
            return Err(FsError::Io);
        }
        self.ec.remove(entries[pos].inum).map_err(|_| FsError::Io)?;
        entries.remove(pos);
        self.writedir_inner(parent, &entries)
    }

    fn rmdir_inner(&self, parent: Inum, name: &str) -> Result<(), FsError> {
        debug!("fs: rmdir {} from {}", name, parent);
        let mut entries = self.readdir_inner(parent)?;
        let pos = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or(FsError::Io)?;
        let target = entries[pos].inum;
        if !self.isdir_inner(target) {
            return Err(FsError::Io);
        }
        if !self.readdir_inner(target)?.is_empty() {
            warn!("fs: rmdir of non-empty directory {}", name);
            return Err(FsError::Io);
        }
        self.ec.remove(target).map_err(|_| FsError::Io)?;
        entries.remove(pos);
        self.writedir_inner(parent, &entries)
    }
}
