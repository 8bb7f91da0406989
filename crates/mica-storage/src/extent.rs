//! Extent server: the storage-side implementation of the extent contract.
//!
//! One inode manager sits behind a mutex; storage errors fold into the
//! closed protocol status set at this boundary.

use crate::error::Error;
use crate::inode::InodeManager;
use log::debug;
use mica_fs::{Attr, ExtentStore, FileType, Inum, Status, INODE_NUM};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

impl From<Error> for Status {
    fn from(e: Error) -> Self {
        match e {
            Error::NoSuchInode(_) | Error::BadInum(_) => Status::NoEnt,
            _ => Status::Io,
        }
    }
}

pub struct ExtentServer {
    im: Mutex<InodeManager>,
}

impl ExtentServer {
    /// Formats a fresh device and opens the write-ahead log at `log_path`.
    pub fn new<P: AsRef<Path>>(log_path: P) -> crate::error::Result<Self> {
        Ok(Self {
            im: Mutex::new(InodeManager::new(log_path)?),
        })
    }

    fn manager(&self) -> MutexGuard<'_, InodeManager> {
        self.im.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn narrow(id: Inum) -> Result<u32, Status> {
        if id == 0 || id > u64::from(INODE_NUM) {
            return Err(Status::NoEnt);
        }
        Ok(id as u32)
    }
}

impl ExtentStore for ExtentServer {
    fn create(&self, ftype: FileType) -> Result<Inum, Status> {
        let inum = self.manager().alloc_inode(ftype)?;
        debug!("es: created extent {}", inum);
        Ok(u64::from(inum))
    }

    fn get(&self, id: Inum) -> Result<Vec<u8>, Status> {
        let inum = Self::narrow(id)?;
        Ok(self.manager().read_file(inum)?)
    }

    fn put(&self, id: Inum, buf: &[u8]) -> Result<(), Status> {
        let inum = Self::narrow(id)?;
        Ok(self.manager().write_file(inum, buf)?)
    }

    fn remove(&self, id: Inum) -> Result<(), Status> {
        let inum = Self::narrow(id)?;
        Ok(self.manager().remove_file(inum)?)
    }

    fn getattr(&self, id: Inum) -> Result<Attr, Status> {
        let inum = Self::narrow(id)?;
        Ok(self.manager().getattr(inum)?)
    }

    fn commit(&self) -> Result<(), Status> {
        Ok(self.manager().commit()?)
    }

    fn rollback(&self) -> Result<(), Status> {
        Ok(self.manager().rollback()?)
    }

    fn forward(&self) -> Result<(), Status> {
        Ok(self.manager().forward()?)
    }
}
