//! Shared on-disk and protocol types for the Mica filesystem.
//!
//! Both sides of the extent boundary depend on this crate: the storage
//! server for the disk geometry and record layouts, the client for the
//! extent contract, status codes, and the directory codec.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod dir;

/// Total device capacity in bytes.
pub const DISK_SIZE: usize = 16 * 1024 * 1024;
/// Bytes per block.
pub const BLOCK_SIZE: usize = 512;
/// Number of blocks on the device. Block ids are 1-based; 0 means "no block".
pub const BLOCK_NUM: u32 = (DISK_SIZE / BLOCK_SIZE) as u32;
/// Number of inode-table slots. Inums are 1-based; 0 means "no inode".
pub const INODE_NUM: u32 = 1024;
/// Inodes per inode-table block.
pub const IPB: u32 = 1;
/// Bitmap bits per block.
pub const BPB: u32 = (BLOCK_SIZE * 8) as u32;
/// Direct block ids held in the inode itself.
pub const NDIRECT: usize = 32;
/// Block ids held in the indirect block.
pub const NINDIRECT: usize = BLOCK_SIZE / 4;
/// Largest supported file content in bytes.
pub const MAX_FILE_SIZE: usize = (NDIRECT - 1 + NINDIRECT) * BLOCK_SIZE;
/// Inum of the root directory, allocated at format time.
pub const ROOT_INUM: Inum = 1;

/// Extent id as seen by the client; the storage side narrows it to u32.
pub type Inum = u64;
pub type BlockId = u32;

/// Bitmap block holding the bit for block id `b`. The first bitmap block is
/// block 2; the bit index within it is `(b - 1) % BPB`, MSB-first per byte.
pub const fn bblock(b: BlockId) -> BlockId {
    (b - 1) / BPB + 2
}

/// Inode-table block holding inode `i`. Inums start at 1.
pub const fn iblock(i: u32, nblocks: u32) -> BlockId {
    nblocks / BPB + i / IPB + 3
}

/// Superblock written to block 1 at format time; immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperBlock {
    pub size: u32,
    pub nblocks: u32,
    pub ninodes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum FileType {
    Dir = 1,
    File = 2,
    Symlink = 3,
}

impl FileType {
    /// Decodes a raw on-disk type field; 0 (a free slot) and unknown values
    /// yield `None`.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(FileType::Dir),
            2 => Some(FileType::File),
            3 => Some(FileType::Symlink),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// On-disk inode record. A raw `ftype` of zero marks a free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub ftype: u32,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub direct: [u32; NDIRECT],
    pub indirect: u32,
}

/// Fixed-int encoded size of an inode record inside its table block.
pub const INODE_DISK_SIZE: usize = 4 * (5 + NDIRECT + 1);

impl Inode {
    pub fn new(ftype: FileType, now: u32) -> Self {
        Self {
            ftype: ftype.as_raw(),
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            direct: [0; NDIRECT],
            indirect: 0,
        }
    }

    /// Number of data blocks the current size occupies.
    pub fn block_count(&self) -> usize {
        (self.size as usize).div_ceil(BLOCK_SIZE)
    }
}

/// Attributes reported by `getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub ftype: FileType,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

/// Non-OK outcomes of the extent protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Status {
    #[error("rpc failure")]
    Rpc,
    #[error("no such extent")]
    NoEnt,
    #[error("i/o error")]
    Io,
    #[error("extent already exists")]
    Exist,
}

/// Contract the filesystem client consumes. Implemented in-process by the
/// storage server here; a full deployment puts RPC between the two.
pub trait ExtentStore: Send + Sync {
    fn create(&self, ftype: FileType) -> Result<Inum, Status>;
    fn get(&self, id: Inum) -> Result<Vec<u8>, Status>;
    fn put(&self, id: Inum, buf: &[u8]) -> Result<(), Status>;
    fn remove(&self, id: Inum) -> Result<(), Status>;
    fn getattr(&self, id: Inum) -> Result<Attr, Status>;

    /// Appends a checkpoint to the storage log.
    fn commit(&self) -> Result<(), Status>;
    /// Undoes the records back to the previous checkpoint.
    fn rollback(&self) -> Result<(), Status>;
    /// Redoes the records forward to the next checkpoint.
    fn forward(&self) -> Result<(), Status>;
}
