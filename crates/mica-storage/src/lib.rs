//! Storage stack of the Mica filesystem: an in-memory block device, the
//! bitmap block allocator, the logical write-ahead log, the inode layer, and
//! the extent server that exposes it all through the extent contract.

pub mod block;
pub mod device;
pub mod error;
pub mod extent;
pub mod inode;
pub mod wal;

pub use block::BlockManager;
pub use device::BlockDevice;
pub use error::{Error, Result};
pub use extent::ExtentServer;
pub use inode::InodeManager;
pub use wal::{LogManager, LogRecord};

/// Encoding used for fixed-layout disk records (superblock, inode table).
pub(crate) fn disk_config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}
