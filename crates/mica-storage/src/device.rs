//! Fixed-size in-memory block device.

use crate::error::{Error, Result};
use mica_fs::{BlockId, BLOCK_NUM, BLOCK_SIZE};

/// `BLOCK_NUM` blocks of `BLOCK_SIZE` bytes, addressed by 1-based id.
/// Out-of-range accesses are rejected without touching state.
pub struct BlockDevice {
    blocks: Vec<u8>,
}

impl BlockDevice {
    pub fn new() -> Self {
        Self {
            blocks: vec![0; BLOCK_NUM as usize * BLOCK_SIZE],
        }
    }

    fn offset(id: BlockId) -> Result<usize> {
        if id == 0 || id > BLOCK_NUM {
            return Err(Error::BadBlockId(id));
        }
        Ok((id as usize - 1) * BLOCK_SIZE)
    }

    pub fn read_block(&self, id: BlockId, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        let off = Self::offset(id)?;
        buf.copy_from_slice(&self.blocks[off..off + BLOCK_SIZE]);
        Ok(())
    }

    pub fn write_block(&mut self, id: BlockId, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        let off = Self::offset(id)?;
        self.blocks[off..off + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

impl Default for BlockDevice {
    fn default() -> Self {
        Self::new()
    }
}
