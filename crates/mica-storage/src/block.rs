//! Block layer: disk format and the free-block bitmap.
//!
//! Disk layout: `| superblock | free block bitmap | inode table | data |`
//!
//! Bit `b` of the bitmap (MSB-first within each byte) tracks block id `b`;
//! a block is free iff its bit is 0. The bits covering the superblock, the
//! bitmap itself, and the inode table are set once at format time and never
//! cleared.

use crate::device::BlockDevice;
use crate::disk_config;
use crate::error::{Error, Result};
use log::warn;
use mica_fs::{bblock, iblock, BlockId, SuperBlock, BLOCK_NUM, BLOCK_SIZE, BPB, INODE_NUM};

pub struct BlockManager {
    device: BlockDevice,
    pub sb: SuperBlock,
}

impl BlockManager {
    /// Builds a freshly formatted device: superblock written to block 1,
    /// metadata region marked used in the bitmap.
    pub fn new() -> Result<Self> {
        let mut bm = Self {
            device: BlockDevice::new(),
            sb: SuperBlock {
                size: BLOCK_NUM * BLOCK_SIZE as u32,
                nblocks: BLOCK_NUM,
                ninodes: INODE_NUM,
            },
        };
        bm.format()?;
        Ok(bm)
    }

    fn format(&mut self) -> Result<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        bincode::serde::encode_into_slice(&self.sb, &mut buf, disk_config())
            .map_err(|e| Error::Codec(e.to_string()))?;
        self.device.write_block(1, &buf)?;

        // the metadata region ends with the last inode-table block
        let last_bnum = iblock(INODE_NUM, self.sb.nblocks);

        // bitmap blocks covered entirely by the region are all ones
        let buf = [0xFFu8; BLOCK_SIZE];
        for bnum in bblock(1)..bblock(last_bnum) {
            self.device.write_block(bnum, &buf)?;
        }

        // the tail block: whole 0xFF bytes, then one byte with the top
        // `remaining % 8` bits set
        let mut buf = [0u8; BLOCK_SIZE];
        let remaining = (last_bnum - (bblock(last_bnum) - bblock(1)) * BPB) as usize;
        for byte in buf.iter_mut().take(remaining / 8) {
            *byte = 0xFF;
        }
        let mut last_byte = 0u8;
        for pos in 0..remaining % 8 {
            last_byte |= 1 << (7 - pos);
        }
        buf[remaining / 8] = last_byte;
        self.device.write_block(bblock(last_bnum), &buf)
    }

    /// Allocates the lowest-indexed free data block and returns its id.
    pub fn alloc_block(&mut self) -> Result<BlockId> {
        // search from the first block after the inode table
        let first = bblock(iblock(INODE_NUM, self.sb.nblocks) + 1);
        for bnum in first..=bblock(BLOCK_NUM) {
            let mut bitmap = [0u8; BLOCK_SIZE];
            self.device.read_block(bnum, &mut bitmap)?;
            for i in 0..BLOCK_SIZE {
                if bitmap[i] == 0xFF {
                    continue;
                }
                for bit in 0..8 {
                    let mask = 1u8 << (7 - bit);
                    if bitmap[i] & mask == 0 {
                        bitmap[i] |= mask;
                        self.device.write_block(bnum, &bitmap)?;
                        let pos = (i * 8 + bit) as u32;
                        return Ok((bnum - bblock(1)) * BPB + pos + 1);
                    }
                }
            }
        }
        warn!("bm: no free block available");
        Err(Error::NoFreeBlock)
    }

    /// Clears the bitmap bit for `id`. Clearing an already-free bit is a
    /// no-op; out-of-range ids are rejected.
    pub fn free_block(&mut self, id: BlockId) -> Result<()> {
        if id == 0 || id > BLOCK_NUM {
            warn!("bm: block id out of range: {}", id);
            return Err(Error::BadBlockId(id));
        }
        let bnum = bblock(id);
        let mut bitmap = [0u8; BLOCK_SIZE];
        self.device.read_block(bnum, &mut bitmap)?;
        let pos = ((id - 1) % BPB) as usize;
        bitmap[pos / 8] &= !(1u8 << (7 - pos % 8));
        self.device.write_block(bnum, &bitmap)
    }

    /// True when the bitmap bit for `id` is set.
    pub fn block_in_use(&self, id: BlockId) -> Result<bool> {
        if id == 0 || id > BLOCK_NUM {
            return Err(Error::BadBlockId(id));
        }
        let mut bitmap = [0u8; BLOCK_SIZE];
        self.device.read_block(bblock(id), &mut bitmap)?;
        let pos = ((id - 1) % BPB) as usize;
        Ok(bitmap[pos / 8] & (1u8 << (7 - pos % 8)) != 0)
    }

    pub fn read_block(&self, id: BlockId, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        self.device.read_block(id, buf)
    }

    pub fn write_block(&mut self, id: BlockId, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.device.write_block(id, buf)
    }
}
