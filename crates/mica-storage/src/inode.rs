//! Inode layer: allocation, file content across direct and indirect blocks,
//! and the undo/redo machinery driven by the write-ahead log.
//!
//! Every mutation emits one log record; `commit` cuts a checkpoint and
//! `rollback`/`forward` replay the log back through the same write
//! primitives. Content writes go through `write_file_inner`, which never
//! logs, so replay cannot re-log itself.

use crate::block::BlockManager;
use crate::disk_config;
use crate::error::{Error, Result};
use crate::wal::{LogManager, LogRecord};
use log::{debug, info, warn};
use mica_fs::{
    iblock, Attr, BlockId, FileType, Inode, BLOCK_NUM, BLOCK_SIZE, INODE_DISK_SIZE, INODE_NUM,
    IPB, MAX_FILE_SIZE, NDIRECT, NINDIRECT, ROOT_INUM,
};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

pub struct InodeManager {
    bm: BlockManager,
    lm: LogManager,
}

impl InodeManager {
    /// Formats a fresh device and allocates the root directory inode.
    pub fn new<P: AsRef<Path>>(log_path: P) -> Result<Self> {
        let mut im = Self {
            bm: BlockManager::new()?,
            lm: LogManager::new(log_path)?,
        };
        let root = im.alloc_inode(FileType::Dir)?;
        if u64::from(root) != ROOT_INUM {
            return Err(Error::Format("root inode is not inum 1"));
        }
        Ok(im)
    }

    fn valid_inum(inum: u32) -> Result<()> {
        if inum == 0 || inum > INODE_NUM {
            warn!("im: inum out of range {}", inum);
            return Err(Error::BadInum(inum));
        }
        Ok(())
    }

    fn valid_size(size: usize) -> Result<()> {
        if size > MAX_FILE_SIZE {
            warn!("im: file size out of range {}", size);
            return Err(Error::FileTooLarge(size));
        }
        Ok(())
    }

    /// Reads the table slot for `inum`, free or not.
    fn read_slot(&self, inum: u32) -> Result<Inode> {
        let mut buf = [0u8; BLOCK_SIZE];
        self.bm.read_block(iblock(inum, BLOCK_NUM), &mut buf)?;
        let off = ((inum - 1) % IPB) as usize * INODE_DISK_SIZE;
        let (ino, _) =
            bincode::serde::decode_from_slice(&buf[off..off + INODE_DISK_SIZE], disk_config())
                .map_err(|e| Error::Codec(e.to_string()))?;
        Ok(ino)
    }

    fn get_inode(&self, inum: u32) -> Result<Inode> {
        Self::valid_inum(inum)?;
        let ino = self.read_slot(inum)?;
        if ino.ftype == 0 {
            info!("im: inode {} does not exist", inum);
            return Err(Error::NoSuchInode(inum));
        }
        Ok(ino)
    }

    /// Writes `ino` back to its table slot, refreshing ctime.
    fn put_inode(&mut self, inum: u32, mut ino: Inode) -> Result<()> {
        Self::valid_inum(inum)?;
        ino.ctime = now();
        let bnum = iblock(inum, BLOCK_NUM);
        let mut buf = [0u8; BLOCK_SIZE];
        self.bm.read_block(bnum, &mut buf)?;
        let off = ((inum - 1) % IPB) as usize * INODE_DISK_SIZE;
        bincode::serde::encode_into_slice(&ino, &mut buf[off..off + INODE_DISK_SIZE], disk_config())
            .map_err(|e| Error::Codec(e.to_string()))?;
        self.bm.write_block(bnum, &buf)
    }

    /// Claims the first free table slot for a new inode of `ftype`.
    pub fn alloc_inode(&mut self, ftype: FileType) -> Result<u32> {
        for inum in 1..=INODE_NUM {
            if self.read_slot(inum)?.ftype != 0 {
                continue;
            }
            self.put_inode(inum, Inode::new(ftype, now()))?;
            debug!("im: allocate inode {}", inum);
            self.lm.create(inum, ftype.as_raw())?;
            return Ok(inum);
        }
        warn!("im: no free inode available");
        Err(Error::NoFreeInode)
    }

    /// Marks the slot free. Data blocks are not touched here; that is
    /// `remove_file`'s job. Freeing an already-free slot is a no-op.
    pub fn free_inode(&mut self, inum: u32) -> Result<()> {
        Self::valid_inum(inum)?;
        let mut ino = match self.get_inode(inum) {
            Ok(ino) => ino,
            Err(Error::NoSuchInode(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        ino.ftype = 0;
        self.put_inode(inum, ino)
    }

    pub fn getattr(&self, inum: u32) -> Result<Attr> {
        let ino = self.get_inode(inum)?;
        let ftype = FileType::from_raw(ino.ftype).ok_or(Error::BadType(ino.ftype))?;
        Ok(Attr {
            ftype,
            size: ino.size,
            atime: ino.atime,
            mtime: ino.mtime,
            ctime: ino.ctime,
        })
    }

    /// Reads the full content of `inum` and refreshes its atime.
    pub fn read_file(&mut self, inum: u32) -> Result<Vec<u8>> {
        debug!("im: read file {}", inum);
        let mut ino = self.get_inode(inum)?;
        let size = ino.size as usize;
        let nblocks = ino.block_count();
        let mut out = vec![0u8; size];
        let mut buf = [0u8; BLOCK_SIZE];
        for i in 0..nblocks.min(NDIRECT) {
            self.bm.read_block(ino.direct[i], &mut buf)?;
            let start = i * BLOCK_SIZE;
            let len = BLOCK_SIZE.min(size - start);
            out[start..start + len].copy_from_slice(&buf[..len]);
        }
        if nblocks > NDIRECT {
            let table = self.read_indirect(ino.indirect)?;
            for i in 0..nblocks - NDIRECT {
                self.bm.read_block(table[i], &mut buf)?;
                let start = (NDIRECT + i) * BLOCK_SIZE;
                let len = BLOCK_SIZE.min(size - start);
                out[start..start + len].copy_from_slice(&buf[..len]);
            }
        }
        ino.atime = now();
        self.put_inode(inum, ino)?;
        Ok(out)
    }

    /// Replaces the whole content of `inum`, logging old and new content on
    /// success.
    pub fn write_file(&mut self, inum: u32, buf: &[u8]) -> Result<()> {
        let old = self.read_file(inum)?;
        debug!("im: write file {}", inum);
        self.write_file_inner(inum, buf)?;
        self.lm.update(inum, &old, buf)
    }

    /// Frees the inode, its content log record, and every data block it
    /// owns, including the indirect block when present.
    pub fn remove_file(&mut self, inum: u32) -> Result<()> {
        debug!("im: remove file {}", inum);
        let ino = self.get_inode(inum)?;
        let old = self.read_file(inum)?;
        self.lm.update(inum, &old, &[])?;
        self.lm.delete(inum, ino.ftype)?;

        self.free_inode(inum)?;

        let nblocks = ino.block_count();
        for i in 0..nblocks.min(NDIRECT) {
            self.bm.free_block(ino.direct[i])?;
        }
        if nblocks > NDIRECT {
            let table = self.read_indirect(ino.indirect)?;
            for i in 0..nblocks - NDIRECT {
                self.bm.free_block(table[i])?;
            }
            self.bm.free_block(ino.indirect)?;
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        info!("im: commit");
        self.lm.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        info!("im: rollback");
        let records = self.lm.rollback()?;
        debug!("im: {} records to undo", records.len());
        for record in records.iter().rev() {
            self.undo(record)?;
        }
        Ok(())
    }

    pub fn forward(&mut self) -> Result<()> {
        info!("im: forward");
        let records = self.lm.forward()?;
        debug!("im: {} records to redo", records.len());
        for record in &records {
            self.redo(record)?;
        }
        Ok(())
    }

    fn redo(&mut self, record: &LogRecord) -> Result<()> {
        match record {
            LogRecord::Create { inum, ftype } => {
                debug!("im: redo create inum {}", inum);
                self.reinstate(*inum, *ftype)
            }
            LogRecord::Update { inum, new, .. } => {
                debug!("im: redo update inum {}", inum);
                self.write_file_inner(*inum, new)
            }
            LogRecord::Delete { inum, .. } => {
                debug!("im: redo delete inum {}", inum);
                self.free_inode(*inum)
            }
            LogRecord::Commit => {
                warn!("im: unexpected commit record to redo");
                Ok(())
            }
        }
    }

    fn undo(&mut self, record: &LogRecord) -> Result<()> {
        match record {
            LogRecord::Create { inum, .. } => {
                debug!("im: undo create inum {}", inum);
                self.free_inode(*inum)
            }
            LogRecord::Update { inum, old, .. } => {
                debug!("im: undo update inum {}", inum);
                self.write_file_inner(*inum, old)
            }
            LogRecord::Delete { inum, ftype } => {
                debug!("im: undo delete inum {}", inum);
                self.reinstate(*inum, *ftype)
            }
            LogRecord::Commit => {
                warn!("im: unexpected commit record to undo");
                Ok(())
            }
        }
    }

    /// Puts a size-zero inode of the logged raw type back into its slot.
    fn reinstate(&mut self, inum: u32, ftype: u32) -> Result<()> {
        let t = now();
        let ino = Inode {
            ftype,
            size: 0,
            atime: t,
            mtime: t,
            ctime: t,
            direct: [0; NDIRECT],
            indirect: 0,
        };
        self.put_inode(inum, ino)
    }

    /// Rewrites content without logging. Blocks are kept, freed, or
    /// allocated to match the new size across the direct range and the
    /// single indirect level.
    fn write_file_inner(&mut self, inum: u32, buf: &[u8]) -> Result<()> {
        Self::valid_size(buf.len())?;
        let mut ino = self.get_inode(inum)?;

        let old_blocks = ino.block_count();
        let new_blocks = buf.len().div_ceil(BLOCK_SIZE);

        if new_blocks <= old_blocks {
            self.shrink(&mut ino, buf, old_blocks, new_blocks)?;
        } else {
            self.grow(&mut ino, buf, old_blocks, new_blocks)?;
        }

        ino.size = buf.len() as u32;
        ino.mtime = now();
        self.put_inode(inum, ino)
    }

    fn shrink(
        &mut self,
        ino: &mut Inode,
        buf: &[u8],
        old_blocks: usize,
        new_blocks: usize,
    ) -> Result<()> {
        for i in 0..new_blocks.min(NDIRECT) {
            self.write_chunk(ino.direct[i], buf, i)?;
        }
        if new_blocks > NDIRECT {
            let table = self.read_indirect(ino.indirect)?;
            for i in 0..new_blocks - NDIRECT {
                self.write_chunk(table[i], buf, NDIRECT + i)?;
            }
        }

        // surplus direct blocks
        for i in new_blocks..old_blocks.min(NDIRECT) {
            self.bm.free_block(ino.direct[i])?;
        }
        // surplus indirect pointees, then the indirect block itself once the
        // file fits in the direct range again
        if old_blocks > NDIRECT {
            let table = self.read_indirect(ino.indirect)?;
            for i in new_blocks.saturating_sub(NDIRECT)..old_blocks - NDIRECT {
                self.bm.free_block(table[i])?;
            }
            if new_blocks <= NDIRECT {
                self.bm.free_block(ino.indirect)?;
            }
        }
        Ok(())
    }

    fn grow(
        &mut self,
        ino: &mut Inode,
        buf: &[u8],
        old_blocks: usize,
        new_blocks: usize,
    ) -> Result<()> {
        // rewrite the direct blocks the file already owns
        for i in 0..old_blocks.min(NDIRECT) {
            self.write_chunk(ino.direct[i], buf, i)?;
        }
        // allocate the rest of the direct range
        for i in old_blocks..new_blocks.min(NDIRECT) {
            ino.direct[i] = self.bm.alloc_block()?;
            self.write_chunk(ino.direct[i], buf, i)?;
        }

        if new_blocks > NDIRECT {
            let mut table = if old_blocks <= NDIRECT {
                ino.indirect = self.bm.alloc_block()?;
                [0u32; NINDIRECT]
            } else {
                self.read_indirect(ino.indirect)?
            };
            let owned = old_blocks.saturating_sub(NDIRECT);
            for i in 0..owned {
                self.write_chunk(table[i], buf, NDIRECT + i)?;
            }
            for i in owned..new_blocks - NDIRECT {
                table[i] = self.bm.alloc_block()?;
                self.write_chunk(table[i], buf, NDIRECT + i)?;
            }
            self.write_indirect(ino.indirect, &table)?;
        }
        Ok(())
    }

    /// Writes content block `idx` of `buf` to device block `id`,
    /// zero-padding a partial tail.
    fn write_chunk(&mut self, id: BlockId, buf: &[u8], idx: usize) -> Result<()> {
        let start = idx * BLOCK_SIZE;
        let end = buf.len().min(start + BLOCK_SIZE);
        let mut block = [0u8; BLOCK_SIZE];
        block[..end - start].copy_from_slice(&buf[start..end]);
        self.bm.write_block(id, &block)
    }

    fn read_indirect(&self, id: BlockId) -> Result<[BlockId; NINDIRECT]> {
        let mut buf = [0u8; BLOCK_SIZE];
        self.bm.read_block(id, &mut buf)?;
        let mut table = [0u32; NINDIRECT];
        for (i, chunk) in buf.chunks_exact(4).enumerate() {
            table[i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(table)
    }

    fn write_indirect(&mut self, id: BlockId, table: &[BlockId; NINDIRECT]) -> Result<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        for (i, bnum) in table.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&bnum.to_le_bytes());
        }
        self.bm.write_block(id, &buf)
    }

    #[cfg(test)]
    pub(crate) fn block_manager(&self) -> &BlockManager {
        &self.bm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn log_path(name: &str) -> PathBuf {
        static SEQ: AtomicU32 = AtomicU32::new(0);
        std::env::temp_dir().join(format!(
            "mica-inode-{}-{}-{}.log",
            name,
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ))
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn format_allocates_root_directory() {
        let im = InodeManager::new(log_path("root")).unwrap();
        let attr = im.getattr(1).unwrap();
        assert_eq!(attr.ftype, FileType::Dir);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn alloc_inode_scans_for_first_free_slot() {
        let mut im = InodeManager::new(log_path("scan")).unwrap();
        assert_eq!(im.alloc_inode(FileType::File).unwrap(), 2);
        assert_eq!(im.alloc_inode(FileType::Symlink).unwrap(), 3);
        im.free_inode(2).unwrap();
        assert_eq!(im.alloc_inode(FileType::File).unwrap(), 2);
    }

    #[test]
    fn free_inode_is_idempotent_and_keeps_blocks_jobless() {
        let mut im = InodeManager::new(log_path("freeino")).unwrap();
        let inum = im.alloc_inode(FileType::File).unwrap();
        im.free_inode(inum).unwrap();
        im.free_inode(inum).unwrap();
        assert!(matches!(im.getattr(inum), Err(Error::NoSuchInode(_))));
        assert!(matches!(im.free_inode(0), Err(Error::BadInum(0))));
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut im = InodeManager::new(log_path("rw")).unwrap();
        let inum = im.alloc_inode(FileType::File).unwrap();
        let data = pattern(3 * BLOCK_SIZE + 17);
        im.write_file(inum, &data).unwrap();
        assert_eq!(im.read_file(inum).unwrap(), data);
        assert_eq!(im.getattr(inum).unwrap().size as usize, data.len());
    }

    #[test]
    fn rewrite_smaller_frees_blocks() {
        let mut im = InodeManager::new(log_path("shrinkdir")).unwrap();
        let inum = im.alloc_inode(FileType::File).unwrap();
        im.write_file(inum, &pattern(5 * BLOCK_SIZE)).unwrap();
        let small = pattern(BLOCK_SIZE + 1);
        im.write_file(inum, &small).unwrap();
        assert_eq!(im.read_file(inum).unwrap(), small);
        // 2 blocks left in use by this file
        let ino = im.get_inode(inum).unwrap();
        assert_eq!(ino.block_count(), 2);
    }

    #[test]
    fn indirect_block_appears_and_disappears_at_the_boundary() {
        let mut im = InodeManager::new(log_path("boundary")).unwrap();
        let inum = im.alloc_inode(FileType::File).unwrap();

        // exactly the direct range: no indirect block
        im.write_file(inum, &pattern(NDIRECT * BLOCK_SIZE)).unwrap();
        let ino = im.get_inode(inum).unwrap();
        assert_eq!(ino.indirect, 0);

        // one byte more allocates the indirect block
        im.write_file(inum, &pattern(NDIRECT * BLOCK_SIZE + 1))
            .unwrap();
        let ino = im.get_inode(inum).unwrap();
        assert_ne!(ino.indirect, 0);
        let indirect = ino.indirect;
        assert!(im.block_manager().block_in_use(indirect).unwrap());
        assert_eq!(
            im.read_file(inum).unwrap(),
            pattern(NDIRECT * BLOCK_SIZE + 1)
        );

        // shrinking back frees it again
        im.write_file(inum, &pattern(NDIRECT * BLOCK_SIZE)).unwrap();
        assert!(!im.block_manager().block_in_use(indirect).unwrap());
    }

    #[test]
    fn max_file_size_round_trips_and_overflow_is_rejected() {
        let mut im = InodeManager::new(log_path("max")).unwrap();
        let inum = im.alloc_inode(FileType::File).unwrap();
        let data = pattern(MAX_FILE_SIZE);
        im.write_file(inum, &data).unwrap();
        assert_eq!(im.read_file(inum).unwrap(), data);
        assert!(matches!(
            im.write_file(inum, &pattern(MAX_FILE_SIZE + 1)),
            Err(Error::FileTooLarge(_))
        ));
        // the oversized write left content untouched
        assert_eq!(im.read_file(inum).unwrap(), data);
    }

    #[test]
    fn remove_file_returns_every_block_to_the_bitmap() {
        let mut im = InodeManager::new(log_path("remove")).unwrap();
        let inum = im.alloc_inode(FileType::File).unwrap();
        im.write_file(inum, &pattern((NDIRECT + 3) * BLOCK_SIZE))
            .unwrap();
        let ino = im.get_inode(inum).unwrap();
        let mut owned: Vec<u32> = ino.direct.iter().copied().filter(|&b| b != 0).collect();
        owned.push(ino.indirect);

        im.remove_file(inum).unwrap();
        assert!(matches!(im.getattr(inum), Err(Error::NoSuchInode(_))));
        for bnum in owned {
            assert!(!im.block_manager().block_in_use(bnum).unwrap());
        }
    }

    #[test]
    fn commit_then_rollback_restores_the_snapshot() {
        let mut im = InodeManager::new(log_path("undo")).unwrap();
        let inum = im.alloc_inode(FileType::File).unwrap();
        im.write_file(inum, b"before").unwrap();
        im.commit().unwrap();

        im.write_file(inum, &pattern(2 * BLOCK_SIZE)).unwrap();
        let extra = im.alloc_inode(FileType::File).unwrap();
        im.write_file(extra, b"scratch").unwrap();
        im.rollback().unwrap();

        assert_eq!(im.read_file(inum).unwrap(), b"before");
        assert!(matches!(im.getattr(extra), Err(Error::NoSuchInode(_))));
    }

    #[test]
    fn rollback_then_forward_reapplies_the_transaction() {
        let mut im = InodeManager::new(log_path("redo")).unwrap();
        let inum = im.alloc_inode(FileType::File).unwrap();
        im.write_file(inum, b"v1").unwrap();
        im.commit().unwrap();
        im.write_file(inum, b"v2").unwrap();
        im.commit().unwrap();

        im.rollback().unwrap();
        assert_eq!(im.read_file(inum).unwrap(), b"v1");
        im.forward().unwrap();
        assert_eq!(im.read_file(inum).unwrap(), b"v2");
    }

    #[test]
    fn rollback_undoes_a_remove() {
        let mut im = InodeManager::new(log_path("unremove")).unwrap();
        let inum = im.alloc_inode(FileType::File).unwrap();
        im.write_file(inum, b"precious").unwrap();
        im.commit().unwrap();

        im.remove_file(inum).unwrap();
        assert!(matches!(im.getattr(inum), Err(Error::NoSuchInode(_))));

        im.rollback().unwrap();
        assert_eq!(im.read_file(inum).unwrap(), b"precious");
        assert_eq!(im.getattr(inum).unwrap().ftype, FileType::File);
    }
}
