//! Logical write-ahead log with checkpoints.
//!
//! Records are appended to a backing file, one per line, with update
//! payloads embedded raw:
//!
//! ```text
//! create <inum> <type>
//! update <inum> <old_size> <new_size> <old_bytes><new_bytes>
//! delete <inum> <type>
//! commit
//! ```
//!
//! A `commit` record closes a transaction and its end offset is pushed onto
//! the checkpoint stack. `rollback` hands back the records of the most
//! recent transaction (the caller undoes them in reverse) and parks the
//! cursor on the checkpoint the transaction started from; `forward` replays
//! from the cursor to the next `commit`. Appending while the cursor sits
//! before end-of-file truncates the abandoned suffix first.

use crate::error::{Error, Result};
use log::{debug, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::str::FromStr;

/// Byte length of an encoded `commit` record; rollback rewinds by it.
const COMMIT_LEN: u64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Create { inum: u32, ftype: u32 },
    Update { inum: u32, old: Vec<u8>, new: Vec<u8> },
    Delete { inum: u32, ftype: u32 },
    Commit,
}

pub struct LogManager {
    file: File,
    cursor: u64,
    checkpoints: Vec<u64>,
}

impl LogManager {
    /// Opens (and truncates) the backing log file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            cursor: 0,
            checkpoints: Vec::new(),
        })
    }

    fn append(&mut self, record: &[u8]) -> Result<()> {
        // a rollback may have left a suffix behind; drop it before appending
        if self.cursor < self.file.metadata()?.len() {
            self.file.set_len(self.cursor)?;
            debug!("lm: cleaned trailing log records");
        }
        self.file.seek(SeekFrom::Start(self.cursor))?;
        self.file.write_all(record)?;
        self.file.flush()?;
        self.cursor += record.len() as u64;
        Ok(())
    }

    pub fn create(&mut self, inum: u32, ftype: u32) -> Result<()> {
        debug!("lm: create log, inum {} type {}", inum, ftype);
        self.append(format!("create {} {}\n", inum, ftype).as_bytes())
    }

    pub fn update(&mut self, inum: u32, old: &[u8], new: &[u8]) -> Result<()> {
        debug!(
            "lm: update log, inum {} old size {} new size {}",
            inum,
            old.len(),
            new.len()
        );
        let mut record = format!("update {} {} {} ", inum, old.len(), new.len()).into_bytes();
        record.extend_from_slice(old);
        record.extend_from_slice(new);
        record.push(b'\n');
        self.append(&record)
    }

    pub fn delete(&mut self, inum: u32, ftype: u32) -> Result<()> {
        debug!("lm: delete log, inum {} type {}", inum, ftype);
        self.append(format!("delete {} {}\n", inum, ftype).as_bytes())
    }

    /// Appends a `commit` record and pushes a checkpoint at its end.
    pub fn commit(&mut self) -> Result<()> {
        debug!("lm: commit log");
        self.append(b"commit\n")?;
        self.checkpoints.push(self.cursor);
        Ok(())
    }

    /// Returns the records of one transaction to undo, in log order; the
    /// caller applies them in reverse. The cursor is left on the checkpoint
    /// the transaction started from, which is deliberately not popped: a
    /// second rollback with no intervening writes undoes the transaction
    /// before it.
    pub fn rollback(&mut self) -> Result<Vec<LogRecord>> {
        let Some(&checkpoint) = self.checkpoints.last() else {
            warn!("lm: no previous commit");
            return Ok(Vec::new());
        };

        if self.cursor > checkpoint {
            let end = self.cursor;
            self.cursor = checkpoint;
            let mut records = Vec::new();
            while self.cursor < end {
                records.push(self.next_record()?);
            }
            self.cursor = checkpoint;
            return Ok(records);
        }

        // cursor sits exactly on the checkpoint: step back over the commit
        // record and undo the transaction before it
        if self.checkpoints.len() == 1 {
            info!("lm: cannot rollback further");
            return Ok(Vec::new());
        }
        self.checkpoints.pop();
        self.cursor -= COMMIT_LEN;
        match self.checkpoints.last() {
            Some(&previous) if self.cursor > previous => self.rollback(),
            _ => Ok(Vec::new()),
        }
    }

    /// Reads records from the cursor up to the next `commit` (pushing its end
    /// as a checkpoint) or to the end of the log. Records come back in log
    /// order for the caller to redo.
    pub fn forward(&mut self) -> Result<Vec<LogRecord>> {
        let end = self.file.metadata()?.len();
        if self.cursor >= end {
            info!("lm: cannot forward further");
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        while self.cursor < end {
            match self.next_record()? {
                LogRecord::Commit => {
                    self.checkpoints.push(self.cursor);
                    break;
                }
                record => records.push(record),
            }
        }
        Ok(records)
    }

    fn next_record(&mut self) -> Result<LogRecord> {
        let start = self.cursor;
        self.file.seek(SeekFrom::Start(self.cursor))?;
        let kind = self.read_token()?;
        match kind.as_str() {
            "create" => Ok(LogRecord::Create {
                inum: self.read_number()?,
                ftype: self.read_number()?,
            }),
            "update" => {
                let inum = self.read_number()?;
                let old_size: usize = self.read_number()?;
                let new_size: usize = self.read_number()?;
                let old = self.read_bytes(old_size)?;
                let new = self.read_bytes(new_size)?;
                self.read_byte()?; // trailing newline
                Ok(LogRecord::Update { inum, old, new })
            }
            "delete" => Ok(LogRecord::Delete {
                inum: self.read_number()?,
                ftype: self.read_number()?,
            }),
            "commit" => Ok(LogRecord::Commit),
            other => {
                warn!("lm: unexpected log record {:?} at byte {}", other, start);
                Err(Error::BadLogRecord(start))
            }
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.file.read_exact(&mut byte)?;
        self.cursor += 1;
        Ok(byte[0])
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        self.cursor += len as u64;
        Ok(buf)
    }

    /// Reads up to (and consumes) the next space or newline.
    fn read_token(&mut self) -> Result<String> {
        let mut out = Vec::new();
        loop {
            let byte = self.read_byte()?;
            if byte == b' ' || byte == b'\n' {
                break;
            }
            out.push(byte);
        }
        String::from_utf8(out).map_err(|_| Error::BadLogRecord(self.cursor))
    }

    fn read_number<T: FromStr>(&mut self) -> Result<T> {
        let at = self.cursor;
        self.read_token()?
            .parse()
            .map_err(|_| Error::BadLogRecord(at))
    }
}
