use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("block id out of range: {0}")]
    BadBlockId(u32),

    #[error("inum out of range: {0}")]
    BadInum(u32),

    #[error("invalid inode type: {0}")]
    BadType(u32),

    #[error("file size out of range: {0}")]
    FileTooLarge(usize),

    #[error("no free block available")]
    NoFreeBlock,

    #[error("no free inode available")]
    NoFreeInode,

    #[error("inode {0} does not exist")]
    NoSuchInode(u32),

    #[error("malformed log record at byte {0}")]
    BadLogRecord(u64),

    #[error("format error: {0}")]
    Format(&'static str),

    #[error("disk codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
