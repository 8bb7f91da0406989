//! Directory content codec.
//!
//! A directory's extent is the concatenation of its entries, each encoded as
//! the name, a single NUL byte, and the inum in decimal digits. The whole
//! list is re-emitted on every change; lookup is a linear scan. Names must
//! not contain NUL, and a name starting with a digit directly after another
//! entry's inum cannot be told apart from those digits, so callers keep to
//! ordinary filenames.

use crate::Inum;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inum: Inum,
}

pub fn encode(entries: &[DirEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(entry.inum.to_string().as_bytes());
    }
    out
}

pub fn decode(content: &[u8]) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut rest = content;
    while let Some(nul) = rest.iter().position(|&b| b == 0) {
        let name = String::from_utf8_lossy(&rest[..nul]).into_owned();
        rest = &rest[nul + 1..];
        let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            break;
        }
        let inum = std::str::from_utf8(&rest[..digits])
            .ok()
            .and_then(|s| s.parse().ok());
        rest = &rest[digits..];
        match inum {
            Some(inum) => entries.push(DirEntry { name, inum }),
            None => break,
        }
    }
    entries
}
