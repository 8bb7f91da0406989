//! Durable acceptor state.
//!
//! Every promise, acceptance, and decided instance is appended as a textual
//! line as it happens:
//!
//! ```text
//! instance <num> <value>
//! propseen <n> <m>
//! accepted <n> <m> <value>
//! ```
//!
//! Values may contain spaces (cluster views are space-separated member
//! lists) but not newlines; node identities contain neither. Replaying the
//! lines in order rebuilds the state a restarted acceptor must not forget.

use crate::protocol::{Instance, ProposalNum};
use log::warn;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub struct AcceptorLog {
    file: File,
}

/// State rebuilt from a log replay.
#[derive(Debug, Clone, Default)]
pub struct Restored {
    pub instance_h: Instance,
    pub values: HashMap<Instance, String>,
    pub n_h: ProposalNum,
    pub n_a: ProposalNum,
    pub v_a: String,
}

impl AcceptorLog {
    /// Opens a fresh (truncated) log file.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn instance(&mut self, instance: Instance, value: &str) -> io::Result<()> {
        writeln!(self.file, "instance {} {}", instance, value)?;
        self.file.flush()
    }

    pub fn prop(&mut self, n: &ProposalNum) -> io::Result<()> {
        writeln!(self.file, "propseen {} {}", n.n, n.m)?;
        self.file.flush()
    }

    pub fn accept(&mut self, n: &ProposalNum, v: &str) -> io::Result<()> {
        writeln!(self.file, "accepted {} {} {}", n.n, n.m, v)?;
        self.file.flush()
    }

    /// Full log contents, for handing to a recovering replica.
    pub fn dump(&mut self) -> io::Result<String> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut out = String::new();
        self.file.read_to_string(&mut out)?;
        Ok(out)
    }

    /// Replaces the log contents with `data` and replays them.
    pub fn restore(&mut self, data: &str) -> io::Result<Restored> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(data.as_bytes())?;
        self.file.flush()?;
        Ok(Self::parse(data))
    }

    /// Replays log lines in order into a state snapshot.
    pub fn parse(data: &str) -> Restored {
        let mut restored = Restored::default();
        for line in data.lines() {
            let mut fields = line.splitn(2, ' ');
            let kind = fields.next().unwrap_or_default();
            let rest = fields.next().unwrap_or_default();
            match kind {
                "instance" => {
                    let Some((num, value)) = rest.split_once(' ') else {
                        warn!("pxl: malformed instance record {:?}", line);
                        continue;
                    };
                    let Ok(instance) = num.parse() else {
                        warn!("pxl: malformed instance number {:?}", num);
                        continue;
                    };
                    restored.values.insert(instance, value.to_string());
                    restored.instance_h = instance;
                }
                "propseen" => {
                    let Some((n, m)) = rest.split_once(' ') else {
                        warn!("pxl: malformed propseen record {:?}", line);
                        continue;
                    };
                    let Ok(n) = n.parse() else { continue };
                    restored.n_h = ProposalNum::new(n, m);
                }
                "accepted" => {
                    let mut parts = rest.splitn(3, ' ');
                    let (Some(n), Some(m)) = (parts.next(), parts.next()) else {
                        warn!("pxl: malformed accepted record {:?}", line);
                        continue;
                    };
                    let Ok(n) = n.parse() else { continue };
                    restored.n_a = ProposalNum::new(n, m);
                    restored.v_a = parts.next().unwrap_or_default().to_string();
                }
                other => warn!("pxl: unexpected log record kind {:?}", other),
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_replays_records_in_order() {
        let restored = AcceptorLog::parse(
            "instance 1 a:1 b:2 c:3\n\
             propseen 4 b:2\n\
             accepted 4 b:2 a:1 b:2\n\
             instance 2 a:1 b:2\n",
        );
        assert_eq!(restored.instance_h, 2);
        assert_eq!(restored.values[&1], "a:1 b:2 c:3");
        assert_eq!(restored.values[&2], "a:1 b:2");
        assert_eq!(restored.n_h, ProposalNum::new(4, "b:2"));
        assert_eq!(restored.n_a, ProposalNum::new(4, "b:2"));
        assert_eq!(restored.v_a, "a:1 b:2");
    }

    #[test]
    fn parse_skips_garbage_lines() {
        let restored = AcceptorLog::parse("instance one v\nnonsense\ninstance 3 v3\n");
        assert_eq!(restored.instance_h, 3);
        assert_eq!(restored.values.len(), 1);
    }
}
