use crate::persist::write_atomically;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Every `SKIP_INTERVAL`-th line of a bucket gets a skip entry.
pub const SKIP_INTERVAL: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipEntry {
    pub token: String,
    pub offset: u64,
    /// Zero-based line index of `token` in the bucket.
    pub line: u64,
}

/// Sparse (token → byte offset) index over one sorted bucket file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipList {
    entries: Vec<SkipEntry>,
}

impl SkipList {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn push(&mut self, token: &str, offset: u64, line: u64) {
        self.entries.push(SkipEntry { token: token.to_string(), offset, line });
    }

    /// Position `(offset, line)` to start scanning for `token`: the last entry
    /// whose token is not greater than it, or the start of the file.
    pub fn seek(&self, token: &str) -> (u64, u64) {
        let idx = self.entries.partition_point(|e| e.token.as_str() <= token);
        match idx.checked_sub(1).map(|i| &self.entries[i]) {
            Some(entry) => (entry.offset, entry.line),
            None => (0, 0),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        write_atomically(path, |out| out.write_all(&bytes))?;
        Ok(())
    }

    /// `None` when the bucket has no sidecar.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
