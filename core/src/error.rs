use crate::DocId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building, merging or querying the on-disk index.
///
/// Skipped documents (too large, duplicate, no tokens) are not errors; they
/// are counted in [`crate::ingest::RunStats`] instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}:{line}: malformed posting line: {reason}", path.display())]
    Malformed { path: PathBuf, line: usize, reason: String },

    #[error("{}:{line}: token {token:?} does not start with an ASCII letter or digit", path.display())]
    Unbucketed { path: PathBuf, line: usize, token: String },

    #[error("doc id {doc_id} appears in more than one batch for token {token:?}")]
    OverlappingDocId { token: String, doc_id: DocId },

    #[error("phonebook error: {0}")]
    Phonebook(#[from] serde_json::Error),

    #[error("skip list error: {0}")]
    SkipList(#[from] bincode::Error),

    #[error("no merged index published under {}", .0.display())]
    NoIndex(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors caused by bad persisted data rather than the environment.
    pub fn is_structural(&self) -> bool {
        matches!(self, Error::Malformed { .. } | Error::Unbucketed { .. } | Error::OverlappingDocId { .. })
    }
}
