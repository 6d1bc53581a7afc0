use crate::similarity::DEFAULT_THRESHOLD;
use serde::{Deserialize, Serialize};

/// Tunables shared by ingestion, merge and query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Accepted documents per batch file.
    pub batch_size: usize,
    /// Fingerprints closer than this many bits are near-duplicates.
    pub similarity_threshold: u32,
    /// Source files larger than this are skipped.
    pub max_document_bytes: u64,
    pub top_k: usize,
    /// Threads used to load and parse source documents.
    pub workers: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            similarity_threshold: DEFAULT_THRESHOLD,
            max_document_bytes: 5_000_000,
            top_k: 5,
            workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}
