//! Disk-resident inverted index: batch building with duplicate detection,
//! external k-way merge into letter buckets, and TF-IDF ranked retrieval.

pub mod config;
pub mod error;
pub mod index;
pub mod ingest;
pub mod merge;
pub mod persist;
pub mod phonebook;
pub mod posting;
pub mod query;
pub mod similarity;
pub mod skiplist;
pub mod tokenizer;

pub use config::IndexConfig;
pub use error::{Error, Result};
pub use index::{BatchBuilder, Dictionary, DocId};
pub use posting::{Posting, PostingList};
