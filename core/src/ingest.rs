//! Ingestion run: gate documents through the similarity detector, index the
//! survivors into batches, and keep the phonebook current.

use crate::config::IndexConfig;
use crate::index::{BatchBuilder, BatchSummary};
use crate::persist::{next_batch_number, IndexPaths};
use crate::phonebook::{Phonebook, PhonebookEntry};
use crate::similarity::{SimilarityDetector, Verdict};
use crate::tokenizer::tokenize;
use crate::{DocId, Result};

/// A document handed over by the loader: visible text plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: String,
    pub url: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Indexed { doc_id: DocId, token_count: usize },
    /// The tokenizer found nothing to index.
    Empty,
    Rejected(Verdict),
}

/// Counters for one ingestion run. Starts at zero with every [`Ingestor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub documents_seen: u64,
    pub documents_indexed: u64,
    pub exact_duplicates: u64,
    pub similar: u64,
    pub empty: u64,
    pub tokens_indexed: u64,
    pub batches_written: u32,
    pub batch_terms: u64,
    pub bytes_written: u64,
}

impl RunStats {
    fn record(&mut self, outcome: &IngestOutcome) {
        self.documents_seen += 1;
        match outcome {
            IngestOutcome::Indexed { token_count, .. } => {
                self.documents_indexed += 1;
                self.tokens_indexed += *token_count as u64;
            }
            IngestOutcome::Empty => self.empty += 1,
            IngestOutcome::Rejected(Verdict::ExactDuplicate) => self.exact_duplicates += 1,
            IngestOutcome::Rejected(_) => self.similar += 1,
        }
    }

    fn record_batch(&mut self, summary: &BatchSummary) {
        self.batches_written += 1;
        self.batch_terms += summary.tokens as u64;
        self.bytes_written += summary.bytes;
    }
}

/// Owns everything one ingestion run mutates. Doc ids continue from the
/// phonebook and batch numbers from the batch directory, so successive runs
/// never reuse either.
pub struct Ingestor {
    paths: IndexPaths,
    batch_size: usize,
    builder: BatchBuilder,
    detector: SimilarityDetector,
    phonebook: Phonebook,
    next_batch: u32,
    stats: RunStats,
}

impl Ingestor {
    pub fn start(paths: IndexPaths, config: &IndexConfig) -> Result<Self> {
        let phonebook = Phonebook::load(&paths.phonebook())?;
        let next_batch = next_batch_number(&paths)?;
        let first_doc_id = phonebook.next_doc_id();
        tracing::info!(first_doc_id, next_batch, known_docs = phonebook.len(), "ingestion started");
        Ok(Self {
            builder: BatchBuilder::new(first_doc_id),
            detector: SimilarityDetector::new(config.similarity_threshold),
            batch_size: config.batch_size.max(1),
            paths,
            phonebook,
            next_batch,
            stats: RunStats::default(),
        })
    }

    pub fn stats(&self) -> &RunStats { &self.stats }
    pub fn phonebook(&self) -> &Phonebook { &self.phonebook }

    /// Tokenize, gate and index one document. Closes the batch once it holds
    /// `batch_size` documents.
    pub fn ingest(&mut self, doc: SourceDocument) -> Result<IngestOutcome> {
        let tokens = tokenize(&doc.text);
        let outcome = if tokens.is_empty() {
            IngestOutcome::Empty
        } else {
            match self.detector.check(&doc.path, &doc.text) {
                Verdict::Unique => {
                    let doc_id = self.builder.current_doc_id();
                    let token_count = self.builder.add_document(&tokens);
                    self.phonebook.insert(
                        doc_id,
                        PhonebookEntry { path: doc.path.clone(), token_count: token_count as u64, url: doc.url },
                    );
                    IngestOutcome::Indexed { doc_id, token_count }
                }
                verdict => IngestOutcome::Rejected(verdict),
            }
        };
        match &outcome {
            IngestOutcome::Indexed { .. } => {}
            IngestOutcome::Empty => tracing::debug!(path = %doc.path, "skipped: no tokens"),
            IngestOutcome::Rejected(verdict) => tracing::debug!(path = %doc.path, reason = %verdict, "skipped"),
        }
        self.stats.record(&outcome);
        if self.builder.documents() >= self.batch_size {
            self.flush_batch()?;
        }
        Ok(outcome)
    }

    fn flush_batch(&mut self) -> Result<()> {
        if self.builder.is_empty() {
            return Ok(());
        }
        let path = self.paths.batch_file(self.next_batch);
        let summary = self.builder.write_to(&path)?;
        // ids in a closed batch must survive an aborted run
        self.phonebook.save(&self.paths.phonebook())?;
        tracing::info!(
            batch = self.next_batch,
            first_doc = summary.doc_range.start,
            end_doc = summary.doc_range.end,
            terms = summary.tokens,
            bytes = summary.bytes,
            "batch written"
        );
        self.stats.record_batch(&summary);
        self.builder = self.builder.next_batch();
        self.next_batch += 1;
        Ok(())
    }

    /// Close the last partial batch and save the phonebook. The similarity
    /// state is dropped here.
    pub fn finish(mut self) -> Result<RunStats> {
        self.flush_batch()?;
        self.phonebook.save(&self.paths.phonebook())?;
        tracing::info!(
            seen = self.stats.documents_seen,
            indexed = self.stats.documents_indexed,
            duplicates = self.stats.exact_duplicates,
            similar = self.stats.similar,
            batches = self.stats.batches_written,
            "ingestion finished"
        );
        Ok(self.stats)
    }
}
