use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sieve_core::ingest::{Ingestor, SourceDocument};
use sieve_core::merge::merge_batches;
use sieve_core::persist::IndexPaths;
use sieve_core::query::QueryEngine;
use sieve_core::IndexConfig;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs;
use std::path::{Path, PathBuf};

mod loader;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build, merge and query a bucketed TF-IDF inverted index", long_about = None)]
struct Cli {
    /// JSON file with index settings; flags override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a corpus directory of JSON page records into batch files
    Build {
        /// Corpus directory (searched recursively for .json files)
        #[arg(long)]
        corpus: PathBuf,
        /// Index directory
        #[arg(long)]
        index: PathBuf,
        /// Documents per batch file
        #[arg(long)]
        batch_size: Option<usize>,
        /// Skip source files larger than this many bytes
        #[arg(long)]
        max_document_bytes: Option<u64>,
        /// Hamming distance below which documents count as near-duplicates
        #[arg(long)]
        similarity_threshold: Option<u32>,
        /// Loader threads
        #[arg(long)]
        workers: Option<usize>,
        /// Merge batches into a new published generation afterwards
        #[arg(long, default_value_t = false)]
        merge: bool,
    },
    /// Merge all batch files into bucket files and publish them
    Merge {
        #[arg(long)]
        index: PathBuf,
    },
    /// Run one query against the published index
    Search {
        #[arg(long)]
        index: PathBuf,
        /// Number of results
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(required = true)]
        query: Vec<String>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Build { corpus, index, batch_size, max_document_bytes, similarity_threshold, workers, merge } => {
            if let Some(v) = batch_size { config.batch_size = v; }
            if let Some(v) = max_document_bytes { config.max_document_bytes = v; }
            if let Some(v) = similarity_threshold { config.similarity_threshold = v; }
            if let Some(v) = workers { config.workers = v; }
            build_index(&corpus, &index, &config)?;
            if merge {
                merge_index(&index)?;
            }
            Ok(())
        }
        Commands::Merge { index } => merge_index(&index),
        Commands::Search { index, top_k, query } => {
            if let Some(v) = top_k { config.top_k = v; }
            search_index(&index, &query.join(" "), config.top_k)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<IndexConfig> {
    let Some(path) = path else { return Ok(IndexConfig::default()) };
    let text = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn build_index(corpus: &Path, index: &Path, config: &IndexConfig) -> Result<()> {
    if !corpus.is_dir() {
        bail!("corpus directory {} does not exist", corpus.display());
    }
    ensure_writable(index)?;

    let files = collect_corpus(corpus);
    tracing::info!(files = files.len(), corpus = %corpus.display(), "corpus scanned");

    let mut ingestor = Ingestor::start(IndexPaths::new(index), config)?;
    let mut unloadable = 0u64;
    for chunk in files.chunks(config.batch_size.max(1)) {
        for doc in load_parallel(chunk, config.workers, config.max_document_bytes) {
            match doc {
                Some(doc) => { ingestor.ingest(doc)?; }
                None => unloadable += 1,
            }
        }
    }
    let stats = ingestor.finish()?;
    tracing::info!(
        indexed = stats.documents_indexed,
        skipped_at_load = unloadable,
        duplicates = stats.exact_duplicates,
        similar = stats.similar,
        empty = stats.empty,
        batches = stats.batches_written,
        bytes = stats.bytes_written,
        "index build complete"
    );
    Ok(())
}

fn ensure_writable(index: &Path) -> Result<()> {
    fs::create_dir_all(index).with_context(|| format!("cannot create index directory {}", index.display()))?;
    let probe = index.join(".write-probe");
    fs::write(&probe, b"").with_context(|| format!("index directory {} is not writable", index.display()))?;
    fs::remove_file(&probe)?;
    Ok(())
}

/// `.json` files under `corpus` in path order, so doc ids are reproducible.
fn collect_corpus(corpus: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(corpus)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    files.sort();
    files
}

/// Load `files` on up to `workers` threads. The result keeps input order;
/// `None` marks a skipped file.
fn load_parallel(files: &[PathBuf], workers: usize, max_bytes: u64) -> Vec<Option<SourceDocument>> {
    let mut slots: Vec<Option<SourceDocument>> = vec![None; files.len()];
    if files.is_empty() {
        return slots;
    }
    let per_worker = files.len().div_ceil(workers.max(1));
    std::thread::scope(|s| {
        for (slots, paths) in slots.chunks_mut(per_worker).zip(files.chunks(per_worker)) {
            s.spawn(move || {
                for (slot, path) in slots.iter_mut().zip(paths) {
                    *slot = match loader::load_document(path, max_bytes) {
                        Ok(doc) => doc,
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "unreadable corpus file");
                            None
                        }
                    };
                }
            });
        }
    });
    slots
}

fn merge_index(index: &Path) -> Result<()> {
    let summary = merge_batches(&IndexPaths::new(index)).with_context(|| format!("merging {}", index.display()))?;
    tracing::info!(
        generation = summary.generation,
        docs = summary.num_docs,
        terms = summary.stats.terms,
        postings = summary.stats.postings,
        "merged index published"
    );
    Ok(())
}

fn search_index(index: &Path, query: &str, top_k: usize) -> Result<()> {
    let engine = QueryEngine::open(&IndexPaths::new(index), top_k)?;
    let results = engine.search_text(query, top_k)?;
    println!("query: {:?} tokens: {:?}", results.query, results.tokens);
    if results.hits.is_empty() {
        println!("no matching documents");
    }
    for (rank, hit) in results.hits.iter().enumerate() {
        match &hit.entry {
            Some(entry) => println!("{}. [{}] {} ({}) score {:.4}", rank + 1, hit.doc_id, entry.url, entry.path, hit.score),
            None => println!("{}. [{}] <not in phonebook> score {:.4}", rank + 1, hit.doc_id, hit.score),
        }
    }
    println!("search took {:.3} ms", results.elapsed.as_secs_f64() * 1000.0);
    Ok(())
}
