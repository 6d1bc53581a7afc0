//! TF-IDF ranking with boolean-AND matching over a published index generation.

use crate::persist::{current_generation, load_meta, Bucket, IndexPaths};
use crate::phonebook::{Phonebook, PhonebookEntry};
use crate::posting::PostingList;
use crate::skiplist::SkipList;
use crate::tokenizer::tokenize;
use crate::{DocId, Error, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// `(log2(tf) + 1) * log2(total_docs / df)`.
pub fn tf_idf(term_frequency: u32, document_frequency: usize, total_docs: u64) -> f64 {
    let tf = (term_frequency as f64).log2() + 1.0;
    let idf = (total_docs as f64 / document_frequency as f64).log2();
    tf * idf
}

/// Per-document scores for the current query, keyed by query token.
#[derive(Debug, Default)]
struct Candidate {
    scores: HashMap<String, f64>,
}

impl Candidate {
    fn has_all(&self, tokens: &[String]) -> bool { tokens.iter().all(|t| self.scores.contains_key(t)) }
    fn total(&self) -> f64 { self.scores.values().sum() }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f64,
    /// `None` when the phonebook has no entry for this doc id.
    pub entry: Option<PhonebookEntry>,
}

#[derive(Debug, Clone)]
pub struct SearchResults {
    pub query: String,
    pub tokens: Vec<String>,
    pub hits: Vec<SearchHit>,
    pub elapsed: Duration,
}

/// Read-only view of one merged generation plus the phonebook.
pub struct QueryEngine {
    dir: PathBuf,
    total_docs: u64,
    phonebook: Phonebook,
    skip_lists: HashMap<Bucket, SkipList>,
    top_k: usize,
}

impl QueryEngine {
    /// Bind to the generation currently published under `paths`.
    pub fn open(paths: &IndexPaths, top_k: usize) -> Result<Self> {
        let generation = current_generation(paths)?.ok_or_else(|| Error::NoIndex(paths.root.clone()))?;
        let dir = paths.generation_dir(generation);
        let meta = load_meta(&dir)?;
        let phonebook = Phonebook::load(&paths.phonebook())?;
        let engine = Self::from_parts(dir, meta.num_docs, phonebook, top_k)?;
        tracing::info!(generation, total_docs = meta.num_docs, terms = meta.num_terms, "index opened");
        Ok(engine)
    }

    /// Engine over bucket files in `dir` with an explicit corpus size.
    pub fn from_parts(dir: PathBuf, total_docs: u64, phonebook: Phonebook, top_k: usize) -> Result<Self> {
        let mut skip_lists = HashMap::new();
        for bucket in Bucket::all() {
            if let Some(skip) = SkipList::load(&dir.join(bucket.skip_file_name()))? {
                skip_lists.insert(bucket, skip);
            }
        }
        Ok(Self { dir, total_docs, phonebook, skip_lists, top_k })
    }

    pub fn total_docs(&self) -> u64 { self.total_docs }
    pub fn top_k(&self) -> usize { self.top_k }
    pub fn phonebook(&self) -> &Phonebook { &self.phonebook }
    pub fn dir(&self) -> &Path { &self.dir }

    /// Posting list for `token`, or `None` when the index does not hold it.
    pub fn postings(&self, token: &str) -> Result<Option<PostingList>> {
        let Some(bucket) = Bucket::for_token(token) else { return Ok(None) };
        let path = self.dir.join(bucket.file_name());
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // every merge writes all buckets; this generation was pruned or damaged
                tracing::warn!(path = %path.display(), "bucket file missing from bound generation");
                return Err(Error::NoIndex(self.dir.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let (offset, first_line) = self.skip_lists.get(&bucket).map_or((0, 0), |s| s.seek(token));
        file.seek(SeekFrom::Start(offset))?;
        let reader = BufReader::new(file);
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = first_line as usize + i + 1;
            let malformed = |reason: String| Error::Malformed { path: path.clone(), line: line_no, reason };
            let Some((candidate, _)) = line.split_once(' ') else {
                return Err(malformed("expected `token doc:freq,...`".into()));
            };
            if candidate == token {
                let list: PostingList = line.parse().map_err(|e: crate::posting::ParseError| malformed(e.to_string()))?;
                return Ok(Some(list));
            }
            if candidate > token {
                break;
            }
        }
        Ok(None)
    }

    /// Rank documents holding every token, best first, at most `top_k`.
    pub fn search_scored(&self, tokens: &[String], top_k: usize) -> Result<Vec<ScoredDoc>> {
        let mut unique: Vec<String> = Vec::with_capacity(tokens.len());
        for t in tokens {
            if !unique.contains(t) {
                unique.push(t.clone());
            }
        }
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: HashMap<DocId, Candidate> = HashMap::new();
        for token in &unique {
            let Some(list) = self.postings(token)? else { return Ok(Vec::new()) };
            let df = list.document_frequency();
            for p in list.postings() {
                let score = tf_idf(p.frequency, df, self.total_docs);
                candidates.entry(p.doc_id).or_default().scores.insert(token.clone(), score);
            }
        }

        let mut ranked: Vec<ScoredDoc> = candidates
            .into_iter()
            .filter(|(_, c)| c.has_all(&unique))
            .map(|(doc_id, c)| ScoredDoc { doc_id, score: c.total() })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.doc_id.cmp(&b.doc_id)));
        ranked.truncate(top_k);
        Ok(ranked)
    }

    /// Doc ids matching every query token, most relevant first.
    pub fn search(&self, tokens: &[String]) -> Result<Vec<DocId>> {
        Ok(self.search_scored(tokens, self.top_k)?.into_iter().map(|d| d.doc_id).collect())
    }

    /// Tokenize `query`, rank, and resolve hits through the phonebook.
    pub fn search_text(&self, query: &str, top_k: usize) -> Result<SearchResults> {
        let start = Instant::now();
        let tokens = tokenize(query);
        let hits = self
            .search_scored(&tokens, top_k)?
            .into_iter()
            .map(|d| SearchHit { doc_id: d.doc_id, score: d.score, entry: self.phonebook.get(d.doc_id).cloned() })
            .collect();
        let elapsed = start.elapsed();
        tracing::debug!(query, ?tokens, elapsed_us = elapsed.as_micros() as u64, "search served");
        Ok(SearchResults { query: query.to_string(), tokens, hits, elapsed })
    }
}
