//! K-way streaming merge of sorted batch files into 27 bucket files.

use crate::persist::{
    current_generation, list_batches, list_generations, now_rfc3339, prune_generations, publish_generation,
    save_meta, Bucket, IndexPaths, MetaFile, META_VERSION,
};
use crate::phonebook::Phonebook;
use crate::posting::PostingList;
use crate::skiplist::{SkipList, SKIP_INTERVAL};
use crate::{Error, Result};
use std::cmp::Reverse;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BinaryHeap};
use std::fs::{self, create_dir_all, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

/// Sequential reader over one sorted batch file, positioned on its next line.
pub struct BatchCursor {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    current: Option<(Bucket, PostingList)>,
}

impl BatchCursor {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut cursor = Self { path: path.to_path_buf(), lines: BufReader::new(file).lines(), line_no: 0, current: None };
        cursor.current = cursor.read_next(None)?;
        Ok(cursor)
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn peek(&self) -> Option<&PostingList> { self.current.as_ref().map(|(_, list)| list) }

    /// Hand out the current line and move to the next one.
    pub fn advance(&mut self) -> Result<Option<(Bucket, PostingList)>> {
        let Some(current) = self.current.take() else { return Ok(None) };
        self.current = self.read_next(Some(current.1.token()))?;
        Ok(Some(current))
    }

    fn read_next(&mut self, previous: Option<&str>) -> Result<Option<(Bucket, PostingList)>> {
        for line in self.lines.by_ref() {
            let line = line?;
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let list: PostingList = line.parse().map_err(|e: crate::posting::ParseError| Error::Malformed {
                path: self.path.clone(),
                line: self.line_no,
                reason: e.to_string(),
            })?;
            if let Some(previous) = previous {
                if list.token() <= previous {
                    return Err(Error::Malformed {
                        path: self.path.clone(),
                        line: self.line_no,
                        reason: format!("token {:?} does not sort after {previous:?}", list.token()),
                    });
                }
            }
            let bucket = Bucket::for_token(list.token()).ok_or_else(|| Error::Unbucketed {
                path: self.path.clone(),
                line: self.line_no,
                token: list.token().to_string(),
            })?;
            return Ok(Some((bucket, list)));
        }
        Ok(None)
    }
}

struct BucketWriter {
    out: BufWriter<File>,
    offset: u64,
    lines: u64,
    postings: u64,
    skip: SkipList,
}

impl BucketWriter {
    fn create(path: &Path) -> Result<Self> {
        Ok(Self { out: BufWriter::new(File::create(path)?), offset: 0, lines: 0, postings: 0, skip: SkipList::new() })
    }

    fn write(&mut self, list: &PostingList) -> Result<()> {
        let line = format!("{list}\n");
        if self.lines % SKIP_INTERVAL == 0 {
            self.skip.push(list.token(), self.offset, self.lines);
        }
        self.out.write_all(line.as_bytes())?;
        self.offset += line.len() as u64;
        self.lines += 1;
        self.postings += list.len() as u64;
        Ok(())
    }
}

/// Per-bucket line and posting counts of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inputs: usize,
    pub terms: u64,
    pub postings: u64,
    pub bucket_terms: BTreeMap<String, u64>,
}

/// Output side of a merge: lazily opened bucket writers under one directory.
struct BucketSet {
    dir: PathBuf,
    writers: BTreeMap<Bucket, BucketWriter>,
}

impl BucketSet {
    fn new(dir: &Path) -> Self { Self { dir: dir.to_path_buf(), writers: BTreeMap::new() } }

    fn write(&mut self, bucket: Bucket, list: &PostingList) -> Result<()> {
        let writer = match self.writers.entry(bucket) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(BucketWriter::create(&self.dir.join(bucket.file_name()))?),
        };
        writer.write(list)
    }

    /// Flush every writer, write skip lists, and create empty files for
    /// buckets that received no tokens.
    fn finish(mut self, stats: &mut MergeStats) -> Result<()> {
        for bucket in Bucket::all() {
            let (skip, lines, postings) = match self.writers.remove(&bucket) {
                Some(mut writer) => {
                    writer.out.flush()?;
                    writer.out.get_ref().sync_all()?;
                    (writer.skip, writer.lines, writer.postings)
                }
                None => {
                    File::create(self.dir.join(bucket.file_name()))?;
                    (SkipList::new(), 0, 0)
                }
            };
            skip.save(&self.dir.join(bucket.skip_file_name()))?;
            stats.terms += lines;
            stats.postings += postings;
            stats.bucket_terms.insert(bucket.file_name(), lines);
        }
        Ok(())
    }
}

/// Merge sorted batch files with disjoint doc id ranges into bucket files
/// under `out_dir`.
///
/// Every bucket comes out token-sorted and token-unique, with each posting
/// list doc-id-sorted across all inputs.
pub fn merge_files(inputs: &[PathBuf], out_dir: &Path) -> Result<MergeStats> {
    create_dir_all(out_dir)?;
    let mut cursors: Vec<Option<BatchCursor>> =
        inputs.iter().map(|p| BatchCursor::open(p).map(Some)).collect::<Result<_>>()?;
    let mut heap: BinaryHeap<Reverse<(String, usize)>> = BinaryHeap::new();
    for (idx, cursor) in cursors.iter().enumerate() {
        if let Some(list) = cursor.as_ref().and_then(|c| c.peek()) {
            heap.push(Reverse((list.token().to_string(), idx)));
        }
    }

    let mut buckets = BucketSet::new(out_dir);
    let mut stats = MergeStats { inputs: inputs.len(), ..MergeStats::default() };
    while let Some(Reverse((token, idx))) = heap.pop() {
        let Some((bucket, mut merged)) = take_line(&mut cursors, idx, &mut heap)? else { continue };
        while heap.peek().is_some_and(|Reverse((t, _))| *t == token) {
            let Some(Reverse((_, idx))) = heap.pop() else { break };
            let Some((_, list)) = take_line(&mut cursors, idx, &mut heap)? else { continue };
            merged = merged
                .merge_disjoint(list)
                .map_err(|doc_id| Error::OverlappingDocId { token: token.clone(), doc_id })?;
        }
        buckets.write(bucket, &merged)?;
    }
    buckets.finish(&mut stats)?;
    Ok(stats)
}

fn take_line(
    cursors: &mut [Option<BatchCursor>],
    idx: usize,
    heap: &mut BinaryHeap<Reverse<(String, usize)>>,
) -> Result<Option<(Bucket, PostingList)>> {
    let Some(cursor) = cursors[idx].as_mut() else { return Ok(None) };
    let line = cursor.advance()?;
    match cursor.peek().map(|next| next.token().to_string()) {
        Some(next) => heap.push(Reverse((next, idx))),
        None => {
            tracing::trace!(path = %cursor.path().display(), "batch exhausted");
            cursors[idx] = None;
        }
    }
    Ok(line)
}

#[derive(Debug, Clone)]
pub struct MergeSummary {
    pub generation: u32,
    pub num_docs: u64,
    pub stats: MergeStats,
}

/// Merge every closed batch under `paths` into a new generation and publish it.
///
/// The previously published generation is kept so open readers can finish;
/// older ones are removed.
pub fn merge_batches(paths: &IndexPaths) -> Result<MergeSummary> {
    let inputs: Vec<PathBuf> = list_batches(paths)?.into_iter().map(|(_, p)| p).collect();
    let generation = list_generations(paths)?.last().map_or(1, |(g, _)| g + 1);
    let dir = paths.generation_dir(generation);
    tracing::info!(batches = inputs.len(), generation, "merging batches");

    let stats = match merge_files(&inputs, &dir) {
        Ok(stats) => stats,
        Err(e) => {
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                tracing::warn!(error = %cleanup, dir = %dir.display(), "could not remove partial generation");
            }
            return Err(e);
        }
    };

    let phonebook = Phonebook::load(&paths.phonebook())?;
    let num_docs = phonebook.len() as u64;
    let meta = MetaFile {
        num_docs,
        num_terms: stats.terms,
        num_batches: inputs.len() as u32,
        created_at: now_rfc3339(),
        version: META_VERSION,
    };
    save_meta(&dir, &meta)?;

    let previous = current_generation(paths)?;
    publish_generation(paths, generation)?;
    if let Some(previous) = previous {
        prune_generations(paths, previous)?;
    }
    tracing::info!(generation, num_docs, terms = stats.terms, postings = stats.postings, "merge published");
    Ok(MergeSummary { generation, num_docs, stats })
}
