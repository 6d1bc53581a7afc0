use crate::DocId;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One document's occurrence count for a token.
///
/// Equality and ordering look at `doc_id` only.
#[derive(Debug, Clone, Copy)]
pub struct Posting {
    pub doc_id: DocId,
    pub frequency: u32,
}

impl Posting {
    pub fn new(doc_id: DocId, frequency: u32) -> Self { Self { doc_id, frequency } }
}

impl PartialEq for Posting {
    fn eq(&self, other: &Self) -> bool { self.doc_id == other.doc_id }
}

impl Eq for Posting {}

impl PartialOrd for Posting {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for Posting {
    fn cmp(&self, other: &Self) -> Ordering { self.doc_id.cmp(&other.doc_id) }
}

/// Reason a persisted `token doc:freq,...` line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ParseError(String);

/// Postings for one token, strictly ascending and unique by doc id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingList {
    token: String,
    postings: Vec<Posting>,
}

impl PostingList {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into(), postings: Vec::new() }
    }

    pub fn token(&self) -> &str { &self.token }
    pub fn postings(&self) -> &[Posting] { &self.postings }
    pub fn len(&self) -> usize { self.postings.len() }
    pub fn is_empty(&self) -> bool { self.postings.is_empty() }

    /// Document frequency: the number of documents holding this token.
    pub fn document_frequency(&self) -> usize { self.postings.len() }

    /// Insert `doc_id` with `frequency`. Appending past the last doc id is O(1);
    /// anything else falls back to [`PostingList::update`].
    pub fn add(&mut self, doc_id: DocId, frequency: u32) {
        match self.postings.last() {
            Some(last) if last.doc_id >= doc_id => self.update(doc_id, frequency),
            _ => self.postings.push(Posting::new(doc_id, frequency)),
        }
    }

    /// Increment the frequency of `doc_id` by `delta`, inserting it at its
    /// sorted position when absent.
    pub fn update(&mut self, doc_id: DocId, delta: u32) {
        match self.postings.binary_search_by_key(&doc_id, |p| p.doc_id) {
            Ok(i) => self.postings[i].frequency += delta,
            Err(i) => self.postings.insert(i, Posting::new(doc_id, delta)),
        }
    }

    pub fn get(&self, doc_id: DocId) -> Option<u32> {
        self.postings
            .binary_search_by_key(&doc_id, |p| p.doc_id)
            .ok()
            .map(|i| self.postings[i].frequency)
    }

    /// Sorted union with a list whose doc ids are disjoint from ours.
    ///
    /// Returns the first shared doc id as the error; batches never overlap, so a
    /// collision means the inputs are corrupt.
    pub fn merge_disjoint(self, other: PostingList) -> Result<PostingList, DocId> {
        let PostingList { token, postings: left } = self;
        let right = other.postings;
        let mut merged = Vec::with_capacity(left.len() + right.len());
        let (mut i, mut j) = (0, 0);
        while i < left.len() && j < right.len() {
            match left[i].doc_id.cmp(&right[j].doc_id) {
                Ordering::Less => { merged.push(left[i]); i += 1; }
                Ordering::Greater => { merged.push(right[j]); j += 1; }
                Ordering::Equal => return Err(left[i].doc_id),
            }
        }
        merged.extend_from_slice(&left[i..]);
        merged.extend_from_slice(&right[j..]);
        Ok(PostingList { token, postings: merged })
    }
}

impl fmt::Display for PostingList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.token)?;
        for (i, p) in self.postings.iter().enumerate() {
            if i > 0 { f.write_str(",")?; }
            write!(f, "{}:{}", p.doc_id, p.frequency)?;
        }
        Ok(())
    }
}

impl FromStr for PostingList {
    type Err = ParseError;

    /// Parse one batch or bucket line: `token doc:freq,doc:freq,...`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (token, rest) = line
            .split_once(' ')
            .ok_or_else(|| ParseError("expected `token doc:freq,...`".into()))?;
        if token.is_empty() {
            return Err(ParseError("empty token".into()));
        }
        if rest.is_empty() {
            return Err(ParseError(format!("token {token:?} has no postings")));
        }
        let mut list = PostingList::new(token);
        for pair in rest.split(',') {
            let (doc, freq) = pair
                .split_once(':')
                .ok_or_else(|| ParseError(format!("posting {pair:?} is not doc:freq")))?;
            let doc_id: DocId = doc.parse().map_err(|_| ParseError(format!("bad doc id {doc:?}")))?;
            let frequency: u32 = freq.parse().map_err(|_| ParseError(format!("bad frequency {freq:?}")))?;
            if frequency == 0 {
                return Err(ParseError(format!("zero frequency for doc {doc_id}")));
            }
            if let Some(last) = list.postings.last() {
                if last.doc_id >= doc_id {
                    return Err(ParseError(format!("doc id {doc_id} not ascending after {}", last.doc_id)));
                }
            }
            list.postings.push(Posting::new(doc_id, frequency));
        }
        Ok(list)
    }
}
