use crate::persist::write_atomically;
use crate::posting::PostingList;
use crate::Result;
use std::collections::HashMap;
use std::io::Write;
use std::ops::Range;
use std::path::Path;

pub type DocId = u32;

/// Token → postings map plus the token set kept in ascending order, so a batch
/// serializes with a linear walk.
#[derive(Debug, Default)]
pub struct Dictionary {
    lists: HashMap<String, PostingList>,
    keys: Vec<String>, // always exactly the keys of `lists`, sorted
}

impl Dictionary {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.keys.len() }
    pub fn is_empty(&self) -> bool { self.keys.is_empty() }
    pub fn keys(&self) -> &[String] { &self.keys }
    pub fn get(&self, token: &str) -> Option<&PostingList> { self.lists.get(token) }

    pub fn update(&mut self, token: &str, doc_id: DocId, delta: u32) {
        if let Some(list) = self.lists.get_mut(token) {
            list.update(doc_id, delta);
            return;
        }
        if let Err(pos) = self.keys.binary_search_by(|k| k.as_str().cmp(token)) {
            self.keys.insert(pos, token.to_string());
        }
        let mut list = PostingList::new(token);
        list.add(doc_id, delta);
        self.lists.insert(token.to_string(), list);
    }

    /// Posting lists in ascending token order.
    pub fn iter(&self) -> impl Iterator<Item = &PostingList> + '_ {
        self.keys.iter().filter_map(move |k| self.lists.get(k))
    }
}

/// What a closed batch wrote to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub doc_range: Range<DocId>,
    pub documents: usize,
    pub tokens: usize,
    pub bytes: u64,
}

/// Accumulates documents with consecutive doc ids into one in-memory batch.
#[derive(Debug)]
pub struct BatchBuilder {
    dictionary: Dictionary,
    first_doc_id: DocId,
    current_doc_id: DocId,
}

impl BatchBuilder {
    pub fn new(first_doc_id: DocId) -> Self {
        Self { dictionary: Dictionary::new(), first_doc_id, current_doc_id: first_doc_id }
    }

    /// Doc id the next accepted document will receive.
    pub fn current_doc_id(&self) -> DocId { self.current_doc_id }
    pub fn doc_range(&self) -> Range<DocId> { self.first_doc_id..self.current_doc_id }
    pub fn documents(&self) -> usize { (self.current_doc_id - self.first_doc_id) as usize }
    pub fn is_empty(&self) -> bool { self.documents() == 0 }
    pub fn dictionary(&self) -> &Dictionary { &self.dictionary }

    /// Index `tokens` under the current doc id, then advance it. Returns the
    /// number of tokens indexed; tokens that are empty or contain whitespace
    /// cannot be written to a batch line and are dropped.
    pub fn add_document<S: AsRef<str>>(&mut self, tokens: &[S]) -> usize {
        let doc_id = self.current_doc_id;
        let mut count = 0;
        for token in tokens {
            let token = token.as_ref();
            if token.is_empty() || token.contains(char::is_whitespace) {
                tracing::trace!(doc_id, token, "dropping unwritable token");
                continue;
            }
            self.dictionary.update(token, doc_id, 1);
            count += 1;
        }
        self.current_doc_id += 1;
        count
    }

    /// Serialize the batch to `path` as `token doc:freq,...` lines in ascending
    /// token order. The file appears atomically.
    pub fn write_to(&self, path: &Path) -> Result<BatchSummary> {
        let bytes = write_atomically(path, |out| {
            for list in self.dictionary.iter() {
                writeln!(out, "{list}")?;
            }
            Ok(())
        })?;
        Ok(BatchSummary {
            doc_range: self.doc_range(),
            documents: self.documents(),
            tokens: self.dictionary.len(),
            bytes,
        })
    }

    /// A fresh, empty builder continuing from this one's doc ids.
    pub fn next_batch(&self) -> BatchBuilder { BatchBuilder::new(self.current_doc_id) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(text: &str) -> Vec<String> { text.split_whitespace().map(String::from).collect() }

    #[test]
    fn keys_stay_sorted_and_match_map() {
        let mut dict = Dictionary::new();
        for (i, t) in ["pear", "apple", "fig", "apple", "banana", "zucchini", "fig"].iter().enumerate() {
            dict.update(t, i as DocId + 1, 1);
        }
        assert_eq!(dict.keys(), ["apple", "banana", "fig", "pear", "zucchini"]);
        assert_eq!(dict.len(), 5);
        assert_eq!(dict.get("apple").unwrap().len(), 2);
        let order: Vec<&str> = dict.iter().map(|l| l.token()).collect();
        assert_eq!(order, dict.keys().iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn add_document_counts_and_advances() {
        let mut b = BatchBuilder::new(1);
        assert_eq!(b.add_document(&toks("cat dog cat")), 3);
        assert_eq!(b.add_document(&toks("dog")), 1);
        assert_eq!(b.current_doc_id(), 3);
        assert_eq!(b.doc_range(), 1..3);
        let cat = b.dictionary().get("cat").unwrap();
        assert_eq!(cat.get(1), Some(2));
        assert_eq!(b.dictionary().get("dog").unwrap().len(), 2);
    }

    #[test]
    fn unwritable_tokens_are_dropped() {
        let mut b = BatchBuilder::new(1);
        let n = b.add_document(&["ok".to_string(), String::new(), "two words".to_string()]);
        assert_eq!(n, 1);
        assert_eq!(b.dictionary().keys(), ["ok"]);
    }

    #[test]
    fn writes_sorted_batch_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_000000.txt");
        let mut b = BatchBuilder::new(1);
        b.add_document(&toks("dog cat dog"));
        b.add_document(&toks("ant dog"));
        let summary = b.write_to(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "ant 2:1\ncat 1:1\ndog 1:2,2:1\n");
        assert_eq!(summary.doc_range, 1..3);
        assert_eq!(summary.tokens, 3);
        assert_eq!(summary.bytes, text.len() as u64);
    }

    #[test]
    fn next_batch_threads_doc_ids() {
        let mut b = BatchBuilder::new(1);
        b.add_document(&toks("a"));
        b.add_document(&toks("b"));
        let next = b.next_batch();
        assert_eq!(next.current_doc_id(), 3);
        assert!(next.is_empty());
    }
}
