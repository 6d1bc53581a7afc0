use crate::persist::write_atomically;
use crate::{DocId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Where a doc id came from. Persisted as `[path, token_count, url]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, u64, String)", into = "(String, u64, String)")]
pub struct PhonebookEntry {
    pub path: String,
    pub token_count: u64,
    pub url: String,
}

impl From<(String, u64, String)> for PhonebookEntry {
    fn from((path, token_count, url): (String, u64, String)) -> Self {
        Self { path, token_count, url }
    }
}

impl From<PhonebookEntry> for (String, u64, String) {
    fn from(e: PhonebookEntry) -> Self { (e.path, e.token_count, e.url) }
}

/// Doc id → source directory. Loaded at ingestion start, amended, saved at
/// the end of the run; read-only at query time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Phonebook {
    entries: BTreeMap<DocId, PhonebookEntry>,
}

impl Phonebook {
    pub fn new() -> Self { Self::default() }

    /// Load from `path`; a missing file is an empty phonebook.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomically(path, |out| out.write_all(json.as_bytes()))?;
        Ok(())
    }

    pub fn insert(&mut self, doc_id: DocId, entry: PhonebookEntry) -> Option<PhonebookEntry> {
        self.entries.insert(doc_id, entry)
    }

    pub fn get(&self, doc_id: DocId) -> Option<&PhonebookEntry> { self.entries.get(&doc_id) }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = (DocId, &PhonebookEntry)> + '_ { self.entries.iter().map(|(id, e)| (*id, e)) }

    /// First doc id not yet handed out. Ids start at 1.
    pub fn next_doc_id(&self) -> DocId {
        self.entries.keys().next_back().map_or(1, |last| last + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, tokens: u64) -> PhonebookEntry {
        PhonebookEntry { path: path.into(), token_count: tokens, url: format!("https://example.com/{path}") }
    }

    #[test]
    fn persists_as_string_keys_and_arrays() {
        let mut book = Phonebook::new();
        book.insert(7, entry("a.json", 12));
        let json = serde_json::to_value(&book).unwrap();
        assert_eq!(json, serde_json::json!({ "7": ["a.json", 12, "https://example.com/a.json"] }));
    }

    #[test]
    fn load_merge_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phonebook.json");
        let mut book = Phonebook::load(&path).unwrap();
        assert!(book.is_empty());
        assert_eq!(book.next_doc_id(), 1);
        book.insert(1, entry("a.json", 3));
        book.insert(2, entry("b.json", 4));
        book.save(&path).unwrap();

        let mut again = Phonebook::load(&path).unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(again.next_doc_id(), 3);
        again.insert(3, entry("c.json", 5));
        again.save(&path).unwrap();
        let last = Phonebook::load(&path).unwrap();
        assert_eq!(last.get(3).unwrap().path, "c.json");
        assert_eq!(last.get(1), Some(&entry("a.json", 3)));
    }
}
