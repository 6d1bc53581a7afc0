use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const META_VERSION: u32 = 1;

/// Written next to the bucket files of every merged generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u64,
    pub num_terms: u64,
    pub num_batches: u32,
    pub created_at: String,
    pub version: u32,
}

/// Layout of one index directory:
///
/// ```text
/// phonebook.json
/// batches/batch_000000.txt ...
/// merged/CURRENT
/// merged/gen-000001/{0-9,a..z}, <bucket>.skip, meta.json
/// ```
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn phonebook(&self) -> PathBuf { self.root.join("phonebook.json") }
    pub fn batches_dir(&self) -> PathBuf { self.root.join("batches") }
    pub fn batch_file(&self, number: u32) -> PathBuf { self.batches_dir().join(format!("batch_{number:06}.txt")) }
    pub fn merged_dir(&self) -> PathBuf { self.root.join("merged") }
    pub fn generation_dir(&self, generation: u32) -> PathBuf { self.merged_dir().join(format!("gen-{generation:06}")) }
    fn current_pointer(&self) -> PathBuf { self.merged_dir().join("CURRENT") }
}

/// Leading-character partition of the merged index: one file per ASCII letter
/// plus a shared file for digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    Digits,
    Letter(u8),
}

impl Bucket {
    pub fn for_token(token: &str) -> Option<Bucket> {
        match token.bytes().next()? {
            b'0'..=b'9' => Some(Bucket::Digits),
            b @ b'a'..=b'z' => Some(Bucket::Letter(b)),
            b @ b'A'..=b'Z' => Some(Bucket::Letter(b.to_ascii_lowercase())),
            _ => None,
        }
    }

    pub fn all() -> impl Iterator<Item = Bucket> {
        std::iter::once(Bucket::Digits).chain((b'a'..=b'z').map(Bucket::Letter))
    }

    pub fn file_name(self) -> String {
        match self {
            Bucket::Digits => "0-9".to_string(),
            Bucket::Letter(c) => (c as char).to_string(),
        }
    }

    pub fn skip_file_name(self) -> String { format!("{}.skip", self.file_name()) }
}

/// Write `path` through a temporary sibling and rename it into place, so
/// readers see either the old file or the complete new one. Returns the
/// size of the written file.
pub fn write_atomically<F>(path: &Path, write: F) -> Result<u64>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    let mut out = BufWriter::new(File::create(&tmp)?);
    write(&mut out)?;
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    let bytes = file.metadata()?.len();
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(bytes)
}

fn numbered_entries(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<(u32, PathBuf)>> {
    let mut found = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let number = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(number) = number {
            found.push((number, entry.path()));
        }
    }
    found.sort();
    Ok(found)
}

/// Closed batch files in batch-number order.
pub fn list_batches(paths: &IndexPaths) -> Result<Vec<(u32, PathBuf)>> {
    numbered_entries(&paths.batches_dir(), "batch_", ".txt")
}

pub fn next_batch_number(paths: &IndexPaths) -> Result<u32> {
    Ok(list_batches(paths)?.last().map_or(0, |(n, _)| n + 1))
}

pub fn list_generations(paths: &IndexPaths) -> Result<Vec<(u32, PathBuf)>> {
    numbered_entries(&paths.merged_dir(), "gen-", "")
}

/// Generation named by `merged/CURRENT`, if any merge has been published.
pub fn current_generation(paths: &IndexPaths) -> Result<Option<u32>> {
    let text = match fs::read_to_string(paths.current_pointer()) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(text.trim().strip_prefix("gen-").and_then(|n| n.parse().ok()))
}

/// Point `merged/CURRENT` at `generation`. Readers that already opened an
/// older generation keep reading it undisturbed.
pub fn publish_generation(paths: &IndexPaths, generation: u32) -> Result<()> {
    write_atomically(&paths.current_pointer(), |out| writeln!(out, "gen-{generation:06}"))?;
    Ok(())
}

/// Remove generation directories numbered below `keep_from`.
pub fn prune_generations(paths: &IndexPaths, keep_from: u32) -> Result<usize> {
    let mut removed = 0;
    for (generation, dir) in list_generations(paths)? {
        if generation < keep_from {
            fs::remove_dir_all(&dir)?;
            removed += 1;
        }
    }
    Ok(removed)
}

pub fn save_meta(dir: &Path, meta: &MetaFile) -> Result<()> {
    let json = serde_json::to_string_pretty(meta)?;
    write_atomically(&dir.join("meta.json"), |out| out.write_all(json.as_bytes()))?;
    Ok(())
}

pub fn load_meta(dir: &Path) -> Result<MetaFile> {
    let text = fs::read_to_string(dir.join("meta.json"))?;
    Ok(serde_json::from_str(&text)?)
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_by_leading_character() {
        assert_eq!(Bucket::for_token("dog"), Some(Bucket::Letter(b'd')));
        assert_eq!(Bucket::for_token("Dog"), Some(Bucket::Letter(b'd')));
        assert_eq!(Bucket::for_token("42nd"), Some(Bucket::Digits));
        assert_eq!(Bucket::for_token("_x"), None);
        assert_eq!(Bucket::for_token("émile"), None);
        assert_eq!(Bucket::for_token(""), None);
        assert_eq!(Bucket::Digits.file_name(), "0-9");
        assert_eq!(Bucket::Letter(b'q').skip_file_name(), "q.skip");
        assert_eq!(Bucket::all().count(), 27);
    }

    #[test]
    fn batch_numbers_continue_after_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        assert_eq!(next_batch_number(&paths).unwrap(), 0);
        create_dir_all(paths.batches_dir()).unwrap();
        fs::write(paths.batch_file(0), "a 1:1\n").unwrap();
        fs::write(paths.batch_file(3), "a 9:1\n").unwrap();
        fs::write(paths.batches_dir().join("batch_000004.txt.tmp"), "").unwrap();
        let listed: Vec<u32> = list_batches(&paths).unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(listed, vec![0, 3]);
        assert_eq!(next_batch_number(&paths).unwrap(), 4);
    }

    #[test]
    fn publish_and_prune_generations() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        assert_eq!(current_generation(&paths).unwrap(), None);
        for g in 1..=3 {
            create_dir_all(paths.generation_dir(g)).unwrap();
        }
        publish_generation(&paths, 3).unwrap();
        assert_eq!(current_generation(&paths).unwrap(), Some(3));
        assert_eq!(prune_generations(&paths, 2).unwrap(), 1);
        assert!(!paths.generation_dir(1).exists());
        assert!(paths.generation_dir(2).exists());
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.txt");
        let bytes = write_atomically(&path, |out| out.write_all(b"hello\n")).unwrap();
        assert_eq!(bytes, 6);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
        assert!(!dir.path().join("nested").join("file.txt.tmp").exists());
    }

    #[test]
    fn meta_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let meta = MetaFile { num_docs: 10, num_terms: 4, num_batches: 2, created_at: now_rfc3339(), version: META_VERSION };
        save_meta(dir.path(), &meta).unwrap();
        assert_eq!(load_meta(dir.path()).unwrap(), meta);
    }
}
