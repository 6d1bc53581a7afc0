//! Exact and near-duplicate detection for documents entering the index.
//!
//! Exact copies are caught by a CRC-32 of the normalized text. Near copies are
//! caught by a 64-bit SimHash over word bigrams: two documents whose
//! fingerprints differ in fewer than `threshold` bits count as similar.

use sha1::{Digest, Sha1};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

pub const DEFAULT_THRESHOLD: u32 = 3;
const CRC32_POLY_REFLECTED: u32 = 0xEDB8_8320; // 0x04C11DB7 bit-reversed

/// Collapse whitespace runs to one space, trim, lowercase.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// CRC-32 (polynomial 0x04C11DB7, reflected, init and final xor 0xFFFFFFFF),
/// computed bit by bit. Matches zlib's `crc32`.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (CRC32_POLY_REFLECTED & mask);
        }
    }
    !crc
}

fn bigrams(normalized: &str) -> BTreeSet<String> {
    let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    words.windows(2).map(|w| format!("{} {}", w[0], w[1])).collect()
}

/// Low 64 bits of the SHA-1 digest read as a big-endian integer.
fn shingle_hash(shingle: &str) -> u64 {
    let digest = Sha1::digest(shingle.as_bytes());
    let mut low = [0u8; 8];
    low.copy_from_slice(&digest[12..20]);
    u64::from_be_bytes(low)
}

/// SimHash of already-normalized text. Fewer than two words gives 0.
pub fn simhash(normalized: &str) -> u64 {
    let mut weights = [0i64; 64];
    for shingle in bigrams(normalized) {
        let h = shingle_hash(&shingle);
        for (bit, w) in weights.iter_mut().enumerate() {
            *w += if (h >> bit) & 1 == 1 { 1 } else { -1 };
        }
    }
    weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0)
        .fold(0u64, |fp, (bit, _)| fp | (1 << bit))
}

pub fn hamming(a: u64, b: u64) -> u32 { (a ^ b).count_ones() }

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Unique,
    ExactDuplicate,
    /// Near copy of the document stored under this path.
    Similar(String),
}

impl Verdict {
    pub fn is_duplicate(&self) -> bool { !matches!(self, Verdict::Unique) }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Unique => f.write_str("unique"),
            Verdict::ExactDuplicate => f.write_str("exact_duplicate"),
            Verdict::Similar(path) => write!(f, "similar:{path}"),
        }
    }
}

/// Run-scoped detector state. Build one per ingestion run and drop it at the end.
///
/// Not synchronized; concurrent ingestion must funnel documents through a
/// single owner.
#[derive(Debug)]
pub struct SimilarityDetector {
    seen_checksums: HashSet<u32>,
    // registration order; only documents with at least one bigram get one
    fingerprints: Vec<(String, u64)>,
    threshold: u32,
}

impl Default for SimilarityDetector {
    fn default() -> Self { Self::new(DEFAULT_THRESHOLD) }
}

impl SimilarityDetector {
    pub fn new(threshold: u32) -> Self {
        Self { seen_checksums: HashSet::new(), fingerprints: Vec::new(), threshold }
    }

    pub fn len(&self) -> usize { self.seen_checksums.len() }
    pub fn is_empty(&self) -> bool { self.seen_checksums.is_empty() }

    /// Classify `text`, registering it under `path` when it is unique.
    ///
    /// Compares against every stored fingerprint in registration order and
    /// names the earliest match, so cost grows with the number of unique
    /// documents seen this run.
    pub fn check(&mut self, path: &str, text: &str) -> Verdict {
        let normalized = normalize(text);
        let checksum = crc32(normalized.as_bytes());
        if self.seen_checksums.contains(&checksum) {
            return Verdict::ExactDuplicate;
        }
        let has_shingles = normalized.contains(' ');
        let fingerprint = simhash(&normalized);
        if has_shingles {
            let matched = self
                .fingerprints
                .iter()
                .find(|(_, fp)| hamming(fingerprint, *fp) < self.threshold);
            if let Some((other, _)) = matched {
                return Verdict::Similar(other.clone());
            }
        }
        self.seen_checksums.insert(checksum);
        if has_shingles {
            self.fingerprints.push((path.to_string(), fingerprint));
        }
        Verdict::Unique
    }

    /// `(is_duplicate, reason)` form of [`SimilarityDetector::check`].
    pub fn is_duplicate_or_similar(&mut self, path: &str, text: &str) -> (bool, String) {
        let verdict = self.check(path, text);
        (verdict.is_duplicate(), verdict.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIFTY_WORDS: &str = "the quick brown fox jumps over the lazy dog while the farmer watches \
        from the old wooden porch and the sun slowly sets behind the distant hills casting long \
        shadows across the golden wheat fields as evening birds begin their quiet songs near the \
        river bank under a calm purple";

    #[test]
    fn normalize_collapses_and_lowercases() {
        assert_eq!(normalize("  Alpha\t BETA\n\ngamma  "), "alpha beta gamma");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn crc32_matches_reference_values() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"alpha beta gamma"), 0x345D_4445);
        let text = normalize(FIFTY_WORDS);
        assert_eq!(crc32(text.as_bytes()), crc32fast::hash(text.as_bytes()));
    }

    #[test]
    fn identical_text_is_exact_duplicate() {
        let mut d = SimilarityDetector::default();
        assert_eq!(d.check("a.json", "alpha beta gamma"), Verdict::Unique);
        assert_eq!(d.check("b.json", "Alpha   BETA gamma "), Verdict::ExactDuplicate);
        assert_eq!(d.is_duplicate_or_similar("c.json", "alpha beta gamma"), (true, "exact_duplicate".to_string()));
    }

    #[test]
    fn fingerprint_is_deterministic_and_reflexive() {
        let text = normalize(FIFTY_WORDS);
        assert_eq!(simhash(&text), simhash(&text));
        assert_eq!(hamming(simhash(&text), simhash(&text)), 0);
        assert_eq!(simhash("alpha beta gamma"), 0x0618_B238_0406_C402);
    }

    #[test]
    fn one_word_change_is_similar() {
        let original = normalize(FIFTY_WORDS);
        assert_eq!(original.split(' ').count(), 50);
        let edited = original.replace("distant", "sleepy");
        assert_eq!(hamming(simhash(&original), simhash(&edited)), 1);

        let mut d = SimilarityDetector::default();
        assert_eq!(d.check("first.json", &original), Verdict::Unique);
        assert_eq!(d.check("second.json", &edited), Verdict::Similar("first.json".into()));
        assert_eq!(Verdict::Similar("first.json".into()).to_string(), "similar:first.json");
    }

    #[test]
    fn earliest_registered_match_is_reported() {
        let original = normalize(FIFTY_WORDS);
        let fp = simhash(&original);
        let mut d = SimilarityDetector::default();
        d.fingerprints.push(("zz/late-name.json".into(), fp));
        d.fingerprints.push(("aa/early-name.json".into(), fp));
        let edited = original.replace("distant", "sleepy");
        assert_eq!(d.check("x.json", &edited), Verdict::Similar("zz/late-name.json".into()));
    }

    #[test]
    fn unrelated_text_is_unique() {
        let other = "a completely different passage about compilers parsing tokens and emitting \
            machine code for several target architectures";
        assert_eq!(hamming(simhash(&normalize(FIFTY_WORDS)), simhash(&normalize(other))), 26);
        let mut d = SimilarityDetector::default();
        assert_eq!(d.check("a.json", FIFTY_WORDS), Verdict::Unique);
        assert_eq!(d.check("b.json", other), Verdict::Unique);
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn single_words_only_match_by_checksum() {
        assert_eq!(simhash("hello"), 0);
        let mut d = SimilarityDetector::default();
        assert_eq!(d.check("a.json", "hello"), Verdict::Unique);
        assert_eq!(d.check("b.json", "world"), Verdict::Unique);
        assert_eq!(d.check("c.json", "HELLO"), Verdict::ExactDuplicate);
    }
}
