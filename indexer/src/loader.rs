use anyhow::Result;
use scraper::{Html, Selector};
use serde::Deserialize;
use sieve_core::ingest::SourceDocument;
use std::fs;
use std::path::Path;
use url::Url;

const VALID_EXTENSIONS: &[&str] = &[".txt", ".html", ".htm", ".md", ".xml", ".xhtml", ".xhtm", ".xht"];
const MARKUP_HINTS: &[&str] = &["html", "body", "meta", "<p", "txt", "text"];
/// Tags whose text is repeated after the body so it weighs more.
const IMPORTANT_TAGS: &[&str] = &["title", "h1", "h2", "h3", "b", "strong"];
const IMPORTANT_REPEAT: usize = 5;

/// One crawled page as stored in the corpus.
#[derive(Debug, Deserialize)]
struct RawRecord {
    url: String,
    content: String,
    #[serde(default)]
    encoding: String,
}

/// URL and content heuristics deciding whether a page is worth indexing.
pub fn is_valid_page(url: &str, content: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else { return false };
    if !matches!(parsed.scheme(), "http" | "https") || parsed.fragment().is_some() {
        return false;
    }
    let last = parsed.path_segments().and_then(|mut s| s.next_back()).unwrap_or("").to_lowercase();
    let has_valid_extension = last.is_empty() || !last.contains('.') || VALID_EXTENSIONS.iter().any(|ext| last.ends_with(ext));
    if !has_valid_extension {
        return false;
    }
    let lower = content.to_lowercase();
    MARKUP_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Body text followed by the text of important tags, repeated.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::new();
    if let Ok(body) = Selector::parse("body") {
        for element in document.select(&body) {
            text.push_str(&element.text().collect::<Vec<_>>().join(" "));
        }
    }
    let mut important = Vec::new();
    for tag in IMPORTANT_TAGS {
        if let Ok(selector) = Selector::parse(tag) {
            for element in document.select(&selector) {
                let t = element.text().collect::<Vec<_>>().join(" ");
                let t = t.trim();
                if !t.is_empty() {
                    important.push(t.to_string());
                }
            }
        }
    }
    if !important.is_empty() {
        let joined = important.join(" ");
        for _ in 0..IMPORTANT_REPEAT {
            text.push(' ');
            text.push_str(&joined);
        }
    }
    text
}

/// Load one corpus record. `Ok(None)` means skip: too large, not a record,
/// or not a page worth indexing.
pub fn load_document(path: &Path, max_bytes: u64) -> Result<Option<SourceDocument>> {
    let size = fs::metadata(path)?.len();
    if size > max_bytes {
        tracing::debug!(path = %path.display(), size, "skipped: too large");
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    let record: RawRecord = match serde_json::from_str(&raw) {
        Ok(record) => record,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "skipped: not a page record");
            return Ok(None);
        }
    };
    if !is_valid_page(&record.url, &record.content) {
        tracing::debug!(path = %path.display(), url = %record.url, "skipped: filtered page");
        return Ok(None);
    }
    let content = if record.encoding.to_lowercase().contains("ascii") {
        record.content.chars().filter(|c| c.is_ascii()).collect()
    } else {
        record.content
    };
    Ok(Some(SourceDocument { path: path.display().to_string(), url: record.url, text: visible_text(&content) }))
}
