use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref RE: Regex = Regex::new(r"[a-z0-9]+").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
}

/// Tokenize text into stemmed, lowercase ASCII alphanumeric terms in document
/// order. Used unchanged for documents and queries; every term starts with a
/// letter or digit, so it always maps to a bucket.
pub fn tokenize(text: &str) -> Vec<String> {
    let folded: String = text.nfkd().filter(|c| !is_combining_mark(*c)).collect::<String>().to_lowercase();
    RE.find_iter(&folded).map(|m| STEMMER.stem(m.as_str()).into_owned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = tokenize("Running, runner's run!");
        assert!(t.iter().any(|w| w == "run"));
    }

    #[test]
    fn keeps_order_and_repeats() {
        assert_eq!(tokenize("cat dog cat"), vec!["cat", "dog", "cat"]);
    }

    #[test]
    fn splits_on_punctuation_and_keeps_digits() {
        assert_eq!(tokenize("e-mail 2024!"), vec!["e", "mail", "2024"]);
    }
}
