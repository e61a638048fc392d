//! Tokenization and canonical search text derivation.
//!
//! Both the canonical text and the token set are deterministic functions of
//! the document: the same input always produces the same index entries, which
//! keeps builds stable and snapshots reproducible.

use crate::document::{AttributeValue, Document};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Attribute keys whose string-list values are folded into the canonical
/// search text and the token set.
pub const SALIENT_KEYS: &[&str] = &["skills", "technologies", "tags"];

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
        "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
        "these", "they", "this", "to", "was", "will", "with",
    ]
    .into_iter()
    .collect()
});

/// Tokenized text: owns the lowercased buffer, exposes `&str` slices via byte
/// spans. One heap allocation for the buffer instead of one per token.
pub struct Tokens {
    buffer: String,
    spans: Vec<(u32, u32)>,
}

impl Tokens {
    /// Iterate over token slices in document order (duplicates preserved).
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.spans
            .iter()
            .map(|&(s, e)| &self.buffer[s as usize..e as usize])
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Deduplicate into an owned token set.
    pub fn to_set(&self) -> HashSet<String> {
        self.iter().map(str::to_string).collect()
    }
}

/// Tokenize text: lowercase, split on non-alphanumeric boundaries, drop stop
/// words and single-character tokens.
pub fn tokenize(text: &str) -> Tokens {
    let buffer = text.to_lowercase();
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in buffer.char_indices() {
        if c.is_alphanumeric() {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start {
            if keep_token(&buffer[s..i]) {
                spans.push((s as u32, i as u32));
            }
            start = None;
        }
    }
    if let Some(s) = start {
        if keep_token(&buffer[s..]) {
            spans.push((s as u32, buffer.len() as u32));
        }
    }

    Tokens { buffer, spans }
}

#[inline]
fn keep_token(token: &str) -> bool {
    token.len() > 1 && !STOP_WORDS.contains(token)
}

/// Derive the canonical search text for a document: the content payload
/// followed by the salient list attributes, in a fixed order.
pub fn canonical_text(doc: &Document) -> String {
    let mut parts: Vec<&str> = vec![doc.text.as_str()];
    for key in SALIENT_KEYS {
        if let Some(AttributeValue::StringList(values)) = doc.attributes.get(*key) {
            parts.extend(values.iter().map(String::as_str));
        }
    }
    parts.join(" ")
}

/// Derive the token set for a document: normalized content tokens unioned
/// with the lowercased salient attribute values (kept whole, so multi-word
/// skills like "machine learning" also match as a unit).
pub fn token_set(doc: &Document) -> HashSet<String> {
    let canonical = canonical_text(doc);
    let mut set = tokenize(&canonical).to_set();
    for key in SALIENT_KEYS {
        if let Some(AttributeValue::StringList(values)) = doc.attributes.get(*key) {
            set.extend(values.iter().map(|v| v.to_lowercase()));
        }
    }
    set
}

/// Derive the token set for a free-text query.
pub fn query_token_set(query: &str) -> HashSet<String> {
    tokenize(query).to_set()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn doc(text: &str, skills: &[&str]) -> Document {
        let mut attributes = HashMap::new();
        if !skills.is_empty() {
            attributes.insert(
                "skills".to_string(),
                AttributeValue::StringList(skills.iter().map(|s| s.to_string()).collect()),
            );
        }
        Document {
            id: "d1".into(),
            text: text.into(),
            attributes,
        }
    }

    #[test]
    fn test_tokenize_drops_stop_words() {
        let tokens = tokenize("The quick brown fox with a dog");
        let words: Vec<&str> = tokens.iter().collect();
        assert!(!words.contains(&"the"));
        assert!(!words.contains(&"with"));
        assert!(words.contains(&"quick"));
        assert!(words.contains(&"fox"));
    }

    #[test]
    fn test_tokenize_preserves_duplicates() {
        let tokens = tokenize("rust rust rust");
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn test_tokenize_drops_single_chars() {
        let tokens = tokenize("c r python");
        let words: Vec<&str> = tokens.iter().collect();
        assert_eq!(words, vec!["python"]);
    }

    #[test]
    fn test_canonical_text_appends_salient_lists() {
        let d = doc("backend engineer", &["Kubernetes", "AWS"]);
        let text = canonical_text(&d);
        assert!(text.contains("backend engineer"));
        assert!(text.contains("Kubernetes"));
        assert!(text.contains("AWS"));
    }

    #[test]
    fn test_canonical_text_deterministic() {
        let d = doc("python developer", &["aws", "gcp"]);
        assert_eq!(canonical_text(&d), canonical_text(&d));
    }

    #[test]
    fn test_token_set_includes_lowercased_skills() {
        let d = doc("backend engineer", &["Kubernetes", "Machine Learning"]);
        let set = token_set(&d);
        assert!(set.contains("kubernetes"));
        assert!(set.contains("machine learning"));
        assert!(set.contains("backend"));
    }

    #[test]
    fn test_empty_query_token_set() {
        assert!(query_token_set("").is_empty());
        assert!(query_token_set("   ").is_empty());
    }
}
