//! Text analysis contract and the built-in analyzers.
//!
//! The index core never interprets terms beyond byte comparison; analyzers
//! turn field text into `(term bytes, position, offsets, boost)` tuples at
//! index time. Applications plug their own pipelines in through the
//! [`Analyzer`] trait; the two built-ins cover the common cases and the test
//! suite.

use std::fmt::Debug;
use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{QuillError, Result};

/// A single token produced by analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Term bytes as they will appear in the index.
    pub term: Vec<u8>,
    /// Token position within the field, 0-based.
    pub position: u32,
    /// Start character offset in the source text.
    pub start: usize,
    /// End character offset (exclusive) in the source text.
    pub end: usize,
    /// Per-token boost.
    pub boost: f32,
}

impl Token {
    /// Create a token with default boost.
    pub fn new<T: Into<Vec<u8>>>(term: T, position: u32, start: usize, end: usize) -> Self {
        Token {
            term: term.into(),
            position,
            start,
            end,
            boost: 1.0,
        }
    }
}

/// Trait for text analyzers.
///
/// Implementations must be stateless per call: analyzing the same text twice
/// yields the same token stream.
pub trait Analyzer: Send + Sync + Debug {
    /// Name under which this analyzer is registered.
    fn name(&self) -> &'static str;

    /// Tokenize field text.
    fn analyze(&self, field: &str, text: &str) -> Result<Vec<Token>>;
}

/// Splits on non-alphanumeric characters and lowercases.
#[derive(Debug, Clone, Default)]
pub struct StandardAnalyzer;

impl StandardAnalyzer {
    /// Create a new standard analyzer.
    pub fn new() -> Self {
        StandardAnalyzer
    }
}

impl Analyzer for StandardAnalyzer {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn analyze(&self, _field: &str, text: &str) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut position = 0u32;
        let mut word_start: Option<usize> = None;

        for (offset, ch) in text.char_indices() {
            if ch.is_alphanumeric() {
                if word_start.is_none() {
                    word_start = Some(offset);
                }
            } else if let Some(start) = word_start.take() {
                let word = text[start..offset].to_lowercase();
                tokens.push(Token::new(word.into_bytes(), position, start, offset));
                position += 1;
            }
        }
        if let Some(start) = word_start {
            let word = text[start..].to_lowercase();
            tokens.push(Token::new(word.into_bytes(), position, start, text.len()));
        }

        Ok(tokens)
    }
}

/// Emits the whole value as a single token, unmodified.
///
/// Used for id fields, where the value is an opaque key.
#[derive(Debug, Clone, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    /// Create a new keyword analyzer.
    pub fn new() -> Self {
        KeywordAnalyzer
    }
}

impl Analyzer for KeywordAnalyzer {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn analyze(&self, _field: &str, text: &str) -> Result<Vec<Token>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Token::new(
            text.as_bytes().to_vec(),
            0,
            0,
            text.len(),
        )])
    }
}

/// A named set of analyzers threaded into writer construction.
///
/// Replaces any notion of process-global analyzer state: each writer carries
/// its own set, seeded with the built-ins.
#[derive(Debug, Clone)]
pub struct AnalyzerSet {
    by_name: AHashMap<String, Arc<dyn Analyzer>>,
}

impl AnalyzerSet {
    /// Create a set containing the built-in analyzers.
    pub fn defaults() -> Self {
        let mut set = AnalyzerSet {
            by_name: AHashMap::new(),
        };
        set.register(Arc::new(StandardAnalyzer::new()));
        set.register(Arc::new(KeywordAnalyzer::new()));
        set
    }

    /// Register an analyzer under its own name, replacing any previous one.
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.by_name.insert(analyzer.name().to_string(), analyzer);
    }

    /// Look up an analyzer by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Analyzer>> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| QuillError::analysis(format!("unknown analyzer '{name}'")))
    }
}

impl Default for AnalyzerSet {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_analyzer_tokens() {
        let analyzer = StandardAnalyzer::new();
        let tokens = analyzer.analyze("body", "The quick-brown Fox!").unwrap();

        let terms: Vec<&str> = tokens
            .iter()
            .map(|t| std::str::from_utf8(&t.term).unwrap())
            .collect();
        assert_eq!(terms, vec!["the", "quick", "brown", "fox"]);

        let positions: Vec<u32> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);

        // Offsets point back into the source text
        assert_eq!(&"The quick-brown Fox!"[tokens[3].start..tokens[3].end], "Fox");
    }

    #[test]
    fn test_standard_analyzer_empty_input() {
        let analyzer = StandardAnalyzer::new();
        assert!(analyzer.analyze("body", "").unwrap().is_empty());
        assert!(analyzer.analyze("body", "  --  ").unwrap().is_empty());
    }

    #[test]
    fn test_keyword_analyzer_single_token() {
        let analyzer = KeywordAnalyzer::new();
        let tokens = analyzer.analyze("id", "Doc-42/A").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].term, b"Doc-42/A".to_vec());
        assert_eq!(tokens[0].position, 0);
    }

    #[test]
    fn test_analyzer_set_lookup() {
        let set = AnalyzerSet::defaults();
        assert_eq!(set.get("standard").unwrap().name(), "standard");
        assert_eq!(set.get("keyword").unwrap().name(), "keyword");
        assert!(matches!(set.get("nope"), Err(QuillError::Analysis(_))));
    }
}
