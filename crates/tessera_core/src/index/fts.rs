//! Full-text index backing the `TEXT` query operator.
//!
//! Text is split on whitespace and punctuation and lowercased. A query is a
//! list of terms that must all match; a term ending in `*` matches any token
//! with that prefix and a term starting with `-` excludes objects containing
//! it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use tessera_codec::ObjKey;

/// Tokenizer settings.
#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    /// Minimum token length to index.
    pub min_token_length: usize,
    /// Maximum token length to index.
    pub max_token_length: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            min_token_length: 1,
            max_token_length: 256,
        }
    }
}

impl TokenizerConfig {
    /// Splits `text` into normalized tokens.
    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '\''))
            .map(|t| t.trim_matches('\''))
            .filter(|t| {
                let n = t.chars().count();
                n >= self.min_token_length && n <= self.max_token_length
            })
            .map(str::to_lowercase)
            .collect()
    }
}

/// One parsed query term.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Token(String),
    Prefix(String),
    Exclude(String),
}

/// Inverted index: token -> object keys, plus the forward mapping needed to
/// re-index an object when its text changes.
#[derive(Debug, Clone, Default)]
pub struct FullTextIndex {
    tokenizer: TokenizerConfig,
    inverted: BTreeMap<String, BTreeSet<ObjKey>>,
    forward: HashMap<ObjKey, BTreeSet<String>>,
}

impl FullTextIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `text` for `key`, replacing what was indexed before.
    pub fn index_text(&mut self, key: ObjKey, text: &str) {
        self.remove(key);
        let tokens: BTreeSet<String> = self.tokenizer.tokenize(text).into_iter().collect();
        for token in &tokens {
            self.inverted.entry(token.clone()).or_default().insert(key);
        }
        if !tokens.is_empty() {
            self.forward.insert(key, tokens);
        }
    }

    /// Removes `key` from the index.
    pub fn remove(&mut self, key: ObjKey) {
        let Some(tokens) = self.forward.remove(&key) else {
            return;
        };
        for token in tokens {
            if let Some(keys) = self.inverted.get_mut(&token) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.inverted.remove(&token);
                }
            }
        }
    }

    /// Number of indexed objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    fn parse_query(&self, query: &str) -> Vec<Term> {
        query
            .split_whitespace()
            .filter_map(|raw| {
                let (exclude, raw) = match raw.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, raw),
                };
                let (prefix, raw) = match raw.strip_suffix('*') {
                    Some(rest) => (true, rest),
                    None => (false, raw),
                };
                let token = self.tokenizer.tokenize(raw).into_iter().next()?;
                Some(match (exclude, prefix) {
                    (true, _) => Term::Exclude(token),
                    (false, true) => Term::Prefix(token),
                    (false, false) => Term::Token(token),
                })
            })
            .collect()
    }

    fn keys_for_prefix(&self, prefix: &str) -> BTreeSet<ObjKey> {
        self.inverted
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(token, _)| token.starts_with(prefix))
            .flat_map(|(_, keys)| keys.iter().copied())
            .collect()
    }

    /// Objects matching every term of `query`.
    #[must_use]
    pub fn search(&self, query: &str) -> BTreeSet<ObjKey> {
        let terms = self.parse_query(query);
        let mut result: Option<BTreeSet<ObjKey>> = None;
        let mut excluded = BTreeSet::new();
        for term in &terms {
            let matched = match term {
                Term::Token(t) => self.inverted.get(t).cloned().unwrap_or_default(),
                Term::Prefix(p) => self.keys_for_prefix(p),
                Term::Exclude(t) => {
                    excluded.extend(self.inverted.get(t).into_iter().flatten().copied());
                    continue;
                }
            };
            result = Some(match result {
                None => matched,
                Some(acc) => acc.intersection(&matched).copied().collect(),
            });
        }
        let base = result.unwrap_or_else(|| {
            if excluded.is_empty() {
                BTreeSet::new()
            } else {
                self.forward.keys().copied().collect()
            }
        });
        base.difference(&excluded).copied().collect()
    }
}
