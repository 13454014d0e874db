//! Flat key-value storage for configuration values.
//!
//! This module provides the [`FlatStore`] type, the single source of truth
//! behind a [`Config`](crate::Config). Every value loaded from a source lives
//! here as a string, keyed by its dotted path.
//!
//! # Paths
//!
//! A path is a sequence of segments joined by `.`. A segment is either a field
//! name or a non-negative array index:
//!
//! ```text
//! app.name            -> "x"
//! servers.0.host      -> "a"
//! servers.1.port      -> "2"
//! ```
//!
//! # Example
//!
//! ```rust
//! use flat_config::FlatStore;
//!
//! let mut store = FlatStore::new();
//! store.insert("servers.0.host", "a");
//! store.insert("servers.1.host", "b");
//!
//! assert_eq!(store.get("servers.1.host"), Some("b"));
//! assert_eq!(store.subtree("servers.0").get("host"), Some("a"));
//! ```
use std::collections::HashMap;

/// A mapping from dotted paths to string scalars.
///
/// The store is replaced wholesale on every load or reload and is shared
/// read-only between concurrent readers through an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatStore {
    entries: HashMap<String, String>,
}

impl FlatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Inserts a value, replacing any previous value at `path`.
    pub fn insert(&mut self, path: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(path.into(), value.into());
    }

    /// Copies every entry of `other` into `self`. Entries of `other` win.
    pub fn merge(&mut self, other: FlatStore) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries sorted by path.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Values at `prefix.0`, `prefix.1`, ... up to the first missing index.
    pub fn array<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        (0usize..).map_while(move |i| self.get(&format!("{prefix}.{i}")))
    }

    /// Entries below `prefix.`, with the prefix stripped from their paths.
    pub fn subtree(&self, prefix: &str) -> FlatStore {
        let prefix = format!("{prefix}.");
        self.entries
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&prefix)
                    .map(|rest| (rest.to_string(), v.clone()))
            })
            .collect()
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.entries.clone()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FlatStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl From<FlatStore> for HashMap<String, String> {
    fn from(store: FlatStore) -> Self {
        store.entries
    }
}
