//! Versioned key-value configuration.
//!
//! Every dataset (allele vocabularies, equivalences, frequency tables) lives in one
//! flat string map addressed by composite keys such as
//! `hlaAlleles:optn_2015` or `hlaHaplotypeFrequencies:optn_2015:A9;B57`.

pub mod loader;

use hashbrown::HashMap;
use regex::Regex;
use std::path::Path;
use tracing::debug;

use crate::error::{CpraError, Result};
use crate::types::KEY_DELIMITER;

pub use loader::ConfigLoader;

/// Immutable snapshot of the configuration rows
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    entries: HashMap<String, String>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every resource matching `source_pattern` (file, directory or file-name glob)
    pub fn load(source_pattern: &str) -> Result<Self> {
        ConfigLoader::new(false).load(source_pattern)
    }

    /// Load a single CSV resource
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut store = Self::new();
        ConfigLoader::new(false).load_file(path, &mut store)?;
        Ok(store)
    }

    /// Insert a row; rows with an empty key or value are ignored
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            return false;
        }
        self.entries.insert(key, value);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Lookup of `key1:key2`
    pub fn get2(&self, key1: &str, key2: &str) -> Option<&str> {
        self.get(&[key1, key2].join(KEY_DELIMITER))
    }

    /// Lookup of `key1:key2:key3`
    pub fn get3(&self, key1: &str, key2: &str, key3: &str) -> Option<&str> {
        self.get(&[key1, key2, key3].join(KEY_DELIMITER))
    }

    /// Sorted keys matching a glob where `*` matches any substring
    pub fn keys(&self, glob_pattern: &str) -> Result<Vec<String>> {
        let pattern = glob_to_regex(glob_pattern)?;

        let mut keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();
        keys.sort();

        debug!(
            "keys({}) matched {} of {} entries",
            glob_pattern,
            keys.len(),
            self.entries.len()
        );
        Ok(keys)
    }
}

impl<K, V> FromIterator<(K, V)> for ConfigStore
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut store = ConfigStore::new();
        for (key, value) in iter {
            store.insert(key, value);
        }
        store
    }
}

fn glob_to_regex(glob_pattern: &str) -> Result<Regex> {
    let body = glob_pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    Regex::new(&format!("^{}$", body)).map_err(|e| {
        CpraError::configuration(format!("invalid key pattern '{}': {}", glob_pattern, e))
    })
}
