//! Locus recognition for antibody tokens.
//!
//! A token such as `DQB11` is split into a locus prefix drawn from the version's
//! allele vocabulary (`DQB1`) and a type suffix (`1`). Vocabularies are ambiguous
//! (`DQ` and `DQB1` both prefix `DQB11`), so the longest prefix wins.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

lazy_static! {
    static ref TYPE_SUFFIX: Regex = Regex::new(r"^[A-Z0-9*:\-]+$").unwrap();
}

/// A parsed antibody: locus prefix plus optional type suffix
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlleleToken {
    pub locus: String,
    pub allele_type: Option<String>,
}

impl AlleleToken {
    pub fn new(locus: impl Into<String>, allele_type: Option<String>) -> Self {
        Self {
            locus: locus.into(),
            allele_type,
        }
    }

    /// True when the suffix was rejected and only the locus was recognised
    pub fn is_locus_only(&self) -> bool {
        self.allele_type.is_none()
    }
}

impl fmt::Display for AlleleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.allele_type {
            Some(t) => write!(f, "{}{}", self.locus, t),
            None => f.write_str(&self.locus),
        }
    }
}

/// Ordered allele vocabulary of a version (A, B, BW, C, DR, DQ, DQB1, ...)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlleleVocabulary {
    entries: Vec<String>,
}

impl AlleleVocabulary {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    /// Entries in configured order
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, locus: &str) -> bool {
        self.entries.iter().any(|e| e == locus)
    }

    pub fn position(&self, locus: &str) -> Option<usize> {
        self.entries.iter().position(|e| e == locus)
    }

    /// Split `token` on the longest matching locus prefix.
    ///
    /// Entries are tried longest first; ties keep configured order. The remainder
    /// becomes the type when it is empty or matches `[A-Z0-9*:-]+`, otherwise only
    /// the locus is kept. `None` when no entry prefixes the token.
    pub fn parse(&self, token: &str) -> Option<AlleleToken> {
        let mut candidates: Vec<&String> = self.entries.iter().collect();
        candidates.sort_by(|a, b| b.len().cmp(&a.len()));

        for prefix in candidates {
            if prefix.is_empty() || !token.starts_with(prefix.as_str()) {
                continue;
            }

            let remainder = &token[prefix.len()..];
            let parsed = if remainder.is_empty() || TYPE_SUFFIX.is_match(remainder) {
                AlleleToken::new(prefix.clone(), Some(remainder.to_string()))
            } else {
                AlleleToken::new(prefix.clone(), None)
            };
            trace!("parsed '{}' as {:?}", token, parsed);
            return Some(parsed);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocabulary() -> AlleleVocabulary {
        AlleleVocabulary::new(["A", "B", "BW", "C", "DR", "DQ", "DQB1", "DP"])
    }

    #[test]
    fn test_longest_prefix_wins() {
        let vocab = vocabulary();
        assert_eq!(
            vocab.parse("DQB11"),
            Some(AlleleToken::new("DQB1", Some("1".to_string())))
        );
        assert_eq!(
            vocab.parse("DQ1"),
            Some(AlleleToken::new("DQ", Some("1".to_string())))
        );
        assert_eq!(
            vocab.parse("BW4"),
            Some(AlleleToken::new("BW", Some("4".to_string())))
        );
        assert_eq!(
            vocab.parse("B57"),
            Some(AlleleToken::new("B", Some("57".to_string())))
        );
    }

    #[test]
    fn test_bare_locus_and_rejected_suffix() {
        let vocab = vocabulary();

        let bare = vocab.parse("DR").unwrap();
        assert_eq!(bare.allele_type.as_deref(), Some(""));
        assert_eq!(bare.to_string(), "DR");

        let locus_only = vocab.parse("DRx52").unwrap();
        assert!(locus_only.is_locus_only());
        assert_eq!(locus_only.locus, "DR");
    }

    #[test]
    fn test_suffix_character_class() {
        let vocab = vocabulary();
        let token = vocab.parse("A*02:01").unwrap();
        assert_eq!(token.allele_type.as_deref(), Some("*02:01"));
        assert_eq!(token.to_string(), "A*02:01");
    }

    #[test]
    fn test_no_match() {
        assert_eq!(vocabulary().parse("X1"), None);
        assert_eq!(AlleleVocabulary::default().parse("A1"), None);
    }

    #[test]
    fn test_vocabulary_keeps_configured_order() {
        let vocab = vocabulary();
        assert_eq!(vocab.entries()[0], "A");
        assert_eq!(vocab.position("DQB1"), Some(6));
        assert!(vocab.contains("BW"));
        assert!(!vocab.contains("W"));
    }
}
