use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

use crate::allele::AlleleVocabulary;
use crate::config::ConfigStore;
use crate::error::{CpraError, Result};
use crate::types::{split_list, KEY_ANTIGEN_EQUIVALENCES, SUB_DELIMITER};

/// Unacceptable antigens of one request, bucketed by locus.
///
/// Both the flat view (diplotype aggregation) and the per-locus view (haplotype
/// aggregation) are sorted and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnacceptableAntigens {
    by_locus: BTreeMap<String, BTreeSet<String>>,
}

impl UnacceptableAntigens {
    fn add(&mut self, locus: &str, antigen: &str) {
        self.by_locus
            .entry(locus.to_string())
            .or_default()
            .insert(antigen.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.by_locus.values().all(BTreeSet::is_empty)
    }

    /// Number of distinct antigens across all loci
    pub fn len(&self) -> usize {
        self.flat().len()
    }

    pub fn by_locus(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.by_locus
    }

    /// Antigens recorded under `locus`, sorted
    pub fn for_locus(&self, locus: &str) -> Option<&BTreeSet<String>> {
        self.by_locus.get(locus).filter(|set| !set.is_empty())
    }

    pub fn flat(&self) -> BTreeSet<&str> {
        self.by_locus
            .values()
            .flat_map(|set| set.iter().map(String::as_str))
            .collect()
    }

    /// Sorted `;`-joined list as reported in results
    pub fn to_delimited(&self) -> String {
        self.flat().into_iter().collect::<Vec<_>>().join(SUB_DELIMITER)
    }
}

/// Outcome of expanding a patient's antibodies
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub antigens: UnacceptableAntigens,
    pub warnings: Vec<String>,
}

/// Expands antibodies into unacceptable antigens using configured equivalences
pub struct AntigenExpander<'a> {
    store: &'a ConfigStore,
    version: &'a str,
    vocabulary: &'a AlleleVocabulary,
}

impl<'a> AntigenExpander<'a> {
    pub fn new(store: &'a ConfigStore, version: &'a str, vocabulary: &'a AlleleVocabulary) -> Self {
        Self {
            store,
            version,
            vocabulary,
        }
    }

    /// Expand upper-cased antibody tokens.
    ///
    /// Each antibody is recorded under its own locus together with every equivalent
    /// listed under `hlaUnacceptableAntigenEquivalences:<version>:<antibody>`; each
    /// equivalent is parsed on its own and may land under another locus.
    pub fn expand(&self, antibodies: &[String]) -> Result<Expansion> {
        let mut expansion = Expansion::default();

        for raw in antibodies {
            let antibody = raw.to_uppercase();

            let token = self.vocabulary.parse(&antibody).ok_or_else(|| {
                CpraError::invalid_antibody(&antibody, "no matching locus in allele vocabulary")
            })?;
            if !self.vocabulary.contains(&token.locus) {
                return Err(CpraError::invalid_antibody(
                    &antibody,
                    format!("locus '{}' not in allele vocabulary", token.locus),
                ));
            }
            if token.is_locus_only() {
                expansion.warnings.push(format!(
                    "Antibody {} has an unrecognised type; matched locus {} only",
                    antibody, token.locus
                ));
            }
            expansion.antigens.add(&token.locus, &antibody);

            if let Some(equivalents) =
                self.store
                    .get3(KEY_ANTIGEN_EQUIVALENCES, self.version, &antibody)
            {
                for equivalent in split_list(equivalents) {
                    let locus = self.equivalent_locus(&antibody, &equivalent)?;
                    trace!("{} -> {} ({})", antibody, equivalent, locus);
                    expansion.antigens.add(&locus, &equivalent);
                }
            }
        }

        debug!(
            "unacceptable antigens for version '{}': {}",
            self.version,
            expansion.antigens.to_delimited()
        );
        Ok(expansion)
    }

    fn equivalent_locus(&self, antibody: &str, equivalent: &str) -> Result<String> {
        match self.vocabulary.parse(equivalent) {
            Some(token) if self.vocabulary.contains(&token.locus) => Ok(token.locus),
            _ => Err(CpraError::configuration(format!(
                "equivalence {}:{}:{} lists '{}', which matches no locus of the version",
                KEY_ANTIGEN_EQUIVALENCES, self.version, antibody, equivalent
            ))),
        }
    }
}
