use hashbrown::HashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{apply_bounds, base_data_set, VersionVocabulary};
use crate::antigen::AntigenExpander;
use crate::config::ConfigStore;
use crate::error::{AggregationError, CpraError, Result};
use crate::types::*;

/// Alleles a diplotype record may carry: one or two per locus over A and B
const MAX_DIPLOTYPE_ALLELES: usize = 4;

/// A population diplotype: a set of alleles and its frequency.
///
/// Identity is the allele set, so `A1;A2;B7;B8` and `B8;A2;B7;A1` are the same
/// record.
#[derive(Debug, Clone, PartialEq)]
pub struct Diplotype {
    alleles: BTreeSet<String>,
    frequency: f64,
}

impl Diplotype {
    /// Parse a `;`-separated allele list and its frequency value
    pub fn parse(allele_list: &str, frequency: &str) -> Result<Self> {
        let alleles: BTreeSet<String> = split_list(allele_list).into_iter().collect();
        if alleles.is_empty() || alleles.len() > MAX_DIPLOTYPE_ALLELES {
            return Err(CpraError::configuration(format!(
                "diplotype '{}' must list 1 to {} distinct alleles",
                allele_list, MAX_DIPLOTYPE_ALLELES
            )));
        }

        let frequency: f64 = frequency.trim().parse().map_err(|_| {
            CpraError::configuration(format!(
                "diplotype '{}' has unparsable frequency '{}'",
                allele_list, frequency
            ))
        })?;
        if !frequency.is_finite() {
            return Err(CpraError::configuration(format!(
                "diplotype '{}' has non-finite frequency",
                allele_list
            )));
        }

        Ok(Self { alleles, frequency })
    }

    pub fn alleles(&self) -> &BTreeSet<String> {
        &self.alleles
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Canonical identity: sorted alleles concatenated
    pub fn key(&self) -> String {
        self.alleles.iter().map(String::as_str).collect()
    }

    pub fn contains(&self, allele: &str) -> bool {
        self.alleles.contains(allele)
    }
}

/// Per-version diplotype table plus an allele -> record index
#[derive(Debug, Default)]
struct DiplotypeIndex {
    vocabulary: VersionVocabulary,
    diplotypes: Vec<Diplotype>,
    by_allele: HashMap<String, Vec<usize>>,
}

impl DiplotypeIndex {
    fn build(store: &ConfigStore, version: &str) -> Result<Self> {
        let vocabulary = VersionVocabulary::load(store, version)?;

        let prefix = [KEY_DIPLOTYPE_FREQUENCIES, version, ""].join(KEY_DELIMITER);
        let keys = store.keys(&format!("{}*", prefix))?;

        let mut index = DiplotypeIndex {
            vocabulary,
            ..DiplotypeIndex::default()
        };
        let mut seen: HashMap<BTreeSet<String>, usize> = HashMap::new();

        for key in &keys {
            let allele_list = &key[prefix.len()..];
            let value = store.get(key).unwrap_or_default();
            let diplotype = Diplotype::parse(allele_list, value)?;

            if let Some(&existing) = seen.get(diplotype.alleles()) {
                warn!(
                    "Ignoring duplicate diplotype {} for version '{}' (already loaded as '{}')",
                    allele_list,
                    version,
                    index.diplotypes[existing].key()
                );
                continue;
            }

            let position = index.diplotypes.len();
            for allele in diplotype.alleles() {
                index
                    .by_allele
                    .entry(allele.clone())
                    .or_default()
                    .push(position);
            }
            seen.insert(diplotype.alleles().clone(), position);
            index.diplotypes.push(diplotype);
        }

        Ok(index)
    }

    /// Records containing at least one of `antigens`, each once, in load order
    fn matching<'a, I>(&self, antigens: I) -> BTreeSet<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        antigens
            .into_iter()
            .filter_map(|antigen| self.by_allele.get(antigen))
            .flatten()
            .copied()
            .collect()
    }
}

/// cPRA as the summed frequency of diplotypes carrying any unacceptable antigen
pub struct DiplotypeCalculator {
    store: Arc<ConfigStore>,
    versions: HashMap<String, DiplotypeIndex>,
}

impl DiplotypeCalculator {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self {
            store,
            versions: HashMap::new(),
        }
    }

    pub fn initialize_version(&mut self, version: &str) -> Result<()> {
        if self.versions.contains_key(version) {
            return Ok(());
        }

        let index = DiplotypeIndex::build(&self.store, version)?;
        info!(
            "Loaded {} diplotypes ({} distinct alleles) for version '{}'",
            index.diplotypes.len(),
            index.by_allele.len(),
            version
        );
        self.versions.insert(version.to_string(), index);
        Ok(())
    }

    /// Number of distinct diplotypes loaded for `version`
    pub fn diplotype_count(&self, version: &str) -> Option<usize> {
        self.versions.get(version).map(|index| index.diplotypes.len())
    }

    pub fn calculate(&self, request: &CpraRequest) -> Result<CpraResult> {
        let index = self.versions.get(&request.version).ok_or_else(|| {
            CpraError::InvalidVersion {
                requested: request.version.clone(),
                available: self.versions.keys().cloned().collect(),
            }
        })?;

        let antibodies = request.normalized_antibodies();
        let mut result = CpraResult::new(&request.version, antibodies.clone());
        if antibodies.is_empty() {
            return Ok(result);
        }

        let expansion = AntigenExpander::new(&self.store, &request.version, &index.vocabulary.alleles)
            .expand(&antibodies)?;
        result.warnings.extend(expansion.warnings);
        result.unacceptable_antigens = expansion.antigens.to_delimited();

        let matched = index.matching(expansion.antigens.flat());
        let cpra: f64 = matched
            .iter()
            .map(|&position| index.diplotypes[position].frequency())
            .sum();
        debug!(
            "{} of {} diplotypes matched, cPRA {}",
            matched.len(),
            index.diplotypes.len(),
            cpra
        );

        if !cpra.is_finite() {
            return Err(AggregationError::NonFinite {
                stage: "diplotype cPRA",
                value: cpra,
            }
            .into());
        }

        result.cpra = apply_bounds(cpra, &mut result);
        Ok(result)
    }

    pub fn self_check(&self, version: &str) -> CpraDataSet {
        let mut data_set = base_data_set(&self.store, version, CalculatorType::Diplotype);

        match self.diplotype_count(version) {
            Some(count) => data_set.frequency_records = count,
            None => data_set
                .warnings
                .push(format!("ERROR: version {} is not initialized", version)),
        }
        if data_set.frequency_records == 0 {
            data_set.warnings.push(format!(
                "ERROR: no {} for {}",
                KEY_DIPLOTYPE_FREQUENCIES, version
            ));
        }

        data_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(extra: &[(&str, &str)]) -> Arc<ConfigStore> {
        let mut rows = vec![
            ("hlaAlleles:d1", "A;B"),
            ("hlaAllelesWithFrequencies:d1", "A;B"),
            ("hlaEthnicities:d1", "Default"),
            ("hlaEthnicFrequencies:d1", "1.0"),
            ("hlaUnacceptableAntigenEquivalences:d1:A9", "A23;A24"),
            ("hlaDiplotypeFrequencies:d1:A1;A2;B7;B8", "0.125"),
            ("hlaDiplotypeFrequencies:d1:A23;A24;B7;B57", "0.0625"),
            ("hlaDiplotypeFrequencies:d1:A9;A1;B8;B44", "0.25"),
            ("hlaDiplotypeFrequencies:d1:A2;A3;B44;B57", "0.03125"),
        ];
        rows.extend_from_slice(extra);
        Arc::new(rows.into_iter().collect())
    }

    fn calculator(store: Arc<ConfigStore>) -> DiplotypeCalculator {
        let mut calculator = DiplotypeCalculator::new(store);
        calculator.initialize_version("d1").unwrap();
        calculator
    }

    fn score(calculator: &DiplotypeCalculator, antibodies: &[&str]) -> CpraResult {
        calculator
            .calculate(&CpraRequest::with_antibodies("d1", antibodies.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_diplotype_identity_is_the_allele_set() {
        let a = Diplotype::parse("A1;A2;B7;B8", "0.1").unwrap();
        let b = Diplotype::parse("B8;A2;B7;A1", "0.1").unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), "A1A2B7B8");
        assert!(a.contains("B7"));
    }

    #[test]
    fn test_diplotype_parse_rejects_bad_records() {
        assert!(Diplotype::parse("A1;A2;B7;B8;C1", "0.1").is_err());
        assert!(Diplotype::parse("", "0.1").is_err());
        assert!(Diplotype::parse("A1;B7", "often").is_err());
    }

    #[test]
    fn test_equivalences_expand_the_match() {
        let calculator = calculator(store(&[]));

        let result = score(&calculator, &["A9"]);
        assert_eq!(result.unacceptable_antigens, "A23;A24;A9");
        assert!((result.cpra - 0.3125).abs() < 1e-12);
    }

    #[test]
    fn test_matched_records_are_counted_once() {
        let calculator = calculator(store(&[]));

        assert!((score(&calculator, &["A1"]).cpra - 0.375).abs() < 1e-12);
        // A1 and A9 both hit the A9;A1;B8;B44 record
        assert!((score(&calculator, &["A9", "A1"]).cpra - 0.4375).abs() < 1e-12);
        assert!((score(&calculator, &["b57", "B44"]).cpra - 0.34375).abs() < 1e-12);
    }

    #[test]
    fn test_empty_antibodies_score_zero() {
        let calculator = calculator(store(&[]));
        let result = score(&calculator, &[]);
        assert_eq!(result.cpra, 0.0);
        assert!(result.unacceptable_antigens.is_empty());
    }

    #[test]
    fn test_duplicate_allele_sets_are_ignored() {
        let calculator = calculator(store(&[("hlaDiplotypeFrequencies:d1:B8;B7;A2;A1", "0.5")]));
        assert_eq!(calculator.diplotype_count("d1"), Some(4));
    }

    #[test]
    fn test_slight_overshoot_is_clamped() {
        let calculator = calculator(store(&[("hlaDiplotypeFrequencies:d1:A1;B99", "0.62505")]));

        // 0.125 + 0.25 + 0.62505
        let result = score(&calculator, &["A1"]);
        assert_eq!(result.cpra, 1.0);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_large_overshoot_is_kept_with_warning() {
        let calculator = calculator(store(&[("hlaDiplotypeFrequencies:d1:A1;B99", "0.75")]));

        let result = score(&calculator, &["A1"]);
        assert!((result.cpra - 1.125).abs() < 1e-12);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("CPRA is > 1"));
    }

    #[test]
    fn test_unknown_locus_is_rejected() {
        let calculator = calculator(store(&[]));
        let err = calculator
            .calculate(&CpraRequest::with_antibodies("d1", ["DR4"]))
            .unwrap_err();
        assert!(matches!(err, CpraError::InvalidAntibody { .. }));
    }

    #[test]
    fn test_uninitialized_version() {
        let calculator = calculator(store(&[]));
        let err = calculator
            .calculate(&CpraRequest::with_antibodies("d2", ["A1"]))
            .unwrap_err();
        assert!(matches!(err, CpraError::InvalidVersion { .. }));
    }

    #[test]
    fn test_self_check_counts_records() {
        let calculator = calculator(store(&[]));
        let data_set = calculator.self_check("d1");
        assert_eq!(data_set.frequency_records, 4);
        assert_eq!(data_set.calculator_type, Some(CalculatorType::Diplotype));
        assert!(data_set.warnings.is_empty());
    }
}
