//! Haplotype-frequency cPRA.
//!
//! Unacceptable antigens are grouped by frequency-bearing locus. For every
//! non-empty subset of those loci the cross product of their antigens is looked
//! up as a haplotype (`A9`, `A9;B57`, ...) and the per-ethnicity frequencies are
//! summed into the level given by the subset size. Inclusion-exclusion over the
//! levels gives the probability `S` that a haplotype carries none of the
//! antigens; a donor has two haplotypes, so the ethnic cPRA is `1 - S^2`.

use hashbrown::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::combinations::{
    combination_count, mask_members, subsets_by_level, CartesianProduct, MAX_LEVELS,
};
use super::{apply_bounds, base_data_set, VersionVocabulary};
use crate::antigen::{AntigenExpander, UnacceptableAntigens};
use crate::config::ConfigStore;
use crate::error::{AggregationError, CpraError, Result};
use crate::types::*;

/// Per-ethnicity frequency vector; unused trailing slots stay zero
pub type EthnicFrequencies = [f64; ETHNICITY_COUNT];

/// Everything one haplotype version needs at calculation time
#[derive(Debug)]
struct HaplotypeVersion {
    vocabulary: VersionVocabulary,
    ethnicities: Vec<String>,
    weights: Vec<f64>,
    frequencies: HashMap<String, EthnicFrequencies>,
}

impl HaplotypeVersion {
    fn load(store: &ConfigStore, version: &str) -> Result<Self> {
        let vocabulary = VersionVocabulary::load(store, version)?;

        let loci = &vocabulary.alleles_with_frequencies;
        if loci.is_empty() {
            return Err(CpraError::configuration(format!(
                "{}:{} not specified; this is a required value for haplotype versions",
                KEY_ALLELES_WITH_FREQUENCIES, version
            )));
        }
        if loci.len() > MAX_LEVELS {
            return Err(CpraError::configuration(format!(
                "{}:{} lists {} loci; at most {} are supported",
                KEY_ALLELES_WITH_FREQUENCIES,
                version,
                loci.len(),
                MAX_LEVELS
            )));
        }
        if let Some(unknown) = loci
            .entries()
            .iter()
            .find(|locus| !vocabulary.alleles.contains(locus))
        {
            return Err(CpraError::configuration(format!(
                "frequency locus '{}' is not listed in {}:{}",
                unknown, KEY_ALLELES, version
            )));
        }

        let ethnicities = split_list(required(store, KEY_ETHNICITIES, version)?);
        check_ethnicity_count(KEY_ETHNICITIES, version, ethnicities.len())?;

        let weights = split_list(required(store, KEY_ETHNIC_FREQUENCIES, version)?)
            .iter()
            .map(|w| parse_frequency(w, KEY_ETHNIC_FREQUENCIES, version))
            .collect::<Result<Vec<f64>>>()?;
        check_ethnicity_count(KEY_ETHNIC_FREQUENCIES, version, weights.len())?;
        if weights.len() != ethnicities.len() {
            warn!(
                "version '{}' lists {} ethnicities but {} weights",
                version,
                ethnicities.len(),
                weights.len()
            );
        }

        let prefix = [KEY_HAPLOTYPE_FREQUENCIES, version, ""].join(KEY_DELIMITER);
        let mut frequencies = HashMap::new();
        for key in store.keys(&format!("{}*", prefix))? {
            let values = split_list(store.get(&key).unwrap_or_default());
            if values.len() > ETHNICITY_COUNT {
                return Err(CpraError::configuration(format!(
                    "{} lists {} frequencies; at most {} ethnicities are supported",
                    key,
                    values.len(),
                    ETHNICITY_COUNT
                )));
            }

            let mut parsed = [0.0; ETHNICITY_COUNT];
            for (slot, value) in parsed.iter_mut().zip(&values) {
                *slot = parse_frequency(value, &key, version)?;
            }
            frequencies.insert(key[prefix.len()..].to_string(), parsed);
        }

        Ok(Self {
            vocabulary,
            ethnicities,
            weights,
            frequencies,
        })
    }

    /// Frequencies summed per level: entry `k` holds the S(k+1) sums
    fn level_frequencies(
        &self,
        antigens: &UnacceptableAntigens,
        max_combinations: usize,
        result: &mut CpraResult,
    ) -> Result<Vec<EthnicFrequencies>> {
        // loci in configured order that carry at least one antigen
        let in_use: Vec<Vec<&str>> = self
            .vocabulary
            .alleles_with_frequencies
            .entries()
            .iter()
            .filter_map(|locus| antigens.for_locus(locus))
            .map(|set| set.iter().map(String::as_str).collect())
            .collect();

        let sizes: Vec<usize> = in_use.iter().map(Vec::len).collect();
        match combination_count(&sizes) {
            Some(count) if count <= max_combinations => {
                debug!("{} loci in use, {} haplotype lookups", in_use.len(), count)
            }
            count => {
                return Err(CpraError::ResourceExhausted {
                    combinations: count.unwrap_or(usize::MAX),
                    limit: max_combinations,
                })
            }
        }

        let mut levels = vec![[0.0; ETHNICITY_COUNT]; MAX_LEVELS];
        for (level, masks) in subsets_by_level(in_use.len())?.iter().enumerate() {
            for &mask in masks {
                let lists: Vec<&[&str]> = mask_members(mask).map(|i| in_use[i].as_slice()).collect();

                for combination in CartesianProduct::new(lists) {
                    let key = combination
                        .into_iter()
                        .copied()
                        .collect::<Vec<&str>>()
                        .join(SUB_DELIMITER);

                    match self.frequencies.get(&key) {
                        Some(values) => {
                            for (sum, value) in levels[level].iter_mut().zip(values) {
                                *sum += value;
                            }
                        }
                        None if level == 0 => {
                            result.add_warning(format!(
                                "No S1 haplotype frequencies found for HLA-{}",
                                key
                            ));
                        }
                        None => {}
                    }
                }
            }
        }

        levels.truncate(in_use.len());
        Ok(levels)
    }

    /// Level-1 record count per frequency-bearing locus
    fn single_locus_counts(&self) -> Vec<(String, usize)> {
        self.vocabulary
            .alleles_with_frequencies
            .entries()
            .iter()
            .map(|locus| {
                let count = self
                    .frequencies
                    .keys()
                    .filter(|key| !key.contains(SUB_DELIMITER))
                    .filter_map(|key| self.vocabulary.alleles.parse(key))
                    .filter(|token| &token.locus == locus)
                    .count();
                (locus.clone(), count)
            })
            .collect()
    }
}

/// Alternating sum `S = 1 - L1 + L2 - L3 + ...` per ethnicity, then `1 - S^2`
pub fn ethnic_cpra(levels: &[EthnicFrequencies]) -> std::result::Result<EthnicFrequencies, AggregationError> {
    if levels.len() > MAX_LEVELS {
        return Err(AggregationError::LevelOutOfRange {
            level: levels.len(),
            max: MAX_LEVELS,
        });
    }

    let mut cpra = [0.0; ETHNICITY_COUNT];
    for (ethnicity, slot) in cpra.iter_mut().enumerate() {
        let s = levels
            .iter()
            .enumerate()
            .fold(1.0, |s, (level, sums)| {
                if level % 2 == 0 {
                    s - sums[ethnicity]
                } else {
                    s + sums[ethnicity]
                }
            });
        if !s.is_finite() {
            return Err(AggregationError::NonFinite {
                stage: "haplotype S",
                value: s,
            });
        }
        *slot = 1.0 - s * s;
    }

    Ok(cpra)
}

/// cPRA from ethnicity-stratified haplotype frequencies
pub struct HaplotypeCalculator {
    store: Arc<ConfigStore>,
    max_combinations: usize,
    versions: HashMap<String, HaplotypeVersion>,
}

impl HaplotypeCalculator {
    pub fn new(store: Arc<ConfigStore>, max_combinations: usize) -> Self {
        Self {
            store,
            max_combinations,
            versions: HashMap::new(),
        }
    }

    pub fn initialize_version(&mut self, version: &str) -> Result<()> {
        if self.versions.contains_key(version) {
            return Ok(());
        }

        let data = HaplotypeVersion::load(&self.store, version)?;
        info!(
            "Loaded {} haplotype records over loci {:?} for version '{}'",
            data.frequencies.len(),
            data.vocabulary.alleles_with_frequencies.entries(),
            version
        );
        self.versions.insert(version.to_string(), data);
        Ok(())
    }

    pub fn frequency_record_count(&self, version: &str) -> Option<usize> {
        self.versions.get(version).map(|data| data.frequencies.len())
    }

    pub fn calculate(&self, request: &CpraRequest) -> Result<CpraResult> {
        let data = self.versions.get(&request.version).ok_or_else(|| {
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

        let expansion = AntigenExpander::new(&self.store, &request.version, &data.vocabulary.alleles)
            .expand(&antibodies)?;
        result.warnings.extend(expansion.warnings);
        result.unacceptable_antigens = expansion.antigens.to_delimited();

        let levels = data.level_frequencies(&expansion.antigens, self.max_combinations, &mut result)?;
        let ethnic = ethnic_cpra(&levels)?;

        let cpra: f64 = data
            .weights
            .iter()
            .zip(ethnic.iter())
            .map(|(weight, cpra)| weight * cpra)
            .sum();
        if !cpra.is_finite() {
            return Err(AggregationError::NonFinite {
                stage: "haplotype cPRA",
                value: cpra,
            }
            .into());
        }

        result.ethnic_cpra = data
            .ethnicities
            .iter()
            .zip(ethnic.iter())
            .map(|(ethnicity, &cpra)| EthnicCpra {
                ethnicity: ethnicity.clone(),
                cpra,
            })
            .collect();
        debug!("ethnic cPRA {:?}, weighted {}", result.ethnic_cpra, cpra);

        result.cpra = apply_bounds(cpra, &mut result);
        Ok(result)
    }

    pub fn self_check(&self, version: &str) -> CpraDataSet {
        let mut data_set = base_data_set(&self.store, version, CalculatorType::Haplotype);

        let data = match self.versions.get(version) {
            Some(data) => data,
            None => {
                data_set
                    .warnings
                    .push(format!("ERROR: version {} is not initialized", version));
                return data_set;
            }
        };

        data_set.frequency_records = data.frequencies.len();
        for (locus, count) in data.single_locus_counts() {
            if count == 0 {
                data_set.warnings.push(format!(
                    "ERROR: no S1 {} records for locus {} in {}",
                    KEY_HAPLOTYPE_FREQUENCIES, locus, version
                ));
            }
        }

        data_set
    }
}

fn required<'a>(store: &'a ConfigStore, key: &str, version: &str) -> Result<&'a str> {
    store.get2(key, version).ok_or_else(|| {
        CpraError::configuration(format!(
            "{}:{} not specified; this is a required value",
            key, version
        ))
    })
}

fn check_ethnicity_count(key: &str, version: &str, count: usize) -> Result<()> {
    if count == 0 || count > ETHNICITY_COUNT {
        return Err(CpraError::configuration(format!(
            "{}:{} lists {} entries; expected 1 to {}",
            key, version, count, ETHNICITY_COUNT
        )));
    }
    Ok(())
}

/// Source tables carry single-precision values
fn parse_frequency(value: &str, key: &str, version: &str) -> Result<f64> {
    match value.trim().parse::<f32>() {
        Ok(parsed) if parsed.is_finite() => Ok(f64::from(parsed)),
        _ => Err(CpraError::configuration(format!(
            "unparsable frequency '{}' in {} ({})",
            value, key, version
        ))),
    }
}
