//! cPRA aggregation algorithms.
//!
//! Each version is bound to one of two calculators. [`Calculator`] is the closed
//! set of them; the service keeps one instance per [`CalculatorType`] and
//! dispatches on the tag configured for the requested version.

pub mod combinations;
pub mod diplotype;
pub mod haplotype;

use std::sync::Arc;
use tracing::warn;

use crate::allele::AlleleVocabulary;
use crate::config::ConfigStore;
use crate::error::{CpraError, Result};
use crate::types::*;

pub use diplotype::{Diplotype, DiplotypeCalculator};
pub use haplotype::HaplotypeCalculator;

/// Upper edge of the floating-point slack clamped back to 1.0
pub const CLAMP_TOLERANCE: f64 = 1.0001;

/// Allele vocabularies of one version
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionVocabulary {
    /// Every locus an antibody may name
    pub alleles: AlleleVocabulary,
    /// Loci with frequency data, in aggregation order
    pub alleles_with_frequencies: AlleleVocabulary,
}

impl VersionVocabulary {
    pub fn load(store: &ConfigStore, version: &str) -> Result<Self> {
        let alleles = store.get2(KEY_ALLELES, version).ok_or_else(|| {
            CpraError::configuration(format!(
                "{}:{} not specified; this is a required value",
                KEY_ALLELES, version
            ))
        })?;
        let alleles = AlleleVocabulary::new(split_list(alleles));
        if alleles.is_empty() {
            return Err(CpraError::configuration(format!(
                "{}:{} is empty",
                KEY_ALLELES, version
            )));
        }

        let alleles_with_frequencies = AlleleVocabulary::new(
            store
                .get2(KEY_ALLELES_WITH_FREQUENCIES, version)
                .map(split_list)
                .unwrap_or_default(),
        );

        Ok(Self {
            alleles,
            alleles_with_frequencies,
        })
    }
}

/// The two aggregation algorithms
pub enum Calculator {
    Diplotype(DiplotypeCalculator),
    Haplotype(HaplotypeCalculator),
}

impl Calculator {
    pub fn new(kind: CalculatorType, store: Arc<ConfigStore>, max_combinations: usize) -> Self {
        match kind {
            CalculatorType::Diplotype => Calculator::Diplotype(DiplotypeCalculator::new(store)),
            CalculatorType::Haplotype => {
                Calculator::Haplotype(HaplotypeCalculator::new(store, max_combinations))
            }
        }
    }

    pub fn kind(&self) -> CalculatorType {
        match self {
            Calculator::Diplotype(_) => CalculatorType::Diplotype,
            Calculator::Haplotype(_) => CalculatorType::Haplotype,
        }
    }

    pub fn initialize_version(&mut self, version: &str) -> Result<()> {
        match self {
            Calculator::Diplotype(c) => c.initialize_version(version),
            Calculator::Haplotype(c) => c.initialize_version(version),
        }
    }

    pub fn calculate(&self, request: &CpraRequest) -> Result<CpraResult> {
        match self {
            Calculator::Diplotype(c) => c.calculate(request),
            Calculator::Haplotype(c) => c.calculate(request),
        }
    }

    pub fn self_check(&self, version: &str) -> CpraDataSet {
        match self {
            Calculator::Diplotype(c) => c.self_check(version),
            Calculator::Haplotype(c) => c.self_check(version),
        }
    }
}

/// Shared policy for the final scalar: values in `(1.0, 1.0001]` are clamped to
/// 1.0, anything further outside `[0, 1]` is kept and flagged with a warning.
pub fn apply_bounds(cpra: f64, result: &mut CpraResult) -> f64 {
    if cpra > 1.0 && cpra <= CLAMP_TOLERANCE {
        1.0
    } else if cpra > 1.0 {
        warn!("cPRA {} above 1 for version '{}'", cpra, result.version);
        result.add_warning("CPRA is > 1 due to a computational or source data set issue.");
        cpra
    } else if cpra < 0.0 {
        warn!("cPRA {} below 0 for version '{}'", cpra, result.version);
        result.add_warning("CPRA is < 0 due to a computational or source data set issue.");
        cpra
    } else {
        cpra
    }
}

/// Self-check fields read straight from configuration
pub(crate) fn base_data_set(store: &ConfigStore, version: &str, kind: CalculatorType) -> CpraDataSet {
    let mut data_set = CpraDataSet {
        version: version.to_string(),
        description: store
            .get2(KEY_CALCULATOR_DESCRIPTION, version)
            .map(str::to_string),
        calculator: store.get2(KEY_CALCULATOR_VERSION, version).map(str::to_string),
        calculator_type: Some(kind),
        ethnicities: store
            .get2(KEY_ETHNICITIES, version)
            .map(split_list)
            .unwrap_or_default(),
        ..CpraDataSet::default()
    };

    match store.get2(KEY_ETHNIC_FREQUENCIES, version) {
        Some(list) => data_set.ethnic_frequencies = split_list(list),
        None => data_set
            .warnings
            .push(format!("ERROR: no {} for {}", KEY_ETHNIC_FREQUENCIES, version)),
    }

    match store.get2(KEY_ALLELES, version) {
        Some(list) => data_set.hla_alleles = split_list(list),
        None => data_set
            .warnings
            .push(format!("ERROR: no {} for {}", KEY_ALLELES, version)),
    }

    if let Some(list) = store.get2(KEY_ALLELES_WITH_FREQUENCIES, version) {
        data_set.hla_alleles_with_frequencies = split_list(list);
    }

    data_set
}
