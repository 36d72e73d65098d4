use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CpraError, Result};

/// Separator between the parts of a composite configuration key
pub const KEY_DELIMITER: &str = ":";
/// Separator between list entries inside a configuration value
pub const SUB_DELIMITER: &str = ";";

/// Version token that resolves to the first configured version
pub const CURRENT_VERSION: &str = "current";

/// Number of ethnic populations a haplotype frequency record reports against
pub const ETHNICITY_COUNT: usize = 4;

pub const KEY_VERSIONS: &str = "hlaCpraVersions";
pub const KEY_CALCULATOR_TYPE: &str = "hlaCpraCalculatorType";
pub const KEY_CALCULATOR_DESCRIPTION: &str = "hlaCpraCalculatorDescription";
pub const KEY_CALCULATOR_VERSION: &str = "hlaCpraCalculatorVersion";
pub const KEY_ALLELES: &str = "hlaAlleles";
pub const KEY_ALLELES_WITH_FREQUENCIES: &str = "hlaAllelesWithFrequencies";
pub const KEY_ETHNICITIES: &str = "hlaEthnicities";
pub const KEY_ETHNIC_FREQUENCIES: &str = "hlaEthnicFrequencies";
pub const KEY_ANTIGEN_EQUIVALENCES: &str = "hlaUnacceptableAntigenEquivalences";
pub const KEY_DIPLOTYPE_FREQUENCIES: &str = "hlaDiplotypeFrequencies";
pub const KEY_HAPLOTYPE_FREQUENCIES: &str = "hlaHaplotypeFrequencies";

lazy_static! {
    static ref ANTIBODY_PATTERN: Regex = Regex::new(r"^[A-Za-z]+[0-9\-*:]+$").unwrap();
}

/// Aggregation algorithm configured for a version
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CalculatorType {
    Diplotype,
    Haplotype,
}

impl CalculatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalculatorType::Diplotype => "diplotype",
            CalculatorType::Haplotype => "haplotype",
        }
    }
}

impl fmt::Display for CalculatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalculatorType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "diplotype" => Ok(CalculatorType::Diplotype),
            "haplotype" => Ok(CalculatorType::Haplotype),
            other => Err(other.to_string()),
        }
    }
}

/// A scoring request: dataset version plus the patient's antibodies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpraRequest {
    pub version: String,
    pub antibodies: Vec<String>,
}

impl CpraRequest {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            antibodies: Vec::new(),
        }
    }

    pub fn with_antibodies<I, S>(version: impl Into<String>, antibodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: version.into(),
            antibodies: antibodies.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a request from a `;`-separated antibody list, dropping blank entries
    pub fn from_delimited(version: impl Into<String>, antibody_list: &str) -> Self {
        let antibodies = antibody_list
            .split(SUB_DELIMITER)
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            version: version.into(),
            antibodies,
        }
    }

    /// Boundary validation: non-empty version, antibodies shaped like `A9` or `DQB10201`
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(CpraError::InvalidVersion {
                requested: self.version.clone(),
                available: Vec::new(),
            });
        }

        for antibody in &self.antibodies {
            if !ANTIBODY_PATTERN.is_match(antibody) {
                return Err(CpraError::invalid_antibody(
                    antibody,
                    "expected letters followed by digits, '-', '*' or ':'",
                ));
            }
        }

        Ok(())
    }

    /// Antibodies as stored in the configuration tables (upper case)
    pub fn normalized_antibodies(&self) -> Vec<String> {
        self.antibodies.iter().map(|a| a.to_uppercase()).collect()
    }
}

/// cPRA for a single ethnic population
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EthnicCpra {
    pub ethnicity: String,
    pub cpra: f64,
}

/// Result of scoring one request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpraResult {
    pub version: String,
    pub antibodies: Vec<String>,
    /// Sorted, `;`-joined unacceptable antigens
    pub unacceptable_antigens: String,
    pub cpra: f64,
    pub ethnic_cpra: Vec<EthnicCpra>,
    pub warnings: Vec<String>,
}

impl CpraResult {
    pub fn new(version: impl Into<String>, antibodies: Vec<String>) -> Self {
        Self {
            version: version.into(),
            antibodies,
            unacceptable_antigens: String::new(),
            cpra: 0.0,
            ethnic_cpra: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Configuration introspection for one version (self-check)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CpraDataSet {
    pub version: String,
    pub description: Option<String>,
    pub calculator: Option<String>,
    pub calculator_type: Option<CalculatorType>,
    pub ethnicities: Vec<String>,
    pub ethnic_frequencies: Vec<String>,
    pub hla_alleles: Vec<String>,
    pub hla_alleles_with_frequencies: Vec<String>,
    pub frequency_records: usize,
    pub warnings: Vec<String>,
}

/// Entry in the version listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionInfo {
    pub name: String,
    pub is_default: bool,
    pub description: Option<String>,
    pub calculator_type: CalculatorType,
}

/// Split a `;`-separated configuration value, ignoring blank entries
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(SUB_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculator_type_parsing() {
        assert_eq!(
            "Haplotype".parse::<CalculatorType>(),
            Ok(CalculatorType::Haplotype)
        );
        assert_eq!(
            " diplotype ".parse::<CalculatorType>(),
            Ok(CalculatorType::Diplotype)
        );
        assert!("triplotype".parse::<CalculatorType>().is_err());
    }

    #[test]
    fn test_request_from_delimited_drops_blanks() {
        let request = CpraRequest::from_delimited("optn_2015", "A9; ;B57;");
        assert_eq!(request.antibodies, vec!["A9", "B57"]);
    }

    #[test]
    fn test_request_validation() {
        assert!(CpraRequest::with_antibodies("v1", ["A9", "dqb10201", "A*02:01"])
            .validate()
            .is_ok());
        assert!(matches!(
            CpraRequest::with_antibodies("v1", ["9A"]).validate(),
            Err(CpraError::InvalidAntibody { .. })
        ));
        assert!(matches!(
            CpraRequest::with_antibodies("v1", ["DR"]).validate(),
            Err(CpraError::InvalidAntibody { .. })
        ));
        assert!(matches!(
            CpraRequest::new("  ").validate(),
            Err(CpraError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("A;B; DR ;;"), vec!["A", "B", "DR"]);
        assert!(split_list("").is_empty());
    }
}
