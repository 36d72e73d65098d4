use thiserror::Error;

/// Failures raised while scoring a request or building the per-version indices
#[derive(Debug, Error)]
pub enum CpraError {
    #[error("Invalid configuration; {0}")]
    Configuration(String),

    #[error("Invalid version '{requested}' for cPRA calculator; version can be 'current' or {available:?}")]
    InvalidVersion {
        requested: String,
        available: Vec<String>,
    },

    #[error("Invalid calculator '{calculator}' for cPRA version '{version}'; calculator can be diplotype, haplotype")]
    InvalidCalculatorType { calculator: String, version: String },

    #[error("Invalid antibody '{antibody}': {reason}")]
    InvalidAntibody { antibody: String, reason: String },

    #[error("Unexpected error calculating cPRA")]
    Computation(#[from] AggregationError),

    #[error("Antibody list expands to {combinations} haplotype combinations (limit {limit})")]
    ResourceExhausted { combinations: usize, limit: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Numeric failures inside frequency aggregation
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("non-finite {stage} value {value}")]
    NonFinite { stage: &'static str, value: f64 },

    #[error("frequency level {level} exceeds the supported maximum of {max}")]
    LevelOutOfRange { level: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, CpraError>;

impl CpraError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        CpraError::Configuration(message.into())
    }

    pub(crate) fn invalid_antibody(antibody: &str, reason: impl Into<String>) -> Self {
        CpraError::InvalidAntibody {
            antibody: antibody.to_string(),
            reason: reason.into(),
        }
    }
}
