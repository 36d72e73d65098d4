//! Version-dispatching cPRA service.
//!
//! The service loads its configuration on first use, builds one calculator per
//! calculator type with every configured version initialized, and publishes the
//! result as an immutable engine snapshot. Concurrent first callers serialize on the
//! write lock; later calls only take the read lock long enough to clone an `Arc`.

use hashbrown::HashMap;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::calculator::Calculator;
use crate::config::{ConfigLoader, ConfigStore};
use crate::error::{CpraError, Result};
use crate::settings::DEFAULT_MAX_COMBINATIONS;
use crate::types::*;

/// Where the service reads its configuration from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File, directory or file-name glob of CSV resources
    Pattern(String),
    /// Pre-built store
    Store(Arc<ConfigStore>),
}

/// Fully initialized calculators for every configured version
struct Engine {
    versions: Vec<String>,
    version_types: HashMap<String, CalculatorType>,
    calculators: HashMap<CalculatorType, Calculator>,
    store: Arc<ConfigStore>,
}

impl Engine {
    fn build(store: Arc<ConfigStore>, max_combinations: usize) -> Result<Self> {
        let versions = store
            .get(KEY_VERSIONS)
            .map(split_list)
            .unwrap_or_default();
        if versions.is_empty() {
            return Err(CpraError::configuration(format!(
                "{} not specified; this is a required value",
                KEY_VERSIONS
            )));
        }

        let mut version_types = HashMap::new();
        let mut calculators: HashMap<CalculatorType, Calculator> = HashMap::new();

        for version in &versions {
            let tag = store.get2(KEY_CALCULATOR_TYPE, version).ok_or_else(|| {
                CpraError::configuration(format!(
                    "{}:{} not specified; this is a required value",
                    KEY_CALCULATOR_TYPE, version
                ))
            })?;
            let kind = tag
                .parse::<CalculatorType>()
                .map_err(|calculator| CpraError::InvalidCalculatorType {
                    calculator,
                    version: version.clone(),
                })?;

            info!("Initializing {} calculator for version '{}'", kind, version);
            calculators
                .entry(kind)
                .or_insert_with(|| Calculator::new(kind, Arc::clone(&store), max_combinations))
                .initialize_version(version)?;
            version_types.insert(version.clone(), kind);
        }

        Ok(Self {
            versions,
            version_types,
            calculators,
            store,
        })
    }

    /// `current` (any case) is the first configured version
    fn resolve(&self, requested: &str) -> Result<&str> {
        let requested = requested.trim();
        if requested.eq_ignore_ascii_case(CURRENT_VERSION) {
            return Ok(self.versions[0].as_str());
        }
        self.versions
            .iter()
            .find(|v| v.as_str() == requested)
            .map(String::as_str)
            .ok_or_else(|| CpraError::InvalidVersion {
                requested: requested.to_string(),
                available: self.versions.clone(),
            })
    }

    fn calculator(&self, version: &str) -> Result<&Calculator> {
        self.version_types
            .get(version)
            .and_then(|kind| self.calculators.get(kind))
            .ok_or_else(|| {
                CpraError::configuration(format!("no calculator initialized for version '{}'", version))
            })
    }
}

enum ServiceState {
    Uninitialized,
    Ready(Arc<Engine>),
}

/// Entry point for scoring requests against configured versions
pub struct CpraService {
    source: ConfigSource,
    max_combinations: usize,
    recursive: bool,
    state: RwLock<ServiceState>,
}

impl CpraService {
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            max_combinations: DEFAULT_MAX_COMBINATIONS,
            recursive: false,
            state: RwLock::new(ServiceState::Uninitialized),
        }
    }

    pub fn from_pattern(pattern: impl Into<String>) -> Self {
        Self::new(ConfigSource::Pattern(pattern.into()))
    }

    pub fn from_store(store: ConfigStore) -> Self {
        Self::new(ConfigSource::Store(Arc::new(store)))
    }

    pub fn with_max_combinations(mut self, max_combinations: usize) -> Self {
        self.max_combinations = max_combinations;
        self
    }

    /// Search subdirectories of a directory or glob source
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Load configuration and build every calculator now instead of on first use
    pub fn initialize(&self) -> Result<()> {
        self.engine().map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.read(), ServiceState::Ready(_))
    }

    fn engine(&self) -> Result<Arc<Engine>> {
        if let ServiceState::Ready(engine) = &*self.state.read() {
            return Ok(Arc::clone(engine));
        }

        let mut state = self.state.write();
        if let ServiceState::Ready(engine) = &*state {
            return Ok(Arc::clone(engine));
        }

        info!("Initializing cPRA service");
        let store = match &self.source {
            ConfigSource::Pattern(pattern) => Arc::new(ConfigLoader::new(self.recursive).load(pattern)?),
            ConfigSource::Store(store) => Arc::clone(store),
        };
        let engine = Arc::new(Engine::build(store, self.max_combinations)?);
        info!(
            "cPRA service ready with versions {:?} (current: {})",
            engine.versions, engine.versions[0]
        );

        *state = ServiceState::Ready(Arc::clone(&engine));
        Ok(engine)
    }

    /// Name of the version `current` resolves to
    pub fn current_version(&self) -> Result<String> {
        Ok(self.engine()?.versions[0].clone())
    }

    /// Configured versions in order; the first is the default
    pub fn versions(&self) -> Result<Vec<VersionInfo>> {
        let engine = self.engine()?;
        Ok(engine
            .versions
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                engine.version_types.get(name).map(|&kind| VersionInfo {
                    name: name.clone(),
                    is_default: i == 0,
                    description: engine
                        .store
                        .get2(KEY_CALCULATOR_DESCRIPTION, name)
                        .map(str::to_string),
                    calculator_type: kind,
                })
            })
            .collect())
    }

    #[instrument(skip(self), fields(version = %request.version))]
    pub fn calculate(&self, request: &CpraRequest) -> Result<CpraResult> {
        request.validate()?;
        let engine = self.engine()?;

        let version = engine.resolve(&request.version)?;
        let resolved = CpraRequest {
            version: version.to_string(),
            antibodies: request.antibodies.clone(),
        };
        let calculator = engine.calculator(version)?;
        debug!("dispatching to {} calculator", calculator.kind());

        calculator.calculate(&resolved)
    }

    /// Score independent requests in parallel; results keep request order
    pub fn calculate_many(&self, requests: &[CpraRequest]) -> Vec<Result<CpraResult>> {
        if let Err(e) = self.initialize() {
            let message = e.to_string();
            return requests
                .iter()
                .map(|_| Err(CpraError::configuration(message.clone())))
                .collect();
        }

        requests
            .par_iter()
            .map(|request| self.calculate(request))
            .collect()
    }

    /// Configuration report for every version
    pub fn self_check(&self) -> Result<Vec<CpraDataSet>> {
        let engine = self.engine()?;
        engine
            .versions
            .iter()
            .map(|version| {
                engine
                    .calculator(version)
                    .map(|calculator| calculator.self_check(version))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<(&'static str, &'static str)> {
        vec![
            ("hlaCpraVersions", "v_diplo;v_haplo"),
            ("hlaCpraCalculatorType:v_diplo", "Diplotype"),
            ("hlaCpraCalculatorDescription:v_diplo", "diplotype test set"),
            ("hlaAlleles:v_diplo", "A;B"),
            ("hlaEthnicities:v_diplo", "Default"),
            ("hlaEthnicFrequencies:v_diplo", "1.0"),
            ("hlaDiplotypeFrequencies:v_diplo:A1;A2;B7;B8", "0.25"),
            ("hlaCpraCalculatorType:v_haplo", "haplotype"),
            ("hlaAlleles:v_haplo", "A;B"),
            ("hlaAllelesWithFrequencies:v_haplo", "A;B"),
            ("hlaEthnicities:v_haplo", "Default"),
            ("hlaEthnicFrequencies:v_haplo", "1.0"),
            ("hlaHaplotypeFrequencies:v_haplo:A1", "0.5"),
        ]
    }

    fn service(rows: Vec<(&str, &str)>) -> CpraService {
        CpraService::from_store(rows.into_iter().collect())
    }

    #[test]
    fn test_lazy_initialization() {
        let service = service(rows());
        assert!(!service.is_ready());

        service
            .calculate(&CpraRequest::with_antibodies("v_diplo", ["A1"]))
            .unwrap();
        assert!(service.is_ready());
    }

    #[test]
    fn test_current_resolves_to_first_version() {
        let service = service(rows());
        let result = service
            .calculate(&CpraRequest::with_antibodies("CURRENT", ["A1"]))
            .unwrap();
        assert_eq!(result.version, "v_diplo");
        assert!((result.cpra - 0.25).abs() < 1e-12);
        assert_eq!(service.current_version().unwrap(), "v_diplo");
    }

    #[test]
    fn test_dispatch_by_calculator_type() {
        let service = service(rows());
        let result = service
            .calculate(&CpraRequest::with_antibodies("v_haplo", ["A1"]))
            .unwrap();
        // S = 0.5, cPRA = 1 - 0.25
        assert!((result.cpra - 0.75).abs() < 1e-9);
        assert_eq!(result.ethnic_cpra.len(), 1);
    }

    #[test]
    fn test_unknown_version() {
        let service = service(rows());
        let err = service
            .calculate(&CpraRequest::with_antibodies("v_other", ["A1"]))
            .unwrap_err();
        match err {
            CpraError::InvalidVersion { requested, available } => {
                assert_eq!(requested, "v_other");
                assert_eq!(available, vec!["v_diplo", "v_haplo"]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_malformed_antibody_rejected_before_lookup() {
        let service = service(rows());
        let err = service
            .calculate(&CpraRequest::with_antibodies("current", ["A 1"]))
            .unwrap_err();
        assert!(matches!(err, CpraError::InvalidAntibody { .. }));
        assert!(!service.is_ready());
    }

    #[test]
    fn test_unrecognized_calculator_type() {
        let mut rows = rows();
        rows.retain(|(key, _)| *key != "hlaCpraCalculatorType:v_haplo");
        rows.push(("hlaCpraCalculatorType:v_haplo", "triplotype"));

        let err = service(rows).initialize().unwrap_err();
        assert!(matches!(err, CpraError::InvalidCalculatorType { .. }));
    }

    #[test]
    fn test_missing_calculator_type() {
        let mut rows = rows();
        rows.retain(|(key, _)| *key != "hlaCpraCalculatorType:v_haplo");

        match service(rows).initialize() {
            Err(CpraError::Configuration(message)) => {
                assert!(message.contains("hlaCpraCalculatorType:v_haplo"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_missing_ethnicities_fail_initialization() {
        let mut rows = rows();
        rows.retain(|(key, _)| *key != "hlaEthnicities:v_haplo");

        let service = service(rows);
        assert!(matches!(service.initialize(), Err(CpraError::Configuration(_))));
        assert!(!service.is_ready());
    }

    #[test]
    fn test_missing_version_list() {
        let mut rows = rows();
        rows.retain(|(key, _)| *key != "hlaCpraVersions");
        assert!(matches!(
            service(rows).initialize(),
            Err(CpraError::Configuration(_))
        ));
    }

    #[test]
    fn test_versions_listing() {
        let versions = service(rows()).versions().unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_default);
        assert_eq!(versions[0].description.as_deref(), Some("diplotype test set"));
        assert_eq!(versions[1].calculator_type, CalculatorType::Haplotype);
        assert!(!versions[1].is_default);
    }

    #[test]
    fn test_calculate_many_keeps_order() {
        let service = service(rows());
        let requests = vec![
            CpraRequest::with_antibodies("v_diplo", ["A1"]),
            CpraRequest::with_antibodies("v_diplo", ["X1"]),
            CpraRequest::with_antibodies("v_haplo", ["A1"]),
        ];

        let results = service.calculate_many(&requests);
        assert_eq!(results.len(), 3);
        assert!((results[0].as_ref().unwrap().cpra - 0.25).abs() < 1e-12);
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().version, "v_haplo");
    }

    #[test]
    fn test_self_check_covers_every_version() {
        let data_sets = service(rows()).self_check().unwrap();
        assert_eq!(data_sets.len(), 2);
        assert_eq!(data_sets[0].frequency_records, 1);
        assert_eq!(data_sets[1].calculator_type, Some(CalculatorType::Haplotype));
    }
}
