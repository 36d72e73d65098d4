use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CpraError, Result};

/// Default ceiling on haplotype lookups per request
pub const DEFAULT_MAX_COMBINATIONS: usize = 1_000_000;

/// Runtime settings, read from an optional TOML file.
///
/// ```toml
/// config_source = "data/cpra_*.csv"
/// max_combinations = 250000
/// recursive = false
/// threads = 4
/// output_dir = "reports"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// File, directory or file-name glob of the configuration CSV resources
    pub config_source: Option<String>,
    pub max_combinations: usize,
    /// Descend into subdirectories when `config_source` names a directory or glob
    pub recursive: bool,
    /// Worker threads for batch scoring (0 = all cores)
    pub threads: usize,
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_source: None,
            max_combinations: DEFAULT_MAX_COMBINATIONS,
            recursive: false,
            threads: 0,
            output_dir: PathBuf::from("cpra_output"),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CpraError::configuration(format!(
                "failed to read settings '{}': {}",
                path.display(),
                e
            ))
        })?;
        let settings: Settings = toml::from_str(&content).map_err(|e| {
            CpraError::configuration(format!("invalid settings '{}': {}", path.display(), e))
        })?;
        settings.validate()?;

        debug!("Loaded settings from '{}': {:?}", path.display(), settings);
        Ok(settings)
    }

    /// Settings from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line values over the file settings
    pub fn with_overrides(
        mut self,
        config_source: Option<String>,
        max_combinations: Option<usize>,
        recursive: bool,
    ) -> Result<Self> {
        if config_source.is_some() {
            self.config_source = config_source;
        }
        if let Some(max_combinations) = max_combinations {
            self.max_combinations = max_combinations;
        }
        self.recursive |= recursive;

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_combinations == 0 {
            return Err(CpraError::configuration("max_combinations must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("cpra.toml");
        fs::write(&path, "config_source = \"data/*.csv\"\nthreads = 2\n")?;

        let settings = Settings::load(&path)?;
        assert_eq!(settings.config_source.as_deref(), Some("data/*.csv"));
        assert_eq!(settings.threads, 2);
        assert_eq!(settings.max_combinations, DEFAULT_MAX_COMBINATIONS);
        assert_eq!(settings.output_dir, PathBuf::from("cpra_output"));
        assert!(!settings.recursive);
        Ok(())
    }

    #[test]
    fn test_overrides_are_validated() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("cpra.toml");
        fs::write(&path, "config_source = \"data\"\nmax_combinations = 500\n")?;

        let settings = Settings::load(&path)?.with_overrides(None, None, true)?;
        assert_eq!(settings.config_source.as_deref(), Some("data"));
        assert_eq!(settings.max_combinations, 500);
        assert!(settings.recursive);

        let settings = Settings::load(&path)?.with_overrides(Some("other/*.csv".to_string()), Some(20), false)?;
        assert_eq!(settings.config_source.as_deref(), Some("other/*.csv"));
        assert_eq!(settings.max_combinations, 20);

        let zero = Settings::default().with_overrides(None, Some(0), false);
        assert!(matches!(zero, Err(CpraError::Configuration(_))));
        Ok(())
    }

    #[test]
    fn test_invalid_settings() -> Result<()> {
        let temp_dir = TempDir::new()?;

        let path = temp_dir.path().join("zero.toml");
        fs::write(&path, "max_combinations = 0\n")?;
        assert!(matches!(Settings::load(&path), Err(CpraError::Configuration(_))));

        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "threads = \"many\"\n")?;
        assert!(matches!(Settings::load(&path), Err(CpraError::Configuration(_))));

        assert!(Settings::load(&temp_dir.path().join("absent.toml")).is_err());
        Ok(())
    }

    #[test]
    fn test_defaults_without_file() {
        assert_eq!(Settings::load_or_default(None).unwrap(), Settings::default());
    }
}
