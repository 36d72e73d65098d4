use flate2::read::GzDecoder;
use regex::Regex;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};
use walkdir::WalkDir;

use super::ConfigStore;
use crate::error::{CpraError, Result};

/// Resolves a configuration source pattern to CSV resources and ingests their rows
pub struct ConfigLoader {
    recursive: bool,
}

impl ConfigLoader {
    pub fn new(recursive: bool) -> Self {
        Self { recursive }
    }

    /// Load all resources matching `source_pattern` into a fresh store.
    ///
    /// The pattern may name a file, a directory (every `.csv`/`.csv.gz` inside it),
    /// or a file-name glob such as `data/*_freq.csv`. Files are read in sorted
    /// order; a later file overrides an earlier one for the same key.
    pub fn load(&self, source_pattern: &str) -> Result<ConfigStore> {
        let files = self.discover(source_pattern)?;
        if files.is_empty() {
            return Err(CpraError::configuration(format!(
                "no configuration resources match '{}'",
                source_pattern
            )));
        }

        let mut store = ConfigStore::new();
        for file in &files {
            self.load_file(file, &mut store)?;
        }

        info!(
            "Loaded {} configuration entries from {} resource(s)",
            store.len(),
            files.len()
        );
        Ok(store)
    }

    /// Resolve a source pattern to a sorted list of files
    pub fn discover(&self, source_pattern: &str) -> Result<Vec<PathBuf>> {
        let path = Path::new(source_pattern);

        let mut files = if path.is_file() {
            vec![path.to_path_buf()]
        } else if path.is_dir() {
            self.discover_in_directory(path, None)?
        } else {
            let file_glob = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            if !file_glob.contains('*') {
                return Ok(Vec::new());
            }

            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            if !dir.is_dir() {
                return Ok(Vec::new());
            }

            let name_pattern = file_glob_regex(&file_glob)?;
            self.discover_in_directory(dir, Some(&name_pattern))?
        };

        files.sort();
        debug!("Resolved '{}' to {:?}", source_pattern, files);
        Ok(files)
    }

    fn discover_in_directory(&self, dir: &Path, name_pattern: Option<&Regex>) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let accept = |path: &Path| -> bool {
            let name = match path.file_name() {
                Some(name) => name.to_string_lossy(),
                None => return false,
            };
            match name_pattern {
                Some(pattern) => pattern.is_match(&name),
                None => is_config_file(path),
            }
        };

        if self.recursive {
            for entry in WalkDir::new(dir)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if path.is_file() && accept(path) {
                    files.push(path.to_path_buf());
                }
            }
        } else {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_file() && accept(&path) {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }

    /// Read `key,value,comment` rows from one resource into `store`
    pub fn load_file(&self, path: &Path, store: &mut ConfigStore) -> Result<()> {
        info!("Processing '{}'", path.display());

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(open_file(path)?);

        let mut rows = 0usize;
        let mut loaded = 0usize;
        for record in reader.records() {
            let record = record?;
            rows += 1;

            let key = record.get(0).unwrap_or_default();
            let value = record.get(1).unwrap_or_default();
            trace!("{}:{}", key, value);
            if store.insert(key, value) {
                loaded += 1;
            }
        }

        debug!(
            "'{}': {} entries loaded out of {} rows",
            path.display(),
            loaded,
            rows
        );
        Ok(())
    }
}

fn is_config_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".csv") || name.ends_with(".csv.gz")
}

fn file_glob_regex(file_glob: &str) -> Result<Regex> {
    let body = file_glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body)).map_err(|e| {
        CpraError::configuration(format!("invalid source pattern '{}': {}", file_glob, e))
    })
}

fn open_file(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| {
        CpraError::configuration(format!(
            "failed to open resource '{}': {}",
            path.display(),
            e
        ))
    })?;

    let is_gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    if is_gzip {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}
