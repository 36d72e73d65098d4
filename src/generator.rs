//! Diplotype frequency tables from donor typings.
//!
//! A typing file has one donor per row with `A1,A2,B1,B2` columns. Each donor
//! contributes the distinct `A<x>`/`B<y>` alleles it carries; donors with the same
//! allele set are counted together, and the frequency of a set is its count over
//! the number of donors. The result is written as a `<name>_freq.csv` resource and a
//! `<name>_meta.csv` resource that together configure a diplotype version.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{CpraError, Result};
use crate::types::*;

/// Typing columns and the locus prefix each one contributes
const TYPING_COLUMNS: [(&str, &str); 4] = [("A1", "A"), ("A2", "A"), ("B1", "B"), ("B2", "B")];

/// Donor counts per distinct allele set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrequencyTable {
    pub name: String,
    pub donors: usize,
    pub diplotypes: BTreeMap<BTreeSet<String>, usize>,
}

/// Paths of the resources written for one table
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFiles {
    pub frequencies: PathBuf,
    pub meta: PathBuf,
}

impl FrequencyTable {
    pub fn from_typing_file(path: &Path, name: &str) -> Result<Self> {
        let file = fs::File::open(path).map_err(|e| {
            CpraError::configuration(format!(
                "failed to open typing file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let table = Self::from_reader(file, name)?;

        info!(
            "Counted {} allele sets over {} donors from '{}'",
            table.diplotypes.len(),
            table.donors,
            path.display()
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R, name: &str) -> Result<Self> {
        check_table_name(name)?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let columns = TYPING_COLUMNS
            .iter()
            .map(|&(column, locus)| {
                headers
                    .iter()
                    .position(|header| header == column)
                    .map(|index| (index, locus))
                    .ok_or_else(|| {
                        CpraError::configuration(format!("typing file has no '{}' column", column))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut table = FrequencyTable {
            name: name.to_string(),
            ..Default::default()
        };
        for record in reader.records() {
            let record = record?;
            table.donors += 1;

            let alleles: BTreeSet<String> = columns
                .iter()
                .filter_map(|&(index, locus)| {
                    let typing = record.get(index).unwrap_or_default();
                    (!typing.is_empty()).then(|| format!("{}{}", locus, typing.to_uppercase()))
                })
                .collect();

            if alleles.is_empty() {
                warn!("donor {} has no A or B typing", table.donors);
                continue;
            }
            *table.diplotypes.entry(alleles).or_insert(0) += 1;
        }

        if table.donors == 0 {
            return Err(CpraError::configuration("typing file lists no donors"));
        }
        Ok(table)
    }

    /// Share of donors carrying exactly `alleles`
    pub fn frequency(&self, alleles: &BTreeSet<String>) -> f64 {
        match self.diplotypes.get(alleles) {
            Some(&count) if self.donors > 0 => count as f64 / self.donors as f64,
            _ => 0.0,
        }
    }

    /// Write `<name>_freq.csv` and `<name>_meta.csv` into `dir`
    pub fn write(&self, dir: &Path) -> Result<GeneratedFiles> {
        fs::create_dir_all(dir)?;
        let files = GeneratedFiles {
            frequencies: dir.join(format!("{}_freq.csv", self.name)),
            meta: dir.join(format!("{}_meta.csv", self.name)),
        };

        let mut writer = csv::Writer::from_path(&files.frequencies)?;
        writer.write_record(["key", "value", "comment"])?;
        for (alleles, count) in &self.diplotypes {
            let set = alleles.iter().map(String::as_str).collect::<Vec<_>>().join(SUB_DELIMITER);
            writer.write_record([
                [KEY_DIPLOTYPE_FREQUENCIES, self.name.as_str(), set.as_str()].join(KEY_DELIMITER),
                format!("{:.24}", self.frequency(alleles)),
                format!("{} of {} donors", count, self.donors),
            ])?;
        }
        writer.flush()?;

        let name = self.name.as_str();
        let key = |prefix: &str| [prefix, name].join(KEY_DELIMITER);
        let meta = [
            (key(KEY_CALCULATOR_TYPE), CalculatorType::Diplotype.to_string()),
            (
                key(KEY_CALCULATOR_DESCRIPTION),
                format!("Diplotype frequencies from {} donors", self.donors),
            ),
            (key(KEY_CALCULATOR_VERSION), "1.0".to_string()),
            (key(KEY_ALLELES), "A;B".to_string()),
            (key(KEY_ALLELES_WITH_FREQUENCIES), "A;B".to_string()),
            (key(KEY_ETHNICITIES), "Default".to_string()),
            (key(KEY_ETHNIC_FREQUENCIES), "1.00".to_string()),
        ];

        let mut writer = csv::Writer::from_path(&files.meta)?;
        writer.write_record(["key", "value", "comment"])?;
        for (key, value) in &meta {
            writer.write_record([key.as_str(), value.as_str(), ""])?;
        }
        writer.flush()?;

        debug!("Wrote {:?}", files);
        Ok(files)
    }
}

fn check_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CpraError::configuration(format!(
            "frequency table name '{}' may only use letters, digits, '_' and '-'",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use tempfile::TempDir;

    const TYPINGS: &str = "donor,A1,A2,B1,B2\n\
                           d1,1,2,7,8\n\
                           d2,2,1,8,7\n\
                           d3,1,1,7,\n\
                           d4,,,,\n";

    fn set(alleles: &[&str]) -> BTreeSet<String> {
        alleles.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_identical_allele_sets_are_counted_together() -> Result<()> {
        let table = FrequencyTable::from_reader(TYPINGS.as_bytes(), "local")?;

        assert_eq!(table.donors, 4);
        assert_eq!(table.diplotypes.len(), 2);
        assert_eq!(table.diplotypes[&set(&["A1", "A2", "B7", "B8"])], 2);
        // homozygous A and a missing B2 collapse to two alleles
        assert_eq!(table.diplotypes[&set(&["A1", "B7"])], 1);
        assert_eq!(table.frequency(&set(&["A1", "A2", "B7", "B8"])), 0.5);
        assert_eq!(table.frequency(&set(&["A3"])), 0.0);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_input() {
        let missing_column = FrequencyTable::from_reader("A1,A2,B1\n1,2,7\n".as_bytes(), "local");
        assert!(matches!(missing_column, Err(CpraError::Configuration(_))));

        let no_donors = FrequencyTable::from_reader("A1,A2,B1,B2\n".as_bytes(), "local");
        assert!(matches!(no_donors, Err(CpraError::Configuration(_))));

        let bad_name = FrequencyTable::from_reader(TYPINGS.as_bytes(), "local:2020");
        assert!(matches!(bad_name, Err(CpraError::Configuration(_))));
    }

    #[test]
    fn test_written_resources_load_as_config() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let table = FrequencyTable::from_reader(TYPINGS.as_bytes(), "local")?;
        let files = table.write(temp_dir.path())?;

        assert!(files.frequencies.ends_with("local_freq.csv"));
        assert!(files.meta.ends_with("local_meta.csv"));

        let store = ConfigStore::load(&temp_dir.path().to_string_lossy())?;
        assert_eq!(store.get2(KEY_CALCULATOR_TYPE, "local"), Some("diplotype"));
        assert_eq!(store.get2(KEY_ETHNIC_FREQUENCIES, "local"), Some("1.00"));

        let value = store
            .get3(KEY_DIPLOTYPE_FREQUENCIES, "local", "A1;A2;B7;B8")
            .unwrap_or_default();
        assert_eq!(value.parse::<f64>().unwrap(), 0.5);
        assert_eq!(store.keys("hlaDiplotypeFrequencies:local:*")?.len(), 2);
        Ok(())
    }
}
