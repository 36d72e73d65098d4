use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;
use crate::types::{CpraRequest, CpraResult};

/// Read `version,antibodies` rows (header required, `#` comments allowed).
///
/// A row carrying only a version is a request with no antibodies.
pub fn read_requests(path: &Path) -> Result<Vec<CpraRequest>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let mut requests = Vec::new();
    for record in reader.records() {
        let record = record?;
        let version = record.get(0).unwrap_or_default();
        let antibodies = record.get(1).unwrap_or_default();
        requests.push(CpraRequest::from_delimited(version, antibodies));
    }

    info!("Read {} requests from '{}'", requests.len(), path.display());
    Ok(requests)
}

/// A request that could not be scored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchFailure {
    /// 1-based position in the batch
    pub row: usize,
    pub version: String,
    pub antibodies: Vec<String>,
    pub error: String,
}

/// Scored requests and failures of one batch run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<CpraResult>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    /// Pair each request with its outcome
    pub fn collect(requests: &[CpraRequest], outcomes: Vec<Result<CpraResult>>) -> Self {
        let mut report = BatchReport::default();

        for (i, (request, outcome)) in requests.iter().zip(outcomes).enumerate() {
            match outcome {
                Ok(result) => report.results.push(result),
                Err(e) => {
                    warn!("row {}: {}", i + 1, e);
                    report.failures.push(BatchFailure {
                        row: i + 1,
                        version: request.version.clone(),
                        antibodies: request.antibodies.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    pub fn len(&self) -> usize {
        self.results.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
