//! # cPRA Calculator
//!
//! Calculated Panel Reactive Antibody scoring for transplant candidates: the
//! fraction of a reference donor population a patient's HLA antibodies rule out.
//!
//! ## Features
//!
//! - Versioned reference datasets loaded from CSV key-value resources (`.csv`, `.csv.gz`)
//! - Antibody expansion through configured antigen equivalences
//! - Diplotype-frequency and ethnicity-weighted haplotype-frequency calculators
//! - Lazily initialized, thread-safe service with `current` version resolution
//! - Parallel batch scoring with HTML, CSV, JSON and TSV reports
//! - Diplotype frequency tables generated from donor typings

pub mod allele;
pub mod antigen;
pub mod batch;
pub mod calculator;
pub mod config;
pub mod error;
pub mod generator;
pub mod output;
pub mod service;
pub mod settings;
pub mod types;

// Re-export key types
pub use allele::{AlleleToken, AlleleVocabulary};
pub use antigen::{AntigenExpander, UnacceptableAntigens};
pub use batch::{BatchFailure, BatchReport};
pub use calculator::{Calculator, DiplotypeCalculator, HaplotypeCalculator};
pub use config::{ConfigLoader, ConfigStore};
pub use error::{AggregationError, CpraError, Result};
pub use generator::FrequencyTable;
pub use output::{ReportFormat, ReportGenerator};
pub use service::{ConfigSource, CpraService};
pub use settings::Settings;
pub use types::*;
