use anyhow::{Context, Result};
use chrono::Local;
use csv::WriterBuilder;
use serde_json::to_string_pretty;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::batch::{BatchFailure, BatchReport};
use crate::types::*;

/// Supported report formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Html,
    Csv,
    Json,
    Tsv,
    All,
}

/// Report generator for batch results
pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: &Path) -> Result<Self> {
        if !output_dir.exists() {
            fs::create_dir_all(output_dir).with_context(|| {
                format!("Failed to create output directory {}", output_dir.display())
            })?;
        }

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    /// Generate reports in specified format(s); returns the files written
    pub fn generate(&self, report: &BatchReport, format: ReportFormat) -> Result<Vec<PathBuf>> {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();

        let written = match format {
            ReportFormat::Html => vec![self.generate_html_report(report, &stamp)?],
            ReportFormat::Csv => vec![self.generate_delimited_report(report, &stamp, b',', "csv")?],
            ReportFormat::Json => vec![self.generate_json_report(report, &stamp)?],
            ReportFormat::Tsv => vec![self.generate_delimited_report(report, &stamp, b'\t', "tsv")?],
            ReportFormat::All => vec![
                self.generate_html_report(report, &stamp)?,
                self.generate_delimited_report(report, &stamp, b',', "csv")?,
                self.generate_json_report(report, &stamp)?,
                self.generate_delimited_report(report, &stamp, b'\t', "tsv")?,
            ],
        };

        info!("Wrote {} report file(s) to {}", written.len(), self.output_dir.display());
        Ok(written)
    }

    fn report_path(&self, stamp: &str, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("cpra_report_{}.{}", stamp, extension))
    }

    fn generate_html_report(&self, report: &BatchReport, stamp: &str) -> Result<PathBuf> {
        let filename = self.report_path(stamp, "html");

        fs::write(&filename, self.create_html_content(report))
            .with_context(|| format!("Failed to write HTML report to {}", filename.display()))?;

        Ok(filename)
    }

    fn create_html_content(&self, report: &BatchReport) -> String {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>cPRA Report</title>
    <style>
        body {{
            font-family: Arial, sans-serif;
            margin: 40px;
            background-color: #f5f5f5;
        }}
        .container {{
            max-width: 1200px;
            margin: 0 auto;
            background-color: white;
            padding: 30px;
            border-radius: 10px;
            box-shadow: 0 0 10px rgba(0,0,0,0.1);
        }}
        h1, h2 {{
            color: #2c3e50;
        }}
        table {{
            width: 100%;
            border-collapse: collapse;
            margin: 20px 0;
        }}
        th, td {{
            border: 1px solid #ddd;
            padding: 12px;
            text-align: left;
        }}
        th {{
            background-color: #3498db;
            color: white;
        }}
        tr:nth-child(even) {{
            background-color: #f2f2f2;
        }}
        .summary-box {{
            background-color: #e8f4f8;
            padding: 20px;
            border-radius: 5px;
            margin: 20px 0;
        }}
        .sensitization-high {{
            background-color: #f8d7da;
        }}
        .sensitization-moderate {{
            background-color: #fff3cd;
        }}
        .warning {{
            color: #856404;
            font-size: 0.9em;
        }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Calculated Panel Reactive Antibody Report</h1>
        <p>Generated on: {}</p>

        <div class="summary-box">
            <h2>Summary</h2>
            <p>{} requests scored, {} failed.</p>
        </div>

        {}
        {}
    </div>
</body>
</html>"#,
            timestamp,
            report.results.len(),
            report.failures.len(),
            self.generate_results_html(&report.results),
            self.generate_failures_html(&report.failures)
        )
    }

    fn generate_results_html(&self, results: &[CpraResult]) -> String {
        if results.is_empty() {
            return "<div class=\"section\"><h2>Results</h2><p>No results available.</p></div>".to_string();
        }

        let mut html = "<div class=\"section\"><h2>Results</h2>\n<table>\n<tr><th>Version</th><th>Antibodies</th><th>Unacceptable Antigens</th><th>cPRA</th><th>By Ethnicity</th><th>Warnings</th></tr>\n".to_string();

        for result in results {
            let row_class = if result.cpra >= 0.98 {
                "sensitization-high"
            } else if result.cpra >= 0.8 {
                "sensitization-moderate"
            } else {
                ""
            };

            html.push_str(&format!(
                "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{:.2}%</td><td>{}</td><td class=\"warning\">{}</td></tr>\n",
                row_class,
                escape_html(&result.version),
                escape_html(&result.antibodies.join(SUB_DELIMITER)),
                escape_html(&result.unacceptable_antigens),
                result.cpra * 100.0,
                escape_html(&ethnic_summary(result)),
                escape_html(&result.warnings.join("; "))
            ));
        }

        html.push_str("</table>\n</div>\n");
        html
    }

    fn generate_failures_html(&self, failures: &[BatchFailure]) -> String {
        if failures.is_empty() {
            return String::new();
        }

        let mut html = "<div class=\"section\"><h2>Failed Requests</h2>\n<table>\n<tr><th>Row</th><th>Version</th><th>Antibodies</th><th>Error</th></tr>\n".to_string();

        for failure in failures {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                failure.row,
                escape_html(&failure.version),
                escape_html(&failure.antibodies.join(SUB_DELIMITER)),
                escape_html(&failure.error)
            ));
        }

        html.push_str("</table>\n</div>\n");
        html
    }

    fn generate_delimited_report(
        &self,
        report: &BatchReport,
        stamp: &str,
        delimiter: u8,
        extension: &str,
    ) -> Result<PathBuf> {
        let filename = self.report_path(stamp, extension);

        let mut wtr = WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(&filename)
            .with_context(|| format!("Failed to create report {}", filename.display()))?;

        wtr.write_record([
            "version",
            "antibodies",
            "unacceptable_antigens",
            "cpra",
            "ethnic_cpra",
            "warnings",
            "error",
        ])?;

        for result in &report.results {
            wtr.write_record([
                result.version.as_str(),
                &result.antibodies.join(SUB_DELIMITER),
                &result.unacceptable_antigens,
                &format!("{:.6}", result.cpra),
                &ethnic_summary(result),
                &result.warnings.join("|"),
                "",
            ])?;
        }

        for failure in &report.failures {
            wtr.write_record([
                failure.version.as_str(),
                &failure.antibodies.join(SUB_DELIMITER),
                "",
                "",
                "",
                "",
                &failure.error,
            ])?;
        }

        wtr.flush()?;
        Ok(filename)
    }

    fn generate_json_report(&self, report: &BatchReport, stamp: &str) -> Result<PathBuf> {
        let filename = self.report_path(stamp, "json");

        let json_content =
            to_string_pretty(report).with_context(|| "Failed to serialize results to JSON")?;

        fs::write(&filename, json_content)
            .with_context(|| format!("Failed to write JSON report to {}", filename.display()))?;

        Ok(filename)
    }
}

/// `Caucasian=0.3896;African-American=0.4375` style breakdown
fn ethnic_summary(result: &CpraResult) -> String {
    result
        .ethnic_cpra
        .iter()
        .map(|e| format!("{}={:.6}", e.ethnicity, e.cpra))
        .collect::<Vec<_>>()
        .join(SUB_DELIMITER)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn report() -> BatchReport {
        let mut scored = CpraResult::new("test_haplo", vec!["A9".to_string()]);
        scored.unacceptable_antigens = "A23;A24;A9".to_string();
        scored.cpra = 0.424072265625;
        scored.ethnic_cpra = vec![EthnicCpra {
            ethnicity: "Caucasian".to_string(),
            cpra: 0.3896484375,
        }];

        BatchReport {
            results: vec![scored],
            failures: vec![BatchFailure {
                row: 2,
                version: "unos".to_string(),
                antibodies: vec!["A1".to_string()],
                error: "Invalid version 'unos'".to_string(),
            }],
        }
    }

    #[test]
    fn test_all_formats_written() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let generator = ReportGenerator::new(&temp_dir.path().join("reports"))?;

        let written = generator.generate(&report(), ReportFormat::All)?;
        assert_eq!(written.len(), 4);
        assert!(written.iter().all(|path| path.exists()));
        Ok(())
    }

    #[test]
    fn test_csv_rows() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let generator = ReportGenerator::new(temp_dir.path())?;

        let written = generator.generate(&report(), ReportFormat::Csv)?;
        let mut reader = csv::Reader::from_path(&written[0])?;
        let rows: Vec<csv::StringRecord> = reader.records().collect::<std::result::Result<_, _>>()?;

        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][2], "A23;A24;A9");
        assert_eq!(&rows[0][3], "0.424072");
        assert_eq!(&rows[0][4], "Caucasian=0.389648");
        assert_eq!(&rows[1][6], "Invalid version 'unos'");
        Ok(())
    }

    #[test]
    fn test_html_escapes_content() {
        let generator = ReportGenerator {
            output_dir: PathBuf::from("."),
        };
        let mut report = report();
        report.results[0].warnings.push("<b>".to_string());

        let html = generator.create_html_content(&report);
        assert!(html.contains("&lt;b&gt;"));
        assert!(html.contains("1 requests scored, 1 failed."));
    }
}
