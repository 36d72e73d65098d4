use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{generate, Shell};
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use tracing::info;

use cpra_calculator::batch::{read_requests, BatchReport};
use cpra_calculator::output::{ReportFormat, ReportGenerator};
use cpra_calculator::{CpraRequest, CpraResult, CpraService, FrequencyTable, Settings};

/// Requests handed to the worker pool per progress update
const BATCH_CHUNK: usize = 256;

/// Calculated panel reactive antibody scoring
#[derive(Parser, Debug)]
#[command(
    name = "cpra-calculator",
    version,
    about = "Calculated Panel Reactive Antibody (cPRA) scoring",
    long_about = r#"
Scores the fraction of a reference donor population that a transplant
candidate's unacceptable HLA antigens rule out.

Reference datasets are versioned and loaded from CSV key-value resources;
each version is scored with either diplotype or haplotype frequencies.
"#
)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Configuration resources: a CSV file, a directory or a file-name glob
    #[arg(short, long, env = "CPRA_CONFIG", value_name = "SOURCE", value_hint = ValueHint::AnyPath)]
    config: Option<String>,

    /// Search subdirectories of a directory or glob configuration source
    #[arg(short, long)]
    recursive: bool,

    /// Optional TOML settings file
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    settings: Option<PathBuf>,

    /// Number of threads (0 = auto-detect)
    #[arg(short, long, help = "Number of threads (0 = auto)")]
    threads: Option<usize>,

    /// Ceiling on haplotype lookups per request
    #[arg(long, value_name = "N")]
    max_combinations: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score one antibody list
    Calculate {
        /// Dataset version ("current" for the default)
        #[arg(short = 'd', long = "version", default_value = "current")]
        version: String,

        /// Antibodies separated by ';' (e.g. "A9;B57")
        #[arg(short, long, default_value = "")]
        antibodies: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Score every row of a `version,antibodies` CSV file
    Batch {
        #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
        input: PathBuf,

        #[arg(short, long, value_enum, default_value = "csv")]
        format: OutputFormat,

        /// Output directory for reports
        #[arg(short, long, value_hint = ValueHint::DirPath)]
        output: Option<PathBuf>,
    },
    /// List configured dataset versions
    Versions,
    /// Print the configuration report of every version as JSON
    SelfCheck,
    /// Interactive mode with prompts for version and antibodies
    Interactive,
    /// Build diplotype frequency resources from an `A1,A2,B1,B2` donor typing CSV
    Generate {
        #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
        input: PathBuf,

        /// Name of the frequency table; becomes the dataset version
        #[arg(short, long)]
        name: String,

        /// Directory for `<name>_freq.csv` and `<name>_meta.csv`
        #[arg(short, long, default_value = ".", value_hint = ValueHint::DirPath)]
        output: PathBuf,
    },
    /// Generate shell completions
    Completions { shell: Shell },
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    Html,
    #[default]
    Csv,
    Json,
    Tsv,
    All,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> ReportFormat {
        match format {
            OutputFormat::Html => ReportFormat::Html,
            OutputFormat::Csv => ReportFormat::Csv,
            OutputFormat::Json => ReportFormat::Json,
            OutputFormat::Tsv => ReportFormat::Tsv,
            OutputFormat::All => ReportFormat::All,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        generate_completions(shell);
        return Ok(());
    }

    init_logging(cli.verbose);

    if let Commands::Generate {
        input,
        name,
        output,
    } = &cli.command
    {
        return run_generate(input, name, output);
    }

    let settings = Settings::load_or_default(cli.settings.as_deref())?.with_overrides(
        cli.config.clone(),
        cli.max_combinations,
        cli.recursive,
    )?;
    let service = build_service(&settings)?;

    match cli.command {
        Commands::Calculate {
            version,
            antibodies,
            json,
        } => run_calculate(&service, &version, &antibodies, json),
        Commands::Batch {
            input,
            format,
            output,
        } => {
            init_thread_pool(cli.threads.unwrap_or(settings.threads))?;
            let output = output.unwrap_or_else(|| settings.output_dir.clone());
            run_batch(&service, &input, format.into(), &output)
        }
        Commands::Versions => list_versions(&service),
        Commands::SelfCheck => run_self_check(&service),
        Commands::Interactive => run_interactive_mode(&service),
        Commands::Generate { .. } | Commands::Completions { .. } => Ok(()),
    }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(format!("cpra_calculator={}", level))
        .init();
}

fn init_thread_pool(threads: usize) -> Result<()> {
    let num_threads = if threads == 0 {
        num_cpus::get()
    } else {
        threads
    };

    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .map_err(|e| anyhow::anyhow!("Failed to initialize thread pool: {}", e))?;

    info!("Using {} threads", rayon::current_num_threads());
    Ok(())
}

fn build_service(settings: &Settings) -> Result<CpraService> {
    let source = settings
        .config_source
        .clone()
        .context("No configuration source; pass --config, set CPRA_CONFIG or config_source in settings")?;
    info!("Configuration source '{}'", source);

    Ok(CpraService::from_pattern(source)
        .with_max_combinations(settings.max_combinations)
        .with_recursive(settings.recursive))
}

fn run_generate(input: &std::path::Path, name: &str, output: &std::path::Path) -> Result<()> {
    println!("{}", style("Generating frequency files...").bold().cyan());

    let table = FrequencyTable::from_typing_file(input, name)
        .with_context(|| format!("Failed to read donor typings {}", input.display()))?;
    let files = table.write(output)?;

    println!(
        "{} {} allele sets from {} donors",
        style("✓").green().bold(),
        table.diplotypes.len(),
        table.donors
    );
    println!("  {}", style(files.frequencies.display()).cyan());
    println!("  {}", style(files.meta.display()).cyan());
    println!(
        "  Add '{}' to hlaCpraVersions to score against it",
        style(&table.name).green()
    );
    Ok(())
}

fn run_calculate(service: &CpraService, version: &str, antibodies: &str, json: bool) -> Result<()> {
    let request = CpraRequest::from_delimited(version, antibodies);
    let result = service
        .calculate(&request)
        .with_context(|| format!("Failed to score '{}' against version '{}'", antibodies, version))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_result(result: &CpraResult) {
    println!(
        "{} {} ({})",
        style("cPRA").bold().cyan(),
        style(format!("{:.4}", result.cpra)).green().bold(),
        style(&result.version).dim()
    );
    println!(
        "  {} {}",
        style("Unacceptable antigens:").bold(),
        result.unacceptable_antigens
    );
    for ethnic in &result.ethnic_cpra {
        println!("  {:<20} {:.4}", ethnic.ethnicity, ethnic.cpra);
    }
    for warning in &result.warnings {
        println!("  {} {}", style("!").yellow().bold(), style(warning).yellow());
    }
}

fn run_batch(
    service: &CpraService,
    input: &std::path::Path,
    format: ReportFormat,
    output: &std::path::Path,
) -> Result<()> {
    let requests = read_requests(input)
        .with_context(|| format!("Failed to read batch input {}", input.display()))?;
    service.initialize()?;

    let pb = ProgressBar::new(requests.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message("Scoring requests...");

    let mut outcomes = Vec::with_capacity(requests.len());
    for chunk in requests.chunks(BATCH_CHUNK) {
        outcomes.extend(service.calculate_many(chunk));
        pb.inc(chunk.len() as u64);
    }
    let report = BatchReport::collect(&requests, outcomes);
    pb.finish_with_message("Scoring complete!");

    let generator = ReportGenerator::new(output)?;
    let written = generator.generate(&report, format)?;

    println!(
        "\n{} {} scored, {} failed",
        style("✓").green().bold(),
        report.results.len(),
        report.failures.len()
    );
    for path in written {
        println!("  {}", style(path.display()).cyan());
    }
    Ok(())
}

fn list_versions(service: &CpraService) -> Result<()> {
    println!("{}", style("Configured cPRA Versions:").bold().cyan());
    println!();

    for version in service.versions()? {
        let marker = if version.is_default { " (current)" } else { "" };
        println!(
            "  {}{} - {}",
            style(&version.name).green().bold(),
            style(marker).yellow(),
            style(version.calculator_type).yellow()
        );
        if let Some(description) = &version.description {
            println!("         {}", style(description).dim());
        }
    }
    Ok(())
}

fn run_self_check(service: &CpraService) -> Result<()> {
    let data_sets = service.self_check()?;
    println!("{}", serde_json::to_string_pretty(&data_sets)?);
    Ok(())
}

fn run_interactive_mode(service: &CpraService) -> Result<()> {
    println!(
        "{}",
        style("╔══════════════════════════════════════════════════════════════╗").cyan()
    );
    println!(
        "{}",
        style("║            cPRA Calculator - Interactive Mode                ║")
            .cyan()
            .bold()
    );
    println!(
        "{}",
        style("╚══════════════════════════════════════════════════════════════╝").cyan()
    );
    println!();

    let theme = ColorfulTheme::default();
    let versions = service.versions()?;
    let names: Vec<&str> = versions.iter().map(|v| v.name.as_str()).collect();

    loop {
        let version_idx = Select::with_theme(&theme)
            .with_prompt("Select dataset version")
            .default(0)
            .items(&names)
            .interact()?;

        let antibodies: String = Input::with_theme(&theme)
            .with_prompt("Antibodies (separated by ';')")
            .allow_empty(true)
            .interact_text()?;

        let request = CpraRequest::from_delimited(names[version_idx], &antibodies);
        match service.calculate(&request) {
            Ok(result) => print_result(&result),
            Err(e) => println!("{} {}", style("✗").red().bold(), style(e).red()),
        }
        println!();

        let again = Confirm::with_theme(&theme)
            .with_prompt("Score another antibody list?")
            .default(true)
            .interact()?;
        if !again {
            break;
        }
    }

    Ok(())
}
