use clap::Parser;
use sam_pesticide::files::{CsvSink, FileStore};
use sam_pesticide::logging::init_logging;
use sam_pesticide::{RunConfig, SamResult};
use std::path::PathBuf;
use std::process::ExitCode;

/// Daily pesticide concentrations in stream reaches
#[derive(Parser)]
#[command(name = "sam", version, long_about = None)]
struct Cli {
    /// Run configuration (TOML)
    config: PathBuf,

    /// Directory of scenario JSON files
    #[arg(long)]
    scenarios: PathBuf,

    /// Directory of recipe CSV and reach hydro JSON files
    #[arg(long)]
    recipes: PathBuf,

    /// Directory of reach flow JSON files
    #[arg(long)]
    flows: PathBuf,

    /// Output directory for daily CSV files
    #[arg(long)]
    output: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

fn run(cli: &Cli) -> SamResult<()> {
    let config = RunConfig::load(&cli.config)?;
    let store = FileStore::new(&cli.scenarios, &cli.recipes, &cli.flows);
    let mut sink = CsvSink::new(&cli.output)?;

    let summary = sam_pesticide::run(&config, &store, &store, &store, &mut sink)?;
    println!(
        "{} reaches, {} outputs written, {} reach-years skipped",
        summary.reaches, summary.outputs_written, summary.reach_years_skipped
    );
    println!(
        "{} scenario runs, {} skipped, {} other crops, {} qc flags (max severity {})",
        summary.scenarios_simulated,
        summary.scenarios_skipped,
        summary.scenarios_filtered,
        summary.qc.flags.len(),
        summary.qc.max_severity()
    );
    if !summary.qc.is_empty() {
        let path = sink.write_qc_report(&summary.qc)?;
        log::info!("qc flags written to {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
