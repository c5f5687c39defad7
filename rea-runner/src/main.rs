mod logging;
mod progress;
mod reports;
mod run_dir;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::{Path, PathBuf};

use rea_core::{
    GoalSeekLimits, Orchestrator, RunConfig, RunLog, ScenarioSource, WorkbookEngine, bind,
};

use progress::ConsoleProgress;
use reports::RunReport;
use run_dir::{RunDir, input_source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Colored summary for a terminal
    Console,
    /// Machine-readable summary
    Json,
    /// Summary suitable for pasting into a document
    Markdown,
}

#[derive(Debug, Parser)]
#[command(name = "rea-runner", version)]
#[command(
    about = "Runs REA model scenarios in batch: goal-seeks the annual reintroduction for each one and records the results"
)]
struct Args {
    /// Run configuration (JSON)
    #[arg(long, default_value = "config/scenarios_config.json")]
    config: PathBuf,

    /// Directory that receives one timestamped folder per run
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Prefix of the run folder name
    #[arg(long, default_value = "rea_run")]
    run_name: String,

    /// Output report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Console)]
    report: ReportFormat,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write debug-level records to the run log
    #[arg(short, long)]
    verbose: bool,

    /// Print every bound scenario and exit without opening the model
    #[arg(long)]
    list_scenarios: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = RunConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    if maybe_list_scenarios(&args, &config)? {
        return Ok(());
    }

    announce_banner();

    let run_dir = RunDir::create(&args.results_dir, &args.run_name, &config, Local::now())?;
    logging::init(&run_dir.log_file(), args.verbose)?;
    println!("📁 Run folder: {}", run_dir.root().display().to_string().bold());

    let paths = run_dir.stage_inputs(&config)?;
    let engine = WorkbookEngine::with_goal_seek_limits(goal_seek_limits(&config));
    let orchestrator = Orchestrator::new(&engine, &config, RunLog::new(run_dir.name()));
    let mut progress = ConsoleProgress::new(stdout());

    let summary = match orchestrator.run(&paths, &mut progress) {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("❌ {} {err}", "Run failed:".red().bold());
            if let Some(scenario) = err.scenario() {
                eprintln!("   {}", kept_rows_message(scenario, &paths.main_stream()));
            }
            return Err(err.into());
        }
    };

    let report = RunReport::new(run_dir.name(), run_dir.root(), &summary);
    write_report(&args, &report)
}

/// Which scenarios still have rows after a fatal error at `failed`.
fn kept_rows_message(failed: usize, main_stream: &Path) -> String {
    match failed.saturating_sub(1) {
        0 => format!("No scenario rows were recorded in {}", main_stream.display()),
        1 => format!("Rows for scenario 1 are kept in {}", main_stream.display()),
        last => format!("Rows for scenarios 1-{last} are kept in {}", main_stream.display()),
    }
}

fn goal_seek_limits(config: &RunConfig) -> GoalSeekLimits {
    GoalSeekLimits {
        max_iterations: config.goal_seek.max_iterations,
        tolerance: config.goal_seek.tolerance,
    }
}

fn maybe_list_scenarios(args: &Args, config: &RunConfig) -> Result<bool> {
    if !args.list_scenarios {
        return Ok(false);
    }
    let path = input_source(config).join(&config.files.input_file);
    let source = ScenarioSource::open(&path, &config.required_columns, config.defaults.names())
        .with_context(|| format!("reading scenarios from {}", path.display()))?;

    let mut output_target = OutputTarget::new(args.output.clone())?;
    writeln!(output_target.writer(), "Available scenarios:")?;
    for record in source.iter()? {
        let record = record?;
        let parameters = bind(&config.defaults, &record);
        let fields: Vec<String> = parameters
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        writeln!(
            output_target.writer(),
            "  {:>4}  {}",
            record.row(),
            fields.join(", ")
        )?;
    }
    output_target.flush_inner()?;
    Ok(true)
}

fn announce_banner() {
    println!("{}", "🦌 REA Scenario Runner".bright_cyan().bold());
    println!("{}", "======================".cyan());
}

fn write_report(args: &Args, report: &RunReport<'_>) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;

    match args.report {
        ReportFormat::Json => reports::generate_json_report(&mut output_target, report)?,
        ReportFormat::Markdown => reports::generate_markdown_report(&mut output_target, report)?,
        ReportFormat::Console => reports::generate_console_report(&mut output_target, report)?,
    }

    output_target.flush_inner()?;
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}
