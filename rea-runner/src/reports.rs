use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

use rea_core::RunSummary;

/// Run summary as rendered by every report format.
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub run_name: &'a str,
    pub run_dir: &'a Path,
    pub total: usize,
    pub completed: usize,
    pub qc_failures: &'a [usize],
    pub non_converged: &'a [usize],
    pub main_stream: &'a Path,
    pub failure_stream: Option<&'a Path>,
    pub runtime: String,
}

impl<'a> RunReport<'a> {
    pub fn new(run_name: &'a str, run_dir: &'a Path, summary: &'a RunSummary) -> Self {
        Self {
            run_name,
            run_dir,
            total: summary.total,
            completed: summary.completed,
            qc_failures: &summary.qc_failures,
            non_converged: &summary.non_converged,
            main_stream: &summary.main_stream,
            failure_stream: summary.failure_stream.as_deref(),
            runtime: summary.runtime(),
        }
    }

    fn passed(&self) -> usize {
        self.completed.saturating_sub(self.qc_failures.len())
    }
}

fn scenario_list(numbers: &[usize]) -> String {
    numbers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn generate_console_report(out: &mut dyn Write, report: &RunReport<'_>) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", "📊 Run Summary".bright_cyan().bold())?;
    writeln!(out, "{}", "==============".cyan())?;

    writeln!(out, "Run: {}", report.run_name.bold())?;
    writeln!(out, "Scenarios completed: {}/{}", report.completed, report.total)?;
    writeln!(out, "QC passed: {}", report.passed().to_string().green())?;
    writeln!(
        out,
        "QC failed: {}",
        report.qc_failures.len().to_string().red()
    )?;
    if !report.qc_failures.is_empty() {
        writeln!(out, "   Failing scenarios: {}", scenario_list(report.qc_failures))?;
    }
    if !report.non_converged.is_empty() {
        writeln!(
            out,
            "{} goal seek did not converge for scenarios {}",
            "⚠️".yellow(),
            scenario_list(report.non_converged)
        )?;
    }
    writeln!(out)?;
    writeln!(out, "Results: {}", report.main_stream.display())?;
    if let Some(failures) = report.failure_stream {
        writeln!(out, "QC failures: {}", failures.display())?;
    }
    writeln!(out, "🏁 Runtime: {}", report.runtime)?;
    Ok(())
}

pub fn generate_json_report(out: &mut dyn Write, report: &RunReport<'_>) -> Result<()> {
    let json_output = serde_json::to_string_pretty(report)?;
    writeln!(out, "{json_output}")?;
    Ok(())
}

pub fn generate_markdown_report(out: &mut dyn Write, report: &RunReport<'_>) -> io::Result<()> {
    writeln!(out, "# REA Run {}\n", report.run_name)?;

    writeln!(out, "## Summary\n")?;
    writeln!(out, "- **Scenarios**: {}/{} completed", report.completed, report.total)?;
    writeln!(out, "- **QC passed**: {}", report.passed())?;
    writeln!(out, "- **QC failed**: {}", report.qc_failures.len())?;
    writeln!(out, "- **Runtime**: {}\n", report.runtime)?;

    writeln!(out, "## Outputs\n")?;
    writeln!(out, "- Results: `{}`", report.main_stream.display())?;
    match report.failure_stream {
        Some(path) => writeln!(out, "- QC failures: `{}`", path.display())?,
        None => writeln!(out, "- QC failures: _none_")?,
    }

    if !report.qc_failures.is_empty() || !report.non_converged.is_empty() {
        writeln!(out, "\n## Attention\n")?;
        for scenario in report.qc_failures {
            writeln!(out, "- ❌ Scenario {scenario} failed QC")?;
        }
        for scenario in report.non_converged {
            writeln!(out, "- ⚠️ Scenario {scenario}: goal seek did not converge")?;
        }
    }
    Ok(())
}
