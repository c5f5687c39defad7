use colored::Colorize;
use std::io::Write;

use rea_core::{ProgressObserver, Verdict};

/// Prints one `k/N complete` line per finished scenario.
pub struct ConsoleProgress<W: Write> {
    out: W,
}

impl<W: Write> ConsoleProgress<W> {
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ProgressObserver for ConsoleProgress<W> {
    fn run_started(&mut self, total: usize) {
        let _ = writeln!(
            self.out,
            "{} {total} scenarios",
            "🧮 Processing".bright_yellow().bold()
        );
        let _ = writeln!(self.out, "{}", "-".repeat(30).yellow());
    }

    fn scenario_finished(&mut self, completed: usize, total: usize, verdict: &Verdict) {
        let status = match verdict {
            Verdict::Pass => "✅ PASS".green(),
            Verdict::Fail { .. } => "❌ QC FAIL".red(),
        };
        let _ = writeln!(self.out, "{status} {completed}/{total} complete");
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_each_completed_scenario() {
        let mut progress = ConsoleProgress::new(Vec::new());
        progress.run_started(2);
        progress.scenario_finished(1, 2, &Verdict::Pass);
        progress.scenario_finished(
            2,
            2,
            &Verdict::Fail {
                observed: "FAIL".into(),
            },
        );

        let text = String::from_utf8(progress.into_inner()).unwrap();
        assert!(text.contains("2 scenarios"));
        assert!(text.contains("1/2 complete"));
        assert!(text.contains("QC FAIL"));
        assert!(text.contains("2/2 complete"));
    }
}
