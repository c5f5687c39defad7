//! Run log setup: every record goes to `<run>/logs/run.log`.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use env_logger::{Builder, Target};
use log::{Level, LevelFilter};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Install the global logger. `RUST_LOG` still overrides the level.
pub fn init(log_file: &Path, verbose: bool) -> Result<()> {
    let file = File::create(log_file)
        .with_context(|| format!("failed to create {}", log_file.display()))?;

    Builder::new()
        .filter_level(default_level(verbose))
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}",
                format_line(Local::now(), record.level(), record.target(), record.args())
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .try_init()
        .context("logger already installed")
}

const fn default_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// `timestamp - LEVEL - target - message`
fn format_line(
    at: DateTime<Local>,
    level: Level,
    target: &str,
    message: &fmt::Arguments<'_>,
) -> String {
    format!(
        "{} - {level} - {target} - {message}",
        at.format(TIMESTAMP_FORMAT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn lines_carry_time_level_target_and_message() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let line = format_line(at, Level::Warn, "rea::qc", &format_args!("Scenario {} failed", 2));
        assert_eq!(
            line,
            "2024-03-09 14:05:07,000 - WARN - rea::qc - Scenario 2 failed"
        );
    }

    #[test]
    fn verbose_lowers_the_default_level() {
        assert_eq!(default_level(false), LevelFilter::Info);
        assert_eq!(default_level(true), LevelFilter::Debug);
    }
}
