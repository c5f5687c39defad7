//! Run-scoped logging context.
//!
//! Components receive a [`RunLog`] instead of reaching for global named
//! loggers. Everything still goes through the `log` facade, so the binary
//! decides where records end up.

use std::fmt;

/// Run lifecycle, progress and fatal errors.
pub const MAIN_TARGET: &str = "rea::main";
/// Per-scenario inputs and outputs.
pub const DETAIL_TARGET: &str = "rea::detail";
/// QC verdicts.
pub const QC_TARGET: &str = "rea::qc";

#[derive(Debug, Clone, Default)]
pub struct RunLog {
    run_name: String,
}

impl RunLog {
    #[must_use]
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
        }
    }

    #[must_use]
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        log::info!(target: MAIN_TARGET, "{args}");
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        log::warn!(target: MAIN_TARGET, "{args}");
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        log::error!(target: MAIN_TARGET, "{args}");
    }

    /// Log a heading followed by one `Label: value` line per entry.
    pub fn detail<'a, I, V>(&self, heading: fmt::Arguments<'_>, entries: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: fmt::Display,
    {
        log::info!(target: DETAIL_TARGET, "{heading}");
        for (name, value) in entries {
            log::info!(target: DETAIL_TARGET, "{}: {value}", title_case(name));
        }
    }

    pub fn qc_pass(&self, scenario: usize) {
        log::info!(target: QC_TARGET, "Scenario {scenario}: QC PASS");
    }

    pub fn qc_failure(&self, scenario: usize, observed: &str) {
        log::warn!(
            target: QC_TARGET,
            "Scenario {scenario}: QC check failed (cell reads `{observed}`)"
        );
    }
}

/// `number_killed` → `Number Killed`.
#[must_use]
pub fn title_case(name: &str) -> String {
    name.split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_cases_parameter_names() {
        assert_eq!(title_case("number_killed"), "Number Killed");
        assert_eq!(title_case("discount_start_year"), "Discount Start Year");
        assert_eq!(title_case("TOTAL_losses"), "Total Losses");
        assert_eq!(title_case("__x__"), "X");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn default_log_has_an_empty_run_name() {
        assert_eq!(RunLog::default().run_name(), "");
        assert_eq!(RunLog::new("batch").run_name(), "batch");
    }
}
