//! Quality-control gate on the model's summary verdict cell.

use crate::engine::{CellData, CellValue, EngineError, EngineSession, SheetHandle};
use crate::logging::RunLog;
use crate::recorder::{OutputStream, RecordError};

/// The only verdict text that passes.
pub const PASS: &str = "PASS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail { observed: String },
}

impl Verdict {
    /// Exactly the text `PASS` passes; anything else, including `pass`,
    /// padded text, numbers and blanks, fails.
    #[must_use]
    pub fn from_cell(data: &CellData) -> Self {
        match data {
            CellData::Scalar(CellValue::Text(text)) if text == PASS => Self::Pass,
            other => Self::Fail {
                observed: other.to_field(),
            },
        }
    }

    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Read the verdict cell.
///
/// # Errors
///
/// Propagates engine read failures; a failing verdict is not an error.
pub fn check<S: EngineSession + ?Sized>(
    session: &mut S,
    sheet: &SheetHandle,
    qc_address: &str,
) -> Result<Verdict, EngineError> {
    session
        .get_cell(sheet, qc_address)
        .map(|data| Verdict::from_cell(&data))
}

/// Verdict cell plus the lazily created failure stream.
#[derive(Debug, Clone)]
pub struct QcGate {
    address: String,
    failures: OutputStream,
    failed: Vec<usize>,
}

impl QcGate {
    #[must_use]
    pub const fn new(address: String, failures: OutputStream) -> Self {
        Self {
            address,
            failures,
            failed: Vec::new(),
        }
    }

    /// # Errors
    ///
    /// See [`check`].
    pub fn inspect<S: EngineSession + ?Sized>(
        &self,
        session: &mut S,
        sheet: &SheetHandle,
    ) -> Result<Verdict, EngineError> {
        check(session, sheet, &self.address)
    }

    /// Log the verdict; on failure append `row` to the failure stream,
    /// writing its header first if this is the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if the failure stream cannot be written.
    pub fn record(
        &mut self,
        log: &RunLog,
        scenario: usize,
        verdict: &Verdict,
        row: &[String],
    ) -> Result<(), RecordError> {
        match verdict {
            Verdict::Pass => {
                log.qc_pass(scenario);
                Ok(())
            }
            Verdict::Fail { observed } => {
                log.qc_failure(scenario, observed);
                if self.failures.ensure_header()? {
                    log.info(format_args!(
                        "Created failure stream {}",
                        self.failures.path().display()
                    ));
                }
                self.failures.append_row(row)?;
                self.failed.push(scenario);
                Ok(())
            }
        }
    }

    /// Scenario numbers that failed QC so far, in order.
    #[must_use]
    pub fn failed(&self) -> &[usize] {
        &self.failed
    }

    #[must_use]
    pub fn failure_stream(&self) -> &OutputStream {
        &self.failures
    }
}
