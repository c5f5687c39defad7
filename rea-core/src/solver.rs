//! Equilibrium search for the annual reintroduction count.

use thiserror::Error;

use crate::config::RunConfig;
use crate::engine::{CellValue, EngineError, EngineSession, GoalSeekOutcome, SheetHandle};
use crate::logging::RunLog;
use crate::numeric::{ceil_count, round_to_precision};

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("goal seek of {goal} by changing {changing} failed: {source}")]
    GoalSeek {
        goal: String,
        changing: String,
        #[source]
        source: EngineError,
    },
    #[error("reading back {cell} failed: {source}")]
    ReadBack {
        cell: String,
        #[source]
        source: EngineError,
    },
    #[error("{cell} holds non-numeric `{value}` after goal seek")]
    NonNumeric { cell: String, value: String },
    #[error("writing rounded value to {cell} failed: {source}")]
    WriteBack {
        cell: String,
        #[source]
        source: EngineError,
    },
    #[error("recalculation after write-back failed: {0}")]
    Recalculate(#[source] EngineError),
}

/// Solved reintroduction quantity for one scenario.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equilibrium {
    /// Goal-seek result at the configured precision.
    pub exact: f64,
    /// `ceil(exact)`: the count actually written back to the model.
    pub rounded: i64,
    pub outcome: GoalSeekOutcome,
}

#[derive(Debug, Clone)]
pub struct EquilibriumSolver {
    goal_cell: String,
    changing_cell: String,
    target: f64,
    precision: u32,
}

impl EquilibriumSolver {
    #[must_use]
    pub fn new(
        goal_cell: impl Into<String>,
        changing_cell: impl Into<String>,
        target: f64,
        precision: u32,
    ) -> Self {
        Self {
            goal_cell: goal_cell.into(),
            changing_cell: changing_cell.into(),
            target,
            precision,
        }
    }

    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            config.loss_ratio_cell.clone(),
            config.reintroduction_cell.clone(),
            config.goal_seek.target_value,
            config.result_decimal_precision,
        )
    }

    /// Goal-seek and read back the exact value. The model is left holding
    /// the fractional solution.
    ///
    /// # Errors
    ///
    /// Returns [`SolveError`] if the engine cannot seek or the changing
    /// cell does not read back as a number.
    pub fn find<S: EngineSession + ?Sized>(
        &self,
        session: &mut S,
        sheet: &SheetHandle,
        log: &RunLog,
    ) -> Result<Equilibrium, SolveError> {
        let outcome = session
            .goal_seek(sheet, &self.goal_cell, &self.changing_cell, self.target)
            .map_err(|source| SolveError::GoalSeek {
                goal: self.goal_cell.clone(),
                changing: self.changing_cell.clone(),
                source,
            })?;
        if !outcome.converged {
            log.warn(format_args!(
                "Goal seek on {} did not converge after {} iterations (goal reads {})",
                self.goal_cell, outcome.iterations, outcome.goal_value
            ));
        }

        let data = session
            .get_cell(sheet, &self.changing_cell)
            .map_err(|source| SolveError::ReadBack {
                cell: self.changing_cell.clone(),
                source,
            })?;
        let raw = data
            .as_scalar()
            .and_then(CellValue::as_number)
            .filter(|v| v.is_finite())
            .ok_or_else(|| SolveError::NonNumeric {
                cell: self.changing_cell.clone(),
                value: data.to_field(),
            })?;

        let exact = round_to_precision(raw, self.precision);
        Ok(Equilibrium {
            exact,
            rounded: ceil_count(exact),
            outcome,
        })
    }

    /// Write the rounded count back and recalculate, so every dependent
    /// output reflects a whole number of reintroductions.
    ///
    /// # Errors
    ///
    /// Returns [`SolveError`] if the write or the recalculation fails.
    pub fn apply<S: EngineSession + ?Sized>(
        &self,
        session: &mut S,
        sheet: &SheetHandle,
        equilibrium: &Equilibrium,
    ) -> Result<(), SolveError> {
        #[allow(clippy::cast_precision_loss)]
        let rounded = equilibrium.rounded as f64;
        session
            .set_cell(sheet, &self.changing_cell, CellValue::Number(rounded))
            .map_err(|source| SolveError::WriteBack {
                cell: self.changing_cell.clone(),
                source,
            })?;
        session.recalculate().map_err(SolveError::Recalculate)
    }

    /// [`find`](Self::find) followed by [`apply`](Self::apply).
    ///
    /// # Errors
    ///
    /// See both steps.
    pub fn solve<S: EngineSession + ?Sized>(
        &self,
        session: &mut S,
        sheet: &SheetHandle,
        log: &RunLog,
    ) -> Result<Equilibrium, SolveError> {
        let equilibrium = self.find(session, sheet, log)?;
        self.apply(session, sheet, &equilibrium)?;
        Ok(equilibrium)
    }
}
