use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::recorder::RecordError;
use crate::scenario::InputFormatError;

/// Stage of the per-scenario pipeline, used to locate fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioStep {
    ReadScenario,
    WriteInputs,
    Recalculate,
    Solve,
    ReadExactOutputs,
    ReadOutputs,
    QcCheck,
    RecordOutput,
    RecordFailure,
}

impl fmt::Display for ScenarioStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadScenario => "reading the scenario row",
            Self::WriteInputs => "writing inputs",
            Self::Recalculate => "recalculating",
            Self::Solve => "solving the equilibrium",
            Self::ReadExactOutputs => "reading exact outputs",
            Self::ReadOutputs => "reading outputs",
            Self::QcCheck => "reading the QC verdict",
            Self::RecordOutput => "recording the result row",
            Self::RecordFailure => "recording the QC failure",
        })
    }
}

/// Fatal run errors. A failing QC verdict is never one of these.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    InputFormat(#[from] InputFormatError),
    #[error("engine session error: {0}")]
    EngineSession(#[source] EngineError),
    #[error("scenario {scenario} failed while {step}: {source}")]
    ScenarioProcessing {
        scenario: usize,
        step: ScenarioStep,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error(transparent)]
    Record(#[from] RecordError),
}

impl RunError {
    /// Wrap a per-scenario failure with its location.
    pub fn at<E>(scenario: usize, step: ScenarioStep) -> impl FnOnce(E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        move |source| Self::ScenarioProcessing {
            scenario,
            step,
            source: source.into(),
        }
    }

    /// Scenario number for per-scenario failures.
    #[must_use]
    pub const fn scenario(&self) -> Option<usize> {
        match self {
            Self::ScenarioProcessing { scenario, .. } => Some(*scenario),
            _ => None,
        }
    }
}
