//! REA scenario batch core
//!
//! Drives a stateful calculation model across a table of scenarios: binds
//! each row onto default parameters, goal-seeks the annual reintroduction
//! count that balances losses and gains, rounds it up, and records inputs,
//! outputs and the model's QC verdict to durable CSV streams.

pub mod binder;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod numeric;
pub mod orchestrator;
pub mod qc;
pub mod recorder;
pub mod result;
pub mod scenario;
pub mod solver;
pub mod workbook;

// Re-export commonly used types
pub use binder::{ParameterSet, bind};
pub use config::{ConfigError, GoalSeekSettings, RunConfig};
pub use engine::{
    CellData, CellValue, Engine, EngineError, EngineSession, GoalSeekOutcome, SessionGuard,
    SheetHandle,
};
pub use error::{RunError, ScenarioStep};
pub use logging::RunLog;
pub use orchestrator::{
    FAILURE_STREAM_FILE, MAIN_STREAM_FILE, NoProgress, Orchestrator, ProgressObserver, RunPaths,
    RunSummary, run_paths,
};
pub use qc::{QcGate, Verdict};
pub use recorder::{OutputStream, RecordError, append_row, ensure_header};
pub use result::{ResultSchema, ScenarioResult};
pub use scenario::{InputFormatError, ScenarioRecord, ScenarioSource};
pub use solver::{Equilibrium, EquilibriumSolver, SolveError};
pub use workbook::{GoalSeekLimits, WorkbookEngine, WorkbookSession};
