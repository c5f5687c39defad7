//! The batch loop.
//!
//! ```text
//! open session
//!   for each scenario:
//!     bind → write inputs → recalculate → goal seek → read exact outputs
//!     → write rounded count + recalculate → read outputs → read QC
//!     → append main row → append failure row (QC fail only)
//! close session
//! ```
//!
//! The session is closed on every path. The first unexpected error ends
//! the run; rows recorded before it stay on disk.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::Serialize;

use crate::binder::bind;
use crate::config::RunConfig;
use crate::engine::{
    CellData, CellValue, Engine, EngineError, EngineSession, SessionGuard, SheetHandle,
};
use crate::error::{RunError, ScenarioStep};
use crate::logging::RunLog;
use crate::numeric::round_cells;
use crate::qc::{QcGate, Verdict};
use crate::recorder::OutputStream;
use crate::result::{ResultSchema, ScenarioResult};
use crate::scenario::{ScenarioRecord, ScenarioSource};
use crate::solver::EquilibriumSolver;

pub const MAIN_STREAM_FILE: &str = "scenario_output.csv";
pub const FAILURE_STREAM_FILE: &str = "failed_scenario.csv";

/// Where a run reads its model and scenarios and writes its streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub model: PathBuf,
    pub scenarios: PathBuf,
    pub output_dir: PathBuf,
}

impl RunPaths {
    #[must_use]
    pub fn main_stream(&self) -> PathBuf {
        self.output_dir.join(MAIN_STREAM_FILE)
    }

    #[must_use]
    pub fn failure_stream(&self) -> PathBuf {
        self.output_dir.join(FAILURE_STREAM_FILE)
    }
}

/// Hooks for reporting progress as scenarios complete.
pub trait ProgressObserver {
    fn run_started(&mut self, _total: usize) {}

    fn scenario_finished(&mut self, _completed: usize, _total: usize, _verdict: &Verdict) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    /// Scenario numbers whose QC verdict was not `PASS`.
    pub qc_failures: Vec<usize>,
    /// Scenario numbers whose goal seek ended without converging.
    pub non_converged: Vec<usize>,
    pub main_stream: PathBuf,
    /// Present only if at least one scenario failed QC.
    pub failure_stream: Option<PathBuf>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Runtime as `M minutes and S seconds`.
    #[must_use]
    pub fn runtime(&self) -> String {
        format_runtime(self.elapsed)
    }
}

#[must_use]
pub fn format_runtime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{} minutes and {} seconds", secs / 60, secs % 60)
}

/// Drives one batch run against `engine`.
pub struct Orchestrator<'a, E: Engine> {
    engine: &'a E,
    config: &'a RunConfig,
    log: RunLog,
}

/// Per-run state threaded through the scenario loop.
struct Pipeline<'a> {
    config: &'a RunConfig,
    log: &'a RunLog,
    solver: EquilibriumSolver,
    main: OutputStream,
    qc: QcGate,
    non_converged: Vec<usize>,
}

impl<'a, E: Engine> Orchestrator<'a, E> {
    #[must_use]
    pub const fn new(engine: &'a E, config: &'a RunConfig, log: RunLog) -> Self {
        Self {
            engine,
            config,
            log,
        }
    }

    #[must_use]
    pub const fn log(&self) -> &RunLog {
        &self.log
    }

    /// Process every scenario in `paths.scenarios` in order.
    ///
    /// # Errors
    ///
    /// Returns the first fatal [`RunError`]. The engine session, if it was
    /// opened, is closed before returning.
    pub fn run(
        &self,
        paths: &RunPaths,
        progress: &mut dyn ProgressObserver,
    ) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let log = &self.log;
        log.info(format_args!("Starting run {}", log.run_name()));

        let source = ScenarioSource::open(
            &paths.scenarios,
            &self.config.required_columns,
            self.config.defaults.names(),
        )?;
        let total = source.len();
        log.info(format_args!(
            "Loaded {total} scenarios from {}",
            paths.scenarios.display()
        ));

        let schema = ResultSchema::from_config(self.config);
        let main = OutputStream::new(paths.main_stream(), schema.columns().to_vec());
        main.ensure_header()?;
        let failures = OutputStream::new(paths.failure_stream(), schema.into_columns());

        let mut pipeline = Pipeline {
            config: self.config,
            log,
            solver: EquilibriumSolver::from_config(self.config),
            main,
            qc: QcGate::new(self.config.qc_cell.clone(), failures),
            non_converged: Vec::new(),
        };

        let mut session =
            SessionGuard::open(self.engine, &paths.model).map_err(RunError::EngineSession)?;
        log.info(format_args!("Opened model {}", paths.model.display()));

        progress.run_started(total);
        let outcome = session
            .sheet(&self.config.input_sheet)
            .map_err(RunError::EngineSession)
            .and_then(|sheet| pipeline.run_all(&mut *session, &sheet, &source, progress));

        // Close explicitly so teardown errors surface; a failed loop wins.
        let closed = session.close();
        let completed = match outcome {
            Ok(completed) => completed,
            Err(err) => {
                if let Err(close_err) = closed {
                    log.warn(format_args!("Closing the model also failed: {close_err}"));
                }
                log.error(format_args!("Run aborted: {err}"));
                return Err(err);
            }
        };
        closed.map_err(RunError::EngineSession)?;
        log.info(format_args!("Closed model {}", paths.model.display()));

        let failure_stream = pipeline.qc.failure_stream();
        let summary = RunSummary {
            total,
            completed,
            qc_failures: pipeline.qc.failed().to_vec(),
            non_converged: pipeline.non_converged,
            main_stream: pipeline.main.path().to_path_buf(),
            failure_stream: failure_stream
                .exists()
                .then(|| failure_stream.path().to_path_buf()),
            elapsed: started.elapsed(),
        };
        log.info(format_args!(
            "Completed {completed}/{total} scenarios in {}",
            summary.runtime()
        ));
        Ok(summary)
    }
}

impl Pipeline<'_> {
    fn run_all<S: EngineSession + ?Sized>(
        &mut self,
        session: &mut S,
        sheet: &SheetHandle,
        source: &ScenarioSource,
        progress: &mut dyn ProgressObserver,
    ) -> Result<usize, RunError> {
        let total = source.len();
        let mut completed = 0;
        for (index, record) in source.iter()?.enumerate() {
            let scenario = index + 1;
            let record = record.map_err(RunError::at(scenario, ScenarioStep::ReadScenario))?;
            let verdict = self.process(session, sheet, scenario, &record)?;
            completed = scenario;
            progress.scenario_finished(completed, total, &verdict);
            self.log.info(format_args!("{completed}/{total} complete"));
        }
        Ok(completed)
    }

    fn process<S: EngineSession + ?Sized>(
        &mut self,
        session: &mut S,
        sheet: &SheetHandle,
        scenario: usize,
        record: &ScenarioRecord,
    ) -> Result<Verdict, RunError> {
        let config = self.config;
        let log = self.log;
        let parameters = bind(&config.defaults, record);
        log.detail(format_args!("Scenario {scenario} inputs"), parameters.iter());

        for (name, value) in parameters.iter() {
            let Some(address) = config.parameter_cells.get(name) else {
                return Err(RunError::at(scenario, ScenarioStep::WriteInputs)(format!(
                    "parameter `{name}` has no input cell"
                )));
            };
            session
                .set_cell(sheet, address, CellValue::Number(value))
                .map_err(RunError::at(scenario, ScenarioStep::WriteInputs))?;
        }
        session
            .recalculate()
            .map_err(RunError::at(scenario, ScenarioStep::Recalculate))?;

        let equilibrium = self
            .solver
            .find(session, sheet, log)
            .map_err(RunError::at(scenario, ScenarioStep::Solve))?;
        if !equilibrium.outcome.converged {
            self.non_converged.push(scenario);
        }

        let exact_outputs = read_cells(session, sheet, &config.exact_output_cells, config)
            .map_err(RunError::at(scenario, ScenarioStep::ReadExactOutputs))?;

        self.solver
            .apply(session, sheet, &equilibrium)
            .map_err(RunError::at(scenario, ScenarioStep::Solve))?;

        let outputs = read_cells(session, sheet, &config.output_cells, config)
            .map_err(RunError::at(scenario, ScenarioStep::ReadOutputs))?;
        log.detail(
            format_args!("Scenario {scenario} outputs"),
            outputs
                .iter()
                .chain(exact_outputs.iter())
                .map(|(name, data)| (name.as_str(), data.to_field())),
        );
        log.detail(
            format_args!("Scenario {scenario} annual reintroduction"),
            [
                ("rounded", equilibrium.rounded.to_string()),
                ("exact", equilibrium.exact.to_string()),
            ],
        );

        // Read before recording so a failed read leaves no partial row behind.
        let verdict = self
            .qc
            .inspect(session, sheet)
            .map_err(RunError::at(scenario, ScenarioStep::QcCheck))?;

        let result = ScenarioResult {
            scenario,
            parameters,
            outputs,
            exact_outputs,
            equilibrium,
        };
        let row = result.to_row();
        // The failure row goes first: if either write fails, the main
        // stream still ends at the previous scenario.
        self.qc
            .record(log, scenario, &verdict, &row)
            .map_err(RunError::at(scenario, ScenarioStep::RecordFailure))?;
        self.main
            .append_row(&row)
            .map_err(RunError::at(scenario, ScenarioStep::RecordOutput))?;

        Ok(verdict)
    }
}

/// Read and round each named cell or range.
fn read_cells<S: EngineSession + ?Sized>(
    session: &mut S,
    sheet: &SheetHandle,
    cells: &IndexMap<String, String>,
    config: &RunConfig,
) -> Result<IndexMap<String, CellData>, EngineError> {
    let mut values = IndexMap::with_capacity(cells.len());
    for (name, address) in cells {
        let data = session.get_cell(sheet, address)?;
        values.insert(name.clone(), round_cells(data, config.result_decimal_precision));
    }
    Ok(values)
}

/// Resolve `paths` for a run that reads inputs from `input_dir` and writes
/// streams into `output_dir`.
#[must_use]
pub fn run_paths(config: &RunConfig, input_dir: &Path, output_dir: &Path) -> RunPaths {
    RunPaths {
        model: input_dir.join(&config.files.rea_file),
        scenarios: input_dir.join(&config.files.input_file),
        output_dir: output_dir.to_path_buf(),
    }
}
