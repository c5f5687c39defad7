//! Native workbook backend.
//!
//! A model is a JSON document of sheets whose cells hold numbers, text,
//! booleans or `=` formulas:
//!
//! ```json
//! {"sheets": [{"name": "I-O", "cells": {"B2": 500, "E4": "=E3/E2"}}]}
//! ```
//!
//! Calculation is manual: writes take effect on formulas only after
//! [`EngineSession::recalculate`], as with a spreadsheet host whose
//! calculation mode is set to manual.

pub mod eval;
pub mod formula;
pub mod goal_seek;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::engine::{
    CellAddr, CellData, CellValue, Engine, EngineError, EngineSession, GoalSeekOutcome, RangeAddr,
    SheetHandle,
};

use eval::{CellLookup, RecalcState, Value, evaluate};
use formula::{Expr, parse_formula};
pub use goal_seek::GoalSeekLimits;

#[derive(Debug, Deserialize)]
struct WorkbookFile {
    sheets: Vec<SheetFile>,
}

#[derive(Debug, Deserialize)]
struct SheetFile {
    name: String,
    #[serde(default)]
    cells: IndexMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
enum Cell {
    Literal(CellValue),
    Formula(Expr),
}

#[derive(Debug)]
struct Sheet {
    name: String,
    cells: HashMap<CellAddr, Cell>,
}

/// Sheets plus the formula results of the last recalculation.
#[derive(Debug)]
struct Workbook {
    sheets: Vec<Sheet>,
    computed: HashMap<(usize, CellAddr), Value>,
}

impl Workbook {
    fn from_json_str(text: &str) -> Result<Self, String> {
        let file: WorkbookFile =
            serde_json::from_str(text).map_err(|e| format!("invalid workbook JSON: {e}"))?;
        let mut sheets: Vec<Sheet> = Vec::with_capacity(file.sheets.len());
        for raw in file.sheets {
            if sheets.iter().any(|s| s.name.eq_ignore_ascii_case(&raw.name)) {
                return Err(format!("duplicate sheet `{}`", raw.name));
            }
            let mut cells = HashMap::with_capacity(raw.cells.len());
            for (key, value) in raw.cells {
                let addr = CellAddr::parse(&key)
                    .map_err(|e| format!("sheet `{}` cell `{key}`: {e}", raw.name))?;
                let cell = parse_cell(&value)
                    .map_err(|e| format!("sheet `{}` cell {addr}: {e}", raw.name))?;
                cells.insert(addr, cell);
            }
            sheets.push(Sheet {
                name: raw.name,
                cells,
            });
        }
        Ok(Self {
            sheets,
            computed: HashMap::new(),
        })
    }

    fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    fn sheet_name(&self, index: usize) -> &str {
        self.sheets.get(index).map_or("?", |s| s.name.as_str())
    }

    /// Resolve an address that may carry its own `Sheet!` qualifier.
    fn locate(
        &self,
        sheet: &SheetHandle,
        address: &str,
    ) -> Result<(usize, RangeAddr), EngineError> {
        let (index, local) = match address.rsplit_once('!') {
            Some((name, local)) => {
                let name = name.trim_matches('\'');
                let index = self
                    .sheet_index(name)
                    .ok_or_else(|| EngineError::SheetNotFound(name.to_string()))?;
                (index, local)
            }
            None => {
                if self.sheets.get(sheet.index).is_none() {
                    return Err(EngineError::SheetNotFound(sheet.name.clone()));
                }
                (sheet.index, address)
            }
        };
        Ok((index, RangeAddr::parse(local)?))
    }

    fn locate_cell(
        &self,
        sheet: &SheetHandle,
        address: &str,
    ) -> Result<(usize, CellAddr), EngineError> {
        let (index, range) = self.locate(sheet, address)?;
        if !range.is_single_cell() {
            return Err(EngineError::NotSingleCell(address.to_string()));
        }
        Ok((index, range.start))
    }

    fn cell(&self, sheet: usize, addr: CellAddr) -> Option<&Cell> {
        self.sheets.get(sheet).and_then(|s| s.cells.get(&addr))
    }

    /// Overwrite a cell with a constant. A formula there is replaced.
    fn set_literal(&mut self, sheet: usize, addr: CellAddr, value: CellValue) {
        if let Some(s) = self.sheets.get_mut(sheet) {
            s.cells.insert(addr, Cell::Literal(value));
            self.computed.remove(&(sheet, addr));
        }
    }

    /// Current value: constants as written, formulas as of the last recalculation.
    fn read(&self, sheet: usize, addr: CellAddr) -> CellValue {
        match self.cell(sheet, addr) {
            None => CellValue::Blank,
            Some(Cell::Literal(value)) => value.clone(),
            Some(Cell::Formula(_)) => self
                .computed
                .get(&(sheet, addr))
                .cloned()
                .map_or(CellValue::Blank, CellValue::from),
        }
    }

    fn recalculate(&mut self) -> Result<(), EngineError> {
        let formulas: Vec<(usize, CellAddr)> = self
            .sheets
            .iter()
            .enumerate()
            .flat_map(|(index, sheet)| {
                sheet
                    .cells
                    .iter()
                    .filter(|(_, cell)| matches!(cell, Cell::Formula(_)))
                    .map(move |(addr, _)| (index, *addr))
            })
            .collect();

        let mut pass = Recalc {
            workbook: self,
            state: RecalcState::default(),
        };
        for (sheet, addr) in formulas {
            pass.value_at(sheet, addr)?;
        }
        let done = pass.state.done;
        self.computed = done;
        Ok(())
    }
}

fn parse_cell(value: &serde_json::Value) -> Result<Cell, String> {
    use serde_json::Value as Json;

    Ok(match value {
        Json::Null => Cell::Literal(CellValue::Blank),
        Json::Bool(b) => Cell::Literal(CellValue::Bool(*b)),
        Json::Number(n) => Cell::Literal(CellValue::Number(
            n.as_f64().ok_or_else(|| format!("number {n} is out of range"))?,
        )),
        Json::String(s) if s.starts_with('=') => {
            Cell::Formula(parse_formula(s).map_err(|e| format!("`{s}`: {e}"))?)
        }
        Json::String(s) => Cell::Literal(CellValue::Text(s.clone())),
        Json::Array(_) | Json::Object(_) => {
            return Err("cells must hold a number, string, boolean or null".to_string());
        }
    })
}

/// One full recalculation pass with memoised formula results.
struct Recalc<'a> {
    workbook: &'a Workbook,
    state: RecalcState,
}

impl CellLookup for Recalc<'_> {
    fn sheet_index(&self, name: &str) -> Option<usize> {
        self.workbook.sheet_index(name)
    }

    fn value_at(&mut self, sheet: usize, addr: CellAddr) -> Result<Value, EngineError> {
        let workbook = self.workbook;
        match workbook.cell(sheet, addr) {
            None => Ok(Value::Blank),
            Some(Cell::Literal(value)) => Ok(Value::from(value.clone())),
            Some(Cell::Formula(expr)) => {
                let key = (sheet, addr);
                if let Some(value) = self.state.done.get(&key) {
                    return Ok(value.clone());
                }
                if self.state.in_progress.contains(&key) {
                    return Err(EngineError::CircularReference(format!(
                        "{}!{addr}",
                        workbook.sheet_name(sheet)
                    )));
                }
                self.state.in_progress.push(key);
                let value = evaluate(self, sheet, expr)?;
                self.state.in_progress.pop();
                self.state.done.insert(key, value.clone());
                Ok(value)
            }
        }
    }
}

/// Opens JSON workbooks as [`WorkbookSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkbookEngine {
    limits: GoalSeekLimits,
}

impl WorkbookEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_goal_seek_limits(limits: GoalSeekLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub const fn goal_seek_limits(&self) -> GoalSeekLimits {
        self.limits
    }
}

impl Engine for WorkbookEngine {
    type Session = WorkbookSession;

    fn open(&self, path: &Path) -> Result<WorkbookSession, EngineError> {
        let open_error = |reason: String| EngineError::Open {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| open_error(e.to_string()))?;
        WorkbookSession::from_json_str(&text, self.limits).map_err(|err| match err {
            EngineError::Open { reason, .. } => open_error(reason),
            other => open_error(other.to_string()),
        })
    }
}

/// A loaded workbook. `None` once closed.
#[derive(Debug)]
pub struct WorkbookSession {
    workbook: Option<Workbook>,
    limits: GoalSeekLimits,
}

impl WorkbookSession {
    /// Load a workbook from JSON text and run the initial recalculation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Open`] for malformed documents or formulas,
    /// and [`EngineError::CircularReference`] if the model has a cycle.
    pub fn from_json_str(text: &str, limits: GoalSeekLimits) -> Result<Self, EngineError> {
        let mut workbook = Workbook::from_json_str(text).map_err(|reason| EngineError::Open {
            path: "<inline>".into(),
            reason,
        })?;
        workbook.recalculate()?;
        Ok(Self {
            workbook: Some(workbook),
            limits,
        })
    }

    fn workbook(&mut self) -> Result<&mut Workbook, EngineError> {
        self.workbook.as_mut().ok_or(EngineError::SessionClosed)
    }
}

impl EngineSession for WorkbookSession {
    fn sheet(&mut self, name: &str) -> Result<SheetHandle, EngineError> {
        let workbook = self.workbook()?;
        let index = workbook
            .sheet_index(name)
            .ok_or_else(|| EngineError::SheetNotFound(name.to_string()))?;
        Ok(SheetHandle {
            name: workbook.sheet_name(index).to_string(),
            index,
        })
    }

    fn set_cell(
        &mut self,
        sheet: &SheetHandle,
        address: &str,
        value: CellValue,
    ) -> Result<(), EngineError> {
        let workbook = self.workbook()?;
        let (index, addr) = workbook.locate_cell(sheet, address)?;
        workbook.set_literal(index, addr, value);
        Ok(())
    }

    fn get_cell(&mut self, sheet: &SheetHandle, address: &str) -> Result<CellData, EngineError> {
        let workbook = self.workbook()?;
        let (index, range) = workbook.locate(sheet, address)?;
        let values = range.cells().map(|addr| workbook.read(index, addr)).collect();
        Ok(CellData::from_block(range, values))
    }

    fn recalculate(&mut self) -> Result<(), EngineError> {
        self.workbook()?.recalculate()
    }

    fn goal_seek(
        &mut self,
        sheet: &SheetHandle,
        goal: &str,
        changing: &str,
        target: f64,
    ) -> Result<GoalSeekOutcome, EngineError> {
        let limits = self.limits;
        let workbook = self.workbook()?;
        let (goal_sheet, goal_addr) = workbook.locate_cell(sheet, goal)?;
        let (changing_sheet, changing_addr) = workbook.locate_cell(sheet, changing)?;

        let start = match workbook.cell(changing_sheet, changing_addr) {
            None | Some(Cell::Literal(CellValue::Blank)) => 0.0,
            Some(Cell::Literal(CellValue::Number(n))) => *n,
            Some(Cell::Literal(other)) => {
                return Err(EngineError::NonNumeric {
                    address: changing.to_string(),
                    value: other.to_string(),
                });
            }
            Some(Cell::Formula(_)) => {
                return Err(EngineError::Formula {
                    address: changing.to_string(),
                    message: "the changing cell must hold a constant, not a formula".into(),
                });
            }
        };

        let report = goal_seek::seek(start, target, limits, |x| {
            workbook.set_literal(changing_sheet, changing_addr, CellValue::Number(x));
            workbook.recalculate()?;
            Ok(workbook.read(goal_sheet, goal_addr).as_number())
        })?;

        let Some(residual) = report.residual else {
            workbook.set_literal(changing_sheet, changing_addr, CellValue::Number(start));
            workbook.recalculate()?;
            return Err(EngineError::NonNumeric {
                address: goal.to_string(),
                value: workbook.read(goal_sheet, goal_addr).to_string(),
            });
        };

        workbook.set_literal(
            changing_sheet,
            changing_addr,
            CellValue::Number(report.solution),
        );
        workbook.recalculate()?;

        Ok(GoalSeekOutcome {
            solution: report.solution,
            goal_value: residual + target,
            iterations: report.iterations,
            converged: report.converged,
        })
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.workbook
            .take()
            .map(|_| ())
            .ok_or(EngineError::SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "sheets": [
            {"name": "I-O", "cells": {
                "B2": 500, "B3": 0.5, "B5": 1,
                "E2": "=B2*40*(1-B3)",
                "E3": "=Calc!A1*B5",
                "E4": "=E3/E2",
                "E6": "=IF(AND(E2>0, E3>0), \"PASS\", \"FAIL\")",
                "G2": "=E2/3", "G3": "=E3/3", "G4": "total"
            }},
            {"name": "Calc", "cells": {"A1": 1000}}
        ]
    }"#;

    fn session() -> (WorkbookSession, SheetHandle) {
        let mut session = WorkbookSession::from_json_str(MODEL, GoalSeekLimits::default()).unwrap();
        let sheet = session.sheet("i-o").unwrap();
        (session, sheet)
    }

    fn number(session: &mut WorkbookSession, sheet: &SheetHandle, address: &str) -> f64 {
        session
            .get_cell(sheet, address)
            .unwrap()
            .as_scalar()
            .and_then(CellValue::as_number)
            .unwrap()
    }

    #[test]
    fn loads_and_evaluates_across_sheets() {
        let (mut session, sheet) = session();
        assert_eq!(sheet.name, "I-O");
        assert_eq!(number(&mut session, &sheet, "E2"), 10_000.0);
        assert_eq!(number(&mut session, &sheet, "E3"), 1_000.0);
        assert_eq!(
            session.get_cell(&sheet, "E6").unwrap(),
            CellData::Scalar(CellValue::Text("PASS".into()))
        );
        assert_eq!(number(&mut session, &sheet, "Calc!A1"), 1_000.0);
    }

    #[test]
    fn writes_apply_only_after_recalculation() {
        let (mut session, sheet) = session();
        session.set_cell(&sheet, "B5", CellValue::Number(2.0)).unwrap();
        assert_eq!(number(&mut session, &sheet, "E3"), 1_000.0);
        session.recalculate().unwrap();
        assert_eq!(number(&mut session, &sheet, "E3"), 2_000.0);
    }

    #[test]
    fn ranges_read_as_lists() {
        let (mut session, sheet) = session();
        let data = session.get_cell(&sheet, "G2:G4").unwrap();
        let CellData::List(items) = data else {
            panic!("expected a list, got {data:?}");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[2], CellValue::Text("total".into()));
    }

    #[test]
    fn goal_seek_solves_the_ratio() {
        let (mut session, sheet) = session();
        let outcome = session.goal_seek(&sheet, "E4", "B5", 1.0).unwrap();
        assert!(outcome.converged);
        assert!((outcome.solution - 10.0).abs() < 1e-5);
        assert!((number(&mut session, &sheet, "B5") - outcome.solution).abs() < f64::EPSILON);
        assert!((number(&mut session, &sheet, "E4") - 1.0).abs() < 1e-6);
    }

    #[test]
    fn goal_seek_rejects_formula_changing_cell() {
        let (mut session, sheet) = session();
        assert!(matches!(
            session.goal_seek(&sheet, "E4", "E3", 1.0),
            Err(EngineError::Formula { .. })
        ));
    }

    #[test]
    fn circular_references_fail_recalculation() {
        let cyclic = r#"{"sheets":[{"name":"S","cells":{"A1":"=B1+1","B1":"=A1*2"}}]}"#;
        assert!(matches!(
            WorkbookSession::from_json_str(cyclic, GoalSeekLimits::default()),
            Err(EngineError::CircularReference(_))
        ));

        let (mut session, sheet) = session();
        let text = r#"{"sheets":[{"name":"S","cells":{"A1":1,"B1":"=A1*2"}}]}"#;
        let mut other = WorkbookSession::from_json_str(text, GoalSeekLimits::default()).unwrap();
        let s = other.sheet("S").unwrap();
        assert_eq!(number(&mut other, &s, "B1"), 2.0);
        assert!(session.sheet("Missing").is_err());
        assert!(session.set_cell(&sheet, "A1:B2", CellValue::Number(1.0)).is_err());
    }

    #[test]
    fn malformed_documents_fail_to_open() {
        for text in [
            "not json",
            r#"{"sheets":[{"name":"S","cells":{"ZZZZ1":1}}]}"#,
            r#"{"sheets":[{"name":"S","cells":{"A1":"=1+"}}]}"#,
            r#"{"sheets":[{"name":"S"},{"name":"s"}]}"#,
            r#"{"sheets":[{"name":"S","cells":{"A1":[1,2]}}]}"#,
        ] {
            assert!(
                matches!(
                    WorkbookSession::from_json_str(text, GoalSeekLimits::default()),
                    Err(EngineError::Open { .. })
                ),
                "{text}"
            );
        }
    }

    #[test]
    fn closed_sessions_reject_calls() {
        let (mut session, sheet) = session();
        session.close().unwrap();
        assert!(matches!(session.get_cell(&sheet, "E2"), Err(EngineError::SessionClosed)));
        assert!(matches!(session.close(), Err(EngineError::SessionClosed)));
    }

    #[test]
    fn engine_open_reports_missing_files() {
        let engine = WorkbookEngine::new();
        let missing = std::env::temp_dir().join("rea-workbook-missing.json");
        assert!(matches!(engine.open(&missing), Err(EngineError::Open { .. })));
    }
}
