//! Calculation engine boundary.
//!
//! The orchestrator only ever talks to a model through [`Engine`] and
//! [`EngineSession`]. A backend may be a spreadsheet host, the native
//! [`crate::workbook`] evaluator, or a scripted test double.

pub mod address;

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use address::{AddressError, CellAddr, RangeAddr, column_name};

/// Scalar cell content as seen across the engine boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Blank,
}

impl CellValue {
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Field form used inside list renderings: text is quoted, blanks are `null`.
    fn to_list_item(&self) -> String {
        match self {
            Self::Text(s) => serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\"")),
            Self::Blank => "null".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Bool(true) => f.write_str("TRUE"),
            Self::Bool(false) => f.write_str("FALSE"),
            Self::Blank => Ok(()),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Result of reading an address: one cell, a single row/column, or a block.
#[derive(Debug, Clone, PartialEq)]
pub enum CellData {
    Scalar(CellValue),
    List(Vec<CellValue>),
    Grid(Vec<Vec<CellValue>>),
}

impl CellData {
    /// Shape a row-major block of values the way a spreadsheet host returns them.
    #[must_use]
    pub fn from_block(range: RangeAddr, mut values: Vec<CellValue>) -> Self {
        if range.is_single_cell() {
            return Self::Scalar(values.pop().unwrap_or(CellValue::Blank));
        }
        if range.height() == 1 || range.width() == 1 {
            return Self::List(values);
        }
        let width = usize::try_from(range.width()).unwrap_or(1);
        let mut rows = Vec::with_capacity(values.len() / width.max(1));
        let mut iter = values.into_iter();
        loop {
            let row: Vec<CellValue> = iter.by_ref().take(width).collect();
            if row.is_empty() {
                break;
            }
            rows.push(row);
        }
        Self::Grid(rows)
    }

    #[must_use]
    pub const fn as_scalar(&self) -> Option<&CellValue> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Apply `f` to every numeric value, leaving text, booleans and blanks untouched.
    #[must_use]
    pub fn map_numbers(self, f: impl Fn(f64) -> f64 + Copy) -> Self {
        let map = |value: CellValue| match value {
            CellValue::Number(v) => CellValue::Number(f(v)),
            other => other,
        };
        match self {
            Self::Scalar(v) => Self::Scalar(map(v)),
            Self::List(items) => Self::List(items.into_iter().map(map).collect()),
            Self::Grid(rows) => Self::Grid(
                rows.into_iter()
                    .map(|row| row.into_iter().map(map).collect())
                    .collect(),
            ),
        }
    }

    /// Render as a single CSV field. Ranges become bracketed lists.
    #[must_use]
    pub fn to_field(&self) -> String {
        fn list(items: &[CellValue]) -> String {
            let parts: Vec<String> = items.iter().map(CellValue::to_list_item).collect();
            format!("[{}]", parts.join(", "))
        }

        match self {
            Self::Scalar(v) => v.to_string(),
            Self::List(items) => list(items),
            Self::Grid(rows) => {
                let parts: Vec<String> = rows.iter().map(|row| list(row)).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }
}

/// Handle to a worksheet inside an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetHandle {
    pub name: String,
    pub index: usize,
}

/// What the engine's goal-seek reports back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalSeekOutcome {
    /// Final value left in the changing cell.
    pub solution: f64,
    /// Goal cell value at `solution`.
    pub goal_value: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to open model {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("sheet `{0}` not found in workbook")]
    SheetNotFound(String),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("`{0}` must address a single cell")]
    NotSingleCell(String),
    #[error("cell {address} holds non-numeric value `{value}`")]
    NonNumeric { address: String, value: String },
    #[error("circular reference through {0}")]
    CircularReference(String),
    #[error("formula error in {address}: {message}")]
    Formula { address: String, message: String },
    #[error("engine session is already closed")]
    SessionClosed,
    #[error("engine backend failure: {0}")]
    Backend(String),
}

/// A model backend capable of opening sessions.
pub trait Engine {
    type Session: EngineSession;

    /// Open the model at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Open`] when the model cannot be loaded.
    fn open(&self, path: &Path) -> Result<Self::Session, EngineError>;
}

/// One live, stateful model session. Every call may mutate shared engine
/// state, so sessions are driven through `&mut` from a single owner.
pub trait EngineSession {
    /// Resolve a worksheet by name.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SheetNotFound`] if the sheet does not exist.
    fn sheet(&mut self, name: &str) -> Result<SheetHandle, EngineError>;

    /// Write a scalar into a single cell.
    ///
    /// # Errors
    ///
    /// Fails on malformed addresses or a closed session.
    fn set_cell(
        &mut self,
        sheet: &SheetHandle,
        address: &str,
        value: CellValue,
    ) -> Result<(), EngineError>;

    /// Read a cell or a 1D/2D range.
    ///
    /// # Errors
    ///
    /// Fails on malformed addresses or a closed session.
    fn get_cell(&mut self, sheet: &SheetHandle, address: &str) -> Result<CellData, EngineError>;

    /// Re-evaluate every formula in the model.
    ///
    /// # Errors
    ///
    /// Fails if the model cannot be evaluated (e.g. circular references).
    fn recalculate(&mut self) -> Result<(), EngineError>;

    /// Drive `goal` to `target` by changing `changing`. The engine owns the
    /// algorithm and tolerance; a non-converged outcome is not an error.
    ///
    /// # Errors
    ///
    /// Fails when either cell is unusable (bad address, non-numeric goal).
    fn goal_seek(
        &mut self,
        sheet: &SheetHandle,
        goal: &str,
        changing: &str,
        target: f64,
    ) -> Result<GoalSeekOutcome, EngineError>;

    /// Release the session. Called exactly once by [`SessionGuard`].
    ///
    /// # Errors
    ///
    /// Returns a backend error if teardown fails.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// Scoped ownership of an open session: closes on drop unless
/// [`SessionGuard::close`] already did.
pub struct SessionGuard<S: EngineSession> {
    session: S,
    source: PathBuf,
    closed: bool,
}

impl<S: EngineSession> SessionGuard<S> {
    /// Open `path` with `engine` and take ownership of the session.
    ///
    /// # Errors
    ///
    /// Propagates the backend's open failure.
    pub fn open<E>(engine: &E, path: &Path) -> Result<Self, EngineError>
    where
        E: Engine<Session = S>,
    {
        let session = engine.open(path)?;
        Ok(Self {
            session,
            source: path.to_path_buf(),
            closed: false,
        })
    }

    /// Close now and report teardown errors to the caller.
    ///
    /// # Errors
    ///
    /// Returns the backend's close failure.
    pub fn close(mut self) -> Result<(), EngineError> {
        self.closed = true;
        self.session.close()
    }
}

impl<S: EngineSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: EngineSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: EngineSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.session.close() {
            log::warn!(target: "rea::main", "closing {} failed: {err}", self.source.display());
        } else {
            log::info!(target: "rea::main", "Closed engine session for {}", self.source.display());
        }
    }
}
