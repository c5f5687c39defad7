//! Formula evaluation over a workbook snapshot.

use std::collections::HashMap;
use std::fmt;

use crate::engine::{CellAddr, CellValue, EngineError};

use super::formula::{BinaryOp, Expr, UnaryOp};

/// Spreadsheet error codes a formula can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Div0,
    Value,
    Ref,
    Name,
    Num,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Div0 => "#DIV/0!",
            Self::Value => "#VALUE!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Num => "#NUM!",
        })
    }
}

/// Computed cell value. Errors are values, like in a spreadsheet.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
    Blank,
    Error(ErrorCode),
}

impl Value {
    fn to_number(&self) -> Result<f64, ErrorCode> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Blank => Ok(0.0),
            Self::Text(s) => s.trim().parse::<f64>().map_err(|_| ErrorCode::Value),
            Self::Error(e) => Err(*e),
        }
    }

    fn to_bool(&self) -> Result<bool, ErrorCode> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Number(n) => Ok(*n != 0.0),
            Self::Blank => Ok(false),
            Self::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
            Self::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
            Self::Text(_) => Err(ErrorCode::Value),
            Self::Error(e) => Err(*e),
        }
    }

    fn to_text(&self) -> Result<String, ErrorCode> {
        match self {
            Self::Error(e) => Err(*e),
            other => Ok(CellValue::from(other.clone()).to_string()),
        }
    }
}

impl From<CellValue> for Value {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Number(n) => Self::Number(n),
            CellValue::Text(s) => Self::Text(s),
            CellValue::Bool(b) => Self::Bool(b),
            CellValue::Blank => Self::Blank,
        }
    }
}

impl From<Value> for CellValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(n) => Self::Number(n),
            Value::Text(s) => Self::Text(s),
            Value::Bool(b) => Self::Bool(b),
            Value::Blank => Self::Blank,
            Value::Error(e) => Self::Text(e.to_string()),
        }
    }
}

fn number(result: Result<f64, ErrorCode>) -> Value {
    match result {
        Ok(n) if n.is_finite() => Value::Number(n),
        Ok(_) => Value::Error(ErrorCode::Num),
        Err(e) => Value::Error(e),
    }
}

/// Read access the evaluator needs from the workbook.
pub(crate) trait CellLookup {
    /// Index of the sheet called `name`, case-insensitively.
    fn sheet_index(&self, name: &str) -> Option<usize>;

    /// Value of a cell, evaluating formulas on demand. Only cycles are fatal.
    fn value_at(&mut self, sheet: usize, addr: CellAddr) -> Result<Value, EngineError>;
}

type EvalResult = Result<Value, EngineError>;

/// Evaluate `expr` on behalf of a cell living on sheet `home`.
pub(crate) fn evaluate<L: CellLookup>(lookup: &mut L, home: usize, expr: &Expr) -> EvalResult {
    Ok(match expr {
        Expr::Number(n) => Value::Number(*n),
        Expr::Text(s) => Value::Text(s.clone()),
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Cell { sheet, addr } => match resolve_sheet(lookup, home, sheet.as_deref()) {
            Some(index) => lookup.value_at(index, *addr)?,
            None => Value::Error(ErrorCode::Ref),
        },
        // A bare range outside a function argument has no scalar meaning.
        Expr::Range { .. } => Value::Error(ErrorCode::Value),
        Expr::Unary(op, inner) => {
            let value = evaluate(lookup, home, inner)?;
            number(value.to_number().map(|n| match op {
                UnaryOp::Neg => -n,
                UnaryOp::Plus => n,
            }))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = evaluate(lookup, home, lhs)?;
            let rhs = evaluate(lookup, home, rhs)?;
            binary(*op, &lhs, &rhs)
        }
        Expr::Call(name, args) => call(lookup, home, name, args)?,
    })
}

fn resolve_sheet<L: CellLookup>(lookup: &L, home: usize, sheet: Option<&str>) -> Option<usize> {
    match sheet {
        Some(name) => lookup.sheet_index(name),
        None => Some(home),
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    let arith = |f: fn(f64, f64) -> Result<f64, ErrorCode>| {
        number(lhs.to_number().and_then(|a| rhs.to_number().and_then(|b| f(a, b))))
    };
    match op {
        BinaryOp::Add => arith(|a, b| Ok(a + b)),
        BinaryOp::Sub => arith(|a, b| Ok(a - b)),
        BinaryOp::Mul => arith(|a, b| Ok(a * b)),
        BinaryOp::Div => arith(|a, b| if b == 0.0 { Err(ErrorCode::Div0) } else { Ok(a / b) }),
        BinaryOp::Pow => arith(|a, b| Ok(a.powf(b))),
        BinaryOp::Concat => match (lhs.to_text(), rhs.to_text()) {
            (Ok(a), Ok(b)) => Value::Text(a + &b),
            (Err(e), _) | (_, Err(e)) => Value::Error(e),
        },
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge => match compare(lhs, rhs) {
            Ok(ordering) => Value::Bool(match op {
                BinaryOp::Eq => ordering.is_eq(),
                BinaryOp::Ne => ordering.is_ne(),
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }),
            Err(e) => Value::Error(e),
        },
    }
}

/// Spreadsheet ordering: numbers < text < booleans; text compares
/// case-insensitively; a blank takes the type of the other operand.
fn compare(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, ErrorCode> {
    use std::cmp::Ordering;

    fn rank(value: &Value) -> u8 {
        match value {
            Value::Number(_) | Value::Blank => 0,
            Value::Text(_) => 1,
            Value::Bool(_) => 2,
            Value::Error(_) => 3,
        }
    }

    let normalise = |value: &Value, other: &Value| match (value, other) {
        (Value::Blank, Value::Text(_)) => Value::Text(String::new()),
        (Value::Blank, Value::Bool(_)) => Value::Bool(false),
        (v, _) => v.clone(),
    };

    match (lhs, rhs) {
        (Value::Error(e), _) | (_, Value::Error(e)) => return Err(*e),
        _ => {}
    }
    let a = normalise(lhs, rhs);
    let b = normalise(rhs, lhs);
    Ok(match (&a, &b) {
        (Value::Text(x), Value::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) if rank(x) == 0 && rank(y) == 0 => {
            let x = x.to_number().unwrap_or(0.0);
            let y = y.to_number().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (x, y) => rank(x).cmp(&rank(y)),
    })
}

/// An argument after range expansion. Range members are skipped by the
/// aggregate functions when they are not numbers; direct arguments are coerced.
enum Arg {
    Direct(Value),
    Range(Vec<Value>),
}

fn expand_args<L: CellLookup>(
    lookup: &mut L,
    home: usize,
    args: &[Expr],
) -> Result<Vec<Arg>, EngineError> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        if let Expr::Range { sheet, range } = arg {
            let Some(index) = resolve_sheet(lookup, home, sheet.as_deref()) else {
                out.push(Arg::Direct(Value::Error(ErrorCode::Ref)));
                continue;
            };
            let mut values = Vec::new();
            for addr in range.cells() {
                values.push(lookup.value_at(index, addr)?);
            }
            out.push(Arg::Range(values));
        } else {
            out.push(Arg::Direct(evaluate(lookup, home, arg)?));
        }
    }
    Ok(out)
}

/// Numbers for SUM/MIN/MAX/AVERAGE/COUNT semantics.
fn collect_numbers(args: &[Arg], coerce_direct: bool) -> Result<Vec<f64>, ErrorCode> {
    let mut numbers = Vec::new();
    for arg in args {
        match arg {
            Arg::Direct(Value::Error(e)) => return Err(*e),
            Arg::Direct(value) if coerce_direct => numbers.push(value.to_number()?),
            Arg::Direct(Value::Number(n)) => numbers.push(*n),
            Arg::Direct(_) => {}
            Arg::Range(values) => {
                for value in values {
                    match value {
                        Value::Number(n) => numbers.push(*n),
                        Value::Error(e) if coerce_direct => return Err(*e),
                        _ => {}
                    }
                }
            }
        }
    }
    Ok(numbers)
}

fn scalar_args(args: &[Arg]) -> Vec<Value> {
    args.iter()
        .map(|arg| match arg {
            Arg::Direct(value) => value.clone(),
            Arg::Range(_) => Value::Error(ErrorCode::Value),
        })
        .collect()
}

fn call<L: CellLookup>(lookup: &mut L, home: usize, name: &str, args: &[Expr]) -> EvalResult {
    // IF evaluates only the branch it takes.
    if name == "IF" {
        if !(2..=3).contains(&args.len()) {
            return Ok(Value::Error(ErrorCode::Value));
        }
        let condition = evaluate(lookup, home, &args[0])?;
        return Ok(match condition.to_bool() {
            Ok(true) => evaluate(lookup, home, &args[1])?,
            Ok(false) => match args.get(2) {
                Some(otherwise) => evaluate(lookup, home, otherwise)?,
                None => Value::Bool(false),
            },
            Err(e) => Value::Error(e),
        });
    }

    let expanded = expand_args(lookup, home, args)?;
    Ok(match name {
        "SUM" => number(collect_numbers(&expanded, true).map(|ns| ns.iter().sum())),
        "MIN" => number(
            collect_numbers(&expanded, true)
                .map(|ns| ns.into_iter().reduce(f64::min).unwrap_or(0.0)),
        ),
        "MAX" => number(
            collect_numbers(&expanded, true)
                .map(|ns| ns.into_iter().reduce(f64::max).unwrap_or(0.0)),
        ),
        "AVERAGE" => number(collect_numbers(&expanded, true).and_then(|ns| {
            if ns.is_empty() {
                Err(ErrorCode::Div0)
            } else {
                #[allow(clippy::cast_precision_loss)]
                let count = ns.len() as f64;
                Ok(ns.iter().sum::<f64>() / count)
            }
        })),
        "COUNT" => {
            #[allow(clippy::cast_precision_loss)]
            let count = collect_numbers(&expanded, false).map_or(0, |ns| ns.len()) as f64;
            Value::Number(count)
        }
        "AND" | "OR" => logical(name == "AND", &expanded),
        "NOT" => unary_fn(&expanded, |v| v.to_bool().map(|b| Value::Bool(!b))),
        "ABS" => unary_fn(&expanded, |v| Ok(number(v.to_number().map(f64::abs)))),
        "EXP" => unary_fn(&expanded, |v| Ok(number(v.to_number().map(f64::exp)))),
        "LN" => unary_fn(&expanded, |v| {
            let n = v.to_number()?;
            Ok(if n <= 0.0 {
                Value::Error(ErrorCode::Num)
            } else {
                number(Ok(n.ln()))
            })
        }),
        "SQRT" => unary_fn(&expanded, |v| {
            let n = v.to_number()?;
            Ok(if n < 0.0 {
                Value::Error(ErrorCode::Num)
            } else {
                number(Ok(n.sqrt()))
            })
        }),
        "POWER" => binary_fn(&expanded, |a, b| Ok(a.powf(b))),
        "ROUND" => binary_fn(&expanded, |a, d| Ok(round_digits(a, d, f64::round))),
        "ROUNDUP" => binary_fn(&expanded, |a, d| {
            Ok(round_digits(a, d, |x| x.abs().ceil().copysign(x)))
        }),
        "ROUNDDOWN" => binary_fn(&expanded, |a, d| Ok(round_digits(a, d, f64::trunc))),
        _ => Value::Error(ErrorCode::Name),
    })
}

fn logical(all: bool, args: &[Arg]) -> Value {
    let mut seen = false;
    let mut acc = all;
    for arg in args {
        let values: Vec<Value> = match arg {
            Arg::Direct(v) => vec![v.clone()],
            Arg::Range(vs) => vs
                .iter()
                .filter(|v| matches!(v, Value::Number(_) | Value::Bool(_) | Value::Error(_)))
                .cloned()
                .collect(),
        };
        for value in values {
            match value.to_bool() {
                Ok(b) => {
                    seen = true;
                    acc = if all { acc && b } else { acc || b };
                }
                Err(e) => return Value::Error(e),
            }
        }
    }
    if seen {
        Value::Bool(acc)
    } else {
        Value::Error(ErrorCode::Value)
    }
}

fn unary_fn(args: &[Arg], f: impl Fn(&Value) -> Result<Value, ErrorCode>) -> Value {
    match scalar_args(args).as_slice() {
        [value] => f(value).unwrap_or_else(Value::Error),
        _ => Value::Error(ErrorCode::Value),
    }
}

fn binary_fn(args: &[Arg], f: impl Fn(f64, f64) -> Result<f64, ErrorCode>) -> Value {
    match scalar_args(args).as_slice() {
        [a, b] => number(a.to_number().and_then(|a| b.to_number().and_then(|b| f(a, b)))),
        _ => Value::Error(ErrorCode::Value),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn round_digits(value: f64, digits: f64, f: impl Fn(f64) -> f64) -> f64 {
    let factor = 10f64.powi(digits.trunc() as i32);
    let rounded = significant(f(significant(value * factor)) / factor);
    if rounded == 0.0 { 0.0 } else { rounded }
}

/// Trim to 15 significant digits, so 2.675 * 100 rounds as 267.5.
fn significant(value: f64) -> f64 {
    format!("{value:.14e}").parse::<f64>().unwrap_or(value)
}

/// Per-recalculation memo: finished values plus the cells currently being
/// evaluated, for cycle detection.
#[derive(Debug, Default)]
pub(crate) struct RecalcState {
    pub done: HashMap<(usize, CellAddr), Value>,
    pub in_progress: Vec<(usize, CellAddr)>,
}
