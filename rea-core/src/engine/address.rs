use std::fmt;

use thiserror::Error;

/// Excel's last column (`XFD`) as a 0-indexed value.
const MAX_COL: u32 = 16_383;
/// Excel's last row as a 1-indexed value.
const MAX_ROW: u32 = 1_048_576;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("invalid A1 reference `{0}`")]
    InvalidA1(String),
    #[error("column out of range in `{0}`")]
    ColumnOutOfRange(String),
    #[error("row out of range in `{0}`")]
    RowOutOfRange(String),
}

/// A single cell position. Rows and columns are 0-indexed (`A1` is `(0, 0)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddr {
    pub row: u32,
    pub col: u32,
}

impl CellAddr {
    #[must_use]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse an A1-style reference, accepting optional `$` markers (`$B$2`).
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] when the text is not a valid single-cell reference.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(AddressError::Empty);
        }

        let bytes = text.as_bytes();
        let mut idx = 0;
        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }

        let mut col: u32 = 0;
        let col_start = idx;
        while let Some(b) = bytes.get(idx).filter(|b| b.is_ascii_alphabetic()) {
            let digit = u32::from(b.to_ascii_uppercase() - b'A' + 1);
            col = col
                .checked_mul(26)
                .and_then(|v| v.checked_add(digit))
                .ok_or_else(|| AddressError::ColumnOutOfRange(text.to_string()))?;
            idx += 1;
        }
        if idx == col_start {
            return Err(AddressError::InvalidA1(text.to_string()));
        }
        if col == 0 || col - 1 > MAX_COL {
            return Err(AddressError::ColumnOutOfRange(text.to_string()));
        }

        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }
        let row_text = &text[idx..];
        if row_text.is_empty() || !row_text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AddressError::InvalidA1(text.to_string()));
        }
        let row: u32 = row_text
            .parse()
            .map_err(|_| AddressError::RowOutOfRange(text.to_string()))?;
        if row == 0 || row > MAX_ROW {
            return Err(AddressError::RowOutOfRange(text.to_string()));
        }

        Ok(Self {
            row: row - 1,
            col: col - 1,
        })
    }
}

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_name(self.col), self.row + 1)
    }
}

/// Convert a 0-indexed column to its letter form (`0` → `A`, `27` → `AB`).
#[must_use]
pub fn column_name(col: u32) -> String {
    let mut n = col + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + u8::try_from(rem).unwrap_or(0));
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// An inclusive rectangular block, normalised so `start` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeAddr {
    pub start: CellAddr,
    pub end: CellAddr,
}

impl RangeAddr {
    #[must_use]
    pub fn new(a: CellAddr, b: CellAddr) -> Self {
        Self {
            start: CellAddr::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellAddr::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    /// Parse `A1:B3` or a bare `C4` (a one-cell range).
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] if either corner is malformed.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        match input.split_once(':') {
            Some((a, b)) => Ok(Self::new(CellAddr::parse(a)?, CellAddr::parse(b)?)),
            None => {
                let cell = CellAddr::parse(input)?;
                Ok(Self::new(cell, cell))
            }
        }
    }

    #[must_use]
    pub const fn is_single_cell(&self) -> bool {
        self.start.row == self.end.row && self.start.col == self.end.col
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellAddr> + '_ {
        (self.start.row..=self.end.row).flat_map(move |row| {
            (self.start.col..=self.end.col).map(move |col| CellAddr::new(row, col))
        })
    }
}

impl fmt::Display for RangeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_cell() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}
