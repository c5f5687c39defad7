//! Scenario source: one record per CSV data row, in file order.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;

/// Cell texts treated as "no value supplied" (compared case-insensitively).
const MISSING_MARKERS: &[&str] = &["", "na", "n/a", "#n/a", "nan", "null", "none"];

#[derive(Debug, Error)]
pub enum InputFormatError {
    #[error("failed to open scenario input {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("scenario input {0} has no header row")]
    EmptyHeader(PathBuf),
    #[error("scenario input has duplicate column `{0}`")]
    DuplicateColumn(String),
    #[error("scenario input {path} is missing required columns: {}", .missing.join(", "))]
    MissingColumns { path: PathBuf, missing: Vec<String> },
    #[error("row {row}, column `{column}`: `{value}` is not numeric")]
    NotNumeric {
        row: usize,
        column: String,
        value: String,
    },
    #[error("csv parse error at row {row}: {reason}")]
    Csv { row: u64, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One input row: ordered named parameter fields, each possibly missing.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioRecord {
    row: usize,
    fields: IndexMap<String, Option<f64>>,
}

impl ScenarioRecord {
    /// Build a record directly; `row` is the 1-based data row number.
    #[must_use]
    pub fn from_fields(row: usize, fields: Vec<(String, Option<f64>)>) -> Self {
        Self {
            row,
            fields: fields.into_iter().collect(),
        }
    }

    #[must_use]
    pub const fn row(&self) -> usize {
        self.row
    }

    /// Value of `name` when the column exists and the cell is not missing.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied().flatten()
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// A validated scenario CSV. Iteration re-reads the file, so the sequence
/// can be replayed any number of times.
///
/// Only parameter columns are parsed as numbers. Any other column, such as a
/// descriptive `scenario_name`, is left out of the records.
#[derive(Debug, Clone)]
pub struct ScenarioSource {
    path: PathBuf,
    columns: Vec<String>,
    parameters: HashSet<String>,
    len: usize,
}

impl ScenarioSource {
    /// Validate the header and every row of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`InputFormatError`] when the file cannot be read, a required
    /// column is absent, or a parameter cell is neither numeric nor a
    /// missing marker.
    pub fn open<I>(
        path: &Path,
        required_columns: &[String],
        parameters: I,
    ) -> Result<Self, InputFormatError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let parameters: HashSet<String> = parameters.into_iter().map(Into::into).collect();
        let mut reader = open_reader(path)?;
        let columns = read_header(path, &mut reader)?;

        let missing: Vec<String> = required_columns
            .iter()
            .filter(|name| !columns.contains(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(InputFormatError::MissingColumns {
                path: path.to_path_buf(),
                missing,
            });
        }

        let mut len = 0;
        let mut record = csv::StringRecord::new();
        while reader
            .read_record(&mut record)
            .map_err(|e| map_csv_error(e, len as u64 + 2))?
        {
            len += 1;
            parse_record(len, &columns, &parameters, &record)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            columns,
            parameters,
            len,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of scenarios (data rows).
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start a fresh pass over the rows.
    ///
    /// # Errors
    ///
    /// Fails if the file can no longer be opened.
    pub fn iter(&self) -> Result<ScenarioIter, InputFormatError> {
        let mut reader = open_reader(&self.path)?;
        let columns = read_header(&self.path, &mut reader)?;
        Ok(ScenarioIter {
            reader,
            columns,
            parameters: self.parameters.clone(),
            row: 0,
            record: csv::StringRecord::new(),
        })
    }
}

/// Lazy iterator over the records of a [`ScenarioSource`].
pub struct ScenarioIter {
    reader: csv::Reader<File>,
    columns: Vec<String>,
    parameters: HashSet<String>,
    row: usize,
    record: csv::StringRecord,
}

impl Iterator for ScenarioIter {
    type Item = Result<ScenarioRecord, InputFormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => {
                self.row += 1;
                Some(parse_record(
                    self.row,
                    &self.columns,
                    &self.parameters,
                    &self.record,
                ))
            }
            Err(e) => Some(Err(map_csv_error(e, self.row as u64 + 2))),
        }
    }
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>, InputFormatError> {
    let file = File::open(path).map_err(|source| InputFormatError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file))
}

fn read_header(
    path: &Path,
    reader: &mut csv::Reader<File>,
) -> Result<Vec<String>, InputFormatError> {
    let headers = reader.headers().map_err(|e| map_csv_error(e, 1))?;
    let columns: Vec<String> = headers.iter().map(str::to_string).collect();
    if columns.iter().all(String::is_empty) {
        return Err(InputFormatError::EmptyHeader(path.to_path_buf()));
    }

    let mut seen = HashSet::new();
    for column in &columns {
        if !seen.insert(column.as_str()) {
            return Err(InputFormatError::DuplicateColumn(column.clone()));
        }
    }
    Ok(columns)
}

fn parse_record(
    row: usize,
    columns: &[String],
    parameters: &HashSet<String>,
    record: &csv::StringRecord,
) -> Result<ScenarioRecord, InputFormatError> {
    let mut fields = IndexMap::with_capacity(parameters.len());
    for (column, raw) in columns.iter().zip(record.iter()) {
        if parameters.contains(column) {
            fields.insert(column.clone(), parse_cell(row, column, raw)?);
        }
    }
    Ok(ScenarioRecord { row, fields })
}

fn parse_cell(row: usize, column: &str, raw: &str) -> Result<Option<f64>, InputFormatError> {
    let text = raw.trim();
    if MISSING_MARKERS
        .iter()
        .any(|marker| text.eq_ignore_ascii_case(marker))
    {
        return Ok(None);
    }
    text.parse::<f64>()
        .map(Some)
        .map_err(|_| InputFormatError::NotNumeric {
            row,
            column: column.to_string(),
            value: text.to_string(),
        })
}

fn map_csv_error(err: csv::Error, fallback_row: u64) -> InputFormatError {
    let reason = err.to_string();
    let pos = err.position().cloned();

    match err.into_kind() {
        csv::ErrorKind::Io(e) => InputFormatError::Io(e),
        _ => {
            let row = pos
                .map(|p| p.line())
                .filter(|r| *r > 0)
                .unwrap_or(fallback_row);
            InputFormatError::Csv { row, reason }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMETERS: [&str; 4] = [
        "number_killed",
        "discount_factor",
        "discount_start_year",
        "maximum_age",
    ];

    fn open(path: &Path, required: &[String]) -> Result<ScenarioSource, InputFormatError> {
        ScenarioSource::open(path, required, PARAMETERS)
    }

    fn temp_csv(label: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "rea-scenario-{label}-{}.csv",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        std::fs::write(&path, content).expect("write csv");
        path
    }

    #[test]
    fn yields_rows_in_file_order_and_can_restart() {
        let path = temp_csv(
            "order",
            "number_killed,discount_factor\n500,0.03\n250,\n125,NaN\n",
        );
        let source = open(&path, &[]).unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source.columns(), ["number_killed", "discount_factor"]);

        let first: Vec<ScenarioRecord> = source.iter().unwrap().map(Result::unwrap).collect();
        let second: Vec<ScenarioRecord> = source.iter().unwrap().map(Result::unwrap).collect();
        assert_eq!(first, second);

        let killed: Vec<Option<f64>> = first.iter().map(|r| r.get("number_killed")).collect();
        assert_eq!(killed, [Some(500.0), Some(250.0), Some(125.0)]);
        assert_eq!(first[1].get("discount_factor"), None);
        assert!(first[1].has_column("discount_factor"));
        assert_eq!(first[2].get("discount_factor"), None);
        assert_eq!(first[2].row(), 3);
    }

    #[test]
    fn header_only_file_is_an_empty_source() {
        let path = temp_csv("empty", "number_killed\n");
        let source = open(&path, &[]).unwrap();
        assert!(source.is_empty());
        assert_eq!(source.iter().unwrap().count(), 0);
    }

    #[test]
    fn missing_required_columns_are_reported() {
        let path = temp_csv("required", "number_killed\n1\n");
        let err = open(&path, &["number_killed".to_string(), "maximum_age".to_string()])
            .unwrap_err();
        match err {
            InputFormatError::MissingColumns { missing, .. } => {
                assert_eq!(missing, ["maximum_age"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_numeric_cells_are_rejected_with_location() {
        let path = temp_csv("text", "number_killed,maximum_age\n1,2\n3,old\n");
        let err = open(&path, &[]).unwrap_err();
        assert!(matches!(
            err,
            InputFormatError::NotNumeric { row: 2, ref column, .. } if column == "maximum_age"
        ));
    }

    #[test]
    fn text_label_columns_are_left_out_of_records() {
        let path = temp_csv(
            "label",
            "scenario_name,number_killed,maximum_age\nbaseline,500,50\nhigh cull,NA,old age\n",
        );
        let err = open(&path, &[]).unwrap_err();
        assert!(matches!(
            err,
            InputFormatError::NotNumeric { row: 2, ref column, .. } if column == "maximum_age"
        ));

        let path = temp_csv(
            "label-ok",
            "scenario_name,number_killed,maximum_age\nbaseline,500,50\nhigh cull,NA,70\n",
        );
        let source = open(&path, &["scenario_name".to_string()]).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.columns()[0], "scenario_name");

        let records: Vec<ScenarioRecord> = source.iter().unwrap().map(Result::unwrap).collect();
        assert!(!records[0].has_column("scenario_name"));
        assert_eq!(records[0].get("number_killed"), Some(500.0));
        assert_eq!(records[1].get("number_killed"), None);
        assert_eq!(records[1].get("maximum_age"), Some(70.0));
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let path = temp_csv("dup", "a,b,a\n1,2,3\n");
        assert!(matches!(
            open(&path, &[]),
            Err(InputFormatError::DuplicateColumn(ref c)) if c == "a"
        ));
    }

    #[test]
    fn ragged_rows_are_csv_errors() {
        let path = temp_csv("ragged", "a,b\n1,2\n3\n");
        assert!(matches!(
            open(&path, &[]),
            Err(InputFormatError::Csv { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let path = std::env::temp_dir().join("rea-scenario-does-not-exist.csv");
        assert!(matches!(
            open(&path, &[]),
            Err(InputFormatError::Open { .. })
        ));
    }
}
