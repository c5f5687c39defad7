//! Append-only CSV output with a header written exactly once.
//!
//! Every call opens the file, writes, flushes and syncs before returning, so
//! rows already recorded survive a later failure in the run.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode CSV for {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path} expects {expected} fields per row, got {found}")]
    WidthMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
}

/// Create `path` with `keys` as its header row. Returns `false` without
/// touching the file when it already exists.
///
/// # Errors
///
/// Returns [`RecordError`] if the file or its parent directory cannot be
/// created or written.
pub fn ensure_header(path: &Path, keys: &[String]) -> Result<bool, RecordError> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| io_error(path, source))?;
    }
    let file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(io_error(path, err)),
    };
    write_durably(path, file, keys)?;
    Ok(true)
}

/// Append one row to an existing stream.
///
/// # Errors
///
/// Returns [`RecordError`] on any I/O or encoding failure.
pub fn append_row(path: &Path, values: &[String]) -> Result<(), RecordError> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|source| io_error(path, source))?;
    write_durably(path, file, values)
}

fn write_durably(path: &Path, file: File, record: &[String]) -> Result<(), RecordError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer
        .write_record(record)
        .map_err(|source| RecordError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    writer.flush().map_err(|source| io_error(path, source))?;
    let file = writer
        .into_inner()
        .map_err(|err| io_error(path, err.into_error()))?;
    file.sync_all().map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: io::Error) -> RecordError {
    RecordError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A CSV stream bound to a fixed column list.
#[derive(Debug, Clone)]
pub struct OutputStream {
    path: PathBuf,
    columns: Vec<String>,
}

impl OutputStream {
    #[must_use]
    pub const fn new(path: PathBuf, columns: Vec<String>) -> Self {
        Self { path, columns }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// # Errors
    ///
    /// See [`ensure_header`].
    pub fn ensure_header(&self) -> Result<bool, RecordError> {
        ensure_header(&self.path, &self.columns)
    }

    /// Append `values`, which must line up with the columns.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::WidthMismatch`] for a misaligned row, otherwise
    /// see [`append_row`].
    pub fn append_row(&self, values: &[String]) -> Result<(), RecordError> {
        if values.len() != self.columns.len() {
            return Err(RecordError::WidthMismatch {
                path: self.path.clone(),
                expected: self.columns.len(),
                found: values.len(),
            });
        }
        append_row(&self.path, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "rea-recorder-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn header_is_written_once_and_rows_append_in_order() {
        let path = temp_path("once").join("nested").join("out.csv");
        let keys = strings(&["Scenario_number", "number_killed"]);

        assert!(ensure_header(&path, &keys).unwrap());
        assert!(!ensure_header(&path, &keys).unwrap());
        append_row(&path, &strings(&["1", "500"])).unwrap();
        append_row(&path, &strings(&["2", "250"])).unwrap();
        assert!(!ensure_header(&path, &keys).unwrap());

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Scenario_number,number_killed\n1,500\n2,250\n");
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        let path = temp_path("quote").with_extension("csv");
        let stream = OutputStream::new(path.clone(), strings(&["n", "yearly"]));
        stream.ensure_header().unwrap();
        stream.append_row(&strings(&["1", "[1.5, 2.5]"])).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "n,yearly\n1,\"[1.5, 2.5]\"\n");
    }

    #[test]
    fn misaligned_rows_are_rejected_before_writing() {
        let path = temp_path("width").with_extension("csv");
        let stream = OutputStream::new(path.clone(), strings(&["a", "b"]));
        stream.ensure_header().unwrap();
        assert!(matches!(
            stream.append_row(&strings(&["1"])),
            Err(RecordError::WidthMismatch { expected: 2, found: 1, .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n");
    }

    #[test]
    fn appending_to_a_missing_stream_fails() {
        let path = temp_path("missing").with_extension("csv");
        assert!(matches!(
            append_row(&path, &strings(&["1"])),
            Err(RecordError::Io { .. })
        ));
        assert!(!path.exists());
    }
}
