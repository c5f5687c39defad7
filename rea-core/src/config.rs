//! Run configuration: the JSON document that maps model parameters to cells.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::binder::ParameterSet;
use crate::engine::{AddressError, CellAddr, RangeAddr};

/// `input_cells` key of the loss/gain ratio (goal-seek goal).
pub const LOSS_RATIO_KEY: &str = "loss_ratio";
/// `input_cells` key of the annual reintroduction cell (goal-seek changing cell).
pub const ANNUAL_REINTRODUCTION_KEY: &str = "annual_reintroduction";
/// `input_cells` key of the summary QC verdict cell.
pub const QC_TEST_KEY: &str = "qc_test";

const MAX_DECIMAL_PRECISION: u32 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("required config key `{0}` is missing")]
    MissingKey(String),
    #[error("parameter `{0}` has a default value but no input cell")]
    UnmappedParameter(String),
    #[error("input cell `{0}` has no default value in excel.input_values_default")]
    MissingDefault(String),
    #[error("`{key}` has invalid address `{address}`: {source}")]
    InvalidAddress {
        key: String,
        address: String,
        #[source]
        source: AddressError,
    },
    #[error("`{key}` is invalid: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNames {
    /// Model workbook file name.
    pub rea_file: String,
    /// Scenario CSV file name.
    pub input_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directories {
    /// Folder the input files are staged from. When absent, inputs are read
    /// in place from `input_folder`.
    #[serde(default)]
    pub copy_source: Option<PathBuf>,
    pub input_folder: PathBuf,
    pub output_folder: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalSeekSettings {
    pub target_value: f64,
    #[serde(default = "GoalSeekSettings::default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "GoalSeekSettings::default_tolerance")]
    pub tolerance: f64,
}

impl GoalSeekSettings {
    const fn default_max_iterations() -> usize {
        100
    }

    const fn default_tolerance() -> f64 {
        1e-7
    }
}

impl Default for GoalSeekSettings {
    fn default() -> Self {
        Self {
            target_value: 1.0,
            max_iterations: Self::default_max_iterations(),
            tolerance: Self::default_tolerance(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    files: FileNames,
    directories: Directories,
    excel: RawExcel,
    goal_seek: GoalSeekSettings,
    misc: RawMisc,
}

#[derive(Debug, Deserialize)]
struct RawExcel {
    sheet_name: RawSheetNames,
    input_cells: IndexMap<String, String>,
    #[serde(alias = "output_cells_excluded")]
    output_cells: IndexMap<String, String>,
    #[serde(default)]
    exact_output_cells: IndexMap<String, String>,
    input_values_default: IndexMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct RawSheetNames {
    input_sheet: String,
}

#[derive(Debug, Deserialize)]
struct RawMisc {
    result_decimal_precision: u32,
    #[serde(default)]
    required_columns: Vec<String>,
}

/// Validated configuration for one batch run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub files: FileNames,
    pub directories: Directories,
    pub input_sheet: String,
    /// Parameter name → input cell, in default-set order.
    pub parameter_cells: IndexMap<String, String>,
    pub defaults: ParameterSet,
    pub loss_ratio_cell: String,
    pub reintroduction_cell: String,
    pub qc_cell: String,
    pub output_cells: IndexMap<String, String>,
    pub exact_output_cells: IndexMap<String, String>,
    pub goal_seek: GoalSeekSettings,
    pub result_decimal_precision: u32,
    pub required_columns: Vec<String>,
    /// Directory relative paths in the config are resolved against.
    pub base_dir: PathBuf,
}

impl RunConfig {
    /// Read and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is unreadable, malformed, or
    /// violates a mapping invariant.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::from_json_str(&text, base_dir).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate config JSON; relative paths resolve against `base_dir`.
    ///
    /// # Errors
    ///
    /// See [`RunConfig::load`].
    pub fn from_json_str(text: &str, base_dir: PathBuf) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::validate(raw, base_dir)
    }

    fn validate(raw: RawConfig, base_dir: PathBuf) -> Result<Self, ConfigError> {
        let RawExcel {
            sheet_name,
            mut input_cells,
            output_cells,
            exact_output_cells,
            input_values_default,
        } = raw.excel;

        if sheet_name.input_sheet.trim().is_empty() {
            return Err(ConfigError::MissingKey("excel.sheet_name.input_sheet".into()));
        }

        let mut take_special = |key: &str| -> Result<String, ConfigError> {
            let address = input_cells
                .shift_remove(key)
                .ok_or_else(|| ConfigError::MissingKey(format!("excel.input_cells.{key}")))?;
            check_cell(&format!("excel.input_cells.{key}"), &address)?;
            Ok(address)
        };
        let loss_ratio_cell = take_special(LOSS_RATIO_KEY)?;
        let qc_cell = take_special(QC_TEST_KEY)?;
        // The reintroduction cell is also an ordinary parameter, so it stays mapped.
        let reintroduction_cell = input_cells
            .get(ANNUAL_REINTRODUCTION_KEY)
            .cloned()
            .ok_or_else(|| {
                ConfigError::MissingKey(format!("excel.input_cells.{ANNUAL_REINTRODUCTION_KEY}"))
            })?;
        check_cell(
            &format!("excel.input_cells.{ANNUAL_REINTRODUCTION_KEY}"),
            &reintroduction_cell,
        )?;

        let mut parameter_cells = IndexMap::with_capacity(input_values_default.len());
        for name in input_values_default.keys() {
            let address = input_cells
                .get(name)
                .ok_or_else(|| ConfigError::UnmappedParameter(name.clone()))?;
            check_cell(&format!("excel.input_cells.{name}"), address)?;
            parameter_cells.insert(name.clone(), address.clone());
        }
        if let Some(name) = input_cells
            .keys()
            .find(|name| !input_values_default.contains_key(*name))
        {
            return Err(ConfigError::MissingDefault(name.clone()));
        }

        for (name, address) in &output_cells {
            check_range(&format!("excel.output_cells.{name}"), address)?;
        }
        for (name, address) in &exact_output_cells {
            check_range(&format!("excel.exact_output_cells.{name}"), address)?;
        }

        if raw.misc.result_decimal_precision > MAX_DECIMAL_PRECISION {
            return Err(ConfigError::Invalid {
                key: "misc.result_decimal_precision".into(),
                reason: format!("must be at most {MAX_DECIMAL_PRECISION}"),
            });
        }
        if !raw.goal_seek.target_value.is_finite() {
            return Err(ConfigError::Invalid {
                key: "goal_seek.target_value".into(),
                reason: "must be a finite number".into(),
            });
        }
        if raw.goal_seek.max_iterations == 0 || raw.goal_seek.tolerance <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "goal_seek".into(),
                reason: "max_iterations and tolerance must be positive".into(),
            });
        }

        Ok(Self {
            files: raw.files,
            directories: raw.directories,
            input_sheet: sheet_name.input_sheet,
            parameter_cells,
            defaults: ParameterSet::from(input_values_default),
            loss_ratio_cell,
            reintroduction_cell,
            qc_cell,
            output_cells,
            exact_output_cells,
            goal_seek: raw.goal_seek,
            result_decimal_precision: raw.misc.result_decimal_precision,
            required_columns: raw.misc.required_columns,
            base_dir,
        })
    }

    /// Resolve a config-relative path.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Strip an optional `Sheet!` qualifier.
fn local_part(address: &str) -> &str {
    address.rsplit_once('!').map_or(address, |(_, local)| local)
}

fn check_cell(key: &str, address: &str) -> Result<(), ConfigError> {
    CellAddr::parse(local_part(address))
        .map(|_| ())
        .map_err(|source| ConfigError::InvalidAddress {
            key: key.to_string(),
            address: address.to_string(),
            source,
        })
}

fn check_range(key: &str, address: &str) -> Result<(), ConfigError> {
    RangeAddr::parse(local_part(address))
        .map(|_| ())
        .map_err(|source| ConfigError::InvalidAddress {
            key: key.to_string(),
            address: address.to_string(),
            source,
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"{
        "files": { "rea_file": "rea_model.json", "input_file": "scenarios.csv" },
        "directories": { "copy_source": "../inputs", "input_folder": "inputs", "output_folder": "outputs" },
        "excel": {
            "sheet_name": { "input_sheet": "I-O" },
            "input_cells": {
                "number_killed": "B2",
                "discount_factor": "B3",
                "maximum_age": "B4",
                "annual_reintroduction": "B5",
                "loss_ratio": "E4",
                "qc_test": "E6"
            },
            "output_cells": { "total_losses": "E2", "total_gains": "E3", "yearly": "G2:G4" },
            "input_values_default": {
                "number_killed": 100,
                "discount_factor": 0.03,
                "maximum_age": 40,
                "annual_reintroduction": 1
            }
        },
        "goal_seek": { "target_value": 1 },
        "misc": { "result_decimal_precision": 2 }
    }"#;

    #[test]
    fn parses_sample_and_separates_special_cells() {
        let config = RunConfig::from_json_str(SAMPLE, PathBuf::from("/project/config")).unwrap();
        assert_eq!(config.input_sheet, "I-O");
        assert_eq!(config.loss_ratio_cell, "E4");
        assert_eq!(config.qc_cell, "E6");
        assert_eq!(config.reintroduction_cell, "B5");
        let params: Vec<&String> = config.parameter_cells.keys().collect();
        assert_eq!(
            params,
            ["number_killed", "discount_factor", "maximum_age", "annual_reintroduction"]
        );
        assert_eq!(config.defaults.get("discount_factor"), Some(0.03));
        assert_eq!(config.goal_seek.max_iterations, 100);
        assert_eq!(
            config.resolve(Path::new("../inputs")),
            PathBuf::from("/project/config/../inputs")
        );
    }

    #[test]
    fn missing_special_cell_is_a_missing_key() {
        let text = SAMPLE.replace(r#""qc_test": "E6""#, r#""qc_unused": "E6""#);
        let err = RunConfig::from_json_str(&text, PathBuf::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey(ref k) if k == "excel.input_cells.qc_test"));
    }

    #[test]
    fn default_without_cell_is_rejected() {
        let text = SAMPLE.replace(r#""maximum_age": "B4","#, "");
        let err = RunConfig::from_json_str(&text, PathBuf::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnmappedParameter(ref k) if k == "maximum_age"));
    }

    #[test]
    fn cell_without_default_is_rejected() {
        let text = SAMPLE.replace(r#""maximum_age": 40,"#, "");
        let err = RunConfig::from_json_str(&text, PathBuf::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDefault(ref k) if k == "maximum_age"));
    }

    #[test]
    fn bad_addresses_are_reported_with_their_key() {
        let text = SAMPLE.replace(r#""yearly": "G2:G4""#, r#""yearly": "G2:4G""#);
        let err = RunConfig::from_json_str(&text, PathBuf::new()).unwrap_err();
        assert!(
            matches!(
                err,
                ConfigError::InvalidAddress { ref key, .. } if key == "excel.output_cells.yearly"
            )
        );
    }

    #[test]
    fn legacy_output_key_alias_is_accepted() {
        let text = SAMPLE.replace("\"output_cells\"", "\"output_cells_excluded\"");
        let config = RunConfig::from_json_str(&text, PathBuf::new()).unwrap();
        assert_eq!(config.output_cells.len(), 3);
    }

    #[test]
    fn structural_errors_surface_as_parse_errors() {
        let err = RunConfig::from_json_str("{\"files\": {}}", PathBuf::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn excessive_precision_is_invalid() {
        let text = SAMPLE.replace(
            r#""result_decimal_precision": 2"#,
            r#""result_decimal_precision": 40"#,
        );
        assert!(matches!(
            RunConfig::from_json_str(&text, PathBuf::new()),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
