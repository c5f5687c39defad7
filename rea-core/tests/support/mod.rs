#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rea_core::{RunConfig, RunPaths};

pub const CONFIG: &str = r#"{
    "files": { "rea_file": "model.json", "input_file": "scenarios.csv" },
    "directories": { "input_folder": "inputs", "output_folder": "outputs" },
    "excel": {
        "sheet_name": { "input_sheet": "I-O" },
        "input_cells": {
            "number_killed": "B2",
            "discount_factor": "B3",
            "maximum_age": "B4",
            "annual_reintroduction": "B5",
            "discount_start_year": "B6",
            "loss_ratio": "E4",
            "qc_test": "E6"
        },
        "output_cells": { "total_losses": "E2", "total_gains": "E3", "yearly": "G2:G4" },
        "exact_output_cells": { "total_gains": "E3" },
        "input_values_default": {
            "number_killed": 100,
            "discount_factor": 0.03,
            "discount_start_year": 2010,
            "maximum_age": 40,
            "annual_reintroduction": 1
        }
    },
    "goal_seek": { "target_value": 1 },
    "misc": { "result_decimal_precision": 2, "required_columns": ["number_killed"] }
}"#;

/// Losses grow with kills and age; each reintroduction gains 100. QC fails
/// for ages above 60.
pub const MODEL: &str = r#"{
    "sheets": [
        {"name": "I-O", "cells": {
            "A2": "Number killed", "B2": 100,
            "A3": "Discount factor", "B3": 0.03,
            "A4": "Maximum age", "B4": 40,
            "A5": "Annual reintroduction", "B5": 1,
            "A6": "Discount start year", "B6": 2010,
            "E2": "=B2*B4*(1-B3)",
            "E3": "=B5*Rates!B1",
            "E4": "=E3/E2",
            "E6": "=IF(B4<=60, \"PASS\", \"FAIL\")",
            "G2": "=E2*0.5", "G3": "=E2*0.3", "G4": "=E2*0.2"
        }},
        {"name": "Rates", "cells": {"A1": "Gain per reintroduction", "B1": 100}}
    ]
}"#;

pub const SCENARIOS: &str = "\
number_killed,discount_factor,discount_start_year,maximum_age
500,0.03,2016,50
250,,2016,70
125,0.5,NA,30
";

pub fn temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "rea-core-{label}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn config() -> RunConfig {
    RunConfig::from_json_str(CONFIG, PathBuf::from(".")).expect("valid test config")
}

/// Write the model and scenario table into `dir/inputs` and return the run
/// paths with outputs under `dir/outputs`.
pub fn stage(dir: &Path, model: &str, scenarios: &str) -> RunPaths {
    let inputs = dir.join("inputs");
    fs::create_dir_all(&inputs).expect("create inputs");
    fs::write(inputs.join("model.json"), model).expect("write model");
    fs::write(inputs.join("scenarios.csv"), scenarios).expect("write scenarios");
    rea_core::run_paths(&config(), &inputs, &dir.join("outputs"))
}

pub fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .expect("open csv");
    reader
        .records()
        .map(|r| r.expect("csv record").iter().map(str::to_string).collect())
        .collect()
}

pub fn column(header: &[String], name: &str) -> usize {
    header
        .iter()
        .position(|h| h == name)
        .unwrap_or_else(|| panic!("missing column {name}"))
}
