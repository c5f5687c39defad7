use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

use rea_core::logging::MAIN_TARGET;
use rea_core::{RunConfig, RunPaths, run_paths};

const LOG_FOLDER: &str = "logs";
const LOG_FILE: &str = "run.log";

/// `<results>/<run-name>_<YYYYmmdd_HHMMSS>/` with its log, input and output folders.
#[derive(Debug, Clone)]
pub struct RunDir {
    name: String,
    root: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl RunDir {
    pub fn create(
        results_dir: &Path,
        run_name: &str,
        config: &RunConfig,
        started: DateTime<Local>,
    ) -> Result<Self> {
        let name = format!("{run_name}_{}", started.format("%Y%m%d_%H%M%S"));
        let root = results_dir.join(&name);
        let input_dir = root.join(folder_name(&config.directories.input_folder, "inputs"));
        let output_dir = root.join(folder_name(&config.directories.output_folder, "outputs"));

        for dir in [&root.join(LOG_FOLDER), &input_dir, &output_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating run folder {}", dir.display()))?;
        }

        Ok(Self {
            name,
            root,
            input_dir,
            output_dir,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FOLDER).join(LOG_FILE)
    }

    /// Copy the model and scenario files into the run when the config names a
    /// copy source; otherwise read them in place from the input folder.
    pub fn stage_inputs(&self, config: &RunConfig) -> Result<RunPaths> {
        let Some(copy_source) = config.directories.copy_source.as_deref() else {
            return Ok(run_paths(config, &input_source(config), &self.output_dir));
        };

        let source = config.resolve(copy_source);
        for file in [&config.files.rea_file, &config.files.input_file] {
            let from = source.join(file);
            let to = self.input_dir.join(file);
            fs::copy(&from, &to).with_context(|| {
                format!("copying {} to {}", from.display(), to.display())
            })?;
            log::info!(target: MAIN_TARGET, "Copied {} to {}", from.display(), to.display());
        }
        Ok(run_paths(config, &self.input_dir, &self.output_dir))
    }
}

/// Folder the run's inputs are read from before any staging.
pub fn input_source(config: &RunConfig) -> PathBuf {
    config.resolve(
        config
            .directories
            .copy_source
            .as_deref()
            .unwrap_or(config.directories.input_folder.as_path()),
    )
}

fn folder_name<'a>(path: &'a Path, fallback: &'a str) -> &'a Path {
    path.file_name().map_or(Path::new(fallback), Path::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "rea-runner-rundir-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    fn config_with(base: &Path, copy_source: Option<&str>) -> RunConfig {
        let directories = match copy_source {
            Some(src) => format!(
                r#"{{"copy_source": "{src}", "input_folder": "inputs", "output_folder": "outputs"}}"#
            ),
            None => r#"{"input_folder": "data", "output_folder": "outputs"}"#.to_string(),
        };
        let text = format!(
            r#"{{
                "files": {{"rea_file": "model.json", "input_file": "scenarios.csv"}},
                "directories": {directories},
                "excel": {{
                    "sheet_name": {{"input_sheet": "I-O"}},
                    "input_cells": {{"annual_reintroduction": "B5", "loss_ratio": "E4", "qc_test": "E6"}},
                    "output_cells": {{"total": "E2"}},
                    "input_values_default": {{"annual_reintroduction": 1}}
                }},
                "goal_seek": {{"target_value": 1}},
                "misc": {{"result_decimal_precision": 4}}
            }}"#
        );
        RunConfig::from_json_str(&text, base.to_path_buf()).unwrap()
    }

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn run_folder_is_named_after_run_and_start_time() {
        let base = temp_path("name");
        let config = config_with(&base, None);
        let run = RunDir::create(&base.join("results"), "batch", &config, started()).unwrap();

        assert_eq!(run.name(), "batch_20240309_140507");
        assert!(run.root().join("logs").is_dir());
        assert!(run.root().join("inputs").is_dir());
        assert!(run.root().join("outputs").is_dir());
        assert_eq!(run.log_file(), run.root().join("logs/run.log"));
    }

    #[test]
    fn inputs_are_copied_from_the_copy_source() {
        let base = temp_path("copy");
        fs::create_dir_all(base.join("source")).unwrap();
        fs::write(base.join("source/model.json"), "{}").unwrap();
        fs::write(base.join("source/scenarios.csv"), "a\n1\n").unwrap();
        let config = config_with(&base, Some("source"));

        let run = RunDir::create(&base.join("results"), "copy", &config, started()).unwrap();
        let paths = run.stage_inputs(&config).unwrap();

        assert_eq!(paths.model, run.root().join("inputs/model.json"));
        assert_eq!(fs::read_to_string(&paths.scenarios).unwrap(), "a\n1\n");
        assert_eq!(paths.output_dir, run.root().join("outputs"));
    }

    #[test]
    fn inputs_are_read_in_place_without_a_copy_source() {
        let base = temp_path("in-place");
        let config = config_with(&base, None);
        let run = RunDir::create(&base.join("results"), "direct", &config, started()).unwrap();
        let paths = run.stage_inputs(&config).unwrap();

        assert_eq!(paths.model, base.join("data/model.json"));
        assert_eq!(paths.scenarios, base.join("data/scenarios.csv"));
        assert_eq!(paths.output_dir, run.root().join("outputs"));
    }

    #[test]
    fn missing_copy_source_file_is_reported() {
        let base = temp_path("missing");
        let config = config_with(&base, Some("nowhere"));
        let run = RunDir::create(&base.join("results"), "missing", &config, started()).unwrap();
        let err = run.stage_inputs(&config).unwrap_err();
        assert!(format!("{err:#}").contains("model.json"));
    }
}
