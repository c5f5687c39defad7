//! Per-scenario result rows and the column layout they share.

use indexmap::IndexMap;

use crate::binder::ParameterSet;
use crate::config::RunConfig;
use crate::engine::CellData;
use crate::solver::Equilibrium;

pub const SCENARIO_NUMBER_COLUMN: &str = "Scenario_number";
pub const ROUNDED_COLUMN: &str = "Annual Reintroduction Rounded";
pub const EXACT_COLUMN: &str = "Annual Reintroduction Exact";
/// Suffix for outputs captured before the rounded write-back.
pub const EXACT_SUFFIX: &str = "_exact";

/// Column order of the main and failure streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSchema {
    columns: Vec<String>,
}

impl ResultSchema {
    /// `Scenario_number`, parameters, outputs, exact outputs, then the two
    /// reintroduction columns.
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        let mut columns = Vec::with_capacity(
            3 + config.defaults.len() + config.output_cells.len() + config.exact_output_cells.len(),
        );
        columns.push(SCENARIO_NUMBER_COLUMN.to_string());
        columns.extend(config.defaults.names().map(str::to_string));
        columns.extend(config.output_cells.keys().cloned());
        columns.extend(
            config
                .exact_output_cells
                .keys()
                .map(|name| format!("{name}{EXACT_SUFFIX}")),
        );
        columns.push(ROUNDED_COLUMN.to_string());
        columns.push(EXACT_COLUMN.to_string());
        Self { columns }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn into_columns(self) -> Vec<String> {
        self.columns
    }
}

/// Everything recorded for one processed scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioResult {
    /// 1-based position in the scenario source.
    pub scenario: usize,
    pub parameters: ParameterSet,
    pub outputs: IndexMap<String, CellData>,
    pub exact_outputs: IndexMap<String, CellData>,
    pub equilibrium: Equilibrium,
}

impl ScenarioResult {
    /// Field values in [`ResultSchema`] order.
    #[must_use]
    pub fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(
            3 + self.parameters.len() + self.outputs.len() + self.exact_outputs.len(),
        );
        row.push(self.scenario.to_string());
        row.extend(self.parameters.iter().map(|(_, value)| value.to_string()));
        row.extend(self.outputs.values().map(CellData::to_field));
        row.extend(self.exact_outputs.values().map(CellData::to_field));
        row.push(self.equilibrium.rounded.to_string());
        row.push(self.equilibrium.exact.to_string());
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use crate::engine::{CellValue, GoalSeekOutcome};
    use std::path::PathBuf;

    #[test]
    fn schema_follows_config_order() {
        let config = RunConfig::from_json_str(SAMPLE, PathBuf::from(".")).unwrap();
        let schema = ResultSchema::from_config(&config);
        assert_eq!(schema.columns().first().map(String::as_str), Some("Scenario_number"));
        assert_eq!(
            &schema.columns()[schema.columns().len() - 2..],
            ["Annual Reintroduction Rounded", "Annual Reintroduction Exact"]
        );
        let params: Vec<&str> = config.defaults.names().collect();
        assert_eq!(schema.columns()[1..=params.len()], params);
    }

    #[test]
    fn row_renders_counts_and_ranges() {
        let parameters: ParameterSet = [
            ("number_killed".to_string(), 500.0),
            ("discount_factor".to_string(), 0.03),
        ]
        .into_iter()
        .collect();
        let mut outputs = IndexMap::new();
        outputs.insert(
            "total_losses".to_string(),
            CellData::Scalar(CellValue::Number(1234.5)),
        );
        outputs.insert(
            "yearly".to_string(),
            CellData::List(vec![CellValue::Number(1.0), CellValue::Number(2.5)]),
        );
        let result = ScenarioResult {
            scenario: 4,
            parameters,
            outputs,
            exact_outputs: IndexMap::new(),
            equilibrium: Equilibrium {
                exact: 12.3,
                rounded: 13,
                outcome: GoalSeekOutcome {
                    solution: 12.3,
                    goal_value: 1.0,
                    iterations: 3,
                    converged: true,
                },
            },
        };
        assert_eq!(
            result.to_row(),
            ["4", "500", "0.03", "1234.5", "[1, 2.5]", "13", "12.3"]
        );
    }
}
