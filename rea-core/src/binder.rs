//! Scenario input binding: configured defaults overlaid with one record.

use indexmap::IndexMap;
use serde::Serialize;

use crate::scenario::ScenarioRecord;

/// Ordered parameter name → value mapping written to the model's input cells.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct ParameterSet(IndexMap<String, f64>);

impl ParameterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f64)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<IndexMap<String, f64>> for ParameterSet {
    fn from(map: IndexMap<String, f64>) -> Self {
        Self(map)
    }
}

/// Merge `record` onto `defaults`.
///
/// Every parameter named by `defaults` appears in the result, in the same
/// order. A record value wins only when the column is present and the cell is
/// not missing. Columns the defaults do not name are ignored.
#[must_use]
pub fn bind(defaults: &ParameterSet, record: &ScenarioRecord) -> ParameterSet {
    defaults
        .iter()
        .map(|(name, default)| (name.to_string(), record.get(name).unwrap_or(default)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ParameterSet {
        [
            ("number_killed", 100.0),
            ("discount_factor", 0.03),
            ("discount_start_year", 2010.0),
            ("maximum_age", 40.0),
            ("annual_reintroduction", 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn record_values_override_defaults_in_default_order() {
        let record = ScenarioRecord::from_fields(
            2,
            vec![
                ("maximum_age".to_string(), Some(50.0)),
                ("number_killed".to_string(), Some(500.0)),
            ],
        );
        let bound = bind(&defaults(), &record);
        let names: Vec<&str> = bound.names().collect();
        assert_eq!(
            names,
            [
                "number_killed",
                "discount_factor",
                "discount_start_year",
                "maximum_age",
                "annual_reintroduction"
            ]
        );
        assert_eq!(bound.get("number_killed"), Some(500.0));
        assert_eq!(bound.get("maximum_age"), Some(50.0));
        assert_eq!(bound.get("discount_factor"), Some(0.03));
    }

    #[test]
    fn missing_cells_fall_back_to_defaults() {
        let record = ScenarioRecord::from_fields(
            1,
            vec![
                ("discount_factor".to_string(), None),
                ("number_killed".to_string(), Some(7.0)),
            ],
        );
        let bound = bind(&defaults(), &record);
        assert_eq!(bound.get("discount_factor"), Some(0.03));
        assert_eq!(bound.get("number_killed"), Some(7.0));
    }

    #[test]
    fn unknown_columns_are_ignored_and_binding_is_deterministic() {
        let record = ScenarioRecord::from_fields(
            1,
            vec![("scenario_name".to_string(), Some(3.0))],
        );
        let first = bind(&defaults(), &record);
        let second = bind(&defaults(), &record);
        assert_eq!(first, second);
        assert_eq!(first, defaults());
        assert!(!first.contains("scenario_name"));
    }
}
