//! Run inputs: facility facts that fill the non-task placeholders.

use std::collections::BTreeMap;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Environment variable, input key, default.
const FIELDS: &[(&str, &str, Option<&str>)] = &[
    ("HOSPITAL_NAME", "hospital_name", None),
    ("REGION", "region", None),
    ("HISTORICAL_DATA_PERIOD", "historical_data_period", Some("2020-2024")),
    ("CURRENT_SEASON", "current_season", None),
    ("SURVEILLANCE_DATA", "surveillance_data", None),
    ("CURRENT_STAFFING", "current_staffing", None),
    ("BUDGET_CONSTRAINTS", "budget_constraints", None),
    ("CURRENT_INVENTORY", "current_inventory", None),
    ("VENDOR_DETAILS", "vendor_details", None),
    ("REGIONAL_LANGUAGES", "regional_languages", Some("Hindi,English")),
    ("ADMINISTRATOR_NAME", "administrator_name", None),
    ("EMERGENCY_CONTACTS", "emergency_contacts", None),
];

const REQUIRED: &[&str] = &[
    "hospital_name",
    "region",
    "current_staffing",
    "administrator_name",
];

/// Named values substituted into task templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunInputs(BTreeMap<String, String>);

impl RunInputs {
    /// Read inputs from the environment and stamp today's date.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build inputs from any variable lookup.
    ///
    /// Every missing required value is reported in a single error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut values = BTreeMap::new();
        for (var, key, default) in FIELDS {
            let value = lookup(*var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| (*default).map(str::to_string))
                .unwrap_or_default();
            values.insert(key.to_string(), value);
        }
        values.insert(
            "current_date".to_string(),
            Local::now().format("%Y-%m-%d").to_string(),
        );

        let inputs = Self(values);
        inputs.check_required()?;
        Ok(inputs)
    }

    fn check_required(&self) -> Result<(), ConfigError> {
        let missing: Vec<String> = FIELDS
            .iter()
            .filter(|(_, key, _)| REQUIRED.contains(key))
            .filter(|(_, key, _)| self.get(key).map_or(true, str::is_empty))
            .map(|(var, _, _)| var.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingEnvVar(missing.join(", ")))
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set or replace a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl From<BTreeMap<String, String>> for RunInputs {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self(values)
    }
}
