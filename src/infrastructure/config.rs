use crate::application::warehouse::WriteMode;
use crate::domain::fuel_schema::FuelSchema;
use anyhow::Context;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct EtlConfig {
    pub sources: SourcesSettings,
    pub storage: StorageSettings,
    pub warehouse: WarehouseSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

/// URL templates for the upstream APIs. `${name}` placeholders are filled by
/// `prepare_url`.
#[derive(Debug, Deserialize, Clone)]
pub struct SourcesSettings {
    pub years_url: String,
    pub makes_url: String,
    pub models_url: String,
    pub complaints_url: String,
    pub stations_url: String,
    pub nrel_api_key: String,
    pub fuel_economy_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    #[serde(default = "default_mappings_dir")]
    pub mappings_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseSettings {
    #[serde(default)]
    pub enabled: bool,
    pub base_url: String,
    /// Media upload endpoint used for load jobs
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    pub project_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub write_mode: WriteMode,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineSettings {
    /// Fan-out width; 0 means one worker per CPU
    #[serde(default)]
    pub workers: usize,
}

impl PipelineSettings {
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_upload_url() -> String {
    "https://bigquery.googleapis.com/upload/bigquery/v2".to_string()
}

fn default_mappings_dir() -> PathBuf {
    PathBuf::from("config")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ComplaintsMapping {
    #[serde(default)]
    pub trash_columns: Vec<String>,
    #[serde(default)]
    pub fix_date: Vec<String>,
    #[serde(default)]
    pub fix_capitalize: Vec<String>,
    pub year_source: String,
    pub year_column: String,
    #[serde(default)]
    pub convert_to_datetime: Vec<String>,
    #[serde(default)]
    pub convert_to_int: Vec<String>,
    #[serde(default)]
    pub reorder_columns: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValueMapStep {
    pub source: String,
    pub target: String,
    pub map: String,
}

/// Post-partition steps for one fuel type, keyed by fuel code in the mapping table.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FuelSteps {
    #[serde(default)]
    pub int_columns: Vec<String>,
    #[serde(default)]
    pub value_maps: Vec<ValueMapStep>,
    #[serde(default)]
    pub null_fill: Vec<String>,
    #[serde(default)]
    pub strip_quotes: Vec<String>,
    #[serde(default)]
    pub strip_commas: Vec<String>,
    #[serde(default)]
    pub list_columns: Vec<String>,
    #[serde(default)]
    pub reorder: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StationsMapping {
    #[serde(default)]
    pub deprecated_columns: Vec<String>,
    #[serde(default)]
    pub trash_columns: Vec<String>,
    #[serde(default)]
    pub value_maps: Vec<ValueMapStep>,
    #[serde(default)]
    pub replace_null: Vec<String>,
    #[serde(default)]
    pub convert_to_datetime: Vec<String>,
    #[serde(default)]
    pub reorder_columns: Vec<String>,
    /// Fuel label -> fuel code
    pub fuel_codes: BTreeMap<String, String>,
    #[serde(default)]
    pub fuel_steps: BTreeMap<String, FuelSteps>,
    #[serde(default)]
    pub maps: HashMap<String, HashMap<String, String>>,
}

impl StationsMapping {
    pub fn fuel_schema(&self) -> FuelSchema {
        FuelSchema::from_code_map(&self.fuel_codes)
    }

    pub fn value_map(&self, name: &str) -> Option<&HashMap<String, String>> {
        self.maps.get(name)
    }
}

pub fn load_etl_config() -> anyhow::Result<EtlConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/etl"))
        .add_source(config::Environment::with_prefix("ETL").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

// Mapping tables are read with `toml` directly; their keys are case-sensitive codes.
pub fn load_complaints_mapping(dir: &Path) -> anyhow::Result<ComplaintsMapping> {
    read_toml(&dir.join("complaints.toml"))
}

pub fn load_stations_mapping(dir: &Path) -> anyhow::Result<StationsMapping> {
    read_toml(&dir.join("stations.toml"))
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read mapping table {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse mapping table {}", path.display()))
}

/// Replace template variables in a URL, percent-encoding each value
pub fn prepare_url(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, &urlencoding::encode(value));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_url() {
        let url = prepare_url(
            "https://api.nhtsa.gov/products/vehicle/models?modelYear=${year}&make=${make}&issueType=c",
            &[("year", "2020"), ("make", "MERCEDES BENZ")],
        );

        assert_eq!(
            url,
            "https://api.nhtsa.gov/products/vehicle/models?modelYear=2020&make=MERCEDES%20BENZ&issueType=c"
        );
    }

    #[test]
    fn test_shipped_complaints_mapping_parses() {
        let mapping: ComplaintsMapping = toml::from_str(include_str!("../../config/complaints.toml")).unwrap();
        assert_eq!(mapping.year_column, "complaintYear");
        assert!(mapping.trash_columns.contains(&"vin".to_string()));
        assert!(mapping.reorder_columns.contains(&"manufacturer_product".to_string()));
    }

    #[test]
    fn test_shipped_stations_mapping_parses() {
        let mapping: StationsMapping = toml::from_str(include_str!("../../config/stations.toml")).unwrap();

        let schema = mapping.fuel_schema();
        assert_eq!(schema.fuel_types().len(), 8);
        assert_eq!(schema.code_for("Compressed Natural Gas"), Some("cng"));

        for step in &mapping.value_maps {
            assert!(mapping.value_map(&step.map).is_some(), "missing map {}", step.map);
        }
        for (code, steps) in &mapping.fuel_steps {
            assert!(schema.fuel_types().iter().any(|f| &f.code == code), "unknown fuel code {}", code);
            for step in &steps.value_maps {
                assert!(mapping.value_map(&step.map).is_some(), "missing map {}", step.map);
            }
        }
        assert_eq!(mapping.value_map("status").and_then(|m| m.get("E")).map(String::as_str), Some("Available"));
    }

    #[test]
    fn test_warehouse_write_mode() {
        let settings: WarehouseSettings = toml::from_str(
            "base_url = \"http://bq.test\"\nproject_id = \"p\"\nwrite_mode = \"append\"",
        )
        .unwrap();
        assert_eq!(settings.write_mode, WriteMode::Append);
        assert_eq!(settings.upload_url, "https://bigquery.googleapis.com/upload/bigquery/v2");

        let settings: WarehouseSettings = toml::from_str("base_url = \"http://bq.test\"\nproject_id = \"p\"").unwrap();
        assert_eq!(settings.write_mode, WriteMode::Truncate);
    }

    #[test]
    fn test_effective_workers() {
        assert_eq!(PipelineSettings { workers: 3 }.effective_workers(), 3);
        assert!(PipelineSettings::default().effective_workers() >= 1);
    }
}
