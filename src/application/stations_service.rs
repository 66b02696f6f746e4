// Stations service - NREL alternative fuel stations, split into one table per fuel type
use crate::application::source_client::SourceClient;
use crate::application::warehouse::{TableRef, Warehouse, WriteMode};
use crate::domain::fuel_schema::FuelSchema;
use crate::domain::harvest::{FetchFailure, StageReport};
use crate::domain::record_set::{cell_text, RecordSet};
use crate::domain::text::{list_literal, station_address, wkt_point};
use crate::infrastructure::config::{prepare_url, FuelSteps, SourcesSettings, StationsMapping, ValueMapStep};
use crate::infrastructure::csv_store;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

const DATASET: &str = "alternative_fuel_stations";
const UNKNOWN: &str = "Unknown";
const ADDRESS_PARTS: [&str; 5] = ["street_address", "city", "state", "zip", "plus4"];

#[derive(Clone)]
pub struct StationsService {
    source: Arc<dyn SourceClient>,
    warehouse: Arc<dyn Warehouse>,
    sources: SourcesSettings,
    mapping: StationsMapping,
    schema: FuelSchema,
    data_dir: PathBuf,
    write_mode: WriteMode,
}

impl StationsService {
    pub fn new(
        source: Arc<dyn SourceClient>,
        warehouse: Arc<dyn Warehouse>,
        sources: SourcesSettings,
        mapping: StationsMapping,
        data_dir: PathBuf,
    ) -> Self {
        let schema = mapping.fuel_schema();
        tracing::debug!("Station partitioning knows {} fuel types", schema.fuel_types().len());
        Self {
            source,
            warehouse,
            sources,
            mapping,
            schema,
            data_dir,
            write_mode: WriteMode::Truncate,
        }
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    fn extracted_path(&self) -> PathBuf {
        self.data_dir.join("stations/extracted/stations.csv")
    }

    fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("stations/processed")
    }

    pub async fn extract(&self) -> anyhow::Result<StageReport> {
        tracing::info!("Extracting Alternative Fuel Stations dataset using NREL API...");
        let url = prepare_url(&self.sources.stations_url, &[("api_key", &self.sources.nrel_api_key)]);

        let body = match self.source.get(&url).await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Stations download failed: {}", e);
                let failure = FetchFailure::new("fetch_stations", self.sources.stations_url.clone(), e);
                return Ok(StageReport::new(DATASET, "extract", 0).with_failures(vec![failure]));
            }
        };

        let records = match csv_store::parse_csv(&body, csv_store::SOURCE_DELIMITER) {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("Stations payload is not valid CSV: {:#}", e);
                let failure = FetchFailure::new("parse_stations", self.sources.stations_url.clone(), format!("{:#}", e));
                return Ok(StageReport::new(DATASET, "extract", 0).with_failures(vec![failure]));
            }
        };

        tracing::info!("Extracted {} records for Alternative Fuel Stations dataset", records.len());
        csv_store::write_csv(&self.extracted_path(), &records)?;
        Ok(StageReport::new(DATASET, "extract", records.len()))
    }

    pub async fn transform(&self) -> anyhow::Result<StageReport> {
        let records = csv_store::read_csv(&self.extracted_path())?;
        let records = self.normalize(records);
        let total = records.len();
        tracing::debug!(
            "{} of {} columns are shared by every fuel type",
            self.schema.common_columns(&records).len(),
            records.columns().len()
        );

        let stale = csv_store::clear_csv(&self.processed_dir())?;
        if stale > 0 {
            tracing::debug!("Removed {} partitions left by an earlier run", stale);
        }

        let mut report = StageReport::new(DATASET, "transform", total);
        for (label, partition) in self.partition(&records) {
            let table = table_name(&label);
            csv_store::write_csv(&self.processed_dir().join(format!("{}.csv", table)), &partition)?;
            report = report.with_table(&table, partition.len());
        }
        Ok(report)
    }

    pub async fn load(&self) -> anyhow::Result<StageReport> {
        let mut report = StageReport::new(DATASET, "load", 0);
        for path in csv_store::list_csv(&self.processed_dir())? {
            let Some(table) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let records = csv_store::read_csv(&path)?;
            let target = TableRef::new(DATASET, table);
            let rows = self.warehouse.load(&target, &records, self.write_mode).await?;
            report.rows += rows;
            report = report.with_table(&target.to_string(), rows);
        }
        Ok(report)
    }

    /// Cleanup of the wide station table, before it is split by fuel type.
    pub fn normalize(&self, records: RecordSet) -> RecordSet {
        let mapping = &self.mapping;
        let records = records
            .rename_columns_with(normalize_column_name)
            .drop_columns(&mapping.deprecated_columns)
            .drop_columns(&mapping.trash_columns);
        let records = self.apply_value_maps(records, &mapping.value_maps);

        with_station_location(with_station_address(records))
            .drop_null_rows(&["station_name"])
            .fill_nulls(&mapping.replace_null, UNKNOWN)
            .convert_datetime(&mapping.convert_to_datetime)
            .reorder(&mapping.reorder_columns)
            .assign_ids()
    }

    /// Split by fuel type, then run each fuel type's own steps over its partition.
    pub fn partition(&self, records: &RecordSet) -> BTreeMap<String, RecordSet> {
        self.schema
            .partition_stations(records)
            .into_iter()
            .map(|(label, partition)| {
                let steps = self
                    .schema
                    .code_for(&label)
                    .and_then(|code| self.mapping.fuel_steps.get(code));
                let partition = match steps {
                    Some(steps) => self.apply_fuel_steps(partition, steps),
                    None => partition,
                };
                (label, partition)
            })
            .collect()
    }

    fn apply_value_maps(&self, mut records: RecordSet, steps: &[ValueMapStep]) -> RecordSet {
        for step in steps {
            match self.mapping.value_map(&step.map) {
                Some(map) => records = records.map_values(&step.source, &step.target, map),
                None => tracing::warn!("Value map '{}' is not defined, {} left as is", step.map, step.source),
            }
        }
        records
    }

    fn apply_fuel_steps(&self, records: RecordSet, steps: &FuelSteps) -> RecordSet {
        let records = records.convert_int(&steps.int_columns);
        let mut records = self
            .apply_value_maps(records, &steps.value_maps)
            .fill_nulls(&steps.null_fill, UNKNOWN);

        for column in &steps.strip_quotes {
            records = records.map_column(column, |v| replace_text(v, |s| s.replace('"', "")));
        }
        for column in &steps.strip_commas {
            records = records.map_column(column, |v| replace_text(v, |s| s.replace(',', "")));
        }
        for column in &steps.list_columns {
            records = records.map_column(column, |v| {
                cell_text(v)
                    .and_then(|s| list_literal(&s))
                    .map(Value::String)
                    .unwrap_or(Value::Null)
            });
        }

        if steps.reorder.is_empty() {
            records
        } else {
            records.reorder(&steps.reorder)
        }
    }
}

fn replace_text<F>(value: &Value, f: F) -> Value
where
    F: Fn(&str) -> String,
{
    match value {
        Value::String(s) => Value::String(f(s)),
        other => other.clone(),
    }
}

/// `Fuel Type Code` -> `fuel_type_code`
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Warehouse table for a fuel label: `Ethanol E85` -> `ethanol_e85`
pub fn table_name(label: &str) -> String {
    let mut name = String::with_capacity(label.len());
    for c in label.trim().chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    let name = name.trim_matches('_');
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name.to_string()
    }
}

fn with_station_address(records: RecordSet) -> RecordSet {
    if !ADDRESS_PARTS.iter().any(|c| records.has_column(c)) {
        tracing::warn!("No address columns present, station_address not created");
        return records;
    }

    records
        .derive_column("station_address", |records, row| {
            let part = |column: &str| records.get(row, column).and_then(cell_text);
            station_address(
                part("street_address").as_deref(),
                part("city").as_deref(),
                part("state").as_deref(),
                part("zip").as_deref(),
                part("plus4").as_deref(),
            )
            .map(Value::String)
            .unwrap_or(Value::Null)
        })
        .drop_columns(&ADDRESS_PARTS)
}

fn with_station_location(records: RecordSet) -> RecordSet {
    if !records.has_column("latitude") || !records.has_column("longitude") {
        tracing::warn!("latitude/longitude not present, station_location not created");
        return records;
    }

    let before = records.len();
    let records = records.drop_null_rows(&["latitude", "longitude"]);
    if records.len() < before {
        tracing::debug!("Dropped {} rows without coordinates", before - records.len());
    }

    records
        .derive_column("station_location", |records, row| {
            let coordinate = |column: &str| {
                records
                    .get(row, column)
                    .and_then(cell_text)
                    .and_then(|s| s.trim().parse::<f64>().ok())
            };
            match (coordinate("longitude"), coordinate("latitude")) {
                (Some(lon), Some(lat)) => Value::String(wkt_point(lon, lat)),
                _ => Value::Null,
            }
        })
        .drop_columns(&["latitude", "longitude"])
}
