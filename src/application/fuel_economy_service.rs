// Fuel economy service - fueleconomy.gov vehicle records, loaded as published
use crate::application::source_client::SourceClient;
use crate::application::warehouse::{TableRef, Warehouse, WriteMode};
use crate::domain::harvest::{FetchFailure, StageReport};
use crate::infrastructure::config::SourcesSettings;
use crate::infrastructure::csv_store;
use std::path::PathBuf;
use std::sync::Arc;

const DATASET: &str = "fuel";
const TABLE: &str = "fuel_economy";

#[derive(Clone)]
pub struct FuelEconomyService {
    source: Arc<dyn SourceClient>,
    warehouse: Arc<dyn Warehouse>,
    sources: SourcesSettings,
    data_dir: PathBuf,
    write_mode: WriteMode,
}

impl FuelEconomyService {
    pub fn new(
        source: Arc<dyn SourceClient>,
        warehouse: Arc<dyn Warehouse>,
        sources: SourcesSettings,
        data_dir: PathBuf,
    ) -> Self {
        Self {
            source,
            warehouse,
            sources,
            data_dir,
            write_mode: WriteMode::Truncate,
        }
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    fn extracted_path(&self) -> PathBuf {
        self.data_dir.join("fuel/extracted/fuel.csv")
    }

    pub async fn extract(&self) -> anyhow::Result<StageReport> {
        tracing::info!("Extracting Fuel Economy dataset...");
        let url = &self.sources.fuel_economy_url;

        let records = match self.source.get(url).await {
            Ok(body) => match csv_store::parse_csv(&body, csv_store::SOURCE_DELIMITER) {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!("Fuel economy payload is not valid CSV: {:#}", e);
                    let failure = FetchFailure::new("parse_fuel_economy", url.clone(), format!("{:#}", e));
                    return Ok(StageReport::new(DATASET, "extract", 0).with_failures(vec![failure]));
                }
            },
            Err(e) => {
                tracing::error!("Fuel economy download failed: {}", e);
                let failure = FetchFailure::new("fetch_fuel_economy", url.clone(), e);
                return Ok(StageReport::new(DATASET, "extract", 0).with_failures(vec![failure]));
            }
        };

        tracing::info!("Extracted {} records for Fuel Economy dataset", records.len());
        csv_store::write_csv(&self.extracted_path(), &records)?;
        Ok(StageReport::new(DATASET, "extract", records.len()))
    }

    pub async fn load(&self) -> anyhow::Result<StageReport> {
        let records = csv_store::read_csv(&self.extracted_path())?;
        let target = TableRef::new(DATASET, TABLE);
        let rows = self.warehouse.load(&target, &records, self.write_mode).await?;
        Ok(StageReport::new(DATASET, "load", rows).with_table(&target.to_string(), rows))
    }
}
