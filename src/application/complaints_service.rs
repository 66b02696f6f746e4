// Complaints service - walks the NHTSA catalog and fetches complaints per vehicle
use crate::application::source_client::{FetchError, SourceClient};
use crate::application::warehouse::{TableRef, Warehouse, WriteMode};
use crate::domain::address::Address;
use crate::domain::harvest::{FetchFailure, Harvest, StageReport};
use crate::domain::record_set::{cell_text, RecordSet};
use crate::domain::text::capitalize_words;
use crate::infrastructure::config::{prepare_url, ComplaintsMapping, SourcesSettings};
use crate::infrastructure::csv_store;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

const DATASET: &str = "complaints";
const PRODUCTS_KEY: &str = "products";
const PRODUCT_SUFFIX: &str = "_product";

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    results: Vec<Map<String, Value>>,
}

#[derive(Clone)]
pub struct ComplaintsService {
    source: Arc<dyn SourceClient>,
    warehouse: Arc<dyn Warehouse>,
    sources: SourcesSettings,
    mapping: ComplaintsMapping,
    data_dir: PathBuf,
    workers: usize,
    write_mode: WriteMode,
}

impl ComplaintsService {
    pub fn new(
        source: Arc<dyn SourceClient>,
        warehouse: Arc<dyn Warehouse>,
        sources: SourcesSettings,
        mapping: ComplaintsMapping,
        data_dir: PathBuf,
        workers: usize,
    ) -> Self {
        Self {
            source,
            warehouse,
            sources,
            mapping,
            data_dir,
            workers: workers.max(1),
            write_mode: WriteMode::Truncate,
        }
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    fn extracted_path(&self) -> PathBuf {
        self.data_dir.join("complaints/extracted/complaints.csv")
    }

    fn processed_path(&self) -> PathBuf {
        self.data_dir.join("complaints/processed/complaints.csv")
    }

    pub async fn list_years(&self) -> Result<Vec<i32>, FetchError> {
        let values = self.list_catalog(&self.sources.years_url, "modelYear").await?;

        let mut years = Vec::with_capacity(values.len());
        for value in values {
            match value.trim().parse::<i32>() {
                Ok(year) => years.push(year),
                Err(_) => tracing::warn!("Skipping unparseable model year '{}'", value),
            }
        }
        Ok(years)
    }

    pub async fn list_makes(&self, year: i32) -> Result<Vec<String>, FetchError> {
        let year = year.to_string();
        let url = prepare_url(&self.sources.makes_url, &[("year", &year)]);
        self.list_catalog(&url, "make").await
    }

    pub async fn list_models(&self, year: i32, make: &str) -> Result<Vec<String>, FetchError> {
        let year = year.to_string();
        let url = prepare_url(&self.sources.models_url, &[("year", &year), ("make", make)]);
        self.list_catalog(&url, "model").await
    }

    /// Values of `field` across the `results` array of a catalog listing. Entries
    /// without the field read as empty strings.
    async fn list_catalog(&self, url: &str, field: &str) -> Result<Vec<String>, FetchError> {
        let response = self.fetch_results(url).await?;
        Ok(response
            .results
            .iter()
            .map(|entry| entry.get(field).and_then(cell_text).unwrap_or_default())
            .collect())
    }

    async fn fetch_results(&self, url: &str) -> Result<CatalogResponse, FetchError> {
        let body = self.source.get(url).await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::payload(url, e))
    }

    /// Every (year, make, model) with complaints, one worker per year.
    ///
    /// A failed make listing drops that year; a failed model listing drops only that
    /// make. Both are reported in the harvest.
    pub async fn enumerate_addresses(&self, years: &[i32]) -> Harvest<BTreeSet<Address>> {
        tracing::info!(
            "Extracting (make, model, year) combinations for {} years with {} workers...",
            years.len(),
            self.workers
        );

        let per_year: Vec<Harvest<Vec<Address>>> = stream::iter(years.iter().copied())
            .map(|year| self.addresses_for_year(year))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut addresses = BTreeSet::new();
        let mut failures = Vec::new();
        for harvest in per_year {
            addresses.extend(harvest.data);
            failures.extend(harvest.failures);
        }

        tracing::info!("Extracted {} combinations", addresses.len());
        Harvest::new(addresses, failures)
    }

    async fn addresses_for_year(&self, year: i32) -> Harvest<Vec<Address>> {
        let makes = match self.list_makes(year).await {
            Ok(makes) => makes,
            Err(e) => {
                tracing::error!("list_makes failed for {}: {}", year, e);
                return Harvest::new(Vec::new(), vec![FetchFailure::new("list_makes", year.to_string(), e)]);
            }
        };

        let mut addresses = Vec::new();
        let mut failures = Vec::new();
        for make in makes.iter().filter(|m| !m.trim().is_empty()) {
            match self.list_models(year, make).await {
                Ok(models) => {
                    let before = addresses.len();
                    addresses.extend(models.iter().filter_map(|model| Address::new(year, make, model)));
                    tracing::debug!("{} {}: {} models", year, make, addresses.len() - before);
                }
                Err(e) => {
                    tracing::error!("list_models failed for {} {}: {}", year, make, e);
                    failures.push(FetchFailure::new("list_models", format!("{} {}", year, make), e));
                }
            }
        }

        tracing::debug!("Extracted {} combinations for {}", addresses.len(), year);
        Harvest::new(addresses, failures)
    }

    pub async fn fetch_complaints(&self, address: &Address) -> Result<RecordSet, FetchError> {
        let year = address.model_year.to_string();
        let url = prepare_url(
            &self.sources.complaints_url,
            &[("make", &address.make), ("model", &address.model), ("year", &year)],
        );

        let response = self.fetch_results(&url).await?;
        let records = flatten_complaints(response.results);
        tracing::debug!("Extracted {} complaints for {}", records.len(), address);
        Ok(records)
    }

    /// Fetch every address in parallel and stack the results. Failed or empty
    /// fetches contribute no rows.
    pub async fn fetch_all(&self, addresses: &BTreeSet<Address>) -> Harvest<RecordSet> {
        tracing::info!("Extracting complaints for {} combinations...", addresses.len());

        let fetched: Vec<(Address, Result<RecordSet, FetchError>)> = stream::iter(addresses.iter().cloned())
            .map(|address| async move {
                let result = self.fetch_complaints(&address).await;
                (address, result)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut sets = Vec::new();
        let mut failures = Vec::new();
        for (address, result) in fetched {
            match result {
                Ok(records) if records.is_empty() => {}
                Ok(records) => sets.push(records),
                Err(e) => {
                    tracing::error!("fetch_complaints failed for {}: {}", address, e);
                    failures.push(FetchFailure::new("fetch_complaints", address.to_string(), e));
                }
            }
        }

        let complaints = RecordSet::concat_all(sets);
        tracing::info!("Extracted {} complaints", complaints.len());
        Harvest::new(complaints, failures)
    }

    pub async fn extract(&self) -> anyhow::Result<StageReport> {
        tracing::info!("Extracting years using NHTSA API...");
        let mut failures = Vec::new();
        let years = match self.list_years().await {
            Ok(years) => years,
            Err(e) => {
                tracing::error!("list_years failed: {}", e);
                failures.push(FetchFailure::new("list_years", self.sources.years_url.clone(), e));
                Vec::new()
            }
        };
        tracing::info!("Extracted {} years", years.len());

        let addresses = self.enumerate_addresses(&years).await;
        failures.extend(addresses.failures);

        let complaints = self.fetch_all(&addresses.data).await;
        if !complaints.is_complete() || !failures.is_empty() {
            tracing::warn!(
                "Complaints extraction absorbed {} failures, dataset may be incomplete",
                failures.len() + complaints.failures.len()
            );
        }
        failures.extend(complaints.failures);

        csv_store::write_csv(&self.extracted_path(), &complaints.data)?;
        Ok(StageReport::new(DATASET, "extract", complaints.data.len()).with_failures(failures))
    }

    pub async fn transform(&self) -> anyhow::Result<StageReport> {
        let records = csv_store::read_csv(&self.extracted_path())?;
        let records = self.clean(records);
        csv_store::write_csv(&self.processed_path(), &records)?;
        Ok(StageReport::new(DATASET, "transform", records.len()))
    }

    pub async fn load(&self) -> anyhow::Result<StageReport> {
        let records = csv_store::read_csv(&self.processed_path())?;
        let table = TableRef::new(DATASET, "vehicle_complaints");
        let rows = self.warehouse.load(&table, &records, self.write_mode).await?;
        Ok(StageReport::new(DATASET, "load", rows).with_table(&table.to_string(), rows))
    }

    /// Column cleanup applied to the extracted complaints.
    pub fn clean(&self, records: RecordSet) -> RecordSet {
        let mapping = &self.mapping;
        let mut records = records
            .drop_columns(&mapping.trash_columns)
            .normalize_date(&mapping.fix_date);

        for column in &mapping.fix_capitalize {
            records = records.map_column(column, |value| match cell_text(value) {
                Some(text) => Value::String(capitalize_words(&text)),
                None => Value::Null,
            });
        }

        records
            .derive_year(&mapping.year_source, &mapping.year_column)
            .convert_datetime(&mapping.convert_to_datetime)
            .convert_int(&mapping.convert_to_int)
            .reorder(&mapping.reorder_columns)
            .assign_ids()
    }
}

/// One row per complaint, or per (complaint, product) when a complaint lists
/// products. A product field whose name is a complaint column anywhere in `results`
/// gets a `_product` suffix.
pub fn flatten_complaints(results: Vec<Map<String, Value>>) -> RecordSet {
    let flattened: Vec<(Map<String, Value>, Option<Value>)> = results
        .into_iter()
        .map(|mut result| {
            let products = result.remove(PRODUCTS_KEY);
            (flatten_object(result), products)
        })
        .collect();

    let parent_columns: HashSet<String> = flattened
        .iter()
        .flat_map(|(parent, _)| parent.keys().cloned())
        .collect();

    let mut rows = Vec::new();
    for (parent, products) in flattened {
        let items = match products {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => {
                rows.push(parent);
                continue;
            }
        };

        for item in items {
            let mut row = parent.clone();
            let product = match item {
                Value::Object(object) => flatten_object(object),
                Value::Null => Map::new(),
                other => Map::from_iter([(PRODUCTS_KEY.to_string(), other)]),
            };
            for (key, value) in product {
                let key = if parent_columns.contains(&key) {
                    format!("{}{}", key, PRODUCT_SUFFIX)
                } else {
                    key
                };
                row.insert(key, value);
            }
            rows.push(row);
        }
    }

    RecordSet::from_objects(rows)
}

/// Nested objects become dotted column names.
fn flatten_object(object: Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    flatten_into(&mut flat, None, object);
    flat
}

fn flatten_into(flat: &mut Map<String, Value>, prefix: Option<&str>, object: Map<String, Value>) {
    for (key, value) in object {
        let key = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key,
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => flatten_into(flat, Some(&key), nested),
            other => {
                flat.insert(key, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{test_sources, FakeSource, RecordingWarehouse};
    use serde_json::json;
    use tempfile::TempDir;

    fn service(source: FakeSource, data_dir: PathBuf) -> (ComplaintsService, Arc<RecordingWarehouse>) {
        let warehouse = Arc::new(RecordingWarehouse::default());
        let mapping: ComplaintsMapping = toml::from_str(include_str!("../../config/complaints.toml")).unwrap();
        let service = ComplaintsService::new(
            Arc::new(source),
            warehouse.clone(),
            test_sources(),
            mapping,
            data_dir,
            4,
        );
        (service, warehouse)
    }

    fn results(values: Value) -> Vec<Map<String, Value>> {
        serde_json::from_value(values).unwrap()
    }

    fn catalog() -> FakeSource {
        FakeSource::default()
            .with("http://nhtsa.test/years", json!({"count": 2, "results": [{"modelYear": "2020"}, {"modelYear": "2021"}, {"modelYear": "n/a"}]}))
            .with("http://nhtsa.test/makes?year=2020", json!({"results": [{"make": "HONDA"}, {"make": ""}]}))
            .with("http://nhtsa.test/makes?year=2021", json!({"results": [{"make": "FORD"}, {"make": "MERCEDES-BENZ"}]}))
            .with("http://nhtsa.test/models?year=2020&make=HONDA", json!({"results": [{"model": "CIVIC"}, {"model": ""}, {"model": "CIVIC"}]}))
            .with("http://nhtsa.test/models?year=2021&make=FORD", json!({"results": [{"model": "F-150"}]}))
            .with("http://nhtsa.test/models?year=2021&make=MERCEDES-BENZ", json!({"results": []}))
    }

    #[tokio::test]
    async fn test_list_years_skips_unparseable() {
        let (service, _) = service(catalog(), PathBuf::from("unused"));
        assert_eq!(service.list_years().await.unwrap(), vec![2020, 2021]);
    }

    #[tokio::test]
    async fn test_enumerate_addresses_excludes_empty_entries() {
        let (service, _) = service(catalog(), PathBuf::from("unused"));
        let harvest = service.enumerate_addresses(&[2020, 2021]).await;

        let expected: BTreeSet<Address> = [
            Address::new(2020, "HONDA", "CIVIC").unwrap(),
            Address::new(2021, "FORD", "F-150").unwrap(),
        ]
        .into_iter()
        .collect();
        assert_eq!(harvest.data, expected);
        assert!(harvest.is_complete());
    }

    #[tokio::test]
    async fn test_failed_make_listing_only_drops_its_year() {
        let source = catalog().failing("http://nhtsa.test/makes?year=2020");
        let (service, _) = service(source, PathBuf::from("unused"));

        let harvest = service.enumerate_addresses(&[2020, 2021]).await;
        assert_eq!(harvest.data.len(), 1);
        assert!(harvest.data.iter().all(|a| a.model_year == 2021));
        assert_eq!(harvest.failures.len(), 1);
        assert_eq!(harvest.failures[0].operation, "list_makes");
        assert_eq!(harvest.failures[0].target, "2020");

        let only_2020 = service.enumerate_addresses(&[2020]).await;
        assert!(only_2020.data.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_failure() {
        let source = catalog().with("http://nhtsa.test/makes?year=2020", json!({"message": "no results key"}));
        let (service, _) = service(source, PathBuf::from("unused"));

        let err = service.list_makes(2020).await.unwrap_err();
        assert!(matches!(err, FetchError::Payload { .. }));
    }

    #[test]
    fn test_flatten_without_products_keeps_top_level_keys() {
        let records = flatten_complaints(results(json!([
            {"odiNumber": 1, "crash": false, "summary": "brakes"},
            {"odiNumber": 2, "crash": true, "summary": "engine"},
        ])));

        assert_eq!(records.columns(), ["odiNumber", "crash", "summary"]);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_flatten_explodes_products_with_suffix() {
        let records = flatten_complaints(results(json!([
            {
                "odiNumber": 1,
                "manufacturer": "Honda (American Honda Motor Co.)",
                "products": [
                    {"type": "Vehicle", "productMake": "HONDA", "manufacturer": "Honda"},
                    {"type": "Tire", "productMake": "MICHELIN", "manufacturer": "Michelin"}
                ]
            },
            {"odiNumber": 2, "manufacturer": "Ford", "products": []}
        ])));

        assert_eq!(records.len(), 3);
        assert!(!records.has_column("products"));
        assert_eq!(records.get(0, "manufacturer_product"), Some(&json!("Honda")));
        assert_eq!(records.get(1, "productMake"), Some(&json!("MICHELIN")));
        assert_eq!(records.get(1, "odiNumber"), Some(&json!(1)));
        assert_eq!(records.get(2, "odiNumber"), Some(&json!(2)));
        assert_eq!(records.get(2, "type"), Some(&Value::Null));
    }

    #[test]
    fn test_flatten_suffix_is_decided_per_column() {
        let records = flatten_complaints(results(json!([
            {"odiNumber": 1, "manufacturer": "Honda Co", "products": [{"manufacturer": "HONDA"}]},
            {"odiNumber": 2, "products": [{"manufacturer": "FORD"}]}
        ])));

        assert_eq!(records.get(0, "manufacturer_product"), Some(&json!("HONDA")));
        assert_eq!(records.get(1, "manufacturer"), Some(&Value::Null));
        assert_eq!(records.get(1, "manufacturer_product"), Some(&json!("FORD")));
    }

    #[test]
    fn test_flatten_nested_objects() {
        let records = flatten_complaints(results(json!([{"id": 1, "meta": {"source": "web"}}])));
        assert_eq!(records.columns(), ["id", "meta.source"]);
    }

    #[tokio::test]
    async fn test_fetch_all_counts_failures_and_skips_empty() {
        let source = catalog()
            .with(
                "http://nhtsa.test/complaints?make=HONDA&model=CIVIC&year=2020",
                json!({"count": 1, "results": [{"odiNumber": 7, "products": [{"productModel": "CIVIC"}]}]}),
            )
            .with("http://nhtsa.test/complaints?make=FORD&model=RANGER&year=2021", json!({"count": 0, "results": []}));
        let (service, _) = service(source, PathBuf::from("unused"));

        let addresses: BTreeSet<Address> = [
            Address::new(2020, "HONDA", "CIVIC").unwrap(),
            Address::new(2021, "FORD", "RANGER").unwrap(),
            Address::new(2021, "FORD", "F-150").unwrap(),
        ]
        .into_iter()
        .collect();

        let harvest = service.fetch_all(&addresses).await;
        assert_eq!(harvest.data.len(), 1);
        assert_eq!(harvest.data.get(0, "productModel"), Some(&json!("CIVIC")));
        assert_eq!(harvest.failures.len(), 1);
        assert_eq!(harvest.failures[0].target, "2021 FORD F-150");
    }

    #[test]
    fn test_clean_shapes_processed_columns() {
        let (service, _) = service(FakeSource::default(), PathBuf::from("unused"));
        let extracted = flatten_complaints(results(json!([{
            "odiNumber": 11,
            "manufacturer": "Ford Motor Company",
            "crash": "False",
            "fire": "False",
            "numberOfInjuries": "0",
            "numberOfDeaths": "0",
            "dateComplaintFiled": "03/14/2021",
            "vin": "1FT",
            "products": [{"type": "Vehicle", "productYear": "2021", "productMake": "FORD", "productModel": "F-150 SUPER DUTY", "manufacturer": "FORD MOTOR COMPANY"}]
        }])));

        let cleaned = service.clean(extracted);
        assert_eq!(cleaned.columns()[0], "ID");
        assert_eq!(cleaned.columns()[1], "complaintYear");
        assert!(!cleaned.has_column("vin"));
        assert_eq!(cleaned.get(0, "complaintYear"), Some(&json!(2021)));
        assert_eq!(cleaned.get(0, "dateComplaintFiled"), Some(&json!("2021-03-14 00:00:00")));
        assert_eq!(cleaned.get(0, "productModel"), Some(&json!("F-150 Super Duty")));
        assert_eq!(cleaned.get(0, "manufacturer_product"), Some(&json!("Ford Motor Company")));
        assert_eq!(cleaned.get(0, "productYear"), Some(&json!(2021)));
    }

    #[tokio::test]
    async fn test_extract_transform_load_flow() {
        let dir = TempDir::new().unwrap();
        let source = catalog()
            .with(
                "http://nhtsa.test/complaints?make=HONDA&model=CIVIC&year=2020",
                json!({"results": [{"odiNumber": 1, "dateComplaintFiled": "01/02/2020", "products": [{"productMake": "HONDA", "productModel": "CIVIC"}]}]}),
            )
            .failing("http://nhtsa.test/complaints?make=FORD&model=F-150&year=2021");
        let (service, warehouse) = service(source, dir.path().to_path_buf());

        let extracted = service.extract().await.unwrap();
        assert_eq!(extracted.rows, 1);
        assert_eq!(extracted.failures.len(), 1);

        let transformed = service.transform().await.unwrap();
        assert_eq!(transformed.rows, 1);

        let loaded = service.load().await.unwrap();
        assert_eq!(loaded.rows, 1);

        let loads = warehouse.loads();
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].0, TableRef::new("complaints", "vehicle_complaints"));
        assert_eq!(loads[0].2, WriteMode::Truncate);
    }
}
