// In-memory source and warehouse used by the service tests
use crate::application::source_client::{FetchError, SourceClient};
use crate::application::warehouse::{TableRef, Warehouse, WriteMode};
use crate::domain::record_set::RecordSet;
use crate::infrastructure::config::SourcesSettings;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Serves canned bodies by URL; unknown URLs answer 404.
#[derive(Default)]
pub struct FakeSource {
    bodies: HashMap<String, Bytes>,
    failing: HashSet<String>,
}

impl FakeSource {
    pub fn with(mut self, url: &str, body: Value) -> Self {
        self.bodies.insert(url.to_string(), Bytes::from(body.to_string()));
        self
    }

    pub fn with_text(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), Bytes::from(body.to_string()));
        self
    }

    /// Make `url` fail at the transport level
    pub fn failing(mut self, url: &str) -> Self {
        self.bodies.remove(url);
        self.failing.insert(url.to_string());
        self
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        if self.failing.contains(url) {
            return Err(FetchError::Transport {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        self.bodies.get(url).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

#[derive(Default)]
pub struct RecordingWarehouse {
    loads: Mutex<Vec<(TableRef, usize, WriteMode)>>,
}

impl RecordingWarehouse {
    pub fn loads(&self) -> Vec<(TableRef, usize, WriteMode)> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    async fn load(&self, table: &TableRef, records: &RecordSet, mode: WriteMode) -> anyhow::Result<usize> {
        self.loads
            .lock()
            .unwrap()
            .push((table.clone(), records.len(), mode));
        Ok(records.len())
    }
}

pub fn test_sources() -> SourcesSettings {
    SourcesSettings {
        years_url: "http://nhtsa.test/years".to_string(),
        makes_url: "http://nhtsa.test/makes?year=${year}".to_string(),
        models_url: "http://nhtsa.test/models?year=${year}&make=${make}".to_string(),
        complaints_url: "http://nhtsa.test/complaints?make=${make}&model=${model}&year=${year}".to_string(),
        stations_url: "http://nrel.test/stations.csv?api_key=${api_key}".to_string(),
        nrel_api_key: "KEY".to_string(),
        fuel_economy_url: "http://fueleconomy.test/vehicles.csv".to_string(),
        timeout_secs: 0,
    }
}
