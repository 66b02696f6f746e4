// Warehouse trait - destination for finished record sets
use crate::domain::record_set::RecordSet;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace the table's contents
    #[default]
    Truncate,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: &str, table: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Load `records` into `table`, returning the number of rows written
    async fn load(&self, table: &TableRef, records: &RecordSet, mode: WriteMode) -> anyhow::Result<usize>;
}
