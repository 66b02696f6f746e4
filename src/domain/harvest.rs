// Tolerant stage outcomes - data plus the failures absorbed while producing it
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub operation: String,
    pub target: String,
    pub reason: String,
}

impl FetchFailure {
    pub fn new(operation: &str, target: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            operation: operation.to_string(),
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Harvest<T> {
    pub data: T,
    pub failures: Vec<FetchFailure>,
}

impl<T> Harvest<T> {
    pub fn new(data: T, failures: Vec<FetchFailure>) -> Self {
        Self { data, failures }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Summary of one pipeline stage, returned to whoever triggered it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    pub dataset: String,
    pub stage: String,
    pub rows: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableCount>,
    pub failures: Vec<FetchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableCount {
    pub table: String,
    pub rows: usize,
}

impl StageReport {
    pub fn new(dataset: &str, stage: &str, rows: usize) -> Self {
        Self {
            dataset: dataset.to_string(),
            stage: stage.to_string(),
            rows,
            ..Default::default()
        }
    }

    pub fn with_failures(mut self, failures: Vec<FetchFailure>) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_table(mut self, table: &str, rows: usize) -> Self {
        self.tables.push(TableCount {
            table: table.to_string(),
            rows,
        });
        self
    }
}
