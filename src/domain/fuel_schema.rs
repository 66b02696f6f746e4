// Fuel-type schema - splits the wide station table into per-fuel tables
use super::record_set::RecordSet;
use std::collections::{BTreeMap, BTreeSet};

pub const FUEL_TYPE_COLUMN: &str = "fuel_type";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuelType {
    pub label: String,
    pub code: String,
}

impl FuelType {
    fn owns(&self, column: &str) -> bool {
        is_namespaced(column, &self.code)
    }
}

/// Label/code pairs for every known fuel type, built once from the mapping table.
///
/// A column belongs to a fuel type when its name is the fuel code followed by `_`;
/// every other column is common to all partitions.
#[derive(Debug, Clone, Default)]
pub struct FuelSchema {
    fuel_types: Vec<FuelType>,
}

impl FuelSchema {
    pub fn from_code_map(codes: &BTreeMap<String, String>) -> Self {
        let fuel_types = codes
            .iter()
            .map(|(label, code)| FuelType {
                label: label.clone(),
                code: code.clone(),
            })
            .collect();
        Self { fuel_types }
    }

    pub fn fuel_types(&self) -> &[FuelType] {
        &self.fuel_types
    }

    pub fn code_for(&self, label: &str) -> Option<&str> {
        self.fuel_types
            .iter()
            .find(|f| f.label == label)
            .map(|f| f.code.as_str())
    }

    /// Codes of every fuel type other than `label`. An unknown label yields an empty
    /// set, so its partition keeps every column.
    pub fn other_codes(&self, label: &str) -> BTreeSet<String> {
        if self.code_for(label).is_none() {
            return BTreeSet::new();
        }
        self.fuel_types
            .iter()
            .filter(|f| f.label != label)
            .map(|f| f.code.clone())
            .collect()
    }

    /// The fuel type a column is namespaced under, preferring the longest code.
    pub fn owner_of(&self, column: &str) -> Option<&FuelType> {
        self.fuel_types
            .iter()
            .filter(|f| f.owns(column))
            .max_by_key(|f| f.code.len())
    }

    pub fn common_columns(&self, records: &RecordSet) -> Vec<String> {
        records
            .columns()
            .iter()
            .filter(|c| self.owner_of(c).is_none())
            .cloned()
            .collect()
    }

    /// One schema-narrowed table per fuel type observed in `records`.
    pub fn partition_stations(&self, records: &RecordSet) -> BTreeMap<String, RecordSet> {
        partition_by(records, FUEL_TYPE_COLUMN)
            .into_iter()
            .map(|(label, partition)| {
                let codes = self.other_codes(&label);
                if codes.is_empty() && self.code_for(&label).is_none() {
                    tracing::warn!(
                        "Fuel type '{}' has no code mapping, keeping all {} columns",
                        label,
                        partition.columns().len()
                    );
                }
                let narrowed = strip_foreign_columns(partition, &codes);
                tracing::debug!(
                    "Partition '{}': {} rows, {} columns",
                    label,
                    narrowed.len(),
                    narrowed.columns().len()
                );
                (label, narrowed)
            })
            .collect()
    }
}

pub fn partition_by(records: &RecordSet, column: &str) -> BTreeMap<String, RecordSet> {
    records.group_by(column)
}

/// Drop every column namespaced under one of `codes`.
pub fn strip_foreign_columns(records: RecordSet, codes: &BTreeSet<String>) -> RecordSet {
    records.retain_columns(|column| !codes.iter().any(|code| is_namespaced(column, code)))
}

fn is_namespaced(column: &str, code: &str) -> bool {
    column
        .strip_prefix(code)
        .is_some_and(|rest| rest.starts_with('_'))
}
