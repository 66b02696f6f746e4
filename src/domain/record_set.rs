// Record set - ordered columns with loosely typed rows
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

pub const ID_COLUMN: &str = "ID";

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
];
const DATETIME_OUTPUT: &str = "%Y-%m-%d %H:%M:%S";

/// A table of rows sharing one column list.
///
/// Every row holds exactly one cell per column; a missing value is `Value::Null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RecordSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a record set from JSON objects, the column list being the union of keys in
    /// first-seen order.
    pub fn from_objects<I>(objects: I) -> Self
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        let mut records = Self::default();
        for object in objects {
            records.push_object(object);
        }
        records
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Append a row, padding with nulls or truncating to the column count.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Append a JSON object as a row, adding any unseen keys as new columns.
    pub fn push_object(&mut self, object: Map<String, Value>) {
        let mut row = vec![Value::Null; self.columns.len()];
        for (key, value) in object {
            match self.column_index(&key) {
                Some(idx) => row[idx] = value,
                None => {
                    self.add_column(key);
                    row.push(value);
                }
            }
        }
        self.rows.push(row);
    }

    fn add_column(&mut self, name: String) {
        self.columns.push(name);
        for row in &mut self.rows {
            row.push(Value::Null);
        }
    }

    /// Vertical concatenation; the result carries the union of both column lists.
    pub fn concat(mut self, other: RecordSet) -> RecordSet {
        if self.columns.is_empty() && self.rows.is_empty() {
            return other;
        }

        let positions: Vec<usize> = other
            .columns
            .into_iter()
            .map(|column| match self.column_index(&column) {
                Some(idx) => idx,
                None => {
                    self.add_column(column);
                    self.columns.len() - 1
                }
            })
            .collect();

        for row in other.rows {
            let mut merged = vec![Value::Null; self.columns.len()];
            for (value, &idx) in row.into_iter().zip(&positions) {
                merged[idx] = value;
            }
            self.rows.push(merged);
        }
        self
    }

    pub fn concat_all<I>(sets: I) -> RecordSet
    where
        I: IntoIterator<Item = RecordSet>,
    {
        sets.into_iter().fold(RecordSet::default(), RecordSet::concat)
    }

    /// Keep only the columns accepted by `keep`.
    pub fn retain_columns<F>(mut self, mut keep: F) -> Self
    where
        F: FnMut(&str) -> bool,
    {
        let kept: Vec<bool> = self.columns.iter().map(|c| keep(c)).collect();
        if kept.iter().all(|k| *k) {
            return self;
        }

        self.columns = filter_by_mask(std::mem::take(&mut self.columns), &kept);
        self.rows = std::mem::take(&mut self.rows)
            .into_iter()
            .map(|row| filter_by_mask(row, &kept))
            .collect();
        self
    }

    /// Drop the named columns; names that are not present are ignored.
    pub fn drop_columns<S: AsRef<str>>(self, names: &[S]) -> Self {
        self.retain_columns(|c| !names.iter().any(|n| n.as_ref() == c))
    }

    pub fn rename_columns_with<F>(mut self, rename: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        for column in &mut self.columns {
            *column = rename(column);
        }
        self
    }

    /// Select the listed columns in the listed order. Listed names that do not exist
    /// are skipped, unlisted columns are dropped.
    pub fn reorder<S: AsRef<str>>(mut self, order: &[S]) -> Self {
        let mut picked: Vec<usize> = Vec::with_capacity(order.len());
        for name in order {
            match self.column_index(name.as_ref()) {
                Some(idx) if !picked.contains(&idx) => picked.push(idx),
                Some(_) => {}
                None => tracing::debug!("reorder: column {} not present, skipped", name.as_ref()),
            }
        }

        self.columns = picked.iter().map(|&i| self.columns[i].clone()).collect();
        self.rows = std::mem::take(&mut self.rows)
            .into_iter()
            .map(|row| picked.iter().map(|&i| row[i].clone()).collect())
            .collect();
        self
    }

    /// Replace every cell of `column` with `f(cell)`. Missing columns are a no-op.
    pub fn map_column<F>(mut self, column: &str, f: F) -> Self
    where
        F: Fn(&Value) -> Value,
    {
        let Some(idx) = self.column_index(column) else {
            tracing::warn!("map_column: column {} not present, left unchanged", column);
            return self;
        };
        for row in &mut self.rows {
            row[idx] = f(&row[idx]);
        }
        self
    }

    /// Write `f(row)` into `column`, creating it at the end if needed.
    pub fn derive_column<F>(mut self, column: &str, f: F) -> Self
    where
        F: Fn(&RecordSet, usize) -> Value,
    {
        let values: Vec<Value> = (0..self.rows.len()).map(|i| f(&self, i)).collect();
        let idx = match self.column_index(column) {
            Some(idx) => idx,
            None => {
                self.add_column(column.to_string());
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
        self
    }

    /// Translate `source` through `map` into `target` and drop `source`. Values with no
    /// entry in `map` become null.
    pub fn map_values(self, source: &str, target: &str, map: &HashMap<String, String>) -> Self {
        if !self.has_column(source) {
            tracing::warn!("map_values: column {} not present, {} not created", source, target);
            return self;
        }

        let mapped = self.derive_column(target, |records, row| {
            records
                .get(row, source)
                .and_then(cell_text)
                .and_then(|key| map.get(&key))
                .map(|label| Value::String(label.clone()))
                .unwrap_or(Value::Null)
        });

        if source == target {
            mapped
        } else {
            mapped.drop_columns(&[source])
        }
    }

    pub fn fill_nulls<S: AsRef<str>>(mut self, columns: &[S], fill: &str) -> Self {
        for column in columns {
            self = self.map_column(column.as_ref(), |value| match value {
                Value::Null => Value::String(fill.to_string()),
                Value::String(s) if s.trim().is_empty() => Value::String(fill.to_string()),
                other => other.clone(),
            });
        }
        self
    }

    /// Parse the listed columns as integers; unparseable cells become null.
    pub fn convert_int<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        for column in columns {
            self = self.map_column(column.as_ref(), |value| {
                parse_int(value).map(Value::from).unwrap_or(Value::Null)
            });
        }
        self
    }

    /// Rewrite the listed columns as `YYYY-MM-DD`.
    pub fn normalize_date<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        for column in columns {
            self = self.map_column(column.as_ref(), |value| {
                parse_datetime(value)
                    .map(|dt| Value::String(dt.date().format("%Y-%m-%d").to_string()))
                    .unwrap_or(Value::Null)
            });
        }
        self
    }

    /// Rewrite the listed columns as `YYYY-MM-DD HH:MM:SS`.
    pub fn convert_datetime<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        for column in columns {
            self = self.map_column(column.as_ref(), |value| {
                parse_datetime(value)
                    .map(|dt| Value::String(dt.format(DATETIME_OUTPUT).to_string()))
                    .unwrap_or(Value::Null)
            });
        }
        self
    }

    /// Add `target` holding the calendar year of the date in `source`.
    pub fn derive_year(self, source: &str, target: &str) -> Self {
        if !self.has_column(source) {
            tracing::warn!("derive_year: column {} not present, {} not created", source, target);
            return self;
        }
        self.derive_column(target, |records, row| {
            records
                .get(row, source)
                .and_then(parse_datetime)
                .map(|dt| Value::from(dt.year()))
                .unwrap_or(Value::Null)
        })
    }

    /// Drop rows where any of the listed columns is null or blank.
    pub fn drop_null_rows<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        let indices: Vec<usize> = columns
            .iter()
            .filter_map(|c| self.column_index(c.as_ref()))
            .collect();
        self.rows
            .retain(|row| indices.iter().all(|&i| cell_text(&row[i]).is_some()));
        self
    }

    /// Insert a 1-based sequential `ID` as the first column, replacing any existing one.
    pub fn assign_ids(self) -> Self {
        let mut records = self.drop_columns(&[ID_COLUMN]);
        records.columns.insert(0, ID_COLUMN.to_string());
        for (i, row) in records.rows.iter_mut().enumerate() {
            row.insert(0, Value::from(i as u64 + 1));
        }
        records
    }

    /// Split rows by the text of `column`. Null values, and every row when the column
    /// is missing, group under the empty string. Every group keeps the full column list.
    pub fn group_by(&self, column: &str) -> BTreeMap<String, RecordSet> {
        let mut groups: BTreeMap<String, RecordSet> = BTreeMap::new();
        let idx = self.column_index(column);
        if idx.is_none() && !self.rows.is_empty() {
            tracing::warn!("group_by: column {} not present, all rows grouped under \"\"", column);
        }

        for row in &self.rows {
            let key = idx.and_then(|i| cell_text(&row[i])).unwrap_or_default();
            groups
                .entry(key)
                .or_insert_with(|| RecordSet::new(self.columns.clone()))
                .rows
                .push(row.clone());
        }
        groups
    }
}

fn filter_by_mask<T>(items: Vec<T>, mask: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(mask)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect()
}

/// Text form of a cell; null and blank strings read as `None`.
pub fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    let text = cell_text(value)?;
    let text = text.trim();

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn sample() -> RecordSet {
        RecordSet::from_objects(vec![
            object(json!({"station_name": "A", "status_code": "E", "zip": "10001"})),
            object(json!({"station_name": "B", "status_code": "P", "city": "Denver"})),
        ])
    }

    #[test]
    fn test_from_objects_unions_columns() {
        let records = sample();
        assert_eq!(records.columns(), ["station_name", "status_code", "zip", "city"]);
        assert_eq!(records.get(0, "city"), Some(&Value::Null));
        assert_eq!(records.get(1, "city"), Some(&json!("Denver")));
    }

    #[test]
    fn test_concat_keeps_all_rows_and_columns() {
        let other = RecordSet::from_objects(vec![object(json!({"station_name": "C", "ev_network": "X"}))]);
        let merged = sample().concat(other);

        assert_eq!(merged.len(), 3);
        assert!(merged.has_column("ev_network"));
        assert_eq!(merged.get(2, "station_name"), Some(&json!("C")));
        assert_eq!(merged.get(0, "ev_network"), Some(&Value::Null));
    }

    #[test]
    fn test_concat_all_of_nothing_is_empty() {
        let merged = RecordSet::concat_all(Vec::new());
        assert!(merged.is_empty());
        assert!(merged.columns().is_empty());
    }

    #[test]
    fn test_map_values_replaces_source() {
        let mut map = HashMap::new();
        map.insert("E".to_string(), "Available".to_string());

        let records = sample().map_values("status_code", "status", &map);
        assert!(!records.has_column("status_code"));
        assert_eq!(records.get(0, "status"), Some(&json!("Available")));
        assert_eq!(records.get(1, "status"), Some(&Value::Null));
    }

    #[test]
    fn test_map_values_missing_source_is_noop() {
        let records = sample().map_values("owner_type_code", "owner_type", &HashMap::new());
        assert_eq!(records, sample());
    }

    #[test]
    fn test_reorder_selects_existing_columns() {
        let records = sample().reorder(&["city", "missing", "station_name"]);
        assert_eq!(records.columns(), ["city", "station_name"]);
        assert_eq!(records.rows()[1], vec![json!("Denver"), json!("B")]);
    }

    #[test]
    fn test_assign_ids_is_first_and_sequential() {
        let records = sample().assign_ids();
        assert_eq!(records.columns()[0], ID_COLUMN);
        assert_eq!(records.get(0, ID_COLUMN), Some(&json!(1)));
        assert_eq!(records.get(1, ID_COLUMN), Some(&json!(2)));
    }

    #[test]
    fn test_convert_int_and_dates() {
        let records = RecordSet::from_objects(vec![
            object(json!({"n": "3.0", "filed": "01/15/2021", "updated_at": "2023-02-01T10:11:12Z"})),
            object(json!({"n": "x", "filed": "bogus", "updated_at": null})),
        ])
        .convert_int(&["n"])
        .normalize_date(&["filed"])
        .derive_year("filed", "year")
        .convert_datetime(&["updated_at"]);

        assert_eq!(records.get(0, "n"), Some(&json!(3)));
        assert_eq!(records.get(1, "n"), Some(&Value::Null));
        assert_eq!(records.get(0, "filed"), Some(&json!("2021-01-15")));
        assert_eq!(records.get(0, "year"), Some(&json!(2021)));
        assert_eq!(records.get(1, "year"), Some(&Value::Null));
        assert_eq!(records.get(0, "updated_at"), Some(&json!("2023-02-01 10:11:12")));
    }

    #[test]
    fn test_fill_nulls_and_drop_null_rows() {
        let records = sample().fill_nulls(&["city"], "Unknown");
        assert_eq!(records.get(0, "city"), Some(&json!("Unknown")));

        let records = sample().drop_null_rows(&["zip"]);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_group_by_keeps_columns() {
        let groups = sample().group_by("status_code");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["E"].columns(), sample().columns());
        assert_eq!(groups["P"].len(), 1);
    }

    #[test]
    fn test_group_by_missing_column_keeps_rows() {
        let groups = sample().group_by("fuel_type");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[""].len(), 2);
        assert_eq!(groups[""].columns(), sample().columns());
    }
}
