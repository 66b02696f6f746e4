// BigQuery warehouse implementation over the REST API, one load job per table
use crate::application::warehouse::{TableRef, Warehouse, WriteMode};
use crate::domain::record_set::RecordSet;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

const BOUNDARY: &str = "autodata_etl_load_job";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLLS: u32 = 900;
const STATE_DONE: &str = "DONE";

#[derive(Debug, Clone)]
pub struct BigQueryWarehouse {
    client: reqwest::Client,
    base_url: String,
    upload_url: String,
    project_id: String,
    access_token: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl BigQueryWarehouse {
    pub fn new(base_url: String, upload_url: String, project_id: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            upload_url: upload_url.trim_end_matches('/').to_string(),
            project_id,
            access_token,
            poll_interval: POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn jobs_upload_url(&self) -> String {
        format!("{}/projects/{}/jobs?uploadType=multipart", self.upload_url, self.project_id)
    }

    fn job_url(&self, job: &JobReference) -> String {
        let url = format!("{}/projects/{}/jobs/{}", self.base_url, self.project_id, job.job_id);
        match &job.location {
            Some(location) => format!("{}?location={}", url, urlencoding::encode(location)),
            None => url,
        }
    }

    fn load_configuration(&self, table: &TableRef, mode: WriteMode) -> Value {
        json!({
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": self.project_id,
                        "datasetId": table.dataset,
                        "tableId": table.table,
                    },
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": write_disposition(mode),
                    "createDisposition": "CREATE_IF_NEEDED",
                    "autodetect": true,
                }
            }
        })
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("Failed to send request to BigQuery")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("BigQuery request failed with status {}: {}", status, body);
        }

        response
            .json::<T>()
            .await
            .context("Failed to parse BigQuery response")
    }

    /// Poll `job` until BigQuery reports it done, failing on its error result.
    async fn wait_for(&self, table: &TableRef, mut job: Job) -> Result<()> {
        let mut polls = 0;
        while job.status.state != STATE_DONE {
            if polls >= MAX_POLLS {
                anyhow::bail!(
                    "BigQuery load job {} for {} still {} after {} polls",
                    job.job_reference.job_id,
                    table,
                    job.status.state,
                    polls
                );
            }
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;
            job = self.send(self.client.get(self.job_url(&job.job_reference))).await?;
            tracing::debug!("Load job {} is {}", job.job_reference.job_id, job.status.state);
        }

        if let Some(error) = &job.status.error_result {
            anyhow::bail!("BigQuery load job for {} failed: {}", table, describe(error));
        }
        Ok(())
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn load(&self, table: &TableRef, records: &RecordSet, mode: WriteMode) -> Result<usize> {
        if records.is_empty() {
            tracing::warn!("No rows for {}, load job skipped", table);
            return Ok(0);
        }

        let body = multipart_body(&self.load_configuration(table, mode), &newline_json(records));
        let request = self
            .client
            .post(self.jobs_upload_url())
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", BOUNDARY),
            )
            .body(body);

        let job: Job = self.send(request).await?;
        tracing::debug!("Started load job {} for {}", job.job_reference.job_id, table);
        self.wait_for(table, job).await?;

        tracing::info!("Loaded {} rows into {} ({:?})", records.len(), table, mode);
        Ok(records.len())
    }
}

fn describe(error: &ErrorProto) -> String {
    format!(
        "{} {}",
        error.reason.as_deref().unwrap_or("unknown"),
        error.message.as_deref().unwrap_or_default()
    )
    .trim()
    .to_string()
}

pub fn write_disposition(mode: WriteMode) -> &'static str {
    match mode {
        WriteMode::Truncate => "WRITE_TRUNCATE",
        WriteMode::Append => "WRITE_APPEND",
    }
}

fn multipart_body(configuration: &Value, data: &str) -> String {
    format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{config}\r\n\
         --{b}\r\nContent-Type: application/octet-stream\r\n\r\n{data}\r\n--{b}--\r\n",
        b = BOUNDARY,
        config = configuration,
        data = data
    )
}

/// BigQuery column names allow only letters, digits and underscores, and may not
/// start with a digit.
pub fn sanitize_column(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// One row as a JSON object keyed by sanitized column. Null cells are omitted.
pub fn row_json(records: &RecordSet, index: usize) -> Value {
    let mut object = Map::new();
    if let Some(row) = records.rows().get(index) {
        for (column, value) in records.columns().iter().zip(row) {
            if !value.is_null() {
                object.insert(sanitize_column(column), value.clone());
            }
        }
    }
    Value::Object(object)
}

/// Every row as newline-delimited JSON, the load job's source format.
pub fn newline_json(records: &RecordSet) -> String {
    (0..records.len())
        .map(|i| row_json(records, i).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
