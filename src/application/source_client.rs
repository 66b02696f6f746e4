// Source client trait for the upstream dataset APIs
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

const SECRET_PARAMS: &[&str] = &["api_key", "key", "token", "access_token"];

/// Errors render their URL through `redact_url`, so credentials carried in the query
/// string never reach logs or stage reports.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {} failed: {reason}", redact_url(.url))]
    Transport { url: String, reason: String },

    #[error("{} answered with status {status}", redact_url(.url))]
    Status { url: String, status: u16 },

    #[error("unexpected payload from {}: {reason}", redact_url(.url))]
    Payload { url: String, reason: String },
}

impl FetchError {
    pub fn payload(url: &str, reason: impl ToString) -> Self {
        Self::Payload {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// `url` with the values of credential query parameters replaced by `***`.
pub fn redact_url(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let params: Vec<String> = query
        .split('&')
        .map(|param| match param.split_once('=') {
            Some((name, _)) if SECRET_PARAMS.iter().any(|s| s.eq_ignore_ascii_case(name)) => {
                format!("{}=***", name)
            }
            _ => param.to_string(),
        })
        .collect();
    format!("{}?{}", base, params.join("&"))
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch the raw body behind `url`
    async fn get(&self, url: &str) -> Result<Bytes, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("http://nrel.test/stations.csv?api_key=KEY&fuel_type=ELEC"),
            "http://nrel.test/stations.csv?api_key=***&fuel_type=ELEC"
        );
        assert_eq!(redact_url("http://nhtsa.test/years"), "http://nhtsa.test/years");
        assert_eq!(
            redact_url("http://nhtsa.test/makes?year=2020"),
            "http://nhtsa.test/makes?year=2020"
        );
    }

    #[test]
    fn test_error_messages_hide_credentials() {
        let err = FetchError::Transport {
            url: "http://nrel.test/stations.csv?api_key=KEY".to_string(),
            reason: "connection reset".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "request to http://nrel.test/stations.csv?api_key=*** failed: connection reset"
        );

        let err = FetchError::Status {
            url: "http://nrel.test/stations.csv?API_KEY=KEY".to_string(),
            status: 403,
        };
        assert_eq!(err.to_string(), "http://nrel.test/stations.csv?API_KEY=*** answered with status 403");
    }
}
