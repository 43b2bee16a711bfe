//! HTTP implementation of [`TelemetryStore`].

use crate::credentials::{Credentials, StoreConfig};
use crate::error::StoreError;
use crate::table::TableResult;
use crate::TelemetryStore;
use std::time::Duration;
use tracing::{debug, warn};

pub struct HttpTelemetryStore {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
    credentials: Credentials,
}

impl HttpTelemetryStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            credentials: Credentials::new(config.access.clone(), http.clone()),
            url: config.query_url(),
            timeout,
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl TelemetryStore for HttpTelemetryStore {
    async fn execute(&self, query: &str) -> Result<Vec<TableResult>, StoreError> {
        let request = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "query": query }));
        let request = self.credentials.authorize(request).await?;

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            warn!(%status, url = %self.url, "query API rejected query");
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))?;
        let tables = TableResult::from_response(&json)?;
        debug!(
            tables = tables.len(),
            rows = tables.first().map_or(0, |t| t.rows.len()),
            "query executed"
        );
        Ok(tables)
    }
}

impl HttpTelemetryStore {
    fn classify(&self, error: reqwest::Error) -> StoreError {
        if error.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::Http(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_from_config() {
        let config: StoreConfig = toml::from_str(
            r#"
            id = "0b8e4c1e-2a57-4f43-8d7c-0b6d3b2f9a10"
            access = "key"
            key = "k"
            timeout_secs = 5
            "#,
        )
        .unwrap();
        let store = HttpTelemetryStore::new(&config).unwrap();
        assert_eq!(
            store.url(),
            "https://api.applicationinsights.io/v1/apps/0b8e4c1e-2a57-4f43-8d7c-0b6d3b2f9a10/query"
        );
        assert_eq!(store.timeout, Duration::from_secs(5));
    }
}
