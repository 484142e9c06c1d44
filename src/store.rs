use crate::error::StoreError;
use crate::telemetry::ReadingPayload;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Key-ordered remote telemetry store.
///
/// Paths are logical keys: one for the live-reading feed, one for the
/// sample buffer mirror, one for the dispatch audit log. Implementations
/// must bound every call with a timeout; a timed-out call fails the cycle,
/// never the process.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Read whatever is currently stored at `path`. `None` when the path
    /// is empty.
    async fn read_feed(&self, path: &str) -> Result<Option<ReadingPayload>, StoreError>;

    /// Append a record under `path`, returning the id the store assigned.
    async fn append(&self, path: &str, record: Value) -> Result<String, StoreError>;

    /// Remove a previously appended record.
    async fn delete(&self, path: &str, id: &str) -> Result<(), StoreError>;
}

/// REST-backed store client (Firebase RTDB wire shape: `GET {path}.json`,
/// `POST` returns `{"name": id}`).
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

impl RestStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, anyhow::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }
}

#[async_trait]
impl TelemetryStore for RestStore {
    async fn read_feed(&self, path: &str) -> Result<Option<ReadingPayload>, StoreError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await?
            .error_for_status()?;
        // An empty path serializes as JSON null.
        let value: Value = response.json().await?;
        if value.is_null() {
            return Ok(None);
        }
        let payload = serde_json::from_value(value)
            .map_err(|err| StoreError::BadResponse(err.to_string()))?;
        Ok(Some(payload))
    }

    async fn append(&self, path: &str, record: Value) -> Result<String, StoreError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&record)
            .send()
            .await?
            .error_for_status()?;
        let push: PushResponse = response
            .json()
            .await
            .map_err(|err| StoreError::BadResponse(err.to_string()))?;
        Ok(push.name)
    }

    async fn delete(&self, path: &str, id: &str) -> Result<(), StoreError> {
        let url = format!(
            "{}/{}/{}.json",
            self.base_url,
            path.trim_matches('/'),
            id.trim_matches('/')
        );
        self.client
            .delete(url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
