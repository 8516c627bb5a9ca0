use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tether_core::CredentialSet;

use crate::error::DurableStoreError;

/// Remote copy of the credential set, addressed by server name.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn save(&self, credentials: &CredentialSet) -> Result<(), DurableStoreError>;

    /// `None` when nothing is stored for this server.
    async fn fetch(&self) -> Result<Option<CredentialSet>, DurableStoreError>;

    async fn delete(&self) -> Result<(), DurableStoreError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoreRequest<'a> {
    action: &'static str,
    server_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    credentials: Option<&'a CredentialSet>,
}

#[derive(Deserialize)]
struct StoreResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    credentials: Option<CredentialSet>,
    #[serde(default)]
    error: Option<String>,
}

/// Durable store reached over a single JSON endpoint:
/// `{action: save|get|delete, serverName, credentials?}`.
pub struct HttpDurableStore {
    client: reqwest::Client,
    url: String,
    server_name: String,
}

impl HttpDurableStore {
    pub fn new(url: impl Into<String>, server_name: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
            server_name: server_name.into(),
        }
    }

    async fn call(
        &self,
        action: &'static str,
        credentials: Option<&CredentialSet>,
    ) -> Result<StoreResponse, DurableStoreError> {
        let body = StoreRequest {
            action,
            server_name: &self.server_name,
            credentials,
        };
        let resp = self.client.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DurableStoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: StoreResponse = resp
            .json()
            .await
            .map_err(|e| DurableStoreError::InvalidResponse(e.to_string()))?;
        if parsed.success == Some(false) {
            return Err(DurableStoreError::InvalidResponse(
                parsed.error.unwrap_or_else(|| format!("{action} reported failure")),
            ));
        }
        debug!(action, server_name = %self.server_name, "durable store call ok");
        Ok(parsed)
    }
}

#[async_trait]
impl DurableStore for HttpDurableStore {
    async fn save(&self, credentials: &CredentialSet) -> Result<(), DurableStoreError> {
        self.call("save", Some(credentials)).await.map(|_| ())
    }

    async fn fetch(&self) -> Result<Option<CredentialSet>, DurableStoreError> {
        let resp = self.call("get", None).await?;
        Ok(resp.credentials.filter(|c| !c.is_empty()))
    }

    async fn delete(&self) -> Result<(), DurableStoreError> {
        self.call("delete", None).await.map(|_| ())
    }
}
