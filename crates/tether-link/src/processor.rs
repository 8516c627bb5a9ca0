use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use tether_core::messages::{ProcessReply, ProcessRequest};
use tether_core::ProcessorError;

/// External service that turns an inbound message into an optional reply.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, request: &ProcessRequest) -> Result<ProcessReply, ProcessorError>;
}

pub struct HttpProcessor {
    client: reqwest::Client,
    url: String,
}

impl HttpProcessor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl MessageProcessor for HttpProcessor {
    async fn process(&self, request: &ProcessRequest) -> Result<ProcessReply, ProcessorError> {
        let resp = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| ProcessorError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProcessorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ProcessReply = resp
            .json()
            .await
            .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))?;
        debug!(success = reply.success, has_reply = reply.reply_text().is_some(), "processor replied");
        Ok(reply)
    }
}
