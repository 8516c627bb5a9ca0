use tether_store::StoreError;

/// Failure talking to the durable credential store. Only ever logged by
/// the synchronizer.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DurableStoreError {
    #[error("durable store request failed: {0}")]
    Http(String),
    #[error("durable store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid durable store response: {0}")]
    InvalidResponse(String),
    #[error("durable store not configured")]
    Disabled,
}

impl From<reqwest::Error> for DurableStoreError {
    fn from(e: reqwest::Error) -> Self {
        DurableStoreError::Http(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Local(#[from] StoreError),
    #[error(transparent)]
    Durable(#[from] DurableStoreError),
}
