use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::credentials::{CredentialDelta, CredentialSet};
use crate::errors::ProtocolError;
use crate::messages::{InboundMessage, MediaRef};

/// Events emitted by one protocol connection, in emission order.
#[derive(Clone, Debug)]
pub enum SocketEvent {
    /// New scan token for pairing.
    Qr(String),
    /// Session authenticated; `identity` is our own JID.
    Open { identity: String },
    /// Connection ended.
    Close { code: Option<u16>, reason: String },
    /// The library mutated its credential state.
    CredentialsUpdated(CredentialDelta),
    /// A batch of inbound messages.
    Messages(Vec<InboundMessage>),
}

/// A live protocol connection.
#[async_trait]
pub trait ProtocolSocket: Send + Sync {
    async fn send_text(&self, jid: &str, text: &str) -> Result<(), ProtocolError>;

    async fn send_image(
        &self,
        jid: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<(), ProtocolError>;

    async fn download_media(&self, media: &MediaRef) -> Result<Bytes, ProtocolError>;

    /// Unlink this device from the account.
    async fn logout(&self) -> Result<(), ProtocolError>;

    /// Drop the connection without logging out.
    fn close(&self);
}

/// Result of a successful connect: the socket handle plus its event stream.
pub struct Connection {
    pub socket: Arc<dyn ProtocolSocket>,
    pub events: mpsc::Receiver<SocketEvent>,
}

/// Factory for protocol connections.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn connect(&self, credentials: CredentialSet) -> Result<Connection, ProtocolError>;
}
