use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use tether_core::messages::MediaRef;
use tether_core::protocol::{Connection, ProtocolClient, ProtocolSocket, SocketEvent};
use tether_core::{CredentialSet, ProtocolError};

/// Outbound call recorded by a [`MockSocket`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentMessage {
    Text {
        jid: String,
        text: String,
    },
    Image {
        jid: String,
        url: String,
        caption: Option<String>,
    },
}

/// Scripted protocol client. Each successful `connect` opens a new
/// [`MockSocket`]; tests drive the latest one with [`MockProtocol::emit`].
#[derive(Default)]
pub struct MockProtocol {
    failures: Mutex<VecDeque<ProtocolError>>,
    links: Mutex<Vec<(Arc<MockSocket>, mpsc::Sender<SocketEvent>)>>,
    credentials_seen: Mutex<Vec<CredentialSet>>,
    media: Arc<Mutex<HashMap<String, Bytes>>>,
    connect_count: AtomicUsize,
}

impl MockProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `connect` call fail before any event.
    pub fn fail_next(&self, error: ProtocolError) {
        self.failures.lock().push_back(error);
    }

    /// Media served by every socket's `download_media`.
    pub fn add_media(&self, message_id: &str, data: impl Into<Bytes>) {
        self.media.lock().insert(message_id.to_string(), data.into());
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn credentials_seen(&self) -> Vec<CredentialSet> {
        self.credentials_seen.lock().clone()
    }

    pub fn socket(&self, index: usize) -> Option<Arc<MockSocket>> {
        self.links.lock().get(index).map(|(s, _)| s.clone())
    }

    pub fn last_socket(&self) -> Option<Arc<MockSocket>> {
        self.links.lock().last().map(|(s, _)| s.clone())
    }

    /// Deliver an event on the most recent connection.
    pub async fn emit(&self, event: SocketEvent) -> bool {
        let tx = self.links.lock().last().map(|(_, tx)| tx.clone());
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Deliver an event on a specific (possibly superseded) connection.
    pub async fn emit_on(&self, index: usize, event: SocketEvent) -> bool {
        let tx = self.links.lock().get(index).map(|(_, tx)| tx.clone());
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ProtocolClient for MockProtocol {
    async fn connect(&self, credentials: CredentialSet) -> Result<Connection, ProtocolError> {
        let _ = self.connect_count.fetch_add(1, Ordering::SeqCst);
        self.credentials_seen.lock().push(credentials);
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(64);
        let socket = Arc::new(MockSocket::new(self.media.clone()));
        self.links.lock().push((socket.clone(), tx));
        Ok(Connection {
            socket,
            events: rx,
        })
    }
}

pub struct MockSocket {
    sent: Mutex<Vec<SentMessage>>,
    media: Arc<Mutex<HashMap<String, Bytes>>>,
    send_error: Mutex<Option<ProtocolError>>,
    closed: AtomicBool,
    logged_out: AtomicBool,
}

impl MockSocket {
    fn new(media: Arc<Mutex<HashMap<String, Bytes>>>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            media,
            send_error: Mutex::new(None),
            closed: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Fail every subsequent send with `error`.
    pub fn fail_sends(&self, error: ProtocolError) {
        *self.send_error.lock() = Some(error);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    fn check_send(&self) -> Result<(), ProtocolError> {
        match self.send_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProtocolSocket for MockSocket {
    async fn send_text(&self, jid: &str, text: &str) -> Result<(), ProtocolError> {
        self.check_send()?;
        self.sent.lock().push(SentMessage::Text {
            jid: jid.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_image(
        &self,
        jid: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<(), ProtocolError> {
        self.check_send()?;
        self.sent.lock().push(SentMessage::Image {
            jid: jid.to_string(),
            url: url.to_string(),
            caption: caption.map(str::to_owned),
        });
        Ok(())
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Bytes, ProtocolError> {
        self.media
            .lock()
            .get(&media.message_id)
            .cloned()
            .ok_or_else(|| ProtocolError::Rejected(format!("no media for {}", media.message_id)))
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
