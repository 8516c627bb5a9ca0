//! Connection lifecycle controller.
//!
//! Owns the single live protocol connection. Every connect attempt is tagged
//! with an epoch; the attempt's events are consumed in emission order by one
//! loop, and anything arriving for a superseded epoch is dropped. Close events
//! are classified into logout, authentication rejection, or transient failure,
//! and retries are scheduled on a single pending timer.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_core::messages::InboundMessage;
use tether_core::protocol::{Connection, ProtocolClient, ProtocolSocket, SocketEvent};
use tether_core::{ConnectionError, ProtocolError, SendError, StatusSnapshot};
use tether_credentials::{CredentialSync, DurableStoreError, SyncError};
use tether_store::StoreError;

use crate::link::LinkState;
use crate::relay::InboundBatch;
use crate::retry::RetryPolicy;
use crate::sender::OutboundSender;

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("credential load failed: {0}")]
    Credentials(#[from] StoreError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

struct RetryTimer {
    id: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    link: LinkState,
    client: Arc<dyn ProtocolClient>,
    credentials: CredentialSync,
    sender: OutboundSender,
    inbound: Option<mpsc::Sender<InboundBatch>>,
    policy: RetryPolicy,
    retry_timer: Mutex<Option<RetryTimer>>,
    next_timer_id: Mutex<u64>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct ConnectionController {
    inner: Arc<Inner>,
}

impl ConnectionController {
    pub fn new(
        link: LinkState,
        client: Arc<dyn ProtocolClient>,
        credentials: CredentialSync,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sender: OutboundSender::new(link.clone()),
                link,
                client,
                credentials,
                inbound: None,
                policy,
                retry_timer: Mutex::new(None),
                next_timer_id: Mutex::new(0),
                event_loop: Mutex::new(None),
                cancel,
            }),
        }
    }

    /// Route inbound message batches to `queue`. Must be called before
    /// the controller is cloned or started.
    pub fn with_inbound(mut self, queue: mpsc::Sender<InboundBatch>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.inbound = Some(queue);
        } else {
            warn!("controller already shared, inbound queue not attached");
        }
        self
    }

    pub fn link(&self) -> &LinkState {
        &self.inner.link
    }

    pub fn sender(&self) -> &OutboundSender {
        &self.inner.sender
    }

    pub fn credentials(&self) -> &CredentialSync {
        &self.inner.credentials
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.link.snapshot()
    }

    pub fn has_pending_retry(&self) -> bool {
        self.inner
            .retry_timer
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Initial connect at process start.
    pub async fn start(&self) {
        info!("starting connection controller");
        let _ = self.connect().await;
    }

    /// Begin a connect attempt. Returns `false` without side effects when an
    /// attempt is already executing or the connection is not idle.
    pub async fn connect(&self) -> bool {
        let epoch = {
            let mut slot = self.inner.link.lock();
            if !slot.state.begin_connect() {
                debug!(
                    phase = %slot.state.phase(),
                    in_flight = slot.state.in_flight(),
                    "connect request ignored"
                );
                return false;
            }
            slot.epoch += 1;
            slot.epoch
        };
        info!(epoch, "connecting");

        if let Err(e) = self.open(epoch).await {
            warn!(epoch, error = %e, "connect attempt failed");
            self.on_disconnect(epoch, ConnectionError::Transient(e.to_string()))
                .await;
        }
        true
    }

    async fn open(&self, epoch: u64) -> Result<(), AttemptError> {
        let credentials = self.inner.credentials.load_or_restore().await?;
        debug!(epoch, slots = credentials.len(), "credentials loaded");
        let Connection { socket, events } = self.inner.client.connect(credentials).await?;

        {
            let mut slot = self.inner.link.lock();
            if slot.epoch != epoch {
                drop(slot);
                debug!(epoch, "connect attempt superseded, closing socket");
                socket.close();
                return Ok(());
            }
            slot.socket = Some(socket);
        }
        self.spawn_event_loop(epoch, events);
        Ok(())
    }

    fn spawn_event_loop(&self, epoch: u64, mut events: mpsc::Receiver<SocketEvent>) {
        let this = self.clone();
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                if !this.inner.link.is_current(epoch) {
                    debug!(epoch, "event loop superseded");
                    break;
                }
                match event {
                    Some(SocketEvent::Close { code, reason }) => {
                        this.on_disconnect(epoch, ConnectionError::from_close(code, &reason))
                            .await;
                        break;
                    }
                    Some(event) => this.on_event(epoch, event).await,
                    None => {
                        this.on_disconnect(
                            epoch,
                            ConnectionError::Transient("event stream ended".into()),
                        )
                        .await;
                        break;
                    }
                }
            }
        });
        if let Some(previous) = self.inner.event_loop.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn on_event(&self, epoch: u64, event: SocketEvent) {
        match event {
            SocketEvent::Qr(token) => {
                if self.inner.link.lock().state.enter_awaiting_scan(token) {
                    info!(epoch, "scan token ready");
                }
            }
            SocketEvent::Open { identity } => {
                let opened = self.inner.link.lock().state.enter_connected(identity.clone());
                if opened {
                    info!(epoch, identity = %identity, "session open");
                    self.schedule_credential_push();
                }
            }
            SocketEvent::CredentialsUpdated(delta) => {
                // Epoch check and cache write under one lock: a detach
                // orders entirely before or after them.
                let slot = self.inner.link.lock();
                if slot.epoch != epoch {
                    debug!(epoch, "dropping credential update from superseded attempt");
                    return;
                }
                if let Err(e) = self.inner.credentials.persist(&delta) {
                    warn!(error = %e, "failed to persist credential update");
                }
                drop(slot);
            }
            SocketEvent::Messages(messages) => self.forward_inbound(messages),
            SocketEvent::Close { .. } => {}
        }
    }

    /// Hand a batch to the relay without waiting. A full queue drops the
    /// batch; lifecycle events behind it are never held up.
    fn forward_inbound(&self, messages: Vec<InboundMessage>) {
        let Some(queue) = &self.inner.inbound else {
            return;
        };
        let socket = self.inner.link.lock().socket.clone();
        let Some(socket) = socket else {
            return;
        };
        let count = messages.len();
        debug!(count, "inbound batch");
        match queue.try_send(InboundBatch { messages, socket }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(count, "inbound relay queue full, dropping batch");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(count, "inbound relay queue closed, dropping batch");
            }
        }
    }

    /// Push credentials after the library has had time to write its final
    /// session keys.
    fn schedule_credential_push(&self) {
        if !self.inner.credentials.has_durable_store() {
            return;
        }
        let credentials = self.inner.credentials.clone();
        let delay = self.inner.policy.sync_delay;
        let cancel = self.inner.cancel.clone();
        drop(tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Err(e) = credentials.sync_now().await {
                        warn!(error = %e, "post-open credential push failed");
                    }
                }
            }
        }));
    }

    /// Apply the close policy for `epoch`. Stale epochs are ignored.
    async fn on_disconnect(&self, epoch: u64, cause: ConnectionError) {
        {
            let mut slot = self.inner.link.lock();
            if slot.epoch != epoch {
                debug!(epoch, "ignoring disconnect from superseded attempt");
                return;
            }
            slot.state.enter_disconnected();
            slot.socket = None;
        }
        warn!(epoch, kind = cause.error_kind(), error = %cause, "disconnected");

        let exhausted = match &cause {
            ConnectionError::Transient(_) => {
                let attempts = self.inner.link.lock().state.record_failure();
                let exhausted = self.inner.policy.exhausted(attempts);
                if exhausted {
                    warn!(
                        attempts,
                        max_attempts = self.inner.policy.max_attempts,
                        "reconnect attempts exhausted, discarding credentials"
                    );
                }
                exhausted
            }
            ConnectionError::AuthenticationRejected { code } => {
                info!(code, "session rejected, discarding credentials");
                false
            }
            ConnectionError::LoggedOut => false,
        };

        if !cause.is_retryable() {
            self.cancel_retry();
        }
        if cause.invalidates_credentials() || exhausted {
            self.invalidate_credentials().await;
            self.inner.link.lock().state.reset_attempts();
        }
        if cause.is_retryable() {
            self.schedule_retry(epoch);
        } else {
            info!("logged out remotely, waiting for a manual connect");
        }
    }

    fn schedule_retry(&self, epoch: u64) {
        let attempts = {
            let slot = self.inner.link.lock();
            if slot.epoch != epoch {
                return;
            }
            slot.state.reconnect_attempts()
        };
        let delay = self.inner.policy.delay_for(attempts);
        let id = {
            let mut next = self.inner.next_timer_id.lock();
            *next += 1;
            *next
        };
        info!(attempts, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        let this = self.clone();
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            {
                let mut timer = this.inner.retry_timer.lock();
                if timer.as_ref().is_some_and(|t| t.id == id) {
                    let _ = timer.take();
                }
            }
            let _ = this.connect().await;
        });

        if let Some(previous) = self
            .inner
            .retry_timer
            .lock()
            .replace(RetryTimer { id, handle })
        {
            previous.handle.abort();
        }
    }

    fn cancel_retry(&self) {
        if let Some(timer) = self.inner.retry_timer.lock().take() {
            timer.handle.abort();
            debug!("pending reconnect cancelled");
        }
    }

    /// Supersede the current attempt: bump the epoch, reset to
    /// `Disconnected`, and hand back the socket for the caller to close.
    fn detach(&self) -> Option<Arc<dyn ProtocolSocket>> {
        let socket = {
            let mut slot = self.inner.link.lock();
            slot.epoch += 1;
            slot.state.enter_disconnected();
            slot.socket.take()
        };
        if let Some(handle) = self.inner.event_loop.lock().take() {
            handle.abort();
        }
        socket
    }

    async fn invalidate_credentials(&self) {
        if let Err(e) = self.inner.credentials.invalidate().await {
            warn!(error = %e, "failed to clear local credentials");
        }
    }

    /// Unlink the device. Leaves the connection idle with no credentials
    /// and no pending retry.
    pub async fn logout(&self) -> Result<(), StoreError> {
        self.cancel_retry();
        if let Some(socket) = self.detach() {
            if let Err(e) = socket.logout().await {
                warn!(error = %e, "protocol logout failed");
            }
            socket.close();
        }
        self.inner.link.lock().state.reset_attempts();
        let result = self.inner.credentials.invalidate().await;
        info!("logged out");
        result
    }

    /// Force-close, drop credentials, and connect from scratch.
    pub async fn reconnect(&self) -> bool {
        info!("manual reconnect requested");
        self.cancel_retry();
        if let Some(socket) = self.detach() {
            socket.close();
        }
        self.invalidate_credentials().await;
        self.inner.link.lock().state.reset_attempts();
        self.connect().await
    }

    /// Close the connection and drop credentials without reconnecting.
    pub async fn clear_session(&self) -> Result<(), StoreError> {
        info!("clearing session");
        self.cancel_retry();
        if let Some(socket) = self.detach() {
            socket.close();
        }
        self.inner.link.lock().state.reset_attempts();
        self.inner.credentials.invalidate().await
    }

    /// Push the current local cache to the durable store now.
    pub async fn sync_credentials(&self) -> Result<(), SyncError> {
        self.inner.credentials.sync_now().await
    }

    pub async fn send_text(&self, address: &str, text: &str) -> Result<String, SendError> {
        self.inner.sender.send_text(address, text).await
    }

    pub async fn send_image(
        &self,
        address: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<String, SendError> {
        self.inner.sender.send_image(address, url, caption).await
    }

    /// Stop timers and the event loop and close the socket without logging
    /// out, then make a last attempt to push credentials.
    pub async fn shutdown(&self) {
        self.cancel_retry();
        if let Some(socket) = self.detach() {
            socket.close();
        }
        match self.inner.credentials.sync_now().await {
            Ok(()) => info!("final credential push complete"),
            Err(SyncError::Durable(DurableStoreError::Disabled)) => {}
            Err(e) => warn!(error = %e, "final credential push failed"),
        }
    }
}
