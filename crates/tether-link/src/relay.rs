//! Inbound relay: filter, normalize, forward to the processor, send replies.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use tether_core::address::{canonical_sender, is_non_personal, phone_of};
use tether_core::messages::{InboundMessage, MediaPayload, ProcessRequest};
use tether_core::protocol::ProtocolSocket;
use tether_core::{ProcessorError, ProtocolError, SendError};

use crate::link::LinkState;
use crate::processor::MessageProcessor;
use crate::sender::OutboundSender;

/// A batch of inbound messages together with the socket they arrived on,
/// used for media downloads.
pub struct InboundBatch {
    pub messages: Vec<InboundMessage>,
    pub socket: Arc<dyn ProtocolSocket>,
}

#[derive(Debug, thiserror::Error)]
enum RelayError {
    #[error("media download failed: {0}")]
    Download(#[from] ProtocolError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error("reply send failed: {0}")]
    Reply(#[from] SendError),
}

pub struct InboundRelay {
    processor: Arc<dyn MessageProcessor>,
    sender: OutboundSender,
    link: LinkState,
    secret: SecretString,
}

impl InboundRelay {
    pub fn new(
        processor: Arc<dyn MessageProcessor>,
        sender: OutboundSender,
        link: LinkState,
        secret: SecretString,
    ) -> Self {
        Self {
            processor,
            sender,
            link,
            secret,
        }
    }

    /// Drain batches in arrival order until cancelled or the queue closes.
    pub fn spawn(
        self: Arc<Self>,
        mut batches: mpsc::Receiver<InboundBatch>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    () = cancel.cancelled() => break,
                    batch = batches.recv() => batch,
                };
                let Some(batch) = batch else { break };
                self.process_batch(batch).await;
            }
            debug!("inbound relay stopped");
        })
    }

    /// Handle a batch one message at a time. A failing message is logged
    /// and skipped.
    pub async fn process_batch(&self, batch: InboundBatch) {
        for message in &batch.messages {
            if !should_relay(message) {
                debug!(message_id = %message.id, chat = %message.chat_jid, "skipping message");
                continue;
            }
            let sender_id = canonical_sender(&message.chat_jid, message.alt_jid.as_deref());
            let span = info_span!("relay", sender_id = %sender_id, message_id = %message.id);
            let result = self
                .relay_one(message, sender_id, batch.socket.as_ref())
                .instrument(span.clone())
                .await;
            if let Err(e) = result {
                span.in_scope(|| warn!(error = %e, "inbound message failed"));
            }
        }
    }

    async fn relay_one(
        &self,
        message: &InboundMessage,
        sender_id: String,
        socket: &dyn ProtocolSocket,
    ) -> Result<(), RelayError> {
        let media_payload = match message.content.inline_media() {
            Some(media) => {
                let data = socket.download_media(media).await?;
                Some(MediaPayload {
                    data: BASE64.encode(&data),
                    mime_type: media
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".into()),
                })
            }
            None => None,
        };

        let request = ProcessRequest {
            display_name: message
                .push_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| sender_id.clone()),
            sender_id,
            text: message.content.text().unwrap_or_default().to_string(),
            secret: self.secret.expose_secret().to_string(),
            media_type: message.content.media_type(),
            media_payload,
            recipient_identity: self.link.identity().map(|id| phone_of(&id).to_string()),
        };
        info!(media_type = ?request.media_type, "forwarding message to processor");

        let reply = self.processor.process(&request).await?;
        if let Some(text) = reply.reply_text() {
            let _ = self.sender.send_text(&message.chat_jid, text).await?;
            info!("reply sent");
        }
        Ok(())
    }
}

fn should_relay(message: &InboundMessage) -> bool {
    !message.from_me
        && !is_non_personal(&message.chat_jid)
        && message.content.media_type().is_some()
}
