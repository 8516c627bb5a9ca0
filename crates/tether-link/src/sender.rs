use std::sync::Arc;

use tracing::{debug, warn};

use tether_core::address::normalize_address;
use tether_core::protocol::ProtocolSocket;
use tether_core::SendError;

use crate::link::LinkState;

/// Outbound path. Rejects sends unless the session is open.
#[derive(Clone)]
pub struct OutboundSender {
    link: LinkState,
}

impl OutboundSender {
    pub fn new(link: LinkState) -> Self {
        Self { link }
    }

    /// Send a text message; returns the resolved JID.
    pub async fn send_text(&self, address: &str, text: &str) -> Result<String, SendError> {
        let (socket, jid) = self.target(address)?;
        socket.send_text(&jid, text).await.map_err(|e| {
            warn!(jid = %jid, error = %e, "text send failed");
            SendError::from(e)
        })?;
        debug!(jid = %jid, "text sent");
        Ok(jid)
    }

    pub async fn send_image(
        &self,
        address: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<String, SendError> {
        let (socket, jid) = self.target(address)?;
        socket.send_image(&jid, url, caption).await.map_err(|e| {
            warn!(jid = %jid, error = %e, "image send failed");
            SendError::from(e)
        })?;
        debug!(jid = %jid, "image sent");
        Ok(jid)
    }

    fn target(&self, address: &str) -> Result<(Arc<dyn ProtocolSocket>, String), SendError> {
        let socket = self.link.connected_socket().ok_or(SendError::NotConnected)?;
        let jid = normalize_address(address)
            .ok_or_else(|| SendError::InvalidAddress(address.to_string()))?;
        Ok((socket, jid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProtocol, SentMessage};
    use tether_core::protocol::ProtocolClient;
    use tether_core::{CredentialSet, ProtocolError};

    async fn connected_link() -> (LinkState, Arc<crate::mock::MockSocket>) {
        let mock = MockProtocol::new();
        let conn = mock.connect(CredentialSet::new()).await.unwrap();
        let link = LinkState::new();
        {
            let mut slot = link.lock();
            assert!(slot.state.begin_connect());
            assert!(slot.state.enter_connected("15550001111@s.whatsapp.net".into()));
            slot.socket = Some(conn.socket);
        }
        (link, mock.last_socket().unwrap())
    }

    #[tokio::test]
    async fn rejects_when_not_connected() {
        let sender = OutboundSender::new(LinkState::new());
        let err = sender.send_text("15551234567", "hi").await.unwrap_err();
        assert!(matches!(err, SendError::NotConnected));
    }

    #[tokio::test]
    async fn normalizes_bare_numbers() {
        let (link, socket) = connected_link().await;
        let sender = OutboundSender::new(link);

        let jid = sender.send_text("+1 (555) 123-4567", "hi").await.unwrap();
        assert_eq!(jid, "15551234567@s.whatsapp.net");
        assert_eq!(
            socket.sent(),
            vec![SentMessage::Text {
                jid: "15551234567@s.whatsapp.net".into(),
                text: "hi".into()
            }]
        );
    }

    #[tokio::test]
    async fn canonical_jid_passes_through() {
        let (link, socket) = connected_link().await;
        let sender = OutboundSender::new(link);

        sender
            .send_image("99887766@lid", "https://img.example/a.png", Some("look"))
            .await
            .unwrap();
        assert_eq!(
            socket.sent(),
            vec![SentMessage::Image {
                jid: "99887766@lid".into(),
                url: "https://img.example/a.png".into(),
                caption: Some("look".into())
            }]
        );
    }

    #[tokio::test]
    async fn invalid_address() {
        let (link, _) = connected_link().await;
        let sender = OutboundSender::new(link);
        let err = sender.send_text("not a number", "hi").await.unwrap_err();
        assert!(matches!(err, SendError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn library_errors_propagate() {
        let (link, socket) = connected_link().await;
        socket.fail_sends(ProtocolError::Rejected("rate limited".into()));
        let sender = OutboundSender::new(link);

        let err = sender.send_text("15551234567", "hi").await.unwrap_err();
        assert!(matches!(err, SendError::Protocol(ProtocolError::Rejected(_))));
    }
}
