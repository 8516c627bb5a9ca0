//! Protocol client speaking JSON frames over a WebSocket to a protocol
//! daemon.
//!
//! Daemon → bridge frames: `qr`, `open`, `close`, `creds`, `messages`, and
//! `result` (the answer to a request). Bridge → daemon frames: `connect`
//! (carrying the credential set) and `request`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tether_core::messages::{InboundMessage, MediaRef};
use tether_core::protocol::{Connection, ProtocolClient, ProtocolSocket, SocketEvent};
use tether_core::{CredentialDelta, CredentialSet, ProtocolError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Option<Value>, ProtocolError>>>>>;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DaemonFrame {
    Qr {
        qr: String,
    },
    Open {
        id: String,
    },
    Close {
        #[serde(default)]
        code: Option<u16>,
        #[serde(default)]
        reason: String,
    },
    Creds {
        #[serde(default)]
        upserts: CredentialSet,
        #[serde(default)]
        removed: Vec<String>,
    },
    Messages {
        messages: Vec<InboundMessage>,
    },
    Result {
        #[serde(rename = "requestId")]
        request_id: String,
        ok: bool,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

pub struct WsProtocolClient {
    url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl WsProtocolClient {
    pub fn new(url: impl Into<String>, connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            request_timeout,
        }
    }
}

fn transport(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Transport(e.to_string())
}

#[async_trait]
impl ProtocolClient for WsProtocolClient {
    async fn connect(&self, credentials: CredentialSet) -> Result<Connection, ProtocolError> {
        let (stream, _) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await
        .map_err(|_| ProtocolError::Timeout)?
        .map_err(transport)?;
        debug!(url = %self.url, slots = credentials.len(), "protocol daemon connected");

        let (mut sink, source) = stream.split();
        let hello = json!({ "type": "connect", "credentials": credentials });
        sink.send(Message::Text(hello.to_string().into()))
            .await
            .map_err(transport)?;

        let closed = CancellationToken::new();
        let pending: Pending = Arc::default();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);
        let (event_tx, event_rx) = mpsc::channel(64);

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_closed.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    msg = out_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = sink.send(msg).await {
                                warn!(error = %e, "protocol write failed");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        tokio::spawn(read_loop(source, event_tx, pending.clone(), closed.clone()));

        let socket = Arc::new(WsSocket {
            outgoing: out_tx,
            pending,
            request_timeout: self.request_timeout,
            closed,
        });
        Ok(Connection {
            socket,
            events: event_rx,
        })
    }
}

async fn read_loop(
    mut source: futures::stream::SplitStream<WsStream>,
    events: mpsc::Sender<SocketEvent>,
    pending: Pending,
    closed: CancellationToken,
) {
    let close = loop {
        let msg = tokio::select! {
            () = closed.cancelled() => break None,
            msg = source.next() => msg,
        };
        let text = match msg {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by daemon".into());
                break Some(SocketEvent::Close { code: None, reason });
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                break Some(SocketEvent::Close {
                    code: None,
                    reason: e.to_string(),
                })
            }
            None => {
                break Some(SocketEvent::Close {
                    code: None,
                    reason: "connection lost".into(),
                })
            }
        };

        let frame = match serde_json::from_str::<DaemonFrame>(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "ignoring malformed protocol frame");
                continue;
            }
        };
        let event = match frame {
            DaemonFrame::Result {
                request_id,
                ok,
                data,
                error,
            } => {
                let waiter = pending.lock().remove(&request_id);
                if let Some(waiter) = waiter {
                    let result = if ok {
                        Ok(data)
                    } else {
                        Err(ProtocolError::Rejected(
                            error.unwrap_or_else(|| "request failed".into()),
                        ))
                    };
                    let _ = waiter.send(result);
                } else {
                    debug!(request_id = %request_id, "result for unknown request");
                }
                continue;
            }
            DaemonFrame::Close { code, reason } => break Some(SocketEvent::Close { code, reason }),
            DaemonFrame::Qr { qr } => SocketEvent::Qr(qr),
            DaemonFrame::Open { id } => SocketEvent::Open { identity: id },
            DaemonFrame::Creds { upserts, removed } => {
                SocketEvent::CredentialsUpdated(CredentialDelta { upserts, removed })
            }
            DaemonFrame::Messages { messages } => {
                // Never park the reader on a message backlog: result frames
                // and lifecycle frames behind it must still be read.
                let count = messages.len();
                match events.try_send(SocketEvent::Messages(messages)) {
                    Ok(()) => continue,
                    Err(TrySendError::Full(_)) => {
                        warn!(count, "event queue full, dropping inbound messages");
                        continue;
                    }
                    Err(TrySendError::Closed(_)) => break None,
                }
            }
        };
        if events.send(event).await.is_err() {
            break None;
        }
    };

    closed.cancel();
    for (_, waiter) in pending.lock().drain() {
        let _ = waiter.send(Err(ProtocolError::Closed));
    }
    if let Some(event) = close {
        let _ = events.send(event).await;
    }
}

struct WsSocket {
    outgoing: mpsc::Sender<Message>,
    pending: Pending,
    request_timeout: Duration,
    closed: CancellationToken,
}

impl WsSocket {
    async fn request(&self, action: &str, mut params: Value) -> Result<Option<Value>, ProtocolError> {
        if self.closed.is_cancelled() {
            return Err(ProtocolError::Closed);
        }
        let request_id = uuid::Uuid::now_v7().to_string();
        if let Some(obj) = params.as_object_mut() {
            obj.insert("type".into(), json!("request"));
            obj.insert("requestId".into(), json!(request_id));
            obj.insert("action".into(), json!(action));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);
        if self
            .outgoing
            .send(Message::Text(params.to_string().into()))
            .await
            .is_err()
        {
            self.pending.lock().remove(&request_id);
            return Err(ProtocolError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::Closed),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(ProtocolError::Timeout)
            }
        }
    }
}

#[async_trait]
impl ProtocolSocket for WsSocket {
    async fn send_text(&self, jid: &str, text: &str) -> Result<(), ProtocolError> {
        self.request("send_text", json!({ "jid": jid, "text": text }))
            .await
            .map(|_| ())
    }

    async fn send_image(
        &self,
        jid: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<(), ProtocolError> {
        self.request(
            "send_image",
            json!({ "jid": jid, "url": url, "caption": caption }),
        )
        .await
        .map(|_| ())
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Bytes, ProtocolError> {
        let data = self
            .request("download", json!({ "messageId": media.message_id }))
            .await?;
        let encoded = data
            .as_ref()
            .and_then(|d| d.get("data"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidFrame("download result without data".into()))?;
        BASE64
            .decode(encoded)
            .map(Bytes::from)
            .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        self.request("logout", json!({})).await.map(|_| ())
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn daemon() -> (String, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (url, listener)
    }

    fn client(url: &str) -> WsProtocolClient {
        WsProtocolClient::new(url, Duration::from_secs(5), Duration::from_secs(5))
    }

    async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
        ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    #[tokio::test]
    async fn events_and_requests_round_trip() {
        let (url, listener) = daemon().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let hello = next_json(&mut ws).await;
            assert_eq!(hello["type"], "connect");
            assert_eq!(hello["credentials"]["creds"], "AQI=");

            send_json(&mut ws, json!({"type": "qr", "qr": "2@token"})).await;
            send_json(
                &mut ws,
                json!({"type": "creds", "upserts": {"pre-key-9": "/w=="}}),
            )
            .await;

            let req = next_json(&mut ws).await;
            assert_eq!(req["action"], "send_text");
            assert_eq!(req["jid"], "15551234567@s.whatsapp.net");
            send_json(
                &mut ws,
                json!({"type": "result", "requestId": req["requestId"], "ok": true}),
            )
            .await;

            let req = next_json(&mut ws).await;
            assert_eq!(req["action"], "download");
            send_json(
                &mut ws,
                json!({
                    "type": "result",
                    "requestId": req["requestId"],
                    "ok": true,
                    "data": {"data": "AAEC"}
                }),
            )
            .await;
            // Drop the connection without a close frame.
        });

        let mut creds = CredentialSet::new();
        creds.insert("creds", vec![1u8, 2]);
        let Connection { socket, mut events } = client(&url).connect(creds).await.unwrap();

        assert!(matches!(events.recv().await, Some(SocketEvent::Qr(t)) if t == "2@token"));
        match events.recv().await {
            Some(SocketEvent::CredentialsUpdated(delta)) => {
                assert_eq!(delta.upserts.get("pre-key-9"), Some(&[255u8][..]));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        socket
            .send_text("15551234567@s.whatsapp.net", "hello")
            .await
            .unwrap();
        let media = socket
            .download_media(&MediaRef {
                message_id: "m1".into(),
                mime_type: None,
            })
            .await
            .unwrap();
        assert_eq!(&media[..], &[0u8, 1, 2]);

        server.await.unwrap();
        match events.recv().await {
            Some(SocketEvent::Close { code, .. }) => assert_eq!(code, None),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_frame_carries_code() {
        let (url, listener) = daemon().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = next_json(&mut ws).await;
            send_json(
                &mut ws,
                json!({"type": "close", "code": 401, "reason": "logged out"}),
            )
            .await;
            let _ = ws.next().await;
        });

        let mut conn = client(&url).connect(CredentialSet::new()).await.unwrap();
        match conn.events.recv().await {
            Some(SocketEvent::Close { code, reason }) => {
                assert_eq!(code, Some(401));
                assert_eq!(reason, "logged out");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_request_surfaces() {
        let (url, listener) = daemon().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = next_json(&mut ws).await;
            let req = next_json(&mut ws).await;
            send_json(
                &mut ws,
                json!({
                    "type": "result",
                    "requestId": req["requestId"],
                    "ok": false,
                    "error": "not on network"
                }),
            )
            .await;
            let _ = ws.next().await;
        });

        let conn = client(&url).connect(CredentialSet::new()).await.unwrap();
        let err = conn.socket.send_text("1@s.whatsapp.net", "x").await.unwrap_err();
        assert!(matches!(err, ProtocolError::Rejected(msg) if msg == "not on network"));
    }

    #[tokio::test]
    async fn message_backlog_does_not_block_results() {
        let (url, listener) = daemon().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = next_json(&mut ws).await;
            for i in 0..100 {
                send_json(
                    &mut ws,
                    json!({"type": "messages", "messages": [{
                        "id": format!("m{i}"),
                        "chat_jid": "15551234567@s.whatsapp.net",
                        "content": {"type": "text", "text": "hi"}
                    }]}),
                )
                .await;
            }
            let req = next_json(&mut ws).await;
            send_json(
                &mut ws,
                json!({"type": "result", "requestId": req["requestId"], "ok": true}),
            )
            .await;
            send_json(
                &mut ws,
                json!({"type": "close", "code": 428, "reason": "restart"}),
            )
            .await;
            let _ = ws.next().await;
        });

        // Nobody drains events while the request is outstanding.
        let mut conn = client(&url).connect(CredentialSet::new()).await.unwrap();
        conn.socket
            .send_text("15551234567@s.whatsapp.net", "reply")
            .await
            .unwrap();

        let mut batches = 0;
        loop {
            match conn.events.recv().await {
                Some(SocketEvent::Messages(_)) => batches += 1,
                Some(SocketEvent::Close { code, .. }) => {
                    assert_eq!(code, Some(428));
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(batches <= 64, "batches = {batches}");
    }

    #[tokio::test]
    async fn unreachable_daemon_fails_connect() {
        let (url, listener) = daemon().await;
        drop(listener);
        let result = client(&url).connect(CredentialSet::new()).await;
        assert!(matches!(result, Err(ProtocolError::Transport(_))));
    }
}
