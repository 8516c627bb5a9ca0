use serde::{Deserialize, Serialize};

/// Handle the protocol library uses to fetch a media payload on demand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Content of an inbound message as surfaced by the protocol library.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Image {
        #[serde(default)]
        caption: Option<String>,
        media: MediaRef,
    },
    Audio {
        media: MediaRef,
        #[serde(default)]
        voice_note: bool,
    },
    Video {
        #[serde(default)]
        caption: Option<String>,
        media: MediaRef,
    },
    Document {
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        file_name: Option<String>,
        media: MediaRef,
    },
    #[serde(other)]
    Unsupported,
}

/// Coarse content class forwarded to the processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Audio,
    Image,
    Document,
    Video,
}

impl MessageContent {
    pub fn media_type(&self) -> Option<MediaType> {
        match self {
            Self::Text { .. } => Some(MediaType::Text),
            Self::Image { .. } => Some(MediaType::Image),
            Self::Audio { .. } => Some(MediaType::Audio),
            Self::Video { .. } => Some(MediaType::Video),
            Self::Document { .. } => Some(MediaType::Document),
            Self::Unsupported => None,
        }
    }

    /// Body text or caption.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text.as_str()),
            Self::Image { caption, .. }
            | Self::Video { caption, .. }
            | Self::Document { caption, .. } => caption.as_deref(),
            Self::Audio { .. } | Self::Unsupported => None,
        }
    }

    /// Media that must be downloaded and inlined before forwarding.
    pub fn inline_media(&self) -> Option<&MediaRef> {
        match self {
            Self::Image { media, .. } | Self::Audio { media, .. } => Some(media),
            _ => None,
        }
    }
}

/// One inbound message event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    /// Chat the message arrived in; replies go here.
    pub chat_jid: String,
    /// Alternate addressing for the same sender (phone JID for linked ids).
    #[serde(default)]
    pub alt_jid: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub push_name: Option<String>,
    pub content: MessageContent,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Media inlined as base64 for the processor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub data: String,
    pub mime_type: String,
}

/// Canonical record posted to the external processor.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub sender_id: String,
    pub text: String,
    pub display_name: String,
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_payload: Option<MediaPayload>,
    pub recipient_identity: Option<String>,
}

impl std::fmt::Debug for ProcessRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRequest")
            .field("sender_id", &self.sender_id)
            .field("text", &self.text)
            .field("display_name", &self.display_name)
            .field("secret", &"[REDACTED]")
            .field("media_type", &self.media_type)
            .field("has_media", &self.media_payload.is_some())
            .field("recipient_identity", &self.recipient_identity)
            .finish()
    }
}

/// Processor response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ProcessReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub reply: Option<String>,
}

impl ProcessReply {
    /// Non-empty reply text, if any.
    pub fn reply_text(&self) -> Option<&str> {
        self.reply.as_deref().map(str::trim).filter(|r| !r.is_empty())
    }
}
