//! Chat messages as they travel over the socket and sit in the history store.
//!
//! On the wire a message is a flat JSON object where almost every field is
//! optional. Inside the process it is a [`ChatMessage`]: the base fields every
//! kind shares plus a [`Payload`] carrying only what that kind allows, so a
//! seen acknowledgement can never hold a file URL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CHANNEL, REPLAY_SENTINEL};
use crate::error::WireError;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A file shared into a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Public path the file is served from.
    pub url: String,
    /// Original file name as uploaded.
    pub name: String,
    /// Size in bytes.
    pub size: i64,
}

/// Snapshot of the message being replied to, captured when the reply was
/// written. Later edits to the original never reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    #[serde(rename = "messageId", default)]
    pub message_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(rename = "message", default)]
    pub body: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

/// Kind-specific part of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text,
    File(Attachment),
    Image(Attachment),
    /// Acknowledges the message whose timestamp this one carries.
    Seen,
    /// Marker some clients put on replay requests. The sentinel body is what
    /// actually triggers a replay.
    Request,
    /// Result of the external numerology analysis, relayed untouched.
    Numerology(serde_json::Value),
    /// A kind this server does not know; relayed and stored as-is.
    Other(String),
}

impl Payload {
    /// Wire name of the kind (`type` field).
    pub fn kind(&self) -> &str {
        match self {
            Payload::Text => "text",
            Payload::File(_) => "file",
            Payload::Image(_) => "image",
            Payload::Seen => "seen",
            Payload::Request => "request",
            Payload::Numerology(_) => "numerology",
            Payload::Other(kind) => kind,
        }
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        match self {
            Payload::File(attachment) | Payload::Image(attachment) => Some(attachment),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// One unit of channel content.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Client-asserted display name. Not authenticated.
    pub username: String,
    /// Text, or a caption for non-text kinds (`message` on the wire).
    pub body: String,
    /// Server-assigned on ingress, except for seen acknowledgements (which
    /// carry the target's timestamp) and replay requests.
    pub timestamp: Option<DateTime<Utc>>,
    pub channel: String,
    pub payload: Payload,
    /// Usernames that acknowledged this message, in acknowledgement order.
    pub seen_by: Vec<String>,
    pub reply_to: Option<ReplyRef>,
}

impl ChatMessage {
    pub fn new(
        username: impl Into<String>,
        body: impl Into<String>,
        channel: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            username: username.into(),
            body: body.into(),
            timestamp: None,
            channel: channel.into(),
            payload,
            seen_by: Vec::new(),
            reply_to: None,
        }
    }

    /// Plain text message in `channel`, stamped with `now`.
    pub fn text(
        username: impl Into<String>,
        body: impl Into<String>,
        channel: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(username, body, channel, Payload::Text).at(now)
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    /// Parse a JSON frame. Only a JSON object is a message; a missing
    /// `type` decodes as text.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let value: serde_json::Value = serde_json::from_slice(raw)?;
        if !value.is_object() {
            return Err(WireError::NotAnObject);
        }
        let wire: WireMessage = serde_json::from_value(value)?;
        Ok(wire.into())
    }

    pub fn encode(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(&WireMessage::from(self))?)
    }

    /// Apply server-side defaults to a freshly decoded inbound message:
    /// fallback channel, and a server timestamp for everything except seen
    /// acknowledgements and replay requests.
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        if self.channel.is_empty() {
            self.channel = DEFAULT_CHANNEL.to_string();
        }
        if self.payload != Payload::Seen && !self.is_replay_request() {
            self.timestamp = Some(now);
        }
    }

    pub fn is_replay_request(&self) -> bool {
        self.body == REPLAY_SENTINEL
    }

    /// Timestamp of the acknowledged message, if this is a usable seen
    /// acknowledgement (named sender, target after the epoch).
    pub fn seen_target(&self) -> Option<DateTime<Utc>> {
        if self.payload != Payload::Seen || self.username.is_empty() {
            return None;
        }
        self.timestamp.filter(|ts| ts.timestamp() > 0)
    }

    /// Whether this message was stamped within the same second as `other`.
    pub fn same_second(&self, other: DateTime<Utc>) -> bool {
        self.timestamp
            .is_some_and(|ts| ts.timestamp() == other.timestamp())
    }

    /// Record `username` in `seen_by`. Returns `false` if already present.
    pub fn add_seen_by(&mut self, username: &str) -> bool {
        if self.seen_by.iter().any(|u| u == username) {
            return false;
        }
        self.seen_by.push(username.to_string());
        true
    }
}

// ---------------------------------------------------------------------------
// Wire form
// ---------------------------------------------------------------------------

/// Flat JSON shape. Lenient on input: every field may be missing or null.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seen_by: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<ReplyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    numerology_data: Option<serde_json::Value>,
}

impl From<WireMessage> for ChatMessage {
    fn from(wire: WireMessage) -> Self {
        let attachment = || Attachment {
            url: wire.file_url.clone().unwrap_or_default(),
            name: wire.file_name.clone().unwrap_or_default(),
            size: wire.file_size.unwrap_or_default(),
        };

        let payload = match wire.kind.as_deref().unwrap_or_default() {
            "" | "text" => Payload::Text,
            "file" => Payload::File(attachment()),
            "image" => Payload::Image(attachment()),
            "seen" => Payload::Seen,
            "request" => Payload::Request,
            "numerology" => {
                Payload::Numerology(wire.numerology_data.clone().unwrap_or_default())
            }
            other => Payload::Other(other.to_string()),
        };

        let mut seen_by = Vec::new();
        for username in wire.seen_by.unwrap_or_default() {
            if !seen_by.contains(&username) {
                seen_by.push(username);
            }
        }

        ChatMessage {
            username: wire.username.unwrap_or_default(),
            body: wire.message.unwrap_or_default(),
            timestamp: wire.timestamp,
            channel: wire.channel.unwrap_or_default(),
            payload,
            seen_by,
            reply_to: wire.reply_to,
        }
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let attachment = message.payload.attachment();
        let numerology_data = match &message.payload {
            Payload::Numerology(data) => Some(data.clone()),
            _ => None,
        };

        WireMessage {
            username: Some(message.username.clone()),
            message: Some(message.body.clone()),
            timestamp: message.timestamp,
            channel: Some(message.channel.clone()),
            kind: Some(message.kind().to_string()),
            file_url: attachment.map(|a| a.url.clone()),
            file_name: attachment.map(|a| a.name.clone()),
            file_size: attachment.map(|a| a.size),
            seen_by: (!message.seen_by.is_empty()).then(|| message.seen_by.clone()),
            reply_to: message.reply_to.clone(),
            numerology_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_missing_fields_decode_as_text() {
        let msg = ChatMessage::decode(br#"{"username":"alice","message":"hi"}"#).unwrap();
        assert_eq!(msg.payload, Payload::Text);
        assert_eq!(msg.kind(), "text");
        assert!(msg.channel.is_empty());
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn test_null_fields_are_tolerated() {
        let msg = ChatMessage::decode(br#"{"username":null,"message":"x","type":null}"#).unwrap();
        assert_eq!(msg.username, "");
        assert_eq!(msg.payload, Payload::Text);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(ChatMessage::decode(b"hello").is_err());
        assert!(ChatMessage::decode(br#"{"fileSize":"big"}"#).is_err());
    }

    #[test]
    fn test_non_object_json_is_an_error() {
        assert!(matches!(
            ChatMessage::decode(br#"["bob","hi"]"#),
            Err(WireError::NotAnObject)
        ));
        assert!(matches!(
            ChatMessage::decode(b"42"),
            Err(WireError::NotAnObject)
        ));
        assert!(matches!(
            ChatMessage::decode(br#""hi""#),
            Err(WireError::NotAnObject)
        ));
    }

    #[test]
    fn test_normalize_defaults_channel_and_stamps() {
        let mut msg = ChatMessage::decode(br#"{"username":"bob","message":"hey"}"#).unwrap();
        msg.normalize(fixed_now());
        assert_eq!(msg.channel, DEFAULT_CHANNEL);
        assert_eq!(msg.timestamp, Some(fixed_now()));
    }

    #[test]
    fn test_normalize_overwrites_client_timestamp() {
        let mut msg = ChatMessage::decode(
            br#"{"username":"bob","message":"hey","timestamp":"2001-01-01T00:00:00Z","channel":"x"}"#,
        )
        .unwrap();
        msg.normalize(fixed_now());
        assert_eq!(msg.timestamp, Some(fixed_now()));
        assert_eq!(msg.channel, "x");
    }

    #[test]
    fn test_normalize_keeps_seen_target_timestamp() {
        let mut msg = ChatMessage::decode(
            br#"{"username":"bob","type":"seen","timestamp":"2024-04-30T08:15:00Z","channel":"x"}"#,
        )
        .unwrap();
        msg.normalize(fixed_now());
        let target = Utc.with_ymd_and_hms(2024, 4, 30, 8, 15, 0).unwrap();
        assert_eq!(msg.timestamp, Some(target));
        assert_eq!(msg.seen_target(), Some(target));
    }

    #[test]
    fn test_replay_request_is_not_stamped() {
        let mut msg =
            ChatMessage::decode(br#"{"message":"__GET_RECENT_MESSAGES__","channel":"genel"}"#)
                .unwrap();
        msg.normalize(fixed_now());
        assert!(msg.is_replay_request());
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn test_seen_target_requires_username_and_timestamp() {
        let mut msg = ChatMessage::new("", "", "genel", Payload::Seen).at(fixed_now());
        assert!(msg.seen_target().is_none());

        msg.username = "carol".into();
        assert_eq!(msg.seen_target(), Some(fixed_now()));

        msg.timestamp = Some(Utc.timestamp_opt(0, 0).unwrap());
        assert!(msg.seen_target().is_none());

        let text = ChatMessage::text("carol", "hi", "genel", fixed_now());
        assert!(text.seen_target().is_none());
    }

    #[test]
    fn test_file_message_wire_shape() {
        let msg = ChatMessage::new(
            "dave",
            "Shared a file: cat.png",
            "genel",
            Payload::Image(Attachment {
                url: "/uploads/2024-05-01/1714564800_cat.png".into(),
                name: "cat.png".into(),
                size: 2048,
            }),
        )
        .at(fixed_now());

        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["fileUrl"], "/uploads/2024-05-01/1714564800_cat.png");
        assert_eq!(json["fileName"], "cat.png");
        assert_eq!(json["fileSize"], 2048);
        assert!(json.get("seenBy").is_none());

        let decoded = ChatMessage::decode(msg.encode().unwrap().as_bytes()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_text_message_drops_stray_file_fields() {
        let msg = ChatMessage::decode(
            br#"{"username":"eve","message":"hi","type":"text","fileUrl":"/etc/passwd"}"#,
        )
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert!(json.get("fileUrl").is_none());
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let msg = ChatMessage::decode(br#"{"message":"x","type":"poll"}"#).unwrap();
        assert_eq!(msg.payload, Payload::Other("poll".into()));
        assert!(msg.encode().unwrap().contains(r#""type":"poll""#));
    }

    #[test]
    fn test_numerology_data_passes_through() {
        let raw = br#"{"username":"f","message":"analysis","type":"numerology","numerologyData":{"lifePath":7}}"#;
        let msg = ChatMessage::decode(raw).unwrap();
        match &msg.payload {
            Payload::Numerology(data) => assert_eq!(data["lifePath"], 7),
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(msg.encode().unwrap().contains(r#""numerologyData":{"lifePath":7}"#));
    }

    #[test]
    fn test_reply_snapshot_survives_encoding() {
        let raw = br#"{"username":"g","message":"agreed","replyTo":{"messageId":"m1","username":"h","message":"lunch?","type":"text"}}"#;
        let msg = ChatMessage::decode(raw).unwrap();
        let reply = msg.reply_to.as_ref().unwrap();
        assert_eq!(reply.message_id, "m1");
        assert_eq!(reply.body, "lunch?");
        assert!(msg.encode().unwrap().contains(r#""replyTo":{"messageId":"m1""#));
    }

    #[test]
    fn test_add_seen_by_is_idempotent() {
        let mut msg = ChatMessage::text("a", "b", "c", fixed_now());
        assert!(msg.add_seen_by("zoe"));
        assert!(!msg.add_seen_by("zoe"));
        assert!(msg.add_seen_by("yan"));
        assert_eq!(msg.seen_by, vec!["zoe".to_string(), "yan".to_string()]);
    }

    #[test]
    fn test_duplicate_seen_by_collapses_on_decode() {
        let msg = ChatMessage::decode(br#"{"message":"m","seenBy":["a","b","a"]}"#).unwrap();
        assert_eq!(msg.seen_by, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_same_second_ignores_subseconds() {
        let stamped = fixed_now() + chrono::Duration::milliseconds(730);
        let msg = ChatMessage::text("a", "b", "c", stamped);
        assert!(msg.same_second(fixed_now()));
        assert!(!msg.same_second(fixed_now() + chrono::Duration::seconds(1)));
    }
}
