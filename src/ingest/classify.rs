//! Payload classifier
//!
//! Turns a raw webhook body into a typed [`Envelope`], or `None` when the
//! payload is not a message event. Classification is a pure mapping over
//! the untyped JSON tree: every field access defaults explicitly, and
//! malformed sub-objects degrade to empty values instead of erroring.
//! Upstream payload shapes are inconsistent, so each field is probed at
//! every location it has been observed.

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde_json::Value;

/// One party of a conversation (sender or chat side)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Party {
    pub id: String,
    pub name: String,
    pub verified_name: String,
    pub is_business: bool,
    pub photo: String,
}

/// Decryption and descriptive fields of one media sub-message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaFields {
    pub mimetype: String,
    pub caption: String,
    pub file_length: Option<i64>,
    pub media_key: String,
    pub direct_path: String,
    pub file_sha256: String,
    pub file_enc_sha256: String,
    /// Plain CDN url, usable as a direct-download fallback
    pub url: String,
    pub file_name: String,
    pub title: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub seconds: Option<i64>,
    pub ptt: bool,
    pub page_count: Option<i64>,
    pub is_animated: bool,
}

/// Location payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationFields {
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
    pub address: String,
}

/// Poll payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollFields {
    pub question: String,
    pub options: Vec<String>,
}

/// Typed union of the recognized message content kinds
///
/// More than one field may be present (a caption alongside an image, or
/// several media blocks on an album-style payload); the materializer picks
/// the primary kind, the extractor walks all of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentBlock {
    pub text: Option<String>,
    pub extended_text: Option<String>,
    pub image: Option<MediaFields>,
    pub video: Option<MediaFields>,
    pub audio: Option<MediaFields>,
    pub document: Option<MediaFields>,
    pub sticker: Option<MediaFields>,
    pub location: Option<LocationFields>,
    pub poll: Option<PollFields>,
    /// Protocol/control sub-message present (device sync, key share)
    pub protocol: bool,
}

impl ContentBlock {
    /// Whether this block carries anything at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.extended_text.is_none()
            && self.image.is_none()
            && self.video.is_none()
            && self.audio.is_none()
            && self.document.is_none()
            && self.sticker.is_none()
            && self.location.is_none()
            && self.poll.is_none()
            && !self.protocol
    }

    /// Primary textual content: plain text, then extended text, then the
    /// first media caption
    #[must_use]
    pub fn text_content(&self) -> String {
        if let Some(t) = &self.text {
            return t.clone();
        }
        if let Some(t) = &self.extended_text {
            return t.clone();
        }
        [&self.image, &self.video, &self.document, &self.sticker, &self.audio]
            .into_iter()
            .flatten()
            .map(|m| m.caption.clone())
            .find(|c| !c.is_empty())
            .unwrap_or_default()
    }
}

/// A classified webhook payload
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Upstream message id, or a locally generated `local_` id
    pub message_id: String,
    pub from_me: bool,
    pub is_group: bool,
    pub timestamp: DateTime<Utc>,
    pub sender: Party,
    pub chat: Party,
    /// Root-level display name, a lower-precedence identity source
    pub root_name: String,
    /// Root-level photo url, a lower-precedence identity source
    pub root_photo: String,
    pub content: ContentBlock,
}

/// Classify a raw webhook payload
///
/// Returns `None` for payloads that are not message events (status
/// callbacks, acks, presence updates); callers must skip those silently.
/// `instance_id` feeds the last-resort from-me heuristic.
#[must_use]
pub fn classify(raw: &Value, instance_id: &str) -> Option<Envelope> {
    let sender = parse_party(raw, &["sender", "participant", "author"]);
    let chat = parse_party(raw, &["chat", "contact"]);
    let content = parse_content(raw);

    // Not a message: nothing to say and nobody saying it
    if content.is_empty() && (sender.id.is_empty() || chat.id.is_empty()) {
        return None;
    }

    let message_id = first_str(raw, &["messageId", "id"])
        .map(String::from)
        .or_else(|| nested_str(raw, "key", "id"))
        .unwrap_or_else(local_message_id);

    let from_me = resolve_from_me(raw, &sender.id, instance_id);
    let is_group = first_bool(raw, &["isGroup", "isGroupMsg"]).unwrap_or(false);
    let timestamp = first_i64(raw, &["moment", "messageTimestamp", "timestamp"])
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now);

    Some(Envelope {
        message_id,
        from_me,
        is_group,
        timestamp,
        sender,
        chat,
        root_name: first_str(raw, &["pushName", "notifyName", "name"])
            .unwrap_or_default()
            .to_string(),
        root_photo: first_str(raw, &["profilePicture", "photo"])
            .unwrap_or_default()
            .to_string(),
        content,
    })
}

/// From-me resolution order: explicit root field, then the nested key
/// field, then the sender-id-contains-instance-id heuristic. The upstream
/// API is ambiguous about which one is authoritative; this is the most
/// defensive ordering observed in practice.
fn resolve_from_me(raw: &Value, sender_id: &str, instance_id: &str) -> bool {
    if let Some(explicit) = raw.get("fromMe").and_then(Value::as_bool) {
        return explicit;
    }
    if let Some(nested) = raw.get("key").and_then(|k| k.get("fromMe")).and_then(Value::as_bool) {
        return nested;
    }
    !instance_id.is_empty() && sender_id.contains(instance_id)
}

fn parse_party(raw: &Value, keys: &[&str]) -> Party {
    let Some(obj) = keys.iter().find_map(|k| raw.get(*k)) else {
        return Party::default();
    };

    // Some payloads carry a bare id string where an object is expected
    if let Some(id) = obj.as_str() {
        return Party {
            id: id.to_string(),
            ..Party::default()
        };
    }

    Party {
        id: first_str(obj, &["id", "chatId", "sender", "jid"])
            .unwrap_or_default()
            .to_string(),
        name: first_str(obj, &["pushName", "name", "title", "formattedName"])
            .unwrap_or_default()
            .to_string(),
        verified_name: first_str(obj, &["verifiedBizName", "verifiedName"])
            .unwrap_or_default()
            .to_string(),
        is_business: first_bool(obj, &["isBusiness", "isBiz"]).unwrap_or(false),
        photo: first_str(obj, &["profilePicture", "profilePicThumbObj", "photo", "eurl"])
            .unwrap_or_default()
            .to_string(),
    }
}

fn parse_content(raw: &Value) -> ContentBlock {
    let block = ["msgContent", "message", "content", "body"]
        .iter()
        .find_map(|k| raw.get(*k))
        .filter(|v| v.is_object());

    let mut content = block.map(parse_content_block).unwrap_or_default();

    // Plain text occasionally arrives at the root instead of inside the block
    if content.text.is_none() {
        content.text = first_str(raw, &["text"]).map(String::from).filter(|t| !t.is_empty());
    }

    content
}

fn parse_content_block(block: &Value) -> ContentBlock {
    ContentBlock {
        text: first_str(block, &["conversation", "text"])
            .map(String::from)
            .filter(|t| !t.is_empty()),
        extended_text: nested_str(block, "extendedTextMessage", "text")
            .filter(|t| !t.is_empty()),
        image: block.get("imageMessage").map(parse_media_fields),
        video: block.get("videoMessage").map(parse_media_fields),
        audio: block.get("audioMessage").map(parse_media_fields),
        document: block.get("documentMessage").map(parse_media_fields),
        sticker: block.get("stickerMessage").map(parse_media_fields),
        location: block.get("locationMessage").map(parse_location_fields),
        poll: block
            .get("pollCreationMessage")
            .or_else(|| block.get("pollCreationMessageV3"))
            .map(parse_poll_fields),
        protocol: block.get("protocolMessage").is_some()
            || block.get("senderKeyDistributionMessage").is_some()
            || block.get("deviceSentMessage").is_some(),
    }
}

fn parse_media_fields(media: &Value) -> MediaFields {
    MediaFields {
        mimetype: first_str(media, &["mimetype", "mimeType"])
            .unwrap_or_default()
            .to_string(),
        caption: first_str(media, &["caption"]).unwrap_or_default().to_string(),
        file_length: first_i64(media, &["fileLength", "size"]),
        media_key: first_str(media, &["mediaKey"]).unwrap_or_default().to_string(),
        direct_path: first_str(media, &["directPath"]).unwrap_or_default().to_string(),
        file_sha256: first_str(media, &["fileSha256"]).unwrap_or_default().to_string(),
        file_enc_sha256: first_str(media, &["fileEncSha256"]).unwrap_or_default().to_string(),
        url: first_str(media, &["url"]).unwrap_or_default().to_string(),
        file_name: first_str(media, &["fileName", "filename"])
            .unwrap_or_default()
            .to_string(),
        title: first_str(media, &["title"]).unwrap_or_default().to_string(),
        width: first_i64(media, &["width"]),
        height: first_i64(media, &["height"]),
        seconds: first_i64(media, &["seconds", "duration"]),
        ptt: first_bool(media, &["ptt"]).unwrap_or(false),
        page_count: first_i64(media, &["pageCount"]),
        is_animated: first_bool(media, &["isAnimated", "isAvatar"]).unwrap_or(false),
    }
}

fn parse_location_fields(location: &Value) -> LocationFields {
    LocationFields {
        latitude: first_f64(location, &["degreesLatitude", "latitude"]).unwrap_or(0.0),
        longitude: first_f64(location, &["degreesLongitude", "longitude"]).unwrap_or(0.0),
        name: first_str(location, &["name"]).unwrap_or_default().to_string(),
        address: first_str(location, &["address"]).unwrap_or_default().to_string(),
    }
}

fn parse_poll_fields(poll: &Value) -> PollFields {
    let options = poll
        .get("options")
        .and_then(Value::as_array)
        .map(|opts| {
            opts.iter()
                .filter_map(|o| {
                    o.get("optionName")
                        .and_then(Value::as_str)
                        .or_else(|| o.as_str())
                })
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    PollFields {
        question: first_str(poll, &["name", "question"]).unwrap_or_default().to_string(),
        options,
    }
}

/// Locally generated fallback id for payloads that carry none
fn local_message_id() -> String {
    let nonce: u64 = rand::thread_rng().r#gen();
    format!("local_{nonce:016x}")
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_str))
}

fn nested_str(value: &Value, outer: &str, inner: &str) -> Option<String> {
    value
        .get(outer)
        .and_then(|o| o.get(inner))
        .and_then(Value::as_str)
        .map(String::from)
}

fn first_bool(value: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_bool))
}

/// Numbers arrive as JSON numbers or decimal strings depending on the
/// payload variant
fn first_i64(value: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| {
        let v = value.get(*k)?;
        v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })
}

fn first_f64(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| {
        let v = value.get(*k)?;
        v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })
}
