//! Message materializer
//!
//! Maps a classified envelope plus a resolved chat id onto the persisted
//! Chat/Sender/Message aggregate. Materialization is idempotent on the
//! upstream message id and silently skips protocol/control messages that
//! must never surface as chat content.

use serde_json::json;

use super::classify::{ContentBlock, Envelope};
use super::identity::{ChatId, resolve_display_identity};
use crate::Result;
use crate::db::{
    Chat, ChatRepo, InsertOutcome, Message, MessageKind, MessageRepo, NewMessage, SenderRepo,
};

/// Control-message markers that must never become visible chat messages
const PROTOCOL_MARKERS: &[&str] = &[
    "APP_STATE_SYNC_KEY_SHARE",
    "APP_STATE_SYNC_KEY_REQUEST",
    "HISTORY_SYNC_NOTIFICATION",
    "INITIAL_SECURITY_NOTIFICATION_SETTING_SYNC",
    "PEER_DATA_OPERATION_REQUEST_RESPONSE",
];

/// Result of one materialization attempt
#[derive(Debug)]
pub enum Outcome {
    /// Message persisted; carries the rows the media pipeline needs
    Created(Box<Materialized>),
    /// A message with this upstream id already exists; nothing mutated
    Duplicate,
    /// Protocol/control message, skipped silently
    ProtocolSkipped,
}

/// The persisted aggregate for a newly created message
#[derive(Debug)]
pub struct Materialized {
    pub message: Message,
    pub chat: Chat,
}

/// Materializer over the chat/sender/message repositories
#[derive(Clone)]
pub struct Materializer {
    chats: ChatRepo,
    senders: SenderRepo,
    messages: MessageRepo,
}

impl Materializer {
    /// Create a materializer
    #[must_use]
    pub const fn new(chats: ChatRepo, senders: SenderRepo, messages: MessageRepo) -> Self {
        Self { chats, senders, messages }
    }

    /// Persist the aggregate for one classified payload
    ///
    /// Failure semantics: a unique-constraint race on the message insert
    /// surfaces as `Outcome::Duplicate`, never as an error. Chat and
    /// sender upserts that happened before a duplicate detection are
    /// harmless refreshes.
    ///
    /// # Errors
    ///
    /// Returns error only for genuine database failures
    pub fn materialize(
        &self,
        client_id: &str,
        envelope: &Envelope,
        chat_id: &ChatId,
    ) -> Result<Outcome> {
        // Cheap duplicate check first; the UNIQUE constraint below still
        // backstops the race where two workers pass this simultaneously
        if self.messages.exists(&envelope.message_id)? {
            return Ok(Outcome::Duplicate);
        }

        if is_protocol_message(&envelope.content) {
            tracing::debug!(message_id = %envelope.message_id, "skipping protocol message");
            return Ok(Outcome::ProtocolSkipped);
        }

        let identity = resolve_display_identity(
            envelope.from_me,
            &envelope.sender,
            &envelope.chat,
            &envelope.root_name,
            &envelope.root_photo,
        );

        let is_group = envelope.is_group || chat_id.is_group();
        let chat = self.chats.upsert_on_message(
            client_id,
            &chat_id.id,
            is_group,
            &identity.name,
            identity.photo_url.as_deref(),
            envelope.timestamp,
        )?;

        let sender_row_id = if envelope.sender.id.is_empty() {
            None
        } else {
            let sender = self.senders.upsert_on_message(
                client_id,
                &envelope.sender.id,
                &envelope.sender.name,
                &envelope.sender.verified_name,
                envelope.sender.is_business,
                photo_if_valid(&envelope.sender.photo),
            )?;
            Some(sender.id)
        };

        let kind = classify_kind(&envelope.content);
        let content = envelope.content.text_content();
        let location_json = envelope.content.location.as_ref().map(|l| {
            json!({
                "latitude": l.latitude,
                "longitude": l.longitude,
                "name": l.name,
                "address": l.address,
            })
            .to_string()
        });
        let poll_json = envelope.content.poll.as_ref().map(|p| {
            json!({"question": p.question, "options": p.options}).to_string()
        });

        let outcome = self.messages.insert(&NewMessage {
            client_id,
            chat_row_id: &chat.id,
            sender_row_id: sender_row_id.as_deref(),
            message_id: &envelope.message_id,
            kind,
            content: &content,
            from_me: envelope.from_me,
            timestamp: envelope.timestamp,
            location_json: location_json.as_deref(),
            poll_json: poll_json.as_deref(),
        })?;

        match outcome {
            InsertOutcome::Created(message) => {
                tracing::info!(
                    message_id = %message.message_id,
                    chat_id = %chat.chat_id,
                    kind = kind.as_str(),
                    from_me = message.from_me,
                    "message materialized"
                );
                Ok(Outcome::Created(Box::new(Materialized { message, chat })))
            }
            InsertOutcome::Duplicate => Ok(Outcome::Duplicate),
        }
    }
}

/// Protocol detection: an explicit protocol sub-message, or a control
/// marker leaking through the text fields
fn is_protocol_message(content: &ContentBlock) -> bool {
    if content.protocol {
        return true;
    }
    let text = content.text_content();
    PROTOCOL_MARKERS.iter().any(|m| text.contains(m))
}

/// Pick the message kind from the content block
///
/// Media kinds win in a fixed order, then location and poll, then plain
/// text; a non-empty block that matches nothing known is `Unknown`.
fn classify_kind(content: &ContentBlock) -> MessageKind {
    if content.image.is_some() {
        MessageKind::Image
    } else if content.video.is_some() {
        MessageKind::Video
    } else if content.audio.is_some() {
        MessageKind::Audio
    } else if content.document.is_some() {
        MessageKind::Document
    } else if content.sticker.is_some() {
        MessageKind::Sticker
    } else if content.location.is_some() {
        MessageKind::Location
    } else if content.poll.is_some() {
        MessageKind::Poll
    } else if content.text.is_some() || content.extended_text.is_some() {
        MessageKind::Text
    } else {
        MessageKind::Unknown
    }
}

fn photo_if_valid(photo: &str) -> Option<&str> {
    (photo.starts_with("http://") || photo.starts_with("https://") || photo.starts_with("data:image"))
        .then_some(photo)
}
