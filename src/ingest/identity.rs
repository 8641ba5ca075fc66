//! Identity resolver
//!
//! Derives the canonical chat id from the heterogeneous id formats the
//! gateway emits, and applies the display-name/photo precedence rules for
//! outgoing vs. incoming messages. Normalization is deterministic: the
//! same raw id always yields the same canonical id, and a group id can
//! never collide with a private one.

use super::classify::Party;

/// Known numeric prefix of long-format group ids
const GROUP_ID_PREFIX: &str = "1203";

/// Digit count beyond which a prefixed id is treated as a group id
const LONG_GROUP_THRESHOLD: usize = 15;

/// Trailing digits used to derive the stable group key
const GROUP_KEY_DIGITS: usize = 12;

/// Minimum digit count for a plausible private phone number
const MIN_PRIVATE_DIGITS: usize = 10;

/// Classification of a normalized chat id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// Bare phone-number digit string
    Private,
    /// Stable `group_` key derived from the trailing digits
    Group,
    /// Best-effort sanitized literal of an unrecognized id
    Literal,
}

/// A canonical chat identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatId {
    pub id: String,
    pub kind: ChatKind,
}

impl ChatId {
    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self.kind, ChatKind::Group)
    }
}

/// Resolve the canonical chat id for a payload
///
/// The explicit chat id always wins over a sender-derived one when both
/// are present.
#[must_use]
pub fn resolve_chat_id(raw_chat_id: &str, raw_sender_id: &str) -> ChatId {
    let raw = if raw_chat_id.is_empty() { raw_sender_id } else { raw_chat_id };
    normalize_chat_id(raw)
}

/// Normalize one raw id into its canonical form
///
/// Strips the domain-style suffix, keeps digits, then classifies:
/// long prefixed digit runs (or a `@g.us` suffix) become group keys,
/// ten or more digits a private id, anything else a sanitized literal.
/// The literal fallback is deliberate: an unparseable id still gets a
/// stable chat rather than a hard error.
#[must_use]
pub fn normalize_chat_id(raw: &str) -> ChatId {
    let has_group_suffix = raw.ends_with("@g.us");
    let bare = raw.split('@').next().unwrap_or(raw);
    let digits: String = bare.chars().filter(char::is_ascii_digit).collect();

    let long_group = digits.len() > LONG_GROUP_THRESHOLD && digits.starts_with(GROUP_ID_PREFIX);
    if long_group || has_group_suffix {
        // Short `@g.us` ids exist in the wild; they keep their group
        // classification with whatever digits (or literal) they carry
        let key = if digits.len() >= GROUP_KEY_DIGITS {
            digits[digits.len() - GROUP_KEY_DIGITS..].to_string()
        } else if digits.is_empty() {
            sanitize_literal(bare)
        } else {
            digits
        };
        return ChatId {
            id: format!("group_{key}"),
            kind: ChatKind::Group,
        };
    }

    if digits.len() >= MIN_PRIVATE_DIGITS {
        return ChatId {
            id: digits,
            kind: ChatKind::Private,
        };
    }

    ChatId {
        id: sanitize_literal(raw),
        kind: ChatKind::Literal,
    }
}

/// Replace everything that is not alphanumeric with underscores
fn sanitize_literal(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

/// Resolved display identity for a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayIdentity {
    pub name: String,
    pub photo_url: Option<String>,
}

/// Resolve which name and photo to surface for a chat
///
/// Outgoing messages (`from_me`) must surface the *other party*: chat
/// fields first, root fields second, sender name only as a last resort.
/// The sender photo is never used on outgoing messages since that would
/// be the local account's own picture. Incoming messages prefer the
/// sender's identity.
#[must_use]
pub fn resolve_display_identity(
    from_me: bool,
    sender: &Party,
    chat: &Party,
    root_name: &str,
    root_photo: &str,
) -> DisplayIdentity {
    let (name, photo) = if from_me {
        let name = first_non_empty(&[&chat.name, root_name, &sender.verified_name, &sender.name]);
        let photo = first_valid_photo(&[&chat.photo, root_photo]);
        (name, photo)
    } else {
        let name = first_non_empty(&[&sender.name, &sender.verified_name, &chat.name, root_name]);
        let photo = first_valid_photo(&[&sender.photo, &chat.photo, root_photo]);
        (name, photo)
    };

    DisplayIdentity { name, photo_url: photo }
}

fn first_non_empty(candidates: &[&str]) -> String {
    candidates
        .iter()
        .find(|c| !c.is_empty())
        .map(|c| (*c).to_string())
        .unwrap_or_default()
}

/// A photo candidate counts only if it is a real url or inline image data;
/// placeholder junk values are discarded, not merely falsy ones
fn first_valid_photo(candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find(|c| is_valid_photo(c))
        .map(|c| (*c).to_string())
}

fn is_valid_photo(candidate: &str) -> bool {
    candidate.starts_with("http://")
        || candidate.starts_with("https://")
        || candidate.starts_with("data:image")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_id_normalization() {
        let id = normalize_chat_id("5511999998888@s.whatsapp.net");
        assert_eq!(id.id, "5511999998888");
        assert_eq!(id.kind, ChatKind::Private);
        assert!(!id.is_group());
    }

    #[test]
    fn test_group_id_normalization() {
        let id = normalize_chat_id("120363123456789012@g.us");
        assert_eq!(id.id, "group_123456789012");
        assert_eq!(id.kind, ChatKind::Group);
    }

    #[test]
    fn test_group_key_is_stable() {
        let a = normalize_chat_id("120363123456789012@g.us");
        let b = normalize_chat_id("120363123456789012@g.us");
        assert_eq!(a, b);
        // Trailing 12 digits
        assert_eq!(a.id, "group_123456789012");
    }

    #[test]
    fn test_short_group_id_stays_a_group() {
        let id = normalize_chat_id("12345@g.us");
        assert_eq!(id.kind, ChatKind::Group);
        assert_eq!(id.id, "group_12345");

        let id = normalize_chat_id("@g.us");
        assert_eq!(id.kind, ChatKind::Group);
        assert_eq!(id.id, "group_unknown");
    }

    #[test]
    fn test_group_never_merges_with_private() {
        let group = normalize_chat_id("120363123456789012@g.us");
        let private = normalize_chat_id("123456789012@s.whatsapp.net");
        assert_ne!(group.id, private.id);
    }

    #[test]
    fn test_literal_fallback() {
        let id = normalize_chat_id("status@broadcast");
        assert_eq!(id.kind, ChatKind::Literal);
        assert_eq!(id.id, "status_broadcast");

        let id = normalize_chat_id("");
        assert_eq!(id.id, "unknown");
    }

    #[test]
    fn test_explicit_chat_id_wins() {
        let id = resolve_chat_id("5511999998888@s.whatsapp.net", "5511000001111@s.whatsapp.net");
        assert_eq!(id.id, "5511999998888");

        let id = resolve_chat_id("", "5511000001111@s.whatsapp.net");
        assert_eq!(id.id, "5511000001111");
    }

    fn party(name: &str, photo: &str) -> Party {
        Party {
            id: "x".to_string(),
            name: name.to_string(),
            verified_name: String::new(),
            is_business: false,
            photo: photo.to_string(),
        }
    }

    #[test]
    fn test_from_me_prefers_chat_photo() {
        let sender = party("Me", "https://cdn/me.jpg");
        let chat = party("Maria", "https://cdn/maria.jpg");

        let identity = resolve_display_identity(true, &sender, &chat, "", "");
        assert_eq!(identity.name, "Maria");
        assert_eq!(identity.photo_url.as_deref(), Some("https://cdn/maria.jpg"));
    }

    #[test]
    fn test_from_me_never_uses_sender_photo() {
        let sender = party("Me", "https://cdn/me.jpg");
        let chat = party("", "");

        let identity = resolve_display_identity(true, &sender, &chat, "", "");
        assert_eq!(identity.photo_url, None);
        // Name still falls back to sender as a last resort
        assert_eq!(identity.name, "Me");
    }

    #[test]
    fn test_incoming_prefers_sender() {
        let sender = party("João", "https://cdn/joao.jpg");
        let chat = party("Maria", "https://cdn/maria.jpg");

        let identity = resolve_display_identity(false, &sender, &chat, "", "");
        assert_eq!(identity.name, "João");
        assert_eq!(identity.photo_url.as_deref(), Some("https://cdn/joao.jpg"));
    }

    #[test]
    fn test_photo_candidates_validated() {
        let sender = party("João", "not-a-url");
        let chat = party("", "data:image/jpeg;base64,abcd");

        let identity = resolve_display_identity(false, &sender, &chat, "", "");
        assert_eq!(identity.photo_url.as_deref(), Some("data:image/jpeg;base64,abcd"));
    }
}
