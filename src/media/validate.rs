//! Payload validation for downloaded media
//!
//! Decoded bytes are checked against mimetype-specific magic numbers and
//! the declared length before anything touches disk. Base64 payloads from
//! the gateway arrive in several sloppy shapes (data URIs, embedded
//! whitespace, url-safe alphabet, missing padding), so decoding is
//! deliberately lenient about form while strict about content.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Absolute slack allowed on top of the declared length
const SIZE_TOLERANCE_FLOOR: i64 = 1024;

/// Decode a base64 payload from a gateway JSON response
///
/// Strips a `data:...;base64,` prefix and all whitespace, normalizes the
/// url-safe alphabet, restores padding, then decodes. An empty result is
/// an error: the gateway sometimes answers with a well-formed but empty
/// body, which must count as a failed attempt.
///
/// # Errors
///
/// Returns `Error::Decode` for alphabet violations, undecodable input,
/// or an empty payload
pub fn decode_base64_payload(raw: &str) -> Result<Vec<u8>> {
    let body = raw
        .find("base64,")
        .map_or(raw, |idx| &raw[idx + "base64,".len()..]);

    let mut cleaned = String::with_capacity(body.len());
    for c in body.chars() {
        match c {
            c if c.is_ascii_whitespace() => {}
            '-' => cleaned.push('+'),
            '_' => cleaned.push('/'),
            '=' => {}
            c if c.is_ascii_alphanumeric() || c == '+' || c == '/' => cleaned.push(c),
            c => {
                return Err(Error::Decode(format!("invalid base64 character {c:?}")));
            }
        }
    }

    // Restore padding stripped above (and whatever the gateway dropped)
    while cleaned.len() % 4 != 0 {
        cleaned.push('=');
    }

    let bytes = STANDARD
        .decode(&cleaned)
        .map_err(|e| Error::Decode(format!("base64 decode failed: {e}")))?;

    if bytes.is_empty() {
        return Err(Error::Decode("decoded payload is empty".to_string()));
    }
    Ok(bytes)
}

/// Check the leading bytes against the signature expected for a mimetype
///
/// Unknown mimetypes pass with a warning rather than failing; the
/// gateway emits more mimetypes than we can enumerate, and a false
/// rejection loses media permanently.
///
/// # Errors
///
/// Returns `Error::Validation` when a known mimetype's signature does
/// not match
pub fn check_magic_number(bytes: &[u8], mimetype: &str) -> Result<()> {
    let essence = mimetype.split(';').next().unwrap_or(mimetype).trim();

    let ok = match essence {
        "audio/ogg" | "application/ogg" | "audio/opus" => bytes.starts_with(b"OggS"),
        "audio/mpeg" | "audio/mp3" => is_mp3(bytes),
        "image/png" => bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
        "image/jpeg" | "image/jpg" => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
        "image/gif" => bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a"),
        "image/webp" => bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP"),
        "audio/wav" | "audio/wave" | "audio/x-wav" => {
            bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WAVE")
        }
        "application/pdf" => bytes.starts_with(b"%PDF"),
        "video/mp4" | "audio/mp4" | "audio/m4a" | "video/3gpp" | "video/quicktime" => {
            bytes.get(4..8) == Some(b"ftyp")
        }
        "video/webm" | "audio/webm" | "video/x-matroska" => {
            bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3])
        }
        "audio/amr" => bytes.starts_with(b"#!AMR"),
        other => {
            tracing::warn!(mimetype = other, "no magic-number signature known, accepting");
            return Ok(());
        }
    };

    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "magic-number mismatch for {essence} ({} leading bytes {:02x?})",
            bytes.len().min(8),
            &bytes[..bytes.len().min(8)]
        )))
    }
}

/// MP3 files start with an ID3 tag or a raw MPEG frame sync
fn is_mp3(bytes: &[u8]) -> bool {
    bytes.starts_with(b"ID3")
        || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0)
}

/// Check the downloaded size against the declared length
///
/// Allowed deviation is max(1 KiB, 10% of declared). No declared length
/// means nothing to check.
///
/// # Errors
///
/// Returns `Error::Validation` when the size falls outside tolerance
pub fn check_size_tolerance(actual: usize, declared: Option<i64>) -> Result<()> {
    let Some(declared) = declared.filter(|d| *d > 0) else {
        return Ok(());
    };

    let actual = i64::try_from(actual).unwrap_or(i64::MAX);
    let tolerance = SIZE_TOLERANCE_FLOOR.max(declared / 10);
    let deviation = (actual - declared).abs();

    if deviation <= tolerance {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "size {actual} outside tolerance of declared {declared} (allowed ±{tolerance})"
        )))
    }
}

/// Preferred file extension for a mimetype
#[must_use]
pub fn extension_for_mime(mimetype: &str) -> Option<&'static str> {
    let essence = mimetype.split(';').next().unwrap_or(mimetype).trim();
    match essence {
        "image/jpeg" | "image/jpg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "audio/ogg" | "application/ogg" | "audio/opus" => Some(".ogg"),
        "audio/mpeg" | "audio/mp3" => Some(".mp3"),
        "audio/mp4" | "audio/m4a" => Some(".m4a"),
        "audio/wav" | "audio/wave" | "audio/x-wav" => Some(".wav"),
        "audio/amr" => Some(".amr"),
        "video/mp4" => Some(".mp4"),
        "video/3gpp" => Some(".3gp"),
        "video/webm" => Some(".webm"),
        "video/quicktime" => Some(".mov"),
        "application/pdf" => Some(".pdf"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some(".docx"),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some(".xlsx"),
        "application/msword" => Some(".doc"),
        "application/vnd.ms-excel" => Some(".xls"),
        "text/plain" => Some(".txt"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_base64() {
        let bytes = decode_base64_payload("aGVsbG8=").unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_decode_data_uri_and_whitespace() {
        let bytes = decode_base64_payload("data:image/png;base64, aGVs\nbG8 =").unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_decode_urlsafe_and_missing_padding() {
        // "??>" encodes to Pz8+ in standard, Pz8- in url-safe
        assert_eq!(decode_base64_payload("Pz8-").unwrap(), b"??>");
        assert_eq!(decode_base64_payload("aGVsbG8").unwrap(), b"hello");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_base64_payload("not base64 at all!!!").is_err());
        assert!(decode_base64_payload("").is_err());
    }

    #[test]
    fn test_magic_numbers() {
        assert!(check_magic_number(b"OggS\x00rest", "audio/ogg").is_ok());
        assert!(check_magic_number(b"%PDF-1.7", "application/pdf").is_ok());
        assert!(check_magic_number(&[0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg").is_ok());
        assert!(check_magic_number(b"ID3\x04rest", "audio/mpeg").is_ok());
        assert!(check_magic_number(b"\x00\x00\x00\x18ftypmp42", "video/mp4").is_ok());

        // PDF bytes labeled as OGG audio must fail
        assert!(check_magic_number(b"%PDF-1.7", "audio/ogg").is_err());
        assert!(check_magic_number(b"OggS", "image/png").is_err());
    }

    #[test]
    fn test_unknown_mimetype_passes() {
        assert!(check_magic_number(b"\x00\x01\x02", "application/x-whatever").is_ok());
    }

    #[test]
    fn test_mimetype_parameters_ignored() {
        assert!(check_magic_number(b"OggS\x00", "audio/ogg; codecs=opus").is_ok());
        assert_eq!(extension_for_mime("audio/ogg; codecs=opus"), Some(".ogg"));
    }

    #[test]
    fn test_size_tolerance() {
        // Within 10%
        assert!(check_size_tolerance(95_000, Some(100_000)).is_ok());
        // Outside 10% and outside 1 KiB
        assert!(check_size_tolerance(80_000, Some(100_000)).is_err());
        // Small file: 1 KiB floor applies even though 10% would reject
        assert!(check_size_tolerance(2_000, Some(1_500)).is_ok());
        // No declared length: nothing to check
        assert!(check_size_tolerance(12_345, None).is_ok());
        assert!(check_size_tolerance(12_345, Some(0)).is_ok());
    }
}
