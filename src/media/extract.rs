//! Media extractor
//!
//! Scans a classified content block for the known media sub-messages and
//! produces download candidates. Candidates with incomplete decryption
//! fields are still produced (the reference row keeps the audit trail)
//! but are never submitted to the downloader.

use serde::{Deserialize, Serialize};

use super::MediaType;
use crate::ingest::classify::{ContentBlock, MediaFields};

/// Type-specific extras persisted alongside a media reference
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaExtra {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<i64>,
    /// Push-to-talk voice note flag (audio)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ptt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i64>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub title: String,
    /// Animated sticker flag
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_animated: bool,
}

/// One downloadable (or at least recordable) media attachment
#[derive(Debug, Clone)]
pub struct MediaCandidate {
    pub media_type: MediaType,
    pub mimetype: String,
    pub declared_length: Option<i64>,
    pub caption: String,
    pub media_key: String,
    pub direct_path: String,
    pub file_sha256: String,
    pub file_enc_sha256: String,
    /// Plain CDN url usable for the direct-download fallback
    pub fallback_url: Option<String>,
    pub file_name: Option<String>,
    pub extra: MediaExtra,
}

impl MediaCandidate {
    /// A candidate may be submitted to the downloader only when all four
    /// decryption fields are present
    #[must_use]
    pub fn valid_for_download(&self) -> bool {
        !self.media_key.is_empty()
            && !self.direct_path.is_empty()
            && !self.file_sha256.is_empty()
            && !self.file_enc_sha256.is_empty()
    }
}

/// Extract every media candidate from a content block
#[must_use]
pub fn extract(content: &ContentBlock) -> Vec<MediaCandidate> {
    let mut candidates = Vec::new();

    if let Some(fields) = &content.image {
        candidates.push(candidate(MediaType::Image, fields));
    }
    if let Some(fields) = &content.video {
        candidates.push(candidate(MediaType::Video, fields));
    }
    if let Some(fields) = &content.audio {
        candidates.push(candidate(MediaType::Audio, fields));
    }
    if let Some(fields) = &content.document {
        candidates.push(candidate(MediaType::Document, fields));
    }
    if let Some(fields) = &content.sticker {
        candidates.push(candidate(MediaType::Sticker, fields));
    }

    candidates
}

fn candidate(media_type: MediaType, fields: &MediaFields) -> MediaCandidate {
    let extra = match media_type {
        MediaType::Image | MediaType::Video => MediaExtra {
            width: fields.width,
            height: fields.height,
            seconds: if media_type == MediaType::Video { fields.seconds } else { None },
            ..MediaExtra::default()
        },
        MediaType::Audio => MediaExtra {
            seconds: fields.seconds,
            ptt: fields.ptt,
            ..MediaExtra::default()
        },
        MediaType::Document => MediaExtra {
            page_count: fields.page_count,
            title: fields.title.clone(),
            ..MediaExtra::default()
        },
        MediaType::Sticker => MediaExtra {
            width: fields.width,
            height: fields.height,
            is_animated: fields.is_animated,
            ..MediaExtra::default()
        },
    };

    MediaCandidate {
        media_type,
        mimetype: fields.mimetype.clone(),
        declared_length: fields.file_length,
        caption: fields.caption.clone(),
        media_key: fields.media_key.clone(),
        direct_path: fields.direct_path.clone(),
        file_sha256: fields.file_sha256.clone(),
        file_enc_sha256: fields.file_enc_sha256.clone(),
        fallback_url: if fields.url.is_empty() { None } else { Some(fields.url.clone()) },
        file_name: if fields.file_name.is_empty() { None } else { Some(fields.file_name.clone()) },
        extra,
    }
}
