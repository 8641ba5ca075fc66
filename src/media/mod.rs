//! Media pipeline: extraction, download/decrypt, validation, storage
//!
//! The resolver is the core state machine: a `MediaReference` moves from
//! `pending` to exactly one terminal state, and a successful download is
//! written at most once per (message, media type).

pub mod extract;
pub mod gateway;
pub mod resolver;
pub mod storage;
pub mod sweep;
pub mod validate;

use serde::{Deserialize, Serialize};

pub use extract::{MediaCandidate, extract};
pub use gateway::{GatewayClient, GatewayReply, RetryPolicy};
pub use resolver::{MediaFetcher, MediaResolver};
pub use storage::{LocalStorage, MediaScope, MediaStorage, chat_folder_name};
pub use sweep::{MediaSweeper, SweepLimits, SweepReport};

/// Kind of media attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaType {
    /// Stable string form used in the database and gateway requests
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
        }
    }

    /// Parse the database string form
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" => Some(Self::Document),
            "sticker" => Some(Self::Sticker),
            _ => None,
        }
    }

    /// On-disk folder name for this media type
    ///
    /// Folder names are fixed for compatibility with the existing layout;
    /// they must never change or idempotent re-delivery breaks.
    #[must_use]
    pub const fn folder_name(self) -> &'static str {
        match self {
            Self::Image => "imagens",
            Self::Video => "videos",
            Self::Audio => "audio",
            Self::Document => "documentos",
            Self::Sticker => "stickers",
        }
    }
}

/// Download status of a media reference
///
/// Transitions are forward-only: `Pending` moves to exactly one of the
/// terminal states. The reprocessing sweep may reset `Pending`/`Failed`
/// back to `Pending`; no other backward transition is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Success,
    Failed,
    InvalidData,
    Corrupted,
    Expired,
}

impl DownloadStatus {
    /// Stable string form used in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::InvalidData => "invalid_data",
            Self::Corrupted => "corrupted",
            Self::Expired => "expired",
        }
    }

    /// Parse the database string form
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "invalid_data" => Some(Self::InvalidData),
            "corrupted" => Some(Self::Corrupted),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Whether a transition from `self` to `next` is allowed
    ///
    /// Reprocessing resets `Pending`/`Failed` to `Pending`; everything
    /// else only moves forward out of `Pending`, except the integrity
    /// sweep which may demote `Success` to `Corrupted`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, _) | (Self::Failed, Self::Pending) | (Self::Success, Self::Corrupted)
        )
    }
}
