//! W-API inbox - multi-tenant WhatsApp inbox backend
//!
//! This library ingests W-API webhook deliveries and materializes them
//! into a queryable inbox:
//! - Payload classification over the gateway's half-dozen payload shapes
//! - Identity resolution (canonical chat ids, display name/photo rules)
//! - Idempotent chat/sender/message materialization
//! - Media download, decrypt, validation, and chat-scoped storage
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                W-API gateway                        │
//! │     webhooks in  │  decrypt/download API out        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                inbox daemon                         │
//! │  classify │ identity │ materialize │ media resolve  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │        SQLite + chat-scoped media storage           │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod media;

pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use ingest::{IngestOutcome, Materializer, Pipeline};
pub use media::{
    DownloadStatus, GatewayClient, LocalStorage, MediaResolver, MediaScope, MediaStorage,
    MediaSweeper, MediaType, RetryPolicy, SweepLimits,
};
