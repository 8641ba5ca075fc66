//! Configuration management for the inbox daemon

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::Result;

/// Inbox daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API server configuration
    pub server: ServerConfig,

    /// Path to data directory (database, media storage)
    pub data_dir: PathBuf,

    /// W-API gateway configuration
    pub gateway: GatewayConfig,

    /// Media pipeline configuration
    pub media: MediaConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on (from `INBOX_PORT` env or the config file)
    pub port: u16,
}

/// W-API gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the gateway deployment
    pub base_url: String,

    /// Per-request timeout
    pub timeout: Duration,
}

/// Media pipeline configuration
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Download attempts per resolution pass
    pub max_attempts: u32,

    /// Base delay for exponential backoff between attempts
    pub retry_base_delay: Duration,

    /// Retry cap for the reprocessing sweep
    pub sweep_max_retries: i64,

    /// Rows examined per sweep run
    pub sweep_batch_size: usize,
}

/// On-disk configuration file shape; every field optional so a partial
/// file only overrides what it names
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerFile,
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    gateway: GatewayFile,
    #[serde(default)]
    media: MediaFile,
}

#[derive(Debug, Default, Deserialize)]
struct ServerFile {
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayFile {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaFile {
    max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    sweep_max_retries: Option<i64>,
    sweep_batch_size: Option<usize>,
}

/// Default data directory (`~/.local/share/wapi-inbox` on Linux)
fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "wapi", "wapi-inbox")
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().to_path_buf())
}

impl Config {
    /// Load configuration from an optional TOML file plus environment
    ///
    /// Precedence: environment variable, then config file, then default.
    ///
    /// # Errors
    ///
    /// Returns error if the config file exists but cannot be read or
    /// parsed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str::<ConfigFile>(&raw)?
            }
            None => ConfigFile::default(),
        };

        let server = ServerConfig {
            port: std::env::var("INBOX_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(file.server.port)
                .unwrap_or(18650),
        };

        let data_dir = std::env::var("INBOX_DATA_DIR")
            .ok()
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(default_data_dir);
        std::fs::create_dir_all(&data_dir).ok();

        let gateway = GatewayConfig {
            base_url: std::env::var("WAPI_BASE_URL")
                .ok()
                .or(file.gateway.base_url)
                .unwrap_or_else(|| "https://api.w-api.app/v1".to_string()),
            timeout: Duration::from_secs(file.gateway.timeout_secs.unwrap_or(45)),
        };

        let media = MediaConfig {
            max_attempts: file.media.max_attempts.unwrap_or(3),
            retry_base_delay: Duration::from_millis(file.media.retry_base_delay_ms.unwrap_or(500)),
            sweep_max_retries: file.media.sweep_max_retries.unwrap_or(5),
            sweep_batch_size: file.media.sweep_batch_size.unwrap_or(100),
        };

        Ok(Self {
            server,
            data_dir,
            gateway,
            media,
        })
    }

    /// Database file path under the data directory
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("inbox.db")
    }
}
