//! Shared test utilities

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use secrecy::SecretString;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use wapi_inbox::db::{
    self, ChatRepo, ClientRepo, DbPool, InstanceRepo, MediaRepo, MessageRepo, SenderRepo,
};
use wapi_inbox::media::{GatewayReply, MediaFetcher};
use wapi_inbox::{
    DownloadStatus, LocalStorage, MediaResolver, MediaType, Materializer, Pipeline, RetryPolicy,
};

/// Minimal valid JPEG prefix used as the downloaded payload
pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];

/// Fetcher answering every request with a fixed reply
pub struct FixedFetcher(pub Vec<u8>);

#[async_trait]
impl MediaFetcher for FixedFetcher {
    async fn download_media(
        &self,
        _token: &SecretString,
        _media_type: MediaType,
        _mimetype: &str,
        _media_key: &str,
        _direct_path: &str,
    ) -> wapi_inbox::Result<GatewayReply> {
        Ok(GatewayReply::Binary(self.0.clone()))
    }

    async fn fetch_direct(&self, _link: &str) -> wapi_inbox::Result<GatewayReply> {
        Ok(GatewayReply::Binary(self.0.clone()))
    }
}

/// A fully wired application over an in-memory database
pub struct TestApp {
    pub router: Router,
    pub pool: DbPool,
    pub media: MediaRepo,
    pub messages: MessageRepo,
    pub client_id: String,
    pub _dir: TempDir,
}

/// Set up the app with one provisioned client and instance `inst-1`,
/// downloads answered by `fetcher`
#[must_use]
pub fn setup_app(fetcher: Arc<dyn MediaFetcher>) -> TestApp {
    let pool = db::init_memory().expect("failed to init test db");
    let dir = TempDir::new().expect("failed to create temp dir");

    let client = ClientRepo::new(pool.clone())
        .create("Acme")
        .expect("failed to create test client");
    InstanceRepo::new(pool.clone())
        .create("inst-1", &client.id, "test-token")
        .expect("failed to create test instance");

    let media = MediaRepo::new(pool.clone());
    let resolver = Arc::new(MediaResolver::new(
        fetcher,
        Arc::new(LocalStorage::new(dir.path().to_path_buf())),
        media.clone(),
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::ZERO,
        },
    ));

    let pipeline = Arc::new(Pipeline::new(
        InstanceRepo::new(pool.clone()),
        Materializer::new(
            ChatRepo::new(pool.clone()),
            SenderRepo::new(pool.clone()),
            MessageRepo::new(pool.clone()),
        ),
        media.clone(),
        resolver,
    ));

    let state = Arc::new(wapi_inbox::api::ApiState::new(pool.clone(), pipeline));

    TestApp {
        router: wapi_inbox::api::router(state),
        media,
        messages: MessageRepo::new(pool.clone()),
        client_id: client.id,
        pool,
        _dir: dir,
    }
}

/// POST a JSON body and return (status, parsed body)
pub async fn post_json(router: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("failed to build request");

    send(router, request).await
}

/// GET a path and return (status, parsed body)
pub async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("failed to build request");

    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("request failed");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Wait until a media reference leaves `pending`, or panic
///
/// The webhook handler spawns downloads off the request path, so tests
/// poll briefly instead of assuming completion at response time.
pub async fn wait_for_media(
    media: &MediaRepo,
    message_id: &str,
    media_type: MediaType,
) -> wapi_inbox::db::MediaReference {
    for _ in 0..100 {
        if let Some(reference) = media
            .find(message_id, media_type)
            .expect("media lookup failed")
        {
            if reference.download_status != DownloadStatus::Pending {
                return reference;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("media for {message_id} never left pending");
}

/// A text message payload in the common webhook shape
#[must_use]
pub fn text_payload(message_id: &str, chat_id: &str, text: &str) -> Value {
    json!({
        "messageId": message_id,
        "fromMe": false,
        "moment": 1_700_000_000,
        "sender": {"id": "5511988887777@s.whatsapp.net", "pushName": "João"},
        "chat": {"id": chat_id},
        "msgContent": {"conversation": text}
    })
}

/// An image message payload with complete decryption fields
#[must_use]
pub fn image_payload(message_id: &str, chat_id: &str) -> Value {
    json!({
        "messageId": message_id,
        "fromMe": false,
        "moment": 1_700_000_000,
        "sender": {"id": "5511988887777@s.whatsapp.net", "pushName": "João"},
        "chat": {"id": chat_id},
        "msgContent": {
            "imageMessage": {
                "mimetype": "image/jpeg",
                "caption": "look at this",
                "fileLength": JPEG.len(),
                "mediaKey": "0123456789abcdef0123456789abcdef",
                "directPath": "/v/t62.7118-24/abc",
                "fileSha256": "sha",
                "fileEncSha256": "encsha"
            }
        }
    })
}
