//! End-to-end ingestion tests: webhook in, rows and files out

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;

use wapi_inbox::media::MediaType;
use wapi_inbox::DownloadStatus;

mod common;
use common::{FixedFetcher, JPEG, image_payload, post_json, setup_app, text_payload, wait_for_media};

#[tokio::test]
async fn test_text_message_ingested() {
    let app = setup_app(Arc::new(FixedFetcher(JPEG.to_vec())));

    let payload = text_payload("TXT1", "5511988887777@s.whatsapp.net", "oi");
    let (status, body) = post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(app.messages.exists("TXT1").unwrap());
}

#[tokio::test]
async fn test_duplicate_delivery_acked_once() {
    let app = setup_app(Arc::new(FixedFetcher(JPEG.to_vec())));
    let payload = text_payload("DUP1", "5511988887777@s.whatsapp.net", "oi");

    let (_, first) = post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;
    let (status, second) = post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;

    assert_eq!(first["status"], "ok");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "duplicate");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_first_messages_create_one_chat() {
    let app = setup_app(Arc::new(FixedFetcher(JPEG.to_vec())));

    // Two workers deliver the first two messages of a brand-new chat at
    // once; neither may lose its message to the chat-creation race
    let first = text_payload("RACE1", "5511977776666@s.whatsapp.net", "oi");
    let second = text_payload("RACE2", "5511977776666@s.whatsapp.net", "tudo bem?");

    let ((_, body_a), (_, body_b)) = tokio::join!(
        post_json(&app.router, "/webhooks/wapi/inst-1", &first),
        post_json(&app.router, "/webhooks/wapi/inst-1", &second),
    );

    assert_eq!(body_a["status"], "ok");
    assert_eq!(body_b["status"], "ok");
    assert!(app.messages.exists("RACE1").unwrap());
    assert!(app.messages.exists("RACE2").unwrap());

    let conn = app.pool.get().unwrap();
    let chats: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM chats WHERE chat_id = '5511977776666'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(chats, 1);
}

#[tokio::test]
async fn test_unknown_instance_still_acked() {
    let app = setup_app(Arc::new(FixedFetcher(JPEG.to_vec())));
    let payload = text_payload("GHOST1", "5511988887777@s.whatsapp.net", "oi");

    let (status, body) = post_json(&app.router, "/webhooks/wapi/ghost", &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert!(!app.messages.exists("GHOST1").unwrap());
}

#[tokio::test]
async fn test_protocol_message_filtered() {
    let app = setup_app(Arc::new(FixedFetcher(JPEG.to_vec())));
    let payload = json!({
        "messageId": "PROT1",
        "moment": 1_700_000_000,
        "sender": {"id": "5511988887777@s.whatsapp.net"},
        "chat": {"id": "5511988887777@s.whatsapp.net"},
        "msgContent": {"protocolMessage": {"type": "APP_STATE_SYNC_KEY_SHARE"}}
    });

    let (_, body) = post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;
    assert_eq!(body["status"], "ignored");
    assert!(!app.messages.exists("PROT1").unwrap());
}

#[tokio::test]
async fn test_image_downloaded_into_chat_folder() {
    let app = setup_app(Arc::new(FixedFetcher(JPEG.to_vec())));

    let payload = image_payload("IMG1", "5511988887777@s.whatsapp.net");
    let (_, body) = post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;
    assert_eq!(body["status"], "ok");

    let reference = wait_for_media(&app.media, "IMG1", MediaType::Image).await;
    assert_eq!(reference.download_status, DownloadStatus::Success);

    let path = reference.file_path.expect("file path");
    assert!(path.contains(&format!(
        "client_{}/instance_inst-1/chats/5511988887777/imagens",
        app.client_id
    )));
    assert_eq!(std::fs::read(&path).unwrap(), JPEG);
}

#[tokio::test]
async fn test_group_message_lands_in_group_folder() {
    let app = setup_app(Arc::new(FixedFetcher(JPEG.to_vec())));

    let payload = image_payload("GRP1", "120363123456789012@g.us");
    let (_, body) = post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;
    assert_eq!(body["status"], "ok");

    let reference = wait_for_media(&app.media, "GRP1", MediaType::Image).await;
    assert_eq!(reference.chat_id, "group_123456789012");
    assert!(
        reference
            .file_path
            .expect("file path")
            .contains("chats/group_123456789012/imagens")
    );
}

#[tokio::test]
async fn test_nested_from_me_wins_over_heuristic() {
    let app = setup_app(Arc::new(FixedFetcher(JPEG.to_vec())));

    // No root fromMe; the nested key carries the truth
    let payload = json!({
        "key": {"id": "FROMME1", "fromMe": true},
        "moment": 1_700_000_000,
        "sender": {"id": "inst-1-account@s.whatsapp.net", "pushName": "Me"},
        "chat": {"id": "5511988887777@s.whatsapp.net", "name": "Maria"},
        "msgContent": {"conversation": "sent from the phone"}
    });
    let (_, body) = post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;
    assert_eq!(body["status"], "ok");

    let message = app.messages.get_by_upstream_id("FROMME1").unwrap().unwrap();
    assert!(message.from_me);
}

#[tokio::test]
async fn test_missing_decryption_fields_never_downloaded() {
    let app = setup_app(Arc::new(FixedFetcher(JPEG.to_vec())));

    let mut payload = image_payload("NOKEY1", "5511988887777@s.whatsapp.net");
    payload["msgContent"]["imageMessage"]["mediaKey"] = json!("");
    let (_, body) = post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;

    // Message still lands; the media reference is terminal immediately
    assert_eq!(body["status"], "ok");
    let reference = app.media.find("NOKEY1", MediaType::Image).unwrap().unwrap();
    assert_eq!(reference.download_status, DownloadStatus::InvalidData);
    assert!(reference.file_path.is_none());
}

#[tokio::test]
async fn test_mislabeled_bytes_rejected() {
    // Gateway answers PDF bytes for an image/jpeg reference
    let app = setup_app(Arc::new(FixedFetcher(b"%PDF-1.7 not an image".to_vec())));

    let payload = image_payload("BAD1", "5511988887777@s.whatsapp.net");
    post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;

    let reference = wait_for_media(&app.media, "BAD1", MediaType::Image).await;
    assert_eq!(reference.download_status, DownloadStatus::Failed);
    assert!(reference.file_path.is_none());
    assert_eq!(reference.retry_count, 1);
}

#[tokio::test]
async fn test_redelivery_after_success_skips_download() {
    let app = setup_app(Arc::new(FixedFetcher(JPEG.to_vec())));
    let payload = image_payload("RED1", "5511988887777@s.whatsapp.net");

    post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;
    let first = wait_for_media(&app.media, "RED1", MediaType::Image).await;

    let (_, body) = post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;
    assert_eq!(body["status"], "duplicate");

    let second = app.media.find("RED1", MediaType::Image).unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.file_path, first.file_path);
}

#[tokio::test]
async fn test_two_attachment_kinds_one_message() {
    let app = setup_app(Arc::new(FixedFetcher(JPEG.to_vec())));

    // A caption-bearing image plus a document in the same content block
    let mut payload = image_payload("MULTI1", "5511988887777@s.whatsapp.net");
    payload["msgContent"]["documentMessage"] = json!({
        "mimetype": "application/octet-stream",
        "fileName": "notes.bin",
        "mediaKey": "fedcba9876543210fedcba9876543210",
        "directPath": "/v/t62.7119-24/doc",
        "fileSha256": "sha2",
        "fileEncSha256": "encsha2"
    });

    let (_, body) = post_json(&app.router, "/webhooks/wapi/inst-1", &payload).await;
    assert_eq!(body["status"], "ok");

    let image = wait_for_media(&app.media, "MULTI1", MediaType::Image).await;
    let document = wait_for_media(&app.media, "MULTI1", MediaType::Document).await;
    assert_eq!(image.download_status, DownloadStatus::Success);
    // Unknown mimetype passes the signature check, so the stub bytes land
    assert_eq!(document.download_status, DownloadStatus::Success);
    assert_ne!(image.file_path, document.file_path);
}
