// TelegramClient against a mock Bot API server

use prbridge_core::{ChatTransport, InlineButton, InlineKeyboard, TransportError};
use prbridge_telegram::{TelegramClient, TelegramConfig};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "123456:TEST";

fn client(server: &MockServer) -> TelegramClient {
    let mut config = TelegramConfig::new(TOKEN);
    config.api_url = server.uri();
    TelegramClient::new(config).unwrap()
}

fn method_path(name: &str) -> String {
    format!("/bot{TOKEN}/{name}")
}

#[tokio::test]
async fn test_get_me() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(method_path("getMe")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {"id": 99, "is_bot": true, "first_name": "PR bot", "username": "pr_bot"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let me = client(&server).get_me().await.unwrap();
    assert_eq!(me.id, 99);
    assert_eq!(me.username.as_deref(), Some("pr_bot"));
}

#[tokio::test]
async fn test_api_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(method_path("getMe")))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "ok": false,
            "error_code": 401,
            "description": "Unauthorized"
        })))
        .mount(&server)
        .await;

    let err = client(&server).get_me().await.unwrap_err();
    match err {
        TransportError::Api { code, description } => {
            assert_eq!(code, Some(401));
            assert_eq!(description, "Unauthorized");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_send_message_uses_html_and_keyboard() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(method_path("sendMessage")))
        .and(body_partial_json(json!({
            "chat_id": 42,
            "text": "<b>hi</b>",
            "parse_mode": "HTML",
            "reply_markup": {
                "inline_keyboard": [[{"text": "Open PR", "url": "https://bb/pr/7"}]]
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {"message_id": 5, "chat": {"id": 42, "type": "private"}, "date": 0}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let keyboard = InlineKeyboard::single_row(vec![InlineButton::url("Open PR", "https://bb/pr/7")]);
    client(&server)
        .send_message(42, "<b>hi</b>", Some(&keyboard))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_send_message_to_blocked_chat_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(method_path("sendMessage")))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "ok": false,
            "error_code": 403,
            "description": "Forbidden: bot was blocked by the user"
        })))
        .mount(&server)
        .await;

    let result = client(&server).send_message(42, "hi", None).await;
    assert!(matches!(result, Err(TransportError::Api { code: Some(403), .. })));
}

#[tokio::test]
async fn test_get_updates_passes_offset() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(method_path("getUpdates")))
        .and(body_partial_json(json!({"offset": 11, "timeout": 30})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": [
                {
                    "update_id": 11,
                    "message": {
                        "message_id": 1,
                        "from": {"id": 1001, "is_bot": false, "first_name": "U"},
                        "chat": {"id": 1001, "type": "private"},
                        "date": 0,
                        "text": "/repos"
                    }
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let updates = client(&server).get_updates(Some(11)).await.unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].update_id, 11);
    assert_eq!(
        updates[0].message.as_ref().unwrap().text.as_deref(),
        Some("/repos")
    );
}

#[tokio::test]
async fn test_non_json_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(method_path("getMe")))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    assert!(matches!(
        client(&server).get_me().await,
        Err(TransportError::Decode(_))
    ));
}
