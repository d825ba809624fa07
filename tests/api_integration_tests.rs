//! API Integration Tests
//!
//! Exercises the HTTP API end to end with the inference provider replaced by
//! an in-process fake. The fake picks its behaviour from the prompt text:
//!
//! - `silence` produces no fragments
//! - `refuse` fails before streaming
//! - `break` fails after one fragment
//! - anything else is echoed back, followed by the sentinel marker

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode, header},
};
use codellama_chat::{
    api,
    config::Settings,
    core::error::AppError,
    core::i18n::Catalog,
    core::prompt::GenerationInput,
    core::services::{MyChatService, MyFileService},
    core::session::SessionStore,
    core::traits::{FragmentStream, InferenceClient},
};
use di::{Injectable, ServiceCollection, inject, injectable};
use di_axum::RouterServiceProviderExtensions;
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

pub struct EchoClient;

#[injectable(InferenceClient)]
impl EchoClient {
    #[inject]
    pub fn create() -> EchoClient {
        EchoClient
    }
}

#[async_trait]
impl InferenceClient for EchoClient {
    async fn generate(&self, input: GenerationInput) -> Result<FragmentStream, AppError> {
        let items: Vec<Result<String, AppError>> = match input.prompt.as_str() {
            "silence" => vec![],
            "refuse" => return Err(AppError::Upstream("provider unavailable".to_owned())),
            "break" => vec![
                Ok("par".to_owned()),
                Err(AppError::Upstream("connection reset".to_owned())),
            ],
            prompt => vec![
                Ok("Echo: ".to_owned()),
                Ok(prompt.to_owned()),
                Ok(format!(" ({} tokens)", input.max_tokens)),
                Ok(" Source: assistant".to_owned()),
            ],
        };
        Ok(stream::iter(items).boxed())
    }
}

/// Create test app with the fake provider. Clones share the same sessions.
fn create_test_app() -> axum::Router {
    let provider = ServiceCollection::new()
        .add(Settings::singleton())
        .add(Catalog::singleton())
        .add(SessionStore::singleton())
        .add(EchoClient::singleton())
        .add(MyChatService::scoped())
        .add(MyFileService::scoped())
        .build_provider()
        .unwrap();

    api::app(1024 * 1024).with_provider(provider)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

async fn create_session(app: &axum::Router) -> Uuid {
    let (status, _, body) = send(
        app,
        Request::builder()
            .method("POST")
            .uri("/sessions")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let json: Value = serde_json::from_slice(&body).unwrap();
    json["id"].as_str().unwrap().parse().unwrap()
}

fn post_prompt(session: Uuid, body: Value, accept: Option<&str>) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/chat/messages")
        .header("X-Session-ID", session.to_string())
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(accept) = accept {
        request = request.header(header::ACCEPT, accept);
    }
    request.body(Body::from(body.to_string())).unwrap()
}

async fn history(app: &axum::Router, session: Uuid) -> Vec<Value> {
    let (status, _, body) = send(
        app,
        Request::builder()
            .uri("/chat/messages")
            .header("X-Session-ID", session.to_string())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    json["messages"].as_array().unwrap().clone()
}

/// Splits an SSE body into (event, data) pairs.
fn sse_events(body: &[u8]) -> Vec<(String, Value)> {
    let text = std::str::from_utf8(body).unwrap();
    text.split("\n\n")
        .filter_map(|block| {
            let mut event = String::from("message");
            let mut data = None;
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = name.trim().to_owned();
                } else if let Some(value) = line.strip_prefix("data:") {
                    data = Some(serde_json::from_str(value.trim()).unwrap());
                }
            }
            data.map(|data| (event, data))
        })
        .collect()
}

fn multipart_upload(session: Uuid, file_name: &str, content: &[u8]) -> Request<Body> {
    let boundary = "X-TEST-BOUNDARY";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/files")
        .header("X-Session-ID", session.to_string())
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_buffered_reply_is_trimmed_and_stored() {
    let app = create_test_app();
    let session = create_session(&app).await;

    let (status, _, body) = send(&app, post_prompt(session, json!({ "prompt": "hi" }), None)).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["role"], "assistant");
    assert_eq!(json["text"], "Echo: hi (2000 tokens)");

    let messages = history(&app, session).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["text"], "hi");
    assert_eq!(messages[1]["text"], "Echo: hi (2000 tokens)");
}

#[tokio::test]
async fn test_history_has_two_turns_per_prompt_in_order() {
    let app = create_test_app();
    let session = create_session(&app).await;

    for n in 0..4 {
        let prompt = format!("question {n}");
        let (status, _, _) =
            send(&app, post_prompt(session, json!({ "prompt": prompt }), None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let messages = history(&app, session).await;
    assert_eq!(messages.len(), 8);
    for (i, message) in messages.iter().enumerate() {
        let expected = if i % 2 == 0 { "user" } else { "assistant" };
        assert_eq!(message["role"], expected);
    }
    assert_eq!(messages[6]["text"], "question 3");
}

#[tokio::test]
async fn test_streamed_reply_events() {
    let app = create_test_app();
    let session = create_session(&app).await;

    let (status, headers, body) = send(
        &app,
        post_prompt(
            session,
            json!({ "prompt": "hi", "max_tokens": 16 }),
            Some("text/event-stream"),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(
        headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let events = sse_events(&body);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        [
            "new_message",
            "message_part",
            "message_part",
            "message_part",
            "message_part",
            "message"
        ]
    );
    assert_eq!(events[0].1["text"], "hi");
    assert_eq!(events[1].1["message_part"], "Echo: ");
    assert_eq!(events[1].1["session_id"], session.to_string());
    assert_eq!(events[5].1["text"], "Echo: hi (16 tokens)");

    assert_eq!(history(&app, session).await.len(), 2);
}

#[tokio::test]
async fn test_empty_output_stores_fallback_message() {
    let app = create_test_app();
    let session = create_session(&app).await;

    let (status, _, body) =
        send(&app, post_prompt(session, json!({ "prompt": "silence" }), None)).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["text"], "No output received.");

    let messages = history(&app, session).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["text"], "No output received.");
}

#[tokio::test]
async fn test_upstream_failure_is_reported_and_not_stored() {
    let app = create_test_app();
    let session = create_session(&app).await;

    let (status, _, body) =
        send(&app, post_prompt(session, json!({ "prompt": "refuse" }), None)).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["kind"], "upstream");
    assert!(history(&app, session).await.is_empty());

    // the session is still usable afterwards
    let (status, _, _) = send(&app, post_prompt(session, json!({ "prompt": "hi" }), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history(&app, session).await.len(), 2);
}

#[tokio::test]
async fn test_stream_failure_emits_error_event() {
    let app = create_test_app();
    let session = create_session(&app).await;

    let (status, _, body) = send(
        &app,
        post_prompt(session, json!({ "prompt": "break" }), Some("text/event-stream")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let events = sse_events(&body);
    let (last_name, last_data) = events.last().unwrap();
    assert_eq!(last_name, "error");
    assert_eq!(last_data["kind"], "upstream");
    assert!(history(&app, session).await.is_empty());
}

// Zero and negative budgets used to be forwarded to the provider unchecked.
#[tokio::test]
async fn test_non_positive_max_tokens_is_configuration_error() {
    let app = create_test_app();
    let session = create_session(&app).await;

    for max_tokens in [0, -5] {
        let (status, _, body) = send(
            &app,
            post_prompt(session, json!({ "prompt": "hi", "max_tokens": max_tokens }), None),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["kind"], "configuration");
    }
    assert!(history(&app, session).await.is_empty());
}

#[tokio::test]
async fn test_non_integer_max_tokens_is_configuration_error() {
    let app = create_test_app();
    let session = create_session(&app).await;

    for max_tokens in [json!(1.5), json!(1e20), json!("2000")] {
        let (status, _, body) = send(
            &app,
            post_prompt(session, json!({ "prompt": "hi", "max_tokens": max_tokens.clone() }), None),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{max_tokens}");
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["kind"], "configuration");
    }
    assert!(history(&app, session).await.is_empty());
}

#[tokio::test]
async fn test_empty_prompt_is_rejected() {
    let app = create_test_app();
    let session = create_session(&app).await;

    let (status, _, _) = send(&app, post_prompt(session, json!({ "prompt": "" }), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_requests_without_session_header_fail() {
    let app = create_test_app();

    for uri in ["/chat/messages", "/files/report"] {
        let (status, _, body) = send(
            &app,
            Request::builder().uri(uri).body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(String::from_utf8_lossy(&body).contains("missing"));
    }
}

#[tokio::test]
async fn test_malformed_session_id_is_rejected() {
    let app = create_test_app();

    let (status, _, body) = send(
        &app,
        Request::builder()
            .uri("/chat/messages")
            .header("X-Session-ID", "not-a-uuid")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8_lossy(&body).contains("invalid"));
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = create_test_app();

    let (status, _, body) = send(
        &app,
        post_prompt(Uuid::new_v4(), json!({ "prompt": "hi" }), None),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["kind"], "unknown_session");
}

#[tokio::test]
async fn test_sessions_are_isolated_and_can_be_ended() {
    let app = create_test_app();
    let first = create_session(&app).await;
    let second = create_session(&app).await;

    send(&app, post_prompt(first, json!({ "prompt": "hi" }), None)).await;
    assert_eq!(history(&app, first).await.len(), 2);
    assert!(history(&app, second).await.is_empty());

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri(format!("/sessions/{first}"))
            .body(Body::empty())
            .unwrap()
    };
    let (status, _, _) = send(&app, delete()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, delete()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_then_download_round_trip() {
    let app = create_test_app();
    let session = create_session(&app).await;
    let csv = b"name,score\nada,10\n\"lovelace, a\",7\n";

    let (status, _, body) = send(&app, multipart_upload(session, "scores.csv", csv)).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["file_name"], "scores.csv");
    assert_eq!(json["headers"], json!(["name", "score"]));
    assert_eq!(json["rows"], json!([["ada", "10"], ["lovelace, a", "7"]]));

    let (status, headers, body) = send(
        &app,
        Request::builder()
            .uri("/files/report")
            .header("X-Session-ID", session.to_string())
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/csv");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"processed_data.csv\""
    );
    assert_eq!(&body[..], &csv[..]);

    // uploads never touch the chat history
    assert!(history(&app, session).await.is_empty());
}

#[tokio::test]
async fn test_spreadsheet_upload_is_unsupported() {
    let app = create_test_app();
    let session = create_session(&app).await;

    let (status, _, body) = send(
        &app,
        multipart_upload(session, "book.xlsx", b"PK\x03\x04\x14\x00"),
    )
    .await;

    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["kind"], "input_format");
}

#[tokio::test]
async fn test_report_without_upload_is_not_found() {
    let app = create_test_app();
    let session = create_session(&app).await;

    let (status, _, body) = send(
        &app,
        Request::builder()
            .uri("/files/report")
            .header("X-Session-ID", session.to_string())
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["kind"], "no_upload");
}

#[tokio::test]
async fn test_defaults_and_strings() {
    let app = create_test_app();

    let (status, _, body) = send(
        &app,
        Request::builder()
            .uri("/chat/settings")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["max_tokens"], 2000);
    assert!(
        json["system_prompt"]
            .as_str()
            .unwrap()
            .starts_with("You are a Python programming expert.")
    );

    let (status, _, body) = send(
        &app,
        Request::builder().uri("/i18n").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["no_output"], "No output received.");
    assert_eq!(json["you"], "You");
}

#[tokio::test]
async fn test_index_page_renders() {
    let app = create_test_app();

    let (status, _, body) = send(
        &app,
        Request::builder().uri("/").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("Code Llama 70B Instruct"));
}
