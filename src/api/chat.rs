//! Chat endpoints

use crate::api::chat::schemas::{CreateMessage, MessagePart, MessagesList};
use crate::api::{ErrorBody, ExtractSession};
use crate::core::error::AppError;
use crate::core::services::PendingReply;
use crate::core::traits::{ChatService, PromptDefaults};
use async_stream::stream;
use axum::http::HeaderMap;
use axum::http::header::ACCEPT;
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;
use futures_util::Stream;
use log::error;
use serde::Serialize;
use std::convert::Infallible;

pub fn router() -> Router {
    Router::new()
        .route("/settings", get(prompt_defaults))
        .route("/messages", get(list_messages).post(post_message))
}

async fn prompt_defaults(Inject(chat_service): Inject<dyn ChatService>) -> Json<PromptDefaults> {
    Json(chat_service.defaults())
}

async fn list_messages(
    Inject(chat_service): Inject<dyn ChatService>,
    ExtractSession(session_id): ExtractSession,
) -> Result<Json<MessagesList>, AppError> {
    let history = chat_service.history(session_id).await?;

    Ok(Json(MessagesList {
        messages: history.into_iter().map(schemas::Message::from).collect(),
    }))
}

/// Sends a prompt. Streams the reply as SSE when the client accepts
/// `text/event-stream`, otherwise answers once the whole reply is in.
async fn post_message(
    Inject(chat_service): Inject<dyn ChatService>,
    ExtractSession(session_id): ExtractSession,
    headers: HeaderMap,
    Json(message): Json<CreateMessage>,
) -> Response {
    let (prompt, options) = match message.into_parts() {
        Ok(parts) => parts,
        Err(e) => return e.into_response(),
    };

    let pending = match chat_service.submit_prompt(session_id, prompt, options).await {
        Ok(pending) => pending,
        Err(e) => return e.into_response(),
    };

    if accepts_event_stream(&headers) {
        stream_reply(pending).into_response()
    } else {
        match pending.collect().await {
            Ok(turn) => Json(schemas::Message::from(turn)).into_response(),
            Err(e) => e.into_response(),
        }
    }
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/event-stream"))
}

/// Emits `new_message` with the user turn, a `message_part` per fragment, then
/// either `message` with the stored assistant turn or `error`.
fn stream_reply(mut pending: PendingReply) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = pending.session_id();

    let stream = stream! {
        yield Ok(json_event("new_message", &schemas::Message::from(pending.user_turn())));

        let mut failure = None;
        while let Some(part) = pending.next_fragment().await {
            match part {
                Ok(message_part) => {
                    yield Ok(json_event("message_part", &MessagePart {
                        session_id,
                        message_part,
                    }));
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        match failure {
            None => {
                let turn = pending.finish();
                yield Ok(json_event("message", &schemas::Message::from(turn)));
            }
            Some(e) => {
                error!("session {session_id}: reply stream failed: {e}");
                yield Ok(json_event("error", &ErrorBody::from(&e)));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn json_event<T: Serialize>(name: &'static str, data: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|e| {
            error!("failed to encode {name} event: {e}");
            Event::default().event("error").data("failed to encode event")
        })
}

pub mod schemas {
    use crate::core::error::AppError;
    use crate::core::prompt::PromptOptions;
    use crate::core::session::{ChatTurn, Role};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use uuid::Uuid;

    /// The token budget is kept as raw JSON so that floats, strings and
    /// oversized numbers surface as a configuration error instead of a
    /// body rejection.
    #[derive(Deserialize, Debug)]
    pub struct CreateMessage {
        pub prompt: String,
        #[serde(default)]
        pub max_tokens: Option<Value>,
        pub system_prompt: Option<String>,
    }

    impl CreateMessage {
        pub fn into_parts(self) -> Result<(String, PromptOptions), AppError> {
            let max_tokens = match self.max_tokens {
                None | Some(Value::Null) => None,
                Some(Value::Number(n)) if n.is_i64() => n.as_i64(),
                Some(Value::Number(n)) if n.is_u64() => {
                    return Err(AppError::Configuration(format!(
                        "max_tokens {n} is out of range"
                    )));
                }
                Some(other) => {
                    return Err(AppError::Configuration(format!(
                        "max_tokens must be a positive integer, got {other}"
                    )));
                }
            };

            Ok((
                self.prompt,
                PromptOptions {
                    max_tokens,
                    system_prompt: self.system_prompt,
                },
            ))
        }
    }

    #[derive(Serialize, Debug, Default)]
    pub struct MessagesList {
        pub messages: Vec<Message>,
    }

    #[derive(Serialize, Debug)]
    pub struct Message {
        pub role: Role,
        pub text: String,
        pub created_at: DateTime<Utc>,
    }

    impl From<ChatTurn> for Message {
        fn from(turn: ChatTurn) -> Self {
            Message {
                role: turn.role,
                text: turn.text,
                created_at: turn.created_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct MessagePart {
        pub session_id: Uuid,
        pub message_part: String,
    }
}
