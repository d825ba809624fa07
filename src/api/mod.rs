use crate::core::error::AppError;
use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, FromRequestParts};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use std::str::FromStr;
use uuid::Uuid;

pub mod chat;
pub mod files;
pub mod pages;
pub mod sessions;

const X_SESSION_ID: &str = "X-Session-ID";

/// All API routes, without middleware or a service provider attached.
pub fn app(max_upload_bytes: usize) -> Router {
    Router::new()
        .merge(pages::router())
        .nest("/sessions", sessions::router())
        .nest("/chat", chat::router())
        .nest(
            "/files",
            files::router().layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
}

#[derive(Debug)]
pub struct ExtractSession(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractSession
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, (StatusCode, &'static str)> {
        if let Some(session_id) = parts.headers.get(X_SESSION_ID) {
            let session_id = session_id
                .to_str()
                .map_err(|_| (StatusCode::BAD_REQUEST, "invalid session id"))?;
            let session_id = Uuid::from_str(session_id)
                .map_err(|_| (StatusCode::BAD_REQUEST, "invalid session id"))?;
            Ok(ExtractSession(session_id))
        } else {
            Err((StatusCode::BAD_REQUEST, "`X-Session-ID` header is missing"))
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl From<&AppError> for ErrorBody {
    fn from(error: &AppError) -> Self {
        ErrorBody {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::InputFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::UnknownSession(_) | AppError::NoUpload => StatusCode::NOT_FOUND,
            AppError::EmptyPrompt => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ErrorBody::from(&self))).into_response()
    }
}
