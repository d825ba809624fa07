//! Session lifecycle endpoints

use crate::core::error::AppError;
use crate::core::session::SessionInfo;
use crate::core::traits::ChatService;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use di_axum::Inject;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_session))
        .route("/:id", delete(end_session))
}

async fn create_session(
    Inject(chat_service): Inject<dyn ChatService>,
) -> (StatusCode, Json<SessionInfo>) {
    (StatusCode::CREATED, Json(chat_service.create_session().await))
}

async fn end_session(
    Inject(chat_service): Inject<dyn ChatService>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    chat_service.end_session(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
