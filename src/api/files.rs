//! Tabular file upload and CSV report download

use crate::api::ExtractSession;
use crate::api::files::schemas::Upload;
use crate::core::error::AppError;
use crate::core::traits::FileService;
use axum::Json;
use axum::Router;
use axum::extract::Multipart;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use di_axum::Inject;

const FILE_FIELD: &str = "file";

pub fn router() -> Router {
    Router::new()
        .route("/", post(upload_file))
        .route("/report", get(download_report))
}

async fn upload_file(
    Inject(file_service): Inject<dyn FileService>,
    ExtractSession(session_id): ExtractSession,
    mut multipart: Multipart,
) -> Result<Json<Upload>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InputFormat(e.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_owned();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::InputFormat(e.to_string()))?;

        let upload = file_service
            .upload(session_id, file_name, bytes.to_vec())
            .await?;
        return Ok(Json(upload.into()));
    }

    Err(AppError::InputFormat(format!(
        "multipart field `{FILE_FIELD}` is missing"
    )))
}

async fn download_report(
    Inject(file_service): Inject<dyn FileService>,
    ExtractSession(session_id): ExtractSession,
) -> Result<impl IntoResponse, AppError> {
    let report = file_service.generate_report(session_id).await?;

    Ok((
        [
            (CONTENT_TYPE, report.mime.to_owned()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", report.file_name),
            ),
        ],
        report.bytes,
    ))
}

pub mod schemas {
    use crate::core::session::UploadedTable;
    use chrono::{DateTime, Utc};
    use serde::Serialize;

    #[derive(Serialize, Debug)]
    pub struct Upload {
        pub file_name: String,
        pub headers: Vec<String>,
        pub rows: Vec<Vec<String>>,
        pub uploaded_at: DateTime<Utc>,
    }

    impl From<UploadedTable> for Upload {
        fn from(upload: UploadedTable) -> Self {
            Upload {
                file_name: upload.file_name,
                headers: upload.table.headers,
                rows: upload.table.rows,
                uploaded_at: upload.uploaded_at,
            }
        }
    }
}
