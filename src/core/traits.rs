//! DI "Interfaces"

use crate::core::error::AppError;
use crate::core::prompt::{GenerationInput, PromptOptions};
use crate::core::services::PendingReply;
use crate::core::session::{ChatTurn, SessionInfo, UploadedTable};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;
use uuid::Uuid;

/// Text pieces of one generation, in order. Finite and consumable once.
pub type FragmentStream = BoxStream<'static, Result<String, AppError>>;

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Starts a generation on the hosted model.
    ///
    /// Returns `Err` before any fragment is produced if the request could not
    /// be started; failures mid-generation are yielded by the stream itself.
    async fn generate(&self, input: GenerationInput) -> Result<FragmentStream, AppError>;
}

/// Values the page uses when the user leaves the customize fields unedited.
#[derive(Debug, Clone, Serialize)]
pub struct PromptDefaults {
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: String,
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn create_session(&self) -> SessionInfo;

    /// Returns `Err` if the session did not exist.
    async fn end_session(&self, session_id: Uuid) -> Result<(), AppError>;

    /// Chat turns of a session, oldest first.
    async fn history(&self, session_id: Uuid) -> Result<Vec<ChatTurn>, AppError>;

    /// Validates the options and starts a generation for `prompt`.
    ///
    /// Nothing is appended to the history until the returned reply is finished.
    async fn submit_prompt(
        &self,
        session_id: Uuid,
        prompt: String,
        options: PromptOptions,
    ) -> Result<PendingReply, AppError>;

    fn defaults(&self) -> PromptDefaults;
}

/// A CSV file ready to be offered for download.
#[derive(Debug, Clone)]
pub struct Report {
    pub file_name: &'static str,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait FileService: Send + Sync {
    /// Parses an upload and keeps it as the session's current table.
    ///
    /// Returns `Err` for unsupported or corrupt files; the previous table is kept then.
    async fn upload(
        &self,
        session_id: Uuid,
        file_name: String,
        bytes: Vec<u8>,
    ) -> Result<UploadedTable, AppError>;

    /// Re-serializes the session's current table as CSV.
    async fn generate_report(&self, session_id: Uuid) -> Result<Report, AppError>;
}
