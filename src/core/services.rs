//! Implementations for the service the app needs.
//!

use crate::config::Settings;
use crate::core::error::AppError;
use crate::core::i18n::{Catalog, MessageId};
use crate::core::postprocess::{Reply, TrimMode, resolve_reply};
use crate::core::prompt::{DEFAULT_MAX_TOKENS, DEFAULT_SYSTEM_PROMPT, GenerationInput, PromptOptions};
use crate::core::session::{
    ChatTurn, Role, Session, SessionInfo, SessionStore, UploadedTable,
};
use crate::core::table::{REPORT_FILE_NAME, REPORT_MIME, Table};
use crate::core::traits::{
    ChatService, FileService, FragmentStream, InferenceClient, PromptDefaults, Report,
};
use async_trait::async_trait;
use chrono::Utc;
use di::{Ref, injectable};
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::fmt;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// A generation in progress for one session.
///
/// Holds the session exclusively until it is finished or dropped, so turns of
/// concurrent requests cannot interleave. Dropping it without calling
/// [`PendingReply::finish`] leaves the history untouched.
pub struct PendingReply {
    session: OwnedMutexGuard<Session>,
    prompt: String,
    fragments: FragmentStream,
    received: Vec<String>,
    trim_mode: TrimMode,
    fallback: String,
}

impl PendingReply {
    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    /// The user turn as it will be stored.
    pub fn user_turn(&self) -> ChatTurn {
        ChatTurn {
            role: Role::User,
            text: self.prompt.clone(),
            created_at: Utc::now(),
        }
    }

    /// Next fragment from the provider, or `None` once the generation is complete.
    pub async fn next_fragment(&mut self) -> Option<Result<String, AppError>> {
        let next = self.fragments.next().await;
        if let Some(Ok(fragment)) = &next {
            self.received.push(fragment.clone());
        }
        next
    }

    /// Post-processes everything received and appends the exchange to the history.
    pub fn finish(mut self) -> ChatTurn {
        let reply = resolve_reply(&self.received, self.trim_mode, &self.fallback);
        if let Reply::Empty(_) = reply {
            info!("session {}: provider returned no output", self.session.id());
        }

        self.session
            .append_exchange(self.prompt, reply.into_text())
            .clone()
    }

    /// Drains the whole generation, then finishes it.
    pub async fn collect(mut self) -> Result<ChatTurn, AppError> {
        while let Some(fragment) = self.next_fragment().await {
            fragment?;
        }
        Ok(self.finish())
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("session", &self.session.id())
            .field("prompt", &self.prompt)
            .field("received", &self.received.len())
            .field("trim_mode", &self.trim_mode)
            .finish()
    }
}

#[injectable(ChatService)]
pub struct MyChatService {
    sessions: Ref<SessionStore>,
    client: Ref<dyn InferenceClient>,
    catalog: Ref<Catalog>,
    settings: Ref<Settings>,
}

#[async_trait]
impl ChatService for MyChatService {
    async fn create_session(&self) -> SessionInfo {
        self.sessions.create().await
    }

    async fn end_session(&self, session_id: Uuid) -> Result<(), AppError> {
        if self.sessions.destroy(session_id).await {
            Ok(())
        } else {
            Err(AppError::UnknownSession(session_id))
        }
    }

    async fn history(&self, session_id: Uuid) -> Result<Vec<ChatTurn>, AppError> {
        let session = self.sessions.lock(session_id).await?;
        Ok(session.history().to_vec())
    }

    async fn submit_prompt(
        &self,
        session_id: Uuid,
        prompt: String,
        options: PromptOptions,
    ) -> Result<PendingReply, AppError> {
        if prompt.trim().is_empty() {
            return Err(AppError::EmptyPrompt);
        }

        let input = GenerationInput::new(prompt.clone(), &options)?;
        let session = self.sessions.lock(session_id).await?;

        debug!(
            "session {session_id}: dispatching prompt ({} chars, max_tokens {})",
            prompt.len(),
            input.max_tokens
        );
        let fragments = self.client.generate(input).await.inspect_err(|e| {
            warn!("session {session_id}: generation failed to start: {e}");
        })?;

        Ok(PendingReply {
            session,
            prompt,
            fragments,
            received: Vec::new(),
            trim_mode: self.settings.trim_mode,
            fallback: self.catalog.get(MessageId::NoOutput).to_owned(),
        })
    }

    fn defaults(&self) -> PromptDefaults {
        PromptDefaults {
            model: self.settings.model.clone(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
        }
    }
}

#[injectable(FileService)]
pub struct MyFileService {
    sessions: Ref<SessionStore>,
}

#[async_trait]
impl FileService for MyFileService {
    async fn upload(
        &self,
        session_id: Uuid,
        file_name: String,
        bytes: Vec<u8>,
    ) -> Result<UploadedTable, AppError> {
        let mut slot = self.sessions.lock_upload(session_id).await?;

        let table = Table::from_upload(&file_name, &bytes).inspect_err(|e| {
            warn!("session {session_id}: rejected upload {file_name:?}: {e}");
        })?;
        info!(
            "session {session_id}: loaded {file_name:?} ({} columns, {} rows)",
            table.headers.len(),
            table.rows.len()
        );

        let upload = slot.replace(UploadedTable {
            file_name,
            table,
            uploaded_at: Utc::now(),
        });
        Ok(upload.clone())
    }

    async fn generate_report(&self, session_id: Uuid) -> Result<Report, AppError> {
        let slot = self.sessions.lock_upload(session_id).await?;
        let upload = slot.get().ok_or(AppError::NoUpload)?;

        // No transformation is applied before export.
        let processed = &upload.table;

        Ok(Report {
            file_name: REPORT_FILE_NAME,
            mime: REPORT_MIME,
            bytes: processed.to_csv()?,
        })
    }
}
