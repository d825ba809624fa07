//! Per-visitor chat sessions.
//!
//! A session is created when the page is first opened, holds the chat history
//! and the most recent upload, and is destroyed explicitly or after idling.
//! History and upload are locked separately, so file operations never wait
//! behind a generation.

use crate::core::error::AppError;
use crate::core::table::Table;
use chrono::{DateTime, Utc};
use di::{inject, injectable};
use log::info;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedTable {
    pub file_name: String,
    pub table: Table,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
    history: Vec<ChatTurn>,
}

impl Session {
    fn new(id: Uuid) -> Session {
        let now = Utc::now();
        Session {
            id,
            created_at: now,
            last_active: now,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            created_at: self.created_at,
        }
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Appends a user turn and the assistant turn answering it.
    ///
    /// Both are appended together so the history always alternates.
    pub fn append_exchange(&mut self, prompt: String, reply: String) -> &ChatTurn {
        let now = Utc::now();
        self.history.push(ChatTurn {
            role: Role::User,
            text: prompt,
            created_at: now,
        });
        self.history.push(ChatTurn {
            role: Role::Assistant,
            text: reply,
            created_at: Utc::now(),
        });
        self.last_active = Utc::now();

        &self.history[self.history.len() - 1]
    }

    fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

/// The latest table uploaded in a session.
#[derive(Debug)]
pub struct UploadSlot {
    table: Option<UploadedTable>,
    last_active: DateTime<Utc>,
}

impl UploadSlot {
    fn new() -> UploadSlot {
        UploadSlot {
            table: None,
            last_active: Utc::now(),
        }
    }

    pub fn get(&self) -> Option<&UploadedTable> {
        self.table.as_ref()
    }

    pub fn replace(&mut self, upload: UploadedTable) -> &UploadedTable {
        self.table.insert(upload)
    }
}

fn idle_since(last_active: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - last_active).to_std().unwrap_or_default()
}

#[derive(Clone)]
struct SessionEntry {
    chat: Arc<Mutex<Session>>,
    upload: Arc<Mutex<UploadSlot>>,
}

/// In-memory registry of live sessions.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

#[injectable]
impl SessionStore {
    #[inject]
    pub fn create_store() -> SessionStore {
        SessionStore::default()
    }
}

impl SessionStore {
    pub async fn create(&self) -> SessionInfo {
        let session = Session::new(Uuid::new_v4());
        let info = session.info();

        let entry = SessionEntry {
            chat: Arc::new(Mutex::new(session)),
            upload: Arc::new(Mutex::new(UploadSlot::new())),
        };
        self.sessions.write().await.insert(info.id, entry);
        info!("session {} created", info.id);

        info
    }

    async fn entry(&self, session_id: Uuid) -> Result<SessionEntry, AppError> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(AppError::UnknownSession(session_id))
    }

    /// Locks the chat of a session. Waits while another request holds it.
    pub async fn lock(&self, session_id: Uuid) -> Result<OwnedMutexGuard<Session>, AppError> {
        let mut guard = self.entry(session_id).await?.chat.lock_owned().await;
        guard.touch();
        Ok(guard)
    }

    /// Locks the upload slot of a session. Independent of [`SessionStore::lock`].
    pub async fn lock_upload(
        &self,
        session_id: Uuid,
    ) -> Result<OwnedMutexGuard<UploadSlot>, AppError> {
        let mut guard = self.entry(session_id).await?.upload.lock_owned().await;
        guard.last_active = Utc::now();
        Ok(guard)
    }

    pub async fn destroy(&self, session_id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&session_id).is_some();
        if removed {
            info!("session {session_id} destroyed");
        }
        removed
    }

    /// Destroys sessions idle for longer than `max_idle`. Sessions in use are kept.
    pub async fn expire_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|id, entry| {
            match (entry.chat.try_lock(), entry.upload.try_lock()) {
                (Ok(chat), Ok(upload))
                    if idle_since(chat.last_active, now) > max_idle
                        && idle_since(upload.last_active, now) > max_idle =>
                {
                    info!("session {id} expired");
                    false
                }
                _ => true,
            }
        });

        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
