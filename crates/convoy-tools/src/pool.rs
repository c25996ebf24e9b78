//! Pool of shell sessions, one per conversation.
//!
//! `get_or_spawn` is single-flight per conversation id: concurrent callers
//! for the same id observe the same session instance, and a session that
//! has died is lazily replaced on the next call rather than eagerly reaped.

use crate::error::ToolResult;
use crate::shell::ShellSession;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Maps conversation id -> persistent shell session.
#[derive(Clone)]
pub struct ShellSessionPool {
    shell: String,
    sessions: Arc<Mutex<HashMap<String, Arc<ShellSession>>>>,
}

impl ShellSessionPool {
    /// `shell` is the executable used for every spawned session (e.g. `/bin/bash`).
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the live session for `conversation_id`, spawning one under
    /// `cwd` if none exists yet or the previous one has died.
    pub async fn get_or_spawn(
        &self,
        conversation_id: &str,
        cwd: &Path,
    ) -> ToolResult<Arc<ShellSession>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(conversation_id) {
            if existing.is_alive() {
                return Ok(existing.clone());
            }
            debug!(conversation_id, "replacing dead shell session");
        }

        let session = Arc::new(ShellSession::spawn(&self.shell, cwd)?);
        session.start().await?;
        info!(conversation_id, pid = session.pid(), "spawned shell session");
        sessions.insert(conversation_id.to_string(), session.clone());
        Ok(session)
    }

    /// Terminate and drop the session for `conversation_id`, if any.
    pub async fn destroy(&self, conversation_id: &str) {
        let session = self.sessions.lock().await.remove(conversation_id);
        if let Some(session) = session {
            let _ = session.stop().await;
        }
    }

    /// Terminate and drop every session. Used at process shutdown.
    pub async fn destroy_all(&self) {
        let mut sessions = self.sessions.lock().await;
        for (_, session) in sessions.drain() {
            let _ = session.stop().await;
        }
    }

    /// Remove (without re-stopping) any session that has already died.
    pub async fn cleanup_dead(&self) {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, s| s.is_alive());
    }
}
