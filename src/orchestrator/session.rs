//! Session checkpoints.
//!
//! A session's state is loaded at the start of a turn, owned by that turn
//! while it runs, and written back only if the turn succeeds. Stores treat
//! the state as an opaque JSON document keyed by session id.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use auslaw_core::models::Jurisdiction;

use crate::model::ChatMessage;
use crate::pipeline::PipelineState;

use super::brief_flow::BriefProgress;

/// Which graph a session's turns run through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Conversational,
    Adaptive,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    #[serde(default)]
    pub mode: SessionMode,
    /// Full message history, oldest first.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub jurisdiction: Option<Jurisdiction>,
    /// Artifacts from the most recent adaptive turn.
    #[serde(default)]
    pub pipeline: Option<PipelineState>,
    #[serde(default)]
    pub brief: BriefProgress,
    #[serde(default)]
    pub turns: u64,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// The last `n` messages.
    pub fn window(&self, n: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>>;
    async fn save(&self, state: &SessionState) -> Result<()>;
}

/// Checkpoints in the `sessions` table.
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>> {
        let row = sqlx::query("SELECT state_json FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let json: String = row.get("state_json");
                let state = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt checkpoint for session {}", session_id))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, state: &SessionState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        sqlx::query(
            r#"
            INSERT INTO sessions (id, state_json, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET state_json = excluded.state_json,
                                          updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.session_id)
        .bind(&json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Process-local checkpoints, for tests and `auslaw ask`.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>> {
        let json = {
            let sessions = self
                .sessions
                .lock()
                .map_err(|_| anyhow::anyhow!("session map poisoned"))?;
            sessions.get(session_id).cloned()
        };
        json.map(|j| serde_json::from_str(&j).map_err(anyhow::Error::from))
            .transpose()
    }

    async fn save(&self, state: &SessionState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        self.sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("session map poisoned"))?
            .insert(state.session_id.clone(), json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_roundtrip_is_a_copy() {
        let store = InMemorySessionStore::new();
        assert!(store.load("s1").await.unwrap().is_none());

        let mut state = SessionState::new("s1");
        state.messages.push(ChatMessage::user("hello"));
        store.save(&state).await.unwrap();

        state.messages.push(ChatMessage::user("not saved"));
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
    }

    #[test]
    fn test_window_takes_most_recent() {
        let mut state = SessionState::new("s");
        for i in 0..25 {
            state.messages.push(ChatMessage::user(format!("m{}", i)));
        }
        let w = state.window(20);
        assert_eq!(w.len(), 20);
        assert_eq!(w[0].content, "m5");
        assert_eq!(state.window(100).len(), 25);
    }

    #[tokio::test]
    async fn test_sqlite_store_upserts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let toml = format!("[db]\npath = {:?}\n", tmp.path().join("s.sqlite"));
        let config = crate::config::parse_config(&toml).unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::migrate_pool(&pool).await.unwrap();

        let store = SqliteSessionStore::new(pool);
        let mut state = SessionState::new("abc");
        state.turns = 1;
        store.save(&state).await.unwrap();
        state.turns = 2;
        state.jurisdiction = Some(Jurisdiction::Qld);
        store.save(&state).await.unwrap();

        let loaded = store.load("abc").await.unwrap().unwrap();
        assert_eq!(loaded.turns, 2);
        assert_eq!(loaded.jurisdiction, Some(Jurisdiction::Qld));
    }
}
