//! Turn orchestration.
//!
//! [`Orchestrator::handle_turn`] loads the session checkpoint, runs the
//! session's graph (conversational by default, adaptive on request) and
//! writes the checkpoint back only if the turn succeeded. Turns of
//! different sessions run fully in parallel; turns of one session are
//! serialised by a per-session lock.

pub mod adaptive;
pub mod brief_flow;
pub mod conversational;
mod nodes;
pub mod session;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use auslaw_core::models::Jurisdiction;

use crate::complexity::RouteDecision;
use crate::config::{Config, OrchestratorConfig};
use crate::model::{create_model, ChatMessage, ModelError, ModelProvider};
use crate::pipeline::{Degradation, PipelineState, StageContext};
use crate::resources::{CrisisResource, RiskCategory};
use crate::retriever::HybridRetriever;
use crate::safety::SafetyAssessment;

pub use brief_flow::{LawyerBrief, BRIEF_TRIGGER};
pub use session::{InMemorySessionStore, SessionMode, SessionState, SessionStore, SqliteSessionStore};

/// Reasons a turn is aborted. The session checkpoint is left untouched.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("safety check failed: {0}")]
    SafetyGateFailed(#[source] ModelError),
    #[error("model provider unavailable")]
    ProviderOutage,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("session checkpoint error: {0}")]
    Checkpoint(String),
}

impl TurnError {
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::SafetyGateFailed(_) => "safety_gate_failed",
            TurnError::ProviderOutage => "provider_outage",
            TurnError::InvalidInput(_) => "bad_request",
            TurnError::Checkpoint(_) => "internal",
        }
    }

    /// What the user sees. Internal detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            TurnError::InvalidInput(reason) => reason.clone(),
            _ => "Sorry, I'm having trouble right now. Please try again in a moment. \
                  If you are in danger, call 000."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub name: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnRequest {
    /// Absent for a new session; one is allocated.
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Free text such as `"NSW"` or `"User is in NSW"`.
    #[serde(default)]
    pub declared_jurisdiction: Option<String>,
    /// Switches the session's graph when set.
    #[serde(default)]
    pub mode: Option<SessionMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRoute {
    Escalate,
    Chat,
    BriefQuestions,
    Brief,
    SimplePath,
    ComplexPath,
}

/// Non-fatal conditions worth surfacing alongside the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnFlag {
    ClassificationUncertain,
    ExternalTimeout,
    BriefIncomplete,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnArtifact {
    Escalation {
        category: RiskCategory,
        resources: Vec<CrisisResource>,
    },
    Analysis(Box<PipelineState>),
    LawyerBrief(Box<LawyerBrief>),
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub session_id: String,
    pub reply: String,
    pub route: TurnRoute,
    pub artifact: Option<TurnArtifact>,
    pub safety: Option<SafetyAssessment>,
    pub routing: Option<RouteDecision>,
    pub flags: Vec<TurnFlag>,
    pub degradations: Vec<Degradation>,
    pub citations: Vec<String>,
    pub state: SessionState,
}

/// Working state for one turn. The session here is a copy; it replaces
/// the checkpoint only when the turn finishes without error.
pub(crate) struct Turn {
    pub session: SessionState,
    pub message: String,
    pub attachment: Option<String>,
    pub brief_requested: bool,
    pub reply: String,
    pub route: TurnRoute,
    pub artifact: Option<TurnArtifact>,
    pub safety: Option<SafetyAssessment>,
    pub routing: Option<RouteDecision>,
    pub flags: Vec<TurnFlag>,
    pub degradations: Vec<Degradation>,
    pub citations: Vec<String>,
}

impl Turn {
    fn new(session: SessionState, message: String, attachment: Option<String>, brief_requested: bool) -> Self {
        Self {
            session,
            message,
            attachment,
            brief_requested,
            reply: String::new(),
            route: TurnRoute::Chat,
            artifact: None,
            safety: None,
            routing: None,
            flags: Vec::new(),
            degradations: Vec::new(),
            citations: Vec::new(),
        }
    }

    pub fn flag(&mut self, flag: TurnFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    pub fn is_first_message(&self) -> bool {
        self.session.messages.is_empty()
    }

    /// Recent history followed by the current message, for prompts.
    pub fn conversation(&self, window: usize) -> String {
        let mut lines: Vec<String> = self
            .session
            .window(window)
            .iter()
            .map(|m| match m.role {
                crate::model::Role::User => format!("User: {}", m.content),
                crate::model::Role::Assistant => format!("Assistant: {}", m.content),
                crate::model::Role::System => format!("System: {}", m.content),
            })
            .collect();
        if !self.message.is_empty() {
            lines.push(format!("User: {}", self.message));
        }
        lines.join("\n\n")
    }

    pub fn record_degradations(&mut self, degradations: &[Degradation]) {
        if degradations.is_empty() {
            return;
        }
        self.flag(TurnFlag::Degraded);
        if degradations.iter().any(|d| d.timed_out) {
            self.flag(TurnFlag::ExternalTimeout);
        }
        self.degradations.extend_from_slice(degradations);
    }

    fn finish(mut self) -> TurnOutcome {
        if !self.message.is_empty() {
            self.session.messages.push(ChatMessage::user(self.message.clone()));
        }
        self.session.messages.push(ChatMessage::assistant(self.reply.clone()));
        self.session.turns += 1;
        TurnOutcome {
            session_id: self.session.session_id.clone(),
            reply: self.reply,
            route: self.route,
            artifact: self.artifact,
            safety: self.safety,
            routing: self.routing,
            flags: self.flags,
            degradations: self.degradations,
            citations: self.citations,
            state: self.session,
        }
    }
}

/// Strip the brief trigger; returns the cleaned message and whether it
/// was present.
pub fn split_brief_trigger(message: &str) -> (String, bool) {
    if message.contains(BRIEF_TRIGGER) {
        (message.replace(BRIEF_TRIGGER, "").trim().to_string(), true)
    } else {
        (message.trim().to_string(), false)
    }
}

pub struct Orchestrator {
    model: Arc<dyn ModelProvider>,
    retriever: Arc<HybridRetriever>,
    sessions: Arc<dyn SessionStore>,
    config: OrchestratorConfig,
    locks: LockTable,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        retriever: Arc<HybridRetriever>,
        sessions: Arc<dyn SessionStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            model,
            retriever,
            sessions,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Orchestrator wired to the configured providers, with checkpoints in
    /// the SQLite `sessions` table.
    pub fn from_config(config: &Config, pool: sqlx::SqlitePool) -> anyhow::Result<Self> {
        let retriever = HybridRetriever::from_config(config, pool.clone())?;
        Ok(Self::new(
            create_model(&config.model)?,
            Arc::new(retriever),
            Arc::new(SqliteSessionStore::new(pool)),
            config.orchestrator.clone(),
        ))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn retriever(&self) -> &Arc<HybridRetriever> {
        &self.retriever
    }

    fn session_lock(&self, session_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>, TurnError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| TurnError::Checkpoint("session lock table poisoned".into()))?;
        Ok(locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks.lock().map(|t| t.len()).unwrap_or_default()
    }

    /// Run one user turn end to end.
    pub async fn handle_turn(&self, req: TurnRequest) -> Result<TurnOutcome, TurnError> {
        let (message, brief_requested) = split_brief_trigger(&req.message);
        let attachment = join_attachments(&req.attachments);
        if message.is_empty() && attachment.is_none() && !brief_requested {
            return Err(TurnError::InvalidInput("message must not be empty".into()));
        }

        let session_id = req
            .session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let guard = self.session_lock(&session_id)?.lock_owned().await;
        let _lease = SessionLease {
            table: &self.locks,
            session_id: session_id.clone(),
            guard: Some(guard),
        };

        let mut session = self
            .sessions
            .load(&session_id)
            .await
            .map_err(|e| TurnError::Checkpoint(e.to_string()))?
            .unwrap_or_else(|| SessionState::new(session_id.clone()));
        if let Some(declared) = req.declared_jurisdiction.as_deref() {
            session.jurisdiction = Jurisdiction::detect(declared).or(session.jurisdiction);
        }
        if let Some(mode) = req.mode {
            session.mode = mode;
        }

        tracing::info!(
            session = %session_id,
            mode = ?session.mode,
            chars = message.chars().count(),
            has_attachment = attachment.is_some(),
            brief_requested,
            jurisdiction = ?session.jurisdiction,
            "turn start"
        );

        let ctx = StageContext::new(
            self.model.clone(),
            self.retriever.clone(),
            Duration::from_secs(self.config.stage_timeout_secs),
        );
        let mut turn = Turn::new(session, message, attachment, brief_requested);

        // The brief sub-flow lives on the conversational graph; adaptive
        // sessions enter it the same way.
        let in_brief = turn.brief_requested || turn.session.brief.active;
        let result = match turn.session.mode {
            SessionMode::Adaptive if !in_brief => adaptive::run(&ctx, &self.config, &mut turn).await,
            _ => conversational::run(&ctx, &self.config, &mut turn).await,
        };
        if let Err(e) = result {
            tracing::error!(session = %session_id, error = %e, "turn aborted");
            return Err(e);
        }

        let outcome = turn.finish();
        self.sessions
            .save(&outcome.state)
            .await
            .map_err(|e| TurnError::Checkpoint(e.to_string()))?;
        tracing::info!(session = %session_id, route = ?outcome.route, flags = ?outcome.flags, "turn complete");
        Ok(outcome)
    }
}

type LockTable = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds a session's turn lock; on drop, releases it and removes the table
/// entry once no other turn holds or waits on it.
struct SessionLease<'a> {
    table: &'a LockTable,
    session_id: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        if let Ok(mut table) = self.table.lock() {
            if table
                .get(&self.session_id)
                .is_some_and(|l| Arc::strong_count(l) == 1)
            {
                table.remove(&self.session_id);
            }
        }
    }
}

fn join_attachments(attachments: &[Attachment]) -> Option<String> {
    let texts: Vec<&str> = attachments
        .iter()
        .map(|a| a.text.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n\n"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::fake::FakeModel;
    use crate::test_support::{retriever_over, seeded_store};

    pub(crate) async fn orchestrator(model: FakeModel) -> (Orchestrator, Arc<InMemorySessionStore>) {
        let sessions = Arc::new(InMemorySessionStore::new());
        let orch = Orchestrator::new(
            Arc::new(model),
            Arc::new(retriever_over(seeded_store().await)),
            sessions.clone(),
            OrchestratorConfig::default(),
        );
        (orch, sessions)
    }

    pub(crate) fn request(session: &str, message: &str) -> TurnRequest {
        TurnRequest {
            session_id: Some(session.to_string()),
            message: message.to_string(),
            declared_jurisdiction: Some("User is in NSW".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_split_brief_trigger() {
        assert_eq!(split_brief_trigger("  hi [GENERATE_BRIEF]"), ("hi".to_string(), true));
        assert_eq!(split_brief_trigger("[GENERATE_BRIEF]"), (String::new(), true));
        assert_eq!(split_brief_trigger(" hi "), ("hi".to_string(), false));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let (orch, _) = orchestrator(FakeModel::new(|_| Ok(serde_json::json!({})))).await;
        let err = orch.handle_turn(request("s", "   ")).await.unwrap_err();
        assert!(matches!(err, TurnError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_failed_turn_leaves_checkpoint_untouched() {
        let (orch, sessions) = orchestrator(FakeModel::new(|req| match req.purpose {
            "safety_classification" => Err(ModelError::Quota("429".into())),
            _ => Ok(serde_json::json!("ok")),
        }))
        .await;
        let mut before = SessionState::new("s1");
        before.messages.push(ChatMessage::user("earlier"));
        sessions.save(&before).await.unwrap();

        let err = orch
            .handle_turn(request("s1", "My landlord is refusing to fix the broken heater"))
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::SafetyGateFailed(_)));

        let after = sessions.load("s1").await.unwrap().unwrap();
        assert_eq!(after.messages.len(), 1);
        assert_eq!(after.turns, 0);
    }

    #[tokio::test]
    async fn test_disabled_model_fails_at_safety_gate() {
        let orch = Orchestrator::new(
            Arc::new(crate::model::DisabledModel),
            Arc::new(retriever_over(seeded_store().await)),
            Arc::new(InMemorySessionStore::new()),
            OrchestratorConfig::default(),
        );
        let err = orch
            .handle_turn(request("d1", "My landlord is refusing to fix the broken heater"))
            .await
            .unwrap_err();
        match err {
            TurnError::SafetyGateFailed(e) => assert!(!e.is_outage()),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lock_table_released_after_turns() {
        let (orch, _) = orchestrator(FakeModel::new(|req| match req.purpose {
            "safety_classification" => Ok(serde_json::json!({"category": "clear"})),
            _ => Ok(serde_json::json!("A landlord must give 60 days notice.")),
        }))
        .await;
        for i in 0..50 {
            orch.handle_turn(request(&format!("s{}", i), "How much notice for a rent increase?"))
                .await
                .unwrap();
        }
        assert_eq!(orch.lock_table_len(), 0);

        let (a, b) = tokio::join!(
            orch.handle_turn(request("shared", "How much notice for a rent increase?")),
            orch.handle_turn(request("shared", "Does the notice have to be in writing?")),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(orch.lock_table_len(), 0);
    }

    #[tokio::test]
    async fn test_new_session_gets_an_id_and_declared_state() {
        let (orch, sessions) = orchestrator(FakeModel::new(|req| match req.purpose {
            "safety_classification" => Ok(serde_json::json!({"category": "clear"})),
            _ => Ok(serde_json::json!("A landlord must give 60 days notice.")),
        }))
        .await;
        let out = orch
            .handle_turn(TurnRequest {
                message: "How much notice for a rent increase?".into(),
                declared_jurisdiction: Some("\"nsw\"".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!out.session_id.is_empty());
        assert_eq!(out.state.jurisdiction, Some(Jurisdiction::Nsw));
        assert_eq!(out.state.messages.len(), 2);
        assert!(sessions.load(&out.session_id).await.unwrap().is_some());
    }
}
