//! Reasoning stage pipeline.
//!
//! Eight stages run in a fixed order on the complex path:
//!
//! ```text
//! issue → jurisdiction → facts → elements → precedent → risk → strategy → brief
//! ```
//!
//! The simple path runs `issue → jurisdiction → strategy`. Each stage reads
//! the request and the artifacts of earlier stages and produces exactly one
//! artifact, which is never touched again during the turn. A stage whose
//! model call fails or times out still produces an artifact, marked
//! degraded, and the pipeline moves on.

pub mod brief;
pub mod elements;
pub mod facts;
pub mod issue;
pub mod jurisdiction;
pub mod precedent;
pub mod risk;
pub mod strategy;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use auslaw_core::models::Jurisdiction;

use crate::model::{structured_as, with_timeout, ChatMessage, ModelError, ModelProvider, ModelRequest};
use crate::retriever::HybridRetriever;

pub use brief::EscalationBrief;
pub use elements::{ElementAssessment, ElementStatus, ElementsArtifact, Viability};
pub use facts::FactsArtifact;
pub use issue::{IssueArtifact, LegalIssue};
pub use jurisdiction::JurisdictionArtifact;
pub use precedent::PrecedentArtifact;
pub use risk::RiskArtifact;
pub use strategy::StrategyArtifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    IssueIdentification,
    JurisdictionResolution,
    FactStructuring,
    ElementsMapping,
    PrecedentSearch,
    RiskAnalysis,
    StrategyFormulation,
    BriefAssembly,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::IssueIdentification => "issue_identification",
            StageName::JurisdictionResolution => "jurisdiction_resolution",
            StageName::FactStructuring => "fact_structuring",
            StageName::ElementsMapping => "elements_mapping",
            StageName::PrecedentSearch => "precedent_search",
            StageName::RiskAnalysis => "risk_analysis",
            StageName::StrategyFormulation => "strategy_formulation",
            StageName::BriefAssembly => "brief_assembly",
        }
    }
}

/// Full sequence for the complex path.
pub const COMPLEX_SEQUENCE: [StageName; 8] = [
    StageName::IssueIdentification,
    StageName::JurisdictionResolution,
    StageName::FactStructuring,
    StageName::ElementsMapping,
    StageName::PrecedentSearch,
    StageName::RiskAnalysis,
    StageName::StrategyFormulation,
    StageName::BriefAssembly,
];

pub const SIMPLE_SEQUENCE: [StageName; 3] = [
    StageName::IssueIdentification,
    StageName::JurisdictionResolution,
    StageName::StrategyFormulation,
];

/// The request the pipeline reasons about.
#[derive(Debug, Clone, Default)]
pub struct StageInput {
    pub message: String,
    /// Text of an attached document, if any.
    pub attachment: Option<String>,
    pub declared_jurisdiction: Option<Jurisdiction>,
    /// Earlier turns, oldest first.
    pub history: Vec<ChatMessage>,
}

impl StageInput {
    /// History plus the current message, formatted for a prompt.
    pub fn transcript(&self) -> String {
        let mut lines: Vec<String> = self
            .history
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect();
        lines.push(format!("User: {}", self.message));
        lines.join("\n\n")
    }
}

/// Why a stage produced a degraded artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub stage: StageName,
    pub reason: String,
    /// The model call exceeded its timeout.
    pub timed_out: bool,
}

impl Degradation {
    pub fn from_model(stage: StageName, err: &ModelError) -> Self {
        tracing::warn!(stage = stage.as_str(), error = %err, "stage degraded");
        Self {
            stage,
            reason: err.to_string(),
            timed_out: matches!(err, ModelError::Timeout(_)),
        }
    }
}

/// Accumulated artifacts, one slot per stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineState {
    pub issue: Option<IssueArtifact>,
    pub jurisdiction: Option<JurisdictionArtifact>,
    pub facts: Option<FactsArtifact>,
    pub elements: Option<ElementsArtifact>,
    pub precedent: Option<PrecedentArtifact>,
    pub risk: Option<RiskArtifact>,
    pub strategy: Option<StrategyArtifact>,
    pub brief: Option<EscalationBrief>,
    #[serde(default)]
    pub degradations: Vec<Degradation>,
}

impl PipelineState {
    pub fn completed(&self, stage: StageName) -> bool {
        match stage {
            StageName::IssueIdentification => self.issue.is_some(),
            StageName::JurisdictionResolution => self.jurisdiction.is_some(),
            StageName::FactStructuring => self.facts.is_some(),
            StageName::ElementsMapping => self.elements.is_some(),
            StageName::PrecedentSearch => self.precedent.is_some(),
            StageName::RiskAnalysis => self.risk.is_some(),
            StageName::StrategyFormulation => self.strategy.is_some(),
            StageName::BriefAssembly => self.brief.is_some(),
        }
    }

    /// Resolved jurisdiction, or FEDERAL before resolution has run.
    pub fn resolved_jurisdiction(&self) -> Jurisdiction {
        self.jurisdiction
            .as_ref()
            .map(|j| j.resolved)
            .unwrap_or(Jurisdiction::Federal)
    }
}

/// External collaborators for one turn, plus call bookkeeping used to
/// tell a provider outage apart from a single bad stage.
pub struct StageContext {
    pub model: Arc<dyn ModelProvider>,
    pub retriever: Arc<HybridRetriever>,
    pub stage_timeout: Duration,
    ok_calls: AtomicUsize,
    outage_calls: AtomicUsize,
}

impl StageContext {
    pub fn new(model: Arc<dyn ModelProvider>, retriever: Arc<HybridRetriever>, stage_timeout: Duration) -> Self {
        Self {
            model,
            retriever,
            stage_timeout,
            ok_calls: AtomicUsize::new(0),
            outage_calls: AtomicUsize::new(0),
        }
    }

    fn record<T>(&self, result: &Result<T, ModelError>) {
        match result {
            Ok(_) => {
                self.ok_calls.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_outage() => {
                self.outage_calls.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
    }

    /// Structured model call bounded by the stage timeout.
    pub async fn structured<T: DeserializeOwned>(
        &self,
        req: &ModelRequest,
        schema: &serde_json::Value,
    ) -> Result<T, ModelError> {
        let result = with_timeout(self.stage_timeout, structured_as(self.model.as_ref(), req, schema)).await;
        self.record(&result);
        result
    }

    /// Free-text model call bounded by the stage timeout.
    pub async fn complete(&self, req: &ModelRequest) -> Result<String, ModelError> {
        let result = with_timeout(self.stage_timeout, self.model.complete(req)).await;
        self.record(&result);
        result
    }

    /// Every model call this turn failed with an outage-class error.
    pub fn provider_outage(&self) -> bool {
        self.ok_calls.load(Ordering::Relaxed) == 0 && self.outage_calls.load(Ordering::Relaxed) > 0
    }
}

/// Run one stage and store its artifact. Stages already completed are
/// skipped so a sequence can be resumed.
pub async fn run_stage(stage: StageName, ctx: &StageContext, input: &StageInput, state: &mut PipelineState) {
    if state.completed(stage) {
        return;
    }
    tracing::debug!(stage = stage.as_str(), "stage start");
    let degradation = match stage {
        StageName::IssueIdentification => {
            let (a, d) = issue::run(ctx, input).await;
            state.issue = Some(a);
            d
        }
        StageName::JurisdictionResolution => {
            state.jurisdiction = Some(jurisdiction::run(input));
            None
        }
        StageName::FactStructuring => {
            let (a, d) = facts::run(ctx, input).await;
            state.facts = Some(a);
            d
        }
        StageName::ElementsMapping => {
            let (a, d) = elements::run(ctx, input, state).await;
            state.elements = Some(a);
            d
        }
        StageName::PrecedentSearch => {
            let (a, d) = precedent::run(ctx, input, state).await;
            state.precedent = Some(a);
            d
        }
        StageName::RiskAnalysis => {
            let (a, d) = risk::run(ctx, input, state).await;
            state.risk = Some(a);
            d
        }
        StageName::StrategyFormulation => {
            let (a, d) = strategy::run(ctx, input, state).await;
            state.strategy = Some(a);
            d
        }
        StageName::BriefAssembly => {
            let (a, d) = brief::run(ctx, input, state).await;
            state.brief = Some(a);
            d
        }
    };
    if let Some(d) = degradation {
        state.degradations.push(d);
    }
    tracing::debug!(stage = stage.as_str(), "stage done");
}

pub async fn run_sequence(stages: &[StageName], ctx: &StageContext, input: &StageInput, state: &mut PipelineState) {
    for &stage in stages {
        run_stage(stage, ctx, input, state).await;
    }
}

/// Shorten `text` to at most `max` characters on a char boundary.
pub(crate) fn excerpt(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::fake::FakeModel;
    use crate::test_support::{retriever_over, seeded_store};

    pub(crate) async fn ctx_with(model: FakeModel) -> StageContext {
        StageContext::new(
            Arc::new(model),
            Arc::new(retriever_over(seeded_store().await)),
            Duration::from_secs(5),
        )
    }

    pub(crate) fn input(message: &str) -> StageInput {
        StageInput {
            message: message.to_string(),
            declared_jurisdiction: Some(Jurisdiction::Nsw),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_complex_sequence_survives_dead_model() {
        let ctx = ctx_with(FakeModel::new(|_| Err(ModelError::Quota("exhausted".into())))).await;
        let mut state = PipelineState::default();
        run_sequence(&COMPLEX_SEQUENCE, &ctx, &input("My landlord kept my bond"), &mut state).await;

        for stage in COMPLEX_SEQUENCE {
            assert!(state.completed(stage), "{:?} missing", stage);
        }
        assert!(!state.degradations.is_empty());
        assert!(ctx.provider_outage());
    }

    #[tokio::test]
    async fn test_simple_sequence_only_runs_three_stages() {
        let ctx = ctx_with(FakeModel::new(|_| Err(ModelError::Fatal("bad".into())))).await;
        let mut state = PipelineState::default();
        run_sequence(&SIMPLE_SEQUENCE, &ctx, &input("What is a bond?"), &mut state).await;
        assert!(state.issue.is_some());
        assert!(state.jurisdiction.is_some());
        assert!(state.strategy.is_some());
        assert!(state.facts.is_none());
        assert!(state.brief.is_none());
        assert!(!ctx.provider_outage());
    }

    #[test]
    fn test_excerpt_char_boundary() {
        assert_eq!(excerpt("héllo", 2), "hé…");
        assert_eq!(excerpt("hi", 5), "hi");
    }
}
