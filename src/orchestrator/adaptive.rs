//! Adaptive graph: full legal analysis when the question needs it.
//!
//! ```text
//! INIT → SAFETY_GATE ─┬─▶ ESCALATE ────▶ END
//!                     ├─▶ SIMPLE_PATH ─▶ END   (issue → jurisdiction → strategy)
//!                     └─▶ COMPLEX_PATH ▶ END   (all eight stages)
//! ```
//!
//! Issue identification runs between the gate and the routing decision
//! because both paths begin with it and the router reads its secondary
//! issues and complexity score.

use crate::complexity::{self, Complexity, RouteDecision, RouteInput, RouteSource};
use crate::config::OrchestratorConfig;
use crate::model::{ChatMessage, ModelRequest};
use crate::pipeline::strategy::StrategyArtifact;
use crate::pipeline::{
    run_sequence, run_stage, PipelineState, StageContext, StageInput, StageName, COMPLEX_SEQUENCE,
    SIMPLE_SEQUENCE,
};
use crate::safety::SafetyAssessment;

use super::nodes;
use super::{Turn, TurnArtifact, TurnError, TurnFlag, TurnRoute};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveNode {
    Init,
    SafetyGate,
    Escalate,
    SimplePath,
    ComplexPath,
    End,
}

const ANSWER_PROMPT: &str = "You are an Australian legal assistant. Using the analysis below, \
answer the user's question directly in plain language. Mention free options first. Cite only \
the legislation listed; never invent a law or case. This is general information, not legal advice.";

/// Deterministic reply from the strategy artifact.
pub fn render_strategy(strategy: &StrategyArtifact) -> String {
    let mut out = strategy.summary.clone();
    if let Some(note) = &strategy.coverage_note {
        out.push_str(&format!("\n\n_{}_", note));
    }
    if !strategy.options.is_empty() {
        out.push_str("\n\n**Your options**\n");
        for o in &strategy.options {
            out.push_str(&format!("- **{}**: {}\n", o.title, o.description));
        }
    }
    if !strategy.next_steps.is_empty() {
        out.push_str("\n**Next steps**\n");
        for (i, s) in strategy.next_steps.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, s));
        }
    }
    let citations = strategy.citations();
    if !citations.is_empty() {
        out.push_str("\n**Legislation**\n");
        for c in citations {
            out.push_str(&format!("- {}\n", c));
        }
    }
    out
}

async fn decide_route(
    ctx: &StageContext,
    input: &StageInput,
    state: &PipelineState,
    turn: &mut Turn,
) -> RouteDecision {
    let route_input = RouteInput {
        has_attachment: input.attachment.is_some(),
        secondary_issues: state.issue.as_ref().map(|i| i.secondary.len()).unwrap_or(0),
        issue_score: state.issue.as_ref().and_then(|i| i.complexity_score),
    };
    match tokio::time::timeout(
        ctx.stage_timeout,
        complexity::route(ctx.model.as_ref(), &input.message, &route_input),
    )
    .await
    {
        Ok(decision) => decision,
        Err(_) => {
            tracing::warn!("complexity router timed out, using simple path");
            turn.flag(TurnFlag::ExternalTimeout);
            RouteDecision {
                complexity: Complexity::Simple,
                source: RouteSource::Default,
                score: complexity::lexical_score(&input.message),
                reasons: vec!["router timed out".to_string()],
            }
        }
    }
}

async fn simple_answer(ctx: &StageContext, config: &OrchestratorConfig, turn: &Turn, state: &PipelineState) -> String {
    let Some(strategy) = &state.strategy else {
        return "Sorry, I couldn't work out an answer to that.".to_string();
    };
    if strategy.degraded {
        return render_strategy(strategy);
    }
    let analysis = serde_json::to_string_pretty(&serde_json::json!({
        "issue": state.issue,
        "jurisdiction": state.jurisdiction,
        "strategy": strategy,
    }))
    .unwrap_or_default();
    let mut messages = vec![ChatMessage::system(format!("{}\n\nAnalysis:\n{}", ANSWER_PROMPT, analysis))];
    messages.extend(turn.session.window(config.history_window).iter().cloned());
    messages.push(ChatMessage::user(turn.message.clone()));

    match ctx.complete(&ModelRequest::visible("adaptive_answer", messages)).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "adaptive answer failed, rendering strategy");
            render_strategy(strategy)
        }
    }
}

pub(crate) async fn run(ctx: &StageContext, config: &OrchestratorConfig, turn: &mut Turn) -> Result<(), TurnError> {
    let mut node = AdaptiveNode::Init;
    let mut input = StageInput::default();
    let mut state = PipelineState::default();
    let mut assessment: Option<SafetyAssessment> = None;

    loop {
        tracing::debug!(?node, "adaptive node");
        node = match node {
            AdaptiveNode::Init => {
                input = StageInput {
                    message: turn.message.clone(),
                    attachment: turn.attachment.clone(),
                    declared_jurisdiction: turn.session.jurisdiction,
                    history: turn.session.window(config.history_window).to_vec(),
                };
                AdaptiveNode::SafetyGate
            }
            AdaptiveNode::SafetyGate => {
                let a = nodes::safety_gate(ctx, config, turn).await?;
                if a.requires_escalation() {
                    assessment = Some(a);
                    AdaptiveNode::Escalate
                } else {
                    run_stage(StageName::IssueIdentification, ctx, &input, &mut state).await;
                    let decision = decide_route(ctx, &input, &state, turn).await;
                    let next = if decision.is_complex() {
                        AdaptiveNode::ComplexPath
                    } else {
                        AdaptiveNode::SimplePath
                    };
                    turn.routing = Some(decision);
                    next
                }
            }
            AdaptiveNode::Escalate => {
                if let Some(a) = &assessment {
                    nodes::escalate(turn, a);
                }
                AdaptiveNode::End
            }
            AdaptiveNode::SimplePath => {
                run_sequence(&SIMPLE_SEQUENCE, ctx, &input, &mut state).await;
                turn.reply = simple_answer(ctx, config, turn, &state).await;
                turn.citations = state
                    .strategy
                    .as_ref()
                    .map(|s| s.citations())
                    .unwrap_or_default();
                turn.route = TurnRoute::SimplePath;
                AdaptiveNode::End
            }
            AdaptiveNode::ComplexPath => {
                run_sequence(&COMPLEX_SEQUENCE, ctx, &input, &mut state).await;
                if let Some(brief) = &state.brief {
                    turn.reply = brief.to_markdown();
                    turn.citations = brief.citations.clone();
                }
                turn.route = TurnRoute::ComplexPath;
                AdaptiveNode::End
            }
            AdaptiveNode::End => break,
        };
    }

    if matches!(turn.route, TurnRoute::SimplePath | TurnRoute::ComplexPath) {
        if ctx.provider_outage() {
            return Err(TurnError::ProviderOutage);
        }
        let degradations = state.degradations.clone();
        turn.record_degradations(&degradations);
        turn.artifact = Some(TurnArtifact::Analysis(Box::new(state.clone())));
        turn.session.pipeline = Some(state);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::FakeModel;
    use crate::model::ModelError;
    use crate::orchestrator::session::{SessionMode, SessionStore};
    use crate::orchestrator::tests::{orchestrator, request};
    use crate::orchestrator::{TurnArtifact, TurnRequest};
    use crate::resources::RiskCategory;

    fn adaptive(session: &str, message: &str) -> TurnRequest {
        TurnRequest {
            mode: Some(SessionMode::Adaptive),
            ..request(session, message)
        }
    }

    fn happy_model() -> FakeModel {
        FakeModel::new(|req| {
            Ok(match req.purpose {
                "safety_classification" => serde_json::json!({"category": "clear"}),
                "issue_identification" => serde_json::json!({
                    "primary_issue": {"area": "tenancy", "sub_category": "rent_increase",
                                      "description": "Notice period for a rent increase"},
                    "secondary_issues": [], "complexity_score": 0.1
                }),
                "strategy_formulation" => serde_json::json!({
                    "summary": "Your landlord must give at least 60 days written notice.",
                    "options": [{"title": "Check the notice date", "description": "", "cost_tier": "free"}],
                    "recommended": null, "next_steps": []
                }),
                "adaptive_answer" => serde_json::json!("In NSW, 60 days written notice is required."),
                _ => serde_json::json!({}),
            })
        })
    }

    #[tokio::test]
    async fn test_end_it_all_escalates_without_reasoning() {
        let (orch, _) = orchestrator(happy_model()).await;
        let out = orch.handle_turn(adaptive("s", "I want to end it all")).await.unwrap();
        assert_eq!(out.route, TurnRoute::Escalate);
        assert!(out.reply.contains("13 11 14"));
        match out.artifact {
            Some(TurnArtifact::Escalation { category, ref resources }) => {
                assert_eq!(category, RiskCategory::SuicideSelfHarm);
                assert!(resources.iter().any(|r| r.name == "Lifeline"));
            }
            other => panic!("unexpected artifact {:?}", other),
        }
        assert!(out.state.pipeline.is_none());
    }

    #[tokio::test]
    async fn test_nsw_rent_notice_takes_simple_path() {
        let (orch, _) = orchestrator(happy_model()).await;
        let out = orch
            .handle_turn(adaptive("s", "What is the notice period for a rent increase?"))
            .await
            .unwrap();
        assert_eq!(out.route, TurnRoute::SimplePath);
        assert_eq!(out.reply, "In NSW, 60 days written notice is required.");
        assert!(out.citations.contains(&"rta citation".to_string()));
        let pipeline = out.state.pipeline.unwrap();
        assert!(pipeline.facts.is_none());
        assert!(pipeline.strategy.is_some());
    }

    #[tokio::test]
    async fn test_attachment_forces_complex_path() {
        let (orch, _) = orchestrator(happy_model()).await;
        let mut req = adaptive("s", "Can you check this?");
        req.attachments.push(crate::orchestrator::Attachment {
            name: Some("lease.txt".into()),
            text: "Residential tenancy agreement. The rent is $500 per week payable fortnightly in advance.".into(),
        });
        let out = orch.handle_turn(req).await.unwrap();
        assert_eq!(out.route, TurnRoute::ComplexPath);
        assert!(out.routing.unwrap().is_complex());
        assert!(out.reply.starts_with("# Lawyer Brief"));
        assert!(out.state.pipeline.unwrap().brief.is_some());
    }

    #[tokio::test]
    async fn test_total_outage_after_gate_aborts() {
        let (orch, sessions) = orchestrator(FakeModel::new(|_| Err(ModelError::Quota("exhausted".into())))).await;
        // Short follow-up skips the classifier, so every call that is made fails.
        let mut state = crate::orchestrator::SessionState::new("s");
        state.mode = SessionMode::Adaptive;
        state.messages.push(crate::model::ChatMessage::user("hi"));
        sessions.save(&state).await.unwrap();

        let err = orch.handle_turn(request("s", "what about bonds?")).await.unwrap_err();
        assert!(matches!(err, TurnError::ProviderOutage));
    }

    #[tokio::test]
    async fn test_trigger_only_message_enters_brief_flow() {
        let (orch, _) = orchestrator(FakeModel::new(|req| {
            Ok(match req.purpose {
                "brief_fact_extraction" => serde_json::json!({
                    "legal_area": "tenancy",
                    "situation_summary": "Rent increase dispute",
                    "key_facts": ["Notice received"], "parties_involved": [], "timeline_events": [],
                    "documents_mentioned": [], "user_goals": [],
                    "missing_critical_info": ["lease status"], "confidence": 0.4
                }),
                "brief_questions" => serde_json::json!({"questions": ["Is your lease fixed term or periodic?"]}),
                "issue_identification" | "strategy_formulation" | "adaptive_answer" => {
                    panic!("reasoning pipeline ran on an empty message")
                }
                _ => serde_json::json!({"category": "clear"}),
            })
        }))
        .await;
        let out = orch.handle_turn(adaptive("ab", "[GENERATE_BRIEF]")).await.unwrap();
        assert_eq!(out.route, TurnRoute::BriefQuestions);
        assert!(out.reply.contains("fixed term or periodic"));
        assert!(out.state.brief.active);
        assert_eq!(out.state.mode, SessionMode::Adaptive);
    }

    #[test]
    fn test_render_strategy_lists_citations() {
        let s = StrategyArtifact {
            summary: "Summary.".into(),
            options: vec![],
            recommended: None,
            next_steps: vec!["Write to the landlord".into()],
            sources: vec![],
            coverage_note: Some("VIC legislation is not yet available.".into()),
            degraded: true,
        };
        let text = render_strategy(&s);
        assert!(text.starts_with("Summary."));
        assert!(text.contains("1. Write to the landlord"));
        assert!(text.contains("VIC legislation"));
    }
}
