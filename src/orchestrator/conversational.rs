//! Conversational graph, the default entry.
//!
//! ```text
//! INIT → SAFETY_CHECK_LITE ─┬─▶ ESCALATION_RESPONSE ─▶ END
//!                           ├─▶ CHAT_RESPONSE ───────▶ END
//!                           └─▶ BRIEF_CHECK_INFO ─┬─▶ BRIEF_ASK_QUESTIONS ─▶ END
//!                                                 └─▶ BRIEF_GENERATE ──────▶ END
//! ```
//!
//! The brief branch is taken when the message carries the brief trigger
//! or a brief is already in progress for the session.

use crate::config::OrchestratorConfig;
use crate::pipeline::StageContext;
use crate::safety::SafetyAssessment;

use super::brief_flow::{self, route_brief_info, BriefRoute};
use super::nodes;
use super::{Turn, TurnArtifact, TurnError, TurnFlag, TurnRoute};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationalNode {
    Init,
    SafetyCheckLite,
    EscalationResponse,
    ChatResponse,
    BriefCheckInfo,
    BriefAskQuestions,
    BriefGenerate,
    End,
}

pub(crate) async fn run(ctx: &StageContext, config: &OrchestratorConfig, turn: &mut Turn) -> Result<(), TurnError> {
    let mut node = ConversationalNode::Init;
    let mut assessment: Option<SafetyAssessment> = None;

    loop {
        tracing::debug!(?node, "conversational node");
        node = match node {
            ConversationalNode::Init => {
                if turn.brief_requested && !turn.session.brief.active {
                    turn.session.brief = brief_flow::BriefProgress {
                        active: true,
                        ..Default::default()
                    };
                }
                ConversationalNode::SafetyCheckLite
            }
            ConversationalNode::SafetyCheckLite => {
                let a = nodes::safety_gate(ctx, config, turn).await?;
                let next = if a.requires_escalation() {
                    ConversationalNode::EscalationResponse
                } else if turn.session.brief.active {
                    ConversationalNode::BriefCheckInfo
                } else {
                    ConversationalNode::ChatResponse
                };
                assessment = Some(a);
                next
            }
            ConversationalNode::EscalationResponse => {
                if let Some(a) = &assessment {
                    nodes::escalate(turn, a);
                }
                ConversationalNode::End
            }
            ConversationalNode::ChatResponse => {
                nodes::chat_response(ctx, config, turn).await?;
                ConversationalNode::End
            }
            ConversationalNode::BriefCheckInfo => {
                let conversation = turn.conversation(config.history_window);
                let jurisdiction = turn.session.jurisdiction;
                brief_flow::check_info(ctx, &conversation, jurisdiction, &mut turn.session.brief).await;
                match route_brief_info(&turn.session.brief, config.max_brief_rounds) {
                    BriefRoute::Ask => ConversationalNode::BriefAskQuestions,
                    BriefRoute::Generate => ConversationalNode::BriefGenerate,
                }
            }
            ConversationalNode::BriefAskQuestions => {
                match brief_flow::ask_questions(ctx, &mut turn.session.brief).await {
                    Some(message) => {
                        turn.reply = message;
                        turn.route = TurnRoute::BriefQuestions;
                        ConversationalNode::End
                    }
                    None => ConversationalNode::BriefGenerate,
                }
            }
            ConversationalNode::BriefGenerate => {
                let conversation = turn.conversation(config.history_window);
                let jurisdiction = turn.session.jurisdiction;
                let brief = brief_flow::generate(ctx, &conversation, jurisdiction, &mut turn.session.brief).await;
                if ctx.provider_outage() {
                    return Err(TurnError::ProviderOutage);
                }
                if brief.incomplete {
                    turn.flag(TurnFlag::BriefIncomplete);
                }
                if brief.degraded {
                    turn.flag(TurnFlag::Degraded);
                }
                turn.reply = brief.to_markdown();
                turn.route = TurnRoute::Brief;
                turn.artifact = Some(TurnArtifact::LawyerBrief(Box::new(brief)));
                ConversationalNode::End
            }
            ConversationalNode::End => break,
        };
    }
    Ok(())
}
