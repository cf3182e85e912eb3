//! Node implementations shared by both graphs.

use crate::config::OrchestratorConfig;
use crate::model::{with_timeout, ChatMessage, ModelRequest};
use crate::pipeline::StageContext;
use crate::resources::escalation_message;
use crate::safety::{self, SafetyAssessment, SafetyContext};
use crate::tools::{analyze_document, lookup_law, LawLookup, LawPassage};

use super::{Turn, TurnArtifact, TurnError, TurnFlag, TurnRoute};

/// Run the safety classifier. A classifier failure aborts the turn.
pub(crate) async fn safety_gate(
    ctx: &StageContext,
    config: &OrchestratorConfig,
    turn: &mut Turn,
) -> Result<SafetyAssessment, TurnError> {
    let safety_ctx = SafetyContext {
        is_first_message: turn.is_first_message(),
        short_followup_chars: config.short_followup_chars,
        jurisdiction: turn.session.jurisdiction,
    };
    let assessment = with_timeout(
        ctx.stage_timeout,
        safety::assess(ctx.model.as_ref(), &turn.message, &safety_ctx),
    )
    .await
    .map_err(TurnError::SafetyGateFailed)?;

    if assessment.uncertain {
        turn.flag(TurnFlag::ClassificationUncertain);
    }
    tracing::info!(
        category = ?assessment.category,
        source = ?assessment.source,
        uncertain = assessment.uncertain,
        "safety gate"
    );
    turn.safety = Some(assessment.clone());
    Ok(assessment)
}

/// ESCALATE / ESCALATION_RESPONSE: crisis resources and nothing else.
pub(crate) fn escalate(turn: &mut Turn, assessment: &SafetyAssessment) {
    turn.reply = escalation_message(&assessment.resources);
    turn.route = TurnRoute::Escalate;
    if let Some(category) = assessment.category {
        turn.artifact = Some(TurnArtifact::Escalation {
            category,
            resources: assessment.resources.clone(),
        });
    }
}

const CHAT_PROMPT: &str = "You are an Australian legal assistant having a natural, helpful \
conversation. Use plain language and answer the immediate question concisely. Base every \
statement about the law on the legislation passages below and cite them by name; if none are \
relevant, say you couldn't find specific legislation. Never invent a law, section or case. If \
the user's state or territory is not specified, ask them to select it, because laws differ \
between states. If something needs a lawyer, say so gently. This is general information, not \
legal advice.";

pub(crate) fn passages_block(lookup: &LawLookup) -> String {
    if lookup.passages.is_empty() {
        return lookup.empty_message();
    }
    let mut out: Vec<String> = lookup
        .passages
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let url = p.source_url.as_deref().unwrap_or("");
            format!("[{}] {} ({}) {}\n{}", i + 1, p.citation, p.jurisdiction, url, p.content)
        })
        .collect();
    if let Some(note) = &lookup.note {
        out.push(format!("Note: {}", note));
    }
    out.join("\n\n")
}

pub(crate) fn unique_citations(passages: &[LawPassage]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for p in passages {
        if !out.contains(&p.citation) {
            out.push(p.citation.clone());
        }
    }
    out
}

/// Reply used when the chat model cannot be reached.
fn chat_fallback(lookup: &LawLookup) -> String {
    if lookup.passages.is_empty() {
        return format!(
            "Sorry, I couldn't put together an answer just now. {}",
            lookup.empty_message()
        );
    }
    let mut reply = String::from(
        "Sorry, I couldn't put together a full answer just now. These sections of legislation look relevant:\n\n",
    );
    for c in unique_citations(&lookup.passages) {
        reply.push_str(&format!("- {}\n", c));
    }
    if let Some(note) = &lookup.note {
        reply.push_str(&format!("\n{}\n", note));
    }
    reply
}

/// CHAT_RESPONSE: always consult the legislation before answering.
pub(crate) async fn chat_response(
    ctx: &StageContext,
    config: &OrchestratorConfig,
    turn: &mut Turn,
) -> Result<(), TurnError> {
    let query = if turn.message.is_empty() {
        turn.attachment.clone().unwrap_or_default()
    } else {
        turn.message.clone()
    };
    let lookup = match lookup_law(&ctx.retriever, &query, turn.session.jurisdiction).await {
        Ok(lookup) => lookup,
        Err(e) => return Err(TurnError::InvalidInput(e.to_string())),
    };
    if lookup.degraded {
        turn.flag(TurnFlag::Degraded);
    }

    let state = turn
        .session
        .jurisdiction
        .map(|j| j.to_string())
        .unwrap_or_else(|| "Not specified".to_string());
    let system = format!(
        "{}\n\nUser's state/territory: {}\n\nLegislation passages:\n{}",
        CHAT_PROMPT,
        state,
        passages_block(&lookup)
    );

    let mut user = turn.message.clone();
    if let Some(doc) = &turn.attachment {
        match analyze_document(doc, "general", turn.session.jurisdiction) {
            Ok(framed) => {
                user.push_str("\n\n");
                user.push_str(&framed);
            }
            Err(e) => tracing::warn!(error = %e, "attachment not analysed"),
        }
    }

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(turn.session.window(config.history_window).iter().cloned());
    messages.push(ChatMessage::user(user));
    let req = ModelRequest::visible("chat_response", messages);

    turn.reply = match ctx.complete(&req).await {
        Ok(text) => text,
        Err(e) => {
            if ctx.provider_outage() {
                return Err(TurnError::ProviderOutage);
            }
            if matches!(e, crate::model::ModelError::Timeout(_)) {
                turn.flag(TurnFlag::ExternalTimeout);
            }
            tracing::warn!(error = %e, "chat response failed, using fallback");
            turn.flag(TurnFlag::Degraded);
            chat_fallback(&lookup)
        }
    };
    turn.citations = unique_citations(&lookup.passages);
    turn.route = TurnRoute::Chat;
    Ok(())
}
