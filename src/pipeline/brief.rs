//! Stage 8: escalation brief assembly.
//!
//! Everything a lawyer needs comes from earlier artifacts; the model only
//! writes the executive narrative and the open questions. When that call
//! fails the narrative is assembled from the artifacts directly.

use serde::{Deserialize, Serialize};

use auslaw_core::models::Jurisdiction;

use crate::model::{ModelRequest, ModelTier};

use super::facts::{EvidenceItem, Party, TimelineEvent};
use super::risk::RiskLevel;
use super::{excerpt, Degradation, PipelineState, StageContext, StageInput, StageName, Viability};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Urgent,
    Standard,
    LowPriority,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Urgent => "urgent",
            Urgency::Standard => "standard",
            Urgency::LowPriority => "low_priority",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Urgency::Urgent => "URGENT",
            Urgency::Standard => "Standard",
            Urgency::LowPriority => "Low priority",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationBrief {
    pub executive_summary: String,
    pub legal_area: String,
    pub jurisdiction: Jurisdiction,
    pub claim_type: Option<String>,
    pub viability: Option<Viability>,
    pub key_facts: Vec<String>,
    pub fact_timeline: Vec<TimelineEvent>,
    pub parties: Vec<Party>,
    pub evidence_inventory: Vec<EvidenceItem>,
    pub risk_summary: Vec<String>,
    pub time_limits: Vec<String>,
    pub recommended_strategy: Option<String>,
    pub open_questions: Vec<String>,
    pub citations: Vec<String>,
    pub urgency: Urgency,
    pub degraded: bool,
}

#[derive(Debug, Deserialize)]
struct BriefOutput {
    executive_summary: String,
    #[serde(default)]
    open_questions: Vec<String>,
}

const PROMPT: &str = "Write the executive summary of a brief that a member of the public will \
hand to their lawyer. Three to five sentences, neutral and factual, covering who is involved, what \
happened and what the person wants. Then list the questions the person should ask their lawyer. \
Use only the analysis provided.";

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "executive_summary": { "type": "string" },
            "open_questions": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["executive_summary", "open_questions"],
        "additionalProperties": false
    })
}

/// Urgent when a high risk or a time limit is on file.
pub fn urgency_of(state: &PipelineState) -> Urgency {
    match &state.risk {
        Some(r) if r.overall == RiskLevel::High || !r.time_limits.is_empty() => Urgency::Urgent,
        Some(r) if r.overall == RiskLevel::Low && r.risks.is_empty() && !r.degraded => Urgency::LowPriority,
        _ => Urgency::Standard,
    }
}

fn fallback_summary(input: &StageInput, state: &PipelineState) -> String {
    let mut parts = Vec::new();
    if let Some(issue) = &state.issue {
        parts.push(format!(
            "This is a {} matter: {}.",
            issue.primary.area,
            issue.primary.description.trim_end_matches('.')
        ));
    } else {
        parts.push(format!("The person wrote: \"{}\"", excerpt(&input.message, 300)));
    }
    if let Some(e) = &state.elements {
        parts.push(format!("The likely claim is: {}.", e.claim_type));
    }
    if let Some(s) = &state.strategy {
        if let Some(rec) = &s.recommended {
            parts.push(format!("Suggested first step: {}.", rec));
        }
    }
    parts.join(" ")
}

fn fallback_questions(state: &PipelineState) -> Vec<String> {
    let mut out: Vec<String> = state
        .facts
        .as_ref()
        .map(|f| f.gaps.iter().map(|g| format!("How does this affect my case: {}?", g)).collect())
        .unwrap_or_default();
    out.push("What are my options and what would each cost?".to_string());
    out.push("Are there any deadlines I need to meet?".to_string());
    out
}

fn citations_of(state: &PipelineState) -> Vec<String> {
    let mut out = state.precedent.as_ref().map(|p| p.citations()).unwrap_or_default();
    if let Some(s) = &state.strategy {
        for c in s.citations() {
            if !out.contains(&c) {
                out.push(c);
            }
        }
    }
    out
}

/// Assemble the brief from artifacts, with the narrative supplied.
fn assemble(state: &PipelineState, summary: String, questions: Vec<String>, degraded: bool) -> EscalationBrief {
    let facts = state.facts.clone().unwrap_or_default();
    EscalationBrief {
        executive_summary: summary,
        legal_area: state
            .issue
            .as_ref()
            .map(|i| i.primary.area.clone())
            .unwrap_or_else(|| "general".to_string()),
        jurisdiction: state.resolved_jurisdiction(),
        claim_type: state.elements.as_ref().map(|e| e.claim_type.clone()),
        viability: state.elements.as_ref().map(|e| e.viability),
        key_facts: facts.key_facts,
        fact_timeline: facts.timeline,
        parties: facts.parties,
        evidence_inventory: facts.evidence,
        risk_summary: state
            .risk
            .as_ref()
            .map(|r| {
                r.risks
                    .iter()
                    .map(|i| format!("{} ({})", i.description, i.severity.as_str()))
                    .collect()
            })
            .unwrap_or_default(),
        time_limits: state.risk.as_ref().map(|r| r.time_limits.clone()).unwrap_or_default(),
        recommended_strategy: state.strategy.as_ref().and_then(|s| s.recommended.clone()),
        open_questions: questions,
        citations: citations_of(state),
        urgency: urgency_of(state),
        degraded,
    }
}

pub async fn run(
    ctx: &StageContext,
    input: &StageInput,
    state: &PipelineState,
) -> (EscalationBrief, Option<Degradation>) {
    let analysis = serde_json::to_string_pretty(state).unwrap_or_default();
    let user = format!("Conversation:\n{}\n\nAnalysis:\n{}", input.transcript(), analysis);
    let req = ModelRequest::silent("brief_assembly", ModelTier::Chat, PROMPT, &user);

    match ctx.structured::<BriefOutput>(&req, &schema()).await {
        Ok(out) => {
            let questions = if out.open_questions.is_empty() {
                fallback_questions(state)
            } else {
                out.open_questions
            };
            let brief = assemble(state, out.executive_summary, questions, false);
            tracing::info!(urgency = brief.urgency.as_str(), citations = brief.citations.len(), "brief assembled");
            (brief, None)
        }
        Err(e) => (
            assemble(state, fallback_summary(input, state), fallback_questions(state), true),
            Some(Degradation::from_model(StageName::BriefAssembly, &e)),
        ),
    }
}

fn bullet_list(out: &mut String, items: &[String]) {
    for item in items {
        out.push_str(&format!("- {}\n", item));
    }
    out.push('\n');
}

impl EscalationBrief {
    /// Render as Markdown for the chat reply.
    pub fn to_markdown(&self) -> String {
        let mut md = String::from("# Lawyer Brief\n\n");
        md.push_str(&format!("**Urgency:** {}\n", self.urgency.label()));
        md.push_str(&format!("**Legal Area:** {}\n", self.legal_area));
        md.push_str(&format!("**Jurisdiction:** {}\n\n", self.jurisdiction));

        md.push_str("## Summary\n\n");
        md.push_str(&self.executive_summary);
        md.push_str("\n\n");

        if let Some(claim) = &self.claim_type {
            md.push_str(&format!("## Likely Claim\n\n{}", claim));
            if let Some(v) = self.viability {
                md.push_str(&format!(" (viability: {})", v.label()));
            }
            md.push_str("\n\n");
        }

        if !self.key_facts.is_empty() {
            md.push_str("## Key Facts\n\n");
            bullet_list(&mut md, &self.key_facts);
        }

        if !self.fact_timeline.is_empty() {
            md.push_str("## Timeline\n\n");
            for ev in &self.fact_timeline {
                match &ev.date {
                    Some(d) => md.push_str(&format!("- **{}**: {}\n", d, ev.event)),
                    None => md.push_str(&format!("- {}\n", ev.event)),
                }
            }
            md.push('\n');
        }

        if !self.parties.is_empty() {
            md.push_str("## Parties\n\n");
            for p in &self.parties {
                match &p.name {
                    Some(n) => md.push_str(&format!("- {}: {}\n", p.role, n)),
                    None => md.push_str(&format!("- {}\n", p.role)),
                }
            }
            md.push('\n');
        }

        if !self.evidence_inventory.is_empty() {
            md.push_str("## Documents & Evidence\n\n");
            for e in &self.evidence_inventory {
                let mark = if e.held { "have" } else { "need" };
                md.push_str(&format!("- [{}] {}\n", mark, e.description));
            }
            md.push('\n');
        }

        if !self.risk_summary.is_empty() || !self.time_limits.is_empty() {
            md.push_str("## Risks & Time Limits\n\n");
            bullet_list(&mut md, &self.risk_summary);
            if !self.time_limits.is_empty() {
                md.pop();
                bullet_list(&mut md, &self.time_limits);
            }
        }

        if let Some(rec) = &self.recommended_strategy {
            md.push_str(&format!("## Suggested Next Step\n\n{}\n\n", rec));
        }

        if !self.citations.is_empty() {
            md.push_str("## Relevant Legislation\n\n");
            bullet_list(&mut md, &self.citations);
        }

        if !self.open_questions.is_empty() {
            md.push_str("## Questions for Your Lawyer\n\n");
            for (i, q) in self.open_questions.iter().enumerate() {
                md.push_str(&format!("{}. {}\n", i + 1, q));
            }
            md.push('\n');
        }

        md.push_str("---\n*This brief is general information, not legal advice. Bring it to your lawyer or legal aid service.*\n");
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::FakeModel;
    use crate::model::ModelError;
    use crate::pipeline::facts::FactsArtifact;
    use crate::pipeline::risk::{RiskArtifact, RiskItem};
    use crate::pipeline::tests::{ctx_with, input};

    fn state_with_risk(overall: RiskLevel, time_limits: Vec<String>) -> PipelineState {
        PipelineState {
            facts: Some(FactsArtifact {
                key_facts: vec!["Bond of $2000 paid".into()],
                gaps: vec!["date the tenancy ended".into()],
                ..Default::default()
            }),
            risk: Some(RiskArtifact {
                overall,
                risks: vec![RiskItem {
                    description: "No exit report".into(),
                    severity: overall,
                    mitigation: None,
                }],
                time_limits,
                counterarguments: vec![],
                degraded: false,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_urgency_rules() {
        assert_eq!(urgency_of(&PipelineState::default()), Urgency::Standard);
        assert_eq!(urgency_of(&state_with_risk(RiskLevel::High, vec![])), Urgency::Urgent);
        assert_eq!(
            urgency_of(&state_with_risk(RiskLevel::Low, vec!["28 days".into()])),
            Urgency::Urgent
        );
        assert_eq!(urgency_of(&state_with_risk(RiskLevel::Medium, vec![])), Urgency::Standard);
    }

    #[tokio::test]
    async fn test_brief_uses_model_narrative() {
        let ctx = ctx_with(FakeModel::new(|_| {
            Ok(serde_json::json!({
                "executive_summary": "A tenant seeks return of a bond.",
                "open_questions": ["Can I apply to the tribunal myself?"]
            }))
        }))
        .await;
        let state = state_with_risk(RiskLevel::Medium, vec![]);
        let (b, d) = run(&ctx, &input("bond"), &state).await;
        assert!(d.is_none());
        assert_eq!(b.executive_summary, "A tenant seeks return of a bond.");
        assert_eq!(b.risk_summary, vec!["No exit report (medium)".to_string()]);
        assert_eq!(b.jurisdiction, Jurisdiction::Federal);
    }

    #[tokio::test]
    async fn test_degraded_brief_still_self_contained() {
        let ctx = ctx_with(FakeModel::new(|_| Err(ModelError::Quota("429".into())))).await;
        let state = state_with_risk(RiskLevel::High, vec![]);
        let (b, d) = run(&ctx, &input("My landlord kept my bond"), &state).await;
        assert!(b.degraded);
        assert!(d.is_some());
        assert!(b.executive_summary.contains("My landlord kept my bond"));
        assert!(b.open_questions[0].contains("date the tenancy ended"));

        let md = b.to_markdown();
        assert!(md.starts_with("# Lawyer Brief"));
        assert!(md.contains("**Urgency:** URGENT"));
        assert!(md.contains("## Key Facts"));
        assert!(md.contains("## Questions for Your Lawyer"));
    }
}
