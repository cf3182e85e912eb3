//! Lawyer brief sub-flow.
//!
//! ```text
//! BRIEF_CHECK_INFO ──complete or rounds exhausted──▶ BRIEF_GENERATE ──▶ END
//!        │
//!        └──missing info──▶ BRIEF_ASK_QUESTIONS ──▶ END (wait for the user)
//! ```
//!
//! Each user reply re-enters at `BRIEF_CHECK_INFO`. After `max_rounds`
//! question rounds the brief is generated regardless and flagged
//! incomplete.

use serde::{Deserialize, Serialize};

use auslaw_core::models::Jurisdiction;

use crate::model::{ModelRequest, ModelTier};
use crate::pipeline::brief::Urgency;
use crate::pipeline::StageContext;

/// Marker the client appends to a message to request a brief.
pub const BRIEF_TRIGGER: &str = "[GENERATE_BRIEF]";

/// Questions asked per round are capped at this.
pub const MAX_QUESTIONS_PER_ROUND: usize = 3;

const MIN_CONFIDENCE: f64 = 0.6;

/// What a lawyer needs to know first, per legal area.
pub const REQUIRED_INFO_BY_AREA: &[(&str, &[&str])] = &[
    (
        "tenancy",
        &[
            "type of tenancy (residential, commercial)",
            "lease status (signed, verbal, expired)",
            "issue (rent, repairs, eviction, bond, etc.)",
            "other party (landlord, agent, roommate)",
        ],
    ),
    (
        "employment",
        &[
            "employment type (full-time, part-time, casual, contractor)",
            "issue (dismissal, wages, discrimination, injury, etc.)",
            "employer relationship (current, former, potential)",
            "length of employment if relevant",
        ],
    ),
    (
        "family",
        &[
            "relationship type (marriage, de facto, etc.)",
            "issue (separation, children, property, violence)",
            "children involved (yes/no)",
            "current living situation",
        ],
    ),
    (
        "consumer",
        &[
            "product or service involved",
            "issue (refund, warranty, scam, etc.)",
            "value of transaction",
            "business or seller involved",
        ],
    ),
    (
        "criminal",
        &[
            "type of matter (charged, accused, victim, witness)",
            "nature of alleged offense",
            "court involvement (yes/no, stage)",
            "representation status",
        ],
    ),
    (
        "general",
        &["nature of legal issue", "desired outcome", "any deadlines or urgency"],
    ),
];

/// Checklist for `area`, falling back to the general one.
pub fn required_info(area: &str) -> &'static [&'static str] {
    let area = area.trim().to_lowercase();
    REQUIRED_INFO_BY_AREA
        .iter()
        .find(|(a, _)| *a == area)
        .or_else(|| REQUIRED_INFO_BY_AREA.iter().find(|(a, _)| *a == "general"))
        .map(|(_, items)| *items)
        .unwrap_or(&[])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFacts {
    pub legal_area: String,
    pub situation_summary: String,
    #[serde(default)]
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub parties_involved: Vec<String>,
    #[serde(default)]
    pub timeline_events: Vec<String>,
    #[serde(default)]
    pub documents_mentioned: Vec<String>,
    #[serde(default)]
    pub user_goals: Vec<String>,
    #[serde(default)]
    pub missing_critical_info: Vec<String>,
    pub confidence: f64,
}

impl ExtractedFacts {
    /// Enough to write a useful brief.
    pub fn is_complete(&self) -> bool {
        self.confidence >= MIN_CONFIDENCE
            && self.missing_critical_info.len() <= 1
            && self.legal_area != "unknown"
            && self.key_facts.len() >= 2
    }

    /// Used when extraction fails: proceed with what we have.
    fn unavailable() -> Self {
        Self {
            legal_area: "general".to_string(),
            situation_summary: "Could not fully analyse the conversation".to_string(),
            key_facts: Vec::new(),
            parties_involved: Vec::new(),
            timeline_events: Vec::new(),
            documents_mentioned: Vec::new(),
            user_goals: Vec::new(),
            missing_critical_info: required_info("general").iter().map(|s| s.to_string()).collect(),
            confidence: 0.3,
        }
    }
}

/// Brief sub-flow progress carried in the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BriefProgress {
    /// A brief was requested and not yet generated.
    pub active: bool,
    pub questions_asked: u32,
    pub facts: Option<ExtractedFacts>,
    pub missing: Vec<String>,
    pub info_complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BriefRoute {
    Ask,
    Generate,
}

/// Generate once the info is complete or the question rounds run out.
pub fn route_brief_info(progress: &BriefProgress, max_rounds: u32) -> BriefRoute {
    if progress.info_complete || progress.questions_asked >= max_rounds {
        BriefRoute::Generate
    } else {
        BriefRoute::Ask
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LawyerBrief {
    pub executive_summary: String,
    pub legal_area: String,
    pub jurisdiction: String,
    pub situation_narrative: String,
    #[serde(default)]
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub fact_gaps: Vec<String>,
    #[serde(default)]
    pub parties: Vec<String>,
    #[serde(default)]
    pub documents_evidence: Vec<String>,
    #[serde(default)]
    pub client_goals: Vec<String>,
    #[serde(default)]
    pub potential_issues: Vec<String>,
    #[serde(default)]
    pub questions_for_lawyer: Vec<String>,
    pub urgency_level: Urgency,
    #[serde(default)]
    pub urgency_reason: String,
    /// Generated after the question rounds ran out without complete info.
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default)]
    pub degraded: bool,
}

const FACT_EXTRACTION_PROMPT: &str = "You are reading a conversation between a member of the \
public and an Australian legal assistant in order to prepare a brief for a lawyer. Extract the legal \
area (tenancy, employment, family, consumer, criminal, general, or unknown), a short summary, the key \
facts, parties, timeline, documents or evidence mentioned, and what the person wants. At minimum a \
lawyer needs the nature of the problem, the person's role in it, the outcome they want and any \
deadlines; list anything of that kind still unclear as missing_critical_info. Rate your confidence \
in understanding the situation from 0 to 1. Do not invent facts.";

const FOLLOW_UP_PROMPT: &str = "Before preparing a lawyer brief you need to fill some gaps. Ask \
one to three short, friendly questions that cover the most important missing information. Do not \
ask about details that will not change the brief.";

const BRIEF_PROMPT: &str = "Write a lawyer brief from the conversation and the extracted facts. \
It must let a lawyer understand the matter without reading the conversation: summary, narrative, \
key facts, gaps, parties, documents, goals, likely legal issues and questions the person should \
ask. Urgency is urgent for deadlines within 14 days, expiring limitation periods, risk of eviction \
or termination, pending criminal charges or safety concerns; standard for active disputes or \
deadlines within three months; low_priority otherwise.";

fn facts_schema() -> serde_json::Value {
    let list = serde_json::json!({ "type": "array", "items": { "type": "string" } });
    serde_json::json!({
        "type": "object",
        "properties": {
            "legal_area": { "type": "string" },
            "situation_summary": { "type": "string" },
            "key_facts": list,
            "parties_involved": list,
            "timeline_events": list,
            "documents_mentioned": list,
            "user_goals": list,
            "missing_critical_info": list,
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
        },
        "required": [
            "legal_area", "situation_summary", "key_facts", "parties_involved",
            "timeline_events", "documents_mentioned", "user_goals",
            "missing_critical_info", "confidence"
        ],
        "additionalProperties": false
    })
}

fn questions_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "questions": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 1,
                "maxItems": MAX_QUESTIONS_PER_ROUND
            }
        },
        "required": ["questions"],
        "additionalProperties": false
    })
}

fn brief_schema() -> serde_json::Value {
    let list = serde_json::json!({ "type": "array", "items": { "type": "string" } });
    serde_json::json!({
        "type": "object",
        "properties": {
            "executive_summary": { "type": "string" },
            "legal_area": { "type": "string" },
            "jurisdiction": { "type": "string" },
            "situation_narrative": { "type": "string" },
            "key_facts": list,
            "fact_gaps": list,
            "parties": list,
            "documents_evidence": list,
            "client_goals": list,
            "potential_issues": list,
            "questions_for_lawyer": list,
            "urgency_level": { "type": "string", "enum": ["urgent", "standard", "low_priority"] },
            "urgency_reason": { "type": "string" }
        },
        "required": [
            "executive_summary", "legal_area", "jurisdiction", "situation_narrative",
            "key_facts", "fact_gaps", "parties", "documents_evidence", "client_goals",
            "potential_issues", "questions_for_lawyer", "urgency_level", "urgency_reason"
        ],
        "additionalProperties": false
    })
}

fn state_label(jurisdiction: Option<Jurisdiction>) -> String {
    jurisdiction
        .map(|j| j.to_string())
        .unwrap_or_else(|| "Not specified".to_string())
}

/// BRIEF_CHECK_INFO: extract facts and decide whether they are enough.
pub async fn check_info(
    ctx: &StageContext,
    conversation: &str,
    jurisdiction: Option<Jurisdiction>,
    progress: &mut BriefProgress,
) {
    let user = format!(
        "User's state/territory: {}\n\nConversation:\n{}",
        state_label(jurisdiction),
        conversation
    );
    let req = ModelRequest::silent("brief_fact_extraction", ModelTier::Chat, FACT_EXTRACTION_PROMPT, &user);

    match ctx.structured::<ExtractedFacts>(&req, &facts_schema()).await {
        Ok(mut facts) => {
            facts.legal_area = facts.legal_area.trim().to_lowercase();
            facts.confidence = facts.confidence.clamp(0.0, 1.0);
            let complete = facts.is_complete();
            let missing = if facts.missing_critical_info.is_empty() && !complete {
                required_info(&facts.legal_area).iter().map(|s| s.to_string()).collect()
            } else {
                facts.missing_critical_info.clone()
            };
            tracing::info!(
                area = %facts.legal_area,
                confidence = facts.confidence,
                missing = missing.len(),
                complete,
                "brief facts extracted"
            );
            progress.missing = missing;
            progress.info_complete = complete;
            progress.facts = Some(facts);
        }
        Err(e) => {
            tracing::error!(error = %e, "brief fact extraction failed");
            let facts = ExtractedFacts::unavailable();
            progress.missing = facts.missing_critical_info.clone();
            progress.info_complete = true;
            progress.facts = Some(facts);
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuestionsOutput {
    questions: Vec<String>,
}

/// BRIEF_ASK_QUESTIONS: one round of follow-up questions. `None` when
/// question generation failed and the flow should generate instead.
pub async fn ask_questions(ctx: &StageContext, progress: &mut BriefProgress) -> Option<String> {
    let summary = progress
        .facts
        .as_ref()
        .map(|f| f.situation_summary.clone())
        .unwrap_or_else(|| "User needs legal help".to_string());
    let missing: Vec<String> = progress.missing.iter().take(5).map(|m| format!("- {}", m)).collect();
    let user = format!("What we know:\n{}\n\nMissing information:\n{}", summary, missing.join("\n"));
    let req = ModelRequest::silent("brief_questions", ModelTier::Classifier, FOLLOW_UP_PROMPT, &user);

    match ctx.structured::<QuestionsOutput>(&req, &questions_schema()).await {
        Ok(out) => {
            let questions: Vec<String> = out
                .questions
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .take(MAX_QUESTIONS_PER_ROUND)
                .collect();
            if questions.is_empty() {
                progress.info_complete = true;
                return None;
            }
            progress.questions_asked += 1;
            tracing::info!(round = progress.questions_asked, questions = questions.len(), "brief questions asked");
            Some(questions_message(&questions))
        }
        Err(e) => {
            tracing::error!(error = %e, "brief question generation failed");
            progress.info_complete = true;
            None
        }
    }
}

pub fn questions_message(questions: &[String]) -> String {
    let mut text = String::from("Before I prepare your lawyer brief, I need a bit more information:\n\n");
    for (i, q) in questions.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, q));
    }
    text
}

fn facts_prompt(facts: &ExtractedFacts) -> String {
    let mut parts = vec![
        format!("Legal area: {}", facts.legal_area),
        format!("Summary: {}", facts.situation_summary),
    ];
    let sections: [(&str, &Vec<String>); 5] = [
        ("Key facts", &facts.key_facts),
        ("Parties", &facts.parties_involved),
        ("Timeline", &facts.timeline_events),
        ("Documents", &facts.documents_mentioned),
        ("Goals", &facts.user_goals),
    ];
    for (label, items) in sections {
        if !items.is_empty() {
            parts.push(format!("{}:", label));
            parts.extend(items.iter().map(|i| format!("- {}", i)));
        }
    }
    parts.join("\n")
}

/// Brief built straight from the extracted facts.
fn assemble_from_facts(facts: &ExtractedFacts, gaps: &[String], jurisdiction: Option<Jurisdiction>) -> LawyerBrief {
    LawyerBrief {
        executive_summary: facts.situation_summary.clone(),
        legal_area: facts.legal_area.clone(),
        jurisdiction: state_label(jurisdiction),
        situation_narrative: facts.situation_summary.clone(),
        key_facts: facts.key_facts.clone(),
        fact_gaps: gaps.to_vec(),
        parties: facts.parties_involved.clone(),
        documents_evidence: facts.documents_mentioned.clone(),
        client_goals: facts.user_goals.clone(),
        potential_issues: Vec::new(),
        questions_for_lawyer: vec![
            "What are my options and what would each cost?".to_string(),
            "Are there any deadlines I need to meet?".to_string(),
        ],
        urgency_level: Urgency::Standard,
        urgency_reason: "Urgency could not be assessed automatically.".to_string(),
        incomplete: false,
        degraded: true,
    }
}

/// BRIEF_GENERATE: write the brief and close the sub-flow.
pub async fn generate(
    ctx: &StageContext,
    conversation: &str,
    jurisdiction: Option<Jurisdiction>,
    progress: &mut BriefProgress,
) -> LawyerBrief {
    let facts = progress.facts.clone().unwrap_or_else(ExtractedFacts::unavailable);
    let incomplete = !facts.is_complete();
    let user = format!(
        "User's state/territory: {}\n\nConversation:\n{}\n\nExtracted facts:\n{}",
        state_label(jurisdiction),
        conversation,
        facts_prompt(&facts)
    );
    let req = ModelRequest::silent("brief_generation", ModelTier::Chat, BRIEF_PROMPT, &user);

    let mut brief = match ctx.structured::<LawyerBrief>(&req, &brief_schema()).await {
        Ok(mut brief) => {
            brief.degraded = false;
            if brief.jurisdiction.trim().is_empty() {
                brief.jurisdiction = state_label(jurisdiction);
            }
            brief
        }
        Err(e) => {
            tracing::error!(error = %e, "brief generation failed, assembling from facts");
            assemble_from_facts(&facts, &progress.missing, jurisdiction)
        }
    };
    brief.incomplete = incomplete;
    if incomplete {
        for gap in &progress.missing {
            if !brief.fact_gaps.contains(gap) {
                brief.fact_gaps.push(gap.clone());
            }
        }
    }
    tracing::info!(
        area = %brief.legal_area,
        urgency = brief.urgency_level.as_str(),
        incomplete,
        rounds = progress.questions_asked,
        "lawyer brief generated"
    );
    *progress = BriefProgress::default();
    brief
}

fn push_list(lines: &mut Vec<String>, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    lines.push(format!("## {}", heading));
    lines.extend(items.iter().map(|i| format!("- {}", i)));
    lines.push(String::new());
}

fn title_case(s: &str) -> String {
    s.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

impl LawyerBrief {
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            "# Lawyer Brief".to_string(),
            String::new(),
            "## Summary".to_string(),
            self.executive_summary.clone(),
            String::new(),
            format!("**Urgency:** {}", title_case(self.urgency_level.as_str())),
        ];
        if !self.urgency_reason.is_empty() {
            lines.push(format!("*{}*", self.urgency_reason));
        }
        lines.push(String::new());
        lines.push(format!("**Legal Area:** {}", title_case(&self.legal_area)));
        lines.push(format!("**Jurisdiction:** {}", self.jurisdiction));
        lines.push(String::new());
        if self.incomplete {
            lines.push(
                "> Some details are still missing. The lawyer will likely ask about the items under \
                 \"Information to Gather\"."
                    .to_string(),
            );
            lines.push(String::new());
        }
        lines.push("---".to_string());
        lines.push(String::new());
        lines.push("## Your Situation".to_string());
        lines.push(self.situation_narrative.clone());
        lines.push(String::new());

        push_list(&mut lines, "Key Facts", &self.key_facts);
        if !self.parties.is_empty() {
            lines.push(format!("**Parties Involved:** {}", self.parties.join(", ")));
            lines.push(String::new());
        }
        push_list(&mut lines, "Documents & Evidence", &self.documents_evidence);
        push_list(&mut lines, "Your Goals", &self.client_goals);
        push_list(&mut lines, "Information to Gather", &self.fact_gaps);
        push_list(&mut lines, "Potential Legal Issues", &self.potential_issues);
        push_list(&mut lines, "Questions for Your Lawyer", &self.questions_for_lawyer);

        lines.push("---".to_string());
        lines.push(String::new());
        lines.push("*This brief summarises our conversation. Share it with a lawyer for professional advice.*".to_string());
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::FakeModel;
    use crate::model::ModelError;
    use crate::pipeline::tests::ctx_with;

    fn facts(confidence: f64, key_facts: usize, missing: usize) -> ExtractedFacts {
        ExtractedFacts {
            legal_area: "tenancy".into(),
            situation_summary: "Bond withheld".into(),
            key_facts: (0..key_facts).map(|i| format!("fact {}", i)).collect(),
            parties_involved: vec![],
            timeline_events: vec![],
            documents_mentioned: vec![],
            user_goals: vec![],
            missing_critical_info: (0..missing).map(|i| format!("gap {}", i)).collect(),
            confidence,
        }
    }

    #[test]
    fn test_completeness_rule() {
        assert!(facts(0.6, 2, 1).is_complete());
        assert!(!facts(0.59, 2, 0).is_complete());
        assert!(!facts(0.9, 1, 0).is_complete());
        assert!(!facts(0.9, 3, 2).is_complete());
        let mut unknown = facts(0.9, 3, 0);
        unknown.legal_area = "unknown".into();
        assert!(!unknown.is_complete());
    }

    #[test]
    fn test_route_brief_info() {
        let mut p = BriefProgress::default();
        assert_eq!(route_brief_info(&p, 3), BriefRoute::Ask);
        p.questions_asked = 3;
        assert_eq!(route_brief_info(&p, 3), BriefRoute::Generate);
        p.questions_asked = 0;
        p.info_complete = true;
        assert_eq!(route_brief_info(&p, 3), BriefRoute::Generate);
    }

    #[test]
    fn test_required_info_falls_back_to_general() {
        assert_eq!(required_info("tenancy").len(), 4);
        assert_eq!(required_info("maritime"), required_info("general"));
    }

    #[tokio::test]
    async fn test_extraction_failure_proceeds() {
        let ctx = ctx_with(FakeModel::new(|_| Err(ModelError::Fatal("bad".into())))).await;
        let mut p = BriefProgress::default();
        check_info(&ctx, "User: help", None, &mut p).await;
        assert!(p.info_complete);
        let f = p.facts.as_ref().unwrap();
        assert_eq!(f.legal_area, "general");
        assert_eq!(f.confidence, 0.3);
        assert_eq!(p.missing.len(), 3);
    }

    #[tokio::test]
    async fn test_incomplete_facts_seed_missing_from_checklist() {
        let ctx = ctx_with(FakeModel::new(|_| {
            Ok(serde_json::json!({
                "legal_area": "Employment",
                "situation_summary": "Fired",
                "key_facts": ["fired"],
                "parties_involved": [], "timeline_events": [], "documents_mentioned": [],
                "user_goals": [], "missing_critical_info": [], "confidence": 0.8
            }))
        }))
        .await;
        let mut p = BriefProgress::default();
        check_info(&ctx, "User: I was fired", None, &mut p).await;
        assert!(!p.info_complete);
        assert_eq!(p.missing, required_info("employment").iter().map(|s| s.to_string()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_questions_capped_and_numbered() {
        let ctx = ctx_with(FakeModel::new(|_| {
            Ok(serde_json::json!({ "questions": ["One?", "Two?", "Three?", "Four?"] }))
        }))
        .await;
        let mut p = BriefProgress::default();
        let msg = ask_questions(&ctx, &mut p).await.unwrap();
        assert!(msg.starts_with("Before I prepare your lawyer brief"));
        assert!(msg.contains("3. Three?"));
        assert!(!msg.contains("Four"));
        assert_eq!(p.questions_asked, 1);
    }

    #[tokio::test]
    async fn test_generate_fallback_flags_incomplete_and_resets() {
        let ctx = ctx_with(FakeModel::new(|_| Err(ModelError::Transient("503".into())))).await;
        let mut p = BriefProgress {
            active: true,
            questions_asked: 3,
            facts: Some(facts(0.4, 1, 2)),
            missing: vec!["gap 0".into(), "gap 1".into()],
            info_complete: false,
        };
        let brief = generate(&ctx, "User: bond", Some(Jurisdiction::Nsw), &mut p).await;
        assert!(brief.incomplete);
        assert!(brief.degraded);
        assert_eq!(brief.jurisdiction, "NSW");
        assert_eq!(brief.fact_gaps.len(), 2);
        assert!(!p.active);
        assert_eq!(p.questions_asked, 0);

        let md = brief.to_markdown();
        assert!(md.starts_with("# Lawyer Brief"));
        assert!(md.contains("**Urgency:** Standard"));
        assert!(md.contains("## Information to Gather"));
    }
}
