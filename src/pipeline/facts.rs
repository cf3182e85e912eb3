//! Stage 3: fact structuring.

use serde::{Deserialize, Serialize};

use crate::model::{ModelRequest, ModelTier};
use crate::tools::analyze_document;

use super::{excerpt, Degradation, StageContext, StageInput, StageName};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Free-form date as the user gave it ("last March", "2024-01-03").
    #[serde(default)]
    pub date: Option<String>,
    pub event: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub role: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub description: String,
    /// The user says they have it.
    #[serde(default)]
    pub held: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactsArtifact {
    #[serde(default)]
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default)]
    pub parties: Vec<Party>,
    #[serde(default)]
    pub evidence: Vec<EvidenceItem>,
    /// Facts a lawyer would need that are not yet known.
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub degraded: bool,
}

const PROMPT: &str = "Organise the facts of the user's legal situation. List key facts as \
short statements, a timeline of dated events in order, the parties by role (tenant, landlord, \
employer), evidence mentioned and whether the user holds it, and gaps: facts a lawyer would need \
that are still unknown. Do not invent facts.";

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "key_facts": { "type": "array", "items": { "type": "string" } },
            "timeline": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "date": { "type": ["string", "null"] },
                        "event": { "type": "string" }
                    },
                    "required": ["date", "event"],
                    "additionalProperties": false
                }
            },
            "parties": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "role": { "type": "string" },
                        "name": { "type": ["string", "null"] }
                    },
                    "required": ["role", "name"],
                    "additionalProperties": false
                }
            },
            "evidence": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "description": { "type": "string" },
                        "held": { "type": "boolean" }
                    },
                    "required": ["description", "held"],
                    "additionalProperties": false
                }
            },
            "gaps": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["key_facts", "timeline", "parties", "evidence", "gaps"],
        "additionalProperties": false
    })
}

pub async fn run(ctx: &StageContext, input: &StageInput) -> (FactsArtifact, Option<Degradation>) {
    let mut user = input.transcript();
    if let Some(doc) = &input.attachment {
        if let Ok(framed) = analyze_document(doc, "general", input.declared_jurisdiction) {
            user.push_str("\n\n");
            user.push_str(&framed);
        }
    }
    let req = ModelRequest::silent("fact_structuring", ModelTier::Chat, PROMPT, &user);

    match ctx.structured::<FactsArtifact>(&req, &schema()).await {
        Ok(mut facts) => {
            facts.degraded = false;
            tracing::info!(
                facts = facts.key_facts.len(),
                events = facts.timeline.len(),
                gaps = facts.gaps.len(),
                "facts structured"
            );
            (facts, None)
        }
        Err(e) => (
            FactsArtifact {
                key_facts: vec![excerpt(&input.message, 300)],
                gaps: vec!["Facts could not be organised automatically".to_string()],
                degraded: true,
                ..Default::default()
            },
            Some(Degradation::from_model(StageName::FactStructuring, &e)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::FakeModel;
    use crate::model::ModelError;
    use crate::pipeline::tests::{ctx_with, input};

    #[tokio::test]
    async fn test_facts_parsed_with_defaults() {
        let ctx = ctx_with(FakeModel::new(|_| {
            Ok(serde_json::json!({
                "key_facts": ["Lease ended 1 March", "Bond was $2000"],
                "timeline": [{"date": "1 March", "event": "Moved out"}],
                "parties": [{"role": "landlord"}],
                "evidence": [{"description": "Exit condition report", "held": true}]
            }))
        }))
        .await;
        let (f, d) = run(&ctx, &input("bond")).await;
        assert!(d.is_none());
        assert_eq!(f.key_facts.len(), 2);
        assert_eq!(f.parties[0].name, None);
        assert!(f.gaps.is_empty());
    }

    #[tokio::test]
    async fn test_facts_degrade_keeps_message() {
        let ctx = ctx_with(FakeModel::new(|_| Err(ModelError::Fatal("bad json".into())))).await;
        let (f, d) = run(&ctx, &input("My employer fired me by text")).await;
        assert!(f.degraded);
        assert_eq!(f.key_facts, vec!["My employer fired me by text".to_string()]);
        assert!(!d.unwrap().timed_out);
    }
}
