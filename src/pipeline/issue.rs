//! Stage 1: issue identification.

use serde::{Deserialize, Serialize};

use crate::model::{ModelRequest, ModelTier};
use crate::tools::analyze_document;

use super::{excerpt, Degradation, StageContext, StageInput, StageName};

pub const LEGAL_AREAS: [&str; 6] = ["tenancy", "employment", "family", "consumer", "criminal", "general"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalIssue {
    pub area: String,
    #[serde(default)]
    pub sub_category: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueArtifact {
    pub primary: LegalIssue,
    pub secondary: Vec<LegalIssue>,
    /// Model estimate in `[0, 1]`; absent when degraded.
    pub complexity_score: Option<f64>,
    pub degraded: bool,
}

#[derive(Debug, Deserialize)]
struct IssueOutput {
    primary_issue: LegalIssue,
    #[serde(default)]
    secondary_issues: Vec<LegalIssue>,
    #[serde(default)]
    complexity_score: Option<f64>,
}

const PROMPT: &str = "Identify the legal issues in the user's situation under Australian law. \
Give the primary issue and any secondary issues, each with an area (tenancy, employment, family, \
consumer, criminal, general), a snake_case sub_category such as bond_refund or unfair_dismissal, \
and a one-sentence description. Estimate complexity_score from 0 (single simple question) to 1 \
(many interacting issues).";

fn schema() -> serde_json::Value {
    let issue = serde_json::json!({
        "type": "object",
        "properties": {
            "area": { "type": "string", "enum": LEGAL_AREAS },
            "sub_category": { "type": "string" },
            "description": { "type": "string" }
        },
        "required": ["area", "sub_category", "description"],
        "additionalProperties": false
    });
    serde_json::json!({
        "type": "object",
        "properties": {
            "primary_issue": issue,
            "secondary_issues": { "type": "array", "items": issue },
            "complexity_score": { "type": "number" }
        },
        "required": ["primary_issue", "secondary_issues", "complexity_score"],
        "additionalProperties": false
    })
}

fn normalise(mut issue: LegalIssue) -> LegalIssue {
    issue.area = issue.area.trim().to_lowercase();
    if !LEGAL_AREAS.contains(&issue.area.as_str()) {
        issue.area = "general".to_string();
    }
    issue.sub_category = issue.sub_category.trim().to_lowercase().replace([' ', '-'], "_");
    issue
}

pub async fn run(ctx: &StageContext, input: &StageInput) -> (IssueArtifact, Option<Degradation>) {
    let mut user = input.transcript();
    if let Some(doc) = &input.attachment {
        if let Ok(framed) = analyze_document(doc, "general", input.declared_jurisdiction) {
            user.push_str("\n\n");
            user.push_str(&framed);
        }
    }
    let req = ModelRequest::silent("issue_identification", ModelTier::Chat, PROMPT, &user);

    match ctx.structured::<IssueOutput>(&req, &schema()).await {
        Ok(out) => {
            let artifact = IssueArtifact {
                primary: normalise(out.primary_issue),
                secondary: out.secondary_issues.into_iter().map(normalise).collect(),
                complexity_score: out.complexity_score.map(|s| s.clamp(0.0, 1.0)),
                degraded: false,
            };
            tracing::info!(
                area = %artifact.primary.area,
                sub_category = %artifact.primary.sub_category,
                secondary = artifact.secondary.len(),
                "issues identified"
            );
            (artifact, None)
        }
        Err(e) => (
            IssueArtifact {
                primary: LegalIssue {
                    area: "general".to_string(),
                    sub_category: String::new(),
                    description: excerpt(&input.message, 200),
                },
                secondary: Vec::new(),
                complexity_score: None,
                degraded: true,
            },
            Some(Degradation::from_model(StageName::IssueIdentification, &e)),
        ),
    }
}
