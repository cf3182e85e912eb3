//! Stage 6: risk analysis.

use serde::{Deserialize, Serialize};

use crate::model::{ModelRequest, ModelTier};

use super::{Degradation, PipelineState, StageContext, StageInput, StageName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    pub description: String,
    pub severity: RiskLevel,
    #[serde(default)]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskArtifact {
    pub overall: RiskLevel,
    pub risks: Vec<RiskItem>,
    /// Limitation periods and deadlines that may apply.
    pub time_limits: Vec<String>,
    /// Arguments the other side is likely to run.
    pub counterarguments: Vec<String>,
    pub degraded: bool,
}

#[derive(Debug, Deserialize)]
struct RiskOutput {
    #[serde(default)]
    risks: Vec<RiskItem>,
    #[serde(default)]
    time_limits: Vec<String>,
    #[serde(default)]
    counterarguments: Vec<String>,
}

const PROMPT: &str = "Analyse the risks in the user's position. Using the issues, facts, element \
assessment and legislation provided, list concrete risks with a severity (low, medium, high) and a \
mitigation, any time limits or limitation periods that may apply, and the arguments the other side \
is likely to raise. Be honest about weaknesses.";

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "risks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "description": { "type": "string" },
                        "severity": { "type": "string", "enum": ["low", "medium", "high"] },
                        "mitigation": { "type": ["string", "null"] }
                    },
                    "required": ["description", "severity", "mitigation"],
                    "additionalProperties": false
                }
            },
            "time_limits": { "type": "array", "items": { "type": "string" } },
            "counterarguments": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["risks", "time_limits", "counterarguments"],
        "additionalProperties": false
    })
}

/// Highest severity among `risks`; `Low` when there are none.
pub fn overall_of(risks: &[RiskItem]) -> RiskLevel {
    risks
        .iter()
        .map(|r| r.severity)
        .filter(|s| *s != RiskLevel::Unknown)
        .max()
        .unwrap_or(RiskLevel::Low)
}

fn context_for(state: &PipelineState) -> String {
    let parts = serde_json::json!({
        "issue": state.issue,
        "facts": state.facts,
        "elements": state.elements,
        "legislation": state.precedent.as_ref().map(|p| &p.lookup.passages),
    });
    serde_json::to_string_pretty(&parts).unwrap_or_default()
}

pub async fn run(
    ctx: &StageContext,
    _input: &StageInput,
    state: &PipelineState,
) -> (RiskArtifact, Option<Degradation>) {
    let req = ModelRequest::silent("risk_analysis", ModelTier::Chat, PROMPT, &context_for(state));

    match ctx.structured::<RiskOutput>(&req, &schema()).await {
        Ok(out) => {
            let overall = overall_of(&out.risks);
            tracing::info!(risks = out.risks.len(), ?overall, "risks analysed");
            (
                RiskArtifact {
                    overall,
                    risks: out.risks,
                    time_limits: out.time_limits,
                    counterarguments: out.counterarguments,
                    degraded: false,
                },
                None,
            )
        }
        Err(e) => (
            RiskArtifact {
                overall: RiskLevel::Unknown,
                risks: Vec::new(),
                time_limits: Vec::new(),
                counterarguments: Vec::new(),
                degraded: true,
            },
            Some(Degradation::from_model(StageName::RiskAnalysis, &e)),
        ),
    }
}
