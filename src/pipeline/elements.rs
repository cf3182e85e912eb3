//! Stage 4: legal elements mapping.
//!
//! Looks up the element framework for the primary issue and asks the model
//! to judge each element against the structured facts. Viability is
//! derived from the element statuses, not asked of the model.

use serde::{Deserialize, Serialize};

use crate::legal_elements::{framework_for, ElementFramework};
use crate::model::{ModelRequest, ModelTier};

use super::{Degradation, PipelineState, StageContext, StageInput, StageName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementStatus {
    Satisfied,
    Unsatisfied,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Viability {
    Strong,
    Moderate,
    Weak,
    InsufficientInformation,
}

impl Viability {
    pub fn label(&self) -> &'static str {
        match self {
            Viability::Strong => "strong",
            Viability::Moderate => "moderate",
            Viability::Weak => "weak",
            Viability::InsufficientInformation => "insufficient information",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementAssessment {
    pub name: String,
    pub status: ElementStatus,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementsArtifact {
    /// `area/sub_category` of the framework used, if one matched.
    pub framework: Option<String>,
    pub claim_type: String,
    pub elements: Vec<ElementAssessment>,
    pub viability: Viability,
    pub relevant_legislation: Vec<String>,
    pub degraded: bool,
}

/// Overall signal from element statuses.
///
/// Any unsatisfied element makes the matter weak; all satisfied is strong;
/// at least half satisfied is moderate.
pub fn viability_of(elements: &[ElementAssessment]) -> Viability {
    if elements.is_empty() {
        return Viability::InsufficientInformation;
    }
    if elements.iter().any(|e| e.status == ElementStatus::Unsatisfied) {
        return Viability::Weak;
    }
    let satisfied = elements
        .iter()
        .filter(|e| e.status == ElementStatus::Satisfied)
        .count();
    if satisfied == elements.len() {
        Viability::Strong
    } else if satisfied * 2 >= elements.len() {
        Viability::Moderate
    } else {
        Viability::InsufficientInformation
    }
}

#[derive(Debug, Deserialize)]
struct ElementsOutput {
    #[serde(default)]
    claim_type: Option<String>,
    elements: Vec<ElementAssessment>,
}

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "claim_type": { "type": "string" },
            "elements": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "status": { "type": "string", "enum": ["satisfied", "unsatisfied", "unknown"] },
                        "reasoning": { "type": "string" }
                    },
                    "required": ["name", "status", "reasoning"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["claim_type", "elements"],
        "additionalProperties": false
    })
}

fn prompt_for(framework: Option<&ElementFramework>) -> String {
    let mut prompt = String::from(
        "Assess each legal element against the facts. Mark an element satisfied only when the \
         facts establish it, unsatisfied when the facts contradict it, and unknown otherwise. \
         Give one sentence of reasoning per element.",
    );
    match framework {
        Some(f) => {
            prompt.push_str(&format!("\n\nClaim: {}\nElements:\n", f.claim_type));
            for e in f.elements {
                prompt.push_str(&format!("- {}: {}\n", e.name, e.description));
            }
        }
        None => prompt.push_str(
            "\n\nNo standard framework applies; list the three to five elements a lawyer would \
             need to establish and assess them.",
        ),
    }
    prompt
}

/// Keep framework elements in framework order; anything the model left
/// out is `Unknown`, anything it invented is dropped.
fn align(framework: &ElementFramework, assessed: Vec<ElementAssessment>) -> Vec<ElementAssessment> {
    framework
        .elements
        .iter()
        .map(|def| {
            assessed
                .iter()
                .find(|a| a.name.eq_ignore_ascii_case(def.name))
                .cloned()
                .map(|mut a| {
                    a.name = def.name.to_string();
                    a
                })
                .unwrap_or_else(|| ElementAssessment {
                    name: def.name.to_string(),
                    status: ElementStatus::Unknown,
                    reasoning: String::new(),
                })
        })
        .collect()
}

pub async fn run(
    ctx: &StageContext,
    _input: &StageInput,
    state: &PipelineState,
) -> (ElementsArtifact, Option<Degradation>) {
    let (area, sub) = state
        .issue
        .as_ref()
        .map(|i| (i.primary.area.as_str(), i.primary.sub_category.as_str()))
        .unwrap_or(("general", ""));
    let framework = framework_for(area, sub);
    let key = framework.map(|f| format!("{}/{}", f.area, f.sub_category));
    let legislation: Vec<String> = framework
        .map(|f| f.relevant_legislation.iter().map(|s| s.to_string()).collect())
        .unwrap_or_default();

    let facts = serde_json::to_string_pretty(&state.facts).unwrap_or_default();
    let req = ModelRequest::silent(
        "elements_mapping",
        ModelTier::Chat,
        &prompt_for(framework),
        &format!("Facts:\n{}", facts),
    );

    match ctx.structured::<ElementsOutput>(&req, &schema()).await {
        Ok(out) => {
            let elements = match framework {
                Some(f) => align(f, out.elements),
                None => out.elements,
            };
            let viability = viability_of(&elements);
            tracing::info!(framework = ?key, elements = elements.len(), ?viability, "elements mapped");
            (
                ElementsArtifact {
                    claim_type: framework
                        .map(|f| f.claim_type.to_string())
                        .or(out.claim_type)
                        .unwrap_or_else(|| "General legal matter".to_string()),
                    framework: key,
                    elements,
                    viability,
                    relevant_legislation: legislation,
                    degraded: false,
                },
                None,
            )
        }
        Err(e) => {
            let elements = framework.map(|f| align(f, Vec::new())).unwrap_or_default();
            (
                ElementsArtifact {
                    claim_type: framework
                        .map(|f| f.claim_type.to_string())
                        .unwrap_or_else(|| "General legal matter".to_string()),
                    framework: key,
                    viability: Viability::InsufficientInformation,
                    elements,
                    relevant_legislation: legislation,
                    degraded: true,
                },
                Some(Degradation::from_model(StageName::ElementsMapping, &e)),
            )
        }
    }
}
