//! Stage 7: strategy formulation.
//!
//! Proposes options ordered cheapest first, grounded in the passages found
//! by precedent search. On the simple path precedent search has not run,
//! so this stage does its own `lookup_law` call.

use serde::{Deserialize, Serialize};

use crate::model::{ModelRequest, ModelTier};
use crate::tools::{lookup_law, LawPassage};

use super::{Degradation, PipelineState, StageContext, StageInput, StageName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    Free,
    LowCost,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOption {
    pub title: String,
    pub description: String,
    pub cost_tier: CostTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyArtifact {
    /// Plain-language answer to the user's question.
    pub summary: String,
    /// Free options first, then low cost, then paid.
    pub options: Vec<StrategyOption>,
    pub recommended: Option<String>,
    pub next_steps: Vec<String>,
    pub sources: Vec<LawPassage>,
    /// Set when the jurisdiction had to fall back to federal law.
    pub coverage_note: Option<String>,
    pub degraded: bool,
}

impl StrategyArtifact {
    pub fn citations(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for p in &self.sources {
            if !out.contains(&p.citation) {
                out.push(p.citation.clone());
            }
        }
        out
    }
}

#[derive(Debug, Deserialize)]
struct StrategyOutput {
    summary: String,
    #[serde(default)]
    options: Vec<StrategyOption>,
    #[serde(default)]
    recommended: Option<String>,
    #[serde(default)]
    next_steps: Vec<String>,
}

const PROMPT: &str = "You are helping a member of the public in Australia understand their \
options. Answer their question in plain language, then list practical options with a cost tier \
(free, low_cost, paid), name the option you recommend, and give concrete next steps. Cite only the \
legislation passages provided; if none are provided, say you could not find specific legislation. \
This is general information, not legal advice.";

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "options": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "cost_tier": { "type": "string", "enum": ["free", "low_cost", "paid"] }
                    },
                    "required": ["title", "description", "cost_tier"],
                    "additionalProperties": false
                }
            },
            "recommended": { "type": ["string", "null"] },
            "next_steps": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["summary", "options", "recommended", "next_steps"],
        "additionalProperties": false
    })
}

/// Options anyone can take when no tailored strategy is available.
pub fn default_options() -> Vec<StrategyOption> {
    vec![
        StrategyOption {
            title: "Contact Legal Aid or a community legal centre".into(),
            description: "Free legal advice is available in every state and territory; eligibility varies.".into(),
            cost_tier: CostTier::Free,
        },
        StrategyOption {
            title: "Gather your documents".into(),
            description: "Collect contracts, letters, messages, receipts and photos and note key dates.".into(),
            cost_tier: CostTier::Free,
        },
        StrategyOption {
            title: "Consult a private lawyer".into(),
            description: "Many firms offer a fixed-fee first appointment.".into(),
            cost_tier: CostTier::Paid,
        },
    ]
}

fn passages_prompt(passages: &[LawPassage]) -> String {
    if passages.is_empty() {
        return "No legislation passages were found.".to_string();
    }
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] {} ({})\n{}", i + 1, p.citation, p.jurisdiction, p.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn analysis_prompt(state: &PipelineState) -> String {
    let parts = serde_json::json!({
        "issue": state.issue,
        "facts": state.facts,
        "elements": state.elements,
        "risk": state.risk,
    });
    serde_json::to_string_pretty(&parts).unwrap_or_default()
}

pub async fn run(
    ctx: &StageContext,
    input: &StageInput,
    state: &PipelineState,
) -> (StrategyArtifact, Option<Degradation>) {
    let (sources, coverage_note) = match &state.precedent {
        Some(p) => (p.lookup.passages.clone(), p.lookup.note.clone()),
        None => {
            let query = super::precedent::search_query(input, state);
            let jurisdiction = state
                .jurisdiction
                .as_ref()
                .map(|j| j.resolved)
                .or(input.declared_jurisdiction);
            match lookup_law(&ctx.retriever, &query, jurisdiction).await {
                Ok(lookup) => (lookup.passages, lookup.note),
                Err(e) => {
                    tracing::warn!(error = %e, "strategy lookup failed");
                    (Vec::new(), None)
                }
            }
        }
    };

    let user = format!(
        "Question:\n{}\n\nAnalysis so far:\n{}\n\nLegislation:\n{}",
        input.transcript(),
        analysis_prompt(state),
        passages_prompt(&sources)
    );
    let req = ModelRequest::silent("strategy_formulation", ModelTier::Chat, PROMPT, &user);

    match ctx.structured::<StrategyOutput>(&req, &schema()).await {
        Ok(out) => {
            let mut options = if out.options.is_empty() { default_options() } else { out.options };
            options.sort_by_key(|o| o.cost_tier);
            tracing::info!(options = options.len(), sources = sources.len(), "strategy formulated");
            (
                StrategyArtifact {
                    summary: out.summary,
                    recommended: out.recommended.or_else(|| options.first().map(|o| o.title.clone())),
                    options,
                    next_steps: out.next_steps,
                    sources,
                    coverage_note,
                    degraded: false,
                },
                None,
            )
        }
        Err(e) => {
            let options = default_options();
            (
                StrategyArtifact {
                    summary: "I couldn't put together a tailored strategy right now. The options \
                              below are a safe place to start."
                        .to_string(),
                    recommended: options.first().map(|o| o.title.clone()),
                    options,
                    next_steps: vec!["Speak to Legal Aid or a community legal centre about your situation".to_string()],
                    sources,
                    coverage_note,
                    degraded: true,
                },
                Some(Degradation::from_model(StageName::StrategyFormulation, &e)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::FakeModel;
    use crate::model::ModelError;
    use crate::pipeline::jurisdiction;
    use crate::pipeline::tests::{ctx_with, input};

    #[tokio::test]
    async fn test_options_sorted_free_first() {
        let ctx = ctx_with(FakeModel::new(|req| {
            assert_eq!(req.purpose, "strategy_formulation");
            Ok(serde_json::json!({
                "summary": "Your landlord must give 60 days notice.",
                "options": [
                    {"title": "Lawyer", "description": "", "cost_tier": "paid"},
                    {"title": "Tenants Advice", "description": "", "cost_tier": "free"},
                    {"title": "Mediation", "description": "", "cost_tier": "low_cost"}
                ],
                "recommended": null,
                "next_steps": ["Check the notice date"]
            }))
        }))
        .await;
        let input = input("rent increase notice");
        let state = PipelineState {
            jurisdiction: Some(jurisdiction::run(&input)),
            ..Default::default()
        };
        let (a, d) = run(&ctx, &input, &state).await;
        assert!(d.is_none());
        let tiers: Vec<CostTier> = a.options.iter().map(|o| o.cost_tier).collect();
        assert_eq!(tiers, vec![CostTier::Free, CostTier::LowCost, CostTier::Paid]);
        assert_eq!(a.recommended.as_deref(), Some("Tenants Advice"));
        assert!(!a.sources.is_empty(), "simple path looks up legislation itself");
    }

    #[tokio::test]
    async fn test_degraded_strategy_keeps_sources() {
        let ctx = ctx_with(FakeModel::new(|_| Err(ModelError::Timeout(std::time::Duration::from_secs(1))))).await;
        let (a, d) = run(&ctx, &input("rent increase notice"), &PipelineState::default()).await;
        assert!(a.degraded);
        assert!(d.unwrap().timed_out);
        assert_eq!(a.options[0].cost_tier, CostTier::Free);
        assert!(!a.sources.is_empty());
    }
}
