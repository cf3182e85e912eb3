//! Stage 5: precedent search.
//!
//! Runs `lookup_law` with a query built from the identified issues against
//! the resolved jurisdiction. No model call.

use serde::{Deserialize, Serialize};

use crate::tools::{lookup_law, LawLookup};

use super::{Degradation, PipelineState, StageContext, StageInput, StageName};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecedentArtifact {
    pub lookup: LawLookup,
    pub degraded: bool,
}

impl PrecedentArtifact {
    pub fn citations(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for p in &self.lookup.passages {
            if !out.contains(&p.citation) {
                out.push(p.citation.clone());
            }
        }
        out
    }
}

/// Issue description plus sub-category words, or the raw message.
pub fn search_query(input: &StageInput, state: &PipelineState) -> String {
    match &state.issue {
        Some(issue) if !issue.degraded => {
            let sub = issue.primary.sub_category.replace('_', " ");
            format!("{} {}", sub, issue.primary.description).trim().to_string()
        }
        _ => input.message.clone(),
    }
}

pub async fn run(
    ctx: &StageContext,
    input: &StageInput,
    state: &PipelineState,
) -> (PrecedentArtifact, Option<Degradation>) {
    let query = search_query(input, state);
    let jurisdiction = state
        .jurisdiction
        .as_ref()
        .map(|j| j.resolved)
        .or(input.declared_jurisdiction);

    match lookup_law(&ctx.retriever, &query, jurisdiction).await {
        Ok(lookup) if lookup.degraded => (
            PrecedentArtifact { lookup, degraded: true },
            Some(Degradation {
                stage: StageName::PrecedentSearch,
                reason: "legislation search unavailable".to_string(),
                timed_out: false,
            }),
        ),
        Ok(lookup) => {
            tracing::info!(passages = lookup.passages.len(), "precedent search complete");
            (PrecedentArtifact { lookup, degraded: false }, None)
        }
        Err(e) => (
            PrecedentArtifact {
                lookup: LawLookup {
                    query,
                    jurisdiction,
                    ..Default::default()
                },
                degraded: true,
            },
            Some(Degradation {
                stage: StageName::PrecedentSearch,
                reason: e.to_string(),
                timed_out: false,
            }),
        ),
    }
}
