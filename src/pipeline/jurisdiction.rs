//! Stage 2: jurisdiction resolution.
//!
//! Deterministic. The declared state wins over states named in the
//! message; the result is mapped to the nearest jurisdiction the corpus
//! covers, falling back to FEDERAL.

use serde::{Deserialize, Serialize};

use auslaw_core::models::Jurisdiction;

use crate::complexity::jurisdictions_mentioned;
use crate::tools::coverage_for;

use super::StageInput;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionArtifact {
    pub declared: Option<Jurisdiction>,
    /// Jurisdictions named in the message itself.
    pub mentioned: Vec<Jurisdiction>,
    /// Covered jurisdiction used for lookups.
    pub resolved: Jurisdiction,
    pub note: Option<String>,
}

pub fn run(input: &StageInput) -> JurisdictionArtifact {
    let mentioned = jurisdictions_mentioned(&input.message);
    let declared = input
        .declared_jurisdiction
        .filter(|j| *j != Jurisdiction::Unknown);
    let requested = declared.or_else(|| mentioned.first().copied());

    let (resolved, note) = match coverage_for(requested) {
        (Some(j), note) => (j, note),
        (None, _) => (
            Jurisdiction::Federal,
            Some("No state or territory was given, so Federal law is used.".to_string()),
        ),
    };
    tracing::info!(declared = ?declared, resolved = %resolved, "jurisdiction resolved");

    JurisdictionArtifact {
        declared,
        mentioned,
        resolved,
        note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(message: &str, declared: Option<Jurisdiction>) -> StageInput {
        StageInput {
            message: message.to_string(),
            declared_jurisdiction: declared,
            ..Default::default()
        }
    }

    #[test]
    fn test_declared_wins() {
        let a = run(&input("I rent in Queensland", Some(Jurisdiction::Nsw)));
        assert_eq!(a.resolved, Jurisdiction::Nsw);
        assert_eq!(a.mentioned, vec![Jurisdiction::Qld]);
    }

    #[test]
    fn test_uncovered_state_falls_back() {
        let a = run(&input("rent question", Some(Jurisdiction::Wa)));
        assert_eq!(a.resolved, Jurisdiction::Federal);
        assert!(a.note.unwrap().contains("WA"));

        let a = run(&input("rent question", Some(Jurisdiction::Act)));
        assert_eq!(a.resolved, Jurisdiction::Federal);
        assert!(a.note.is_none());
    }

    #[test]
    fn test_mentioned_state_used_when_undeclared() {
        let a = run(&input("I live in QLD", None));
        assert_eq!(a.resolved, Jurisdiction::Qld);
        let a = run(&input("no state here", None));
        assert_eq!(a.resolved, Jurisdiction::Federal);
        assert!(a.note.is_some());
    }
}
