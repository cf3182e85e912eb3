//! Complexity router for the adaptive path.
//!
//! Decides whether a query needs the full reasoning pipeline or the short
//! issue → jurisdiction → strategy path. Heuristics decide most queries;
//! only the undecided middle band costs a classifier call, and anything
//! ambiguous from that call lands on the simple path.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use auslaw_core::models::Jurisdiction;

use crate::model::{structured_as, ModelProvider, ModelRequest, ModelTier};

/// Score above which a query is complex outright.
pub const COMPLEX_SCORE: f64 = 0.4;
/// Score at or below which a short simple-intent query is simple.
pub const SIMPLE_SCORE: f64 = 0.3;
/// Word count for a "short" query.
pub const SHORT_QUERY_WORDS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Complexity {
    Simple,
    Complex,
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Heuristic,
    Model,
    /// Classifier failed or answered ambiguously.
    Default,
}

/// Everything the router looks at besides the message.
#[derive(Debug, Clone, Default)]
pub struct RouteInput {
    pub has_attachment: bool,
    pub secondary_issues: usize,
    /// Complexity estimate from issue identification, if it produced one.
    pub issue_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Always `Simple` or `Complex`.
    pub complexity: Complexity,
    pub source: RouteSource,
    pub score: f64,
    pub reasons: Vec<String>,
}

impl RouteDecision {
    pub fn is_complex(&self) -> bool {
        self.complexity == Complexity::Complex
    }
}

static TRIGGERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(disputes?|disputing|court|tribunal|sued|sue|suing|lawsuit|litigation|appeal|ncat|vcat|qcat|summons|subpoena|damages|compensation claim)\b",
    )
    .expect("static pattern")
});

static SIMPLE_INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(what('?s| is| are)|how (long|much|many|do i)|can (i|my|a)|do i (need|have)|is it (legal|allowed)|define|what does .* mean)\b",
    )
    .expect("static pattern")
});

static LEGAL_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(lease|contract|bond|dismiss(al|ed)|custody|parenting|property settlement|negligence|breach|liability|warranty|termination|injury|discrimination|harassment|debt|guarantor|insurance|estate|visa)\b",
    )
    .expect("static pattern")
});

static NARRATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(then|after|before|since|later|afterwards|(weeks|months|years) ago)\b")
        .expect("static pattern")
});

static STATE_NAMES: Lazy<Vec<(Jurisdiction, Regex)>> = Lazy::new(|| {
    [
        (Jurisdiction::Nsw, r"(?i)\b(nsw|new south wales)\b"),
        (Jurisdiction::Vic, r"(?i)\b(vic|victoria)\b"),
        (Jurisdiction::Qld, r"(?i)\b(qld|queensland)\b"),
        (Jurisdiction::Sa, r"\b(SA|South Australia)\b"),
        (Jurisdiction::Wa, r"\b(WA|Western Australia)\b"),
        (Jurisdiction::Tas, r"(?i)\b(tas|tasmania)\b"),
        (Jurisdiction::Nt, r"\b(NT|Northern Territory)\b"),
        (Jurisdiction::Act, r"\b(ACT|Australian Capital Territory)\b"),
        (Jurisdiction::Federal, r"(?i)\b(federal|commonwealth|cth)\b"),
    ]
    .into_iter()
    .filter_map(|(j, p)| Regex::new(p).ok().map(|re| (j, re)))
    .collect()
});

/// Distinct jurisdictions named in `text`, by code or full name.
///
/// Two-letter codes that collide with English words (`SA`, `WA`, `NT`,
/// `ACT`) only match in upper case.
pub fn jurisdictions_mentioned(text: &str) -> Vec<Jurisdiction> {
    STATE_NAMES
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(j, _)| *j)
        .collect()
}

/// Lexical complexity estimate in `[0, 1]`.
pub fn lexical_score(message: &str) -> f64 {
    let words = message.split_whitespace().count() as f64;
    let length = (words / 150.0).min(0.3);
    let terms = (LEGAL_TERMS.find_iter(message).count() as f64 * 0.05).min(0.3);
    let questions = message.matches('?').count().saturating_sub(1) as f64;
    let questions = (questions * 0.1).min(0.2);
    let narrative = (NARRATIVE.find_iter(message).count() as f64 * 0.05).min(0.2);
    (length + terms + questions + narrative).min(1.0)
}

/// Heuristic classification. `Uncertain` means the classifier decides.
pub fn classify_heuristic(message: &str, input: &RouteInput) -> (Complexity, f64, Vec<String>) {
    let score = input.issue_score.unwrap_or_else(|| lexical_score(message));
    let mut reasons = Vec::new();

    if input.has_attachment {
        reasons.push("document attached".to_string());
    }
    if input.secondary_issues > 1 {
        reasons.push(format!("{} secondary issues", input.secondary_issues));
    }
    if score > COMPLEX_SCORE {
        reasons.push(format!("complexity score {:.2}", score));
    }
    let jurisdictions = jurisdictions_mentioned(message);
    if jurisdictions.len() > 1 {
        reasons.push(format!("{} jurisdictions implicated", jurisdictions.len()));
    }
    if let Some(m) = TRIGGERS.find(message) {
        reasons.push(format!("trigger phrase '{}'", m.as_str().to_lowercase()));
    }
    if !reasons.is_empty() {
        return (Complexity::Complex, score, reasons);
    }

    let short = message.split_whitespace().count() <= SHORT_QUERY_WORDS;
    if short && SIMPLE_INTENT.is_match(message) && score <= SIMPLE_SCORE && input.secondary_issues == 0 {
        reasons.push("short simple-intent query".to_string());
        return (Complexity::Simple, score, reasons);
    }

    (Complexity::Uncertain, score, reasons)
}

#[derive(Debug, Deserialize)]
struct RouterOutput {
    complexity: String,
}

const ROUTER_PROMPT: &str = "Decide whether this legal question needs a full multi-step legal \
analysis (complex: several issues, a live dispute, facts to organise, evidence to weigh) or a \
short direct answer (simple: one question about a rule, a right or a time limit).";

/// Route `message` to the simple or complex path.
pub async fn route(model: &dyn ModelProvider, message: &str, input: &RouteInput) -> RouteDecision {
    let (complexity, score, mut reasons) = classify_heuristic(message, input);
    if complexity != Complexity::Uncertain {
        tracing::info!(?complexity, score, ?reasons, "complexity decided by heuristics");
        return RouteDecision {
            complexity,
            source: RouteSource::Heuristic,
            score,
            reasons,
        };
    }

    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "complexity": { "type": "string", "enum": ["simple", "complex"] }
        },
        "required": ["complexity"],
        "additionalProperties": false
    });
    let req = ModelRequest::silent(
        "complexity_classification",
        ModelTier::Classifier,
        ROUTER_PROMPT,
        message,
    );

    let (complexity, source) = match structured_as::<RouterOutput>(model, &req, &schema).await {
        Ok(out) => match out.complexity.trim().to_lowercase().as_str() {
            "complex" => (Complexity::Complex, RouteSource::Model),
            "simple" => (Complexity::Simple, RouteSource::Model),
            other => {
                tracing::warn!(label = other, "ambiguous complexity label, using simple path");
                (Complexity::Simple, RouteSource::Default)
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "complexity classifier failed, using simple path");
            (Complexity::Simple, RouteSource::Default)
        }
    };
    reasons.push(format!("classifier: {:?}", source));
    tracing::info!(?complexity, score, "complexity decided by classifier");
    RouteDecision {
        complexity,
        source,
        score,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::FakeModel;
    use crate::model::ModelError;

    #[test]
    fn test_attachment_always_complex() {
        let input = RouteInput {
            has_attachment: true,
            ..Default::default()
        };
        let (c, _, reasons) = classify_heuristic("What is this?", &input);
        assert_eq!(c, Complexity::Complex);
        assert!(reasons.iter().any(|r| r.contains("document")));
    }

    #[test]
    fn test_simple_question() {
        let (c, score, _) = classify_heuristic(
            "What's the notice period for a rent increase in NSW?",
            &RouteInput::default(),
        );
        assert_eq!(c, Complexity::Simple);
        assert!(score <= SIMPLE_SCORE);
    }

    #[test]
    fn test_trigger_phrase_is_complex() {
        let (c, _, _) = classify_heuristic(
            "My landlord and I are in a dispute about the bond",
            &RouteInput::default(),
        );
        assert_eq!(c, Complexity::Complex);
    }

    #[test]
    fn test_multiple_jurisdictions_complex() {
        let (c, _, _) = classify_heuristic(
            "I signed the lease in Queensland but now live in Victoria",
            &RouteInput::default(),
        );
        assert_eq!(c, Complexity::Complex);
    }

    #[test]
    fn test_secondary_issues() {
        let input = RouteInput {
            secondary_issues: 2,
            ..Default::default()
        };
        assert_eq!(classify_heuristic("Help with my job", &input).0, Complexity::Complex);
        let input = RouteInput {
            secondary_issues: 1,
            ..Default::default()
        };
        assert_eq!(classify_heuristic("What is a bond?", &input).0, Complexity::Uncertain);
    }

    #[test]
    fn test_jurisdictions_mentioned_case_rules() {
        assert_eq!(jurisdictions_mentioned("I live in nsw"), vec![Jurisdiction::Nsw]);
        assert!(jurisdictions_mentioned("we act quickly and sa the wa").is_empty());
    }

    #[tokio::test]
    async fn test_uncertain_asks_classifier() {
        let model = FakeModel::new(|_| Ok(serde_json::json!({"complexity": "complex"})));
        let d = route(&model, "My employer changed my roster", &RouteInput::default()).await;
        assert!(d.is_complex());
        assert_eq!(d.source, RouteSource::Model);
        assert_eq!(model.purposes(), vec!["complexity_classification"]);
    }

    #[tokio::test]
    async fn test_ambiguous_defaults_simple() {
        let model = FakeModel::new(|_| Ok(serde_json::json!({"complexity": "depends"})));
        let d = route(&model, "My employer changed my roster", &RouteInput::default()).await;
        assert_eq!(d.complexity, Complexity::Simple);
        assert_eq!(d.source, RouteSource::Default);

        let model = FakeModel::new(|_| Err(ModelError::Transient("503".into())));
        let d = route(&model, "My employer changed my roster", &RouteInput::default()).await;
        assert_eq!(d.complexity, Complexity::Simple);
    }

    #[tokio::test]
    async fn test_heuristic_skips_classifier() {
        let model = FakeModel::new(|_| Ok(serde_json::json!({"complexity": "simple"})));
        let input = RouteInput {
            has_attachment: true,
            ..Default::default()
        };
        let d = route(&model, "Can you read my lease?", &input).await;
        assert!(d.is_complex());
        assert_eq!(model.call_count(), 0);
    }
}
