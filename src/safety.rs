//! Safety gate.
//!
//! Runs before any reasoning. A keyword lexicon hit classifies the message
//! immediately with no model call. Otherwise a single classifier-tier call
//! decides between the five risk categories and `clear`, unless the message
//! is a short follow-up in an ongoing conversation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use auslaw_core::models::Jurisdiction;

use crate::model::{ModelError, ModelProvider, ModelRequest, ModelTier};
use crate::resources::{resources_for, CrisisResource, RiskCategory};

static LEXICON: Lazy<Vec<(RiskCategory, Regex)>> = Lazy::new(|| {
    let patterns: &[(RiskCategory, &str)] = &[
        (
            RiskCategory::SuicideSelfHarm,
            r"\b(kill myself|end my life|end it all|want to die|suicide|suicidal|self.?harm)\b",
        ),
        (
            RiskCategory::SuicideSelfHarm,
            r"\b(can'?t go on|no reason to live|better off dead)\b",
        ),
        (
            RiskCategory::FamilyViolence,
            r"\b(hit me|beat me|abused|domestic violence|scared of (my|him|her))\b",
        ),
        (
            RiskCategory::FamilyViolence,
            r"\b(threatened to (kill|hurt)|avo|dvo|protection order)\b",
        ),
        (
            RiskCategory::ChildWelfare,
            r"\b(child (protection|services)|docs|took my (kids|children))\b",
        ),
        (
            RiskCategory::ChildWelfare,
            r"\b(child abuse|hurt (my|the) (child|kid|baby))\b",
        ),
        (
            RiskCategory::Criminal,
            r"\b(arrested|charged with|police (station|custody)|criminal charge)\b",
        ),
        (RiskCategory::Criminal, r"\b(going to (jail|prison))\b"),
        (
            RiskCategory::UrgentDeadline,
            r"\b(court|hearing|tribunal) (is )?(today|tomorrow)\b",
        ),
        (
            RiskCategory::UrgentDeadline,
            r"\b(evicted|eviction|deadline|due) (is )?(today|tomorrow)\b",
        ),
        (RiskCategory::UrgentDeadline, r"\bwithin (24|48) hours\b"),
    ];
    patterns
        .iter()
        .filter_map(|(c, p)| match Regex::new(&format!("(?i){}", p)) {
            Ok(re) => Some((*c, re)),
            Err(e) => {
                tracing::error!(pattern = p, error = %e, "invalid safety pattern");
                None
            }
        })
        .collect()
});

const RISK_WORDS: &[&str] = &[
    "help", "emergency", "scared", "hurt", "kill", "die", "suicide",
];

const CLASSIFIER_PROMPT: &str = "You are a safety classifier for an Australian legal \
information service. Decide whether the user's message indicates a situation that needs \
crisis support before legal information. Categories: suicide_self_harm, family_violence, \
child_welfare, criminal (arrest or charges), urgent_deadline (court or eviction within \
days), or clear. Respond with the single best category.";

/// How a verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetySource {
    Lexicon,
    Model,
    /// Short follow-up; no classification was run.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyAssessment {
    /// `None` means clear.
    pub category: Option<RiskCategory>,
    pub source: SafetySource,
    /// The classifier returned a label outside the known set, or output
    /// that could not be decoded.
    pub uncertain: bool,
    pub resources: Vec<CrisisResource>,
}

impl SafetyAssessment {
    pub fn requires_escalation(&self) -> bool {
        self.category.is_some()
    }

    fn clear(source: SafetySource, uncertain: bool) -> Self {
        Self {
            category: None,
            source,
            uncertain,
            resources: Vec::new(),
        }
    }

    fn risk(category: RiskCategory, source: SafetySource, jurisdiction: Option<Jurisdiction>) -> Self {
        Self {
            category: Some(category),
            source,
            uncertain: false,
            resources: resources_for(category, jurisdiction),
        }
    }
}

/// Inputs beyond the message text.
#[derive(Debug, Clone, Copy)]
pub struct SafetyContext {
    pub is_first_message: bool,
    pub short_followup_chars: usize,
    pub jurisdiction: Option<Jurisdiction>,
}

/// First lexicon category matching `message`.
pub fn lexicon_match(message: &str) -> Option<RiskCategory> {
    LEXICON
        .iter()
        .find(|(_, re)| re.is_match(message))
        .map(|(c, _)| *c)
}

/// Non-first, short, and free of risk words.
pub fn is_short_followup(message: &str, ctx: &SafetyContext) -> bool {
    if ctx.is_first_message || message.trim().chars().count() >= ctx.short_followup_chars {
        return false;
    }
    let lower = message.to_lowercase();
    !RISK_WORDS.iter().any(|w| lower.contains(w))
}

#[derive(Debug, Deserialize)]
struct ClassifierOutput {
    category: String,
}

fn classifier_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "category": {
                "type": "string",
                "enum": [
                    "suicide_self_harm", "family_violence", "child_welfare",
                    "criminal", "urgent_deadline", "clear"
                ]
            }
        },
        "required": ["category"],
        "additionalProperties": false
    })
}

/// Classify `message`. An `Err` means the gate itself failed and the turn
/// must abort.
pub async fn assess(
    model: &dyn ModelProvider,
    message: &str,
    ctx: &SafetyContext,
) -> Result<SafetyAssessment, ModelError> {
    if let Some(category) = lexicon_match(message) {
        tracing::info!(category = category.as_str(), "safety lexicon hit");
        return Ok(SafetyAssessment::risk(category, SafetySource::Lexicon, ctx.jurisdiction));
    }

    if message.trim().is_empty() || is_short_followup(message, ctx) {
        tracing::debug!("safety check skipped for short follow-up");
        return Ok(SafetyAssessment::clear(SafetySource::Skipped, false));
    }

    let req = ModelRequest::silent(
        "safety_classification",
        ModelTier::Classifier,
        CLASSIFIER_PROMPT,
        message,
    );
    let value = model.structured(&req, &classifier_schema()).await?;
    let out: ClassifierOutput = match serde_json::from_value(value) {
        Ok(out) => out,
        Err(e) => {
            tracing::warn!(error = %e, "safety classifier output did not match schema");
            return Ok(SafetyAssessment::clear(SafetySource::Model, true));
        }
    };
    let label = out.category.trim().to_lowercase();

    if label == "clear" {
        return Ok(SafetyAssessment::clear(SafetySource::Model, false));
    }
    match RiskCategory::parse(&label) {
        Some(category) => {
            tracing::info!(category = category.as_str(), "safety classifier flagged message");
            Ok(SafetyAssessment::risk(category, SafetySource::Model, ctx.jurisdiction))
        }
        None => {
            tracing::warn!(label = %out.category, "safety classifier returned unknown label");
            Ok(SafetyAssessment::clear(SafetySource::Model, true))
        }
    }
}
