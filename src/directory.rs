//! Lawyer referrals and step-by-step action templates.
//!
//! Both lists live in one JSON file named by `[directory].path`:
//!
//! ```json
//! {
//!   "lawyers": [{ "name": "...", "specialty": "Tenancy", "location": "Sydney", "rate": "$300/hr" }],
//!   "action_templates": [{ "title": "...", "state": "NSW", "category": "tenancy",
//!                          "keywords": ["bond"], "steps": [{ "order": 1, "title": "..." }] }]
//! }
//! ```
//!
//! With no path configured the directory is empty and both lookups answer
//! with their "nothing found" messages.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use auslaw_core::models::Jurisdiction;

/// Location used when a state has no mapped city.
pub const DEFAULT_CITY: &str = "Melbourne";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lawyer {
    pub name: String,
    pub specialty: String,
    /// City the practice is in.
    pub location: String,
    #[serde(default)]
    pub rate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateStep {
    pub order: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionTemplate {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub state: Jurisdiction,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub steps: Vec<TemplateStep>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Directory {
    #[serde(default)]
    pub lawyers: Vec<Lawyer>,
    #[serde(default)]
    pub action_templates: Vec<ActionTemplate>,
}

impl Directory {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read directory file: {}", path.display()))?;
        let directory: Directory = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse directory file: {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            lawyers = directory.lawyers.len(),
            templates = directory.action_templates.len(),
            "directory loaded"
        );
        Ok(directory)
    }

    /// Lawyers whose specialty contains `specialty` (case-insensitive),
    /// first in the state's main city, then anywhere if that finds none.
    pub fn find_lawyers(&self, specialty: &str, state: Option<Jurisdiction>) -> LawyerSearch {
        let location = state.and_then(main_city).unwrap_or(DEFAULT_CITY);
        let needle = specialty.trim().to_lowercase();
        let matches = |l: &&Lawyer| l.specialty.to_lowercase().contains(&needle);

        let local: Vec<Lawyer> = self
            .lawyers
            .iter()
            .filter(matches)
            .filter(|l| l.location.eq_ignore_ascii_case(location))
            .cloned()
            .collect();
        let (lawyers, widened) = if local.is_empty() {
            (self.lawyers.iter().filter(matches).cloned().collect(), true)
        } else {
            (local, false)
        };
        tracing::info!(specialty, location, found = lawyers.len(), widened, "find_lawyer");

        LawyerSearch {
            specialty: specialty.to_string(),
            state,
            location,
            widened,
            lawyers,
        }
    }

    /// The single best template for `query`, preferring the given state.
    ///
    /// Candidates are the state's templates (narrowed by `category` when
    /// non-empty), or every state's when the state has none. Each query word
    /// scores 2 for appearing in any keyword and 1 each for title and
    /// description. With no word matching anything, the first candidate is
    /// returned.
    pub fn best_template(&self, query: &str, state: Jurisdiction, category: &str) -> Option<TemplateMatch> {
        let in_category = |t: &&ActionTemplate| category.is_empty() || t.category.eq_ignore_ascii_case(category);
        let mut candidates: Vec<&ActionTemplate> = self
            .action_templates
            .iter()
            .filter(in_category)
            .filter(|t| t.state == state)
            .collect();
        let widened = candidates.is_empty();
        if widened {
            candidates = self.action_templates.iter().filter(in_category).collect();
        }

        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let mut scored: Vec<(u32, &ActionTemplate)> = candidates
            .iter()
            .map(|t| (template_score(&words, t), *t))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Stable sort keeps file order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let (score, template) = match scored.first() {
            Some(&(score, t)) => (score, t),
            None => (0, *candidates.first()?),
        };
        tracing::info!(query, state = %state, category, score, widened, title = %template.title, "action template");

        let mut template = template.clone();
        template.steps.sort_by_key(|s| s.order);
        Some(TemplateMatch {
            score,
            widened,
            template,
        })
    }
}

fn template_score(words: &[String], t: &ActionTemplate) -> u32 {
    let title = t.title.to_lowercase();
    let description = t.description.to_lowercase();
    let keywords: Vec<String> = t.keywords.iter().map(|k| k.to_lowercase()).collect();
    words
        .iter()
        .map(|w| {
            let mut score = 0;
            if keywords.iter().any(|k| k.contains(w.as_str())) {
                score += 2;
            }
            if title.contains(w.as_str()) {
                score += 1;
            }
            if description.contains(w.as_str()) {
                score += 1;
            }
            score
        })
        .sum()
}

/// Capital city where referrals for a state are looked up.
pub fn main_city(state: Jurisdiction) -> Option<&'static str> {
    match state {
        Jurisdiction::Vic => Some("Melbourne"),
        Jurisdiction::Nsw => Some("Sydney"),
        Jurisdiction::Qld => Some("Brisbane"),
        Jurisdiction::Sa => Some("Adelaide"),
        Jurisdiction::Wa => Some("Perth"),
        Jurisdiction::Tas => Some("Hobart"),
        Jurisdiction::Nt => Some("Darwin"),
        Jurisdiction::Act => Some("Canberra"),
        Jurisdiction::Federal | Jurisdiction::Unknown => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LawyerSearch {
    pub specialty: String,
    pub state: Option<Jurisdiction>,
    pub location: &'static str,
    /// No match in `location`; results come from any city.
    pub widened: bool,
    pub lawyers: Vec<Lawyer>,
}

impl LawyerSearch {
    pub fn empty_message(&self) -> String {
        let body = match self.state {
            Some(j) if j != Jurisdiction::Unknown => format!("the Law Society of {}", j),
            _ => "your state's Law Society".to_string(),
        };
        format!(
            "No {} lawyers found in {}. Try a different specialty or contact {}.",
            self.specialty, self.location, body
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateMatch {
    /// Keyword overlap score; 0 when no query word matched.
    pub score: u32,
    /// The requested state had no templates; this one is from another state.
    pub widened: bool,
    pub template: ActionTemplate,
}
