//! Tools the reasoning layer (and HTTP clients) can call.
//!
//! A [`Tool`] has a name, a description, an OpenAI function-calling
//! parameter schema and an async `execute`. Tools are collected in a
//! [`ToolRegistry`] and exposed over HTTP as `GET /tools/list` and
//! `POST /tools/{name}`.
//!
//! The typed functions [`lookup_law`] and [`analyze_document`] are what the
//! orchestrator calls directly; the tool structs are thin JSON wrappers.
//! `find_lawyer` and `get_action_template` read the [`Directory`].

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use auslaw_core::error::RetrievalError;
use auslaw_core::models::Jurisdiction;

use crate::directory::Directory;
use crate::resources::{resources_for, RiskCategory};
use crate::retriever::HybridRetriever;

/// Minimum document length accepted by [`analyze_document`].
pub const MIN_DOCUMENT_CHARS: usize = 50;
/// Documents are cut to this many characters before analysis.
pub const MAX_DOCUMENT_CHARS: usize = 30_000;

// ============ Tool trait ============

#[async_trait]
pub trait Tool: Send + Sync {
    /// Route segment for `POST /tools/{name}`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. The result is wrapped in `{ "result": ... }` by the
    /// server.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What a tool can reach while executing.
#[derive(Clone)]
pub struct ToolContext {
    pub retriever: Arc<HybridRetriever>,
    pub directory: Arc<Directory>,
}

impl ToolContext {
    /// Context with an empty directory.
    pub fn new(retriever: Arc<HybridRetriever>) -> Self {
        Self {
            retriever,
            directory: Arc::new(Directory::default()),
        }
    }

    pub fn with_directory(mut self, directory: Arc<Directory>) -> Self {
        self.directory = directory;
        self
    }
}

// ============ lookup_law ============

/// One legislation passage returned to the reasoning layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LawPassage {
    pub chunk_id: String,
    /// Parent content when the hit was a child chunk.
    pub content: String,
    pub citation: String,
    pub jurisdiction: Jurisdiction,
    pub source_url: Option<String>,
    /// Rerank score when reranked, otherwise the fused score.
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LawLookup {
    pub query: String,
    /// Jurisdiction filter actually applied; `None` searches everything.
    pub jurisdiction: Option<Jurisdiction>,
    /// Set when the requested state has no coverage.
    pub note: Option<String>,
    pub passages: Vec<LawPassage>,
    /// Retrieval failed twice; `passages` is empty for that reason.
    pub degraded: bool,
}

impl LawLookup {
    /// Message to show when nothing was found. Never invents a citation.
    pub fn empty_message(&self) -> String {
        if self.degraded {
            return "Sorry, I couldn't search the legislation database just now. \
                    No legislation citations are available for this answer."
                .to_string();
        }
        let scope = match self.jurisdiction {
            Some(Jurisdiction::Federal) if self.note.is_some() => " in Federal law".to_string(),
            Some(j) => format!(" in {}", j),
            None => String::new(),
        };
        format!(
            "No legislation found for '{}'{}. Try different keywords or check another jurisdiction.",
            self.query, scope
        )
    }
}

/// Map a declared state to the jurisdiction filter used for legislation
/// lookups, with a note when the state has no coverage.
///
/// NSW, QLD and FEDERAL are covered; ACT uses federal law. Other states
/// fall back to FEDERAL. An absent or unrecognised state searches all
/// jurisdictions.
pub fn coverage_for(state: Option<Jurisdiction>) -> (Option<Jurisdiction>, Option<String>) {
    match state {
        Some(Jurisdiction::Nsw) => (Some(Jurisdiction::Nsw), None),
        Some(Jurisdiction::Qld) => (Some(Jurisdiction::Qld), None),
        Some(Jurisdiction::Federal) | Some(Jurisdiction::Act) => (Some(Jurisdiction::Federal), None),
        Some(j @ (Jurisdiction::Vic
        | Jurisdiction::Sa
        | Jurisdiction::Wa
        | Jurisdiction::Tas
        | Jurisdiction::Nt)) => (
            Some(Jurisdiction::Federal),
            Some(format!(
                "{} legislation is not yet available. Showing relevant Federal law instead; \
                 for state-specific advice, please consult a legal professional.",
                j
            )),
        ),
        Some(Jurisdiction::Unknown) | None => (None, None),
    }
}

/// Hybrid search over legislation, retrying once if the store is
/// unavailable and degrading to an empty result after that.
///
/// Only an invalid query is returned as an error.
pub async fn lookup_law(
    retriever: &HybridRetriever,
    query: &str,
    state: Option<Jurisdiction>,
) -> Result<LawLookup, RetrievalError> {
    let (jurisdiction, note) = coverage_for(state);
    tracing::info!(query, state = ?state, jurisdiction = ?jurisdiction, "lookup_law");

    let mut attempt = retriever.retrieve(query, jurisdiction).await;
    if let Err(e) = &attempt {
        if e.is_retryable() {
            tracing::warn!(error = %e, "lookup_law retrying once");
            attempt = retriever.retrieve(query, jurisdiction).await;
        }
    }

    let hits = match attempt {
        Ok(hits) => hits,
        Err(e @ RetrievalError::InvalidQuery { .. }) => return Err(e),
        Err(e) => {
            tracing::error!(error = %e, "lookup_law degraded to no citations");
            return Ok(LawLookup {
                query: query.to_string(),
                jurisdiction,
                note,
                passages: Vec::new(),
                degraded: true,
            });
        }
    };

    let passages = hits
        .into_iter()
        .map(|h| LawPassage {
            chunk_id: h.chunk_id,
            content: h.context,
            citation: h.citation,
            jurisdiction: h.jurisdiction,
            source_url: h.source_url,
            relevance_score: round3(h.rerank_score.unwrap_or(h.fused_score)),
        })
        .collect();

    Ok(LawLookup {
        query: query.to_string(),
        jurisdiction,
        note,
        passages,
        degraded: false,
    })
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

pub struct LookupLawTool;

#[async_trait]
impl Tool for LookupLawTool {
    fn name(&self) -> &str {
        "lookup_law"
    }

    fn description(&self) -> &str {
        "Search Australian legislation (hybrid vector + keyword search with reranking)"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Legal question or keywords" },
                "state": {
                    "type": "string",
                    "description": "State/territory code (NSW, QLD, FEDERAL supported; others fall back to FEDERAL)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            anyhow::bail!("query must not be empty");
        }
        let state = params["state"].as_str().and_then(Jurisdiction::detect);
        let lookup = lookup_law(&ctx.retriever, query, state).await?;
        let message = lookup.passages.is_empty().then(|| lookup.empty_message());
        let mut value = serde_json::to_value(&lookup)?;
        if let Some(message) = message {
            value["message"] = Value::String(message);
        }
        Ok(value)
    }
}

// ============ analyze_document ============

/// Frame an attached document for analysis.
///
/// Rejects text under [`MIN_DOCUMENT_CHARS`] and truncates at
/// [`MAX_DOCUMENT_CHARS`] characters with a marker.
pub fn analyze_document(text: &str, analysis_type: &str, state: Option<Jurisdiction>) -> Result<String> {
    if text.trim().chars().count() < MIN_DOCUMENT_CHARS {
        anyhow::bail!("The document appears to be empty or too short to analyze.");
    }

    let (body, truncated) = match text.char_indices().nth(MAX_DOCUMENT_CHARS) {
        Some((cut, _)) => {
            tracing::warn!(max = MAX_DOCUMENT_CHARS, "document truncated");
            (&text[..cut], true)
        }
        None => (text, false),
    };

    Ok(format!(
        "=== DOCUMENT CONTENT ===\nType: {}\nJurisdiction: {}\nLength: {} characters{}\n\n{}\n\n=== END DOCUMENT ===",
        analysis_type,
        state.map(|j| j.to_string()).unwrap_or_else(|| "Not specified".to_string()),
        body.chars().count(),
        if truncated { " (truncated)" } else { "" },
        body
    ))
}

pub struct AnalyzeDocumentTool;

#[async_trait]
impl Tool for AnalyzeDocumentTool {
    fn name(&self) -> &str {
        "analyze_document"
    }

    fn description(&self) -> &str {
        "Frame an attached document (lease, contract, notice) for analysis"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "document_text": { "type": "string" },
                "analysis_type": {
                    "type": "string",
                    "enum": ["lease", "contract", "visa", "general"],
                    "default": "general"
                },
                "state": { "type": "string" }
            },
            "required": ["document_text"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let text = params["document_text"].as_str().unwrap_or("");
        let kind = params["analysis_type"].as_str().unwrap_or("general");
        let state = params["state"].as_str().and_then(Jurisdiction::detect);
        let framed = analyze_document(text, kind, state)?;
        Ok(serde_json::json!({ "content": framed }))
    }
}

// ============ crisis_resources ============

pub struct CrisisResourcesTool;

#[async_trait]
impl Tool for CrisisResourcesTool {
    fn name(&self) -> &str {
        "crisis_resources"
    }

    fn description(&self) -> &str {
        "Support services for a risk category, with state lines where available"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "enum": ["criminal", "family_violence", "urgent_deadline", "child_welfare", "suicide_self_harm"]
                },
                "state": { "type": "string" }
            },
            "required": ["category"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let raw = params["category"].as_str().unwrap_or("");
        let category = RiskCategory::parse(raw)
            .ok_or_else(|| anyhow::anyhow!("unknown category: '{}'", raw))?;
        let state = params["state"].as_str().and_then(Jurisdiction::detect);
        Ok(serde_json::json!({ "resources": resources_for(category, state) }))
    }
}

// ============ find_lawyer ============

pub struct FindLawyerTool;

#[async_trait]
impl Tool for FindLawyerTool {
    fn name(&self) -> &str {
        "find_lawyer"
    }

    fn description(&self) -> &str {
        "Find lawyers by specialty in a state's main city, widening to all cities when none match"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "specialty": {
                    "type": "string",
                    "description": "Area of law (e.g. Tenancy, Employment, Family Law, Commercial)"
                },
                "state": { "type": "string", "default": "VIC" }
            },
            "required": ["specialty"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let specialty = params["specialty"].as_str().unwrap_or("");
        if specialty.trim().is_empty() {
            anyhow::bail!("specialty must not be empty");
        }
        let state = params["state"].as_str().unwrap_or("VIC");
        let search = ctx.directory.find_lawyers(specialty, Jurisdiction::detect(state));
        let message = search.lawyers.is_empty().then(|| search.empty_message());
        let mut value = serde_json::to_value(&search)?;
        if let Some(message) = message {
            value["message"] = Value::String(message);
        }
        Ok(value)
    }
}

// ============ get_action_template ============

pub struct ActionTemplateTool;

#[async_trait]
impl Tool for ActionTemplateTool {
    fn name(&self) -> &str {
        "get_action_template"
    }

    fn description(&self) -> &str {
        "Step-by-step checklist for a common legal procedure (bond refund, parking fine, breaking a lease)"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Keywords describing the action" },
                "state": { "type": "string", "description": "User's state/territory code" },
                "category": { "type": "string", "default": "" }
            },
            "required": ["query", "state"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            anyhow::bail!("query must not be empty");
        }
        let raw_state = params["state"].as_str().unwrap_or("");
        let state = Jurisdiction::detect(raw_state)
            .filter(|j| *j != Jurisdiction::Unknown)
            .ok_or_else(|| anyhow::anyhow!("unknown state: '{}'", raw_state))?;
        let category = params["category"].as_str().unwrap_or("");

        match ctx.directory.best_template(query, state, category) {
            Some(found) => Ok(serde_json::to_value(&found)?),
            None => Ok(serde_json::json!({
                "template": null,
                "message": format!(
                    "No action templates found for '{}' in {}. Use lookup_law to find the relevant legislation instead.",
                    query, state
                ),
            })),
        }
    }
}

// ============ Registry ============

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with every built-in tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(LookupLawTool));
        registry.register(Box::new(AnalyzeDocumentTool));
        registry.register(Box::new(CrisisResourcesTool));
        registry.register(Box::new(FindLawyerTool));
        registry.register(Box::new(ActionTemplateTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Parameter validation ============

/// Check `params` against a tool's schema: must be an object, required
/// keys present, declared types and enums respected. Missing optional
/// properties with a `default` are filled in.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let Some(given) = params.as_object() else {
        anyhow::bail!("parameters must be a JSON object");
    };
    let mut out = given.clone();

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !given.contains_key(key) {
                anyhow::bail!("missing required parameter: {}", key);
            }
        }
    }

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();
    for (name, prop) in &properties {
        let Some(value) = given.get(name) else {
            if let Some(default) = prop.get("default") {
                out.insert(name.clone(), default.clone());
            }
            continue;
        };
        if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                anyhow::bail!("parameter '{}' must be of type '{}'", name, expected);
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(value) {
                let names: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                anyhow::bail!("parameter '{}' must be one of [{}], got {}", name, names.join(", "), value);
            }
        }
    }

    Ok(Value::Object(out))
}
