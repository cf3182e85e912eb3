//! Chat model provider seam.
//!
//! Every reasoning step talks to the model through [`ModelProvider`]:
//! free-text completion for user-facing replies and JSON-schema structured
//! output for internal classification and extraction. Each request carries
//! a [`CallMode`]: `Silent` output is internal plumbing and never reaches
//! the user, `Visible` output may be shown verbatim.
//!
//! The OpenAI implementation retries transient failures (429 without quota
//! exhaustion, 5xx, network) with exponential backoff, like the embedding
//! providers do.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;

/// Whether a call's output may be surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    Silent,
    Visible,
}

/// Which configured model a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Main reasoning/chat model.
    Chat,
    /// Cheap model for safety and routing fallbacks.
    Classifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub tier: ModelTier,
    pub mode: CallMode,
    /// Short label used in logs and by test fakes (e.g. `"issue_identification"`).
    pub purpose: &'static str,
    pub messages: Vec<ChatMessage>,
}

impl ModelRequest {
    pub fn silent(purpose: &'static str, tier: ModelTier, system: &str, user: &str) -> Self {
        Self {
            tier,
            mode: CallMode::Silent,
            purpose,
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
        }
    }

    pub fn visible(purpose: &'static str, messages: Vec<ChatMessage>) -> Self {
        Self {
            tier: ModelTier::Chat,
            mode: CallMode::Visible,
            purpose,
            messages,
        }
    }

    /// The last user message, if any.
    pub fn last_user(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Model provider failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    /// Retryable failure (rate limit, server error, network).
    #[error("transient model error: {0}")]
    Transient(String),
    /// Account quota exhausted; retrying will not help.
    #[error("model quota exhausted: {0}")]
    Quota(String),
    /// Malformed request, bad credentials, or unparseable output.
    #[error("model error: {0}")]
    Fatal(String),
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
}

impl ModelError {
    /// Rate limits, quota, server and network errors may be retried a
    /// bounded number of times.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Transient(_) | ModelError::Quota(_))
    }

    /// Whether this error means the provider as a whole is unusable, as
    /// opposed to one bad response.
    pub fn is_outage(&self) -> bool {
        matches!(
            self,
            ModelError::Quota(_) | ModelError::Transient(_) | ModelError::Timeout(_)
        )
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Free-text completion.
    async fn complete(&self, req: &ModelRequest) -> Result<String, ModelError>;

    /// Structured output constrained by a JSON schema.
    async fn structured(
        &self,
        req: &ModelRequest,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, ModelError>;
}

/// Run a structured call and decode the result into `T`.
pub async fn structured_as<T: DeserializeOwned>(
    provider: &dyn ModelProvider,
    req: &ModelRequest,
    schema: &serde_json::Value,
) -> Result<T, ModelError> {
    let value = provider.structured(req, schema).await?;
    serde_json::from_value(value)
        .map_err(|e| ModelError::Fatal(format!("{} output did not match schema: {}", req.purpose, e)))
}

/// Bound a model call by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, ModelError>
where
    F: std::future::Future<Output = Result<T, ModelError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::Timeout(limit)),
    }
}

// ============ Disabled Provider ============

/// Provider used when `model.provider = "disabled"`. Every call fails with
/// [`ModelError::Fatal`], so a turn that needs the safety classifier aborts
/// at the gate; later stages fall back to their degraded artifacts.
pub struct DisabledModel;

#[async_trait]
impl ModelProvider for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _req: &ModelRequest) -> Result<String, ModelError> {
        Err(ModelError::Fatal("model provider is disabled".into()))
    }
    async fn structured(
        &self,
        _req: &ModelRequest,
        _schema: &serde_json::Value,
    ) -> Result<serde_json::Value, ModelError> {
        Err(ModelError::Fatal("model provider is disabled".into()))
    }
}

// ============ OpenAI Provider ============

/// Chat completions against the OpenAI API (or a compatible base URL).
///
/// Requires `OPENAI_API_KEY`.
pub struct OpenAIChat {
    chat_model: String,
    classifier_model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            chat_model: config.chat_model.clone(),
            classifier_model: config.classifier_model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Chat => &self.chat_model,
            ModelTier::Classifier => &self.classifier_model,
        }
    }

    async fn chat(
        &self,
        req: &ModelRequest,
        response_format: Option<serde_json::Value>,
    ) -> Result<String, ModelError> {
        let mut body = serde_json::json!({
            "model": self.model_for(req.tier),
            "messages": req.messages,
            "temperature": if req.mode == CallMode::Silent { 0.0 } else { 0.3 },
        });
        if let Some(format) = response_format {
            body["response_format"] = format;
        }
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let (url, body) = (&url, &body);
        retry_with_backoff(req.purpose, self.max_retries, Duration::from_secs(1), move || async move {
            let resp = self
                .client
                .post(url.as_str())
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            let response = match resp {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    return Err(ModelError::Transient(format!("request timed out: {}", e)));
                }
                Err(e) => return Err(ModelError::Transient(e.to_string())),
            };

            let status = response.status();
            if status.is_success() {
                let json: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| ModelError::Fatal(format!("invalid response body: {}", e)))?;
                return parse_chat_response(&json);
            }

            let text = response.text().await.unwrap_or_default();
            Err(classify_status(status.as_u16(), &text))
        })
        .await
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, or
/// `max_retries` retries are spent. Delay doubles from `base`, capped at 32x.
async fn retry_with_backoff<T, F, Fut>(
    purpose: &'static str,
    max_retries: u32,
    base: Duration,
    mut call: F,
) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ModelError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = base * (1u32 << (attempt - 1).min(5));
                tracing::warn!(purpose, attempt, ?delay, error = %e, "retrying model call");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn classify_status(status: u16, body: &str) -> ModelError {
    let msg = format!("HTTP {}: {}", status, body);
    if status == 429 && body.contains("insufficient_quota") {
        ModelError::Quota(msg)
    } else if status == 429 || status >= 500 {
        ModelError::Transient(msg)
    } else {
        ModelError::Fatal(msg)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String, ModelError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ModelError::Fatal("response missing choices[0].message.content".into()))
}

#[async_trait]
impl ModelProvider for OpenAIChat {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, req: &ModelRequest) -> Result<String, ModelError> {
        tracing::debug!(purpose = req.purpose, mode = ?req.mode, "model completion");
        self.chat(req, None).await
    }

    async fn structured(
        &self,
        req: &ModelRequest,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, ModelError> {
        tracing::debug!(purpose = req.purpose, mode = ?req.mode, "model structured call");
        let format = serde_json::json!({
            "type": "json_schema",
            "json_schema": { "name": req.purpose, "schema": schema },
        });
        let text = self.chat(req, Some(format)).await?;
        serde_json::from_str(&text)
            .map_err(|e| ModelError::Fatal(format!("{} returned invalid JSON: {}", req.purpose, e)))
    }
}

/// Create the configured [`ModelProvider`].
pub fn create_model(config: &ModelConfig) -> anyhow::Result<std::sync::Arc<dyn ModelProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(std::sync::Arc::new(DisabledModel)),
        "openai" => Ok(std::sync::Arc::new(OpenAIChat::new(config)?)),
        other => anyhow::bail!("Unknown model provider: {}", other),
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted provider for unit tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Handler = dyn Fn(&ModelRequest) -> Result<serde_json::Value, ModelError> + Send + Sync;

    /// Answers each call through `handler`, keyed on `req.purpose`.
    /// `complete` expects the handler to return a JSON string.
    pub struct FakeModel {
        handler: Box<Handler>,
        pub calls: AtomicUsize,
        pub purposes: Mutex<Vec<&'static str>>,
    }

    impl FakeModel {
        pub fn new(
            handler: impl Fn(&ModelRequest) -> Result<serde_json::Value, ModelError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Box::new(handler),
                calls: AtomicUsize::new(0),
                purposes: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn purposes(&self) -> Vec<&'static str> {
            self.purposes.lock().unwrap().clone()
        }

        fn record(&self, req: &ModelRequest) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.purposes.lock().unwrap().push(req.purpose);
        }
    }

    #[async_trait]
    impl ModelProvider for FakeModel {
        fn name(&self) -> &str {
            "fake"
        }
        async fn complete(&self, req: &ModelRequest) -> Result<String, ModelError> {
            self.record(req);
            let v = (self.handler)(req)?;
            Ok(v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
        }
        async fn structured(
            &self,
            req: &ModelRequest,
            _schema: &serde_json::Value,
        ) -> Result<serde_json::Value, ModelError> {
            self.record(req);
            (self.handler)(req)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(429, "slow down"), ModelError::Transient(_)));
        assert!(matches!(
            classify_status(429, "{\"error\":{\"code\":\"insufficient_quota\"}}"),
            ModelError::Quota(_)
        ));
        assert!(matches!(classify_status(503, ""), ModelError::Transient(_)));
        assert!(matches!(classify_status(401, ""), ModelError::Fatal(_)));
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(parse_chat_response(&json).unwrap(), "hi");
        assert!(parse_chat_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ModelError::Transient("503".into()).is_retryable());
        assert!(ModelError::Quota("insufficient_quota".into()).is_retryable());
        assert!(!ModelError::Fatal("401".into()).is_retryable());
        assert!(!ModelError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[tokio::test]
    async fn test_quota_is_retried_then_succeeds() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result = retry_with_backoff("t", 3, Duration::ZERO, || {
            let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(classify_status(429, "{\"error\":{\"code\":\"insufficient_quota\"}}"))
                } else {
                    Ok("answer")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "answer");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff("t", 2, Duration::ZERO, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(ModelError::Quota("still out".into())) }
        })
        .await;
        assert!(matches!(result, Err(ModelError::Quota(_))));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff("t", 5, Duration::ZERO, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(ModelError::Fatal("401".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed() {
        let result: Result<(), ModelError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ModelError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_structured_as_rejects_mismatch() {
        #[derive(Debug, Deserialize)]
        struct Out {
            #[allow(dead_code)]
            category: String,
        }
        let model = fake::FakeModel::new(|_| Ok(serde_json::json!({"other": 1})));
        let req = ModelRequest::silent("t", ModelTier::Classifier, "s", "u");
        let out: Result<Out, _> = structured_as(&model, &req, &serde_json::json!({})).await;
        assert!(matches!(out, Err(ModelError::Fatal(_))));
        assert_eq!(model.call_count(), 1);
    }
}
