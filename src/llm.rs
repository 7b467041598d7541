use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::{LlmConfig, LlmProvider};
use crate::error::LlmError;

/// Hard cap on in-flight LLM calls per process.
const MAX_CONCURRENT_COMPLETIONS: usize = 4;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The document shape a completion is expected to produce. Carries the
/// deterministic stub returned in fallback mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaHint {
    Speakers,
    Summary,
    ChunkSummary,
    Tasks,
}

impl SchemaHint {
    /// Schema-valid empty document used when no provider is available.
    pub fn empty_document(&self) -> Value {
        match self {
            SchemaHint::Speakers => json!({
                "speakers": [],
                "confidence": 0.0,
                "identification_method": "fallback",
            }),
            SchemaHint::Summary | SchemaHint::ChunkSummary => json!({
                "overview": "",
                "key_outcomes": [],
                "decisions": [],
                "participants": [],
                "next_steps": [],
            }),
            SchemaHint::Tasks => json!({ "tasks": [] }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub value: Value,
    pub fallback_used: bool,
}

/// Provider-agnostic text-in/JSON-out completion client. One instance per
/// process, constructed at startup and never reconfigured.
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
    permits: Semaphore,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build http client");

        Self {
            client,
            config,
            permits: Semaphore::new(MAX_CONCURRENT_COMPLETIONS),
        }
    }

    pub fn fallback_mode(&self) -> bool {
        self.config.fallback_mode()
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    /// Run one completion. In fallback mode the schema's stub document is
    /// returned without any network traffic and `fallback_used` is set so
    /// downstream confidence labeling can zero out.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        schema: SchemaHint,
    ) -> Result<Completion, LlmError> {
        if self.fallback_mode() {
            debug!("llm fallback mode, returning stub document");
            return Ok(Completion {
                value: schema.empty_document(),
                fallback_used: true,
            });
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .expect("llm semaphore closed");

        let mut attempt = 0u32;
        let content = loop {
            match self.request_once(system, user).await {
                Ok(content) => break content,
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "llm call failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let value = parse_json_content(&content)?;
        Ok(Completion {
            value,
            fallback_used: false,
        })
    }

    async fn request_once(&self, system: &str, user: &str) -> Result<String, LlmError> {
        match self.config.provider {
            LlmProvider::OpenAi | LlmProvider::Groq => self.chat_completions(system, user).await,
            LlmProvider::Anthropic => self.anthropic_messages(system, user).await,
            LlmProvider::Ollama => self.ollama_chat(system, user).await,
            LlmProvider::None => unreachable!("fallback mode handled by caller"),
        }
    }

    fn base_url(&self) -> String {
        if let Some(base) = &self.config.base_url {
            return base.trim_end_matches('/').to_string();
        }
        match self.config.provider {
            LlmProvider::OpenAi => "https://api.openai.com/v1".to_string(),
            LlmProvider::Groq => "https://api.groq.com/openai/v1".to_string(),
            LlmProvider::Anthropic => "https://api.anthropic.com".to_string(),
            LlmProvider::Ollama => "http://localhost:11434".to_string(),
            LlmProvider::None => String::new(),
        }
    }

    /// OpenAI-compatible chat completions (OpenAI and Groq).
    async fn chat_completions(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let mut body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": 0.2,
        });
        if self.config.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url()))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let json = check_status_and_parse(response).await?;
        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Parse("missing choices[0].message.content".to_string()))
    }

    async fn anthropic_messages(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": 4096,
            "system": system,
            "messages": [
                {"role": "user", "content": user}
            ],
        });

        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url()))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let json = check_status_and_parse(response).await?;
        json.get("content")
            .and_then(|c| c.get(0))
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Parse("missing content[0].text".to_string()))
    }

    async fn ollama_chat(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let mut body = json!({
            "model": self.config.model,
            "stream": false,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
        });
        if self.config.json_mode {
            body["format"] = json!("json");
        }

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let json = check_status_and_parse(response).await?;
        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Parse("missing message.content".to_string()))
    }

    fn map_request_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.config.timeout_secs)
        } else {
            LlmError::Http(e)
        }
    }
}

async fn check_status_and_parse(response: reqwest::Response) -> Result<Value, LlmError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status: status.as_u16(),
            body,
        });
    }
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| LlmError::Parse(e.to_string()))
}

fn is_retryable(e: &LlmError) -> bool {
    match e {
        LlmError::Api { status, .. } => *status == 429 || *status >= 500,
        LlmError::Http(e) => e.is_connect(),
        LlmError::Timeout(_) => true,
        LlmError::Parse(_) => false,
    }
}

/// Parse the model output as JSON. Models sometimes wrap the object in
/// prose or code fences; salvage the outermost object substring before
/// giving up.
fn parse_json_content(content: &str) -> Result<Value, LlmError> {
    if let Ok(v) = serde_json::from_str::<Value>(content) {
        return Ok(v);
    }
    if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) {
        if end > start {
            if let Ok(v) = serde_json::from_str::<Value>(&content[start..=end]) {
                return Ok(v);
            }
        }
    }
    Err(LlmError::Parse(format!(
        "no json object in response: {}",
        content.chars().take(120).collect::<String>()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmProvider;

    fn test_config(provider: LlmProvider, base_url: Option<String>) -> LlmConfig {
        LlmConfig {
            provider,
            model: "test-model".into(),
            api_key: Some("test-key".into()),
            timeout_secs: 5,
            max_retries: 0,
            json_mode: true,
            base_url,
        }
    }

    #[test]
    fn parse_direct_json() {
        let v = parse_json_content(r#"{"tasks": []}"#).unwrap();
        assert!(v["tasks"].as_array().unwrap().is_empty());
    }

    #[test]
    fn parse_json_embedded_in_prose() {
        let v = parse_json_content("Sure, here you go:\n```json\n{\"tasks\": [{\"title\": \"x\"}]}\n```").unwrap();
        assert_eq!(v["tasks"][0]["title"], "x");
    }

    #[test]
    fn parse_garbage_fails() {
        assert!(parse_json_content("no json here").is_err());
    }

    #[tokio::test]
    async fn fallback_mode_returns_stub_without_network() {
        let mut cfg = test_config(LlmProvider::OpenAi, None);
        cfg.api_key = None;
        let client = LlmClient::new(cfg);

        let result = client.complete("sys", "user", SchemaHint::Tasks).await.unwrap();
        assert!(result.fallback_used);
        assert!(result.value["tasks"].as_array().unwrap().is_empty());

        let result = client.complete("sys", "user", SchemaHint::Summary).await.unwrap();
        assert!(result.fallback_used);
        assert_eq!(result.value["overview"], "");
    }

    #[tokio::test]
    async fn openai_compatible_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"content":"{\"tasks\":[{\"title\":\"Update docs\"}]}"}}]}"#,
            )
            .create_async()
            .await;

        let client = LlmClient::new(test_config(LlmProvider::OpenAi, Some(server.url())));
        let result = client.complete("sys", "user", SchemaHint::Tasks).await.unwrap();

        assert!(!result.fallback_used);
        assert_eq!(result.value["tasks"][0]["title"], "Update docs");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_body(r#"{"error":"bad request"}"#)
            .expect(1)
            .create_async()
            .await;

        let mut cfg = test_config(LlmProvider::OpenAi, Some(server.url()));
        cfg.max_retries = 2;
        let client = LlmClient::new(cfg);
        let err = client.complete("sys", "user", SchemaHint::Tasks).await.unwrap_err();

        assert!(matches!(err, LlmError::Api { status: 400, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("boom")
            .expect(3)
            .create_async()
            .await;

        let mut cfg = test_config(LlmProvider::OpenAi, Some(server.url()));
        cfg.max_retries = 2;
        let client = LlmClient::new(cfg);
        let err = client.complete("sys", "user", SchemaHint::Tasks).await.unwrap_err();

        assert!(matches!(err, LlmError::Api { status: 500, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn ollama_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":{"role":"assistant","content":"{\"overview\":\"short sync\",\"key_outcomes\":[],\"decisions\":[],\"participants\":[],\"next_steps\":[]}"}}"#)
            .create_async()
            .await;

        let mut cfg = test_config(LlmProvider::Ollama, Some(server.url()));
        cfg.api_key = None;
        let client = LlmClient::new(cfg);
        let result = client.complete("sys", "user", SchemaHint::Summary).await.unwrap();

        assert!(!result.fallback_used);
        assert_eq!(result.value["overview"], "short sync");
        mock.assert_async().await;
    }
}
