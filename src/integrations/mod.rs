pub mod clickup;
pub mod notion;
pub mod slack;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::warn;

use crate::config::IntegrationsConfig;
use crate::error::IntegrationError;
use crate::models::Priority;

/// Global cap on concurrent dispatches across all tasks and platforms,
/// protecting the external APIs.
const MAX_CONCURRENT_DISPATCHES: usize = 16;

/// Retries applied to transient dispatch failures.
const DISPATCH_RETRIES: u32 = 2;

pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// The integration-facing subset of a task. This struct is the entire
/// surface an adapter may read; adapters never see (or mutate) the full
/// persisted record.
#[derive(Debug, Clone, Serialize)]
pub struct TaskProjection {
    pub title: String,
    pub description: String,
    pub assignee: Option<String>,
    pub priority: Priority,
}

#[derive(Debug, Clone)]
pub struct ExternalTask {
    pub external_id: String,
    pub external_url: String,
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Created(ExternalTask),
    /// Adapter has no credential; nothing was sent and no ref is recorded.
    Disabled,
}

/// Uniform per-platform contract. Each adapter owns its HTTP client,
/// authentication, and rate limits.
#[async_trait]
pub trait IntegrationClient: Send + Sync {
    fn platform(&self) -> &'static str;

    fn enabled(&self) -> bool;

    async fn create_task(
        &self,
        projection: &TaskProjection,
    ) -> Result<DispatchOutcome, IntegrationError>;

    async fn notify(&self, message: &str) -> Result<(), IntegrationError>;
}

/// All configured adapters plus the global dispatch limiter.
pub struct IntegrationRegistry {
    clients: Vec<Arc<dyn IntegrationClient>>,
    permits: Semaphore,
}

impl IntegrationRegistry {
    pub fn from_config(config: &IntegrationsConfig) -> Self {
        let clients: Vec<Arc<dyn IntegrationClient>> = vec![
            Arc::new(notion::NotionClient::new(
                config.notion_api_key.clone(),
                config.notion_database_id.clone(),
            )),
            Arc::new(clickup::ClickUpClient::new(
                config.clickup_api_token.clone(),
                config.clickup_list_id.clone(),
            )),
            Arc::new(slack::SlackClient::new(config.slack_webhook_url.clone())),
        ];

        for client in &clients {
            if !client.enabled() {
                warn!(
                    "{} integration disabled: credential not configured",
                    client.platform()
                );
            }
        }

        Self {
            clients,
            permits: Semaphore::new(MAX_CONCURRENT_DISPATCHES),
        }
    }

    #[cfg(test)]
    pub fn with_clients(clients: Vec<Arc<dyn IntegrationClient>>) -> Self {
        Self {
            clients,
            permits: Semaphore::new(MAX_CONCURRENT_DISPATCHES),
        }
    }

    pub fn clients(&self) -> &[Arc<dyn IntegrationClient>] {
        &self.clients
    }

    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.permits
            .acquire()
            .await
            .expect("dispatch semaphore closed")
    }

    /// Names and schemas of registered integrations, for the tool listing
    /// endpoint.
    pub fn describe(&self) -> Vec<Value> {
        self.clients
            .iter()
            .map(|c| {
                json!({
                    "name": c.platform(),
                    "enabled": c.enabled(),
                    "input_schema": {
                        "title": "string",
                        "description": "string",
                        "assignee": "string | null",
                        "priority": "low | medium | high | urgent",
                    },
                    "output_schema": {
                        "external_id": "string",
                        "external_url": "string",
                    },
                })
            })
            .collect()
    }
}

/// Dispatch through an adapter with the transient-retry policy applied.
pub async fn dispatch_with_retry(
    client: &dyn IntegrationClient,
    projection: &TaskProjection,
) -> Result<DispatchOutcome, IntegrationError> {
    let mut attempt = 0u32;
    loop {
        match client.create_task(projection).await {
            Err(IntegrationError::Transient(msg)) if attempt < DISPATCH_RETRIES => {
                attempt += 1;
                let delay = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                warn!(
                    "{} dispatch transient failure (attempt {}), retrying in {:?}: {}",
                    client.platform(),
                    attempt,
                    delay,
                    msg
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Map an HTTP response status onto the error taxonomy shared by all
/// adapters.
pub(crate) async fn categorize_failure(
    platform: &str,
    response: reqwest::Response,
) -> IntegrationError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("{} returned {}: {}", platform, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        IntegrationError::Transient(message)
    } else {
        IntegrationError::Permanent(message)
    }
}

pub(crate) fn categorize_request_error(platform: &str, e: reqwest::Error) -> IntegrationError {
    if e.is_timeout() || e.is_connect() {
        IntegrationError::Transient(format!("{} request failed: {}", platform, e))
    } else {
        IntegrationError::Permanent(format!("{} request failed: {}", platform, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn projection_serializes_exactly_four_fields() {
        let projection = TaskProjection {
            title: "Update the docs".into(),
            description: "Refresh onboarding".into(),
            assignee: Some("John".into()),
            priority: Priority::Medium,
        };
        let v = serde_json::to_value(&projection).unwrap();
        let mut keys: Vec<&str> = v.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["assignee", "description", "priority", "title"]);
    }

    struct FlakyClient {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl IntegrationClient for FlakyClient {
        fn platform(&self) -> &'static str {
            "flaky"
        }

        fn enabled(&self) -> bool {
            true
        }

        async fn create_task(
            &self,
            _projection: &TaskProjection,
        ) -> Result<DispatchOutcome, IntegrationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(IntegrationError::Transient("503".into()))
            } else {
                Ok(DispatchOutcome::Created(ExternalTask {
                    external_id: "ext-1".into(),
                    external_url: "https://example.com/ext-1".into(),
                }))
            }
        }

        async fn notify(&self, _message: &str) -> Result<(), IntegrationError> {
            Ok(())
        }
    }

    fn projection() -> TaskProjection {
        TaskProjection {
            title: "t".into(),
            description: String::new(),
            assignee: None,
            priority: Priority::Low,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_succeed() {
        let client = FlakyClient {
            calls: AtomicU32::new(0),
            fail_times: 2,
        };
        let outcome = dispatch_with_retry(&client, &projection()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Created(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_failures_stop_after_max_retries() {
        let client = FlakyClient {
            calls: AtomicU32::new(0),
            fail_times: 10,
        };
        let err = dispatch_with_retry(&client, &projection()).await.unwrap_err();
        assert!(matches!(err, IntegrationError::Transient(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    struct PermanentClient;

    #[async_trait]
    impl IntegrationClient for PermanentClient {
        fn platform(&self) -> &'static str {
            "permanent"
        }

        fn enabled(&self) -> bool {
            true
        }

        async fn create_task(
            &self,
            _projection: &TaskProjection,
        ) -> Result<DispatchOutcome, IntegrationError> {
            Err(IntegrationError::Permanent("401".into()))
        }

        async fn notify(&self, _message: &str) -> Result<(), IntegrationError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let err = dispatch_with_retry(&PermanentClient, &projection())
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Permanent(_)));
    }
}
