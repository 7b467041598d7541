//! Slack adapter: an incoming webhook. `create_task` posts a formatted task
//! card; `notify` posts plain text. Webhooks return no message id, so the
//! recorded ref carries a generated surrogate id.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

use super::{
    categorize_failure, categorize_request_error, DispatchOutcome, ExternalTask,
    IntegrationClient, TaskProjection, HTTP_TIMEOUT,
};
use crate::error::IntegrationError;

pub struct SlackClient {
    client: Client,
    webhook_url: Option<String>,
}

impl SlackClient {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("failed to build http client"),
            webhook_url,
        }
    }

    async fn post(&self, text: String) -> Result<(), IntegrationError> {
        let url = match &self.webhook_url {
            Some(url) => url,
            None => return Ok(()),
        };

        let response = self
            .client
            .post(url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| categorize_request_error("slack", e))?;

        if !response.status().is_success() {
            return Err(categorize_failure("slack", response).await);
        }
        Ok(())
    }
}

fn format_task(projection: &TaskProjection) -> String {
    let mut text = format!(
        ":clipboard: *New task:* {}\n*Priority:* {}",
        projection.title,
        projection.priority.as_str()
    );
    if let Some(assignee) = &projection.assignee {
        text.push_str(&format!("\n*Assignee:* {}", assignee));
    }
    if !projection.description.is_empty() {
        text.push_str(&format!("\n{}", projection.description));
    }
    text
}

#[async_trait]
impl IntegrationClient for SlackClient {
    fn platform(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn create_task(
        &self,
        projection: &TaskProjection,
    ) -> Result<DispatchOutcome, IntegrationError> {
        if self.webhook_url.is_none() {
            return Ok(DispatchOutcome::Disabled);
        }

        self.post(format_task(projection)).await?;

        // No id comes back from a webhook; record a surrogate so the
        // (task, platform) dispatch stays idempotent.
        let external_id = format!("slack-{}", Uuid::new_v4());
        Ok(DispatchOutcome::Created(ExternalTask {
            external_id,
            external_url: "slack://webhook".to_string(),
        }))
    }

    async fn notify(&self, message: &str) -> Result<(), IntegrationError> {
        self.post(message.to_string()).await
    }
}
