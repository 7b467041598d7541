//! ClickUp adapter: tasks land in a configured list.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{
    categorize_failure, categorize_request_error, DispatchOutcome, ExternalTask,
    IntegrationClient, TaskProjection, HTTP_TIMEOUT,
};
use crate::error::IntegrationError;
use crate::models::Priority;

const DEFAULT_BASE_URL: &str = "https://api.clickup.com/api/v2";

pub struct ClickUpClient {
    client: Client,
    api_token: Option<String>,
    list_id: Option<String>,
    base_url: String,
}

impl ClickUpClient {
    pub fn new(api_token: Option<String>, list_id: Option<String>) -> Self {
        Self::with_base_url(api_token, list_id, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(
        api_token: Option<String>,
        list_id: Option<String>,
        base_url: String,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("failed to build http client"),
            api_token,
            list_id,
            base_url,
        }
    }
}

/// ClickUp's priority scale is numeric and inverted: 1 urgent .. 4 low.
fn clickup_priority(priority: Priority) -> u8 {
    match priority {
        Priority::Urgent => 1,
        Priority::High => 2,
        Priority::Medium => 3,
        Priority::Low => 4,
    }
}

#[async_trait]
impl IntegrationClient for ClickUpClient {
    fn platform(&self) -> &'static str {
        "clickup"
    }

    fn enabled(&self) -> bool {
        self.api_token.is_some() && self.list_id.is_some()
    }

    async fn create_task(
        &self,
        projection: &TaskProjection,
    ) -> Result<DispatchOutcome, IntegrationError> {
        let (token, list_id) = match (&self.api_token, &self.list_id) {
            (Some(token), Some(list)) => (token, list),
            _ => return Ok(DispatchOutcome::Disabled),
        };

        // The assignee is carried in the description: ClickUp assignment
        // needs workspace user ids the projection does not know about.
        let description = match &projection.assignee {
            Some(assignee) => format!("Assignee: {}\n\n{}", assignee, projection.description),
            None => projection.description.clone(),
        };

        let body = json!({
            "name": projection.title,
            "description": description,
            "priority": clickup_priority(projection.priority),
        });

        let response = self
            .client
            .post(format!("{}/list/{}/task", self.base_url, list_id))
            .header("Authorization", token)
            .json(&body)
            .send()
            .await
            .map_err(|e| categorize_request_error("clickup", e))?;

        if !response.status().is_success() {
            return Err(categorize_failure("clickup", response).await);
        }

        let task: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IntegrationError::Permanent(format!("clickup response parse: {}", e)))?;

        let external_id = task
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let external_url = task
            .get("url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("https://app.clickup.com/t/{}", external_id));

        Ok(DispatchOutcome::Created(ExternalTask {
            external_id,
            external_url,
        }))
    }

    async fn notify(&self, _message: &str) -> Result<(), IntegrationError> {
        // ClickUp notifications ride on task creation itself.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_scale_is_inverted() {
        assert_eq!(clickup_priority(Priority::Urgent), 1);
        assert_eq!(clickup_priority(Priority::High), 2);
        assert_eq!(clickup_priority(Priority::Medium), 3);
        assert_eq!(clickup_priority(Priority::Low), 4);
    }

    #[tokio::test]
    async fn disabled_without_credentials() {
        let client = ClickUpClient::new(Some("token".into()), None);
        assert!(!client.enabled());
        let projection = TaskProjection {
            title: "t".into(),
            description: String::new(),
            assignee: None,
            priority: Priority::Low,
        };
        let outcome = client.create_task(&projection).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Disabled));
    }

    #[tokio::test]
    async fn creates_task_in_list() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/list/901/task")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"86c0","url":"https://app.clickup.com/t/86c0"}"#)
            .create_async()
            .await;

        let client = ClickUpClient::with_base_url(
            Some("pk_token".into()),
            Some("901".into()),
            server.url(),
        );
        let projection = TaskProjection {
            title: "Update the docs".into(),
            description: "Refresh onboarding".into(),
            assignee: Some("John".into()),
            priority: Priority::High,
        };
        let outcome = client.create_task(&projection).await.unwrap();

        match outcome {
            DispatchOutcome::Created(ext) => {
                assert_eq!(ext.external_id, "86c0");
                assert_eq!(ext.external_url, "https://app.clickup.com/t/86c0");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        mock.assert_async().await;
    }
}
