//! Notion adapter: tasks become pages in a configured database.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{
    categorize_failure, categorize_request_error, DispatchOutcome, ExternalTask,
    IntegrationClient, TaskProjection, HTTP_TIMEOUT,
};
use crate::error::IntegrationError;

const NOTION_VERSION: &str = "2022-06-28";
const DEFAULT_BASE_URL: &str = "https://api.notion.com";

pub struct NotionClient {
    client: Client,
    api_key: Option<String>,
    database_id: Option<String>,
    base_url: String,
}

impl NotionClient {
    pub fn new(api_key: Option<String>, database_id: Option<String>) -> Self {
        Self::with_base_url(api_key, database_id, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(
        api_key: Option<String>,
        database_id: Option<String>,
        base_url: String,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("failed to build http client"),
            api_key,
            database_id,
            base_url,
        }
    }
}

#[async_trait]
impl IntegrationClient for NotionClient {
    fn platform(&self) -> &'static str {
        "notion"
    }

    fn enabled(&self) -> bool {
        self.api_key.is_some() && self.database_id.is_some()
    }

    async fn create_task(
        &self,
        projection: &TaskProjection,
    ) -> Result<DispatchOutcome, IntegrationError> {
        let (api_key, database_id) = match (&self.api_key, &self.database_id) {
            (Some(key), Some(db)) => (key, db),
            _ => return Ok(DispatchOutcome::Disabled),
        };

        // Priority maps onto a select option carrying the same name; the
        // target database is expected to define low/medium/high/urgent.
        let mut properties = json!({
            "Name": {
                "title": [{"text": {"content": projection.title}}]
            },
            "Priority": {
                "select": {"name": projection.priority.as_str()}
            },
        });
        if let Some(assignee) = &projection.assignee {
            properties["Assignee"] = json!({
                "rich_text": [{"text": {"content": assignee}}]
            });
        }

        let mut body = json!({
            "parent": {"database_id": database_id},
            "properties": properties,
        });
        if !projection.description.is_empty() {
            body["children"] = json!([{
                "object": "block",
                "type": "paragraph",
                "paragraph": {
                    "rich_text": [{"text": {"content": projection.description}}]
                }
            }]);
        }

        let response = self
            .client
            .post(format!("{}/v1/pages", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Notion-Version", NOTION_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| categorize_request_error("notion", e))?;

        if !response.status().is_success() {
            return Err(categorize_failure("notion", response).await);
        }

        let page: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IntegrationError::Permanent(format!("notion response parse: {}", e)))?;

        let external_id = page
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let external_url = page
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(DispatchOutcome::Created(ExternalTask {
            external_id,
            external_url,
        }))
    }

    async fn notify(&self, _message: &str) -> Result<(), IntegrationError> {
        // Notion has no notification surface; task pages are the signal.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    fn projection() -> TaskProjection {
        TaskProjection {
            title: "Update the docs".into(),
            description: "Refresh onboarding".into(),
            assignee: Some("John".into()),
            priority: Priority::Medium,
        }
    }

    #[tokio::test]
    async fn disabled_without_credentials() {
        let client = NotionClient::new(None, None);
        assert!(!client.enabled());
        let outcome = client.create_task(&projection()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Disabled));
    }

    #[tokio::test]
    async fn creates_page_and_returns_ref() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/pages")
            .match_header("notion-version", NOTION_VERSION)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"page-123","url":"https://notion.so/page-123"}"#)
            .create_async()
            .await;

        let client = NotionClient::with_base_url(
            Some("secret".into()),
            Some("db-1".into()),
            server.url(),
        );
        let outcome = client.create_task(&projection()).await.unwrap();

        match outcome {
            DispatchOutcome::Created(ext) => {
                assert_eq!(ext.external_id, "page-123");
                assert_eq!(ext.external_url, "https://notion.so/page-123");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn auth_failure_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/pages")
            .with_status(401)
            .with_body(r#"{"message":"unauthorized"}"#)
            .create_async()
            .await;

        let client = NotionClient::with_base_url(
            Some("bad".into()),
            Some("db-1".into()),
            server.url(),
        );
        let err = client.create_task(&projection()).await.unwrap_err();
        assert!(matches!(err, IntegrationError::Permanent(_)));
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/pages")
            .with_status(429)
            .with_body(r#"{"message":"rate limited"}"#)
            .create_async()
            .await;

        let client = NotionClient::with_base_url(
            Some("secret".into()),
            Some("db-1".into()),
            server.url(),
        );
        let err = client.create_task(&projection()).await.unwrap_err();
        assert!(matches!(err, IntegrationError::Transient(_)));
    }
}
