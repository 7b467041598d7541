//! Two-layer task handling: the store keeps every AI-extracted field; the
//! integration platforms receive only the subset they accept. Dispatch is
//! idempotent per (task, platform).

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::integrations::{
    dispatch_with_retry, DispatchOutcome, IntegrationRegistry, TaskProjection,
};
use crate::models::{ExtractedTask, TaskRecord};
use crate::store::Store;

/// Outcome of dispatching one task to one platform.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub task_id: i64,
    pub platform: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MaterializeOutcome {
    pub records: Vec<TaskRecord>,
    pub dispatches: Vec<DispatchResult>,
}

pub struct TaskProjector {
    store: Arc<dyn Store>,
    integrations: Arc<IntegrationRegistry>,
}

impl TaskProjector {
    pub fn new(store: Arc<dyn Store>, integrations: Arc<IntegrationRegistry>) -> Self {
        Self {
            store,
            integrations,
        }
    }

    /// The sole location where field-mapping decisions live. Supporting a
    /// new field for the platforms means adding it here and nowhere else.
    pub fn project(task: &ExtractedTask) -> TaskProjection {
        TaskProjection {
            title: task.title.clone(),
            description: task.description.clone(),
            assignee: task.assignee.clone(),
            priority: task.priority,
        }
    }

    /// Persist the full records, then dispatch the projection to every
    /// enabled platform that has not already received the task.
    pub async fn materialize_and_dispatch(
        &self,
        meeting_id: &str,
        tasks: &[ExtractedTask],
    ) -> Result<MaterializeOutcome, StoreError> {
        let records = self.store.save_tasks(meeting_id, tasks).await?;
        let dispatches = self.dispatch_records(&records).await;
        Ok(MaterializeOutcome {
            records,
            dispatches,
        })
    }

    /// Dispatch already-persisted records. Failures never unwind the
    /// persisted tasks; they are reported in the results.
    pub async fn dispatch_records(&self, records: &[TaskRecord]) -> Vec<DispatchResult> {
        let mut jobs = Vec::new();

        for record in records {
            let existing: HashSet<String> = match self.store.get_external_refs(record.id).await {
                Ok(refs) => refs.into_iter().map(|r| r.platform).collect(),
                Err(e) => {
                    warn!("failed to read external refs for task {}: {}", record.id, e);
                    continue;
                }
            };

            let projection = Self::project(&record.task);

            for client in self.integrations.clients() {
                let platform = client.platform().to_string();
                if existing.contains(&platform) {
                    jobs.push(Job::Skipped {
                        task_id: record.id,
                        platform,
                    });
                    continue;
                }
                jobs.push(Job::Dispatch {
                    task_id: record.id,
                    platform,
                    client: client.clone(),
                    projection: projection.clone(),
                });
            }
        }

        let futures = jobs.into_iter().map(|job| self.run_job(job));
        futures::future::join_all(futures).await
    }

    async fn run_job(&self, job: Job) -> DispatchResult {
        match job {
            Job::Skipped { task_id, platform } => DispatchResult {
                task_id,
                platform,
                status: "skipped".to_string(),
                external_id: None,
                external_url: None,
                error: None,
            },
            Job::Dispatch {
                task_id,
                platform,
                client,
                projection,
            } => {
                let _permit = self.integrations.acquire().await;
                match dispatch_with_retry(client.as_ref(), &projection).await {
                    Ok(DispatchOutcome::Created(ext)) => {
                        if let Err(e) = self
                            .store
                            .record_external_ref(
                                task_id,
                                &platform,
                                &ext.external_id,
                                &ext.external_url,
                            )
                            .await
                        {
                            warn!(
                                "task {} created on {} but ref not recorded: {}",
                                task_id, platform, e
                            );
                        }
                        info!("task {} dispatched to {}", task_id, platform);
                        DispatchResult {
                            task_id,
                            platform,
                            status: "created".to_string(),
                            external_id: Some(ext.external_id),
                            external_url: Some(ext.external_url),
                            error: None,
                        }
                    }
                    Ok(DispatchOutcome::Disabled) => DispatchResult {
                        task_id,
                        platform,
                        status: "disabled".to_string(),
                        external_id: None,
                        external_url: None,
                        error: None,
                    },
                    Err(e) => {
                        warn!("task {} dispatch to {} failed: {}", task_id, platform, e);
                        DispatchResult {
                            task_id,
                            platform,
                            status: "failed".to_string(),
                            external_id: None,
                            external_url: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        }
    }
}

enum Job {
    Skipped {
        task_id: i64,
        platform: String,
    },
    Dispatch {
        task_id: i64,
        platform: String,
        client: Arc<dyn crate::integrations::IntegrationClient>,
        projection: TaskProjection,
    },
}
