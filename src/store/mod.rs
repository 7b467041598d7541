pub mod mysql;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{DatabaseConfig, DatabaseType};
use crate::error::StoreError;
use crate::models::{
    ExternalTaskRef, ExtractedTask, Meeting, MeetingListItem, Participant, SummaryDocument,
    TaskRecord, TranscriptChunk,
};

/// Retries applied to the single-transaction extraction-run write when the
/// failure is transient.
const TRANSACTION_RETRIES: u32 = 2;

/// Durable persistence behind one interface. The embedded and remote
/// implementations expose identical schema and behavior; the choice is made
/// once at startup and never changes.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_meeting(&self, meeting: &Meeting) -> Result<(), StoreError>;

    async fn save_participants_batch(
        &self,
        meeting_id: &str,
        participants: &[Participant],
    ) -> Result<(), StoreError>;

    /// Append one transcript chunk. Fingerprint collisions are idempotent
    /// successes; the returned flag reports whether the chunk already
    /// existed.
    async fn append_transcript_chunk(
        &self,
        meeting_id: &str,
        chunk: &TranscriptChunk,
    ) -> Result<bool, StoreError>;

    /// Replace the meeting's summary document (last-writer-wins).
    async fn save_summary(
        &self,
        meeting_id: &str,
        summary: &SummaryDocument,
    ) -> Result<(), StoreError>;

    /// Upsert tasks by `(meeting_id, ai_task_id)`, returning the persisted
    /// rows with surrogate ids.
    async fn save_tasks(
        &self,
        meeting_id: &str,
        tasks: &[ExtractedTask],
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Persist a whole extraction run (summary + tasks) in one transaction.
    /// Partial failure rolls back the entire run.
    async fn save_extraction_run(
        &self,
        meeting_id: &str,
        summary: &SummaryDocument,
        tasks: &[ExtractedTask],
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Record an external platform ref; idempotent by `(task_id, platform)`.
    async fn record_external_ref(
        &self,
        task_id: i64,
        platform: &str,
        external_id: &str,
        external_url: &str,
    ) -> Result<(), StoreError>;

    async fn get_external_refs(&self, task_id: i64) -> Result<Vec<ExternalTaskRef>, StoreError>;

    async fn get_meetings(&self) -> Result<Vec<MeetingListItem>, StoreError>;

    async fn get_meeting(&self, id: &str) -> Result<Option<Meeting>, StoreError>;

    async fn get_participants(&self, meeting_id: &str) -> Result<Vec<Participant>, StoreError>;

    async fn get_transcript_chunks(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<TranscriptChunk>, StoreError>;

    /// Tasks for one meeting, or all tasks when no meeting is given.
    async fn get_tasks(&self, meeting_id: Option<&str>) -> Result<Vec<TaskRecord>, StoreError>;

    async fn get_summary(&self, meeting_id: &str) -> Result<Option<SummaryDocument>, StoreError>;

    /// Delete a meeting and everything it owns.
    async fn delete_meeting(&self, id: &str) -> Result<(), StoreError>;
}

/// Open the store selected by configuration and run schema migration.
pub async fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config.db_type {
        DatabaseType::Embedded => {
            info!("opening embedded store at {}", config.path.display());
            let store = sqlite::SqliteStore::connect(&config.path).await?;
            Ok(Arc::new(store))
        }
        DatabaseType::Remote => {
            let host = config
                .host
                .as_deref()
                .ok_or_else(|| StoreError::Config("remote store requires a host".into()))?;
            info!("connecting to remote store at {}:{}", host, config.port);
            let store = mysql::MySqlStore::connect(config).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Run a fallible transactional write with bounded retries on transient
/// failures. Shared by both store implementations.
pub(crate) async fn with_transient_retry<T, F, Fut>(op: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < TRANSACTION_RETRIES && e.is_transient() => {
                attempt += 1;
                warn!("transient store failure (attempt {}): {}", attempt, e);
                tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Serialize the opaque dependency list for the `dependencies_json` column.
pub(crate) fn dependencies_to_json(deps: &[String]) -> String {
    serde_json::to_string(deps).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn dependencies_from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}
