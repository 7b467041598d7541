//! Embedded single-file store used in development and tests.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;

use super::{dependencies_from_json, dependencies_to_json, with_transient_retry, Store};
use crate::error::StoreError;
use crate::models::{
    BusinessImpact, ExplicitLevel, ExternalTaskRef, ExtractedTask, ExtractionMethod, Meeting,
    MeetingListItem, MeetingPlatform, Participant, ParticipantStatus, Priority, SummaryDocument,
    TaskRecord, TaskStatus, TranscriptChunk,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS meetings (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        platform TEXT NOT NULL DEFAULT 'unknown',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS participants (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        meeting_id TEXT NOT NULL REFERENCES meetings(id) ON DELETE CASCADE,
        participant_id TEXT NOT NULL,
        name TEXT NOT NULL,
        platform_id TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        join_time TEXT,
        is_host INTEGER NOT NULL DEFAULT 0,
        UNIQUE (meeting_id, participant_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transcript_chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        meeting_id TEXT NOT NULL REFERENCES meetings(id) ON DELETE CASCADE,
        sequence INTEGER NOT NULL,
        text TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        speaker TEXT,
        confidence REAL,
        fingerprint TEXT NOT NULL,
        UNIQUE (meeting_id, fingerprint)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS summaries (
        meeting_id TEXT PRIMARY KEY REFERENCES meetings(id) ON DELETE CASCADE,
        document TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        meeting_id TEXT NOT NULL REFERENCES meetings(id) ON DELETE CASCADE,
        ai_task_id TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        assignee TEXT,
        due_date TEXT,
        priority TEXT NOT NULL DEFAULT 'low',
        status TEXT NOT NULL DEFAULT 'pending',
        category TEXT NOT NULL DEFAULT 'general',
        business_impact TEXT NOT NULL DEFAULT 'low',
        dependencies_json TEXT NOT NULL DEFAULT '[]',
        mentioned_by TEXT,
        context TEXT,
        explicit_level TEXT NOT NULL DEFAULT 'implied',
        ai_extracted_at TEXT NOT NULL,
        ai_confidence_score REAL NOT NULL DEFAULT 0,
        source_transcript_segment TEXT,
        extraction_method TEXT NOT NULL DEFAULT 'implicit',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (meeting_id, ai_task_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS external_task_refs (
        task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        platform TEXT NOT NULL,
        external_id TEXT NOT NULL,
        external_url TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (task_id, platform)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_meeting ON transcript_chunks(meeting_id, sequence)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_meeting ON tasks(meeting_id)",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps the database
    /// alive and shared.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn row_to_meeting(row: &SqliteRow) -> Meeting {
    Meeting {
        id: row.get("id"),
        title: row.get("title"),
        platform: MeetingPlatform::parse(row.get::<String, _>("platform").as_str()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_participant(row: &SqliteRow) -> Participant {
    Participant {
        participant_id: row.get("participant_id"),
        name: row.get("name"),
        platform_id: row.get("platform_id"),
        status: ParticipantStatus::parse(row.get::<String, _>("status").as_str()),
        is_host: row.get("is_host"),
        join_time: row.get("join_time"),
    }
}

fn row_to_chunk(row: &SqliteRow) -> TranscriptChunk {
    TranscriptChunk {
        sequence: row.get("sequence"),
        text: row.get("text"),
        timestamp: row.get("timestamp"),
        speaker: row.get("speaker"),
        confidence: row.get("confidence"),
        fingerprint: row.get("fingerprint"),
    }
}

fn row_to_task(row: &SqliteRow) -> TaskRecord {
    TaskRecord {
        id: row.get("id"),
        meeting_id: row.get("meeting_id"),
        task: ExtractedTask {
            ai_task_id: row.get("ai_task_id"),
            title: row.get("title"),
            description: row.get("description"),
            assignee: row.get("assignee"),
            due_date: row.get("due_date"),
            priority: Priority::from_cue(row.get::<String, _>("priority").as_str()),
            status: TaskStatus::parse(row.get::<String, _>("status").as_str()),
            category: row.get("category"),
            business_impact: BusinessImpact::parse(
                row.get::<String, _>("business_impact").as_str(),
            ),
            dependencies: dependencies_from_json(
                row.get::<String, _>("dependencies_json").as_str(),
            ),
            mentioned_by: row.get("mentioned_by"),
            context: row.get("context"),
            explicit_level: ExplicitLevel::parse(row.get::<String, _>("explicit_level").as_str()),
            ai_extracted_at: row.get("ai_extracted_at"),
            ai_confidence_score: row.get("ai_confidence_score"),
            source_transcript_segment: row.get("source_transcript_segment"),
            extraction_method: ExtractionMethod::parse(
                row.get::<String, _>("extraction_method").as_str(),
            ),
        },
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn save_summary_conn(
    conn: &mut SqliteConnection,
    meeting_id: &str,
    summary: &SummaryDocument,
) -> Result<(), StoreError> {
    let document =
        serde_json::to_string(summary).map_err(|e| StoreError::Config(e.to_string()))?;
    sqlx::query(
        r#"
        INSERT INTO summaries (meeting_id, document, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(meeting_id) DO UPDATE SET
            document = excluded.document,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(meeting_id)
    .bind(document)
    .bind(now_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn save_tasks_conn(
    conn: &mut SqliteConnection,
    meeting_id: &str,
    tasks: &[ExtractedTask],
) -> Result<Vec<TaskRecord>, StoreError> {
    let now = now_rfc3339();
    let mut records = Vec::with_capacity(tasks.len());

    for task in tasks {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                meeting_id, ai_task_id, title, description, assignee, due_date,
                priority, status, category, business_impact, dependencies_json,
                mentioned_by, context, explicit_level, ai_extracted_at,
                ai_confidence_score, source_transcript_segment, extraction_method,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
            ON CONFLICT(meeting_id, ai_task_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                assignee = excluded.assignee,
                due_date = excluded.due_date,
                priority = excluded.priority,
                status = excluded.status,
                category = excluded.category,
                business_impact = excluded.business_impact,
                dependencies_json = excluded.dependencies_json,
                mentioned_by = excluded.mentioned_by,
                context = excluded.context,
                explicit_level = excluded.explicit_level,
                ai_extracted_at = excluded.ai_extracted_at,
                ai_confidence_score = excluded.ai_confidence_score,
                source_transcript_segment = excluded.source_transcript_segment,
                extraction_method = excluded.extraction_method,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(meeting_id)
        .bind(&task.ai_task_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.assignee)
        .bind(&task.due_date)
        .bind(task.priority.as_str())
        .bind(task.status.as_str())
        .bind(&task.category)
        .bind(task.business_impact.as_str())
        .bind(dependencies_to_json(&task.dependencies))
        .bind(&task.mentioned_by)
        .bind(&task.context)
        .bind(task.explicit_level.as_str())
        .bind(&task.ai_extracted_at)
        .bind(task.ai_confidence_score)
        .bind(&task.source_transcript_segment)
        .bind(task.extraction_method.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query("SELECT * FROM tasks WHERE meeting_id = ?1 AND ai_task_id = ?2")
            .bind(meeting_id)
            .bind(&task.ai_task_id)
            .fetch_one(&mut *conn)
            .await?;
        records.push(row_to_task(&row));
    }

    Ok(records)
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_meeting(&self, meeting: &Meeting) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO meetings (id, title, platform, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                platform = excluded.platform,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&meeting.id)
        .bind(&meeting.title)
        .bind(meeting.platform.as_str())
        .bind(&meeting.created_at)
        .bind(&meeting.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_participants_batch(
        &self,
        meeting_id: &str,
        participants: &[Participant],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for p in participants {
            // Once a participant is marked left, the status stays left.
            sqlx::query(
                r#"
                INSERT INTO participants
                    (meeting_id, participant_id, name, platform_id, status, join_time, is_host)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(meeting_id, participant_id) DO UPDATE SET
                    name = excluded.name,
                    platform_id = excluded.platform_id,
                    status = CASE WHEN participants.status = 'left'
                                  THEN 'left' ELSE excluded.status END,
                    join_time = COALESCE(participants.join_time, excluded.join_time),
                    is_host = excluded.is_host
                "#,
            )
            .bind(meeting_id)
            .bind(&p.participant_id)
            .bind(&p.name)
            .bind(&p.platform_id)
            .bind(p.status.as_str())
            .bind(&p.join_time)
            .bind(p.is_host)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_transcript_chunk(
        &self,
        meeting_id: &str,
        chunk: &TranscriptChunk,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO transcript_chunks
                (meeting_id, sequence, text, timestamp, speaker, confidence, fingerprint)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(meeting_id, fingerprint) DO NOTHING
            "#,
        )
        .bind(meeting_id)
        .bind(chunk.sequence)
        .bind(&chunk.text)
        .bind(chunk.timestamp)
        .bind(&chunk.speaker)
        .bind(chunk.confidence)
        .bind(&chunk.fingerprint)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 0)
    }

    async fn save_summary(
        &self,
        meeting_id: &str,
        summary: &SummaryDocument,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        save_summary_conn(&mut conn, meeting_id, summary).await
    }

    async fn save_tasks(
        &self,
        meeting_id: &str,
        tasks: &[ExtractedTask],
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let records = save_tasks_conn(&mut tx, meeting_id, tasks).await?;
        tx.commit().await?;
        Ok(records)
    }

    async fn save_extraction_run(
        &self,
        meeting_id: &str,
        summary: &SummaryDocument,
        tasks: &[ExtractedTask],
    ) -> Result<Vec<TaskRecord>, StoreError> {
        with_transient_retry(|| async move {
            let mut tx = self.pool.begin().await?;
            save_summary_conn(&mut tx, meeting_id, summary).await?;
            let records = save_tasks_conn(&mut tx, meeting_id, tasks).await?;
            tx.commit().await?;
            Ok(records)
        })
        .await
    }

    async fn record_external_ref(
        &self,
        task_id: i64,
        platform: &str,
        external_id: &str,
        external_url: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO external_task_refs (task_id, platform, external_id, external_url, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(task_id, platform) DO NOTHING
            "#,
        )
        .bind(task_id)
        .bind(platform)
        .bind(external_id)
        .bind(external_url)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_external_refs(&self, task_id: i64) -> Result<Vec<ExternalTaskRef>, StoreError> {
        let rows = sqlx::query(
            "SELECT task_id, platform, external_id, external_url, created_at
             FROM external_task_refs WHERE task_id = ?1 ORDER BY platform",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ExternalTaskRef {
                task_id: row.get("task_id"),
                platform: row.get("platform"),
                external_id: row.get("external_id"),
                external_url: row.get("external_url"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn get_meetings(&self) -> Result<Vec<MeetingListItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.title, m.platform, m.created_at, m.updated_at,
                   (SELECT COUNT(*) FROM participants p WHERE p.meeting_id = m.id)
                       AS participant_count
            FROM meetings m
            ORDER BY m.updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| MeetingListItem {
                id: row.get("id"),
                title: row.get("title"),
                platform: MeetingPlatform::parse(row.get::<String, _>("platform").as_str()),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
                participant_count: row.get("participant_count"),
            })
            .collect())
    }

    async fn get_meeting(&self, id: &str) -> Result<Option<Meeting>, StoreError> {
        let row = sqlx::query("SELECT * FROM meetings WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_meeting))
    }

    async fn get_participants(&self, meeting_id: &str) -> Result<Vec<Participant>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM participants WHERE meeting_id = ?1 ORDER BY participant_id",
        )
        .bind(meeting_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_participant).collect())
    }

    async fn get_transcript_chunks(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<TranscriptChunk>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM transcript_chunks WHERE meeting_id = ?1 ORDER BY sequence",
        )
        .bind(meeting_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn get_tasks(&self, meeting_id: Option<&str>) -> Result<Vec<TaskRecord>, StoreError> {
        let rows = match meeting_id {
            Some(id) => {
                sqlx::query("SELECT * FROM tasks WHERE meeting_id = ?1 ORDER BY id")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM tasks ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(row_to_task).collect())
    }

    async fn get_summary(&self, meeting_id: &str) -> Result<Option<SummaryDocument>, StoreError> {
        let row = sqlx::query("SELECT document FROM summaries WHERE meeting_id = ?1")
            .bind(meeting_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|row| {
            serde_json::from_str(row.get::<String, _>("document").as_str()).ok()
        }))
    }

    async fn delete_meeting(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM meetings WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExplicitLevel, ExtractionMethod, Priority, TaskStatus};

    fn meeting(id: &str) -> Meeting {
        Meeting {
            id: id.to_string(),
            title: "Weekly sync".to_string(),
            platform: MeetingPlatform::GoogleMeet,
            created_at: "2025-01-01T09:00:00+00:00".to_string(),
            updated_at: "2025-01-01T09:00:00+00:00".to_string(),
        }
    }

    fn task(ai_task_id: &str, title: &str) -> ExtractedTask {
        ExtractedTask {
            ai_task_id: ai_task_id.to_string(),
            title: title.to_string(),
            description: "desc".to_string(),
            assignee: Some("John".to_string()),
            due_date: Some("Friday".to_string()),
            priority: Priority::Medium,
            status: TaskStatus::Pending,
            category: "general".to_string(),
            business_impact: BusinessImpact::Medium,
            dependencies: vec!["task-0".to_string()],
            mentioned_by: Some("Sarah".to_string()),
            context: Some("docs discussion".to_string()),
            explicit_level: ExplicitLevel::Direct,
            ai_extracted_at: "2025-01-01T09:30:00+00:00".to_string(),
            ai_confidence_score: 0.9,
            source_transcript_segment: Some("John, please update the docs".to_string()),
            extraction_method: ExtractionMethod::Explicit,
        }
    }

    fn chunk(seq: i64, text: &str, fingerprint: &str) -> TranscriptChunk {
        TranscriptChunk {
            sequence: seq,
            text: text.to_string(),
            timestamp: 1_700_000_000_000 + seq,
            speaker: None,
            confidence: Some(0.8),
            fingerprint: fingerprint.to_string(),
        }
    }

    #[tokio::test]
    async fn meeting_upsert_and_get() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut m = meeting("mtg-1");
        store.upsert_meeting(&m).await.unwrap();

        m.title = "Renamed".to_string();
        m.updated_at = "2025-01-01T10:00:00+00:00".to_string();
        store.upsert_meeting(&m).await.unwrap();

        let loaded = store.get_meeting("mtg-1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Renamed");
        // created_at stays from the first write
        assert_eq!(loaded.created_at, "2025-01-01T09:00:00+00:00");
        assert_eq!(store.get_meetings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chunk_fingerprint_dedup_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_meeting(&meeting("mtg-1")).await.unwrap();

        let already = store
            .append_transcript_chunk("mtg-1", &chunk(1, "hello world", "fp-1"))
            .await
            .unwrap();
        assert!(!already);

        let already = store
            .append_transcript_chunk("mtg-1", &chunk(2, "hello world", "fp-1"))
            .await
            .unwrap();
        assert!(already);

        let chunks = store.get_transcript_chunks("mtg-1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence, 1);
    }

    #[tokio::test]
    async fn chunks_ordered_by_sequence() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_meeting(&meeting("mtg-1")).await.unwrap();
        for (seq, fp) in [(2i64, "b"), (1, "a"), (3, "c")] {
            store
                .append_transcript_chunk("mtg-1", &chunk(seq, "text", fp))
                .await
                .unwrap();
        }
        let chunks = store.get_transcript_chunks("mtg-1").await.unwrap();
        let seqs: Vec<i64> = chunks.iter().map(|c| c.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn tasks_round_trip_losslessly() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_meeting(&meeting("mtg-1")).await.unwrap();

        let original = task("task-1", "Update the docs");
        let saved = store.save_tasks("mtg-1", &[original.clone()]).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].id > 0);

        let loaded = store.get_tasks(Some("mtg-1")).await.unwrap();
        assert_eq!(loaded.len(), 1);
        let t = &loaded[0].task;
        assert_eq!(t.ai_task_id, original.ai_task_id);
        assert_eq!(t.title, original.title);
        assert_eq!(t.assignee, original.assignee);
        assert_eq!(t.due_date, original.due_date);
        assert_eq!(t.priority, original.priority);
        assert_eq!(t.status, original.status);
        assert_eq!(t.category, original.category);
        assert_eq!(t.business_impact, original.business_impact);
        assert_eq!(t.dependencies, original.dependencies);
        assert_eq!(t.mentioned_by, original.mentioned_by);
        assert_eq!(t.context, original.context);
        assert_eq!(t.explicit_level, original.explicit_level);
        assert_eq!(t.ai_extracted_at, original.ai_extracted_at);
        assert_eq!(t.ai_confidence_score, original.ai_confidence_score);
        assert_eq!(
            t.source_transcript_segment,
            original.source_transcript_segment
        );
        assert_eq!(t.extraction_method, original.extraction_method);
    }

    #[tokio::test]
    async fn tasks_upsert_by_ai_task_id_keeps_row_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_meeting(&meeting("mtg-1")).await.unwrap();

        let first = store.save_tasks("mtg-1", &[task("task-1", "v1")]).await.unwrap();
        let second = store.save_tasks("mtg-1", &[task("task-1", "v2")]).await.unwrap();

        assert_eq!(first[0].id, second[0].id);
        let all = store.get_tasks(Some("mtg-1")).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].task.title, "v2");
    }

    #[tokio::test]
    async fn summary_replace_is_last_writer_wins() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_meeting(&meeting("mtg-1")).await.unwrap();

        let mut doc = SummaryDocument::default();
        doc.overview = "first".to_string();
        store.save_summary("mtg-1", &doc).await.unwrap();

        doc.overview = "second".to_string();
        doc.decisions = vec!["ship it".to_string()];
        store.save_summary("mtg-1", &doc).await.unwrap();

        let loaded = store.get_summary("mtg-1").await.unwrap().unwrap();
        assert_eq!(loaded.overview, "second");
        assert_eq!(loaded.decisions, vec!["ship it"]);
    }

    #[tokio::test]
    async fn external_ref_unique_per_task_platform() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_meeting(&meeting("mtg-1")).await.unwrap();
        let saved = store.save_tasks("mtg-1", &[task("task-1", "t")]).await.unwrap();
        let task_id = saved[0].id;

        store
            .record_external_ref(task_id, "notion", "page-1", "https://notion.so/page-1")
            .await
            .unwrap();
        store
            .record_external_ref(task_id, "notion", "page-2", "https://notion.so/page-2")
            .await
            .unwrap();
        store
            .record_external_ref(task_id, "clickup", "cu-1", "https://clickup.com/t/cu-1")
            .await
            .unwrap();

        let refs = store.get_external_refs(task_id).await.unwrap();
        assert_eq!(refs.len(), 2);
        let notion = refs.iter().find(|r| r.platform == "notion").unwrap();
        // The first write wins; the second is a no-op.
        assert_eq!(notion.external_id, "page-1");
    }

    #[tokio::test]
    async fn extraction_run_persists_summary_and_tasks_together() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_meeting(&meeting("mtg-1")).await.unwrap();

        let mut doc = SummaryDocument::default();
        doc.overview = "sync about docs".to_string();
        let records = store
            .save_extraction_run("mtg-1", &doc, &[task("task-1", "a"), task("task-2", "b")])
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(store.get_summary("mtg-1").await.unwrap().is_some());
        assert_eq!(store.get_tasks(Some("mtg-1")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn participants_unique_and_left_is_sticky() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_meeting(&meeting("mtg-1")).await.unwrap();

        let p = |status: ParticipantStatus| Participant {
            participant_id: "p1".to_string(),
            name: "Sarah".to_string(),
            platform_id: None,
            status,
            is_host: true,
            join_time: Some("2025-01-01T09:00:00+00:00".to_string()),
        };

        store
            .save_participants_batch("mtg-1", &[p(ParticipantStatus::Active)])
            .await
            .unwrap();
        store
            .save_participants_batch("mtg-1", &[p(ParticipantStatus::Left)])
            .await
            .unwrap();
        store
            .save_participants_batch("mtg-1", &[p(ParticipantStatus::Active)])
            .await
            .unwrap();

        let participants = store.get_participants("mtg-1").await.unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].status, ParticipantStatus::Left);
    }

    #[tokio::test]
    async fn delete_meeting_cascades() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_meeting(&meeting("mtg-1")).await.unwrap();
        store
            .append_transcript_chunk("mtg-1", &chunk(1, "hi", "fp-1"))
            .await
            .unwrap();
        let saved = store.save_tasks("mtg-1", &[task("task-1", "t")]).await.unwrap();
        store
            .record_external_ref(saved[0].id, "notion", "x", "https://notion.so/x")
            .await
            .unwrap();
        store
            .save_summary("mtg-1", &SummaryDocument::default())
            .await
            .unwrap();

        store.delete_meeting("mtg-1").await.unwrap();

        assert!(store.get_meeting("mtg-1").await.unwrap().is_none());
        assert!(store.get_transcript_chunks("mtg-1").await.unwrap().is_empty());
        assert!(store.get_tasks(Some("mtg-1")).await.unwrap().is_empty());
        assert!(store.get_summary("mtg-1").await.unwrap().is_none());
        assert!(store.get_external_refs(saved[0].id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn meeting_list_carries_participant_count() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_meeting(&meeting("mtg-1")).await.unwrap();
        let participants: Vec<Participant> = (0..3)
            .map(|i| Participant {
                participant_id: format!("p{}", i),
                name: format!("Person {}", i),
                platform_id: None,
                status: ParticipantStatus::Active,
                is_host: i == 0,
                join_time: None,
            })
            .collect();
        store
            .save_participants_batch("mtg-1", &participants)
            .await
            .unwrap();

        let listing = store.get_meetings().await.unwrap();
        assert_eq!(listing[0].participant_count, 3);
    }
}
