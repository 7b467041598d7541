//! Remote MySQL-wire store for production (TiDB-compatible). Same logical
//! schema and observable behavior as the embedded store.

use async_trait::async_trait;
use sqlx::mysql::{
    MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode,
};
use sqlx::Row;

use super::{dependencies_from_json, dependencies_to_json, with_transient_retry, Store};
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::{
    BusinessImpact, ExplicitLevel, ExternalTaskRef, ExtractedTask, ExtractionMethod, Meeting,
    MeetingListItem, MeetingPlatform, Participant, ParticipantStatus, Priority, SummaryDocument,
    TaskRecord, TaskStatus, TranscriptChunk,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS meetings (
        id VARCHAR(64) PRIMARY KEY,
        title VARCHAR(512) NOT NULL,
        platform VARCHAR(32) NOT NULL DEFAULT 'unknown',
        created_at VARCHAR(40) NOT NULL,
        updated_at VARCHAR(40) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS participants (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        meeting_id VARCHAR(64) NOT NULL,
        participant_id VARCHAR(128) NOT NULL,
        name VARCHAR(256) NOT NULL,
        platform_id VARCHAR(128),
        status VARCHAR(16) NOT NULL DEFAULT 'active',
        join_time VARCHAR(40),
        is_host BOOLEAN NOT NULL DEFAULT FALSE,
        UNIQUE KEY uq_participant (meeting_id, participant_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transcript_chunks (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        meeting_id VARCHAR(64) NOT NULL,
        `sequence` BIGINT NOT NULL,
        `text` TEXT NOT NULL,
        `timestamp` BIGINT NOT NULL,
        speaker VARCHAR(256),
        confidence DOUBLE,
        fingerprint VARCHAR(64) NOT NULL,
        UNIQUE KEY uq_chunk (meeting_id, fingerprint),
        KEY idx_chunks_meeting (meeting_id, `sequence`)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS summaries (
        meeting_id VARCHAR(64) PRIMARY KEY,
        document TEXT NOT NULL,
        updated_at VARCHAR(40) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        meeting_id VARCHAR(64) NOT NULL,
        ai_task_id VARCHAR(128) NOT NULL,
        title VARCHAR(512) NOT NULL,
        description TEXT NOT NULL,
        assignee VARCHAR(256),
        due_date VARCHAR(128),
        priority VARCHAR(16) NOT NULL DEFAULT 'low',
        status VARCHAR(16) NOT NULL DEFAULT 'pending',
        category VARCHAR(128) NOT NULL DEFAULT 'general',
        business_impact VARCHAR(16) NOT NULL DEFAULT 'low',
        dependencies_json TEXT NOT NULL,
        mentioned_by VARCHAR(256),
        context TEXT,
        explicit_level VARCHAR(16) NOT NULL DEFAULT 'implied',
        ai_extracted_at VARCHAR(40) NOT NULL,
        ai_confidence_score DOUBLE NOT NULL DEFAULT 0,
        source_transcript_segment TEXT,
        extraction_method VARCHAR(32) NOT NULL DEFAULT 'implicit',
        created_at VARCHAR(40) NOT NULL,
        updated_at VARCHAR(40) NOT NULL,
        UNIQUE KEY uq_task (meeting_id, ai_task_id),
        KEY idx_tasks_meeting (meeting_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS external_task_refs (
        task_id BIGINT NOT NULL,
        platform VARCHAR(32) NOT NULL,
        external_id VARCHAR(256) NOT NULL,
        external_url VARCHAR(1024) NOT NULL,
        created_at VARCHAR(40) NOT NULL,
        PRIMARY KEY (task_id, platform)
    )
    "#,
];

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut options = MySqlConnectOptions::new()
            .host(
                config
                    .host
                    .as_deref()
                    .ok_or_else(|| StoreError::Config("missing DATABASE_HOST".into()))?,
            )
            .port(config.port)
            .username(
                config
                    .user
                    .as_deref()
                    .ok_or_else(|| StoreError::Config("missing DATABASE_USER".into()))?,
            )
            .database(
                config
                    .database
                    .as_deref()
                    .ok_or_else(|| StoreError::Config("missing DATABASE_NAME".into()))?,
            )
            .ssl_mode(if config.ssl_required {
                MySqlSslMode::Required
            } else {
                MySqlSslMode::Disabled
            });

        if let Some(password) = config.password.as_deref() {
            options = options.password(password);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(10))
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

fn row_to_meeting(row: &MySqlRow) -> Meeting {
    Meeting {
        id: row.get("id"),
        title: row.get("title"),
        platform: MeetingPlatform::parse(row.get::<String, _>("platform").as_str()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_participant(row: &MySqlRow) -> Participant {
    Participant {
        participant_id: row.get("participant_id"),
        name: row.get("name"),
        platform_id: row.get("platform_id"),
        status: ParticipantStatus::parse(row.get::<String, _>("status").as_str()),
        is_host: row.get("is_host"),
        join_time: row.get("join_time"),
    }
}

fn row_to_chunk(row: &MySqlRow) -> TranscriptChunk {
    TranscriptChunk {
        sequence: row.get("sequence"),
        text: row.get("text"),
        timestamp: row.get("timestamp"),
        speaker: row.get("speaker"),
        confidence: row.get("confidence"),
        fingerprint: row.get("fingerprint"),
    }
}

fn row_to_task(row: &MySqlRow) -> TaskRecord {
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
    conn: &mut MySqlConnection,
    meeting_id: &str,
    summary: &SummaryDocument,
) -> Result<(), StoreError> {
    let document =
        serde_json::to_string(summary).map_err(|e| StoreError::Config(e.to_string()))?;
    sqlx::query(
        r#"
        INSERT INTO summaries (meeting_id, document, updated_at)
        VALUES (?, ?, ?)
        ON DUPLICATE KEY UPDATE
            document = VALUES(document),
            updated_at = VALUES(updated_at)
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
    conn: &mut MySqlConnection,
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
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                title = VALUES(title),
                description = VALUES(description),
                assignee = VALUES(assignee),
                due_date = VALUES(due_date),
                priority = VALUES(priority),
                status = VALUES(status),
                category = VALUES(category),
                business_impact = VALUES(business_impact),
                dependencies_json = VALUES(dependencies_json),
                mentioned_by = VALUES(mentioned_by),
                context = VALUES(context),
                explicit_level = VALUES(explicit_level),
                ai_extracted_at = VALUES(ai_extracted_at),
                ai_confidence_score = VALUES(ai_confidence_score),
                source_transcript_segment = VALUES(source_transcript_segment),
                extraction_method = VALUES(extraction_method),
                updated_at = VALUES(updated_at)
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

        let row = sqlx::query("SELECT * FROM tasks WHERE meeting_id = ? AND ai_task_id = ?")
            .bind(meeting_id)
            .bind(&task.ai_task_id)
            .fetch_one(&mut *conn)
            .await?;
        records.push(row_to_task(&row));
    }

    Ok(records)
}

#[async_trait]
impl Store for MySqlStore {
    async fn upsert_meeting(&self, meeting: &Meeting) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO meetings (id, title, platform, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                title = VALUES(title),
                platform = VALUES(platform),
                updated_at = VALUES(updated_at)
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
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    name = VALUES(name),
                    platform_id = VALUES(platform_id),
                    status = IF(status = 'left', 'left', VALUES(status)),
                    join_time = COALESCE(join_time, VALUES(join_time)),
                    is_host = VALUES(is_host)
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
            INSERT IGNORE INTO transcript_chunks
                (meeting_id, `sequence`, `text`, `timestamp`, speaker, confidence, fingerprint)
            VALUES (?, ?, ?, ?, ?, ?, ?)
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
            INSERT IGNORE INTO external_task_refs
                (task_id, platform, external_id, external_url, created_at)
            VALUES (?, ?, ?, ?, ?)
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
             FROM external_task_refs WHERE task_id = ? ORDER BY platform",
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
        let row = sqlx::query("SELECT * FROM meetings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_meeting))
    }

    async fn get_participants(&self, meeting_id: &str) -> Result<Vec<Participant>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM participants WHERE meeting_id = ? ORDER BY participant_id",
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
            "SELECT * FROM transcript_chunks WHERE meeting_id = ? ORDER BY `sequence`",
        )
        .bind(meeting_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn get_tasks(&self, meeting_id: Option<&str>) -> Result<Vec<TaskRecord>, StoreError> {
        let rows = match meeting_id {
            Some(id) => {
                sqlx::query("SELECT * FROM tasks WHERE meeting_id = ? ORDER BY id")
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
        let row = sqlx::query("SELECT document FROM summaries WHERE meeting_id = ?")
            .bind(meeting_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|row| {
            serde_json::from_str(row.get::<String, _>("document").as_str()).ok()
        }))
    }

    async fn delete_meeting(&self, id: &str) -> Result<(), StoreError> {
        // The MySQL-wire schema carries no foreign keys (TiDB treats them as
        // advisory); cascade by hand inside one transaction.
        with_transient_retry(|| async move {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                "DELETE FROM external_task_refs WHERE task_id IN
                     (SELECT id FROM tasks WHERE meeting_id = ?)",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM tasks WHERE meeting_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM summaries WHERE meeting_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM transcript_chunks WHERE meeting_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM participants WHERE meeting_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM meetings WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }
}
