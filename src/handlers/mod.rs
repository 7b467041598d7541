//! Read-mostly REST surface for the dashboard, plus the synchronous
//! extraction entry points.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::models::{
    AnalyzeTranscriptRequest, MeetingDetailResponse, MeetingPlatform, MeetingsResponse,
    ProcessTranscriptRequest, ProcessTranscriptResponse, SaveTranscriptRequest,
    SaveTranscriptResponse, SpeakerIdentification, SummaryDocument, SummaryStatusResponse,
    TaskRecord, TranscriptChunk,
};
use crate::pipeline;
use crate::projector::{DispatchResult, TaskProjector};
use crate::session::fingerprint;
use crate::state::{AppState, ProcessingState};
use crate::store::Store as _;

type HandlerError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> HandlerError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn new_meeting_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("mtg-{}", &id[..12])
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

/// GET /get-meetings
pub async fn get_meetings(
    State(app): State<Arc<AppState>>,
) -> Result<Json<MeetingsResponse>, HandlerError> {
    let meetings = app.store.get_meetings().await.map_err(internal)?;
    let total = meetings.len();
    Ok(Json(MeetingsResponse { meetings, total }))
}

/// GET /get-meeting/:id
pub async fn get_meeting(
    Path(id): Path<String>,
    State(app): State<Arc<AppState>>,
) -> Result<Json<MeetingDetailResponse>, HandlerError> {
    let meeting = app
        .store
        .get_meeting(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Meeting not found".to_string()))?;

    let participants = app.store.get_participants(&id).await.map_err(internal)?;
    let transcript = app
        .store
        .get_transcript_chunks(&id)
        .await
        .map_err(internal)?;

    Ok(Json(MeetingDetailResponse {
        meeting,
        participants,
        transcript,
    }))
}

/// GET /get-summary/:meeting_id
///
/// Serves both live processing status (for ids returned by
/// /process-transcript) and persisted summaries.
pub async fn get_summary(
    Path(meeting_id): Path<String>,
    State(app): State<Arc<AppState>>,
) -> Result<Json<SummaryStatusResponse>, HandlerError> {
    match app.processing_state(&meeting_id).await {
        Some(ProcessingState::Processing) => {
            return Ok(Json(SummaryStatusResponse {
                status: "processing".to_string(),
                data: None,
                error: None,
            }))
        }
        Some(ProcessingState::Error(e)) => {
            return Ok(Json(SummaryStatusResponse {
                status: "error".to_string(),
                data: None,
                error: Some(e),
            }))
        }
        Some(ProcessingState::Completed) | None => {}
    }

    let summary = app
        .store
        .get_summary(&meeting_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Summary not found".to_string()))?;

    Ok(Json(SummaryStatusResponse {
        status: "completed".to_string(),
        data: Some(summary),
        error: None,
    }))
}

#[derive(Debug, Serialize)]
pub struct TasksResponse {
    pub tasks: Vec<TaskRecord>,
    pub total: usize,
}

/// GET /get-tasks
pub async fn get_all_tasks(
    State(app): State<Arc<AppState>>,
) -> Result<Json<TasksResponse>, HandlerError> {
    let tasks = app.store.get_tasks(None).await.map_err(internal)?;
    let total = tasks.len();
    Ok(Json(TasksResponse { tasks, total }))
}

/// GET /get-tasks/:meeting_id
pub async fn get_meeting_tasks(
    Path(meeting_id): Path<String>,
    State(app): State<Arc<AppState>>,
) -> Result<Json<TasksResponse>, HandlerError> {
    let tasks = app
        .store
        .get_tasks(Some(&meeting_id))
        .await
        .map_err(internal)?;
    let total = tasks.len();
    Ok(Json(TasksResponse { tasks, total }))
}

/// POST /save-transcript
pub async fn save_transcript(
    State(app): State<Arc<AppState>>,
    Json(req): Json<SaveTranscriptRequest>,
) -> Result<Json<SaveTranscriptResponse>, HandlerError> {
    let meeting_id = new_meeting_id();
    let platform = MeetingPlatform::parse(req.platform.as_deref().unwrap_or(""));

    pipeline::ensure_meeting(&app, &meeting_id, req.title.as_deref(), platform)
        .await
        .map_err(internal)?;

    for (i, segment) in req.segments.iter().enumerate() {
        let timestamp = segment
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let chunk = TranscriptChunk {
            sequence: i as i64 + 1,
            text: segment.text.clone(),
            timestamp,
            speaker: segment.speaker.clone(),
            confidence: None,
            fingerprint: fingerprint(&segment.text, timestamp),
        };
        app.store
            .append_transcript_chunk(&meeting_id, &chunk)
            .await
            .map_err(internal)?;
    }

    Ok(Json(SaveTranscriptResponse { meeting_id }))
}

/// POST /process-transcript
///
/// Schedules extraction in the background; poll /get-summary/:process_id.
pub async fn process_transcript(
    State(app): State<Arc<AppState>>,
    Json(req): Json<ProcessTranscriptRequest>,
) -> Result<Json<ProcessTranscriptResponse>, HandlerError> {
    let process_id = req.meeting_id.clone().unwrap_or_else(new_meeting_id);
    app.set_processing(&process_id, ProcessingState::Processing)
        .await;

    let app_clone = app.clone();
    let id = process_id.clone();
    tokio::spawn(async move {
        match pipeline::process_transcript(
            &app_clone,
            &id,
            req.title.as_deref(),
            MeetingPlatform::Unknown,
            &req.transcript,
        )
        .await
        {
            Ok(_) => {
                app_clone
                    .set_processing(&id, ProcessingState::Completed)
                    .await;
            }
            Err(e) => {
                error!("background processing failed for {}: {}", id, e);
                app_clone
                    .set_processing(&id, ProcessingState::Error(e.to_string()))
                    .await;
            }
        }
    });

    Ok(Json(ProcessTranscriptResponse { process_id }))
}

/// POST /identify-speakers
pub async fn identify_speakers(
    State(app): State<Arc<AppState>>,
    Json(req): Json<AnalyzeTranscriptRequest>,
) -> Json<SpeakerIdentification> {
    Json(
        app.extractor
            .identify_speakers(&req.transcript, req.context.as_deref())
            .await,
    )
}

#[derive(Debug, Serialize)]
pub struct SummaryEnvelope {
    pub summary: SummaryDocument,
    pub fallback_used: bool,
}

/// POST /generate-summary
pub async fn generate_summary(
    State(app): State<Arc<AppState>>,
    Json(req): Json<AnalyzeTranscriptRequest>,
) -> Json<SummaryEnvelope> {
    let result = app
        .extractor
        .summarize(&req.transcript, req.title.as_deref())
        .await;
    Json(SummaryEnvelope {
        summary: result.summary,
        fallback_used: result.fallback_used,
    })
}

#[derive(Debug, Serialize)]
pub struct TaskExtractionEnvelope {
    pub tasks: Vec<crate::models::ExtractedTask>,
    pub fallback_used: bool,
}

/// POST /extract-tasks
pub async fn extract_tasks(
    State(app): State<Arc<AppState>>,
    Json(req): Json<AnalyzeTranscriptRequest>,
) -> Json<TaskExtractionEnvelope> {
    let result = app
        .extractor
        .extract_tasks(&req.transcript, req.context.as_deref())
        .await;
    Json(TaskExtractionEnvelope {
        tasks: result.tasks,
        fallback_used: result.fallback_used,
    })
}

#[derive(Debug, Serialize)]
pub struct ProcessWithToolsResponse {
    pub meeting_id: String,
    pub summary: SummaryDocument,
    pub tasks: Vec<TaskRecord>,
    pub dispatches: Vec<DispatchResult>,
    pub fallback_used: bool,
}

/// POST /process-transcript-with-tools
///
/// Synchronous variant of the full pipeline: extract, persist, dispatch.
pub async fn process_transcript_with_tools(
    State(app): State<Arc<AppState>>,
    Json(req): Json<ProcessTranscriptRequest>,
) -> Result<Json<ProcessWithToolsResponse>, HandlerError> {
    let meeting_id = req.meeting_id.clone().unwrap_or_else(new_meeting_id);
    let outcome = pipeline::process_transcript(
        &app,
        &meeting_id,
        req.title.as_deref(),
        MeetingPlatform::Unknown,
        &req.transcript,
    )
    .await
    .map_err(internal)?;

    Ok(Json(ProcessWithToolsResponse {
        meeting_id,
        summary: outcome.summary,
        tasks: outcome.records,
        dispatches: outcome.dispatches,
        fallback_used: outcome.fallback_used,
    }))
}

/// GET /available-tools
pub async fn available_tools(State(app): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "tools": app.integrations.describe() }))
}

#[derive(Debug, Serialize)]
pub struct ComprehensiveResponse {
    pub meeting_id: String,
    pub tasks: Vec<TaskRecord>,
    pub projections: Vec<crate::integrations::TaskProjection>,
    pub dispatches: Vec<DispatchResult>,
    pub fallback_used: bool,
}

/// POST /extract-tasks-comprehensive
///
/// Runs extraction, persists the full-field records, dispatches the
/// projections, and returns both layers. Safe to call repeatedly: dispatch
/// is idempotent per (task, platform).
pub async fn extract_tasks_comprehensive(
    State(app): State<Arc<AppState>>,
    Json(req): Json<ProcessTranscriptRequest>,
) -> Result<Json<ComprehensiveResponse>, HandlerError> {
    let meeting_id = req.meeting_id.clone().unwrap_or_else(new_meeting_id);

    pipeline::ensure_meeting(
        &app,
        &meeting_id,
        req.title.as_deref(),
        MeetingPlatform::Unknown,
    )
    .await
    .map_err(internal)?;

    let extraction = app
        .extractor
        .extract_tasks(&req.transcript, req.title.as_deref())
        .await;

    let outcome = app
        .projector
        .materialize_and_dispatch(&meeting_id, &extraction.tasks)
        .await
        .map_err(internal)?;

    let projections = outcome
        .records
        .iter()
        .map(|r| TaskProjector::project(&r.task))
        .collect();

    Ok(Json(ComprehensiveResponse {
        meeting_id,
        tasks: outcome.records,
        projections,
        dispatches: outcome.dispatches,
        fallback_used: extraction.fallback_used,
    }))
}

/// DELETE /delete-meeting/:id
pub async fn delete_meeting(
    Path(id): Path<String>,
    State(app): State<Arc<AppState>>,
) -> Result<StatusCode, HandlerError> {
    app.store.delete_meeting(&id).await.map_err(internal)?;
    app.sessions.remove(&id).await;
    Ok(StatusCode::NO_CONTENT)
}
