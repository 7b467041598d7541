//! End-of-meeting processing: flush remaining audio, extract structure,
//! persist, and dispatch tasks. Shared by the WebSocket finalization path
//! and the REST processing endpoints.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::models::{Meeting, MeetingPlatform, SummaryDocument, TaskRecord};
use crate::projector::DispatchResult;
use crate::session::{AudioJob, Session};
use crate::state::{AppState, ProcessingState};
use crate::store::Store as _;
use crate::ws::messages::{stages, OutboundMessage};

/// Result of one full extraction run over a transcript.
pub struct PipelineOutcome {
    pub summary: SummaryDocument,
    pub records: Vec<TaskRecord>,
    pub dispatches: Vec<DispatchResult>,
    pub fallback_used: bool,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn default_title(platform: MeetingPlatform) -> String {
    format!(
        "Meeting on {} ({})",
        platform.as_str(),
        chrono::Utc::now().format("%Y-%m-%d")
    )
}

/// Make sure the meeting row exists and carries the current title.
pub async fn ensure_meeting(
    app: &AppState,
    meeting_id: &str,
    title: Option<&str>,
    platform: MeetingPlatform,
) -> Result<(), StoreError> {
    let now = now_rfc3339();
    let existing = app.store.get_meeting(meeting_id).await?;
    let meeting = Meeting {
        id: meeting_id.to_string(),
        title: title
            .map(|t| t.to_string())
            .or_else(|| existing.as_ref().map(|m| m.title.clone()))
            .unwrap_or_else(|| default_title(platform)),
        platform,
        created_at: existing
            .as_ref()
            .map(|m| m.created_at.clone())
            .unwrap_or_else(|| now.clone()),
        updated_at: now,
    };
    app.store.upsert_meeting(&meeting).await
}

/// Extract structure from an already-transcribed text, persist the run in
/// one transaction, and dispatch the projections.
pub async fn process_transcript(
    app: &AppState,
    meeting_id: &str,
    title: Option<&str>,
    platform: MeetingPlatform,
    transcript: &str,
) -> Result<PipelineOutcome, StoreError> {
    ensure_meeting(app, meeting_id, title, platform).await?;

    let summary = app.extractor.summarize(transcript, title).await;
    let tasks = app.extractor.extract_tasks(transcript, title).await;
    let fallback_used = summary.fallback_used || tasks.fallback_used;

    let records = app
        .store
        .save_extraction_run(meeting_id, &summary.summary, &tasks.tasks)
        .await?;

    let dispatches = app.projector.dispatch_records(&records).await;

    info!(
        "processed transcript for {}: {} tasks, {} dispatches, fallback={}",
        meeting_id,
        records.len(),
        dispatches.len(),
        fallback_used
    );

    Ok(PipelineOutcome {
        summary: summary.summary,
        records,
        dispatches,
        fallback_used,
    })
}

/// Transcribe one audio window and fold the result into the session and the
/// store. Transcription failures drop the window with a warning; the
/// session keeps running.
pub async fn transcribe_and_ingest(app: &AppState, session: &Session, job: AudioJob) {
    let transcriber = match &app.transcriber {
        Some(t) => t.clone(),
        None => {
            warn!("audio window dropped: transcriber unavailable");
            return;
        }
    };

    let result = transcriber
        .transcribe(&job.pcm, job.sample_rate, job.channels)
        .await;

    match result {
        Ok(output) => {
            if output.text.is_empty() {
                return;
            }
            if let Some(chunk) =
                session.ingest_transcription(&output.text, job.timestamp, None, None)
            {
                if let Err(e) = app
                    .store
                    .append_transcript_chunk(&session.meeting_id, &chunk)
                    .await
                {
                    warn!(
                        "failed to persist transcript chunk {} for {}: {}",
                        chunk.sequence, session.meeting_id, e
                    );
                }
            }
        }
        Err(e) => {
            warn!(
                "transcription failed for {}, dropping window: {}",
                session.meeting_id, e
            );
        }
    }
}

/// The terminal pipeline for a live session: drain audio, run extraction,
/// persist, dispatch, report. Safe to call multiple times; only the first
/// caller past the Open state does the work.
pub async fn finalize_session(app: Arc<AppState>, session: Arc<Session>) {
    if !session.begin_finalize() {
        return;
    }

    info!("finalizing session {}", session.meeting_id);

    // Flush: push the remaining partial window through the transcriber and
    // wait out in-flight jobs. No new audio is accepted past this point.
    if let Some(job) = session.drain_audio() {
        transcribe_and_ingest(&app, &session, job).await;
    }
    let transcription_deadline = Duration::from_secs(app.config.stt.timeout_secs);
    session.wait_for_jobs(transcription_deadline).await;

    session.emit(OutboundMessage::ProcessingStatus {
        meeting_id: session.meeting_id.clone(),
        stage: stages::TRANSCRIPTION_DONE.to_string(),
        detail: None,
    });

    session.mark_finalizing();
    app.set_processing(&session.meeting_id, ProcessingState::Processing)
        .await;

    let transcript = session.cumulative_transcript();
    let title = session.title();
    let participants = session.participants();

    let persisted = async {
        ensure_meeting(&app, &session.meeting_id, title.as_deref(), session.platform).await?;
        if !participants.is_empty() {
            app.store
                .save_participants_batch(&session.meeting_id, &participants)
                .await?;
        }

        let summary = app.extractor.summarize(&transcript, title.as_deref()).await;
        let tasks = app.extractor.extract_tasks(&transcript, title.as_deref()).await;

        session.emit(OutboundMessage::ProcessingStatus {
            meeting_id: session.meeting_id.clone(),
            stage: stages::EXTRACTION_DONE.to_string(),
            detail: None,
        });

        let records = app
            .store
            .save_extraction_run(&session.meeting_id, &summary.summary, &tasks.tasks)
            .await?;
        let dispatches = app.projector.dispatch_records(&records).await;

        session.emit(OutboundMessage::ProcessingStatus {
            meeting_id: session.meeting_id.clone(),
            stage: stages::INTEGRATION_DONE.to_string(),
            detail: Some(format!("{} dispatches", dispatches.len())),
        });

        Ok::<_, StoreError>(PipelineOutcome {
            summary: summary.summary,
            records,
            dispatches,
            fallback_used: summary.fallback_used || tasks.fallback_used,
        })
    }
    .await;

    match persisted {
        Ok(outcome) => {
            app.set_processing(&session.meeting_id, ProcessingState::Completed)
                .await;
            session.emit(OutboundMessage::ProcessingComplete {
                meeting_id: session.meeting_id.clone(),
                status: "success".to_string(),
                summary: Some(outcome.summary),
                task_count: Some(outcome.records.len()),
                error: None,
            });
            info!(
                "session {} finalized with {} tasks",
                session.meeting_id,
                outcome.records.len()
            );
        }
        Err(e) => {
            error!("finalization failed for {}: {}", session.meeting_id, e);
            app.set_processing(
                &session.meeting_id,
                ProcessingState::Error(e.to_string()),
            )
            .await;
            session.emit(OutboundMessage::ProcessingComplete {
                meeting_id: session.meeting_id.clone(),
                status: "error".to_string(),
                summary: None,
                task_count: None,
                error: Some(e.to_string()),
            });
        }
    }

    session.mark_closed();
    app.sessions.remove(&session.meeting_id).await;
}

/// Background reaper: sessions idle past the configured limit are
/// auto-finalized to release memory.
pub async fn run_idle_reaper(app: Arc<AppState>) {
    let idle_limit = Duration::from_secs(app.config.ws_idle_timeout_secs);
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        for session in app.sessions.all().await {
            if session.idle_for() > idle_limit {
                warn!(
                    "session {} idle for {:?}, auto-finalizing",
                    session.meeting_id,
                    session.idle_for()
                );
                tokio::spawn(finalize_session(app.clone(), session));
            }
        }
    }
}
