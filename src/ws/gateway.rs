//! WebSocket ingress: one read loop per connection, typed message routing,
//! session attachment, and transcription dispatch.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::MeetingPlatform;
use crate::pipeline;
use crate::session::{derive_meeting_id, Session};
use crate::state::AppState;
use crate::store::Store as _;
use crate::ws::messages::{
    AudioMetadata, InboundMessage, MeetingEventData, OutboundMessage, ParticipantUpdate,
};

const SUPPORTED_FEATURES: &[&str] = &[
    "transcription",
    "speaker_identification",
    "summarization",
    "task_extraction",
];

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// GET /ws/audio (aliases /ws, /ws/audio-stream)
pub async fn audio_websocket(
    State(app): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(app, socket))
}

/// Per-connection state: handshake progress and the attached session.
struct ConnState {
    handshaken: bool,
    session: Option<Arc<Session>>,
    forward_task: Option<JoinHandle<()>>,
}

impl ConnState {
    fn new() -> Self {
        Self {
            handshaken: false,
            session: None,
            forward_task: None,
        }
    }
}

async fn handle_connection(app: Arc<AppState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_CHANNEL_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(WsMessage::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut conn = ConnState::new();

    while let Some(result) = receiver.next().await {
        let text = match result {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Err(_) => break,
            _ => continue,
        };

        let message = match parse_inbound(&text) {
            Ok(msg) => msg,
            Err(description) => {
                let _ = tx.send(OutboundMessage::error(description)).await;
                continue;
            }
        };

        handle_message(&app, &mut conn, message, &tx).await;
    }

    // A dropped connection without meeting_ended leaves the session for the
    // idle reaper's grace period; other connections may still be attached.
    if let Some(task) = conn.forward_task.take() {
        task.abort();
    }
    send_task.abort();
    debug!("websocket connection closed");
}

/// Decode one frame. Unknown or malformed `type` values report an error but
/// keep the connection open.
fn parse_inbound(text: &str) -> Result<InboundMessage, String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("invalid json: {}", e))?;

    let msg_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .map(|s| s.to_string());

    serde_json::from_value::<InboundMessage>(value).map_err(|e| match msg_type {
        Some(t) => format!("unrecognized or malformed message type '{}': {}", t, e),
        None => "message is missing the required 'type' field".to_string(),
    })
}

async fn handle_message(
    app: &Arc<AppState>,
    conn: &mut ConnState,
    message: InboundMessage,
    tx: &mpsc::Sender<OutboundMessage>,
) {
    if !conn.handshaken && !matches!(message, InboundMessage::Handshake { .. }) {
        let _ = tx
            .send(OutboundMessage::error("handshake required before other messages"))
            .await;
        return;
    }

    match message {
        InboundMessage::Handshake {
            client_type,
            version,
            ..
        } => {
            info!("handshake from {} v{}", client_type, version);
            conn.handshaken = true;
            let _ = tx
                .send(OutboundMessage::HandshakeAck {
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                    status: "ready".to_string(),
                    supported_features: SUPPORTED_FEATURES
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                })
                .await;
        }

        InboundMessage::AudioChunk {
            data,
            timestamp,
            metadata,
        } => {
            handle_audio(app, conn, tx, &data, timestamp, &metadata, None).await;
        }

        InboundMessage::AudioChunkEnhanced {
            data,
            timestamp,
            metadata,
            participants,
            ..
        } => {
            handle_audio(app, conn, tx, &data, timestamp, &metadata, Some(participants)).await;
        }

        InboundMessage::MeetingEvent { event_type, data } => {
            handle_meeting_event(app, conn, tx, &event_type, data).await;
        }

        InboundMessage::GetSessionInfo => match &conn.session {
            Some(session) => {
                let (participant_count, chunk_count, transcript_length) = session.info();
                let _ = tx
                    .send(OutboundMessage::SessionInfo {
                        meeting_id: session.meeting_id.clone(),
                        participant_count,
                        chunk_count,
                        transcript_length,
                    })
                    .await;
            }
            None => {
                let _ = tx
                    .send(OutboundMessage::error("no active session for this connection"))
                    .await;
            }
        },
    }
}

async fn handle_audio(
    app: &Arc<AppState>,
    conn: &mut ConnState,
    tx: &mpsc::Sender<OutboundMessage>,
    data: &str,
    timestamp: Option<i64>,
    metadata: &AudioMetadata,
    participants: Option<Vec<ParticipantUpdate>>,
) {
    let session = match attach_session(app, conn, tx, metadata).await {
        Some(session) => session,
        None => return,
    };

    // The enhanced variant refreshes the roster before transcription.
    if let Some(updates) = participants {
        if !updates.is_empty() {
            let roster = session.update_participants(&updates);
            if let Err(e) = app
                .store
                .save_participants_batch(&session.meeting_id, &roster)
                .await
            {
                warn!("failed to persist participants: {}", e);
            }
            session.emit(OutboundMessage::MeetingUpdate {
                meeting_id: session.meeting_id.clone(),
                participants: roster,
            });
        }
    }

    match session.append_audio(data, timestamp, metadata) {
        Ok(Some(job)) => {
            // Counted before the spawn so the finalization barrier can never
            // observe a zero count while a job is about to start.
            session.job_started();
            let app = app.clone();
            let session = session.clone();
            tokio::spawn(async move {
                pipeline::transcribe_and_ingest(&app, &session, job).await;
                session.job_finished();
            });
        }
        Ok(None) => {}
        Err(rejection) => {
            let _ = tx.send(OutboundMessage::error(rejection.to_string())).await;
        }
    }
}

/// Resolve (or create) the session for this connection based on the chunk
/// metadata, and start forwarding its event stream to the client.
async fn attach_session(
    app: &Arc<AppState>,
    conn: &mut ConnState,
    tx: &mpsc::Sender<OutboundMessage>,
    metadata: &AudioMetadata,
) -> Option<Arc<Session>> {
    if let Some(session) = &conn.session {
        return Some(session.clone());
    }

    let platform_str = metadata.platform.as_deref().unwrap_or("unknown");
    let meeting_url = metadata.meeting_url.as_deref().unwrap_or("");
    let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let meeting_id = derive_meeting_id(platform_str, meeting_url, &day);
    let platform = MeetingPlatform::parse(platform_str);

    let (session, created) = app.sessions.get_or_create(&meeting_id, platform).await;
    if created {
        info!("session {} created for {} meeting", meeting_id, platform_str);
        if let Err(e) = pipeline::ensure_meeting(app, &meeting_id, None, platform).await {
            warn!("failed to create meeting {}: {}", meeting_id, e);
            let _ = tx
                .send(OutboundMessage::error(format!("storage failure: {}", e)))
                .await;
            app.sessions.remove(&meeting_id).await;
            return None;
        }
    }

    // Forward the session's broadcast stream to this client.
    let mut events = session.subscribe();
    let tx_clone = tx.clone();
    conn.forward_task = Some(tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if tx_clone.send(event).await.is_err() {
                break;
            }
        }
    }));

    conn.session = Some(session.clone());
    Some(session)
}

async fn handle_meeting_event(
    app: &Arc<AppState>,
    conn: &mut ConnState,
    tx: &mpsc::Sender<OutboundMessage>,
    event_type: &str,
    data: MeetingEventData,
) {
    match event_type {
        "meeting_started" => {
            // Pre-create the session when the event carries enough identity;
            // otherwise the first audio chunk creates it.
            if let Some(url) = &data.meeting_url {
                let metadata = AudioMetadata {
                    platform: data.platform.clone(),
                    meeting_url: Some(url.clone()),
                    ..AudioMetadata::default()
                };
                if let Some(session) = attach_session(app, conn, tx, &metadata).await {
                    if let Some(title) = &data.title {
                        session.set_title(title.clone());
                    }
                }
            } else if let (Some(session), Some(title)) = (&conn.session, &data.title) {
                session.set_title(title.clone());
            }
        }

        "meeting_ended" => {
            let session = match conn.session.take() {
                Some(session) => session,
                None => {
                    let _ = tx
                        .send(OutboundMessage::error("no active session to finalize"))
                        .await;
                    return;
                }
            };
            let flush_complete = data.buffer_flush_complete.unwrap_or(false);
            debug!(
                "meeting_ended for {} (buffer_flush_complete={})",
                session.meeting_id, flush_complete
            );
            tokio::spawn(pipeline::finalize_session(app.clone(), session));
        }

        "participant_joined" | "participant_left" | "participant_update" => {
            let session = match &conn.session {
                Some(session) => session.clone(),
                None => {
                    let _ = tx
                        .send(OutboundMessage::error("no active session for participant event"))
                        .await;
                    return;
                }
            };

            let mut updates = data.participants.unwrap_or_default();
            if let Some(mut single) = data.participant {
                if event_type == "participant_left" {
                    single.status = Some("left".to_string());
                }
                updates.push(single);
            }
            if updates.is_empty() {
                return;
            }

            let roster = session.update_participants(&updates);
            if let Err(e) = app
                .store
                .save_participants_batch(&session.meeting_id, &roster)
                .await
            {
                warn!("failed to persist participants: {}", e);
            }
            session.emit(OutboundMessage::MeetingUpdate {
                meeting_id: session.meeting_id.clone(),
                participants: roster,
            });
        }

        other => {
            let _ = tx
                .send(OutboundMessage::error(format!(
                    "unrecognized meeting event '{}'",
                    other
                )))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    async fn test_app() -> Arc<AppState> {
        AppState::for_tests().await
    }

    fn audio_chunk_msg(bytes: &[u8]) -> InboundMessage {
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        serde_json::from_value(serde_json::json!({
            "type": "AUDIO_CHUNK",
            "data": data,
            "timestamp": 1000,
            "metadata": {"platform": "zoom", "meetingUrl": "https://zoom.us/j/42"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn messages_before_handshake_are_rejected_without_close() {
        let app = test_app().await;
        let mut conn = ConnState::new();
        let (tx, mut rx) = mpsc::channel(16);

        handle_message(&app, &mut conn, InboundMessage::GetSessionInfo, &tx).await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            OutboundMessage::Error { .. }
        ));
        assert!(!conn.handshaken);
    }

    #[tokio::test]
    async fn handshake_gets_ack() {
        let app = test_app().await;
        let mut conn = ConnState::new();
        let (tx, mut rx) = mpsc::channel(16);

        let handshake: InboundMessage = serde_json::from_value(serde_json::json!({
            "type": "HANDSHAKE",
            "clientType": "extension",
            "version": "1.0.0",
            "capabilities": ["audio"]
        }))
        .unwrap();

        handle_message(&app, &mut conn, handshake, &tx).await;
        assert!(conn.handshaken);
        match rx.recv().await.unwrap() {
            OutboundMessage::HandshakeAck { status, .. } => assert_eq!(status, "ready"),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn audio_chunk_creates_shared_session_and_meeting() {
        let app = test_app().await;
        let mut conn = ConnState::new();
        conn.handshaken = true;
        let (tx, _rx) = mpsc::channel(16);

        handle_message(&app, &mut conn, audio_chunk_msg(&[0u8; 1000]), &tx).await;
        let session = conn.session.clone().expect("session attached");

        // A second connection with the same metadata attaches to the same
        // session.
        let mut conn2 = ConnState::new();
        conn2.handshaken = true;
        let (tx2, _rx2) = mpsc::channel(16);
        handle_message(&app, &mut conn2, audio_chunk_msg(&[0u8; 1000]), &tx2).await;
        assert!(Arc::ptr_eq(&session, conn2.session.as_ref().unwrap()));

        // The meeting row exists.
        let meeting = app
            .store
            .get_meeting(&session.meeting_id)
            .await
            .unwrap()
            .expect("meeting persisted");
        assert_eq!(meeting.platform, MeetingPlatform::Zoom);
    }

    #[tokio::test]
    async fn zero_length_audio_yields_error_message() {
        let app = test_app().await;
        let mut conn = ConnState::new();
        conn.handshaken = true;
        let (tx, mut rx) = mpsc::channel(16);

        handle_message(&app, &mut conn, audio_chunk_msg(&[]), &tx).await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            OutboundMessage::Error { .. }
        ));
    }

    #[tokio::test]
    async fn session_info_reports_counts() {
        let app = test_app().await;
        let mut conn = ConnState::new();
        conn.handshaken = true;
        let (tx, mut rx) = mpsc::channel(16);

        handle_message(&app, &mut conn, audio_chunk_msg(&[0u8; 1000]), &tx).await;
        let session = conn.session.clone().unwrap();
        session.ingest_transcription("hello there", 1_000, None, None);

        handle_message(&app, &mut conn, InboundMessage::GetSessionInfo, &tx).await;
        // The forward task may interleave broadcast events (the
        // TRANSCRIPTION_RESULT) on the same channel; skip to the reply.
        loop {
            match rx.recv().await.unwrap() {
                OutboundMessage::SessionInfo {
                    chunk_count,
                    transcript_length,
                    ..
                } => {
                    assert_eq!(chunk_count, 1);
                    assert_eq!(transcript_length, "hello there".len());
                    break;
                }
                OutboundMessage::TranscriptionResult { .. } => continue,
                other => panic!("unexpected reply: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn meeting_ended_finalizes_and_completes() {
        let app = test_app().await;
        let mut conn = ConnState::new();
        conn.handshaken = true;
        let (tx, _rx) = mpsc::channel(16);

        handle_message(&app, &mut conn, audio_chunk_msg(&[0u8; 1000]), &tx).await;
        let session = conn.session.clone().unwrap();
        let mut events = session.subscribe();
        session.ingest_transcription("Sarah: John, please update the docs.", 1_000, None, None);

        let ended: InboundMessage = serde_json::from_value(serde_json::json!({
            "type": "MEETING_EVENT",
            "eventType": "meeting_ended",
            "data": {"bufferFlushComplete": true}
        }))
        .unwrap();
        handle_message(&app, &mut conn, ended, &tx).await;

        // Drain broadcast events until PROCESSING_COMPLETE.
        let complete = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(OutboundMessage::ProcessingComplete { status, .. }) => break status,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream closed early: {}", e),
                }
            }
        })
        .await
        .expect("finalization should complete");

        assert_eq!(complete, "success");
        // Fallback mode (no LLM credential): summary persisted, zero tasks.
        assert!(app
            .store
            .get_summary(&session.meeting_id)
            .await
            .unwrap()
            .is_some());
        assert!(app
            .store
            .get_tasks(Some(&session.meeting_id))
            .await
            .unwrap()
            .is_empty());
        // The registry no longer tracks the session.
        assert!(app.sessions.get(&session.meeting_id).await.is_none());
    }
}
