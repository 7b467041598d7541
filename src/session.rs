//! Per-meeting in-memory state. All mutation funnels through one lock; the
//! gateway and transcription workers never touch the fields directly.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::sync::{broadcast, RwLock};

use crate::models::{MeetingPlatform, Participant, ParticipantStatus, TranscriptChunk};
use crate::ws::messages::{AudioMetadata, OutboundMessage, ParticipantUpdate};

/// Audio accumulates until roughly this long before a transcription job is
/// detached, in seconds.
const WINDOW_SECS: usize = 1;
/// Upper bound on a single inbound audio chunk, in seconds.
const MAX_CHUNK_SECS: usize = 30;
/// Timestamps within the same bucket fingerprint identically.
const FINGERPRINT_BUCKET_MS: i64 = 2_000;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Open,
    Flushing,
    Finalizing,
    Closed,
}

/// Why an audio chunk was refused.
#[derive(Debug)]
pub enum AudioRejection {
    InvalidBase64(String),
    Empty,
    TooLarge { bytes: usize, max: usize },
    NotOpen,
}

impl fmt::Display for AudioRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioRejection::InvalidBase64(e) => write!(f, "invalid base64 audio payload: {}", e),
            AudioRejection::Empty => write!(f, "audio chunk has zero length"),
            AudioRejection::TooLarge { bytes, max } => {
                write!(f, "audio chunk of {} bytes exceeds maximum {}", bytes, max)
            }
            AudioRejection::NotOpen => write!(f, "session is no longer accepting audio"),
        }
    }
}

/// A detached window of PCM ready for the transcriber.
#[derive(Debug)]
pub struct AudioJob {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: i64,
}

struct SessionInner {
    lifecycle: Lifecycle,
    audio_buffer: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    buffered_timestamp: i64,
    chunk_count: usize,
    cumulative_transcript: String,
    participants: HashMap<String, Participant>,
    seen_fingerprints: HashSet<String>,
    next_sequence: i64,
    last_activity: Instant,
    title: Option<String>,
}

/// One meeting's runtime state. Holds the meeting id only; the gateway owns
/// the index of sessions.
pub struct Session {
    pub meeting_id: String,
    pub platform: MeetingPlatform,
    inner: Mutex<SessionInner>,
    events: broadcast::Sender<OutboundMessage>,
    pending_jobs: AtomicUsize,
}

impl Session {
    pub fn new(meeting_id: String, platform: MeetingPlatform) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            meeting_id,
            platform,
            inner: Mutex::new(SessionInner {
                lifecycle: Lifecycle::Open,
                audio_buffer: Vec::new(),
                sample_rate: 16_000,
                channels: 1,
                buffered_timestamp: 0,
                chunk_count: 0,
                cumulative_transcript: String::new(),
                participants: HashMap::new(),
                seen_fingerprints: HashSet::new(),
                next_sequence: 1,
                last_activity: Instant::now(),
                title: None,
            }),
            events,
            pending_jobs: AtomicUsize::new(0),
        })
    }

    /// Subscribe to the session's outbound event stream. Every connection
    /// attached to this meeting gets its own receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.events.subscribe()
    }

    pub fn emit(&self, message: OutboundMessage) {
        // No receivers is fine: the meeting may outlive its connections.
        let _ = self.events.send(message);
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().unwrap().lifecycle
    }

    pub fn idle_for(&self) -> Duration {
        self.inner.lock().unwrap().last_activity.elapsed()
    }

    pub fn title(&self) -> Option<String> {
        self.inner.lock().unwrap().title.clone()
    }

    pub fn set_title(&self, title: String) {
        self.inner.lock().unwrap().title = Some(title);
    }

    /// Decode and buffer one audio chunk. Returns a detached transcription
    /// job once the buffered window is long enough.
    pub fn append_audio(
        &self,
        data_base64: &str,
        timestamp: Option<i64>,
        metadata: &AudioMetadata,
    ) -> Result<Option<AudioJob>, AudioRejection> {
        let pcm = base64::engine::general_purpose::STANDARD
            .decode(data_base64)
            .map_err(|e| AudioRejection::InvalidBase64(e.to_string()))?;

        if pcm.is_empty() {
            return Err(AudioRejection::Empty);
        }

        let bytes_per_sec =
            metadata.sample_rate as usize * metadata.channels as usize * metadata.sample_width as usize;
        let max = bytes_per_sec * MAX_CHUNK_SECS;
        if pcm.len() > max {
            return Err(AudioRejection::TooLarge {
                bytes: pcm.len(),
                max,
            });
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.lifecycle != Lifecycle::Open {
            return Err(AudioRejection::NotOpen);
        }

        inner.last_activity = Instant::now();
        inner.sample_rate = metadata.sample_rate;
        inner.channels = metadata.channels;
        if inner.audio_buffer.is_empty() {
            inner.buffered_timestamp =
                timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        }
        inner.audio_buffer.extend_from_slice(&pcm);

        let window = bytes_per_sec * WINDOW_SECS;
        if inner.audio_buffer.len() >= window {
            Ok(Some(Self::detach_job(&mut inner)))
        } else {
            Ok(None)
        }
    }

    /// Detach whatever audio remains, regardless of window size. Used during
    /// the end-of-meeting flush.
    pub fn drain_audio(&self) -> Option<AudioJob> {
        let mut inner = self.inner.lock().unwrap();
        if inner.audio_buffer.is_empty() {
            None
        } else {
            Some(Self::detach_job(&mut inner))
        }
    }

    fn detach_job(inner: &mut SessionInner) -> AudioJob {
        AudioJob {
            pcm: std::mem::take(&mut inner.audio_buffer),
            sample_rate: inner.sample_rate,
            channels: inner.channels,
            timestamp: inner.buffered_timestamp,
        }
    }

    /// Upsert participants and return the current roster.
    pub fn update_participants(&self, updates: &[ParticipantUpdate]) -> Vec<Participant> {
        let mut inner = self.inner.lock().unwrap();
        inner.last_activity = Instant::now();
        for update in updates {
            let id = update
                .id
                .clone()
                .unwrap_or_else(|| update.name.to_lowercase().replace(' ', "-"));
            let status = update
                .status
                .as_deref()
                .map(ParticipantStatus::parse)
                .unwrap_or(ParticipantStatus::Active);

            inner
                .participants
                .entry(id.clone())
                .and_modify(|p| {
                    p.name = update.name.clone();
                    p.platform_id = update.platform_id.clone();
                    // A participant who left stays left.
                    if p.status != ParticipantStatus::Left {
                        p.status = status;
                    }
                    p.is_host = update.is_host;
                })
                .or_insert_with(|| Participant {
                    participant_id: id,
                    name: update.name.clone(),
                    platform_id: update.platform_id.clone(),
                    status,
                    is_host: update.is_host,
                    join_time: update.join_time.clone(),
                });
        }
        let mut roster: Vec<Participant> = inner.participants.values().cloned().collect();
        roster.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        roster
    }

    /// Apply one transcription result. Duplicate fingerprints drop silently;
    /// a fresh chunk is assigned the next sequence, extends the rolling
    /// transcript, and is broadcast to attached clients.
    pub fn ingest_transcription(
        &self,
        text: &str,
        timestamp: i64,
        confidence: Option<f64>,
        speaker: Option<String>,
    ) -> Option<TranscriptChunk> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let fingerprint = fingerprint(text, timestamp);

        let mut inner = self.inner.lock().unwrap();
        if !inner.seen_fingerprints.insert(fingerprint.clone()) {
            return None;
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.chunk_count += 1;
        inner.last_activity = Instant::now();

        if !inner.cumulative_transcript.is_empty() {
            inner.cumulative_transcript.push(' ');
        }
        inner.cumulative_transcript.push_str(text);

        let chunk = TranscriptChunk {
            sequence,
            text: text.to_string(),
            timestamp,
            speaker,
            confidence,
            fingerprint,
        };

        // Emitted under the lock: clients observe results in ingestion
        // order, which is sequence order.
        self.emit(OutboundMessage::TranscriptionResult {
            meeting_id: self.meeting_id.clone(),
            text: chunk.text.clone(),
            timestamp: chunk.timestamp,
            speaker: chunk.speaker.clone(),
            confidence: chunk.confidence,
            sequence: chunk.sequence,
        });

        Some(chunk)
    }

    pub fn cumulative_transcript(&self) -> String {
        self.inner.lock().unwrap().cumulative_transcript.clone()
    }

    pub fn participants(&self) -> Vec<Participant> {
        let inner = self.inner.lock().unwrap();
        let mut roster: Vec<Participant> = inner.participants.values().cloned().collect();
        roster.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        roster
    }

    /// (participant_count, chunk_count, transcript_length)
    pub fn info(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock().unwrap();
        (
            inner.participants.len(),
            inner.chunk_count,
            inner.cumulative_transcript.len(),
        )
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Transition Open -> Flushing. Returns false when finalization already
    /// started; the transition out of Open happens at most once.
    pub fn begin_finalize(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.lifecycle == Lifecycle::Open {
            inner.lifecycle = Lifecycle::Flushing;
            true
        } else {
            false
        }
    }

    pub fn mark_finalizing(&self) {
        self.inner.lock().unwrap().lifecycle = Lifecycle::Finalizing;
    }

    pub fn mark_closed(&self) {
        self.inner.lock().unwrap().lifecycle = Lifecycle::Closed;
    }

    // ------------------------------------------------------------------
    // In-flight transcription accounting (the finalization barrier)
    // ------------------------------------------------------------------

    pub fn job_started(&self) {
        self.pending_jobs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn job_finished(&self) {
        self.pending_jobs.fetch_sub(1, Ordering::SeqCst);
    }

    /// Wait until in-flight transcription jobs complete, bounded by the
    /// given deadline.
    pub async fn wait_for_jobs(&self, deadline: Duration) {
        let waited = tokio::time::timeout(deadline, async {
            while self.pending_jobs.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if waited.is_err() {
            tracing::warn!(
                "session {} finalizing with {} transcription jobs still in flight",
                self.meeting_id,
                self.pending_jobs.load(Ordering::SeqCst)
            );
        }
    }
}

/// Stable dedup key: normalized text plus a coarse time bucket.
pub fn fingerprint(text: &str, timestamp: i64) -> String {
    let normalized = normalize_text(text);
    let bucket = timestamp / FINGERPRINT_BUCKET_MS;
    let mut hasher = Sha1::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b":");
    hasher.update(bucket.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derive the stable meeting id from platform, URL and the day bucket.
/// Identical inputs from different connections land on the same session.
pub fn derive_meeting_id(platform: &str, meeting_url: &str, day: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(platform.as_bytes());
    hasher.update(meeting_url.as_bytes());
    hasher.update(day.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("mtg-{}", &digest[..12])
}

// ----------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------

/// The gateway's index of live sessions, keyed by meeting id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, meeting_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(meeting_id).cloned()
    }

    /// Fetch or create the session for a meeting id. Returns the session and
    /// whether it was newly created.
    pub async fn get_or_create(
        &self,
        meeting_id: &str,
        platform: MeetingPlatform,
    ) -> (Arc<Session>, bool) {
        if let Some(existing) = self.get(meeting_id).await {
            return (existing, false);
        }
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(meeting_id) {
            return (existing.clone(), false);
        }
        let session = Session::new(meeting_id.to_string(), platform);
        sessions.insert(meeting_id.to_string(), session.clone());
        (session, true)
    }

    pub async fn remove(&self, meeting_id: &str) {
        self.sessions.write().await.remove(meeting_id);
    }

    pub async fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    fn session() -> Arc<Session> {
        Session::new("mtg-test".to_string(), MeetingPlatform::Zoom)
    }

    #[test]
    fn fingerprint_stable_within_bucket() {
        let a = fingerprint("Hello, World!", 1_000);
        let b = fingerprint("hello world", 1_500);
        assert_eq!(a, b);

        let c = fingerprint("hello world", 4_100);
        assert_ne!(a, c);

        let d = fingerprint("different text", 1_000);
        assert_ne!(a, d);
    }

    #[test]
    fn meeting_id_is_stable_and_short() {
        let a = derive_meeting_id("zoom", "https://zoom.us/j/1", "2025-01-01");
        let b = derive_meeting_id("zoom", "https://zoom.us/j/1", "2025-01-01");
        let c = derive_meeting_id("zoom", "https://zoom.us/j/1", "2025-01-02");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("mtg-"));
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn duplicate_transcription_is_dropped_silently() {
        let s = session();
        let mut rx = s.subscribe();

        let first = s.ingest_transcription("Hello world", 1_000, Some(0.9), None);
        assert!(first.is_some());
        assert_eq!(first.unwrap().sequence, 1);

        let duplicate = s.ingest_transcription("Hello world", 1_200, Some(0.9), None);
        assert!(duplicate.is_none());

        // Exactly one TRANSCRIPTION_RESULT was emitted.
        assert!(matches!(
            rx.try_recv().unwrap(),
            OutboundMessage::TranscriptionResult { sequence: 1, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sequences_are_contiguous_from_one() {
        let s = session();
        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            let chunk = s
                .ingest_transcription(text, (i as i64) * 10_000, None, None)
                .unwrap();
            assert_eq!(chunk.sequence, i as i64 + 1);
        }
        assert_eq!(s.cumulative_transcript(), "first second third");
    }

    #[test]
    fn empty_audio_chunk_is_rejected() {
        let s = session();
        let meta = AudioMetadata::default();
        assert!(matches!(
            s.append_audio(&b64(&[]), None, &meta),
            Err(AudioRejection::Empty)
        ));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let s = session();
        let meta = AudioMetadata::default();
        assert!(matches!(
            s.append_audio("not-base64!!!", None, &meta),
            Err(AudioRejection::InvalidBase64(_))
        ));
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        let s = session();
        let meta = AudioMetadata::default();
        // 31 seconds at 16 kHz mono 16-bit
        let oversized = vec![0u8; 16_000 * 2 * 31];
        assert!(matches!(
            s.append_audio(&b64(&oversized), None, &meta),
            Err(AudioRejection::TooLarge { .. })
        ));
    }

    #[test]
    fn audio_windows_detach_at_one_second() {
        let s = session();
        let meta = AudioMetadata::default();
        let half_second = vec![0u8; 16_000]; // 0.5s at 16 kHz mono 16-bit

        let job = s.append_audio(&b64(&half_second), Some(1_000), &meta).unwrap();
        assert!(job.is_none());

        let job = s.append_audio(&b64(&half_second), Some(1_500), &meta).unwrap();
        let job = job.expect("window should detach at 1s");
        assert_eq!(job.pcm.len(), 32_000);
        assert_eq!(job.timestamp, 1_000);
        assert_eq!(job.sample_rate, 16_000);

        // Buffer restarts empty.
        assert!(s.drain_audio().is_none());
    }

    #[test]
    fn drain_returns_partial_window() {
        let s = session();
        let meta = AudioMetadata::default();
        let small = vec![0u8; 1_000];
        s.append_audio(&b64(&small), Some(42), &meta).unwrap();

        let job = s.drain_audio().expect("partial audio should drain");
        assert_eq!(job.pcm.len(), 1_000);
        assert_eq!(job.timestamp, 42);
    }

    #[test]
    fn finalize_transition_happens_once() {
        let s = session();
        assert!(s.begin_finalize());
        assert!(!s.begin_finalize());
        assert_eq!(s.lifecycle(), Lifecycle::Flushing);

        // Audio after the transition is refused.
        let meta = AudioMetadata::default();
        assert!(matches!(
            s.append_audio(&b64(&[0u8; 100]), None, &meta),
            Err(AudioRejection::NotOpen)
        ));
    }

    #[test]
    fn participant_left_is_sticky() {
        let s = session();
        let update = |status: &str| ParticipantUpdate {
            id: Some("p1".to_string()),
            name: "Sarah".to_string(),
            platform_id: None,
            status: Some(status.to_string()),
            is_host: false,
            join_time: None,
        };

        s.update_participants(&[update("active")]);
        s.update_participants(&[update("left")]);
        let roster = s.update_participants(&[update("active")]);

        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].status, ParticipantStatus::Left);
    }

    #[tokio::test]
    async fn wait_for_jobs_returns_when_drained() {
        let s = session();
        s.job_started();
        let s2 = s.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            s2.job_finished();
        });
        s.wait_for_jobs(Duration::from_secs(1)).await;
        assert_eq!(s.pending_jobs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn registry_shares_sessions_by_meeting_id() {
        let registry = SessionRegistry::new();
        let (a, created_a) = registry.get_or_create("mtg-1", MeetingPlatform::Zoom).await;
        let (b, created_b) = registry.get_or_create("mtg-1", MeetingPlatform::Zoom).await;
        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));

        registry.remove("mtg-1").await;
        assert!(registry.get("mtg-1").await.is_none());
    }
}
