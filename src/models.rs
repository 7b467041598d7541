use serde::{Deserialize, Serialize};

// ============================================================================
// Core entities
// ============================================================================

/// Conferencing platform the audio originated from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MeetingPlatform {
    GoogleMeet,
    Zoom,
    Teams,
    Unknown,
}

impl MeetingPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingPlatform::GoogleMeet => "google-meet",
            MeetingPlatform::Zoom => "zoom",
            MeetingPlatform::Teams => "teams",
            MeetingPlatform::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "google-meet" | "meet" => MeetingPlatform::GoogleMeet,
            "zoom" => MeetingPlatform::Zoom,
            "teams" | "ms-teams" => MeetingPlatform::Teams,
            _ => MeetingPlatform::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub title: String,
    pub platform: MeetingPlatform,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Away,
    Left,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Active => "active",
            ParticipantStatus::Away => "away",
            ParticipantStatus::Left => "left",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "away" => ParticipantStatus::Away,
            "left" => ParticipantStatus::Left,
            _ => ParticipantStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,
    pub status: ParticipantStatus,
    #[serde(default)]
    pub is_host: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub sequence: i64,
    pub text: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub fingerprint: String,
}

/// Structured meeting summary. One per meeting, last-writer-wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryDocument {
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub key_outcomes: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

impl SummaryDocument {
    pub fn is_empty(&self) -> bool {
        self.overview.is_empty()
            && self.key_outcomes.is_empty()
            && self.decisions.is_empty()
            && self.participants.is_empty()
            && self.next_steps.is_empty()
    }
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Map textual cues from AI output onto the priority scale.
    pub fn from_cue(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "urgent" => Priority::Urgent,
            "critical" | "asap" | "blocker" | "high" => Priority::High,
            "should" | "important" | "medium" | "normal" => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => TaskStatus::InProgress,
            "completed" => TaskStatus::Completed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BusinessImpact {
    Low,
    Medium,
    High,
    Critical,
}

impl BusinessImpact {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessImpact::Low => "low",
            BusinessImpact::Medium => "medium",
            BusinessImpact::High => "high",
            BusinessImpact::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "medium" => BusinessImpact::Medium,
            "high" => BusinessImpact::High,
            "critical" => BusinessImpact::Critical,
            _ => BusinessImpact::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExplicitLevel {
    Direct,
    Implied,
    Inferred,
}

impl ExplicitLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplicitLevel::Direct => "direct",
            ExplicitLevel::Implied => "implied",
            ExplicitLevel::Inferred => "inferred",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "direct" => ExplicitLevel::Direct,
            "inferred" => ExplicitLevel::Inferred,
            _ => ExplicitLevel::Implied,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Explicit,
    Implicit,
    DependencyAnalysis,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Explicit => "explicit",
            ExtractionMethod::Implicit => "implicit",
            ExtractionMethod::DependencyAnalysis => "dependency_analysis",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "explicit" => ExtractionMethod::Explicit,
            "dependency_analysis" => ExtractionMethod::DependencyAnalysis,
            _ => ExtractionMethod::Implicit,
        }
    }
}

/// A task as emitted by the extraction pipeline. Every field the AI produces
/// is carried here and persisted losslessly; nothing is dropped before the
/// store sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTask {
    pub ai_task_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    #[serde(default)]
    pub category: String,
    pub business_impact: BusinessImpact,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentioned_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub explicit_level: ExplicitLevel,
    pub ai_extracted_at: String,
    pub ai_confidence_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_transcript_segment: Option<String>,
    pub extraction_method: ExtractionMethod,
}

/// A persisted task row: the full extracted record plus the surrogate id and
/// row timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub meeting_id: String,
    #[serde(flatten)]
    pub task: ExtractedTask,
    pub created_at: String,
    pub updated_at: String,
}

/// Link to a task created on an external platform. At most one per
/// (task, platform).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTaskRef {
    pub task_id: i64,
    pub platform: String,
    pub external_id: String,
    pub external_url: String,
    pub created_at: String,
}

// ============================================================================
// Extraction envelopes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub segments: Vec<String>,
    #[serde(default)]
    pub total_words: u64,
    #[serde(default)]
    pub characteristics: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerIdentification {
    pub speakers: Vec<Speaker>,
    pub confidence: f64,
    pub identification_method: String,
}

impl SpeakerIdentification {
    pub fn empty() -> Self {
        Self {
            speakers: Vec::new(),
            confidence: 0.0,
            identification_method: "empty_input".to_string(),
        }
    }
}

// ============================================================================
// REST request/response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MeetingListItem {
    pub id: String,
    pub title: String,
    pub platform: MeetingPlatform,
    pub created_at: String,
    pub updated_at: String,
    pub participant_count: i64,
}

#[derive(Debug, Serialize)]
pub struct MeetingsResponse {
    pub meetings: Vec<MeetingListItem>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct MeetingDetailResponse {
    #[serde(flatten)]
    pub meeting: Meeting,
    pub participants: Vec<Participant>,
    pub transcript: Vec<TranscriptChunk>,
}

#[derive(Debug, Serialize)]
pub struct SummaryStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<SummaryDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptSegmentInput {
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub speaker: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveTranscriptRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    pub segments: Vec<TranscriptSegmentInput>,
}

#[derive(Debug, Serialize)]
pub struct SaveTranscriptResponse {
    pub meeting_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ProcessTranscriptRequest {
    #[serde(default)]
    pub meeting_id: Option<String>,
    pub transcript: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessTranscriptResponse {
    pub process_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeTranscriptRequest {
    pub transcript: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}
