pub mod prompts;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{LlmClient, SchemaHint};
use crate::models::{
    BusinessImpact, ExplicitLevel, ExtractedTask, ExtractionMethod, Priority, Speaker,
    SpeakerIdentification, SummaryDocument, TaskStatus,
};

/// Transcripts longer than this are summarized in overlapping chunks.
const CHUNK_THRESHOLD: usize = 5_000;
/// Upper bound on a single chunk handed to the model.
const MAX_CHUNK: usize = 30_000;
/// Overlap preserved between adjacent chunks so context survives the cut.
const CHUNK_OVERLAP: usize = 1_000;

const EXPLICIT_LABEL_CONFIDENCE: f64 = 0.9;
const FALLBACK_SPEAKER_CONFIDENCE: f64 = 0.3;
const DEFAULT_EXPLICIT_CONFIDENCE: f64 = 0.85;
const DEFAULT_IMPLICIT_CONFIDENCE: f64 = 0.6;

/// Result envelope for `extract_tasks`. Always structurally valid, possibly
/// empty.
#[derive(Debug, Clone)]
pub struct TaskExtraction {
    pub tasks: Vec<ExtractedTask>,
    pub fallback_used: bool,
}

impl TaskExtraction {
    pub fn empty() -> Self {
        Self {
            tasks: Vec::new(),
            fallback_used: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryExtraction {
    pub summary: SummaryDocument,
    pub fallback_used: bool,
}

/// Converts transcripts into structured artifacts: speakers, summary, tasks.
pub struct Extractor {
    llm: Arc<LlmClient>,
}

impl Extractor {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    // ------------------------------------------------------------------
    // Speakers
    // ------------------------------------------------------------------

    /// Identify speakers. Explicit `Name:` labels short-circuit the LLM;
    /// empty input short-circuits everything.
    pub async fn identify_speakers(
        &self,
        text: &str,
        context: Option<&str>,
    ) -> SpeakerIdentification {
        if text.trim().is_empty() {
            return SpeakerIdentification::empty();
        }

        if let Some(labeled) = identify_from_labels(text) {
            return labeled;
        }

        let user = prompts::transcript_user_prompt(text, context);
        match self
            .llm
            .complete(prompts::SPEAKERS_SYSTEM, &user, SchemaHint::Speakers)
            .await
        {
            Ok(completion) if completion.fallback_used => SpeakerIdentification {
                speakers: Vec::new(),
                confidence: 0.0,
                identification_method: "fallback".to_string(),
            },
            Ok(completion) => match parse_speakers(&completion.value) {
                Some(mut identification) => {
                    identification.identification_method = "ai_inference".to_string();
                    identification
                }
                None => unknown_speaker_fallback(),
            },
            Err(e) => {
                warn!("speaker identification failed: {}", e);
                unknown_speaker_fallback()
            }
        }
    }

    // ------------------------------------------------------------------
    // Summary
    // ------------------------------------------------------------------

    /// Produce the structured summary document. Long transcripts are
    /// summarized per-chunk and consolidated in a final pass.
    pub async fn summarize(&self, text: &str, title: Option<&str>) -> SummaryExtraction {
        if text.trim().is_empty() {
            return SummaryExtraction {
                summary: SummaryDocument::default(),
                fallback_used: false,
            };
        }

        if text.len() <= CHUNK_THRESHOLD {
            let user = prompts::summary_user_prompt(text, title);
            return self
                .summary_completion(prompts::SUMMARY_SYSTEM, &user, SchemaHint::Summary)
                .await;
        }

        let chunks = chunk_text(text, CHUNK_THRESHOLD.min(MAX_CHUNK), CHUNK_OVERLAP);
        debug!("summarizing {} chars in {} chunks", text.len(), chunks.len());

        let mut partials = Vec::with_capacity(chunks.len());
        let mut fallback_used = false;
        for chunk in &chunks {
            let user = prompts::summary_user_prompt(chunk, title);
            match self
                .llm
                .complete(prompts::CHUNK_SUMMARY_SYSTEM, &user, SchemaHint::ChunkSummary)
                .await
            {
                Ok(completion) => {
                    fallback_used |= completion.fallback_used;
                    partials.push(completion.value);
                }
                Err(e) => {
                    warn!("chunk summary failed, skipping chunk: {}", e);
                }
            }
        }

        if fallback_used || partials.is_empty() {
            return SummaryExtraction {
                summary: SummaryDocument::default(),
                fallback_used: true,
            };
        }

        let user = prompts::consolidate_user_prompt(&partials);
        self.summary_completion(prompts::CONSOLIDATE_SYSTEM, &user, SchemaHint::Summary)
            .await
    }

    async fn summary_completion(
        &self,
        system: &str,
        user: &str,
        schema: SchemaHint,
    ) -> SummaryExtraction {
        match self.llm.complete(system, user, schema).await {
            Ok(completion) => {
                let summary = serde_json::from_value::<SummaryDocument>(completion.value)
                    .unwrap_or_default();
                SummaryExtraction {
                    summary,
                    fallback_used: completion.fallback_used,
                }
            }
            Err(e) => {
                warn!("summary extraction failed: {}", e);
                SummaryExtraction {
                    summary: SummaryDocument::default(),
                    fallback_used: true,
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Two-pass task extraction: explicit assignments first, implied work
    /// second, unioned with near-duplicate titles merged toward the
    /// higher-confidence source.
    pub async fn extract_tasks(
        &self,
        text: &str,
        meeting_context: Option<&str>,
    ) -> TaskExtraction {
        if text.trim().is_empty() {
            return TaskExtraction::empty();
        }

        let extracted_at = chrono::Utc::now().to_rfc3339();
        let user = prompts::transcript_user_prompt(text, meeting_context);

        let mut tasks: Vec<ExtractedTask> = Vec::new();
        let mut fallback_used = false;

        for (system, method, level, default_confidence) in [
            (
                prompts::TASKS_EXPLICIT_SYSTEM,
                ExtractionMethod::Explicit,
                ExplicitLevel::Direct,
                DEFAULT_EXPLICIT_CONFIDENCE,
            ),
            (
                prompts::TASKS_IMPLICIT_SYSTEM,
                ExtractionMethod::Implicit,
                ExplicitLevel::Implied,
                DEFAULT_IMPLICIT_CONFIDENCE,
            ),
        ] {
            match self.llm.complete(system, &user, SchemaHint::Tasks).await {
                Ok(completion) => {
                    fallback_used |= completion.fallback_used;
                    tasks.extend(parse_tasks(
                        &completion.value,
                        method,
                        level,
                        default_confidence,
                        &extracted_at,
                    ));
                }
                Err(e) => {
                    // A failed pass degrades to its empty envelope.
                    warn!("{} task pass failed: {}", method.as_str(), e);
                    fallback_used = true;
                }
            }
        }

        let mut merged = merge_near_duplicates(tasks);
        assign_task_ids(&mut merged);

        TaskExtraction {
            tasks: merged,
            fallback_used,
        }
    }
}

// ----------------------------------------------------------------------
// Label-based speaker extraction
// ----------------------------------------------------------------------

fn speaker_label_regex() -> &'static Regex {
    static RE: once_cell::sync::OnceCell<Regex> = once_cell::sync::OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*([A-Z][A-Za-z .'\-]{0,40}?)\s*:\s+(.+)$").expect("valid regex")
    })
}

/// Extract speakers from `Name: utterance` lines. Returns None when the
/// transcript carries no such labels.
fn identify_from_labels(text: &str) -> Option<SpeakerIdentification> {
    let re = speaker_label_regex();
    let mut order: Vec<String> = Vec::new();
    let mut segments: HashMap<String, Vec<String>> = HashMap::new();

    for caps in re.captures_iter(text) {
        let name = caps[1].trim().to_string();
        let line = caps[2].trim().to_string();
        if !segments.contains_key(&name) {
            order.push(name.clone());
        }
        segments.entry(name).or_default().push(line);
    }

    if order.is_empty() {
        return None;
    }

    let speakers = order
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let segs = segments.remove(name).unwrap_or_default();
            let total_words = segs
                .iter()
                .map(|s| s.split_whitespace().count() as u64)
                .sum();
            Speaker {
                id: format!("speaker-{}", i + 1),
                name: name.clone(),
                segments: segs,
                total_words,
                characteristics: String::new(),
                confidence: EXPLICIT_LABEL_CONFIDENCE,
            }
        })
        .collect();

    Some(SpeakerIdentification {
        speakers,
        confidence: EXPLICIT_LABEL_CONFIDENCE,
        identification_method: "explicit_labels".to_string(),
    })
}

fn unknown_speaker_fallback() -> SpeakerIdentification {
    SpeakerIdentification {
        speakers: vec![Speaker {
            id: "speaker-1".to_string(),
            name: "Unknown Speaker".to_string(),
            segments: Vec::new(),
            total_words: 0,
            characteristics: String::new(),
            confidence: FALLBACK_SPEAKER_CONFIDENCE,
        }],
        confidence: FALLBACK_SPEAKER_CONFIDENCE,
        identification_method: "fallback".to_string(),
    }
}

fn parse_speakers(value: &Value) -> Option<SpeakerIdentification> {
    let raw = value.get("speakers")?.as_array()?;
    let mut speakers = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let name = entry.get("name")?.as_str()?.to_string();
        speakers.push(Speaker {
            id: entry
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("speaker-{}", i + 1)),
            name,
            segments: entry
                .get("segments")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|s| s.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
            total_words: entry.get("total_words").and_then(|v| v.as_u64()).unwrap_or(0),
            characteristics: entry
                .get("characteristics")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            confidence: entry
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.5),
        });
    }
    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| {
            if speakers.is_empty() {
                0.0
            } else {
                speakers.iter().map(|s| s.confidence).sum::<f64>() / speakers.len() as f64
            }
        });
    Some(SpeakerIdentification {
        speakers,
        confidence,
        identification_method: String::new(),
    })
}

// ----------------------------------------------------------------------
// Transcript chunking
// ----------------------------------------------------------------------

/// Split text into chunks of at most `size` characters with `overlap`
/// characters shared between neighbors. Cuts land on char boundaries.
fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    assert!(overlap < size);
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= size {
        return vec![text.to_string()];
    }

    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

// ----------------------------------------------------------------------
// Task normalization
// ----------------------------------------------------------------------

/// Normalize raw model output into `ExtractedTask` records. Entries without
/// a title are dropped; every AI-provided field is carried through.
fn parse_tasks(
    value: &Value,
    method: ExtractionMethod,
    default_level: ExplicitLevel,
    default_confidence: f64,
    extracted_at: &str,
) -> Vec<ExtractedTask> {
    let raw = match value.get("tasks").and_then(|v| v.as_array()) {
        Some(arr) => arr,
        None => return Vec::new(),
    };

    raw.iter()
        .filter_map(|entry| {
            let title = entry.get("title")?.as_str()?.trim();
            if title.is_empty() {
                return None;
            }

            let opt_str = |key: &str| {
                entry
                    .get(key)
                    .and_then(|v| v.as_str())
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
            };

            let dependencies = match entry.get("dependencies") {
                Some(Value::Array(arr)) => arr
                    .iter()
                    .filter_map(|d| d.as_str().map(|s| s.to_string()))
                    .collect(),
                Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
                _ => Vec::new(),
            };

            let confidence = entry
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(default_confidence)
                .clamp(0.0, 1.0);

            Some(ExtractedTask {
                ai_task_id: opt_str("ai_task_id").or_else(|| opt_str("id")).unwrap_or_default(),
                title: title.to_string(),
                description: opt_str("description").unwrap_or_default(),
                assignee: opt_str("assignee"),
                due_date: opt_str("due_date"),
                priority: entry
                    .get("priority")
                    .and_then(|v| v.as_str())
                    .map(Priority::from_cue)
                    .unwrap_or(Priority::Low),
                status: entry
                    .get("status")
                    .and_then(|v| v.as_str())
                    .map(TaskStatus::parse)
                    .unwrap_or(TaskStatus::Pending),
                category: opt_str("category").unwrap_or_else(|| "general".to_string()),
                business_impact: entry
                    .get("business_impact")
                    .and_then(|v| v.as_str())
                    .map(BusinessImpact::parse)
                    .unwrap_or(BusinessImpact::Low),
                dependencies,
                mentioned_by: opt_str("mentioned_by"),
                context: opt_str("context"),
                explicit_level: entry
                    .get("explicit_level")
                    .and_then(|v| v.as_str())
                    .map(ExplicitLevel::parse)
                    .unwrap_or(default_level),
                ai_extracted_at: extracted_at.to_string(),
                ai_confidence_score: confidence,
                source_transcript_segment: opt_str("source_transcript_segment"),
                extraction_method: method,
            })
        })
        .collect()
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Union tasks from both passes; near-duplicate titles collapse onto the
/// higher-confidence source.
fn merge_near_duplicates(tasks: Vec<ExtractedTask>) -> Vec<ExtractedTask> {
    let mut by_title: HashMap<String, ExtractedTask> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for task in tasks {
        let key = normalize_title(&task.title);
        let keep = match by_title.get(&key) {
            Some(existing) => existing.ai_confidence_score < task.ai_confidence_score,
            None => {
                order.push(key.clone());
                true
            }
        };
        if keep {
            by_title.insert(key, task);
        }
    }

    order
        .into_iter()
        .filter_map(|key| by_title.remove(&key))
        .collect()
}

/// Guarantee every task carries an `ai_task_id` unique within this call.
/// Model-provided ids are kept when they do not collide.
fn assign_task_ids(tasks: &mut [ExtractedTask]) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut counter = 0usize;
    for task in tasks.iter_mut() {
        if task.ai_task_id.is_empty() || seen.contains(&task.ai_task_id) {
            loop {
                counter += 1;
                let candidate = format!("task-{}", counter);
                if !seen.contains(&candidate) {
                    task.ai_task_id = candidate;
                    break;
                }
            }
        }
        seen.insert(task.ai_task_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmConfig, LlmProvider};
    use serde_json::json;

    fn fallback_extractor() -> Extractor {
        let cfg = LlmConfig {
            provider: LlmProvider::None,
            model: "none".into(),
            api_key: None,
            timeout_secs: 5,
            max_retries: 0,
            json_mode: true,
            base_url: None,
        };
        Extractor::new(Arc::new(LlmClient::new(cfg)))
    }

    fn mock_extractor(base_url: String) -> Extractor {
        let cfg = LlmConfig {
            provider: LlmProvider::OpenAi,
            model: "test-model".into(),
            api_key: Some("key".into()),
            timeout_secs: 5,
            max_retries: 0,
            json_mode: true,
            base_url: Some(base_url),
        };
        Extractor::new(Arc::new(LlmClient::new(cfg)))
    }

    #[tokio::test]
    async fn empty_input_returns_empty_envelopes_without_llm() {
        let ex = fallback_extractor();

        let speakers = ex.identify_speakers("", None).await;
        assert!(speakers.speakers.is_empty());
        assert_eq!(speakers.identification_method, "empty_input");
        assert_eq!(speakers.confidence, 0.0);

        let summary = ex.summarize("   \n  ", None).await;
        assert!(summary.summary.is_empty());
        assert!(!summary.fallback_used);

        let tasks = ex.extract_tasks("", None).await;
        assert!(tasks.tasks.is_empty());
        assert!(!tasks.fallback_used);
    }

    #[tokio::test]
    async fn explicit_labels_bypass_the_llm() {
        let ex = fallback_extractor();
        let transcript = "Sarah: John, please update the docs by Friday.\nJohn: Will do.";
        let result = ex.identify_speakers(transcript, None).await;

        assert_eq!(result.identification_method, "explicit_labels");
        assert!(result.confidence >= 0.9);
        assert_eq!(result.speakers.len(), 2);
        assert_eq!(result.speakers[0].name, "Sarah");
        assert_eq!(result.speakers[1].name, "John");
        assert_eq!(result.speakers[1].segments, vec!["Will do."]);
        assert!(result.speakers[0].total_words > 0);
    }

    #[tokio::test]
    async fn fallback_mode_yields_no_tasks_and_no_invented_assignees() {
        let ex = fallback_extractor();
        let result = ex
            .extract_tasks("Sarah: John, please update the docs by Friday.", None)
            .await;
        assert!(result.tasks.is_empty());
        assert!(result.fallback_used);
    }

    #[tokio::test]
    async fn fallback_mode_summary_is_empty_but_valid() {
        let ex = fallback_extractor();
        let result = ex.summarize("we talked about things", None).await;
        assert!(result.fallback_used);
        assert!(result.summary.is_empty());
    }

    #[tokio::test]
    async fn tasks_parsed_and_merged_from_both_passes() {
        let mut server = mockito::Server::new_async().await;
        let body = json!({
            "choices": [{"message": {"content": json!({
                "tasks": [{
                    "title": "Update the docs",
                    "description": "Refresh the onboarding docs",
                    "assignee": "John",
                    "due_date": "Friday",
                    "priority": "medium",
                    "mentioned_by": "Sarah",
                    "confidence": 0.9,
                    "source_transcript_segment": "John, please update the docs by Friday."
                }]
            }).to_string()}}]
        });
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(2)
            .create_async()
            .await;

        let ex = mock_extractor(server.url());
        let result = ex
            .extract_tasks("Sarah: John, please update the docs by Friday.", None)
            .await;

        mock.assert_async().await;
        assert!(!result.fallback_used);
        // Both passes returned the same title; the union merges to one task.
        assert_eq!(result.tasks.len(), 1);
        let task = &result.tasks[0];
        assert_eq!(task.title, "Update the docs");
        assert_eq!(task.assignee.as_deref(), Some("John"));
        assert_eq!(task.due_date.as_deref(), Some("Friday"));
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.extraction_method, ExtractionMethod::Explicit);
        assert_eq!(task.explicit_level, ExplicitLevel::Direct);
        assert!(task.ai_confidence_score >= 0.8);
        assert_eq!(task.ai_task_id, "task-1");
    }

    #[test]
    fn chunking_respects_size_and_overlap() {
        let text = "a".repeat(12_000);
        let chunks = chunk_text(&text, 5_000, 1_000);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.len() <= 5_000));
        // Consecutive chunks share the overlap region.
        let first: String = chunks[0].chars().skip(4_000).collect();
        let second: String = chunks[1].chars().take(1_000).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn chunking_short_text_is_single_chunk() {
        let chunks = chunk_text("short", 5_000, 1_000);
        assert_eq!(chunks, vec!["short".to_string()]);
    }

    #[test]
    fn near_duplicate_titles_merge_to_higher_confidence() {
        let extracted_at = "2025-01-01T00:00:00Z".to_string();
        let make = |title: &str, confidence: f64, method: ExtractionMethod| ExtractedTask {
            ai_task_id: String::new(),
            title: title.to_string(),
            description: String::new(),
            assignee: None,
            due_date: None,
            priority: Priority::Low,
            status: TaskStatus::Pending,
            category: "general".to_string(),
            business_impact: BusinessImpact::Low,
            dependencies: Vec::new(),
            mentioned_by: None,
            context: None,
            explicit_level: ExplicitLevel::Implied,
            ai_extracted_at: extracted_at.clone(),
            ai_confidence_score: confidence,
            source_transcript_segment: None,
            extraction_method: method,
        };

        let merged = merge_near_duplicates(vec![
            make("Update the docs!", 0.9, ExtractionMethod::Explicit),
            make("  update the docs ", 0.5, ExtractionMethod::Implicit),
            make("Ship the release", 0.6, ExtractionMethod::Implicit),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].ai_confidence_score, 0.9);
        assert_eq!(merged[0].extraction_method, ExtractionMethod::Explicit);
        assert_eq!(merged[1].title, "Ship the release");
    }

    #[test]
    fn task_ids_unique_within_call() {
        let extracted_at = "2025-01-01T00:00:00Z";
        let value = json!({
            "tasks": [
                {"title": "A", "id": "task-7"},
                {"title": "B", "id": "task-7"},
                {"title": "C"}
            ]
        });
        let mut tasks = parse_tasks(
            &value,
            ExtractionMethod::Explicit,
            ExplicitLevel::Direct,
            0.85,
            extracted_at,
        );
        assign_task_ids(&mut tasks);

        let ids: HashSet<_> = tasks.iter().map(|t| t.ai_task_id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert!(tasks.iter().any(|t| t.ai_task_id == "task-7"));
    }

    #[test]
    fn parse_tasks_drops_untitled_entries() {
        let value = json!({"tasks": [{"title": "  "}, {"description": "no title"}, {"title": "Real"}]});
        let tasks = parse_tasks(
            &value,
            ExtractionMethod::Implicit,
            ExplicitLevel::Implied,
            0.6,
            "2025-01-01T00:00:00Z",
        );
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Real");
        assert_eq!(tasks[0].explicit_level, ExplicitLevel::Implied);
    }
}
