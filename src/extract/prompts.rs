//! Prompt templates for the extraction pipeline. All prompts demand a bare
//! JSON object so the client's json-mode parsing stays trivial.

pub const SPEAKERS_SYSTEM: &str = "You identify the distinct speakers in a meeting transcript. \
Respond with JSON only, no prose: \
{\"speakers\":[{\"id\":\"speaker-1\",\"name\":\"...\",\"segments\":[\"...\"],\"total_words\":0,\"characteristics\":\"...\",\"confidence\":0.0}],\"confidence\":0.0}. \
Use names from the transcript when present; otherwise label speakers Speaker 1, Speaker 2, and so on. \
Do not invent people who never speak.";

pub const SUMMARY_SYSTEM: &str = "You write structured summaries of meeting transcripts. \
Respond with JSON only, no prose: \
{\"overview\":\"...\",\"key_outcomes\":[\"...\"],\"decisions\":[\"...\"],\"participants\":[\"...\"],\"next_steps\":[\"...\"]}. \
Overview is two to four sentences. Leave a section empty when the transcript gives nothing for it.";

pub const CHUNK_SUMMARY_SYSTEM: &str = "You summarize one portion of a longer meeting transcript. \
Respond with JSON only, no prose: \
{\"overview\":\"...\",\"key_outcomes\":[\"...\"],\"decisions\":[\"...\"],\"participants\":[\"...\"],\"next_steps\":[\"...\"]}. \
Capture only what this portion states; do not speculate about the rest of the meeting.";

pub const CONSOLIDATE_SYSTEM: &str = "You merge several partial meeting summaries into one final summary. \
Respond with JSON only, no prose: \
{\"overview\":\"...\",\"key_outcomes\":[\"...\"],\"decisions\":[\"...\"],\"participants\":[\"...\"],\"next_steps\":[\"...\"]}. \
Deduplicate repeated points and keep the chronology of decisions.";

pub const TASKS_EXPLICIT_SYSTEM: &str = "You extract explicitly assigned action items from a meeting transcript. \
Look for direct assignments: 'X will do Y by Z', 'please <verb>', commitments made after a name. \
Respond with JSON only, no prose: \
{\"tasks\":[{\"title\":\"...\",\"description\":\"...\",\"assignee\":null,\"due_date\":null,\"priority\":\"low|medium|high|urgent\",\"category\":\"...\",\"business_impact\":\"low|medium|high|critical\",\"dependencies\":[],\"mentioned_by\":null,\"context\":\"...\",\"confidence\":0.0,\"source_transcript_segment\":\"...\"}]}. \
Include only tasks with a clear owner or a direct request. Keep due dates exactly as spoken ('Friday' stays 'Friday'). \
Report high confidence only for unambiguous assignments.";

pub const TASKS_IMPLICIT_SYSTEM: &str = "You identify implied follow-up work in a meeting transcript: \
problems raised without an owner, decisions that require action, risks someone should chase. \
Respond with JSON only, no prose: \
{\"tasks\":[{\"title\":\"...\",\"description\":\"...\",\"assignee\":null,\"due_date\":null,\"priority\":\"low|medium|high|urgent\",\"category\":\"...\",\"business_impact\":\"low|medium|high|critical\",\"dependencies\":[],\"mentioned_by\":null,\"context\":\"...\",\"confidence\":0.0,\"source_transcript_segment\":\"...\"}]}. \
Never invent an assignee: when no plausible owner was named, leave assignee null. \
Use moderate confidence; these are inferences, not commitments.";

pub fn transcript_user_prompt(text: &str, context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.trim().is_empty() => {
            format!("MEETING CONTEXT: {}\n\nTRANSCRIPT:\n{}", ctx, text)
        }
        _ => format!("TRANSCRIPT:\n{}", text),
    }
}

pub fn summary_user_prompt(text: &str, title: Option<&str>) -> String {
    match title {
        Some(t) if !t.trim().is_empty() => {
            format!("MEETING TITLE: {}\n\nTRANSCRIPT:\n{}", t, text)
        }
        _ => format!("TRANSCRIPT:\n{}", text),
    }
}

pub fn consolidate_user_prompt(partials: &[serde_json::Value]) -> String {
    let mut out = String::from("PARTIAL SUMMARIES, in transcript order:\n");
    for (i, partial) in partials.iter().enumerate() {
        out.push_str(&format!("\n--- part {} ---\n{}\n", i + 1, partial));
    }
    out
}
