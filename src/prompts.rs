//! System prompts sent with each analyzer's pipe request.
//!
//! The pipes themselves may carry richer prompts; these establish the JSON
//! shape the pipeline stores.

use crate::storage::AnalysisTask;

/// Mood scoring.
pub const MOOD_PROMPT: &str = r#"You analyze a therapy session transcript for the client's mood.

Respond with valid JSON only:
{
  "mood_score": 0.0,
  "confidence": 0.0,
  "rationale": "short explanation",
  "emotional_tone": "one or two words"
}

mood_score ranges from -1.0 (very low) to 1.0 (very positive)."#;

/// Topic extraction.
pub const TOPICS_PROMPT: &str = r#"You extract the main topics discussed in a therapy session transcript.

Respond with valid JSON only:
{
  "topics": ["topic"],
  "action_items": ["concrete follow-up"],
  "technique": "primary therapeutic technique used",
  "summary": "two sentence summary"
}"#;

/// Breakthrough detection.
pub const BREAKTHROUGH_PROMPT: &str = r#"You detect therapeutic breakthroughs in a therapy session transcript.

Respond with valid JSON only:
{
  "has_breakthrough": false,
  "breakthroughs": [{"label": "short name", "description": "what happened", "confidence": 0.0}]
}"#;

/// Action item summary; the input carries the Topics output.
pub const ACTION_SUMMARY_PROMPT: &str = r#"You condense the action items of a therapy session into one short summary.

The input contains the transcript and a "topics" object whose "action_items" list the follow-ups.

Respond with valid JSON only:
{
  "action_items_summary": "one or two sentences"
}"#;

/// Deep synthesis across every Wave 1 output.
pub const DEEP_PROMPT: &str = r#"You write a clinical synthesis of a therapy session.

The input contains the transcript and the outputs of the mood, topics and breakthrough analyses (and, when available, the action summary).

Respond with valid JSON only:
{
  "progress_indicators": ["observation"],
  "therapeutic_insights": ["insight"],
  "recommendations": ["next step"],
  "confidence": 0.0
}"#;

/// System prompt for a task.
pub fn system_prompt(task: AnalysisTask) -> &'static str {
    match task {
        AnalysisTask::Mood => MOOD_PROMPT,
        AnalysisTask::Topics => TOPICS_PROMPT,
        AnalysisTask::Breakthrough => BREAKTHROUGH_PROMPT,
        AnalysisTask::ActionSummary => ACTION_SUMMARY_PROMPT,
        AnalysisTask::Deep => DEEP_PROMPT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_task_has_a_json_prompt() {
        for task in AnalysisTask::ALL {
            let prompt = system_prompt(task);
            assert!(prompt.contains("valid JSON"), "{} prompt", task);
        }
    }
}
