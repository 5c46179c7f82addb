//! The agent CLI contract: `task_input.json`/`task_output.json` schemas
//! and the streaming stdout line protocol.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::ExecutionResult;

#[derive(Debug, Clone, Serialize)]
pub struct TaskInput {
    pub task: TaskInputTask,
    pub workspace: TaskInputWorkspace,
    pub agent: TaskInputAgent,
    pub comments: Vec<TaskInputComment>,
    pub attachments: Vec<TaskInputAttachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskInputTask {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskInputWorkspace {
    pub id: String,
    pub name: String,
    pub instruction: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInputAgent {
    pub id: String,
    pub name: String,
    pub role_instruction: Option<String>,
    pub working_instruction: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInputComment {
    pub author: String,
    pub author_type: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskInputAttachment {
    pub filename: String,
    pub path: String,
}

/// `task_output.json`, produced by the agent; absence is tolerated, and any
/// `result` value outside {skip, comment, error} is rejected (treated as
/// if the field were absent).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskOutput {
    #[serde(default, deserialize_with = "deserialize_lenient_result")]
    pub result: Option<ExecutionResult>,
    pub content: Option<String>,
}

fn deserialize_lenient_result<'de, D>(deserializer: D) -> std::result::Result<Option<ExecutionResult>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| ExecutionResult::parse(&s).ok()))
}

/// Reads and parses `task_output.json` from the sandbox directory; any
/// missing file or malformed JSON is treated as "no output" rather than an
/// error, per the agent contract's tolerance for its absence.
pub fn read_task_output(path: &Path) -> Option<TaskOutput> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Inspects one line of the agent's stdout stream and extracts the text to
/// append to the execution log, if any. Lines of type `assistant` whose
/// `message.content` contains text blocks have their text concatenated;
/// lines of type `content_block_delta` with a `content` field are appended
/// as-is. Any other shape, or a line that isn't valid JSON, is ignored.
pub fn extract_log_text(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let kind = value.get("type")?.as_str()?;
    match kind {
        "assistant" => {
            let blocks = value.get("message")?.get("content")?.as_array()?;
            let text: String = blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("");
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        "content_block_delta" => value.get("content").and_then(|c| c.as_str()).map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_assistant_message() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello "},{"type":"text","text":"world"}]}}"#;
        assert_eq!(extract_log_text(line), Some("hello world".to_string()));
    }

    #[test]
    fn extracts_text_from_content_block_delta() {
        let line = r#"{"type":"content_block_delta","content":"partial text"}"#;
        assert_eq!(extract_log_text(line), Some("partial text".to_string()));
    }

    #[test]
    fn ignores_unparseable_or_irrelevant_lines() {
        assert_eq!(extract_log_text("not json at all"), None);
        assert_eq!(extract_log_text(r#"{"type":"session_started"}"#), None);
    }

    #[test]
    fn unknown_result_value_is_treated_as_absent() {
        let json = r#"{"result":"reboot","content":"x"}"#;
        let output: TaskOutput = serde_json::from_str(json).unwrap();
        assert!(output.result.is_none());
    }

    #[test]
    fn valid_result_round_trips() {
        let json = r#"{"result":"comment","content":"hi"}"#;
        let output: TaskOutput = serde_json::from_str(json).unwrap();
        assert_eq!(output.result, Some(ExecutionResult::Comment));
        assert_eq!(output.content.as_deref(), Some("hi"));
    }
}
