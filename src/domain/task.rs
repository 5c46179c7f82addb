use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Done,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::Done => "done",
        };
        write!(f, "{s}")
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "in_review" => Ok(TaskStatus::InReview),
            "done" => Ok(TaskStatus::Done),
            other => Err(Error::Internal(format!("unknown task status: {other}"))),
        }
    }

    /// Whether moving from `self` to `next` is an allowed transition per
    /// the status transition table.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (a, b) if *a == b => false,
            (Todo, InProgress) | (Todo, Done) => true,
            (InProgress, Todo) | (InProgress, InReview) | (InProgress, Done) => true,
            (InReview, Todo) | (InReview, InProgress) | (InReview, Done) => true,
            (Done, Todo) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    Human,
    Agent,
    System,
}

impl AuthorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorType::Human => "human",
            AuthorType::Agent => "agent",
            AuthorType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "human" => Ok(AuthorType::Human),
            "agent" => Ok(AuthorType::Agent),
            "system" => Ok(AuthorType::System),
            other => Err(Error::Internal(format!("unknown author type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    pub task_id: String,
    pub author: String,
    pub author_type: AuthorType,
    pub content: String,
    pub log: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub task_id: String,
    pub filename: String,
    pub stored_name: String,
    pub mime_type: String,
    pub size: i64,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_spec() {
        assert!(TaskStatus::Todo.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::Todo.can_transition_to(TaskStatus::Done));
        assert!(!TaskStatus::Todo.can_transition_to(TaskStatus::InReview));
        assert!(!TaskStatus::Todo.can_transition_to(TaskStatus::Todo));

        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Todo));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::InReview));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Done));

        assert!(TaskStatus::InReview.can_transition_to(TaskStatus::Todo));
        assert!(TaskStatus::InReview.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InReview.can_transition_to(TaskStatus::Done));

        assert!(TaskStatus::Done.can_transition_to(TaskStatus::Todo));
        assert!(!TaskStatus::Done.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Done.can_transition_to(TaskStatus::InReview));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::InReview,
            TaskStatus::Done,
        ] {
            assert_eq!(TaskStatus::parse(s.as_str()).unwrap(), s);
        }
    }
}
