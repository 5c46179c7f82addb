use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(Error::Internal(format!("unknown execution status: {other}"))),
        }
    }
}

/// The classification an agent's terminal output is mapped to, driving
/// what the routing engine does next.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    Skip,
    Comment,
    Error,
}

impl ExecutionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionResult::Skip => "skip",
            ExecutionResult::Comment => "comment",
            ExecutionResult::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "skip" => Ok(ExecutionResult::Skip),
            "comment" => Ok(ExecutionResult::Comment),
            "error" => Ok(ExecutionResult::Error),
            other => Err(Error::Internal(format!("unknown execution result: {other}"))),
        }
    }
}

/// One run of one agent against one task, within a routing's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Execution {
    pub id: String,
    pub task_id: String,
    pub routing_id: String,
    pub agent_id: String,
    /// Denormalized at creation time so execution history survives agent
    /// renames or deletion.
    pub agent_name: String,
    pub cli_type: String,
    pub status: ExecutionStatus,
    pub result: Option<ExecutionResult>,
    pub output: Option<String>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Execution {
    #[allow(clippy::too_many_arguments)]
    pub fn fresh(
        id: String,
        task_id: String,
        routing_id: String,
        agent_id: String,
        agent_name: String,
        cli_type: String,
        now: i64,
    ) -> Self {
        Self {
            id,
            task_id,
            routing_id,
            agent_id,
            agent_name,
            cli_type,
            status: ExecutionStatus::Pending,
            result: None,
            output: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One streamed line of an execution's agent output, persisted for replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionLog {
    pub id: String,
    pub execution_id: String,
    pub content: String,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
        ] {
            assert_eq!(ExecutionStatus::parse(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn result_round_trips_through_strings() {
        for r in [
            ExecutionResult::Skip,
            ExecutionResult::Comment,
            ExecutionResult::Error,
        ] {
            assert_eq!(ExecutionResult::parse(r.as_str()).unwrap(), r);
        }
    }

    #[test]
    fn fresh_execution_starts_pending_with_no_result() {
        let e = Execution::fresh(
            "e1".into(),
            "t1".into(),
            "r1".into(),
            "a1".into(),
            "Reviewer".into(),
            "claude".into(),
            10,
        );
        assert_eq!(e.status, ExecutionStatus::Pending);
        assert!(e.result.is_none());
        assert!(e.started_at.is_none());
        assert!(e.completed_at.is_none());
    }
}
