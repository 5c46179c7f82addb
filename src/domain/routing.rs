use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub const MAX_RETRIES: i64 = 3;
/// A routing lock is considered stale after this many milliseconds.
pub const LOCK_STALE_AFTER_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RoutingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStatus::Pending => "pending",
            RoutingStatus::Running => "running",
            RoutingStatus::Completed => "completed",
            RoutingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RoutingStatus::Pending),
            "running" => Ok(RoutingStatus::Running),
            "completed" => Ok(RoutingStatus::Completed),
            "failed" => Ok(RoutingStatus::Failed),
            other => Err(Error::Internal(format!("unknown routing status: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoutingStatus::Completed | RoutingStatus::Failed)
    }
}

/// The durable routing-engine record: exactly one per task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRouting {
    pub id: String,
    pub task_id: String,
    pub status: RoutingStatus,
    pub current_agent_index: i64,
    pub iteration: i64,
    pub any_agent_worked: bool,
    pub locked_at: Option<i64>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TaskRouting {
    /// A fresh record state as produced by creating or resetting a routing.
    pub fn fresh(id: String, task_id: String, now: i64) -> Self {
        Self {
            id,
            task_id,
            status: RoutingStatus::Pending,
            current_agent_index: 0,
            iteration: 0,
            any_agent_worked: false,
            locked_at: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn lock_is_stale(&self, now: i64) -> bool {
        match self.locked_at {
            None => true,
            Some(locked_at) => now - locked_at > LOCK_STALE_AFTER_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lock_is_not_stale() {
        let r = TaskRouting::fresh("r1".into(), "t1".into(), 1_000);
        assert!(r.lock_is_stale(1_000)); // never locked => stale (acquirable)
    }

    #[test]
    fn lock_is_stale_after_five_minutes() {
        let mut r = TaskRouting::fresh("r1".into(), "t1".into(), 0);
        r.locked_at = Some(0);
        assert!(!r.lock_is_stale(LOCK_STALE_AFTER_MS - 1));
        assert!(r.lock_is_stale(LOCK_STALE_AFTER_MS + 1));
    }
}
