use serde::{Deserialize, Serialize};

/// A configured invocation of an external agent CLI, bound to a workspace
/// and a dense ordinal position within it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    /// Identifies which agent CLI binary to invoke (e.g. `"claude"`);
    /// denormalized onto each [`crate::domain::Execution`] it produces.
    pub cli_type: String,
    pub role_instruction: Option<String>,
    pub working_instruction: Option<String>,
    /// Dense position within the workspace, `0..N-1`.
    pub order: i64,
    /// Absence means no per-execution timeout is enforced.
    pub timeout_minutes: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}
