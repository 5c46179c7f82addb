use serde::{Deserialize, Serialize};

/// A workspace owns agents, tasks, templates, and settings. Deleting a
/// workspace cascades to all of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A keyed, JSON-encoded value scoped to one workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceSetting {
    pub workspace_id: String,
    pub key: String,
    pub value: String,
}
