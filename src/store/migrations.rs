//! Numbered migration scripts, applied in order and tracked by name in
//! `_migrations`. Each one runs inside its own transaction.

pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

pub const ALL: &[Migration] = &[
    Migration {
        name: "0001_initial_schema",
        sql: r#"
CREATE TABLE workspaces (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE agents (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    cli_type TEXT NOT NULL,
    role_instruction TEXT,
    working_instruction TEXT,
    agent_order INTEGER NOT NULL,
    timeout_minutes INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX idx_agents_workspace_order ON agents(workspace_id, agent_order);

CREATE TABLE tasks (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX idx_tasks_workspace ON tasks(workspace_id);

CREATE TABLE task_routings (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL UNIQUE REFERENCES tasks(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    current_agent_index INTEGER NOT NULL,
    iteration INTEGER NOT NULL,
    any_agent_worked INTEGER NOT NULL,
    locked_at INTEGER,
    error_message TEXT,
    retry_count INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX idx_task_routings_status ON task_routings(status);

CREATE TABLE executions (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    routing_id TEXT NOT NULL REFERENCES task_routings(id) ON DELETE CASCADE,
    agent_id TEXT NOT NULL,
    agent_name TEXT NOT NULL,
    cli_type TEXT NOT NULL,
    status TEXT NOT NULL,
    result TEXT,
    output TEXT,
    started_at INTEGER,
    completed_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX idx_executions_task ON executions(task_id);
CREATE INDEX idx_executions_status ON executions(status);

CREATE TABLE execution_logs (
    id TEXT PRIMARY KEY,
    execution_id TEXT NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX idx_execution_logs_execution ON execution_logs(execution_id, timestamp);

CREATE TABLE comments (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    author TEXT NOT NULL,
    author_type TEXT NOT NULL,
    content TEXT NOT NULL,
    log TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX idx_comments_task ON comments(task_id, created_at);

CREATE TABLE attachments (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    filename TEXT NOT NULL,
    stored_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX idx_attachments_task ON attachments(task_id);

CREATE TABLE workspace_settings (
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (workspace_id, key)
);
"#,
    },
];
