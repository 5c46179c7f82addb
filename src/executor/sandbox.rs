use std::path::{Path, PathBuf};

use tracing::warn;

use super::wire::{TaskInput, TaskInputAgent, TaskInputAttachment, TaskInputComment, TaskInputTask, TaskInputWorkspace};
use super::ExecutionContext;
use crate::config::Config;
use crate::error::Result;
use crate::store::Store;

/// The per-execution sandbox directory: `<tmp_dir>/executions/<execution_id>`.
pub struct Sandbox {
    dir: PathBuf,
}

impl Sandbox {
    pub async fn prepare(
        tmp_dir: &Path,
        store: &Store,
        config: &Config,
        ctx: &ExecutionContext,
    ) -> Result<Self> {
        let dir = tmp_dir.join("executions").join(&ctx.execution_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;

        let comments = store
            .list_comments_for_task(&ctx.task.id)
            .await?
            .into_iter()
            .map(|c| TaskInputComment {
                author: c.author,
                author_type: c.author_type.as_str().to_string(),
                content: c.content,
                created_at: c.created_at,
            })
            .collect();

        let attachments_dir = config.attachments_dir();
        let mut attachments = Vec::new();
        for attachment in store.list_attachments_for_task(&ctx.task.id).await? {
            let source = Store::attachment_path(&attachments_dir, &attachment);
            let dest = dir.join(&attachment.filename);
            match std::fs::copy(&source, &dest) {
                Ok(_) => attachments.push(TaskInputAttachment {
                    filename: attachment.filename,
                    path: dest.display().to_string(),
                }),
                Err(e) => {
                    warn!(attachment_id = %attachment.id, error = %e, "failed to copy attachment into sandbox");
                }
            }
        }

        let task_input = TaskInput {
            task: TaskInputTask {
                id: ctx.task.id.clone(),
                title: ctx.task.title.clone(),
                description: ctx.task.description.clone(),
                status: ctx.task.status.as_str().to_string(),
            },
            workspace: TaskInputWorkspace {
                id: ctx.workspace.id.clone(),
                name: ctx.workspace.name.clone(),
                instruction: ctx.workspace_instruction.clone(),
            },
            agent: TaskInputAgent {
                id: ctx.agent.id.clone(),
                name: ctx.agent.name.clone(),
                role_instruction: ctx.agent.role_instruction.clone(),
                working_instruction: ctx.agent.working_instruction.clone(),
            },
            comments,
            attachments,
        };

        let input_path = dir.join("task_input.json");
        std::fs::write(&input_path, serde_json::to_vec_pretty(&task_input)?)?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn task_input_path(&self) -> PathBuf {
        self.dir.join("task_input.json")
    }

    pub fn task_output_path(&self) -> PathBuf {
        self.dir.join("task_output.json")
    }

    /// Best-effort removal; a failure here does not fail the execution.
    pub fn cleanup(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "failed to remove execution sandbox directory");
            }
        }
    }
}
