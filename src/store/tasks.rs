use sqlx::Row;

use super::Store;
use crate::domain::{Task, TaskStatus};
use crate::error::{Error, Result};

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
    let status: String = row.get("status");
    Ok(Task {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: TaskStatus::parse(&status)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl Store {
    pub async fn create_task(
        &self,
        workspace_id: &str,
        title: &str,
        description: Option<String>,
    ) -> Result<Task> {
        let now = crate::domain::ids::now_millis();
        let task = Task {
            id: crate::domain::ids::generate(),
            workspace_id: workspace_id.to_string(),
            title: title.to_string(),
            description,
            status: TaskStatus::Todo,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO tasks (id, workspace_id, title, description, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&task.id)
        .bind(&task.workspace_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(self.pool())
        .await?;
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        row_to_task(&row)
    }

    pub async fn list_tasks(&self, workspace_id: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE workspace_id = ?1 ORDER BY created_at ASC")
            .bind(workspace_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_task).collect()
    }

    /// Enforces the task-status transition table; a no-op transition
    /// (`next == current`) or a disallowed one is a [`Error::Conflict`].
    pub async fn transition_task_status(&self, id: &str, next: TaskStatus) -> Result<Task> {
        let task = self.get_task(id).await?;
        if !task.status.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "cannot transition task {id} from {} to {}",
                task.status, next
            )));
        }
        let now = crate::domain::ids::now_millis();
        sqlx::query("UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(next.as_str())
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await?;
        self.get_task(id).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("task {id}")));
        }
        Ok(())
    }
}
