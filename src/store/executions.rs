use sqlx::Row;

use super::Store;
use crate::domain::{Execution, ExecutionLog, ExecutionResult, ExecutionStatus};
use crate::error::{Error, Result};

fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> Result<Execution> {
    let status: String = row.get("status");
    let result: Option<String> = row.get("result");
    Ok(Execution {
        id: row.get("id"),
        task_id: row.get("task_id"),
        routing_id: row.get("routing_id"),
        agent_id: row.get("agent_id"),
        agent_name: row.get("agent_name"),
        cli_type: row.get("cli_type"),
        status: ExecutionStatus::parse(&status)?,
        result: result.map(|r| ExecutionResult::parse(&r)).transpose()?,
        output: row.get("output"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_log(row: &sqlx::sqlite::SqliteRow) -> ExecutionLog {
    ExecutionLog {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        content: row.get("content"),
        timestamp: row.get("timestamp"),
    }
}

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_execution(
        &self,
        task_id: &str,
        routing_id: &str,
        agent_id: &str,
        agent_name: &str,
        cli_type: &str,
    ) -> Result<Execution> {
        let now = crate::domain::ids::now_millis();
        let execution = Execution::fresh(
            crate::domain::ids::generate(),
            task_id.to_string(),
            routing_id.to_string(),
            agent_id.to_string(),
            agent_name.to_string(),
            cli_type.to_string(),
            now,
        );
        sqlx::query(
            "INSERT INTO executions
                (id, task_id, routing_id, agent_id, agent_name, cli_type, status,
                 result, output, started_at, completed_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, NULL, NULL, ?8, ?8)",
        )
        .bind(&execution.id)
        .bind(&execution.task_id)
        .bind(&execution.routing_id)
        .bind(&execution.agent_id)
        .bind(&execution.agent_name)
        .bind(&execution.cli_type)
        .bind(execution.status.as_str())
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(execution)
    }

    pub async fn get_execution(&self, id: &str) -> Result<Execution> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("execution {id}")))?;
        row_to_execution(&row)
    }

    pub async fn list_executions_for_task(&self, task_id: &str) -> Result<Vec<Execution>> {
        let rows = sqlx::query("SELECT * FROM executions WHERE task_id = ?1 ORDER BY created_at ASC")
            .bind(task_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_execution).collect()
    }

    pub async fn list_executions_for_routing(&self, routing_id: &str) -> Result<Vec<Execution>> {
        let rows =
            sqlx::query("SELECT * FROM executions WHERE routing_id = ?1 ORDER BY created_at ASC")
                .bind(routing_id)
                .fetch_all(self.pool())
                .await?;
        rows.iter().map(row_to_execution).collect()
    }

    /// Executions still `running` when the process last stopped, across all
    /// routings, for orphan reconciliation during recovery.
    pub async fn list_running_executions(&self) -> Result<Vec<Execution>> {
        let rows = sqlx::query("SELECT * FROM executions WHERE status = 'running'")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_execution).collect()
    }

    pub async fn mark_execution_running(&self, id: &str) -> Result<Execution> {
        let now = crate::domain::ids::now_millis();
        sqlx::query(
            "UPDATE executions SET status = 'running', started_at = ?2, updated_at = ?2 WHERE id = ?1",
        )
        .bind(id)
        .bind(now)
        .execute(self.pool())
        .await?;
        self.get_execution(id).await
    }

    pub async fn complete_execution(
        &self,
        id: &str,
        result: ExecutionResult,
        output: Option<String>,
    ) -> Result<Execution> {
        let now = crate::domain::ids::now_millis();
        sqlx::query(
            "UPDATE executions SET
                status = 'completed', result = ?2, output = ?3, completed_at = ?4, updated_at = ?4
             WHERE id = ?1",
        )
        .bind(id)
        .bind(result.as_str())
        .bind(output)
        .bind(now)
        .execute(self.pool())
        .await?;
        self.get_execution(id).await
    }

    pub async fn fail_execution(&self, id: &str, output: Option<String>) -> Result<Execution> {
        let now = crate::domain::ids::now_millis();
        sqlx::query(
            "UPDATE executions SET
                status = 'failed', result = 'error', output = ?2, completed_at = ?3, updated_at = ?3
             WHERE id = ?1",
        )
        .bind(id)
        .bind(output)
        .bind(now)
        .execute(self.pool())
        .await?;
        self.get_execution(id).await
    }

    pub async fn append_execution_log(&self, execution_id: &str, content: &str) -> Result<ExecutionLog> {
        let log = ExecutionLog {
            id: crate::domain::ids::generate(),
            execution_id: execution_id.to_string(),
            content: content.to_string(),
            timestamp: crate::domain::ids::now_millis(),
        };
        sqlx::query(
            "INSERT INTO execution_logs (id, execution_id, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&log.id)
        .bind(&log.execution_id)
        .bind(&log.content)
        .bind(log.timestamp)
        .execute(self.pool())
        .await?;
        Ok(log)
    }

    pub async fn list_execution_logs(&self, execution_id: &str) -> Result<Vec<ExecutionLog>> {
        let rows = sqlx::query(
            "SELECT * FROM execution_logs WHERE execution_id = ?1 ORDER BY timestamp ASC",
        )
        .bind(execution_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(row_to_log).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_routing(store: &Store) -> (String, String, String) {
        let ws = store.create_workspace("ws").await.unwrap();
        let task = store.create_task(&ws.id, "t", None).await.unwrap();
        let agent = store
            .create_agent(&ws.id, "Reviewer", "claude", None, None, None)
            .await
            .unwrap();
        let routing = store.find_or_create_routing(&task.id).await.unwrap();
        (task.id, routing.id, agent.id)
    }

    #[tokio::test]
    async fn execution_lifecycle_completes_with_result() {
        let store = Store::open_in_memory().await.unwrap();
        let (task_id, routing_id, agent_id) = setup_routing(&store).await;
        let execution = store
            .create_execution(&task_id, &routing_id, &agent_id, "Reviewer", "claude")
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);

        store.mark_execution_running(&execution.id).await.unwrap();
        let completed = store
            .complete_execution(&execution.id, ExecutionResult::Skip, Some("nothing to do".into()))
            .await
            .unwrap();
        assert_eq!(completed.status, ExecutionStatus::Completed);
        assert_eq!(completed.result, Some(ExecutionResult::Skip));
        assert!(completed.completed_at.is_some());
    }

    #[tokio::test]
    async fn logs_are_returned_in_timestamp_order() {
        let store = Store::open_in_memory().await.unwrap();
        let (task_id, routing_id, agent_id) = setup_routing(&store).await;
        let execution = store
            .create_execution(&task_id, &routing_id, &agent_id, "Reviewer", "claude")
            .await
            .unwrap();
        store.append_execution_log(&execution.id, "line one").await.unwrap();
        store.append_execution_log(&execution.id, "line two").await.unwrap();

        let logs = store.list_execution_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].content, "line one");
        assert_eq!(logs[1].content, "line two");
    }
}
