use sqlx::Row;

use super::Store;
use crate::domain::{RoutingStatus, TaskRouting, LOCK_STALE_AFTER_MS};
use crate::error::{Error, Result};

fn row_to_routing(row: &sqlx::sqlite::SqliteRow) -> Result<TaskRouting> {
    let status: String = row.get("status");
    Ok(TaskRouting {
        id: row.get("id"),
        task_id: row.get("task_id"),
        status: RoutingStatus::parse(&status)?,
        current_agent_index: row.get("current_agent_index"),
        iteration: row.get("iteration"),
        any_agent_worked: row.get::<i64, _>("any_agent_worked") != 0,
        locked_at: row.get("locked_at"),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl Store {
    pub async fn get_routing(&self, id: &str) -> Result<TaskRouting> {
        let row = sqlx::query("SELECT * FROM task_routings WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("routing {id}")))?;
        row_to_routing(&row)
    }

    pub async fn get_routing_by_task(&self, task_id: &str) -> Result<Option<TaskRouting>> {
        let row = sqlx::query("SELECT * FROM task_routings WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_routing).transpose()
    }

    /// Idempotent per task: returns the existing record if one is
    /// already present, otherwise creates a fresh one.
    pub async fn find_or_create_routing(&self, task_id: &str) -> Result<TaskRouting> {
        if let Some(existing) = self.get_routing_by_task(task_id).await? {
            return Ok(existing);
        }
        let now = crate::domain::ids::now_millis();
        let routing = TaskRouting::fresh(crate::domain::ids::generate(), task_id.to_string(), now);
        let inserted = sqlx::query(
            "INSERT INTO task_routings
                (id, task_id, status, current_agent_index, iteration, any_agent_worked,
                 locked_at, error_message, retry_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, 0, 0, NULL, NULL, 0, ?4, ?4)
             ON CONFLICT(task_id) DO NOTHING",
        )
        .bind(&routing.id)
        .bind(&routing.task_id)
        .bind(routing.status.as_str())
        .bind(now)
        .execute(self.pool())
        .await?;

        if inserted.rows_affected() == 0 {
            // Lost a create race to another caller; load what's there now.
            return self
                .get_routing_by_task(task_id)
                .await?
                .ok_or_else(|| Error::Internal("routing vanished after insert race".into()));
        }
        Ok(routing)
    }

    /// Resets a routing record in place to its fresh state, as `trigger`
    /// does for a routing that's already in a terminal status.
    pub async fn reset_routing(&self, id: &str) -> Result<TaskRouting> {
        let now = crate::domain::ids::now_millis();
        sqlx::query(
            "UPDATE task_routings SET
                status = 'pending', current_agent_index = 0, iteration = 0,
                any_agent_worked = 0, retry_count = 0, error_message = NULL,
                updated_at = ?2
             WHERE id = ?1",
        )
        .bind(id)
        .bind(now)
        .execute(self.pool())
        .await?;
        self.get_routing(id).await
    }

    /// Attempts to take the cooperative lock: succeeds if it is unheld or
    /// stale (older than [`LOCK_STALE_AFTER_MS`]).
    pub async fn try_acquire_lock(&self, id: &str) -> Result<bool> {
        let now = crate::domain::ids::now_millis();
        let stale_before = now - LOCK_STALE_AFTER_MS;
        let result = sqlx::query(
            "UPDATE task_routings SET locked_at = ?2
             WHERE id = ?1 AND (locked_at IS NULL OR locked_at < ?3)",
        )
        .bind(id)
        .bind(now)
        .bind(stale_before)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn release_lock(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE task_routings SET locked_at = NULL WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_routing_status(&self, id: &str, status: RoutingStatus) -> Result<()> {
        let now = crate::domain::ids::now_millis();
        sqlx::query("UPDATE task_routings SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn advance_to_next_agent(&self, id: &str) -> Result<()> {
        let now = crate::domain::ids::now_millis();
        sqlx::query(
            "UPDATE task_routings SET
                current_agent_index = current_agent_index + 1, retry_count = 0, updated_at = ?2
             WHERE id = ?1",
        )
        .bind(id)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn start_new_iteration(&self, id: &str) -> Result<()> {
        let now = crate::domain::ids::now_millis();
        sqlx::query(
            "UPDATE task_routings SET
                current_agent_index = 0, iteration = iteration + 1,
                any_agent_worked = 0, retry_count = 0, updated_at = ?2
             WHERE id = ?1",
        )
        .bind(id)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn mark_agent_worked(&self, id: &str) -> Result<()> {
        let now = crate::domain::ids::now_millis();
        sqlx::query("UPDATE task_routings SET any_agent_worked = 1, updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(now)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn increment_retry_count(&self, id: &str) -> Result<i64> {
        let now = crate::domain::ids::now_millis();
        sqlx::query("UPDATE task_routings SET retry_count = retry_count + 1, updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(now)
            .execute(self.pool())
            .await?;
        let routing = self.get_routing(id).await?;
        Ok(routing.retry_count)
    }

    pub async fn complete_routing(&self, id: &str) -> Result<()> {
        self.set_routing_status(id, RoutingStatus::Completed).await
    }

    pub async fn fail_routing(&self, id: &str, error_message: &str) -> Result<()> {
        let now = crate::domain::ids::now_millis();
        sqlx::query(
            "UPDATE task_routings SET status = 'failed', error_message = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(error_message)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Routings in a non-terminal status, oldest first, for the startup
    /// recovery sweep.
    pub async fn list_pending_or_running_routings(&self) -> Result<Vec<TaskRouting>> {
        let rows = sqlx::query(
            "SELECT * FROM task_routings WHERE status IN ('pending', 'running') ORDER BY created_at ASC",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_routing).collect()
    }

    /// All routings, oldest first, optionally narrowed to one status.
    pub async fn list_routings(&self, status: Option<RoutingStatus>) -> Result<Vec<TaskRouting>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM task_routings WHERE status = ?1 ORDER BY created_at ASC")
                    .bind(status.as_str())
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM task_routings ORDER BY created_at ASC")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(row_to_routing).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_task(store: &Store) -> String {
        let ws = store.create_workspace("ws").await.unwrap();
        store.create_task(&ws.id, "t", None).await.unwrap().id
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let task_id = setup_task(&store).await;
        let r1 = store.find_or_create_routing(&task_id).await.unwrap();
        let r2 = store.find_or_create_routing(&task_id).await.unwrap();
        assert_eq!(r1.id, r2.id);
    }

    #[tokio::test]
    async fn lock_acquire_fails_while_fresh_then_succeeds_when_stale() {
        let store = Store::open_in_memory().await.unwrap();
        let task_id = setup_task(&store).await;
        let routing = store.find_or_create_routing(&task_id).await.unwrap();
        assert!(store.try_acquire_lock(&routing.id).await.unwrap());
        assert!(!store.try_acquire_lock(&routing.id).await.unwrap());

        // Force the lock to look stale and confirm it can be re-acquired.
        sqlx::query("UPDATE task_routings SET locked_at = 0 WHERE id = ?1")
            .bind(&routing.id)
            .execute(store.pool())
            .await
            .unwrap();
        assert!(store.try_acquire_lock(&routing.id).await.unwrap());
    }

    #[tokio::test]
    async fn reset_routing_clears_round_state() {
        let store = Store::open_in_memory().await.unwrap();
        let task_id = setup_task(&store).await;
        let routing = store.find_or_create_routing(&task_id).await.unwrap();
        store.mark_agent_worked(&routing.id).await.unwrap();
        store.advance_to_next_agent(&routing.id).await.unwrap();
        store.fail_routing(&routing.id, "boom").await.unwrap();

        let reset = store.reset_routing(&routing.id).await.unwrap();
        assert_eq!(reset.status, RoutingStatus::Pending);
        assert_eq!(reset.current_agent_index, 0);
        assert!(!reset.any_agent_worked);
        assert!(reset.error_message.is_none());
    }
}
