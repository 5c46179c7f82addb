use sqlx::Row;

use super::Store;
use crate::domain::Workspace;
use crate::error::{Error, Result};

fn row_to_workspace(row: &sqlx::sqlite::SqliteRow) -> Workspace {
    Workspace {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Store {
    pub async fn create_workspace(&self, name: &str) -> Result<Workspace> {
        let now = crate::domain::ids::now_millis();
        let workspace = Workspace {
            id: crate::domain::ids::generate(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        sqlx::query("INSERT INTO workspaces (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&workspace.id)
            .bind(&workspace.name)
            .bind(workspace.created_at)
            .bind(workspace.updated_at)
            .execute(self.pool())
            .await?;
        Ok(workspace)
    }

    pub async fn get_workspace(&self, id: &str) -> Result<Workspace> {
        let row = sqlx::query("SELECT * FROM workspaces WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("workspace {id}")))?;
        Ok(row_to_workspace(&row))
    }

    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let rows = sqlx::query("SELECT * FROM workspaces ORDER BY created_at ASC")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(row_to_workspace).collect())
    }

    pub async fn delete_workspace(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("workspace {id}")));
        }
        Ok(())
    }

    pub async fn set_workspace_setting(&self, workspace_id: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO workspace_settings (workspace_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(workspace_id, key) DO UPDATE SET value = excluded.value",
        )
        .bind(workspace_id)
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_workspace_setting(&self, workspace_id: &str, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM workspace_settings WHERE workspace_id = ?1 AND key = ?2")
            .bind(workspace_id)
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| r.get("value")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_get_workspace_round_trips() {
        let store = Store::open_in_memory().await.unwrap();
        let ws = store.create_workspace("acme").await.unwrap();
        let fetched = store.get_workspace(&ws.id).await.unwrap();
        assert_eq!(fetched.name, "acme");
    }

    #[tokio::test]
    async fn delete_workspace_cascades_to_tasks() {
        let store = Store::open_in_memory().await.unwrap();
        let ws = store.create_workspace("acme").await.unwrap();
        let task = store.create_task(&ws.id, "title", None).await.unwrap();
        store.delete_workspace(&ws.id).await.unwrap();
        assert!(store.get_task(&task.id).await.is_err());
    }

    #[tokio::test]
    async fn get_missing_workspace_is_not_found() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(matches!(
            store.get_workspace("missing").await,
            Err(Error::NotFound(_))
        ));
    }
}
