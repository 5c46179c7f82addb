use sqlx::Row;

use super::Store;
use crate::domain::Agent;
use crate::error::{Error, Result};

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Agent {
    Agent {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        cli_type: row.get("cli_type"),
        role_instruction: row.get("role_instruction"),
        working_instruction: row.get("working_instruction"),
        order: row.get("agent_order"),
        timeout_minutes: row.get("timeout_minutes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Store {
    /// Appends a new agent at the end of the workspace's dense ordering.
    pub async fn create_agent(
        &self,
        workspace_id: &str,
        name: &str,
        cli_type: &str,
        role_instruction: Option<String>,
        working_instruction: Option<String>,
        timeout_minutes: Option<i64>,
    ) -> Result<Agent> {
        let now = crate::domain::ids::now_millis();
        let next_order: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(agent_order) + 1, 0) FROM agents WHERE workspace_id = ?1",
        )
        .bind(workspace_id)
        .fetch_one(self.pool())
        .await?;

        let agent = Agent {
            id: crate::domain::ids::generate(),
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            cli_type: cli_type.to_string(),
            role_instruction,
            working_instruction,
            order: next_order,
            timeout_minutes,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO agents
                (id, workspace_id, name, cli_type, role_instruction, working_instruction,
                 agent_order, timeout_minutes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&agent.id)
        .bind(&agent.workspace_id)
        .bind(&agent.name)
        .bind(&agent.cli_type)
        .bind(&agent.role_instruction)
        .bind(&agent.working_instruction)
        .bind(agent.order)
        .bind(agent.timeout_minutes)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(self.pool())
        .await?;
        Ok(agent)
    }

    pub async fn get_agent(&self, id: &str) -> Result<Agent> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("agent {id}")))?;
        Ok(row_to_agent(&row))
    }

    /// Agents of a workspace in their dense, ascending order.
    pub async fn list_agents_ordered(&self, workspace_id: &str) -> Result<Vec<Agent>> {
        let rows = sqlx::query(
            "SELECT * FROM agents WHERE workspace_id = ?1 ORDER BY agent_order ASC",
        )
        .bind(workspace_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(row_to_agent).collect())
    }

    /// Deletes the agent and renumbers the remaining ones so the ordering
    /// stays dense `0..N-1`.
    pub async fn delete_agent(&self, id: &str) -> Result<()> {
        let agent = self.get_agent(id).await?;
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM agents WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE agents SET agent_order = agent_order - 1
             WHERE workspace_id = ?1 AND agent_order > ?2",
        )
        .bind(&agent.workspace_id)
        .bind(agent.order)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
