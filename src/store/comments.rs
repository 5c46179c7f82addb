use sqlx::Row;

use super::Store;
use crate::domain::{AuthorType, Comment};
use crate::error::{Error, Result};

fn row_to_comment(row: &sqlx::sqlite::SqliteRow) -> Result<Comment> {
    let author_type: String = row.get("author_type");
    Ok(Comment {
        id: row.get("id"),
        task_id: row.get("task_id"),
        author: row.get("author"),
        author_type: AuthorType::parse(&author_type)?,
        content: row.get("content"),
        log: row.get("log"),
        created_at: row.get("created_at"),
    })
}

impl Store {
    pub async fn create_comment(
        &self,
        task_id: &str,
        author: &str,
        author_type: AuthorType,
        content: &str,
        log: Option<String>,
    ) -> Result<Comment> {
        let comment = Comment {
            id: crate::domain::ids::generate(),
            task_id: task_id.to_string(),
            author: author.to_string(),
            author_type,
            content: content.to_string(),
            log,
            created_at: crate::domain::ids::now_millis(),
        };
        sqlx::query(
            "INSERT INTO comments (id, task_id, author, author_type, content, log, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&comment.id)
        .bind(&comment.task_id)
        .bind(&comment.author)
        .bind(comment.author_type.as_str())
        .bind(&comment.content)
        .bind(&comment.log)
        .bind(comment.created_at)
        .execute(self.pool())
        .await?;
        Ok(comment)
    }

    pub async fn get_comment(&self, id: &str) -> Result<Comment> {
        let row = sqlx::query("SELECT * FROM comments WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("comment {id}")))?;
        row_to_comment(&row)
    }

    pub async fn list_comments_for_task(&self, task_id: &str) -> Result<Vec<Comment>> {
        let rows = sqlx::query("SELECT * FROM comments WHERE task_id = ?1 ORDER BY created_at ASC")
            .bind(task_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_comment).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn comments_list_chronologically() {
        let store = Store::open_in_memory().await.unwrap();
        let ws = store.create_workspace("ws").await.unwrap();
        let task = store.create_task(&ws.id, "t", None).await.unwrap();

        store
            .create_comment(&task.id, "alice", AuthorType::Human, "first", None)
            .await
            .unwrap();
        store
            .create_comment(&task.id, "Reviewer", AuthorType::Agent, "second", Some("log".into()))
            .await
            .unwrap();

        let comments = store.list_comments_for_task(&task.id).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].content, "first");
        assert_eq!(comments[1].author_type, AuthorType::Agent);
        assert_eq!(comments[1].log.as_deref(), Some("log"));
    }
}
