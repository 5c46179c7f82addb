use std::path::{Path, PathBuf};

use sqlx::Row;

use super::Store;
use crate::domain::Attachment;
use crate::error::{Error, Result};

fn row_to_attachment(row: &sqlx::sqlite::SqliteRow) -> Attachment {
    Attachment {
        id: row.get("id"),
        task_id: row.get("task_id"),
        filename: row.get("filename"),
        stored_name: row.get("stored_name"),
        mime_type: row.get("mime_type"),
        size: row.get("size"),
        created_at: row.get("created_at"),
    }
}

impl Store {
    /// Copies `source` into `attachments_dir` under a fresh `stored_name`
    /// and records the attachment row.
    pub async fn create_attachment(
        &self,
        attachments_dir: &Path,
        task_id: &str,
        source: &Path,
        filename: &str,
        mime_type: &str,
    ) -> Result<Attachment> {
        std::fs::create_dir_all(attachments_dir)?;
        let stored_name = crate::domain::ids::generate();
        let dest = attachments_dir.join(&stored_name);
        std::fs::copy(source, &dest)?;
        let size = std::fs::metadata(&dest)?.len() as i64;

        let attachment = Attachment {
            id: crate::domain::ids::generate(),
            task_id: task_id.to_string(),
            filename: filename.to_string(),
            stored_name,
            mime_type: mime_type.to_string(),
            size,
            created_at: crate::domain::ids::now_millis(),
        };
        sqlx::query(
            "INSERT INTO attachments (id, task_id, filename, stored_name, mime_type, size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&attachment.id)
        .bind(&attachment.task_id)
        .bind(&attachment.filename)
        .bind(&attachment.stored_name)
        .bind(&attachment.mime_type)
        .bind(attachment.size)
        .bind(attachment.created_at)
        .execute(self.pool())
        .await?;
        Ok(attachment)
    }

    pub async fn get_attachment(&self, id: &str) -> Result<Attachment> {
        let row = sqlx::query("SELECT * FROM attachments WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("attachment {id}")))?;
        Ok(row_to_attachment(&row))
    }

    pub async fn list_attachments_for_task(&self, task_id: &str) -> Result<Vec<Attachment>> {
        let rows = sqlx::query("SELECT * FROM attachments WHERE task_id = ?1 ORDER BY created_at ASC")
            .bind(task_id)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(row_to_attachment).collect())
    }

    pub fn attachment_path(attachments_dir: &Path, attachment: &Attachment) -> PathBuf {
        attachments_dir.join(&attachment.stored_name)
    }

    pub async fn delete_attachment(&self, attachments_dir: &Path, id: &str) -> Result<()> {
        let attachment = self.get_attachment(id).await?;
        let result = sqlx::query("DELETE FROM attachments WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("attachment {id}")));
        }
        let path = Self::attachment_path(attachments_dir, &attachment);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn create_copies_file_and_records_size() {
        let store = Store::open_in_memory().await.unwrap();
        let ws = store.create_workspace("ws").await.unwrap();
        let task = store.create_task(&ws.id, "t", None).await.unwrap();

        let src_dir = TempDir::new().unwrap();
        let src_path = src_dir.path().join("notes.txt");
        std::fs::write(&src_path, b"hello world").unwrap();

        let attachments_dir = TempDir::new().unwrap();
        let attachment = store
            .create_attachment(
                attachments_dir.path(),
                &task.id,
                &src_path,
                "notes.txt",
                "text/plain",
            )
            .await
            .unwrap();

        assert_eq!(attachment.filename, "notes.txt");
        assert_eq!(attachment.size, 11);
        let stored = Store::attachment_path(attachments_dir.path(), &attachment);
        assert_eq!(std::fs::read(stored).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn delete_removes_row_and_file() {
        let store = Store::open_in_memory().await.unwrap();
        let ws = store.create_workspace("ws").await.unwrap();
        let task = store.create_task(&ws.id, "t", None).await.unwrap();

        let src_dir = TempDir::new().unwrap();
        let src_path = src_dir.path().join("a.bin");
        std::fs::write(&src_path, b"x").unwrap();

        let attachments_dir = TempDir::new().unwrap();
        let attachment = store
            .create_attachment(attachments_dir.path(), &task.id, &src_path, "a.bin", "application/octet-stream")
            .await
            .unwrap();
        let stored = Store::attachment_path(attachments_dir.path(), &attachment);
        assert!(stored.exists());

        store.delete_attachment(attachments_dir.path(), &attachment.id).await.unwrap();
        assert!(!stored.exists());
        assert!(store.get_attachment(&attachment.id).await.is_err());
    }
}
