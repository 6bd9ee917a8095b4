//! Persistent document, chat, and artifact store.
//!
//! Wraps the SQLite pool with the operations the pipeline needs. The one
//! piece of cross-task coordination in the system lives here: the processing
//! lock is a single atomic compare-and-swap against the document row, so when
//! two ingestion runs race on the same document exactly one proceeds.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{AiArtifact, Chat, ChatMessage, Document, ProcessingStatus, Role};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    Acquired { lock_token: String },
    NotAcquired,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Users ============

    /// Look up a user id by email, creating the user if absent.
    pub async fn ensure_user(&self, email: &str) -> Result<String> {
        if let Some(id) = self.resolve_user_by_email(email).await? {
            return Ok(id);
        }
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(email)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn resolve_user_by_email(&self, email: &str) -> Result<Option<String>> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    // ============ Documents ============

    pub async fn create_document(
        &self,
        user_id: &str,
        title: &str,
        doc_type: &str,
        storage_path: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<Document> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO documents
                (id, user_id, doc_type, title, storage_path, file_name, status, tags_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'uploading', '["uploaded"]', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(doc_type)
        .bind(title)
        .bind(storage_path)
        .bind(file_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_document(user_id, &id)
            .await?
            .context("document vanished after insert")
    }

    pub async fn get_document(&self, user_id: &str, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ? AND user_id = ?")
            .bind(document_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| document_from_row(&r)))
    }

    pub async fn set_storage_path(
        &self,
        user_id: &str,
        document_id: &str,
        storage_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET storage_path = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(storage_path)
        .bind(chrono::Utc::now().timestamp())
        .bind(document_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomic read-modify-write lock acquisition.
    ///
    /// A single UPDATE whose WHERE clause re-checks the status makes this a
    /// compare-and-swap: only the statement that actually flips the row wins.
    /// Documents already `processing` or `completed` are left untouched.
    pub async fn try_acquire_processing_lock(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<LockAcquisition> {
        let lock_token = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'processing',
                lock_token = ?,
                processing_started_at = ?,
                progress = 0,
                error = NULL,
                updated_at = ?
            WHERE id = ? AND user_id = ? AND status NOT IN ('processing', 'completed')
            "#,
        )
        .bind(&lock_token)
        .bind(now)
        .bind(now)
        .bind(document_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(LockAcquisition::Acquired { lock_token })
        } else {
            Ok(LockAcquisition::NotAcquired)
        }
    }

    pub async fn set_progress(&self, user_id: &str, document_id: &str, progress: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET progress = ?, updated_at = ? WHERE id = ? AND user_id = ?")
            .bind(progress)
            .bind(chrono::Utc::now().timestamp())
            .bind(document_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Terminal success: stats persisted, lock cleared, progress pinned at 100.
    pub async fn mark_completed(
        &self,
        user_id: &str,
        document_id: &str,
        chunk_count: i64,
        character_count: i64,
        truncated: bool,
        content_raw: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'completed',
                progress = 100,
                chunk_count = ?,
                character_count = ?,
                truncated = ?,
                content_raw = ?,
                lock_token = NULL,
                error = NULL,
                updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(chunk_count)
        .bind(character_count)
        .bind(truncated as i64)
        .bind(content_raw)
        .bind(chrono::Utc::now().timestamp())
        .bind(document_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal failure: error message recorded, lock cleared.
    pub async fn mark_failed(&self, user_id: &str, document_id: &str, error: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'failed',
                error = ?,
                failed_at = ?,
                lock_token = NULL,
                updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(document_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_tags(&self, user_id: &str, document_id: &str, tags: &[String]) -> Result<()> {
        sqlx::query("UPDATE documents SET tags_json = ?, updated_at = ? WHERE id = ? AND user_id = ?")
            .bind(serde_json::to_string(tags)?)
            .bind(chrono::Utc::now().timestamp())
            .bind(document_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Chats ============

    pub async fn create_chat(&self, user_id: &str, title: Option<&str>) -> Result<Chat> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO chats (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Chat {
            id,
            user_id: user_id.to_string(),
            title: title.map(|t| t.to_string()),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_chat(&self, user_id: &str, chat_id: &str) -> Result<Option<Chat>> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Chat {
            id: r.get("id"),
            user_id: r.get("user_id"),
            title: r.get("title"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    pub async fn touch_chat(&self, chat_id: &str) -> Result<()> {
        sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_chat_title_if_empty(&self, chat_id: &str, title: &str) -> Result<()> {
        sqlx::query("UPDATE chats SET title = ? WHERE id = ? AND (title IS NULL OR title = '')")
            .bind(title)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn last_message(&self, chat_id: &str) -> Result<Option<ChatMessage>> {
        let row = sqlx::query(
            "SELECT * FROM messages WHERE chat_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| message_from_row(&r)))
    }

    pub async fn list_messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE chat_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    pub async fn append_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str,
        streaming: bool,
    ) -> Result<ChatMessage> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO messages (id, chat_id, role, content, streaming, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(chat_id)
        .bind(role.as_str())
        .bind(content)
        .bind(streaming as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(ChatMessage {
            id,
            chat_id: chat_id.to_string(),
            role,
            content: content.to_string(),
            streaming,
            created_at: now,
        })
    }

    /// Mutate a message in place. The assistant placeholder is updated through
    /// here until the final flush sets `streaming = false`.
    pub async fn update_message(
        &self,
        message_id: &str,
        content: &str,
        streaming: bool,
    ) -> Result<()> {
        sqlx::query("UPDATE messages SET content = ?, streaming = ? WHERE id = ?")
            .bind(content)
            .bind(streaming as i64)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ AI artifacts ============

    pub async fn get_artifact(&self, document_id: &str, kind: &str) -> Result<Option<AiArtifact>> {
        let row = sqlx::query("SELECT * FROM ai_artifacts WHERE document_id = ? AND kind = ?")
            .bind(document_id)
            .bind(kind)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| AiArtifact {
            document_id: r.get("document_id"),
            kind: r.get("kind"),
            content: r.get("content"),
            model: r.get("model"),
            version: r.get("version"),
            created_at: r.get("created_at"),
        }))
    }

    /// Overwrite-on-regenerate: artifacts are snapshots, never appended to.
    pub async fn put_artifact(
        &self,
        document_id: &str,
        kind: &str,
        content: &str,
        model: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_artifacts (document_id, kind, content, model, version, created_at)
            VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT(document_id, kind) DO UPDATE SET
                content = excluded.content,
                model = excluded.model,
                version = ai_artifacts.version + 1,
                created_at = excluded.created_at
            "#,
        )
        .bind(document_id)
        .bind(kind)
        .bind(content)
        .bind(model)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Document {
    let status: String = row.get("status");
    let tags_json: String = row.get("tags_json");
    let truncated: i64 = row.get("truncated");

    Document {
        id: row.get("id"),
        user_id: row.get("user_id"),
        doc_type: row.get("doc_type"),
        title: row.get("title"),
        storage_path: row.get("storage_path"),
        file_name: row.get("file_name"),
        status: ProcessingStatus::parse(&status).unwrap_or(ProcessingStatus::Failed),
        progress: row.get("progress"),
        error: row.get("error"),
        lock_token: row.get("lock_token"),
        processing_started_at: row.get("processing_started_at"),
        failed_at: row.get("failed_at"),
        chunk_count: row.get("chunk_count"),
        character_count: row.get("character_count"),
        truncated: truncated != 0,
        content_raw: row.get("content_raw"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> ChatMessage {
    let role: String = row.get("role");
    let streaming: i64 = row.get("streaming");
    ChatMessage {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        role: Role::parse(&role).unwrap_or(Role::System),
        content: row.get("content"),
        streaming: streaming != 0,
        created_at: row.get("created_at"),
    }
}
