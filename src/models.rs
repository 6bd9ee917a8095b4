//! Core data models used throughout StudyStack.
//!
//! These types represent the documents, vector records, chats, and cached AI
//! artifacts that flow through the ingestion and answering pipeline.

use serde::{Deserialize, Serialize};

/// Document processing lifecycle.
///
/// The upload flow creates a document as `Uploading`; the ingestion
/// coordinator is the only writer of the remaining states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Uploading => "uploading",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(ProcessingStatus::Uploading),
            "processing" => Some(ProcessingStatus::Processing),
            "completed" => Some(ProcessingStatus::Completed),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }
}

/// Tenant-scoped document record.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub doc_type: String,
    pub title: String,
    pub storage_path: Option<String>,
    pub file_name: Option<String>,
    pub status: ProcessingStatus,
    pub progress: i64,
    pub error: Option<String>,
    pub lock_token: Option<String>,
    pub processing_started_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub chunk_count: i64,
    pub character_count: i64,
    pub truncated: bool,
    /// Capped copy of the extracted text, written at completion.
    pub content_raw: Option<String>,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A single record in the vector index.
///
/// Record ids are deterministic (`"{document_id}_{chunk_index}"`), so the set
/// of ids for a document is re-derivable from its chunk count.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Metadata carried alongside every indexed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub user_id: String,
    pub document_id: String,
    pub chunk_index: i64,
    /// Chunk text, size-capped before indexing.
    pub text: String,
    pub title: String,
    pub file_name: String,
    pub timestamp: i64,
}

/// A ranked match returned from a vector-index query.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Message role within a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// A chat session owning an ordered message sequence.
#[derive(Debug, Clone, Serialize)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One message in a chat.
///
/// An assistant message is created as an empty placeholder with
/// `streaming=true` and mutated in place until generation finishes.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub streaming: bool,
    pub created_at: i64,
}

/// Cached generated artifact, keyed per document per kind.
///
/// Artifacts are immutable snapshots: regeneration overwrites the row.
#[derive(Debug, Clone, Serialize)]
pub struct AiArtifact {
    pub document_id: String,
    pub kind: String,
    pub content: String,
    pub model: String,
    pub version: i64,
    pub created_at: i64,
}
