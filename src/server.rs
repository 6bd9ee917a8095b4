//! JSON HTTP API.
//!
//! Every response uses the same envelope:
//!
//! ```json
//! { "success": true, "data": { ... } }
//! { "success": false, "error": "chat abc not found" }
//! ```
//!
//! Handlers return domain errors as `anyhow::Error`; the boundary maps them
//! to a status code by message shape and no error ever escapes as a bare
//! 500 with an empty body.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/users/resolve` | Resolve a user id from an email |
//! | `POST` | `/chats` | Create a chat |
//! | `POST` | `/chats/{id}/messages` | Send a message, get the answer |
//! | `POST` | `/query` | Raw retrieval over selected documents |
//! | `POST` | `/documents` | Register a document |
//! | `GET`  | `/documents/{id}` | Document status for progress polling |
//! | `POST` | `/documents/{id}/ingest` | Trigger ingestion |
//! | `POST` | `/documents/{id}/summary` | Summarize |
//! | `POST` | `/documents/{id}/classify` | Assign topic tags |
//! | `POST` | `/documents/{id}/flashcards` | Generate flashcards |
//! | `POST` | `/documents/{id}/quiz` | Generate a quiz |
//! | `POST` | `/documents/{id}/podcast` | Generate podcast audio |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::answer::{AnswerOutcome, ChatEngine, SendOptions};
use crate::artifacts::{ArtifactGenerator, Flashcard, QuizDifficulty, QuizQuestion};
use crate::config::Config;
use crate::ingest::IngestCoordinator;
use crate::llm::Route;
use crate::models::{Chat, ChatMessage, Document};
use crate::retrieval::RetrievalEngine;
use crate::store::Store;
use crate::summarize::Summarizer;
use crate::topics::TopicClassifier;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub coordinator: Arc<IngestCoordinator>,
    pub retrieval: Arc<RetrievalEngine>,
    pub chat: Arc<ChatEngine>,
    pub summarizer: Arc<Summarizer>,
    pub classifier: Arc<TopicClassifier>,
    pub artifacts: Arc<ArtifactGenerator>,
    pub config: Arc<Config>,
}

/// Starts the HTTP API on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/users/resolve", get(handle_resolve_user))
        .route("/chats", post(handle_create_chat))
        .route("/chats/{id}/messages", post(handle_send_message))
        .route("/query", post(handle_query))
        .route("/documents", post(handle_create_document))
        .route("/documents/{id}", get(handle_get_document))
        .route("/documents/{id}/ingest", post(handle_ingest))
        .route("/documents/{id}/summary", post(handle_summary))
        .route("/documents/{id}/classify", post(handle_classify))
        .route("/documents/{id}/flashcards", post(handle_flashcards))
        .route("/documents/{id}/quiz", post(handle_quiz))
        .route("/documents/{id}/podcast", post(handle_podcast))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "API server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Response envelope ============

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    })
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body: ApiResponse<()> = ApiResponse {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

/// Map domain errors to status codes by message shape. Anything
/// unrecognized is a 500 with the message preserved in the envelope.
fn classify_error(err: anyhow::Error) -> AppError {
    let message = format!("{:#}", err);
    let status = if message.contains("not found") {
        StatusCode::NOT_FOUND
    } else if message.contains("must not be empty") || message.contains("unsupported") {
        StatusCode::BAD_REQUEST
    } else {
        error!(error = %message, "request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    AppError { status, message }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct ResolveUserQuery {
    email: String,
}

#[derive(Serialize)]
struct ResolveUserResponse {
    user_id: String,
}

async fn handle_resolve_user(
    State(state): State<AppState>,
    Query(params): Query<ResolveUserQuery>,
) -> ApiResult<ResolveUserResponse> {
    if params.email.trim().is_empty() {
        return Err(bad_request("email must not be empty"));
    }
    let user_id = state
        .store
        .ensure_user(params.email.trim())
        .await
        .map_err(classify_error)?;
    Ok(ok(ResolveUserResponse { user_id }))
}

#[derive(Deserialize)]
struct CreateChatRequest {
    user_id: String,
    #[serde(default)]
    title: Option<String>,
}

async fn handle_create_chat(
    State(state): State<AppState>,
    Json(req): Json<CreateChatRequest>,
) -> ApiResult<Chat> {
    let chat = state
        .store
        .create_chat(&req.user_id, req.title.as_deref())
        .await
        .map_err(classify_error)?;
    Ok(ok(chat))
}

#[derive(Deserialize)]
struct SendMessageRequest {
    user_id: String,
    content: String,
    #[serde(default)]
    think: bool,
    #[serde(default)]
    web_search: bool,
    #[serde(default)]
    document_ids: Vec<String>,
}

#[derive(Serialize)]
struct SendMessageResponse {
    message: ChatMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
}

async fn handle_send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<SendMessageResponse> {
    if req.think && req.web_search {
        return Err(bad_request("think and web_search are mutually exclusive"));
    }
    let route = if req.think {
        Route::Think
    } else if req.web_search {
        Route::WebSearch
    } else {
        Route::Default
    };

    let options = SendOptions {
        route,
        document_ids: req.document_ids,
    };
    let AnswerOutcome {
        message,
        confidence,
    } = state
        .chat
        .send_message(&req.user_id, &chat_id, &req.content, &options)
        .await
        .map_err(classify_error)?;

    Ok(ok(SendMessageResponse {
        message,
        confidence,
    }))
}

#[derive(Deserialize)]
struct QueryRequest {
    user_id: String,
    query: String,
    document_ids: Vec<String>,
}

#[derive(Serialize)]
struct QueryMatch {
    id: String,
    score: f32,
    document_id: String,
    chunk_index: i64,
    title: String,
    text: String,
}

#[derive(Serialize)]
struct QueryResponse {
    matches: Vec<QueryMatch>,
    context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<QueryResponse> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let retrieval = state
        .retrieval
        .retrieve(&req.query, &req.user_id, &req.document_ids)
        .await
        .map_err(classify_error)?;

    Ok(ok(QueryResponse {
        matches: retrieval
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                document_id: m.metadata.document_id,
                chunk_index: m.metadata.chunk_index,
                title: m.metadata.title,
                text: m.metadata.text,
            })
            .collect(),
        context: retrieval.context,
        confidence: retrieval.confidence,
    }))
}

#[derive(Deserialize)]
struct CreateDocumentRequest {
    user_id: String,
    title: String,
    doc_type: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    storage_path: Option<String>,
}

async fn handle_create_document(
    State(state): State<AppState>,
    Json(req): Json<CreateDocumentRequest>,
) -> ApiResult<Document> {
    if req.title.trim().is_empty() {
        return Err(bad_request("title must not be empty"));
    }

    let document = state
        .store
        .create_document(
            &req.user_id,
            req.title.trim(),
            &req.doc_type,
            req.storage_path.as_deref(),
            req.file_name.as_deref(),
        )
        .await
        .map_err(classify_error)?;

    // A storage path at creation makes the document immediately
    // processable; ingestion runs in the background while the client
    // polls status.
    if document.storage_path.is_some() {
        spawn_ingest(&state, &req.user_id, &document.id);
    }

    Ok(ok(document))
}

#[derive(Deserialize)]
struct UserScope {
    user_id: String,
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Query(scope): Query<UserScope>,
) -> ApiResult<Document> {
    let document = state
        .store
        .get_document(&scope.user_id, &document_id)
        .await
        .map_err(classify_error)?
        .ok_or_else(|| AppError {
            status: StatusCode::NOT_FOUND,
            message: format!("document {} not found", document_id),
        })?;
    Ok(ok(document))
}

#[derive(Serialize)]
struct IngestStarted {
    started: bool,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(scope): Json<UserScope>,
) -> ApiResult<IngestStarted> {
    // Existence check up front so the client gets a 404 instead of a
    // silently idle background task.
    state
        .store
        .get_document(&scope.user_id, &document_id)
        .await
        .map_err(classify_error)?
        .ok_or_else(|| AppError {
            status: StatusCode::NOT_FOUND,
            message: format!("document {} not found", document_id),
        })?;

    spawn_ingest(&state, &scope.user_id, &document_id);
    Ok(ok(IngestStarted { started: true }))
}

fn spawn_ingest(state: &AppState, user_id: &str, document_id: &str) {
    let coordinator = Arc::clone(&state.coordinator);
    let user_id = user_id.to_string();
    let document_id = document_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = coordinator.run(&user_id, &document_id).await {
            error!(document_id = %document_id, error = %format!("{:#}", e), "background ingestion errored");
        }
    });
}

#[derive(Serialize)]
struct SummaryResponse {
    summary: String,
}

async fn handle_summary(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(scope): Json<UserScope>,
) -> ApiResult<SummaryResponse> {
    let summary = state
        .summarizer
        .summarize(&scope.user_id, &document_id)
        .await
        .map_err(classify_error)?;
    Ok(ok(SummaryResponse { summary }))
}

#[derive(Serialize)]
struct ClassifyResponse {
    tags: Vec<String>,
}

async fn handle_classify(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(scope): Json<UserScope>,
) -> ApiResult<ClassifyResponse> {
    let tags = state
        .classifier
        .classify_document(&scope.user_id, &document_id)
        .await
        .map_err(classify_error)?;
    Ok(ok(ClassifyResponse { tags }))
}

#[derive(Deserialize)]
struct FlashcardsRequest {
    user_id: String,
    #[serde(default = "default_flashcard_count")]
    count: usize,
}

fn default_flashcard_count() -> usize {
    12
}

async fn handle_flashcards(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(req): Json<FlashcardsRequest>,
) -> ApiResult<Vec<Flashcard>> {
    let cards = state
        .artifacts
        .flashcards(&req.user_id, &document_id, req.count)
        .await
        .map_err(classify_error)?;
    Ok(ok(cards))
}

#[derive(Deserialize)]
struct QuizRequest {
    user_id: String,
    #[serde(default = "default_quiz_difficulty")]
    difficulty: String,
    #[serde(default = "default_quiz_count")]
    count: usize,
}

fn default_quiz_difficulty() -> String {
    "medium".to_string()
}

fn default_quiz_count() -> usize {
    10
}

async fn handle_quiz(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(req): Json<QuizRequest>,
) -> ApiResult<Vec<QuizQuestion>> {
    let difficulty = QuizDifficulty::parse(&req.difficulty)
        .ok_or_else(|| bad_request("difficulty must be easy, medium, or hard"))?;
    let questions = state
        .artifacts
        .quiz(&req.user_id, &document_id, difficulty, req.count)
        .await
        .map_err(classify_error)?;
    Ok(ok(questions))
}

#[derive(Deserialize)]
struct PodcastRequest {
    user_id: String,
    #[serde(default = "default_voice")]
    voice: String,
}

fn default_voice() -> String {
    "alloy".to_string()
}

#[derive(Serialize)]
struct PodcastResponse {
    audio_path: String,
}

async fn handle_podcast(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(req): Json<PodcastRequest>,
) -> ApiResult<PodcastResponse> {
    let audio_path = state
        .artifacts
        .podcast(&req.user_id, &document_id, &req.voice)
        .await
        .map_err(classify_error)?;
    Ok(ok(PodcastResponse { audio_path }))
}
