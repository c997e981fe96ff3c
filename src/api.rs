use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Json, Multipart,
        Path, State,
    },
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::{
    app_state::AppState,
    diseases::QueryOutcome,
    error::AppError,
    ingest::{self, UploadOutcome, ALLOWED_EXTENSIONS},
    llm::ModelInfo,
    models::{ChatRequest, ChatResponse, Document},
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct DiseaseQueryPayload {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Serialize)]
pub struct DocumentAnalysisResponse {
    document_id: String,
    name: String,
    analysis: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    let upload_limit = app_state.config.max_upload_bytes;
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route(
            "/api/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/health", get(health_handler))
        .route("/api/system/status", get(system_status_handler))
        .route("/api/diseases", get(diseases_handler))
        .route("/api/diseases/:id/statistics", get(disease_statistics_handler))
        .route("/api/query", post(disease_query_handler))
        .route("/api/documents", get(documents_handler))
        .route("/api/documents/:id/analyze", post(analyze_document_handler))
        .route("/api/ai/model", get(ai_model_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let response = state.router.handle(request).await?;
    Ok(Json(response))
}

/// Conserva el 413 del límite de cuerpo; el resto de fallos del multipart son 400.
fn multipart_error(e: MultipartError, max_bytes: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge {
            max_mb: max_bytes / (1024 * 1024),
        }
    } else {
        AppError::BadRequest(e.body_text())
    }
}

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadOutcome>, AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut chat_id: Option<String> = None;
    let max_bytes = state.config.max_upload_bytes;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, max_bytes))?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("chat_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, max_bytes))?;
                chat_id = Some(text).filter(|t| !t.trim().is_empty());
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or(AppError::MissingFile)?;
    let (document, outcome) = ingest::ingest_upload(&state.config.upload_dir, &filename, bytes).await?;

    if let Some(chat_id) = chat_id.as_deref() {
        state.sessions.attach_document(chat_id, &document.id);
        info!("Documento {} asociado a la sesión {chat_id}", document.id);
    }
    state.documents.put(document);

    Ok(Json(outcome))
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "total_records": state.dataset.len(),
        "ai_available": state.ai.is_available(),
        "upload_enabled": true,
        "active_sessions": state.sessions.len(),
        "uploaded_documents": state.documents.len(),
        "supported_formats": ALLOWED_EXTENSIONS,
    }))
}

#[axum::debug_handler]
async fn system_status_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "dataset": {
            "loaded": !state.dataset.is_empty(),
            "records": state.dataset.len(),
            "source": state.dataset.source().display().to_string(),
        },
        "ai": {
            "available": state.ai.is_available(),
            "provider": state.ai.provider().label(),
            "model": state.ai.model(),
        },
        "storage": {
            "active_chats": state.sessions.len(),
            "documents": state.documents.len(),
        },
        "diseases": state.diseases.available_diseases().keys().collect::<Vec<_>>(),
    }))
}

#[axum::debug_handler]
async fn diseases_handler(State(state): State<AppState>) -> Json<Value> {
    let diseases = state.diseases.available_diseases();
    Json(json!({
        "total": diseases.len(),
        "diseases": diseases,
    }))
}

#[axum::debug_handler]
async fn disease_statistics_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state
        .diseases
        .disease_statistics(&id)
        .map(Json)
        .ok_or(AppError::UnknownDisease(id))
}

#[axum::debug_handler]
async fn disease_query_handler(
    State(state): State<AppState>,
    payload: Result<Json<DiseaseQueryPayload>, JsonRejection>,
) -> Result<Json<QueryOutcome>, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let query = payload.query.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(AppError::EmptyMessage);
    }
    Ok(Json(state.diseases.process_query(query.trim()).await))
}

#[axum::debug_handler]
async fn documents_handler(State(state): State<AppState>) -> Json<Value> {
    let documents: Vec<Document> = state.documents.list();
    Json(json!({
        "total": documents.len(),
        "documents": documents,
    }))
}

#[axum::debug_handler]
async fn analyze_document_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentAnalysisResponse>, AppError> {
    let document = state
        .documents
        .get(&id)
        .ok_or_else(|| AppError::UnknownDocument(id.clone()))?;
    let analysis = state
        .ai
        .analyze_document(&document.content, &document.doc_type)
        .await;
    Ok(Json(DocumentAnalysisResponse {
        document_id: document.id,
        name: document.name,
        analysis,
    }))
}

#[axum::debug_handler]
async fn ai_model_handler(State(state): State<AppState>) -> Json<ModelInfo> {
    Json(state.ai.model_info())
}
