//! Errores de la capa HTTP y su conversión a respuestas JSON.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub const APOLOGY_MESSAGE: &str =
    "I apologize, but I encountered an error processing your request. Please try again.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Message required")]
    EmptyMessage,

    #[error("No file uploaded")]
    MissingFile,

    #[error("No file selected")]
    EmptyFilename,

    #[error("File type not supported. Allowed types: {allowed}")]
    UnsupportedFileType { allowed: String },

    #[error("{0}")]
    BadRequest(String),

    #[error("File too large. Maximum upload size is {max_mb} MB")]
    PayloadTooLarge { max_mb: usize },

    #[error("Disease '{0}' not found")]
    UnknownDisease(String),

    #[error("Document '{0}' not found")]
    UnknownDocument(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::EmptyMessage
            | Self::MissingFile
            | Self::EmptyFilename
            | Self::UnsupportedFileType { .. }
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnknownDisease(_) | Self::UnknownDocument(_) => StatusCode::NOT_FOUND,
            Self::Upload(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Internal(e) => {
                error!("Error interno procesando la petición: {e:#}");
                internal_error_response(&format!("{e:#}"))
            }
            other => {
                if status.is_server_error() {
                    error!("{other}");
                }
                (status, Json(json!({ "error": other.to_string() }))).into_response()
            }
        }
    }
}

/// Cuerpo 500 con la disculpa genérica; los detalles son sólo diagnósticos.
pub fn internal_error_response(details: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "ai_response": APOLOGY_MESSAGE,
            "metadata": { "error": true, "error_details": details },
        })),
    )
        .into_response()
}
