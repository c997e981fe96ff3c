//! Modelos de dominio (registros del dataset, documentos subidos, sesiones)
//! y payloads de la API de chat.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Una fila del dataset: nombre de columna → valor tal cual aparece en el CSV.
pub type Record = HashMap<String, String>;

/// Documento subido y procesado. Vive en el `DocumentStore` y nunca se muta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub mime_type: Option<String>,
    pub size: String,
    #[serde(rename = "uploadTime")]
    pub upload_time: String,
}

/// Sesión de chat; se crea perezosamente la primera vez que se referencia su id.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub documents: Vec<String>,
    pub message_count: u64,
}

impl ChatSession {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            created_at: Utc::now(),
            documents: Vec::new(),
            message_count: 0,
        }
    }
}

/// Documento enviado directamente en el cuerpo de `/api/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InlineDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, rename = "uploadTime")]
    pub upload_time: Option<String>,
}

/// Vista mínima de un documento candidato para construir prompts.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateDocument {
    pub id: Option<String>,
    /// `None` para documentos en línea sin nombre; cada prompt usa su propia etiqueta.
    pub name: Option<String>,
    pub doc_type: String,
    pub upload_time: String,
    pub content: String,
}

impl CandidateDocument {
    pub fn name_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(default)
    }
}

impl From<&Document> for CandidateDocument {
    fn from(doc: &Document) -> Self {
        Self {
            id: Some(doc.id.clone()),
            name: Some(doc.name.clone()),
            doc_type: doc.doc_type.clone(),
            upload_time: doc.upload_time.clone(),
            content: doc.content.clone(),
        }
    }
}

impl From<InlineDocument> for CandidateDocument {
    fn from(doc: InlineDocument) -> Self {
        Self {
            id: doc.id,
            name: doc.name,
            doc_type: doc.doc_type.unwrap_or_else(|| "Unknown".to_string()),
            upload_time: doc.upload_time.unwrap_or_else(|| "Recent".to_string()),
            content: doc.content.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub uploaded_documents: Vec<InlineDocument>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMetadata {
    pub dataset_records: usize,
    pub documents_available: usize,
    pub message_count: u64,
    pub ai_model: String,
    pub query_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub ai_response: String,
    pub metadata: ChatMetadata,
}
