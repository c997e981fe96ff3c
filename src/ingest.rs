//! Ingesta de ficheros subidos: validación del nombre, volcado a un fichero
//! temporal en el directorio de subidas, extracción de texto y construcción
//! del `Document` que se guarda en el almacén.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use chrono::Utc;
use mime_guess::MimeGuess;
use serde::Serialize;
use tokio::task::JoinError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{error::AppError, models::Document};

/// Extensiones aceptadas, en el orden en que se anuncian a los clientes.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "txt", "pdf", "png", "jpg", "jpeg", "gif", "csv", "doc", "docx",
];

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

pub fn allowed_list() -> String {
    ALLOWED_EXTENSIONS.join(", ")
}

/// Extensión en minúsculas (lo que va tras el último punto).
pub fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
}

pub fn allowed_file(filename: &str) -> bool {
    extension_of(filename).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// Nombre seguro para disco: sin componentes de ruta, espacios como `_` y
/// sólo caracteres ASCII alfanuméricos, `.`, `_` o `-`.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

pub fn format_size(bytes: u64) -> String {
    format!("{:.1} KB", bytes as f64 / 1024.0)
}

/// Texto de análisis basado en palabras clave del contenido extraído.
pub fn keyword_analysis(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut analysis = String::from("Document uploaded and processed successfully.");
    if lowered.contains("patient") {
        analysis.push_str(" This appears to be a patient medical document.");
    }
    if lowered.contains("diagnosis") {
        analysis.push_str(" The document contains diagnostic information.");
    }
    if lowered.contains("test") || lowered.contains("result") {
        analysis.push_str(" Test results are present in the document.");
    }
    analysis
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub id: String,
    pub filename: String,
    pub size: String,
    #[serde(rename = "type")]
    pub file_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadAnalysis {
    pub document_analysis: String,
}

/// Cuerpo de respuesta de `/api/upload`.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub success: bool,
    pub file_info: FileInfo,
    pub extracted_text: String,
    pub analysis: UploadAnalysis,
}

/// Extrae el texto de un fichero ya escrito en disco según su extensión.
/// Los fallos de lectura se devuelven como texto y no interrumpen la subida.
fn extract_text(path: &Path, ext: &str, filename: &str) -> String {
    match ext {
        "pdf" => match pdf_extract::extract_text(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                warn!("No se pudo extraer texto del PDF {filename}: {e}");
                format!("Error reading PDF: {e}")
            }
        },
        "txt" => match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Fichero de texto ilegible o no UTF-8 {filename}: {e}");
                format!("Error reading file: {e}")
            }
        },
        ext if IMAGE_EXTENSIONS.contains(&ext) => format!(
            "Image file uploaded: {filename}. Text extraction from images requires OCR processing."
        ),
        "csv" => format!(
            "CSV dataset uploaded: {filename}. This appears to be a medical dataset file."
        ),
        _ => format!(
            "File uploaded: {filename}. Content extraction not available for this file type."
        ),
    }
}

/// Parte bloqueante: el fichero temporal vive sólo dentro de esta función y
/// se borra al salir de ella, también si la extracción falla.
fn persist_and_extract(
    upload_dir: &Path,
    file_id: &str,
    filename: &str,
    ext: &str,
    bytes: &[u8],
) -> Result<(String, u64)> {
    fs::create_dir_all(upload_dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{file_id}_"))
        .suffix(&format!("_{filename}"))
        .tempfile_in(upload_dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;

    let size = tmp.as_file().metadata()?.len();
    let text = extract_text(tmp.path(), ext, filename);
    Ok((text, size))
}

/// Un fallo de E/S es un error de subida; un pánico o cancelación de la tarea
/// bloqueante es un error interno.
fn blocking_outcome<T>(joined: Result<Result<T>, JoinError>) -> Result<T, AppError> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AppError::Upload(e.to_string())),
        Err(e) => Err(AppError::Internal(anyhow!(
            "la tarea de extracción terminó de forma anómala: {e}"
        ))),
    }
}

/// Valida, guarda temporalmente y procesa un fichero subido.
pub async fn ingest_upload(
    upload_dir: &Path,
    original_name: &str,
    bytes: Vec<u8>,
) -> Result<(Document, UploadOutcome), AppError> {
    if original_name.is_empty() {
        return Err(AppError::EmptyFilename);
    }
    let ext = match extension_of(original_name) {
        Some(ext) if allowed_file(original_name) => ext,
        _ => {
            return Err(AppError::UnsupportedFileType {
                allowed: allowed_list(),
            })
        }
    };

    let file_id = Uuid::new_v4().to_string();
    let filename = match secure_filename(original_name) {
        name if extension_of(&name).as_deref() == Some(ext.as_str()) => name,
        _ => format!("upload.{ext}"),
    };

    let dir: PathBuf = upload_dir.to_path_buf();
    let (id, name, extension) = (file_id.clone(), filename.clone(), ext.clone());
    let joined = tokio::task::spawn_blocking(move || {
        persist_and_extract(&dir, &id, &name, &extension, &bytes)
    })
    .await;
    let (text, size) = blocking_outcome(joined)?;

    let file_type = ext.to_uppercase();
    let size = format_size(size);
    let document = Document {
        id: file_id.clone(),
        name: filename.clone(),
        content: text.clone(),
        doc_type: file_type.clone(),
        mime_type: MimeGuess::from_path(&filename).first().map(|m| m.to_string()),
        size: size.clone(),
        upload_time: Utc::now().to_rfc3339(),
    };
    info!("Documento '{filename}' procesado ({size}, id {file_id})");

    let outcome = UploadOutcome {
        success: true,
        file_info: FileInfo {
            id: file_id,
            filename,
            size,
            file_type,
        },
        analysis: UploadAnalysis {
            document_analysis: keyword_analysis(&text),
        },
        extracted_text: text,
    };
    Ok((document, outcome))
}
