//! Cliente del proveedor de LLM externo (Gemini o Hugging Face).
//!
//! El cliente nunca propaga errores a quien lo llama: `complete` devuelve un
//! `Completion` etiquetado y `generate` lo convierte siempre en texto,
//! usando respuestas de reserva cuando el proveedor falla.

use std::time::{Duration, Instant};

use anyhow::Result;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::config::{AiProvider, AppConfig};
use crate::routing::truncate_chars;

pub const DEFAULT_MAX_TOKENS: u32 = 1000;

pub const FALLBACK_RESPONSES: &[&str] = &[
    "I can provide information about the medical conditions in my dataset. Could you please be more specific about what you'd like to know?",
    "Based on the medical data available, I can help with information about symptoms, risk factors, and statistical insights.",
    "I have access to comprehensive medical datasets. Please ask about specific conditions, symptoms, or statistical analysis.",
    "Let me help you with medical information from my dataset. What specific aspect would you like to explore?",
];

const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

const HUGGINGFACE_BASE: &str = "https://api-inference.huggingface.co/models/";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AiErrorKind {
    #[error("no API credential configured")]
    MissingCredential,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provider payload: {0}")]
    MalformedPayload(String),
}

/// Resultado de una llamada al proveedor.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Success { text: String },
    Empty,
    Error { kind: AiErrorKind },
}

impl Completion {
    fn from_text(text: Option<String>) -> Self {
        match text.map(|t| t.trim().to_string()) {
            Some(text) if !text.is_empty() => Self::Success { text },
            _ => Self::Empty,
        }
    }

    pub fn text(self) -> Option<String> {
        match self {
            Self::Success { text } => Some(text),
            _ => None,
        }
    }
}

/// Intervalo mínimo entre llamadas, compartido por todo el proceso.
///
/// El mutex se mantiene durante la espera, así que las llamadas concurrentes
/// quedan serializadas.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// --- Payloads de Gemini ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiRequestContent<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct GeminiRequestContent<'a> {
    parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
    stop_sequences: Vec<String>,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

// --- Payloads de Hugging Face ---

#[derive(Serialize)]
struct HuggingFaceRequest<'a> {
    inputs: &'a str,
    parameters: HuggingFaceParameters,
}

#[derive(Serialize)]
struct HuggingFaceParameters {
    max_length: u32,
    temperature: f32,
    do_sample: bool,
}

#[derive(Deserialize)]
struct HuggingFaceGenerated {
    generated_text: Option<String>,
}

/// Extrae `candidates[0].content.parts[0].text`.
fn parse_gemini(body: &str) -> Completion {
    match serde_json::from_str::<GeminiResponse>(body) {
        Ok(resp) => Completion::from_text(
            resp.candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .and_then(|c| c.parts.into_iter().next())
                .and_then(|p| p.text),
        ),
        Err(e) => Completion::Error {
            kind: AiErrorKind::MalformedPayload(e.to_string()),
        },
    }
}

/// Extrae `[0].generated_text` quitando el eco del prompt.
fn parse_huggingface(body: &str, prompt: &str) -> Completion {
    match serde_json::from_str::<Vec<HuggingFaceGenerated>>(body) {
        Ok(items) => Completion::from_text(
            items
                .into_iter()
                .next()
                .and_then(|g| g.generated_text)
                .map(|t| t.replace(prompt, "")),
        ),
        Err(e) => Completion::Error {
            kind: AiErrorKind::MalformedPayload(e.to_string()),
        },
    }
}

pub fn fallback_response() -> String {
    FALLBACK_RESPONSES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_RESPONSES[0])
        .to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
    pub status: &'static str,
    pub features: Vec<&'static str>,
}

/// Cliente único del proceso; se comparte detrás de un `Arc`.
#[derive(Debug)]
pub struct AiClient {
    provider: AiProvider,
    model: String,
    api_key: Option<String>,
    endpoint: Url,
    timeout: Duration,
    http: reqwest::Client,
    limiter: RateLimiter,
}

impl AiClient {
    /// Construye el cliente a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let model = cfg.ai_model.trim_start_matches("models/").to_string();
        let endpoint = match cfg.ai_provider {
            AiProvider::Gemini => cfg
                .gemini_base_url
                .join(&format!("v1beta/models/{model}:generateContent"))?,
            AiProvider::HuggingFace => Url::parse(HUGGINGFACE_BASE)?.join(&model)?,
        };
        let http = reqwest::Client::builder().timeout(cfg.ai_timeout).build()?;

        Ok(Self {
            provider: cfg.ai_provider.clone(),
            model,
            api_key: cfg.api_key().map(str::to_string),
            endpoint,
            timeout: cfg.ai_timeout,
            http,
            limiter: RateLimiter::new(cfg.ai_min_interval),
        })
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn provider(&self) -> &AiProvider {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Nombre mostrado en los metadatos de las respuestas
    /// (`gemini-1.5-flash` → `Gemini 1.5 Flash`).
    pub fn display_name(&self) -> String {
        match self.provider {
            AiProvider::Gemini => self
                .model
                .split('-')
                .map(capitalize)
                .collect::<Vec<_>>()
                .join(" "),
            AiProvider::HuggingFace => format!("Hugging Face ({})", self.model),
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        let available = self.is_available();
        ModelInfo {
            provider: self.provider.label().to_string(),
            model: self.model.clone(),
            status: if available { "available" } else { "unavailable" },
            features: if available {
                vec!["text_generation", "document_analysis"]
            } else {
                Vec::new()
            },
        }
    }

    // ---------------------------------------------------------------------
    // GENERACIÓN
    // ---------------------------------------------------------------------

    /// Llamada al proveedor con el resultado etiquetado. Sin credencial no
    /// hay llamada de red ni espera del limitador.
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Completion {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("Sin credencial de IA; se omite la llamada al proveedor");
            return Completion::Error {
                kind: AiErrorKind::MissingCredential,
            };
        };

        self.limiter.acquire().await;

        let result = match self.provider {
            AiProvider::Gemini => self.call_gemini(api_key, prompt, max_tokens).await,
            AiProvider::HuggingFace => self.call_huggingface(api_key, prompt, max_tokens).await,
        };

        let completion = result.unwrap_or_else(|kind| Completion::Error { kind });
        match &completion {
            Completion::Error { kind } => warn!("Error del proveedor de IA ({}): {kind}", self.provider.label()),
            Completion::Empty => warn!("El proveedor de IA devolvió una respuesta vacía"),
            Completion::Success { .. } => {}
        }
        completion
    }

    /// Siempre devuelve texto: la respuesta del modelo o una de reserva.
    pub async fn generate(&self, prompt: &str, max_tokens: u32) -> String {
        self.complete(prompt, max_tokens)
            .await
            .text()
            .unwrap_or_else(fallback_response)
    }

    /// Análisis libre de un documento subido (primeros 2000 caracteres).
    pub async fn analyze_document(&self, text: &str, document_type: &str) -> String {
        let prompt = format!(
            "You are a medical AI assistant analyzing a {document_type} document.\n\n\
             DOCUMENT CONTENT:\n{}\n\n\
             INSTRUCTIONS:\n\
             1. Identify key medical information\n\
             2. Extract relevant symptoms, conditions, or findings\n\
             3. Provide clear, structured analysis\n\
             4. Always recommend consulting healthcare professionals\n\
             5. Be clear about limitations\n\n\
             Provide a comprehensive analysis:",
            truncate_chars(text, 2000)
        );
        self.generate(&prompt, 800).await
    }

    async fn call_gemini(
        &self,
        api_key: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<Completion, AiErrorKind> {
        let payload = GeminiRequest {
            contents: vec![GeminiRequestContent {
                parts: vec![GeminiRequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_k: 40,
                top_p: 0.95,
                max_output_tokens: max_tokens,
                stop_sequences: Vec::new(),
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                })
                .collect(),
        };

        let request = self
            .http
            .post(self.endpoint.clone())
            .header("x-goog-api-key", api_key)
            .json(&payload);
        let body = self.send(request).await?;
        Ok(parse_gemini(&body))
    }

    async fn call_huggingface(
        &self,
        api_key: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<Completion, AiErrorKind> {
        let payload = HuggingFaceRequest {
            inputs: prompt,
            parameters: HuggingFaceParameters {
                max_length: max_tokens,
                temperature: 0.7,
                do_sample: true,
            },
        };

        let request = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(api_key)
            .json(&payload);
        let body = self.send(request).await?;
        Ok(parse_huggingface(&body, prompt))
    }

    /// Envía la petición y devuelve el cuerpo si el estado es 2xx.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, AiErrorKind> {
        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(AiErrorKind::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn classify(&self, e: reqwest::Error) -> AiErrorKind {
        if e.is_timeout() {
            AiErrorKind::Timeout(self.timeout)
        } else {
            AiErrorKind::Network(e.to_string())
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use axum::{
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use serde_json::Value;

    use super::AiClient;
    use crate::config::{AppConfig, FileSettings};

    /// Prompts recibidos por el servidor falso, en orden de llegada.
    pub type PromptLog = Arc<Mutex<Vec<String>>>;

    /// Cliente construido sólo con las variables de entorno indicadas.
    pub fn client(pairs: &[(&str, &str)]) -> AiClient {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let cfg = AppConfig::from_parts(FileSettings::default(), |key| {
            pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap();
        AiClient::from_config(&cfg).unwrap()
    }

    /// Cliente Gemini con credencial apuntando a `base`.
    pub fn gemini_client(base: &str) -> AiClient {
        client(&[("GEMINI_API_KEY", "secret"), ("GEMINI_BASE_URL", base)])
    }

    /// Servidor local que imita el endpoint de Gemini.
    pub async fn fake_gemini(status: u16, body: Value) -> String {
        fake_gemini_logged(status, body).await.0
    }

    /// Como `fake_gemini`, guardando además el texto de cada prompt recibido.
    pub async fn fake_gemini_logged(status: u16, body: Value) -> (String, PromptLog) {
        let log = PromptLog::default();
        let seen = log.clone();
        let app = Router::new().route(
            "/v1beta/models/:action",
            post(move |headers: HeaderMap, Json(request): Json<Value>| {
                let body = body.clone();
                let seen = seen.clone();
                async move {
                    if let Some(prompt) = request["contents"][0]["parts"][0]["text"].as_str() {
                        seen.lock().unwrap().push(prompt.to_string());
                    }
                    let code = if headers.contains_key("x-goog-api-key") {
                        StatusCode::from_u16(status).unwrap()
                    } else {
                        StatusCode::UNAUTHORIZED
                    };
                    (code, Json(body))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), log)
    }
}
