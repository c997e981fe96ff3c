//! Enrutado de mensajes de chat: decide si la consulta va dirigida a los
//! documentos subidos o al dataset, construye el prompt y llama (o no) al
//! cliente de IA.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    dataset::Dataset,
    error::AppError,
    llm::{AiClient, Completion},
    models::{CandidateDocument, ChatMetadata, ChatRequest, ChatResponse},
    statistics,
    store::{DocumentStore, SessionStore},
};

/// Palabras que marcan una consulta como dirigida a documentos.
pub const DOCUMENT_KEYWORDS: &[&str] = &[
    "document", "pdf", "file", "uploaded", "summarize", "summary",
    "mr.", "patient", "diagnosis", "lab", "result", "report", "findings",
];

pub const SINGLE_DOCUMENT_CHARS: usize = 3000;
pub const MULTI_DOCUMENT_CHARS: usize = 1500;
pub const DOCUMENT_MAX_TOKENS: u32 = 2000;
pub const GROUNDED_MAX_TOKENS: u32 = 1500;
pub const DATASET_MODEL_LABEL: &str = "Dataset Analysis";

/// Primeros `max` caracteres (no bytes) de `text`.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn is_document_query(message: &str) -> bool {
    let message = message.to_lowercase();
    DOCUMENT_KEYWORDS.iter().any(|k| message.contains(k))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    SingleDocument,
    MultiDocument,
    Dataset,
}

/// Reglas de enrutado en orden de prioridad: (ruta, condición).
/// Los documentos ganan al dataset siempre que haya candidatos.
const ROUTE_RULES: &[(Route, fn(bool, usize) -> bool)] = &[
    (Route::SingleDocument, |doc_query, n| doc_query && n == 1),
    (Route::MultiDocument, |doc_query, n| doc_query && n > 1),
];

impl Route {
    pub fn classify(message: &str, candidates: usize) -> Self {
        let doc_query = is_document_query(message);
        ROUTE_RULES
            .iter()
            .find(|(_, applies)| applies(doc_query, candidates))
            .map(|(route, _)| *route)
            .unwrap_or(Route::Dataset)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleDocument => "single_document",
            Self::MultiDocument => "multi_document",
            Self::Dataset => "dataset",
        }
    }
}

// --- Prompts ---

pub fn single_document_prompt(doc: &CandidateDocument, message: &str) -> String {
    format!(
        "You are a professional medical AI assistant analyzing a medical document.\n\n\
         DOCUMENT DETAILS:\n\
         - File: {name}\n\
         - Type: {doc_type}\n\
         - Upload Time: {upload_time}\n\n\
         DOCUMENT CONTENT:\n{content}\n\n\
         USER QUESTION: {message}\n\n\
         INSTRUCTIONS:\n\
         1. Provide a professional medical analysis\n\
         2. Focus specifically on what the user asked\n\
         3. Extract relevant medical information from the document\n\
         4. If asked for summary, provide comprehensive overview\n\
         5. If asked about specific findings, focus on those\n\
         6. Always recommend consulting healthcare professionals for interpretation\n\
         7. Use clear, professional medical language\n\
         8. Structure your response with clear headings and bullet points\n\n\
         Provide a detailed, professional response:",
        name = doc.name_or("Medical Document"),
        doc_type = doc.doc_type,
        upload_time = doc.upload_time,
        content = truncate_chars(&doc.content, SINGLE_DOCUMENT_CHARS),
    )
}

pub fn multi_document_prompt(docs: &[CandidateDocument], message: &str) -> String {
    let mut contents = String::new();
    for (i, doc) in docs.iter().enumerate() {
        let fallback = format!("Document {}", i + 1);
        contents.push_str(&format!(
            "\n--- DOCUMENT {}: {} ---\n",
            i + 1,
            doc.name_or(&fallback)
        ));
        contents.push_str(truncate_chars(&doc.content, MULTI_DOCUMENT_CHARS));
        contents.push('\n');
    }

    format!(
        "You are a professional medical AI assistant analyzing multiple medical documents.\n\n\
         AVAILABLE DOCUMENTS ({count} files):\n{contents}\n\
         USER QUESTION: {message}\n\n\
         INSTRUCTIONS:\n\
         1. Analyze all relevant documents\n\
         2. Cross-reference information when applicable\n\
         3. Provide comprehensive analysis\n\
         4. If asked about specific document, focus on that one\n\
         5. If general question, synthesize information from all documents\n\
         6. Use professional medical language\n\
         7. Structure response clearly\n\n\
         Provide a detailed analysis:",
        count = docs.len(),
    )
}

pub fn grounded_prompt(analysis: &str, message: &str) -> String {
    format!(
        "You are a professional medical AI assistant with access to comprehensive medical datasets.\n\n\
         MEDICAL DATASET ANALYSIS:\n{analysis}\n\n\
         USER QUESTION: {message}\n\n\
         INSTRUCTIONS:\n\
         1. Provide evidence-based medical information using the dataset insights\n\
         2. Use professional medical language\n\
         3. Structure your response clearly with headings and bullet points\n\
         4. Include relevant statistics from the dataset\n\
         5. Always recommend consulting healthcare professionals\n\
         6. Be thorough but concise\n\
         7. Focus on the specific question asked\n\n\
         Provide a comprehensive medical response:"
    )
}

/// Texto devuelto en la ruta de documentos cuando la IA no responde.
pub fn document_fallback(docs: &[CandidateDocument]) -> String {
    let listing = docs
        .iter()
        .map(|d| format!("• {} ({})", d.name_or("Document"), d.doc_type))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "**Document Analysis**\n\n\
         I've processed your uploaded document(s) but AI analysis is currently unavailable.\n\n\
         **Available Documents:**\n{listing}\n\n\
         Please ensure your API configuration is correct for full AI-powered analysis."
    )
}

/// Raíz de composición del flujo de chat.
#[derive(Clone)]
pub struct QueryRouter {
    dataset: Arc<Dataset>,
    ai: Arc<AiClient>,
    sessions: Arc<dyn SessionStore>,
    documents: Arc<dyn DocumentStore>,
}

impl QueryRouter {
    pub fn new(
        dataset: Arc<Dataset>,
        ai: Arc<AiClient>,
        sessions: Arc<dyn SessionStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            dataset,
            ai,
            sessions,
            documents,
        }
    }

    /// Documentos de la sesión resueltos contra el almacén, más los enviados
    /// en la petición con contenido no vacío.
    fn gather_candidates(&self, request: &mut ChatRequest) -> Vec<CandidateDocument> {
        let session_docs = request
            .chat_id
            .as_deref()
            .and_then(|id| self.sessions.get(id))
            .map(|s| s.documents)
            .unwrap_or_default();

        let mut candidates: Vec<CandidateDocument> = session_docs
            .iter()
            .filter_map(|id| self.documents.get(id))
            .map(|doc| CandidateDocument::from(&doc))
            .collect();

        for inline in std::mem::take(&mut request.uploaded_documents) {
            if inline.content.as_deref().map_or(true, str::is_empty) {
                continue;
            }
            if let Some(id) = inline.id.as_deref() {
                if candidates.iter().any(|c| c.id.as_deref() == Some(id)) {
                    continue;
                }
                if let Some(chat_id) = request.chat_id.as_deref() {
                    if self.documents.get(id).is_some() {
                        self.sessions.attach_document(chat_id, id);
                    }
                }
            }
            candidates.push(CandidateDocument::from(inline));
        }
        candidates
    }

    /// Procesa un mensaje de chat completo.
    pub async fn handle(&self, mut request: ChatRequest) -> Result<ChatResponse, AppError> {
        let message = request
            .message
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if message.is_empty() {
            return Err(AppError::EmptyMessage);
        }

        let message_count = match request.chat_id.as_deref() {
            Some(id) => self.sessions.record_message(id).message_count,
            None => 1,
        };

        let candidates = self.gather_candidates(&mut request);
        let route = Route::classify(&message, candidates.len());
        info!(
            "Mensaje enrutado a '{}' ({} documentos candidatos)",
            route.as_str(),
            candidates.len()
        );

        let ai_response = match route {
            Route::SingleDocument | Route::MultiDocument => {
                let prompt = if route == Route::SingleDocument {
                    single_document_prompt(&candidates[0], &message)
                } else {
                    multi_document_prompt(&candidates, &message)
                };
                match self.ai.complete(&prompt, DOCUMENT_MAX_TOKENS).await {
                    Completion::Success { text } => text,
                    _ => document_fallback(&candidates),
                }
            }
            Route::Dataset => {
                let analysis = statistics::summarize(&self.dataset, &message);
                if self.ai.is_available() {
                    let prompt = grounded_prompt(&analysis, &message);
                    match self.ai.complete(&prompt, GROUNDED_MAX_TOKENS).await {
                        Completion::Success { text } => text,
                        other => {
                            debug!("Sin respuesta de IA ({other:?}); se devuelven las estadísticas");
                            analysis
                        }
                    }
                } else {
                    analysis
                }
            }
        };

        Ok(ChatResponse {
            ai_response,
            metadata: ChatMetadata {
                dataset_records: self.dataset.len(),
                documents_available: candidates.len(),
                message_count,
                ai_model: self.model_label(),
                query_type: route.as_str(),
            },
        })
    }

    fn model_label(&self) -> String {
        if self.ai.is_available() {
            self.ai.display_name()
        } else {
            DATASET_MODEL_LABEL.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures;
    use crate::llm::testing;
    use crate::models::InlineDocument;
    use crate::store::{document, InMemoryDocumentStore, InMemorySessionStore};
    use serde_json::json;

    type Parts = (QueryRouter, Arc<InMemorySessionStore>, Arc<InMemoryDocumentStore>);

    fn router_with(dataset: Dataset) -> Parts {
        router_with_ai(dataset, testing::client(&[]))
    }

    fn router_with_ai(dataset: Dataset, ai: AiClient) -> Parts {
        let sessions = Arc::new(InMemorySessionStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let router = QueryRouter::new(
            Arc::new(dataset),
            Arc::new(ai),
            sessions.clone(),
            documents.clone(),
        );
        (router, sessions, documents)
    }

    fn gemini_answer(text: &str) -> serde_json::Value {
        json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
    }

    fn inline(name: &str, content: &str) -> InlineDocument {
        InlineDocument {
            name: Some(name.to_string()),
            doc_type: Some("TXT".to_string()),
            content: Some(content.to_string()),
            ..InlineDocument::default()
        }
    }

    fn candidate(name: &str, content: &str) -> CandidateDocument {
        CandidateDocument::from(inline(name, content))
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn route_rules_prefer_documents() {
        // "summary" también selecciona el tema de estadísticas; con documentos gana la ruta de documentos.
        assert_eq!(Route::classify("give me a summary", 1), Route::SingleDocument);
        assert_eq!(Route::classify("give me a summary", 2), Route::MultiDocument);
        assert_eq!(Route::classify("give me a summary", 0), Route::Dataset);
        assert_eq!(Route::classify("how does smoking matter", 3), Route::Dataset);
    }

    #[test]
    fn single_prompt_truncates_content() {
        let doc = candidate("scan.txt", &"x".repeat(5000));
        let prompt = single_document_prompt(&doc, "summarize");
        assert!(prompt.contains("- File: scan.txt"));
        assert!(prompt.contains(&"x".repeat(SINGLE_DOCUMENT_CHARS)));
        assert!(!prompt.contains(&"x".repeat(SINGLE_DOCUMENT_CHARS + 1)));
    }

    #[test]
    fn multi_prompt_references_every_document() {
        let docs = vec![
            candidate("labs.txt", &"a".repeat(2000)),
            candidate("xray.txt", "clear lungs"),
        ];
        let prompt = multi_document_prompt(&docs, "compare the reports");
        assert!(prompt.contains("AVAILABLE DOCUMENTS (2 files)"));
        assert!(prompt.contains("--- DOCUMENT 1: labs.txt ---"));
        assert!(prompt.contains("--- DOCUMENT 2: xray.txt ---"));
        assert!(!prompt.contains(&"a".repeat(MULTI_DOCUMENT_CHARS + 1)));
    }

    #[test]
    fn unnamed_documents_get_per_prompt_labels() {
        let unnamed = |content: &str| {
            CandidateDocument::from(InlineDocument {
                content: Some(content.to_string()),
                ..InlineDocument::default()
            })
        };
        let docs = vec![unnamed("first"), candidate("b.txt", "second"), unnamed("third")];

        let prompt = multi_document_prompt(&docs, "compare");
        assert!(prompt.contains("--- DOCUMENT 1: Document 1 ---\nfirst\n"));
        assert!(prompt.contains("--- DOCUMENT 2: b.txt ---"));
        assert!(prompt.contains("--- DOCUMENT 3: Document 3 ---\nthird\n"));

        assert!(single_document_prompt(&docs[0], "summarize").contains("- File: Medical Document"));
        assert!(document_fallback(&docs).contains("• Document (Unknown)\n• b.txt (TXT)"));
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (router, sessions, _) = router_with(fixtures::sample());
        for message in [None, Some(""), Some("   ")] {
            let request = ChatRequest {
                message: message.map(str::to_string),
                chat_id: Some("c1".into()),
                uploaded_documents: vec![inline("a.txt", "patient data")],
            };
            assert!(matches!(router.handle(request).await, Err(AppError::EmptyMessage)));
        }
        assert_eq!(sessions.len(), 0);
    }

    #[tokio::test]
    async fn dataset_route_without_credential_returns_statistics() {
        let (router, _, _) = router_with(fixtures::sample());
        let response = router
            .handle(ChatRequest {
                message: Some("How does smoking affect risk?".into()),
                ..ChatRequest::default()
            })
            .await
            .unwrap();
        assert!(response.ai_response.starts_with("**SMOKING ANALYSIS FROM MEDICAL DATASET**"));
        assert_eq!(response.metadata.dataset_records, 4);
        assert_eq!(response.metadata.message_count, 1);
        assert_eq!(response.metadata.ai_model, DATASET_MODEL_LABEL);
        assert_eq!(response.metadata.query_type, "dataset");
    }

    #[test]
    fn grounded_prompt_embeds_analysis_and_question() {
        let prompt = grounded_prompt("Total patients: 4", "what about age?");
        assert!(prompt.starts_with(
            "You are a professional medical AI assistant with access to comprehensive medical datasets."
        ));
        assert!(prompt.contains("MEDICAL DATASET ANALYSIS:\nTotal patients: 4\n\nUSER QUESTION: what about age?"));
        assert!(prompt.contains("4. Include relevant statistics from the dataset"));
        assert!(prompt.ends_with("Provide a comprehensive medical response:"));
    }

    #[tokio::test]
    async fn dataset_route_returns_ai_answer_grounded_in_statistics() {
        let (base, prompts) =
            testing::fake_gemini_logged(200, gemini_answer("Smoking raises risk.")).await;
        let (router, _, _) = router_with_ai(fixtures::sample(), testing::gemini_client(&base));

        let message = "How does smoking affect risk?";
        let response = router
            .handle(ChatRequest {
                message: Some(message.into()),
                ..ChatRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(response.ai_response, "Smoking raises risk.");
        assert_eq!(response.metadata.query_type, "dataset");
        assert_eq!(response.metadata.ai_model, "Gemini 1.5 Flash");

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        let analysis = statistics::summarize(&fixtures::sample(), message);
        assert_eq!(prompts[0], grounded_prompt(&analysis, message));
        assert!(prompts[0].contains("MEDICAL DATASET ANALYSIS:\n**SMOKING ANALYSIS FROM MEDICAL DATASET**"));
    }

    #[tokio::test]
    async fn dataset_route_returns_statistics_when_provider_fails() {
        let base = testing::fake_gemini(503, json!({"error": "overloaded"})).await;
        let (router, _, _) = router_with_ai(fixtures::sample(), testing::gemini_client(&base));

        let response = router
            .handle(ChatRequest {
                message: Some("How does smoking affect risk?".into()),
                ..ChatRequest::default()
            })
            .await
            .unwrap();
        assert!(response.ai_response.starts_with("**SMOKING ANALYSIS FROM MEDICAL DATASET**"));
        assert_eq!(response.metadata.ai_model, "Gemini 1.5 Flash");
    }

    #[tokio::test]
    async fn document_route_returns_ai_answer() {
        let (base, prompts) =
            testing::fake_gemini_logged(200, gemini_answer("No acute findings.")).await;
        let (router, _, _) = router_with_ai(fixtures::sample(), testing::gemini_client(&base));

        let response = router
            .handle(ChatRequest {
                message: Some("summarize the report".into()),
                uploaded_documents: vec![inline("xray.txt", "lungs clear")],
                ..ChatRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(response.ai_response, "No acute findings.");
        assert_eq!(response.metadata.query_type, "single_document");

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("- File: xray.txt"));
        assert!(prompts[0].contains("DOCUMENT CONTENT:\nlungs clear"));
        assert!(prompts[0].contains("USER QUESTION: summarize the report"));
    }

    #[tokio::test]
    async fn document_route_lists_documents_when_provider_fails() {
        let base = testing::fake_gemini(500, json!({"error": "boom"})).await;
        let (router, _, _) = router_with_ai(fixtures::sample(), testing::gemini_client(&base));

        let response = router
            .handle(ChatRequest {
                message: Some("compare the reports".into()),
                uploaded_documents: vec![inline("a.txt", "one"), inline("b.txt", "two")],
                ..ChatRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(response.metadata.query_type, "multi_document");
        assert!(response.ai_response.starts_with("**Document Analysis**"));
        assert!(response.ai_response.contains("• a.txt (TXT)\n• b.txt (TXT)"));
    }

    #[tokio::test]
    async fn single_and_multi_document_paths() {
        let (router, _, _) = router_with(fixtures::sample());

        let one = router
            .handle(ChatRequest {
                message: Some("summarize the document".into()),
                uploaded_documents: vec![inline("a.txt", "patient data")],
                ..ChatRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(one.metadata.query_type, "single_document");
        assert_eq!(one.metadata.documents_available, 1);
        assert!(one.ai_response.contains("• a.txt (TXT)"));

        let two = router
            .handle(ChatRequest {
                message: Some("summarize the documents".into()),
                uploaded_documents: vec![
                    inline("a.txt", "patient data"),
                    inline("b.txt", "lab values"),
                    inline("empty.txt", ""),
                ],
                ..ChatRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(two.metadata.query_type, "multi_document");
        assert_eq!(two.metadata.documents_available, 2);
        assert!(two.ai_response.contains("• a.txt (TXT)\n• b.txt (TXT)"));
    }

    #[tokio::test]
    async fn session_documents_are_resolved_and_counted() {
        let (router, sessions, documents) = router_with(fixtures::sample());
        documents.put(document("d1", "report.txt", "patient report"));
        sessions.attach_document("chat", "d1");
        sessions.attach_document("chat", "gone");

        let first = router
            .handle(ChatRequest {
                message: Some("what does the report say?".into()),
                chat_id: Some("chat".into()),
                uploaded_documents: vec![InlineDocument {
                    id: Some("d1".into()),
                    ..inline("report.txt", "patient report")
                }],
            })
            .await
            .unwrap();
        assert_eq!(first.metadata.query_type, "single_document");
        assert_eq!(first.metadata.documents_available, 1);
        assert_eq!(first.metadata.message_count, 1);

        let second = router
            .handle(ChatRequest {
                message: Some("hello".into()),
                chat_id: Some("chat".into()),
                ..ChatRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(second.metadata.message_count, 2);
        assert_eq!(second.metadata.query_type, "dataset");
    }

    #[tokio::test]
    async fn inline_document_known_to_store_is_attached_to_session() {
        let (router, sessions, documents) = router_with(Dataset::default());
        documents.put(document("d9", "notes.txt", "diagnosis: none"));

        router
            .handle(ChatRequest {
                message: Some("diagnosis?".into()),
                chat_id: Some("s".into()),
                uploaded_documents: vec![InlineDocument {
                    id: Some("d9".into()),
                    ..inline("notes.txt", "diagnosis: none")
                }],
            })
            .await
            .unwrap();
        assert_eq!(sessions.get("s").unwrap().documents, vec!["d9"]);
    }

    #[tokio::test]
    async fn empty_dataset_degrades_to_unavailable_text() {
        let (router, _, _) = router_with(Dataset::default());
        let response = router
            .handle(ChatRequest {
                message: Some("age?".into()),
                ..ChatRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(response.ai_response, statistics::DATASET_UNAVAILABLE);
        assert_eq!(response.metadata.dataset_records, 0);
    }
}
