//! Almacenes en memoria de sesiones de chat y documentos subidos.
//!
//! El router recibe los almacenes como objetos de trait, así que se pueden
//! sustituir sin tocar la lógica de enrutado. Nada se expulsa: todo vive
//! mientras vive el proceso.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::models::{ChatSession, Document};

pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> Option<ChatSession>;

    /// Obtiene o crea la sesión e incrementa su contador de mensajes en una
    /// sola operación.
    fn record_message(&self, id: &str) -> ChatSession;

    /// Asocia un documento a la sesión (creándola si hace falta). No duplica ids.
    fn attach_document(&self, id: &str, document_id: &str);

    fn len(&self) -> usize;
}

pub trait DocumentStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Document>;

    fn put(&self, document: Document);

    fn list(&self) -> Vec<Document>;

    fn len(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, ChatSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &str) -> Option<ChatSession> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(id).cloned()
    }

    fn record_message(&self, id: &str) -> ChatSession {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| ChatSession::new(id));
        session.message_count += 1;
        session.clone()
    }

    fn attach_document(&self, id: &str, document_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| ChatSession::new(id));
        if !session.documents.iter().any(|d| d == document_id) {
            session.documents.push(document_id.to_string());
        }
    }

    fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, id: &str) -> Option<Document> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        documents.get(id).cloned()
    }

    fn put(&self, document: Document) {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        documents.insert(document.id.clone(), document);
    }

    fn list(&self) -> Vec<Document> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Document> = documents.values().cloned().collect();
        all.sort_by(|a, b| a.upload_time.cmp(&b.upload_time));
        all
    }

    fn len(&self) -> usize {
        self.documents.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
pub(crate) fn document(id: &str, name: &str, content: &str) -> Document {
    Document {
        id: id.to_string(),
        name: name.to_string(),
        content: content.to_string(),
        doc_type: "TXT".to_string(),
        mime_type: Some("text/plain".to_string()),
        size: "0.1 KB".to_string(),
        upload_time: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn sessions_are_created_lazily_and_counted() {
        let store = InMemorySessionStore::new();
        assert!(store.get("a").is_none());

        assert_eq!(store.record_message("a").message_count, 1);
        assert_eq!(store.record_message("a").message_count, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn attach_document_does_not_duplicate() {
        let store = InMemorySessionStore::new();
        store.attach_document("s", "doc-1");
        store.attach_document("s", "doc-1");
        store.attach_document("s", "doc-2");
        assert_eq!(store.get("s").unwrap().documents, vec!["doc-1", "doc-2"]);
        assert_eq!(store.get("s").unwrap().message_count, 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemorySessionStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.record_message("shared");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get("shared").unwrap().message_count, 800);
    }

    #[test]
    fn documents_round_trip_through_store() {
        let store = InMemoryDocumentStore::new();
        store.put(document("d1", "report.txt", "patient notes"));
        assert_eq!(store.get("d1").unwrap().name, "report.txt");
        assert!(store.get("missing").is_none());
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.len(), 1);
    }
}
