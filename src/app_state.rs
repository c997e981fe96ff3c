use std::sync::Arc;

use crate::{
    config::AppConfig,
    dataset::Dataset,
    diseases::DiseaseManager,
    llm::AiClient,
    routing::QueryRouter,
    store::{DocumentStore, SessionStore},
};

/// Estado compartido por todos los handlers. Todo va detrás de `Arc`, así
/// que clonarlo por petición es barato.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub dataset: Arc<Dataset>,
    pub ai: Arc<AiClient>,
    pub diseases: Arc<DiseaseManager>,
    pub sessions: Arc<dyn SessionStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub router: QueryRouter,
}

impl AppState {
    /// Cablea el router de consultas con los mismos almacenes y cliente.
    pub fn new(
        config: AppConfig,
        dataset: Arc<Dataset>,
        ai: Arc<AiClient>,
        diseases: Arc<DiseaseManager>,
        sessions: Arc<dyn SessionStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let router = QueryRouter::new(dataset.clone(), ai.clone(), sessions.clone(), documents.clone());
        Self {
            config: Arc::new(config),
            dataset,
            ai,
            diseases,
            sessions,
            documents,
            router,
        }
    }
}
