// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod dataset;
mod detector;
mod diseases;
mod error;
mod ingest;
mod llm;
mod models;
mod routing;
mod statistics;
mod store;

use std::{any::Any, path::Path, sync::Arc};

use anyhow::{Context, Result};
use axum::{response::Response, Router};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{
    app_state::AppState,
    dataset::Dataset,
    detector::DiseaseDetector,
    diseases::DiseaseManager,
    llm::AiClient,
    store::{InMemoryDocumentStore, InMemorySessionStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;
    std::fs::create_dir_all(&cfg.upload_dir).with_context(|| {
        format!("No se pudo crear el directorio de subidas {}", cfg.upload_dir.display())
    })?;

    // 3. Dataset y enfermedades
    let dataset = Arc::new(Dataset::load(&cfg.dataset_path));
    let disease_configs = diseases::load_configs(&cfg.diseases_dir);
    let detector = DiseaseDetector::from_configs(&disease_configs);

    // 4. Cliente de IA
    let ai = Arc::new(AiClient::from_config(&cfg).context("Error inicializando el cliente de IA")?);
    let manager = Arc::new(DiseaseManager::new(
        &cfg.enabled_diseases,
        &disease_configs,
        dataset.clone(),
        detector,
        ai.clone(),
    ));

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState::new(
        cfg,
        dataset,
        ai,
        manager,
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryDocumentStore::new()),
    );
    log_banner(&app_state);

    // 6. Router de la API, ficheros estáticos y middleware
    let app = with_middleware(
        api::create_router(app_state.clone()),
        &app_state.config.static_dir,
    );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{server_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

/// Fallback estático, CORS permisivo, trazas de peticiones y conversión de
/// pánicos en la respuesta 500 de disculpa.
fn with_middleware(router: Router, static_dir: &Path) -> Router {
    router
        .fallback_service(ServeDir::new(static_dir))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AnyOrigin)
                .allow_methods(AnyOrigin)
                .allow_headers(AnyOrigin),
        )
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "panic sin mensaje".to_string()
    };
    error!("Pánico atendiendo una petición: {details}");
    error::internal_error_response(&details)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("No se pudo escuchar la señal de apagado: {e}");
        return;
    }
    info!("Señal de apagado recibida, iniciando cierre del servidor.");
}

fn log_banner(state: &AppState) {
    info!("{}", "=".repeat(60));
    info!("🏥 MEDICAL AI CHATBOT");
    info!("📊 Registros médicos: {} cargados", statistics::thousands(state.dataset.len()));
    if state.ai.is_available() {
        info!("🤖 IA: ✅ Disponible ({})", state.ai.display_name());
    } else {
        info!("🤖 IA: ❌ Sin API key; respuestas basadas en el dataset");
    }
    info!(
        "🧬 Enfermedades: {}",
        state.diseases.available_diseases().keys().cloned().collect::<Vec<_>>().join(", ")
    );
    info!("📁 Subidas en {}", state.config.upload_dir.display());
    info!("{}", "=".repeat(60));
}
