// Módulos de la aplicación
mod api;
mod app_state;
mod compose;
mod config;
mod error;
mod layout;
mod llm;
mod models;
mod node_store;
mod persistence;
mod pipeline;
mod session;
mod text_util;

use std::sync::Arc;

use crate::app_state::AppState;
use crate::layout::LayoutPlanner;
use crate::llm::{LlmManager, TextGenerator};
use crate::persistence::ProjectPersistence;
use crate::pipeline::UpdatePipeline;
use crate::session::Session;
use anyhow::Context;
use axum::Router;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Backend de generación (opcional)
    let generator: Option<Arc<dyn TextGenerator>> = match LlmManager::from_config(&cfg) {
        Some(manager) => {
            info!("Backend de generación: {:?} ({})", manager.provider, manager.chat_model);
            let manager: Arc<dyn TextGenerator> = Arc::new(manager);
            Some(manager)
        }
        None => {
            warn!("Sin backend de generación: las respuestas serán de reemplazo.");
            None
        }
    };

    // 4. Sesión, canal de actualizaciones y aplicador único
    let session = Arc::new(Session::new(
        ProjectPersistence::new(&cfg.projects_dir),
        LayoutPlanner::default(),
    ));
    let (pipeline, receiver) =
        UpdatePipeline::new(session.clone(), generator, cfg.update_queue_capacity);
    let applier = pipeline::spawn_applier(session.clone(), receiver);

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        session,
        pipeline,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!(
        "🚀 Servidor escuchando en http://{} (proyectos en {})",
        server_addr,
        app_state.config.projects_dir.display()
    );

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor")?;

    // Las generaciones pendientes ya no se consumen.
    drop(app_state);
    applier.abort();

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
