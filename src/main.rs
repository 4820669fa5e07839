// Módulos de la aplicación
mod agent;
mod api;
mod app_state;
mod config;
mod documents;
mod error;
mod indexing;
mod llm;
mod models;
mod neo4j_client;
mod retriever;
mod tools;
mod vector_store;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    app_state::AppState,
    indexing::{IndexBuilder, IndexRegistry},
    llm::LlmManager,
    neo4j_client::Neo4jStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Neo4j y LLM se inicializan de forma perezosa en el primer uso
    let store = Arc::new(Neo4jStore::new(cfg.clone()));
    let llm_manager = Arc::new(LlmManager::from_config(&cfg));
    info!(
        "LLM: {:?} (chat: {}, embeddings: {})",
        llm_manager.provider, llm_manager.chat_model, llm_manager.embedding_model
    );

    // 4. Registro del índice de películas
    let builder = IndexBuilder::from_config(&cfg, Arc::clone(&store), llm_manager.clone());
    let registry = Arc::new(IndexRegistry::new(builder, cfg.index_use_existing));

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState::new(cfg.clone(), store, registry, llm_manager, Some(shutdown_tx));

    if cfg.warm_index_on_start {
        api::spawn_index_job(app_state.clone(), None);
    }

    // 6. Configurar el router de la API
    let app = Router::new().merge(api::create_router(app_state)).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
