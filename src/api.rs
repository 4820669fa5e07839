use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use neo4rs::query;
use serde::{Deserialize, Serialize};
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use tokio::spawn;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use crate::{
    agent::{AgentState, TurnReport},
    app_state::{AppState, Status},
    error::Error,
    models::{ChatMessage, MovieSummary},
    retriever::{RetrievalFilters, RetrievalOutcome},
    tools::{MovieTools, RetrieveMoviesArgs, SearchByFiltersArgs},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    session_id: Option<Uuid>,
    message: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    session_id: Uuid,
    state: AgentState,
    #[serde(flatten)]
    report: TurnReport,
}

#[derive(Serialize)]
pub struct SessionResponse {
    session_id: Uuid,
    state: AgentState,
    history: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct RetrievalResponse {
    query: Option<String>,
    display_text: String,
    no_match: bool,
    filters: RetrievalFilters,
    candidates: Vec<MovieSummary>,
}

impl From<RetrievalOutcome> for RetrievalResponse {
    fn from(outcome: RetrievalOutcome) -> Self {
        Self {
            query: outcome.query().map(str::to_string),
            display_text: outcome.display_text(),
            no_match: outcome.is_no_match(),
            filters: outcome.filters().clone(),
            candidates: outcome.summaries(),
        }
    }
}

#[derive(Deserialize)]
pub struct RebuildPayload {
    #[serde(default)]
    use_existing: bool,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/sessions/:id", get(get_session_handler).delete(delete_session_handler))
        .route("/api/sessions/:id/reset", post(reset_session_handler))
        .route("/api/retrieve", post(retrieve_handler))
        .route("/api/search", post(search_handler))
        .route("/api/index/rebuild", post(rebuild_handler))
        .route("/api/status", get(status_handler))
        .route("/api/neo4j-info", get(neo4j_info_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

fn error_response(err: &Error) -> ApiError {
    let status = match err {
        Error::EmptyCorpus | Error::IndexUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

fn session_not_found(id: Uuid) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Sesión {id} no encontrada.") })),
    )
}

// --- Handlers ---

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Json<ChatResponse> {
    let (session_id, session) = state.session(payload.session_id);
    let mut agent = session.lock().await;
    let report = agent.handle_turn(&payload.message).await;
    Json(ChatResponse {
        session_id,
        state: agent.state(),
        report,
    })
}

#[axum::debug_handler]
async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.find_session(&id).ok_or_else(|| session_not_found(id))?;
    let agent = session.lock().await;
    Ok(Json(SessionResponse {
        session_id: id,
        state: agent.state(),
        history: agent.history().to_vec(),
    }))
}

#[axum::debug_handler]
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.remove_session(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found(id))
    }
}

#[axum::debug_handler]
async fn reset_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.find_session(&id).ok_or_else(|| session_not_found(id))?;
    let mut agent = session.lock().await;
    agent.reset();
    agent.start();
    Ok(Json(SessionResponse {
        session_id: id,
        state: agent.state(),
        history: agent.history().to_vec(),
    }))
}

#[axum::debug_handler]
async fn retrieve_handler(
    State(state): State<AppState>,
    Json(args): Json<RetrieveMoviesArgs>,
) -> Result<Json<RetrievalResponse>, ApiError> {
    let tools = MovieTools::new(state.registry.clone(), state.config.retriever.clone());
    match tools.retrieve_movies(args).await {
        Ok(outcome) => Ok(Json(outcome.into())),
        Err(e) => {
            error!("Error en /api/retrieve: {e}");
            Err(error_response(&e))
        }
    }
}

#[axum::debug_handler]
async fn search_handler(
    State(state): State<AppState>,
    Json(args): Json<SearchByFiltersArgs>,
) -> Result<Json<RetrievalResponse>, ApiError> {
    let tools = MovieTools::new(state.registry.clone(), state.config.retriever.clone());
    match tools.search_by_filters(args).await {
        Ok(outcome) => Ok(Json(outcome.into())),
        Err(e) => {
            error!("Error en /api/search: {e}");
            Err(error_response(&e))
        }
    }
}

#[axum::debug_handler]
async fn rebuild_handler(
    State(state): State<AppState>,
    payload: Option<Json<RebuildPayload>>,
) -> Result<StatusCode, ApiError> {
    let use_existing = payload.map(|Json(p)| p.use_existing).unwrap_or(false);
    if spawn_index_job(state, Some(use_existing)) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": "Ya hay una indexación en curso." })),
        ))
    }
}

/// Lanza la construcción del índice en segundo plano, publicando el progreso
/// en `Status`. Con `use_existing = None` se usa la inicialización perezosa
/// del registro (arranque); con `Some(_)`, una reconstrucción explícita.
/// Devuelve `false` si ya había un trabajo en curso.
pub fn spawn_index_job(state: AppState, use_existing: Option<bool>) -> bool {
    {
        let mut status = state.status.lock().unwrap();
        if status.is_busy {
            return false;
        }
        *status = Status {
            is_busy: true,
            message: "Construyendo el índice de películas...".to_string(),
            updated_at: chrono::Utc::now(),
        };
    }

    spawn(async move {
        let registry = state.registry.clone();
        let job = async move {
            match use_existing {
                Some(use_existing) => registry.rebuild(use_existing).await,
                None => match registry.current().await {
                    Ok(_) => Ok(registry.last_summary().unwrap_or_default()),
                    Err(e) => Err(e),
                },
            }
        };

        match AssertUnwindSafe(job).catch_unwind().await {
            Ok(Ok(summary)) => {
                info!("{summary}");
                state.set_status(false, format!("¡Índice listo! {summary}"));
            }
            Ok(Err(err)) => {
                error!("Error de indexación: {err}");
                state.set_status(false, format!("Error en la indexación: {err}"));
            }
            Err(_) => {
                error!("Pánico durante la indexación.");
                state.set_status(false, "Error interno en la indexación; el índice anterior sigue activo.");
            }
        }
    });

    true
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.status.lock().unwrap().clone();
    let index = state.registry.active().map(|index| {
        json!({
            "name": index.name(),
            "backend": format!("{:?}", index.backend()),
            "documents": index.len(),
            "edges": index.edges().map(|g| g.edge_count()).unwrap_or(0),
            "edge_fields": index.edges().map(|g| format!("{:?}", g.fields())),
            "built_at": index.built_at(),
        })
    });
    Json(json!({
        "status": status,
        "index": index,
        "last_build": state.registry.last_summary(),
        "sessions": state.session_count(),
    }))
}

#[axum::debug_handler]
async fn neo4j_info_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let browser_url = match Url::parse(&state.config.neo4j_uri) {
        Ok(mut url) => {
            let _ = url.set_scheme("http");
            let _ = url.set_port(Some(7474));
            url.to_string()
        }
        Err(_) => "http://localhost:7474".to_string(),
    };

    let graph = state.store.graph().await.map_err(|e| error_response(&e))?;
    match graph.run(query("RETURN 1")).await {
        Ok(_) => Ok(Json(json!({ "status": "ok", "browser_url": browser_url }))),
        Err(e) => {
            error!("Error en el health check de Neo4j: {}", e);
            Err(error_response(&Error::Graph(e)))
        }
    }
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
