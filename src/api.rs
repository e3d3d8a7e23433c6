use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::{
    app_state::{AppState, Status},
    error::DialogueError,
    models::{NodeData, Position, ProjectSummary},
    persistence::SaveReport,
    pipeline::GenerationRequest,
    session::TreeView,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads de la API ---

#[derive(Deserialize)]
pub struct SendPayload {
    question: String,
    /// Si falta, se usa el origen de rama actual.
    #[serde(default)]
    parent_id: Option<String>,
}

#[derive(Deserialize)]
pub struct BranchSourcePayload {
    #[serde(default)]
    node_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ExpandedPayload {
    expanded: bool,
}

#[derive(Deserialize)]
pub struct OpenProjectPayload {
    project_id: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/tree", get(tree_handler))
        .route("/api/send", post(send_handler))
        .route("/api/branch-source", post(branch_source_handler))
        .route("/api/nodes/:id", get(node_handler).delete(delete_node_handler))
        .route("/api/nodes/:id/position", post(position_handler))
        .route("/api/nodes/:id/expanded", post(expanded_handler))
        .route("/api/projects", get(list_projects_handler))
        .route("/api/project/new", post(new_project_handler))
        .route("/api/project/open", post(open_project_handler))
        .route("/api/project/save", post(save_project_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status())
}

#[axum::debug_handler]
async fn tree_handler(State(state): State<AppState>) -> Json<TreeView> {
    Json(state.session.tree_view())
}

#[axum::debug_handler]
async fn node_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NodeData>, ApiError> {
    state
        .session
        .node(&id)
        .map(Json)
        .ok_or_else(|| node_not_found(&id))
}

#[axum::debug_handler]
async fn send_handler(
    State(state): State<AppState>,
    Json(payload): Json<SendPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.question.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Escriba una pregunta."})),
        ));
    }

    let parent_id = match payload.parent_id.filter(|p| !p.is_empty()) {
        Some(id) if !state.session.store().contains(&id) => return Err(node_not_found(&id)),
        Some(id) => Some(id),
        None => state.session.branch_source(),
    };

    info!(parent_id = ?parent_id, "Pregunta recibida: {}", payload.question);
    state.session.set_status("Generando respuesta...");
    state.pipeline.dispatch(GenerationRequest {
        question: payload.question,
        parent_id: parent_id.clone(),
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Generación en curso.", "parent_id": parent_id })),
    ))
}

#[axum::debug_handler]
async fn branch_source_handler(
    State(state): State<AppState>,
    Json(payload): Json<BranchSourcePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let node_id = payload.node_id.filter(|id| !id.is_empty());
    let session = state.session.clone();
    let requested = node_id.clone();
    let accepted = run_blocking(move || session.set_branch_source(requested.as_deref())).await?;
    if !accepted {
        return Err(node_not_found(node_id.as_deref().unwrap_or_default()));
    }
    Ok(Json(json!({ "branch_source": node_id })))
}

#[axum::debug_handler]
async fn delete_node_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.session.clone();
    let removed = run_blocking(move || session.delete_node(&id)).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[axum::debug_handler]
async fn position_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(position): Json<Position>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.session.move_node(&id, position) {
        return Err(node_not_found(&id));
    }
    Ok(StatusCode::OK)
}

#[axum::debug_handler]
async fn expanded_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ExpandedPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.session.set_expanded(&id, payload.expanded) {
        return Err(node_not_found(&id));
    }
    Ok(StatusCode::OK)
}

#[axum::debug_handler]
async fn list_projects_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProjectSummary>>, ApiError> {
    let session = state.session.clone();
    run_blocking(move || session.list_projects())
        .await?
        .map(Json)
        .map_err(|e| dialogue_error(&e))
}

#[axum::debug_handler]
async fn new_project_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let session = state.session.clone();
    run_blocking(move || session.new_project()).await?;
    Ok(StatusCode::OK)
}

#[axum::debug_handler]
async fn open_project_handler(
    State(state): State<AppState>,
    Json(payload): Json<OpenProjectPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.session.clone();
    let identity = run_blocking(move || session.open_project(&payload.project_id))
        .await?
        .map_err(|e| dialogue_error(&e))?;
    Ok(Json(identity))
}

#[axum::debug_handler]
async fn save_project_handler(
    State(state): State<AppState>,
) -> Result<Json<SaveReport>, ApiError> {
    let session = state.session.clone();
    run_blocking(move || session.save_project())
        .await?
        .map(Json)
        .map_err(|e| dialogue_error(&e))
}

// --- Handler de Apagado y Utilidades ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

/// Las operaciones de sesión que tocan disco van al pool de bloqueo.
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("Tarea bloqueante fallida: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Error interno."})),
        )
    })
}

fn node_not_found(id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("El nodo '{}' no existe.", id)})),
    )
}

fn dialogue_error(err: &DialogueError) -> ApiError {
    let status = match err {
        DialogueError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
        DialogueError::InvalidId(_) => StatusCode::BAD_REQUEST,
        DialogueError::NoProject | DialogueError::DuplicateNode(_) => StatusCode::CONFLICT,
        DialogueError::Parse { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        DialogueError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.to_string()})))
}
