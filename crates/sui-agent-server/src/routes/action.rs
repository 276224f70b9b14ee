use crate::error::ApiError;
use crate::state::AppState;
use axum::{extract::State, routing::post, Json, Router};
use sui_agent::action::{ActionRequest, ActionResponse};

async fn handler(
    State(state): State<AppState>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    state.actions.execute(&request).map(Json).map_err(|e| {
        tracing::error!("Action {} failed: {}", request.action, e);
        ApiError::unknown(format!("Action failed: {}", e))
    })
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/execute_action", post(handler))
        .with_state(state)
}
