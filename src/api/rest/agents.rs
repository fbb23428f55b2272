use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::rest::extract::AuthUser;
use crate::engine::{accounts, analytics};
use crate::error::AppError;
use crate::models::user::{Role, User};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents", get(list_agents))
        .route("/agents/:agent_id/status", patch(update_agent_status))
        .route("/admin/users", get(list_users))
        .route("/admin/analytics", get(dashboard))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusRequest {
    pub is_active: bool,
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<User>>, AppError> {
    auth.require(&[Role::Admin])?;
    Ok(Json(accounts::list_users(&state, Some(Role::Agent)).await?))
}

async fn update_agent_status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<AgentStatusRequest>,
) -> Result<Json<Value>, AppError> {
    auth.require(&[Role::Admin])?;
    let agent = accounts::set_agent_active(&state, agent_id, payload.is_active).await?;

    Ok(Json(json!({
        "message": "Agent status updated successfully",
        "agent": agent,
    })))
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<User>>, AppError> {
    auth.require(&[Role::Admin])?;
    Ok(Json(accounts::list_users(&state, None).await?))
}

async fn dashboard(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<analytics::Analytics>, AppError> {
    auth.require(&[Role::Admin])?;
    Ok(Json(analytics::dashboard(&state).await?))
}
