//! Identity management endpoints. Tokens are accepted but never echoed back.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::AppError;
use super::AppState;
use crate::github::auth::AuthKind;

#[derive(Debug, Deserialize)]
pub struct AddTokenRequest {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdentityRequest {
    #[serde(default)]
    pub id: Option<String>,
}

async fn add_token(state: &AppState, kind: AuthKind, req: AddTokenRequest) -> Result<Json<Value>, AppError> {
    let token = req
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Token required".to_string()))?;
    let id = req
        .id
        .unwrap_or_else(|| format!("{}_{}", kind.as_str(), state.auth.len()));

    state.auth.add(&id, kind, &token, Value::Null).await?;
    Ok(Json(json!({ "status": "success", "id": id })))
}

/// POST /auth/pat - Register a personal access token
pub async fn add_pat(
    State(state): State<AppState>,
    Json(req): Json<AddTokenRequest>,
) -> Result<Json<Value>, AppError> {
    add_token(&state, AuthKind::Pat, req).await
}

/// POST /auth/app - Register a GitHub App installation token
pub async fn add_app(
    State(state): State<AppState>,
    Json(req): Json<AddTokenRequest>,
) -> Result<Json<Value>, AppError> {
    add_token(&state, AuthKind::App, req).await
}

fn required_id(req: IdentityRequest) -> Result<String, AppError> {
    req.id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("id required".to_string()))
}

/// POST /auth/switch - Make another identity active
pub async fn switch(
    State(state): State<AppState>,
    Json(req): Json<IdentityRequest>,
) -> Result<Json<Value>, AppError> {
    let id = required_id(req)?;
    state.auth.switch(&id).await?;
    Ok(Json(json!({ "status": "success", "active": id })))
}

/// POST /auth/remove - Forget an identity
pub async fn remove(
    State(state): State<AppState>,
    Json(req): Json<IdentityRequest>,
) -> Result<Json<Value>, AppError> {
    let id = required_id(req)?;
    state.auth.remove(&id).await?;
    Ok(Json(json!({ "status": "success", "removed": id })))
}

/// GET /auth/identities - Known identities without their tokens
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let active = state.auth.active().await.map(|i| i.id.clone());
    Json(json!({
        "active": active,
        "identities": state.auth.list().await,
    }))
}
