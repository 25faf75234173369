use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::ApiError;
use crate::identity::{Principal, Role};
use crate::AppContext;

pub async fn create_session(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let session = ctx.engine.create(&principal).await?;
    Ok((StatusCode::CREATED, Json(json!(session))))
}

pub async fn list_sessions(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    let sessions = ctx.engine.list(&principal).await?;
    Ok(Json(json!({ "sessions": sessions })))
}

pub async fn delete_session(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = ctx.engine.delete(&session_id, &principal).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

pub async fn assign_session(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if principal.role != Role::Admin {
        return Err(ApiError::Authorization(
            "Only admins can trigger assignment".to_string(),
        ));
    }
    let session = ctx.engine.auto_assign(&session_id).await?;
    Ok(Json(json!({ "session": session })))
}

pub async fn activate_session(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = ctx.engine.activate(&session_id, &principal).await?;
    Ok(Json(json!({ "session": session })))
}

pub async fn end_session(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = ctx.engine.end(&session_id, &principal).await?;
    Ok(Json(json!({ "session": session })))
}

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
}

pub async fn set_availability(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Path(counselor_id): Path<String>,
    Json(body): Json<AvailabilityRequest>,
) -> Result<Json<Value>, ApiError> {
    let counselor = ctx
        .engine
        .set_counselor_availability(&counselor_id, body.available, &principal)
        .await?;
    Ok(Json(json!({ "counselor": counselor })))
}
