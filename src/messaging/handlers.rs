use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::ApiError;
use crate::identity::Principal;
use crate::AppContext;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

pub async fn send_message(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Path(session_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let message = ctx
        .gateway
        .send(&session_id, &principal, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(json!(message))))
}

pub async fn list_messages(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let messages = ctx.gateway.fetch(&session_id, &principal).await?;
    Ok(Json(json!({ "messages": messages })))
}

pub async fn delete_message(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Path(message_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = ctx.gateway.delete(&message_id, &principal).await?;
    Ok(Json(json!({ "deleted": deleted })))
}
