use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::assistant::HistoryTurn;
use crate::errors::ApiError;
use crate::identity::{Principal, Role};
use crate::AppContext;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
}

pub async fn chat(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Json(body): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    if principal.role == Role::Admin {
        return Err(ApiError::Authorization(
            "The support assistant serves requesters and counselors".to_string(),
        ));
    }
    let response = ctx.assistant.chat(&body.message, &body.history).await?;
    Ok(Json(json!({ "status": "success", "response": response })))
}

pub async fn status(
    State(ctx): State<Arc<AppContext>>,
    _principal: Principal,
) -> Json<Value> {
    Json(ctx.assistant.status())
}
