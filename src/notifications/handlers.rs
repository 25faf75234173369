use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::ApiError;
use crate::identity::Principal;
use crate::AppContext;

pub async fn list_notifications(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    let notifications = ctx.notifier.list(&principal).await?;
    Ok(Json(json!({ "notifications": notifications })))
}

pub async fn delete_notification(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Path(notification_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = ctx.notifier.delete(&notification_id, &principal).await?;
    Ok(Json(json!({ "deleted": deleted })))
}
