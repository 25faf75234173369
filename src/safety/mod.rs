//! Safety-flag audit surface. Flags are append-only records written by the
//! escalation pipeline; this module only exposes the staff-scoped reads.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::ApiError;
use crate::identity::Principal;
use crate::AppContext;

fn require_staff(principal: &Principal) -> Result<(), ApiError> {
    if principal.role.is_staff() {
        Ok(())
    } else {
        Err(ApiError::Authorization(
            "Safety flags are visible to staff only".to_string(),
        ))
    }
}

pub async fn list_safety_flags(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    require_staff(&principal)?;
    let flags = ctx.storage.list_safety_flags_all().await?;
    Ok(Json(json!({ "flags": flags })))
}

pub async fn list_requester_safety_flags(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Path(requester_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_staff(&principal)?;
    let flags = ctx.storage.list_safety_flags_for(&requester_id).await?;
    Ok(Json(json!({ "flags": flags })))
}
