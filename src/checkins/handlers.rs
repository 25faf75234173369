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
pub struct CreateCheckinRequest {
    pub mood: i64,
    pub note: Option<String>,
}

pub async fn create_checkin(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Json(body): Json<CreateCheckinRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let outcome = ctx
        .pipeline
        .record_checkin(&principal, body.mood, body.note.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "checkin": outcome.checkin,
            "wellness_level": outcome.wellness_level,
        })),
    ))
}

pub async fn list_my_checkins(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    let checkins = ctx.pipeline.list_own(&principal).await?;
    Ok(Json(json!({ "checkins": checkins })))
}

pub async fn list_requester_checkins(
    State(ctx): State<Arc<AppContext>>,
    principal: Principal,
    Path(requester_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let checkins = ctx
        .pipeline
        .list_for_requester(&requester_id, &principal)
        .await?;
    Ok(Json(json!({ "checkins": checkins })))
}
