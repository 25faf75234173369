// rest/mod.rs — Role-gated REST surface.
//
// Axum HTTP server; the realtime channel runs on its own listener
// (messaging::ws). Every route except /api/v1/health requires a verified
// principal injected by the fronting identity service.

use anyhow::Result;
use axum::{
    extract::State,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::{assistant, checkins, messaging, notifications, safety, sessions, AppContext};

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health (no principal)
        .route("/api/v1/health", get(health))
        // Sessions
        .route(
            "/api/v1/sessions",
            get(sessions::handlers::list_sessions).post(sessions::handlers::create_session),
        )
        .route(
            "/api/v1/sessions/{id}",
            delete(sessions::handlers::delete_session),
        )
        .route(
            "/api/v1/sessions/{id}/assign",
            post(sessions::handlers::assign_session),
        )
        .route(
            "/api/v1/sessions/{id}/activate",
            post(sessions::handlers::activate_session),
        )
        .route(
            "/api/v1/sessions/{id}/end",
            post(sessions::handlers::end_session),
        )
        // Messages
        .route(
            "/api/v1/sessions/{id}/messages",
            get(messaging::handlers::list_messages).post(messaging::handlers::send_message),
        )
        .route(
            "/api/v1/messages/{id}",
            delete(messaging::handlers::delete_message),
        )
        // Check-ins
        .route(
            "/api/v1/checkins",
            get(checkins::handlers::list_my_checkins).post(checkins::handlers::create_checkin),
        )
        .route(
            "/api/v1/checkins/{requester_id}",
            get(checkins::handlers::list_requester_checkins),
        )
        // Safety flags (staff)
        .route("/api/v1/safety-flags", get(safety::list_safety_flags))
        .route(
            "/api/v1/safety-flags/{requester_id}",
            get(safety::list_requester_safety_flags),
        )
        // Notifications
        .route(
            "/api/v1/notifications",
            get(notifications::handlers::list_notifications),
        )
        .route(
            "/api/v1/notifications/{id}",
            delete(notifications::handlers::delete_notification),
        )
        // Counselor roster
        .route(
            "/api/v1/counselors/{id}/availability",
            put(sessions::handlers::set_availability),
        )
        // Support assistant
        .route("/api/v1/assist/chat", post(assistant::handlers::chat))
        .route("/api/v1/assist/status", get(assistant::handlers::status))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": ctx.started_at.elapsed().as_secs(),
    }))
}
