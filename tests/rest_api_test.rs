//! REST surface round-trips: status codes and role gates over a real
//! listener, driven with a plain HTTP client.

use std::sync::Arc;

use havend::{
    build_context_with_classifier, config::HavenConfig, risk::DisabledClassifier, AppContext,
};
use serde_json::{json, Value};

async fn start_test_server() -> (String, Arc<AppContext>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = HavenConfig::new(
        None,
        Some(dir.path().to_path_buf()),
        Some("warn".to_string()),
        None,
    );
    let ctx = build_context_with_classifier(config, Arc::new(DisabledClassifier))
        .await
        .unwrap();

    let router = havend::rest::build_router(ctx.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    (format!("http://{addr}"), ctx, dir)
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

trait WithActor {
    fn actor(self, id: &str, role: &str) -> Self;
}

impl WithActor for reqwest::RequestBuilder {
    fn actor(self, id: &str, role: &str) -> Self {
        self.header("x-actor-id", id).header("x-actor-role", role)
    }
}

#[tokio::test]
async fn health_needs_no_principal() {
    let (base, _ctx, _dir) = start_test_server().await;
    let resp = client()
        .get(format!("{base}/api/v1/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_principal_is_unauthorized() {
    let (base, _ctx, _dir) = start_test_server().await;
    let resp = client()
        .post(format!("{base}/api/v1/sessions"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client()
        .post(format!("{base}/api/v1/sessions"))
        .actor("r1", "superuser")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn session_create_conflict_and_assignment_codes() {
    let (base, _ctx, _dir) = start_test_server().await;

    // 201 on first create.
    let resp = client()
        .post(format!("{base}/api/v1/sessions"))
        .actor("r1", "requester")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let session: Value = resp.json().await.unwrap();
    let session_id = session["id"].as_str().unwrap().to_string();
    assert_eq!(session["status"], "waiting");

    // 400 on the second open session.
    let resp = client()
        .post(format!("{base}/api/v1/sessions"))
        .actor("r1", "requester")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Counselors cannot open sessions.
    let resp = client()
        .post(format!("{base}/api/v1/sessions"))
        .actor("c1", "counselor")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Assignment is admin-gated, and 503 while no counselor is available.
    let resp = client()
        .post(format!("{base}/api/v1/sessions/{session_id}/assign"))
        .actor("r1", "requester")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let resp = client()
        .post(format!("{base}/api/v1/sessions/{session_id}/assign"))
        .actor("a1", "admin")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    // Register a counselor (self-service), then assignment succeeds.
    let resp = client()
        .put(format!("{base}/api/v1/counselors/c1/availability"))
        .actor("c1", "counselor")
        .json(&json!({ "available": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client()
        .post(format!("{base}/api/v1/sessions/{session_id}/assign"))
        .actor("a1", "admin")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["session"]["counselor_id"], "c1");

    // Assigning a non-waiting session is 400; an unknown id is 404.
    let resp = client()
        .post(format!("{base}/api/v1/sessions/{session_id}/assign"))
        .actor("a1", "admin")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let resp = client()
        .post(format!("{base}/api/v1/sessions/nope/assign"))
        .actor("a1", "admin")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn messaging_codes_follow_the_gate() {
    let (base, ctx, _dir) = start_test_server().await;

    let resp = client()
        .post(format!("{base}/api/v1/sessions"))
        .actor("r1", "requester")
        .send()
        .await
        .unwrap();
    let session: Value = resp.json().await.unwrap();
    let session_id = session["id"].as_str().unwrap().to_string();

    // Sending into a waiting session is an invalid-state 400.
    let resp = client()
        .post(format!("{base}/api/v1/sessions/{session_id}/messages"))
        .actor("r1", "requester")
        .json(&json!({ "content": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Unknown session is 404.
    let resp = client()
        .post(format!("{base}/api/v1/sessions/absent/messages"))
        .actor("r1", "requester")
        .json(&json!({ "content": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Activate via counselor self-claim, then messaging flows.
    ctx.storage.upsert_counselor("c1", true).await.unwrap();
    let resp = client()
        .post(format!("{base}/api/v1/sessions/{session_id}/activate"))
        .actor("c1", "counselor")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client()
        .post(format!("{base}/api/v1/sessions/{session_id}/messages"))
        .actor("r1", "requester")
        .json(&json!({ "content": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let message: Value = resp.json().await.unwrap();
    let message_id = message["id"].as_str().unwrap().to_string();

    // Empty content is a validation 400.
    let resp = client()
        .post(format!("{base}/api/v1/sessions/{session_id}/messages"))
        .actor("c1", "counselor")
        .json(&json!({ "content": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Outsiders get 403 on fetch.
    let resp = client()
        .get(format!("{base}/api/v1/sessions/{session_id}/messages"))
        .actor("r2", "requester")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let resp = client()
        .get(format!("{base}/api/v1/sessions/{session_id}/messages"))
        .actor("c1", "counselor")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);

    // Only the author deletes their message.
    let resp = client()
        .delete(format!("{base}/api/v1/messages/{message_id}"))
        .actor("c1", "counselor")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let resp = client()
        .delete(format!("{base}/api/v1/messages/{message_id}"))
        .actor("r1", "requester")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn checkins_flags_and_notifications_round_trip() {
    let (base, _ctx, _dir) = start_test_server().await;

    // 201 with the recomputed wellness level; classifier is disabled so the
    // deterministic path carries everything.
    let resp = client()
        .post(format!("{base}/api/v1/checkins"))
        .actor("r1", "requester")
        .json(&json!({ "mood": 1, "note": "rough day" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["wellness_level"], 1);

    // Out-of-range mood is a validation 400.
    let resp = client()
        .post(format!("{base}/api/v1/checkins"))
        .actor("r1", "requester")
        .json(&json!({ "mood": 9 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Own history for the requester; staff endpoint for others.
    let resp = client()
        .get(format!("{base}/api/v1/checkins"))
        .actor("r1", "requester")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client()
        .get(format!("{base}/api/v1/checkins/r1"))
        .actor("c1", "counselor")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client()
        .get(format!("{base}/api/v1/checkins/r1"))
        .actor("r2", "requester")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Safety flags are staff-only.
    let resp = client()
        .get(format!("{base}/api/v1/safety-flags"))
        .actor("r1", "requester")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let resp = client()
        .get(format!("{base}/api/v1/safety-flags/r1"))
        .actor("c1", "counselor")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["flags"].as_array().unwrap().len(), 1);
    assert_eq!(body["flags"][0]["flag_type"], "rule");

    // The pending-session announcement reaches any counselor.
    client()
        .post(format!("{base}/api/v1/sessions"))
        .actor("r1", "requester")
        .send()
        .await
        .unwrap();
    let resp = client()
        .get(format!("{base}/api/v1/notifications"))
        .actor("c9", "counselor")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let kinds: Vec<_> = body["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["kind"].as_str().unwrap().to_string())
        .collect();
    assert!(kinds.contains(&"session_pending".to_string()));

    let notification_id = body["notifications"][0]["id"].as_str().unwrap().to_string();
    // A requester who didn't send it cannot delete it.
    let resp = client()
        .delete(format!("{base}/api/v1/notifications/{notification_id}"))
        .actor("r2", "requester")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    // Staff can.
    let resp = client()
        .delete(format!("{base}/api/v1/notifications/{notification_id}"))
        .actor("c9", "counselor")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn assistant_status_reports_without_secrets() {
    let (base, _ctx, _dir) = start_test_server().await;
    let resp = client()
        .get(format!("{base}/api/v1/assist/status"))
        .actor("r1", "requester")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["key_configured"], false);

    // Admins are not assistant users.
    let resp = client()
        .post(format!("{base}/api/v1/assist/chat"))
        .actor("a1", "admin")
        .json(&json!({ "message": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Unconfigured upstream surfaces as a dependency failure.
    let resp = client()
        .post(format!("{base}/api/v1/assist/chat"))
        .actor("r1", "requester")
        .json(&json!({ "message": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
}
