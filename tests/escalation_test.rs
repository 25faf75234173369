//! Escalation pipeline properties: the deterministic path must hold with the
//! classifier disabled, unreachable, or slow.

use std::sync::Arc;

use havend::{
    build_context_with_classifier,
    config::HavenConfig,
    identity::{Principal, Role},
    risk::{DisabledClassifier, HttpRiskClassifier, RiskClassifier},
    AppContext,
};

async fn context_with(
    classifier: Arc<dyn RiskClassifier>,
) -> (Arc<AppContext>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = HavenConfig::new(
        None,
        Some(dir.path().to_path_buf()),
        Some("warn".to_string()),
        None,
    );
    let ctx = build_context_with_classifier(config, classifier)
        .await
        .unwrap();
    (ctx, dir)
}

/// A classifier pointed at a reserved TEST-NET address with a one-second
/// budget — every call times out or fails to connect.
fn unreachable_classifier() -> Arc<dyn RiskClassifier> {
    Arc::new(
        HttpRiskClassifier::new(
            "http://192.0.2.1:9/v1/chat/completions".to_string(),
            "test-key".to_string(),
            "test-model".to_string(),
            1,
        )
        .unwrap(),
    )
}

fn requester(id: &str) -> Principal {
    Principal::new(id, Role::Requester)
}

#[tokio::test]
async fn lowest_mood_flags_regardless_of_classifier_availability() {
    for classifier in [
        Arc::new(DisabledClassifier) as Arc<dyn RiskClassifier>,
        unreachable_classifier(),
    ] {
        let (ctx, _dir) = context_with(classifier).await;
        let outcome = ctx
            .pipeline
            .record_checkin(&requester("r1"), 1, Some("rough day"))
            .await
            .unwrap();

        let flag = outcome.rule_flag.expect("deterministic flag");
        assert_eq!(flag.flag_type, "rule");
        assert!(outcome.classifier_flag.is_none());

        let flags = ctx.storage.list_safety_flags_for("r1").await.unwrap();
        assert_eq!(flags.len(), 1);
    }
}

#[tokio::test]
async fn unreachable_classifier_still_persists_checkin_and_wellness() {
    let (ctx, _dir) = context_with(unreachable_classifier()).await;

    let outcome = ctx
        .pipeline
        .record_checkin(&requester("r1"), 4, Some("a long journal note"))
        .await
        .unwrap();

    // Check-in persisted, wellness computed from the deterministic path alone.
    assert_eq!(outcome.wellness_level, 4);
    assert!(outcome.rule_flag.is_none());
    assert!(outcome.classifier_flag.is_none());

    let history = ctx.pipeline.list_own(&requester("r1")).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].mood, 4);

    let row = ctx.storage.get_requester("r1").await.unwrap().unwrap();
    assert_eq!(row.wellness_level, 4);
}

#[tokio::test]
async fn repeated_low_moods_flag_without_any_single_minimum() {
    let (ctx, _dir) = context_with(Arc::new(DisabledClassifier)).await;

    let first = ctx
        .pipeline
        .record_checkin(&requester("r1"), 2, None)
        .await
        .unwrap();
    assert!(first.rule_flag.is_none());

    let second = ctx
        .pipeline
        .record_checkin(&requester("r1"), 2, None)
        .await
        .unwrap();
    assert!(second.rule_flag.is_some(), "second low mood within window flags");
}

#[tokio::test]
async fn checkin_updates_the_session_snapshot_source() {
    let (ctx, _dir) = context_with(Arc::new(DisabledClassifier)).await;
    ctx.storage.upsert_counselor("c1", true).await.unwrap();

    ctx.pipeline
        .record_checkin(&requester("r1"), 2, None)
        .await
        .unwrap();

    // A session created after the check-in snapshots the updated level.
    let session = ctx.engine.create(&requester("r1")).await.unwrap();
    assert_eq!(session.initial_wellness, 2);
}

#[tokio::test]
async fn staff_read_flags_and_checkins_requesters_do_not() {
    use havend::errors::ApiError;

    let (ctx, _dir) = context_with(Arc::new(DisabledClassifier)).await;
    ctx.pipeline
        .record_checkin(&requester("r1"), 1, None)
        .await
        .unwrap();

    let counselor = Principal::new("c1", Role::Counselor);
    let flags = ctx.storage.list_safety_flags_for("r1").await.unwrap();
    assert_eq!(flags.len(), 1);

    let listed = ctx
        .pipeline
        .list_for_requester("r1", &counselor)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    let err = ctx
        .pipeline
        .list_for_requester("r1", &requester("r2"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Authorization(_)));
}
