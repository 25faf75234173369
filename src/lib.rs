pub mod assistant;
pub mod checkins;
pub mod config;
pub mod errors;
pub mod identity;
pub mod messaging;
pub mod notifications;
pub mod rest;
pub mod risk;
pub mod safety;
pub mod sessions;
pub mod storage;

use std::sync::Arc;

use assistant::SupportAssistant;
use checkins::EscalationPipeline;
use config::HavenConfig;
use messaging::{MessagingGateway, RoomRegistry};
use notifications::Notifier;
use risk::{classifier_from_config, RiskClassifier};
use sessions::SessionEngine;
use storage::Storage;

/// Shared application state passed to every request handler and the
/// realtime listener.
pub struct AppContext {
    pub config: Arc<HavenConfig>,
    pub storage: Arc<Storage>,
    pub rooms: Arc<RoomRegistry>,
    pub notifier: Arc<Notifier>,
    pub engine: Arc<SessionEngine>,
    pub gateway: Arc<MessagingGateway>,
    pub pipeline: Arc<EscalationPipeline>,
    pub assistant: Arc<SupportAssistant>,
    pub started_at: std::time::Instant,
}

/// Wire the full context together. The classifier seam is injectable so
/// tests can pin a deterministic verdict.
pub async fn build_context(config: HavenConfig) -> anyhow::Result<Arc<AppContext>> {
    let classifier = classifier_from_config(&config);
    build_context_with_classifier(config, classifier).await
}

pub async fn build_context_with_classifier(
    config: HavenConfig,
    classifier: Arc<dyn RiskClassifier>,
) -> anyhow::Result<Arc<AppContext>> {
    let config = Arc::new(config);
    let storage = Arc::new(Storage::new(&config.data_dir).await?);
    let rooms = Arc::new(RoomRegistry::new());
    let notifier = Arc::new(Notifier::new(storage.clone()));
    let engine = Arc::new(SessionEngine::new(storage.clone(), notifier.clone()));
    let gateway = Arc::new(MessagingGateway::new(
        storage.clone(),
        notifier.clone(),
        rooms.clone(),
    ));
    let pipeline = Arc::new(EscalationPipeline::new(
        storage.clone(),
        classifier,
        config.escalation.clone(),
    ));
    let assistant = Arc::new(SupportAssistant::new(&config)?);

    Ok(Arc::new(AppContext {
        config,
        storage,
        rooms,
        notifier,
        engine,
        gateway,
        pipeline,
        assistant,
        started_at: std::time::Instant::now(),
    }))
}
