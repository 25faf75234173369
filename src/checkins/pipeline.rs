//! Check-in recording and the safety-flag escalation pipeline.
//!
//! Order of operations follows the complete revision of the flow: the
//! check-in, the wellness recompute and the deterministic rule flag always
//! run; the classifier result, when one arrives inside its timeout, is
//! strictly additive — a second flag and a wellness override, never a
//! precondition.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::config::EscalationConfig;
use crate::errors::ApiError;
use crate::identity::{Principal, Role};
use crate::risk::RiskClassifier;
use crate::storage::{CheckinRow, SafetyFlagRow, Storage};

/// Wellness floor the classifier override drops to.
const MIN_WELLNESS: i64 = 1;
const MAX_WELLNESS: i64 = 5;

/// Rolling-mean wellness from the moods inside the trailing window,
/// rounded and clamped to the ordinal range. Empty history is neutral.
pub fn wellness_from_moods(moods: &[i64]) -> i64 {
    if moods.is_empty() {
        return crate::sessions::model::DEFAULT_WELLNESS;
    }
    let mean = moods.iter().sum::<i64>() as f64 / moods.len() as f64;
    (mean.round() as i64).clamp(MIN_WELLNESS, MAX_WELLNESS)
}

/// Everything a recorded check-in produced.
#[derive(Debug)]
pub struct CheckinOutcome {
    pub checkin: CheckinRow,
    pub wellness_level: i64,
    pub rule_flag: Option<SafetyFlagRow>,
    pub classifier_flag: Option<SafetyFlagRow>,
}

pub struct EscalationPipeline {
    storage: Arc<Storage>,
    classifier: Arc<dyn RiskClassifier>,
    config: EscalationConfig,
}

impl EscalationPipeline {
    pub fn new(
        storage: Arc<Storage>,
        classifier: Arc<dyn RiskClassifier>,
        config: EscalationConfig,
    ) -> Self {
        Self {
            storage,
            classifier,
            config,
        }
    }

    /// Record a mood check-in and run the escalation rules over it.
    pub async fn record_checkin(
        &self,
        principal: &Principal,
        mood: i64,
        note: Option<&str>,
    ) -> Result<CheckinOutcome, ApiError> {
        if principal.role != Role::Requester {
            return Err(ApiError::Authorization(
                "Only requesters record check-ins".to_string(),
            ));
        }
        if !(MIN_WELLNESS..=MAX_WELLNESS).contains(&mood) {
            return Err(ApiError::Validation(format!(
                "mood must be between {MIN_WELLNESS} and {MAX_WELLNESS}"
            )));
        }

        self.storage.ensure_requester(&principal.id).await?;
        let note = note.map(str::trim).filter(|n| !n.is_empty());
        let checkin = self
            .storage
            .create_checkin(&principal.id, mood, note)
            .await?;

        // The window cutoff is computed here and bound in the query.
        let cutoff =
            (Utc::now() - Duration::days(i64::from(self.config.window_days))).to_rfc3339();
        let moods = self.storage.moods_since(&principal.id, &cutoff).await?;

        let mut wellness = wellness_from_moods(&moods);
        self.storage
            .set_wellness_level(&principal.id, wellness)
            .await?;

        // Deterministic rule — independent of classifier availability.
        let low_count = moods
            .iter()
            .filter(|m| **m <= self.config.low_mood_threshold)
            .count() as i64;
        let rule_triggered =
            mood <= self.config.min_mood_flag || low_count >= self.config.low_mood_count;
        let rule_flag = if rule_triggered {
            let context = format!(
                "mood={mood}; low moods in {}-day window={low_count}",
                self.config.window_days
            );
            let flag = self
                .storage
                .create_safety_flag(&principal.id, "rule", "mood", &context)
                .await?;
            info!(requester = %principal.id, mood, low_count, "rule safety flag raised");
            Some(flag)
        } else {
            None
        };

        // Classifier side-path — degrades to "no additional flag".
        let mut classifier_flag = None;
        if let Some(note_text) = note {
            if let Some(assessment) = self.classifier.classify(note_text).await {
                if assessment.category.is_escalating() {
                    wellness = MIN_WELLNESS;
                    self.storage
                        .set_wellness_level(&principal.id, wellness)
                        .await?;

                    let source = if rule_flag.is_some() { "combined" } else { "note" };
                    let context = serde_json::to_string(&assessment.raw)
                        .unwrap_or_else(|_| "{}".to_string());
                    let flag = self
                        .storage
                        .create_safety_flag(&principal.id, "classifier", source, &context)
                        .await?;
                    warn!(
                        requester = %principal.id,
                        category = ?assessment.category,
                        "classifier safety flag raised — wellness forced to minimum"
                    );
                    classifier_flag = Some(flag);
                }
            }
        }

        Ok(CheckinOutcome {
            checkin,
            wellness_level: wellness,
            rule_flag,
            classifier_flag,
        })
    }

    /// A requester's own check-in history, newest first.
    pub async fn list_own(&self, principal: &Principal) -> Result<Vec<CheckinRow>, ApiError> {
        if principal.role != Role::Requester {
            return Err(ApiError::Authorization(
                "Use the staff endpoint to read another requester's check-ins".to_string(),
            ));
        }
        Ok(self.storage.list_checkins(&principal.id).await?)
    }

    /// Staff read of any requester's check-ins.
    pub async fn list_for_requester(
        &self,
        requester_id: &str,
        principal: &Principal,
    ) -> Result<Vec<CheckinRow>, ApiError> {
        if !principal.role.is_staff() {
            return Err(ApiError::Authorization(
                "Only staff can read another requester's check-ins".to_string(),
            ));
        }
        Ok(self.storage.list_checkins(requester_id).await?)
    }
}
