//! Pluggable risk classifier — an external, fallible, best-effort
//! collaborator.
//!
//! Callers get `Option<RiskAssessment>`: `None` covers a missing API key, an
//! HTTP failure, a timeout, and a shape-violating reply identically. Nothing
//! in this module can abort a check-in.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::HavenConfig;

/// Matches the first JSON object in a reply, including replies that wrap it
/// in prose or markdown fences.
static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskCategory {
    Safe,
    Moderate,
    High,
    Critical,
}

impl RiskCategory {
    pub fn parse(s: &str) -> Option<RiskCategory> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Some(RiskCategory::Safe),
            "moderate" => Some(RiskCategory::Moderate),
            "high" => Some(RiskCategory::High),
            "critical" => Some(RiskCategory::Critical),
            _ => None,
        }
    }

    /// High and Critical results force the wellness override and a
    /// classifier-attributed safety flag.
    pub fn is_escalating(&self) -> bool {
        matches!(self, RiskCategory::High | RiskCategory::Critical)
    }
}

/// A well-formed classifier verdict.
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub risk_score: i64,
    pub category: RiskCategory,
    pub flags: Vec<String>,
    pub suggested_action: String,
    /// The untouched reply object, embedded in audit flags.
    pub raw: Value,
}

/// Wire shape the model is prompted to return.
#[derive(Deserialize)]
struct RawAssessment {
    #[serde(rename = "riskScore")]
    risk_score: Option<i64>,
    category: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(rename = "suggestedAction")]
    suggested_action: Option<String>,
}

/// Parse a model reply into an assessment. Any shape violation is `None`.
pub fn parse_assessment(content: &str) -> Option<RiskAssessment> {
    let object = JSON_OBJECT
        .find(content)
        .map(|m| m.as_str())
        .unwrap_or(content);
    let raw: Value = serde_json::from_str(object).ok()?;
    let parsed: RawAssessment = serde_json::from_value(raw.clone()).ok()?;
    let category = RiskCategory::parse(parsed.category.as_deref()?)?;
    Some(RiskAssessment {
        risk_score: parsed.risk_score.unwrap_or(0),
        category,
        flags: parsed.flags,
        suggested_action: parsed.suggested_action.unwrap_or_else(|| "None".to_string()),
        raw,
    })
}

#[async_trait]
pub trait RiskClassifier: Send + Sync {
    /// Classify free text; `None` means "no result" and is never an error.
    async fn classify(&self, text: &str) -> Option<RiskAssessment>;
}

/// Installed when no API key is configured.
pub struct DisabledClassifier;

#[async_trait]
impl RiskClassifier for DisabledClassifier {
    async fn classify(&self, _text: &str) -> Option<RiskAssessment> {
        None
    }
}

/// Classifier backed by an OpenAI-style chat-completions endpoint.
pub struct HttpRiskClassifier {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl HttpRiskClassifier {
    pub fn new(
        api_url: String,
        api_key: String,
        model: String,
        timeout_secs: u64,
    ) -> anyhow::Result<Self> {
        // The timeout is the whole contract: a slow classifier degrades to
        // "no result" instead of stalling check-in creation.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url,
            api_key,
            model,
        })
    }

    fn prompt(text: &str) -> String {
        format!(
            "Analyze the following user journal entry for mental health risk.\n\
             entry: \"{text}\"\n\n\
             Return ONLY a JSON object with this structure (no markdown, no other text):\n\
             {{\n\
               \"riskScore\": (0-10 integer, where 10 is immediate danger),\n\
               \"category\": \"Safe\" | \"Moderate\" | \"High\" | \"Critical\",\n\
               \"flags\": [\"list\", \"of\", \"detected\", \"issues\"],\n\
               \"suggestedAction\": \"None\" | \"Suggest Resources\" | \"Contact Counselor\" | \"Emergency\"\n\
             }}"
        )
    }
}

#[async_trait]
impl RiskClassifier for HttpRiskClassifier {
    async fn classify(&self, text: &str) -> Option<RiskAssessment> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": Self::prompt(text) }],
            // Low temperature for consistent JSON
            "temperature": 0.1,
            "max_tokens": 150,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(err = %e, "risk classifier unreachable — degrading to no result");
                return None;
            }
        };

        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(err = %e, "risk classifier returned a non-JSON body");
                return None;
            }
        };

        let content = payload["choices"][0]["message"]["content"].as_str()?;
        let assessment = parse_assessment(content);
        if assessment.is_none() {
            warn!("risk classifier reply did not match the expected shape");
        } else {
            debug!(category = ?assessment.as_ref().map(|a| a.category), "risk classifier verdict");
        }
        assessment
    }
}

/// Build the classifier configured for this process.
pub fn classifier_from_config(config: &HavenConfig) -> Arc<dyn RiskClassifier> {
    match &config.classifier_key {
        Some(key) => match HttpRiskClassifier::new(
            config.classifier.api_url.clone(),
            key.clone(),
            config.classifier.model.clone(),
            config.classifier.timeout_secs,
        ) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                warn!(err = %e, "could not build risk classifier — running without one");
                Arc::new(DisabledClassifier)
            }
        },
        None => {
            warn!("no classifier key configured — risk analysis disabled");
            Arc::new(DisabledClassifier)
        }
    }
}
