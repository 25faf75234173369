//! Interactive support assistant — AI chat for requesters and counselors.
//!
//! Distinct from the risk classifier: this is the user-facing path, so it
//! runs with the longer interactive timeout and surfaces failures as a
//! dependency error instead of degrading silently.

pub mod handlers;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::config::{AssistantConfig, HavenConfig};
use crate::errors::ApiError;

const SYSTEM_PROMPT: &str = "\
You are an AI support assistant for a digital peer-support platform.

Your role:
- Provide calm, supportive, non-judgmental responses
- Encourage emotional expression
- Promote safety, care, and well-being
- Never give medical diagnoses
- Never replace professional counseling
- Escalate serious emotional distress gently
- Be empathetic, short, and human

Rules:
- Do not act as a therapist
- Do not give harmful instructions
- Always prioritize user safety
- If the user expresses crisis signals, respond with care and encourage seeking help";

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

pub struct SupportAssistant {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    config: AssistantConfig,
}

impl SupportAssistant {
    pub fn new(config: &HavenConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.assistant.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: config.classifier.api_url.clone(),
            api_key: config.classifier_key.clone(),
            config: config.assistant.clone(),
        })
    }

    /// One chat turn with conversation memory.
    pub async fn chat(&self, message: &str, history: &[HistoryTurn]) -> Result<String, ApiError> {
        if message.trim().is_empty() {
            return Err(ApiError::Validation("Message is required".to_string()));
        }
        let Some(api_key) = &self.api_key else {
            return Err(ApiError::Dependency(
                "AI support service not configured".to_string(),
            ));
        };

        let mut messages = vec![json!({ "role": "system", "content": SYSTEM_PROMPT })];
        for turn in history {
            let role = if turn.role == "user" { "user" } else { "assistant" };
            messages.push(json!({ "role": role, "content": turn.content }));
        }
        messages.push(json!({ "role": "user", "content": message }));

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let reply: Value = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                error!(err = %e, "assistant upstream call failed");
                ApiError::Dependency(
                    "AI support service unavailable. Please try again.".to_string(),
                )
            })?
            .json()
            .await
            .map_err(|e| {
                error!(err = %e, "assistant upstream returned a non-JSON body");
                ApiError::Dependency(
                    "AI support service unavailable. Please try again.".to_string(),
                )
            })?;

        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ApiError::Dependency(
                    "AI support service unavailable. Please try again.".to_string(),
                )
            })?;
        Ok(content.to_string())
    }

    /// Configuration report for the status endpoint. No secrets in the body.
    pub fn status(&self) -> Value {
        json!({
            "status": "AI support engine active",
            "model": self.config.model,
            "key_configured": self.api_key.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HavenConfig;

    fn assistant(with_key: bool) -> SupportAssistant {
        let dir = tempfile::tempdir().unwrap();
        let config = HavenConfig::new(None, Some(dir.path().to_path_buf()), None, None);
        let mut a = SupportAssistant::new(&config).unwrap();
        if with_key {
            a.api_key = Some("test-key".to_string());
            a.api_url = "http://192.0.2.1:9/v1/chat/completions".to_string();
        }
        a
    }

    #[tokio::test]
    async fn empty_message_is_a_validation_error() {
        let err = assistant(true).chat("  ", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_key_is_a_dependency_error() {
        let a = assistant(false);
        let err = a.chat("hello", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Dependency(_)));
        assert_eq!(a.status()["key_configured"], false);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_dependency_error() {
        let err = assistant(true).chat("hello", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Dependency(_)));
    }
}
