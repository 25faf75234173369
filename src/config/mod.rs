use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 7400;
const DEFAULT_REALTIME_PORT: u16 = 7401;
const DEFAULT_WINDOW_DAYS: u32 = 7;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── ClassifierConfig ─────────────────────────────────────────────────────────

/// Risk classifier configuration (`[classifier]` in config.toml).
///
/// The classifier is a best-effort background dependency: its timeout is
/// deliberately short and independent from the interactive assistant's.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Chat-completions endpoint the classifier posts to.
    pub api_url: String,
    /// Model identifier sent with each classification request.
    pub model: String,
    /// Bounded timeout for a single classification call (seconds). Default: 10.
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_url: "https://router.huggingface.co/v1/chat/completions".to_string(),
            model: "meta-llama/Meta-Llama-3-8B-Instruct".to_string(),
            timeout_secs: 10,
        }
    }
}

// ─── AssistantConfig ──────────────────────────────────────────────────────────

/// Interactive support-assistant configuration (`[assistant]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Model identifier for interactive chat turns.
    pub model: String,
    /// User-facing chat timeout (seconds). Longer than the classifier's. Default: 30.
    pub timeout_secs: u64,
    /// Maximum tokens per assistant reply. Default: 400.
    pub max_tokens: u32,
    /// Sampling temperature. Default: 0.6.
    pub temperature: f64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            model: "meta-llama/Meta-Llama-3-8B-Instruct".to_string(),
            timeout_secs: 30,
            max_tokens: 400,
            temperature: 0.6,
        }
    }
}

// ─── EscalationConfig ─────────────────────────────────────────────────────────

/// Safety-escalation thresholds (`[escalation]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Trailing window for the rolling wellness mean and low-mood count (days).
    pub window_days: u32,
    /// A mood at or below this value counts as "low" for the repeat rule. Default: 2.
    pub low_mood_threshold: i64,
    /// Number of low moods within the window that raises a flag. Default: 2.
    pub low_mood_count: i64,
    /// A single mood at or below this value always raises a flag. Default: 1.
    pub min_mood_flag: i64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            low_mood_threshold: 2,
            low_mood_count: 2,
            min_mood_flag: 1,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// REST API port (default: 7400).
    port: Option<u16>,
    /// Realtime WebSocket port (default: 7401).
    realtime_port: Option<u16>,
    /// Bind address for both listeners (default: "127.0.0.1").
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,havend=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json" (structured for log aggregators).
    log_format: Option<String>,
    /// Risk classifier configuration (`[classifier]`).
    classifier: Option<ClassifierConfig>,
    /// Support assistant configuration (`[assistant]`).
    assistant: Option<AssistantConfig>,
    /// Escalation thresholds (`[escalation]`).
    escalation: Option<EscalationConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── HavenConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HavenConfig {
    pub port: u16,
    /// Port of the realtime (session room) WebSocket listener.
    pub realtime_port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    /// Bind address for both listeners (HAVEND_BIND env var).
    pub bind_address: String,
    /// API key shared by the classifier and assistant (HAVEND_CLASSIFIER_KEY
    /// env var only — never persisted to TOML). None disables both.
    pub classifier_key: Option<String>,
    pub classifier: ClassifierConfig,
    pub assistant: AssistantConfig,
    pub escalation: EscalationConfig,
}

impl HavenConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let realtime_port = toml.realtime_port.unwrap_or(DEFAULT_REALTIME_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(std::env::var("HAVEND_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let log_format = std::env::var("HAVEND_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let classifier_key = std::env::var("HAVEND_CLASSIFIER_KEY")
            .ok()
            .filter(|k| !k.is_empty());

        Self {
            port,
            realtime_port,
            data_dir,
            log,
            log_format,
            bind_address,
            classifier_key,
            classifier: toml.classifier.unwrap_or_default(),
            assistant: toml.assistant.unwrap_or_default(),
            escalation: toml.escalation.unwrap_or_default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/havend
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("havend");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/havend or ~/.local/share/havend
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("havend");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("havend");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\havend
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("havend");
        }
    }
    // Fallback
    PathBuf::from(".havend")
}
