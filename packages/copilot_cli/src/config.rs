use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

use copilot_stream::ChatSettings;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [server]
//                    ws_url = "wss://copilot.example.com/ws"
//
//   env var:         COPILOT_SERVER__WS_URL=wss://copilot.example.com/ws
//
//   (single underscore stays within field names: COPILOT_CHAT__AUTO_SEND_DELAY_MS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Backend endpoints (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            api_url: default_api_url(),
        }
    }
}

/// Conversation tunables (lives under `[chat]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default = "default_auto_send_delay_ms")]
    pub auto_send_delay_ms: u64,
    /// 0 disables the stall watchdog.
    #[serde(default)]
    pub stall_timeout_secs: u64,
    /// Empty string disables the greeting.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_suggestions")]
    pub suggestions: Vec<String>,
    /// How often the conversation list is re-fetched; 0 disables polling.
    #[serde(default = "default_conversation_refresh_secs")]
    pub conversation_refresh_secs: u64,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            auto_send_delay_ms: default_auto_send_delay_ms(),
            stall_timeout_secs: 0,
            greeting: default_greeting(),
            suggestions: default_suggestions(),
            conversation_refresh_secs: default_conversation_refresh_secs(),
        }
    }
}

fn default_ws_url() -> String {
    "ws://localhost:8000/ws".to_string()
}
fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_auto_send_delay_ms() -> u64 {
    400
}
fn default_greeting() -> String {
    "Hello! I'm your Sales Co-Pilot. Ask me anything about our proposals, case studies, \
     or whitepapers. Every answer is cited and grounded.\n\n\
     What would you like to explore today?"
        .to_string()
}
fn default_conversation_refresh_secs() -> u64 {
    10
}
fn default_suggestions() -> Vec<String> {
    vec![
        "Show me recent proposal summaries".to_string(),
        "What case studies do we have for fintech?".to_string(),
        "Summarise our latest whitepaper".to_string(),
    ]
}

/// Build a figment that layers: defaults → config.toml → COPILOT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `COPILOT_SERVER__API_URL=http://10.0.0.5:8000`  →  `server.api_url`
///   `COPILOT_CHAT__STALL_TIMEOUT_SECS=60`  →  `chat.stall_timeout_secs = 60`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("COPILOT_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Parsed backend endpoints (runtime view).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub ws_url: Url,
    pub api_url: Url,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Result<Self> {
        let ws_url = Url::parse(&fc.ws_url)
            .with_context(|| format!("Invalid server.ws_url: {:?}", fc.ws_url))?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            anyhow::bail!("server.ws_url must use ws:// or wss://, got {}", ws_url);
        }
        let api_url = Url::parse(&fc.api_url)
            .with_context(|| format!("Invalid server.api_url: {:?}", fc.api_url))?;
        Ok(Self { ws_url, api_url })
    }
}

/// Conversation settings for the streaming engine.
pub fn chat_settings(server: &ServerConfig, fc: &ChatFileConfig) -> ChatSettings {
    let mut settings = ChatSettings::new(server.ws_url.clone())
        .with_stall_timeout(Duration::from_secs(fc.stall_timeout_secs));
    settings.auto_send_delay = Duration::from_millis(fc.auto_send_delay_ms);
    if !fc.greeting.trim().is_empty() {
        settings = settings.with_greeting(fc.greeting.clone(), fc.suggestions.clone());
    }
    settings
}

// =============================================================================
// Directory layout config (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct CopilotConfig {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl CopilotConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".copilot"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, logs_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir.join("copilot.log")
    }

    pub fn load(&self) -> Result<FileConfig> {
        load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Failed to load {}", self.config_toml_path().display()))
    }
}
