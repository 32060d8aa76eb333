use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use worldbox_subsystems::httpclient::{
    IMAGE_API_KEY_ENV, IMAGE_ENDPOINT_ENV, LLM_API_KEY_ENV, LLM_ENDPOINT_ENV,
};
use worldbox_talk::{CaptureMode, TalkTrigger};
use worldbox_vision::DetectorSettings;

/// Studio configuration, loaded from TOML with environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct StudioConfig {
    /// Chat collaborator settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Image collaborator settings.
    #[serde(default)]
    pub image: ImageConfig,
    /// Frame-change detector thresholds.
    #[serde(default)]
    pub vision: DetectorSettings,
    /// Push-to-talk triggers.
    #[serde(default)]
    pub talk: TalkConfig,
    /// Operational logging.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Directory receiving exported world documents.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            image: ImageConfig::default(),
            vision: DetectorSettings::default(),
            talk: TalkConfig::default(),
            logging: LoggingConfig::default(),
            export_dir: default_export_dir(),
        }
    }
}

/// Chat collaborator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Chat-completions endpoint.
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    /// Optional bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model used for tool-running and prose turns.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Model used for image description turns.
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            chat_model: default_chat_model(),
            vision_model: default_vision_model(),
        }
    }
}

/// Image collaborator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Image-generations endpoint.
    #[serde(default = "default_image_endpoint")]
    pub endpoint: String,
    /// Optional bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Image model identifier.
    #[serde(default = "default_image_model")]
    pub model: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            endpoint: default_image_endpoint(),
            api_key: None,
            model: default_image_model(),
        }
    }
}

/// Push-to-talk trigger table.
#[derive(Debug, Clone, Deserialize)]
pub struct TalkConfig {
    /// Declared triggers; routing matches press/release events by action.
    #[serde(default = "default_triggers")]
    pub triggers: Vec<TalkTrigger>,
}

impl Default for TalkConfig {
    fn default() -> Self {
        Self {
            triggers: default_triggers(),
        }
    }
}

/// Operational logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory receiving the JSONL logs.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:4000/v1/chat/completions".to_string()
}

fn default_image_endpoint() -> String {
    "http://127.0.0.1:4000/v1/images/generations".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_image_model() -> String {
    "black-forest-labs/FLUX.1-schnell".to_string()
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs/worldbox")
}

fn default_triggers() -> Vec<TalkTrigger> {
    vec![
        TalkTrigger {
            action: "talk-chat".to_string(),
            target: "chat-input".to_string(),
            mode: CaptureMode::Append,
        },
        TalkTrigger {
            action: "talk-dictate".to_string(),
            target: "dictate-input".to_string(),
            mode: CaptureMode::Append,
        },
        TalkTrigger {
            action: "talk-writing".to_string(),
            target: "writing-prompt".to_string(),
            mode: CaptureMode::Replace,
        },
    ]
}

impl StudioConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading studio config {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Loads the given file when it exists, falls back to defaults
    /// otherwise; environment overrides apply either way.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    /// Applies environment-variable overrides for the service endpoints.
    pub fn apply_env(&mut self) {
        if let Ok(endpoint) = env::var(LLM_ENDPOINT_ENV) {
            self.llm.endpoint = endpoint;
        }
        if let Ok(key) = env::var(LLM_API_KEY_ENV) {
            self.llm.api_key = Some(key);
        }
        if let Ok(endpoint) = env::var(IMAGE_ENDPOINT_ENV) {
            self.image.endpoint = endpoint;
        }
        if let Ok(key) = env::var(IMAGE_API_KEY_ENV) {
            self.image.api_key = Some(key);
        }
    }
}
