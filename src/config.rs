use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_TOKENS, DEFAULT_MIN_REQUEST_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SMTP_PORT, DEFAULT_SMTP_SERVER, DEFAULT_TEMPERATURE,
};
use crate::retry::SchedulerPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Completion provider settings
    #[serde(default)]
    pub ai: AiConfig,
    /// Retry, backoff and throttling policy
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

/// Completion provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Groq,
}

impl Provider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Groq => "Groq",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-3.5-turbo",
            Provider::Groq => "llama-3.1-8b-instant",
        }
    }

    /// Credential key holding this provider's API key
    pub fn api_key_name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: Provider,
    /// Model name (default depends on provider)
    #[serde(default)]
    pub model: Option<String>,
    /// Override for the provider's API base URL
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AiConfig {
    pub fn model_or_default(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Ceiling on total backoff sleep per reply
    #[serde(default = "default_max_total_wait_secs")]
    pub max_total_wait_secs: u64,
    #[serde(default = "default_min_request_interval_secs")]
    pub min_request_interval_secs: u64,
    /// Seconds after which a throttled session retries the remote path (0 = never)
    #[serde(default)]
    pub throttle_cooldown_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            max_total_wait_secs: default_max_total_wait_secs(),
            min_request_interval_secs: default_min_request_interval_secs(),
            throttle_cooldown_secs: 0,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> SchedulerPolicy {
        SchedulerPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
            max_total_wait: Duration::from_secs(self.max_total_wait_secs),
            min_request_interval: Duration::from_secs(self.min_request_interval_secs),
            throttle_cooldown: (self.throttle_cooldown_secs > 0)
                .then(|| Duration::from_secs(self.throttle_cooldown_secs)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Characters of the original email quoted in the prompt (0 = all)
    #[serde(default)]
    pub max_email_chars: usize,
}

impl PromptConfig {
    pub fn max_email_chars(&self) -> Option<usize> {
        (self.max_email_chars > 0).then_some(self.max_email_chars)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_server")]
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: default_smtp_server(),
            port: default_smtp_port(),
        }
    }
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    10
}

fn default_max_delay_secs() -> u64 {
    60
}

fn default_max_total_wait_secs() -> u64 {
    120
}

fn default_min_request_interval_secs() -> u64 {
    DEFAULT_MIN_REQUEST_INTERVAL_SECS
}

fn default_smtp_server() -> String {
    DEFAULT_SMTP_SERVER.to_string()
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("replywright");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load the config file. A missing file yields defaults, so the offline
    /// path works without any setup.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        let dir = path
            .parent()
            .context("Config path has no parent directory")?;

        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(Self::config_dir()?)?;
        Ok(())
    }
}
