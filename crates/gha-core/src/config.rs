use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from `~/.gh-agent/config.toml`.
///
/// Never holds secrets. The reasoning-engine key is read at runtime from
/// the environment variable named by [`EngineConfig::api_key_env`]; GitHub
/// credentials arrive per request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub github: GitHubConfig,
}

impl Config {
    /// Load config from the default location, falling back to defaults when
    /// the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not expressible via types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port must be non-zero".into()));
        }
        if self.tools.call_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "tools.call_timeout_secs must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tools.min_path_similarity) {
            return Err(ConfigError::Validation(format!(
                "tools.min_path_similarity must be within 0.0..=1.0, got {}",
                self.tools.min_path_similarity
            )));
        }
        if self.engine.model.trim().is_empty() {
            return Err(ConfigError::Validation("engine.model must be set".into()));
        }
        Ok(())
    }

    /// Ledger path with a leading `~/` expanded against `home`.
    pub fn ledger_path(&self, home: &Path) -> PathBuf {
        match self.ledger.path.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(&self.ledger.path),
        }
    }

    /// Ledger path resolved against the user's home directory.
    pub fn resolved_ledger_path(&self) -> PathBuf {
        self.ledger_path(&home_dir())
    }

    pub fn default_path() -> PathBuf {
        home_dir().join(".gh-agent").join("config.toml")
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

fn default_ledger_path() -> String {
    "~/.gh-agent/ledger.db".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_base_url")]
    pub base_url: String,
    #[serde(default = "default_engine_model")]
    pub model: String,
    /// Name of the environment variable that holds the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_engine_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_engine_base_url(),
            model: default_engine_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_engine_timeout(),
        }
    }
}

fn default_engine_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn default_engine_model() -> String {
    "openai/gpt-oss-120b".into()
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".into()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_temperature() -> f32 {
    0.2
}
fn default_engine_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Recorded tool outputs longer than this are truncated in the trace.
    #[serde(default = "default_output_limit")]
    pub output_limit: usize,
    #[serde(default = "default_min_path_similarity")]
    pub min_path_similarity: f64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            output_limit: default_output_limit(),
            min_path_similarity: default_min_path_similarity(),
        }
    }
}

fn default_call_timeout() -> u64 {
    30
}
fn default_output_limit() -> usize {
    1000
}
fn default_min_path_similarity() -> f64 {
    0.75
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitHubConfig {
    /// Override for GitHub Enterprise, e.g. `https://ghe.example.com/api/v3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}
