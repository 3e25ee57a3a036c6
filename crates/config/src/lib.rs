//! Configuration loading, validation, and management for ferrocode.
//!
//! Loads configuration from `~/.ferrocode/config.toml` with environment
//! variable overrides, and tool definitions from a JSON file. Everything is
//! resolved once at startup and handed to the components that need it.

use ferrocode_core::tool::ToolSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ferrocode/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend endpoint and model
    #[serde(default)]
    pub api: ApiConfig,

    /// Streaming behaviour
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Retry policy for backend calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Approval prompts
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Tool execution
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api", &self.api)
            .field("streaming", &self.streaming)
            .field("retry", &self.retry)
            .field("approval", &self.approval)
            .field("tools", &self.tools)
            .finish()
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whole-request timeout for non-streaming calls
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Optional system prompt override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-5-nano".into()
}
fn default_http_timeout() -> u64 {
    300
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            temperature: 0.0,
            max_tokens: None,
            http_timeout_secs: default_http_timeout(),
            system_prompt: None,
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("system_prompt", &self.system_prompt)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum silence between two reads of the stream
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Maximum duration of one streamed response
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,

    /// Fail the turn on a malformed frame instead of skipping it
    #[serde(default)]
    pub strict_frames: bool,
}

fn default_true() -> bool {
    true
}
fn default_read_timeout() -> u64 {
    30
}
fn default_total_timeout() -> u64 {
    300
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
            strict_frames: false,
        }
    }
}

/// Retry ceilings use `0` as the "retry forever" sentinel.
pub const UNLIMITED_RETRIES: u32 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Delay is scaled by a random factor in `1 ± jitter_fraction`
    #[serde(default = "default_jitter")]
    pub jitter_fraction: f64,

    /// Ceiling for 429 and 5xx responses without a per-status entry
    #[serde(default = "default_http_max_retries")]
    pub http_max_retries: u32,

    /// Per-status ceilings keyed by status code
    #[serde(default = "default_status_max_retries")]
    pub status_max_retries: BTreeMap<String, u32>,

    /// Ceiling for timeouts, DNS failures and refused or dropped connections
    #[serde(default = "default_network_max_retries")]
    pub network_max_retries: u32,

    /// Error text matching any of these is retried even if not otherwise retryable
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_patterns: Vec<String>,

    /// Error text matching any of these is never retried (wins over `retry_patterns`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub no_retry_patterns: Vec<String>,
}

fn default_initial_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    64_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> f64 {
    0.1
}
fn default_http_max_retries() -> u32 {
    10
}
fn default_status_max_retries() -> BTreeMap<String, u32> {
    BTreeMap::from([("502".to_string(), UNLIMITED_RETRIES)])
}
fn default_network_max_retries() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_fraction: default_jitter(),
            http_max_retries: default_http_max_retries(),
            status_max_retries: default_status_max_retries(),
            network_max_retries: default_network_max_retries(),
            retry_patterns: Vec::new(),
            no_retry_patterns: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Ceiling for a specific status, if one is configured.
    pub fn status_ceiling(&self, status: u16) -> Option<u32> {
        self.status_max_retries.get(&status.to_string()).copied()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Allow every tool call without prompting
    #[serde(default)]
    pub yolo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// JSON file with external tool definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions_file: Option<PathBuf>,

    /// Output budget in characters when a tool sets none
    #[serde(default = "default_truncation_limit")]
    pub default_truncation_limit: usize,

    /// Default timeout for `run_shell_command` and command templates
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,

    #[serde(default)]
    pub timeouts: KindTimeouts,
}

fn default_truncation_limit() -> usize {
    20_000
}
fn default_shell_timeout() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            definitions_file: None,
            default_truncation_limit: default_truncation_limit(),
            shell_timeout_secs: default_shell_timeout(),
            timeouts: KindTimeouts::default(),
        }
    }
}

/// Per-kind execution timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindTimeouts {
    #[serde(default = "default_internal_timeout")]
    pub internal_secs: u64,
    #[serde(default = "default_external_timeout")]
    pub command_secs: u64,
    #[serde(default = "default_external_timeout")]
    pub jsonrpc_secs: u64,
    #[serde(default = "default_external_timeout")]
    pub mcp_stdio_secs: u64,
}

fn default_internal_timeout() -> u64 {
    120
}
fn default_external_timeout() -> u64 {
    60
}

impl Default for KindTimeouts {
    fn default() -> Self {
        Self {
            internal_secs: default_internal_timeout(),
            command_secs: default_external_timeout(),
            jsonrpc_secs: default_external_timeout(),
            mcp_stdio_secs: default_external_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ferrocode/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.api.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL").or_else(|| lookup("API_ENDPOINT")) {
            self.api.base_url = url;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.api.model = model;
        }
        if let Some(v) = lookup("TEMPERATURE") {
            self.api.temperature = parse_env("TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("MAX_TOKENS") {
            self.api.max_tokens = Some(parse_env("MAX_TOKENS", &v)?);
        }
        if let Some(v) = lookup("HTTP_TIMEOUT") {
            self.api.http_timeout_secs = parse_env("HTTP_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("STREAMING_READ_TIMEOUT") {
            self.streaming.read_timeout_secs = parse_env("STREAMING_READ_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("STREAMING_TIMEOUT") {
            self.streaming.total_timeout_secs = parse_env("STREAMING_TIMEOUT", &v)?;
        }
        if flag("DISABLE_STREAMING") {
            self.streaming.enabled = false;
        }
        if flag("YOLO_MODE") {
            self.approval.yolo = true;
        }
        if flag("DISABLE_RETRY") {
            self.retry.enabled = false;
        }
        // One ceiling for every retry class, per-status entries included.
        if let Some(v) = lookup("RETRY_MAX_ATTEMPTS") {
            let ceiling: u32 = parse_env("RETRY_MAX_ATTEMPTS", &v)?;
            self.retry.http_max_retries = ceiling;
            self.retry.network_max_retries = ceiling;
            self.retry
                .status_max_retries
                .values_mut()
                .for_each(|c| *c = ceiling);
        }
        if let Some(v) = lookup("RETRY_INITIAL_DELAY") {
            let secs: f64 = parse_env("RETRY_INITIAL_DELAY", &v)?;
            self.retry.initial_delay_ms = (secs * 1000.0) as u64;
        }
        if let Some(v) = lookup("RETRY_MAX_DELAY") {
            let secs: f64 = parse_env("RETRY_MAX_DELAY", &v)?;
            self.retry.max_delay_ms = (secs * 1000.0) as u64;
        }
        if let Some(v) = lookup("SHELL_COMMAND_TIMEOUT") {
            let secs: u64 = parse_env("SHELL_COMMAND_TIMEOUT", &v)?;
            self.tools.shell_timeout_secs = secs;
            self.tools.timeouts.command_secs = secs;
        }
        if let Some(path) = lookup("MCP_TOOLS_CONF_PATH") {
            self.tools.definitions_file = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ferrocode")
    }

    /// Tool definitions file: explicit setting, else `~/.ferrocode/tools.json`
    /// if it exists, else `./tools.json` if it exists.
    pub fn tool_definitions_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.tools.definitions_file {
            return Some(path.clone());
        }
        let home = Self::config_dir().join("tools.json");
        if home.exists() {
            return Some(home);
        }
        let local = PathBuf::from("tools.json");
        local.exists().then_some(local)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.api.temperature) {
            return Err(ConfigError::ValidationError(
                "api.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }

        if !(0.0..1.0).contains(&self.retry.jitter_fraction) {
            return Err(ConfigError::ValidationError(
                "retry.jitter_fraction must be in [0.0, 1.0)".into(),
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        for key in self.retry.status_max_retries.keys() {
            if key.parse::<u16>().is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "retry.status_max_retries key '{key}' is not an HTTP status"
                )));
            }
        }

        if self.streaming.read_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "streaming.read_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("environment variable {key} has invalid value '{value}'"))
    })
}

/// Load external tool definitions (`name → ToolSpec`), dropping disabled entries.
pub fn load_tool_specs(path: &Path) -> Result<BTreeMap<String, ToolSpec>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_tool_specs(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Parse tool definitions from JSON text.
pub fn parse_tool_specs(content: &str) -> Result<BTreeMap<String, ToolSpec>, serde_json::Error> {
    let specs: BTreeMap<String, ToolSpec> = serde_json::from_str(content)?;
    Ok(specs
        .into_iter()
        .filter(|(name, spec)| {
            if spec.disabled {
                tracing::debug!(tool = %name, "Skipping disabled tool definition");
            }
            !spec.disabled
        })
        .collect())
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrocode_core::tool::ToolKind;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.initial_delay_ms, 2_000);
        assert_eq!(config.retry.max_delay_ms, 64_000);
        assert_eq!(config.retry.status_ceiling(502), Some(UNLIMITED_RETRIES));
        assert_eq!(config.retry.status_ceiling(503), None);
        assert!(config.streaming.enabled);
        assert!(!config.approval.yolo);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.api.model, config.api.model);
        assert_eq!(parsed.retry.status_max_retries, config.retry.status_max_retries);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml_str = r#"
[api]
model = "local-model"

[retry]
http_max_retries = 3
status_max_retries = { "429" = 5, "502" = 0 }

[tools.timeouts]
command_secs = 15
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api.model, "local-model");
        assert_eq!(config.api.base_url, "https://api.openai.com/v1");
        assert_eq!(config.retry.status_ceiling(429), Some(5));
        assert_eq!(config.tools.timeouts.command_secs, 15);
        assert_eq!(config.tools.timeouts.jsonrpc_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.api.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_status_key_rejected() {
        let mut config = AppConfig::default();
        config.retry.status_max_retries.insert("five-oh-two".into(), 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.api.model, "gpt-5-nano");
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[streaming]\nenabled = false\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert!(!config.streaming.enabled);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api\nmodel = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_switches_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[
                ("YOLO_MODE", "1"),
                ("DISABLE_RETRY", "1"),
                ("DISABLE_STREAMING", "1"),
                ("SHELL_COMMAND_TIMEOUT", "90"),
                ("OPENAI_MODEL", "gpt-test"),
                ("RETRY_INITIAL_DELAY", "0.5"),
            ]))
            .unwrap();
        assert!(config.approval.yolo);
        assert!(!config.retry.enabled);
        assert!(!config.streaming.enabled);
        assert_eq!(config.tools.shell_timeout_secs, 90);
        assert_eq!(config.tools.timeouts.command_secs, 90);
        assert_eq!(config.api.model, "gpt-test");
        assert_eq!(config.retry.initial_delay_ms, 500);
    }

    #[test]
    fn retry_max_attempts_caps_every_class() {
        let mut config = AppConfig::default();
        config.retry.status_max_retries.insert("429".into(), 8);
        config
            .apply_env_overrides(env(&[("RETRY_MAX_ATTEMPTS", "2")]))
            .unwrap();
        assert_eq!(config.retry.http_max_retries, 2);
        assert_eq!(config.retry.network_max_retries, 2);
        assert_eq!(config.retry.status_ceiling(429), Some(2));
        assert_eq!(config.retry.status_ceiling(502), Some(2));

        config
            .apply_env_overrides(env(&[("RETRY_MAX_ATTEMPTS", "0")]))
            .unwrap();
        assert_eq!(config.retry.network_max_retries, UNLIMITED_RETRIES);
        assert_eq!(config.retry.status_ceiling(429), Some(UNLIMITED_RETRIES));
    }

    #[test]
    fn env_switch_requires_truthy_value() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[("YOLO_MODE", "0")]))
            .unwrap();
        assert!(!config.approval.yolo);
    }

    #[test]
    fn invalid_env_number_is_reported() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(env(&[("MAX_TOKENS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }

    #[test]
    fn api_key_is_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.api.api_key = Some("sk-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn api_debug_shows_system_prompt() {
        let api = ApiConfig {
            system_prompt: Some("Answer in French.".into()),
            ..ApiConfig::default()
        };
        assert!(format!("{api:?}").contains(r#"system_prompt: Some("Answer in French.")"#));
    }

    #[test]
    fn tool_specs_parse_and_skip_disabled() {
        let json = r#"{
            "list_tmp": {"type": "command", "command": "ls {path}", "description": "List a dir",
                         "parameters": {"type":"object","properties":{"path":{"type":"string"}},"required":["path"]}},
            "search": {"type": "jsonrpc", "url": "http://localhost:9000", "auto_approved": true},
            "old": {"type": "command", "command": "true", "disabled": true}
        }"#;
        let specs = parse_tool_specs(json).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs["list_tmp"].kind, ToolKind::Command);
        assert!(specs["search"].auto_approved);
        assert!(!specs.contains_key("old"));
    }

    #[test]
    fn tool_specs_file_errors_carry_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_tool_specs(&path).unwrap_err();
        assert!(err.to_string().contains("tools.json"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-5-nano"));
        assert!(toml_str.contains("status_max_retries"));
    }
}
