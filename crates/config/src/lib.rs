//! Configuration loading, validation, and management for Mynd.
//!
//! Loads configuration from `~/.mynd/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.mynd/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the database and key file live. Defaults to the config dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Context assembly settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Capability token settings
    #[serde(default)]
    pub tokens: TokensConfig,

    /// Storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

// ── Engine ──────────────────────────────────────────────────────────────

/// Which token estimator sizes context items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// ceil(chars / 4)
    #[default]
    Chars,
    /// ceil(words * 4 / 3)
    Words,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Candidates fetched from the similarity index per query.
    #[serde(default = "default_overfetch_k")]
    pub overfetch_k: usize,

    /// Absolute ceiling on any bundle, whatever the token allows.
    #[serde(default = "default_hard_cap_tokens")]
    pub hard_cap_tokens: usize,

    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,

    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    /// Tokens charged per item for its `[source] path (time)` header.
    #[serde(default = "default_header_overhead_tokens")]
    pub header_overhead_tokens: usize,

    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,

    #[serde(default)]
    pub estimator: EstimatorKind,
}

fn default_overfetch_k() -> usize {
    20
}
fn default_hard_cap_tokens() -> usize {
    8_000
}
fn default_search_timeout_ms() -> u64 {
    300
}
fn default_lookup_timeout_ms() -> u64 {
    200
}
fn default_header_overhead_tokens() -> usize {
    8
}
fn default_max_query_chars() -> usize {
    1_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            overfetch_k: default_overfetch_k(),
            hard_cap_tokens: default_hard_cap_tokens(),
            search_timeout_ms: default_search_timeout_ms(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            header_overhead_tokens: default_header_overhead_tokens(),
            max_query_chars: default_max_query_chars(),
            estimator: EstimatorKind::default(),
        }
    }
}

// ── Tokens ──────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct TokensConfig {
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Requested TTLs above this are capped, not rejected.
    #[serde(default = "default_max_ttl_secs")]
    pub max_ttl_secs: u64,

    #[serde(default = "default_token_max_tokens")]
    pub default_max_tokens: usize,

    /// How long an expired token is kept (so it reports `expired`, not
    /// `unknown`) before the purge task deletes it.
    #[serde(default = "default_purge_grace_secs")]
    pub purge_grace_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// HMAC secret for bearer signatures. When unset, a random key is
    /// generated into the data dir on first use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_max_ttl_secs() -> u64 {
    3_600
}
fn default_token_max_tokens() -> usize {
    4_000
}
fn default_purge_grace_secs() -> u64 {
    3_600
}
fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            max_ttl_secs: default_max_ttl_secs(),
            default_max_tokens: default_token_max_tokens(),
            purge_grace_secs: default_purge_grace_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            secret: None,
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for TokensConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokensConfig")
            .field("default_ttl_secs", &self.default_ttl_secs)
            .field("max_ttl_secs", &self.max_ttl_secs)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("purge_grace_secs", &self.purge_grace_secs)
            .field("cleanup_interval_secs", &self.cleanup_interval_secs)
            .field("secret", &redact(&self.secret))
            .finish()
    }
}

// ── Storage ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    /// Nothing survives the process. Useful for demos and tests.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// File name inside the data dir.
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_database_file() -> String {
    "mynd.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database_file: default_database_file(),
        }
    }
}

// ── Gateway ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub allow_public_bind: bool,

    /// Requests allowed per client per window.
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: usize,

    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

fn default_port() -> u16 {
    8765
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_rate_limit_requests() -> usize {
    60
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_body_limit_bytes() -> usize {
    64 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allow_public_bind: false,
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.mynd/config.toml).
    ///
    /// Environment overrides, applied after the file:
    /// - `MYND_DATA_DIR`
    /// - `MYND_TOKEN_SECRET`
    /// - `MYND_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply environment overrides through `lookup` (so tests need not touch
    /// the real process environment).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("MYND_DATA_DIR").filter(|d| !d.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(secret) = lookup("MYND_TOKEN_SECRET").filter(|s| !s.is_empty()) {
            self.tokens.secret = Some(secret);
        }
        if let Some(port) = lookup("MYND_PORT") {
            self.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("MYND_PORT is not a port number: {port}"))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".mynd")
    }

    /// Where persistent state lives.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(Self::config_dir)
    }

    /// Full path of the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.database_file)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.overfetch_k == 0 {
            return Err(ConfigError::ValidationError(
                "engine.overfetch_k must be at least 1".into(),
            ));
        }
        if engine.search_timeout_ms == 0 || engine.lookup_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "engine timeouts must be positive".into(),
            ));
        }
        if engine.max_query_chars == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_query_chars must be at least 1".into(),
            ));
        }

        let tokens = &self.tokens;
        if tokens.default_ttl_secs == 0 || tokens.max_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "token TTLs must be positive".into(),
            ));
        }
        if tokens.default_ttl_secs > tokens.max_ttl_secs {
            return Err(ConfigError::ValidationError(
                "tokens.default_ttl_secs must not exceed tokens.max_ttl_secs".into(),
            ));
        }
        if tokens.default_max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "tokens.default_max_tokens must be positive".into(),
            ));
        }
        if tokens.cleanup_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tokens.cleanup_interval_secs must be positive".into(),
            ));
        }
        if tokens.secret.as_deref().is_some_and(|s| s.len() < 16) {
            return Err(ConfigError::ValidationError(
                "tokens.secret must be at least 16 bytes".into(),
            ));
        }

        if self.storage.database_file.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.database_file must not be empty".into(),
            ));
        }

        let gateway = &self.gateway;
        if gateway.rate_limit_requests == 0 || gateway.rate_limit_window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "gateway rate limit must be positive".into(),
            ));
        }
        if !gateway.allow_public_bind && !is_loopback(&gateway.host) {
            return Err(ConfigError::ValidationError(format!(
                "gateway.host {} is not loopback; set allow_public_bind to expose it",
                gateway.host
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn is_loopback(host: &str) -> bool {
    match host {
        "localhost" => true,
        other => other
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
    }
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
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.overfetch_k, 20);
        assert_eq!(config.engine.search_timeout_ms, 300);
        assert_eq!(config.tokens.default_ttl_secs, 300);
        assert_eq!(config.tokens.max_ttl_secs, 3_600);
        assert_eq!(config.gateway.port, 8765);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.engine.hard_cap_tokens, config.engine.hard_cap_tokens);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.storage.backend, StorageBackend::Sqlite);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[engine]\nestimator = \"words\"\nhard_cap_tokens = 2000\n\n[storage]\nbackend = \"memory\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.engine.estimator, EstimatorKind::Words);
        assert_eq!(config.engine.hard_cap_tokens, 2000);
        assert_eq!(config.engine.overfetch_k, 20);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine\noverfetch_k = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn zero_overfetch_rejected() {
        let mut config = AppConfig::default();
        config.engine.overfetch_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_ttl_above_max_rejected() {
        let mut config = AppConfig::default();
        config.tokens.default_ttl_secs = 7_200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn public_bind_requires_opt_in() {
        let mut config = AppConfig::default();
        config.gateway.host = "0.0.0.0".into();
        assert!(config.validate().is_err());
        config.gateway.allow_public_bind = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MYND_DATA_DIR", "/var/lib/mynd"),
            ("MYND_TOKEN_SECRET", "0123456789abcdef0123"),
            ("MYND_PORT", "9000"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/mynd"));
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/mynd/mynd.db"));
        assert_eq!(config.gateway.port, 9000);
        assert!(config.tokens.secret.is_some());
    }

    #[test]
    fn bad_port_env_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|k| (k == "MYND_PORT").then(|| "not-a-port".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let mut config = AppConfig::default();
        config.tokens.secret = Some("super-secret-signing-key".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().engine.overfetch_k, 20);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[tokens]"));
        assert!(!toml_str.contains("secret"));
    }
}
