use crate::error::AppError;
use ddo_registry_common::address::{is_valid_address, normalize_address};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(skip)]
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Upper bound on a single store round-trip.
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Bearer token granting the administrative capability. Unset means no
    /// caller holds it.
    pub admin_token: Option<String>,
    /// Addresses allowed to update ratings.
    #[serde(default)]
    pub allowed_updaters: Vec<String>,
    #[serde(default = "default_signature_timeout_ms")]
    pub signature_timeout_ms: u64,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Reject any asset whose price is not `"0"`.
    #[serde(default)]
    pub allow_free_assets_only: bool,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Fjall,
    Memory,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/registry")
}

fn default_store_timeout_ms() -> u64 {
    5000
}

fn default_signature_timeout_ms() -> u64 {
    2000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_token: None,
            allowed_updaters: Vec::new(),
            signature_timeout_ms: default_signature_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AuthConfig {
    pub fn signature_timeout(&self) -> Duration {
        Duration::from_millis(self.signature_timeout_ms)
    }
}

impl AppConfig {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, AppError> {
        let path = config_path
            .or_else(|| std::env::var("REGISTRY_CONFIG_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config.toml"));

        if !path.exists() {
            return Err(AppError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(&path).map_err(AppError::Io)?;
        let mut config = Self::from_toml(&contents)
            .map_err(|e| AppError::Config(format!("failed to parse {}: {e}", path.display())))?;

        config.config_path = path;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<AppConfig>(contents)
    }

    /// Apply `REGISTRY_*` overrides from `lookup` (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("REGISTRY_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("REGISTRY_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| AppError::Config(format!("invalid REGISTRY_SERVER_PORT: {e}")))?;
        }
        if let Some(level) = lookup("REGISTRY_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(format) = lookup("REGISTRY_LOG_FORMAT") {
            self.log.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(AppError::Config(format!(
                        "invalid REGISTRY_LOG_FORMAT '{other}', expected 'text' or 'json'"
                    )));
                }
            };
        }

        // Store env var overrides
        if let Some(backend) = lookup("REGISTRY_STORE_BACKEND") {
            self.store.backend = match backend.to_lowercase().as_str() {
                "fjall" => StoreBackend::Fjall,
                "memory" => StoreBackend::Memory,
                other => {
                    return Err(AppError::Config(format!(
                        "invalid REGISTRY_STORE_BACKEND '{other}', expected 'fjall' or 'memory'"
                    )));
                }
            };
        }
        if let Some(data_dir) = lookup("REGISTRY_STORE_DATA_DIR") {
            self.store.data_dir = PathBuf::from(data_dir);
        }
        if let Some(timeout) = lookup("REGISTRY_STORE_TIMEOUT_MS") {
            self.store.timeout_ms = timeout
                .parse()
                .map_err(|e| AppError::Config(format!("invalid REGISTRY_STORE_TIMEOUT_MS: {e}")))?;
        }

        // Auth and policy env var overrides
        if let Some(token) = lookup("REGISTRY_ADMIN_TOKEN") {
            self.auth.admin_token = Some(token);
        }
        if let Some(updaters) = lookup("REGISTRY_ALLOWED_UPDATERS") {
            self.auth.allowed_updaters = updaters
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(flag) = lookup("REGISTRY_ALLOW_FREE_ASSETS_ONLY") {
            self.policy.allow_free_assets_only = flag.parse().map_err(|e| {
                AppError::Config(format!("invalid REGISTRY_ALLOW_FREE_ASSETS_ONLY: {e}"))
            })?;
        }

        Ok(())
    }

    /// Reject settings that would only fail later at request time, and
    /// lower-case the updater allow-list.
    pub fn validate(&mut self) -> Result<(), AppError> {
        if let Some(bad) = self
            .auth
            .allowed_updaters
            .iter()
            .find(|a| !is_valid_address(a))
        {
            return Err(AppError::Config(format!(
                "invalid address in auth.allowed_updaters: {bad}"
            )));
        }
        self.auth.allowed_updaters = self
            .auth
            .allowed_updaters
            .iter()
            .map(|a| normalize_address(a))
            .collect::<Result<_, _>>()?;

        if self.auth.admin_token.as_deref() == Some("") {
            return Err(AppError::Config("auth.admin_token must not be empty".into()));
        }
        if self.store.timeout_ms == 0 || self.auth.signature_timeout_ms == 0 {
            return Err(AppError::Config("timeouts must be greater than zero".into()));
        }
        Ok(())
    }
}
