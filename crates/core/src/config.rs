//! Configuration management
//!
//! This module handles loading, saving, and migrating the s3sync configuration file.
//! The configuration file is stored in TOML format at ~/.config/s3sync/config.toml
//! unless overridden with `--config` or `S3SYNC_CONFIG`.
//!
//! When the TOML file carries no keys, the `[default]` section of an
//! s3cmd-style `~/.s3cfg` supplies `access_key` and `secret_key`.
//!
//! PROTECTED FILE: Changes to schema_version require migration support.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the configuration path
pub const CONFIG_ENV: &str = "S3SYNC_CONFIG";

/// Environment variable naming an s3cmd-style credentials file
pub const S3CMD_CONFIG_ENV: &str = "S3SYNC_S3CFG";

/// Default number of concurrent transfers
pub const DEFAULT_MAX_SOCKETS: usize = 30;

/// Default multipart part size in MiB
pub const DEFAULT_PART_SIZE_MIB: u64 = 64;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Access credentials
    #[serde(default)]
    pub credentials: Credentials,

    /// Endpoint settings
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Transfer settings
    #[serde(default)]
    pub transfer: TransferSettings,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Timeout configuration
    #[serde(default)]
    pub timeout: TimeoutConfig,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            credentials: Credentials::default(),
            endpoint: EndpointConfig::default(),
            transfer: TransferSettings::default(),
            retry: RetryConfig::default(),
            timeout: TimeoutConfig::default(),
        }
    }
}

/// Static access credentials
///
/// When either key is missing the AWS default credential chain is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

impl Credentials {
    /// Read keys from the `[default]` section of an s3cmd configuration file
    ///
    /// Returns `None` when the section lacks either key.
    pub fn from_s3cmd(path: &Path) -> Result<Option<Self>> {
        let ini = ini::Ini::load_from_file(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let Some(section) = ini.section(Some("default")) else {
            return Ok(None);
        };
        let credentials = Self {
            access_key: section.get("access_key").map(str::to_string),
            secret_key: section.get("secret_key").map(str::to_string),
        };
        Ok(credentials.static_keys().is_some().then_some(credentials))
    }

    /// Both keys, if both are configured and non-empty
    pub fn static_keys(&self) -> Option<(&str, &str)> {
        match (self.access_key.as_deref(), self.secret_key.as_deref()) {
            (Some(access), Some(secret)) if !access.is_empty() && !secret.is_empty() => {
                Some((access, secret))
            }
            _ => None,
        }
    }
}

/// Endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// S3 endpoint URL (AWS when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket lookup style: "auto", "path", or "dns"
    #[serde(default = "default_bucket_lookup")]
    pub bucket_lookup: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket_lookup() -> String {
    "auto".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            region: default_region(),
            bucket_lookup: default_bucket_lookup(),
        }
    }
}

/// Transfer settings from the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Maximum concurrent transfers
    #[serde(default = "default_max_sockets")]
    pub max_sockets: usize,

    /// Use plain HTTP instead of TLS
    #[serde(default)]
    pub insecure: bool,

    /// Compare content hashes before skipping equal-sized files
    #[serde(default = "default_true")]
    pub hash_check: bool,

    /// Multipart part size in MiB
    #[serde(default = "default_part_size_mib")]
    pub part_size_mib: u64,

    /// Longest a transfer attempt may go without moving a byte, in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
}

fn default_max_sockets() -> usize {
    DEFAULT_MAX_SOCKETS
}

fn default_true() -> bool {
    true
}

fn default_part_size_mib() -> u64 {
    DEFAULT_PART_SIZE_MIB
}

fn default_operation_timeout() -> u64 {
    300_000
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_sockets: default_max_sockets(),
            insecure: false,
            hash_check: true,
            part_size_mib: default_part_size_mib(),
            operation_timeout_ms: default_operation_timeout(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    10000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

/// Connection timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,

    /// Read timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_ms: u64,
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    30000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout(),
            read_ms: default_read_timeout(),
        }
    }
}

/// Settings consumed by the store client
///
/// Built once per invocation and passed to the client constructor.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credentials: Credentials,
    pub endpoint: EndpointConfig,
    pub insecure: bool,
    pub timeout: TimeoutConfig,
    pub part_size: u64,
}

/// Settings consumed by the transfer pool and the differ
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Maximum number of jobs executing at once
    pub max_concurrency: usize,
    /// Longest a job attempt may go without byte progress
    pub operation_timeout: Duration,
    /// Retry policy for a job attempt
    pub retry: RetryConfig,
    /// Compare content hashes before skipping
    pub hash_check: bool,
    /// Multipart part size in bytes, used for ETag comparison
    pub part_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_SOCKETS,
            operation_timeout: Duration::from_millis(default_operation_timeout()),
            retry: RetryConfig::default(),
            hash_check: true,
            part_size: DEFAULT_PART_SIZE_MIB * 1024 * 1024,
        }
    }
}

impl Config {
    /// Client settings derived from this configuration
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            credentials: self.credentials.clone(),
            endpoint: self.endpoint.clone(),
            insecure: self.transfer.insecure,
            timeout: self.timeout.clone(),
            part_size: self.transfer.part_size_mib.max(1) * 1024 * 1024,
        }
    }

    /// Transfer settings derived from this configuration
    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            max_concurrency: self.transfer.max_sockets.max(1),
            operation_timeout: Duration::from_millis(self.transfer.operation_timeout_ms),
            retry: self.retry.clone(),
            hash_check: self.transfer.hash_check,
            part_size: self.transfer.part_size_mib.max(1) * 1024 * 1024,
        }
    }

    /// Validate values that would otherwise fail late
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.endpoint.url {
            url::Url::parse(url)?;
        }
        match self.endpoint.bucket_lookup.as_str() {
            "auto" | "path" | "dns" => {}
            other => {
                return Err(Error::Config(format!(
                    "bucket_lookup must be auto, path or dns, got '{other}'"
                )));
            }
        }
        if self.transfer.max_sockets == 0 {
            return Err(Error::Config("max_sockets must be at least 1".into()));
        }
        Ok(())
    }
}

/// Where fallback s3cmd credentials come from
#[derive(Debug, Clone)]
enum S3cmdSource {
    /// `~/.s3cfg`; ignored when missing or unreadable
    Home(PathBuf),
    /// Named by the user; must exist and parse
    Explicit(PathBuf),
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
    s3cmd: Option<S3cmdSource>,
}

fn home_s3cmd() -> Option<S3cmdSource> {
    dirs::home_dir().map(|home| S3cmdSource::Home(home.join(".s3cfg")))
}

impl ConfigManager {
    /// Create a ConfigManager honoring `S3SYNC_CONFIG`, else the default path
    pub fn new() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(Self::with_path(PathBuf::from(path)));
        }
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".into()))?;
        let config_path = config_dir.join("s3sync").join("config.toml");
        Ok(Self::with_path(config_path))
    }

    /// Create a ConfigManager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config_path: path,
            s3cmd: home_s3cmd(),
        }
    }

    /// Take fallback credentials from `path` instead of `~/.s3cfg`
    pub fn with_s3cmd_path(mut self, path: PathBuf) -> Self {
        self.s3cmd = Some(S3cmdSource::Explicit(path));
        self
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// If the configuration file doesn't exist, returns a default configuration.
    /// If the schema version doesn't match, attempts migration.
    pub fn load(&self) -> Result<Config> {
        let mut config = self.load_toml()?;
        if config.credentials.static_keys().is_none() {
            if let Some(credentials) = self.s3cmd_credentials()? {
                config.credentials = credentials;
            }
        }
        Ok(config)
    }

    fn load_toml(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version < SCHEMA_VERSION {
            config = self.migrate(config)?;
        } else if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade s3sync.",
                config.schema_version, SCHEMA_VERSION
            )));
        }

        config.validate()?;
        Ok(config)
    }

    fn s3cmd_credentials(&self) -> Result<Option<Credentials>> {
        match &self.s3cmd {
            None => Ok(None),
            Some(S3cmdSource::Explicit(path)) => {
                if !path.exists() {
                    return Err(Error::Config(format!("{} does not exist", path.display())));
                }
                let credentials = Credentials::from_s3cmd(path)?;
                if credentials.is_none() {
                    return Err(Error::Config(format!(
                        "{} is missing access_key or secret_key",
                        path.display()
                    )));
                }
                Ok(credentials)
            }
            Some(S3cmdSource::Home(path)) if path.exists() => {
                match Credentials::from_s3cmd(path) {
                    Ok(credentials) => {
                        if credentials.is_some() {
                            tracing::debug!(path = %path.display(), "Using s3cmd credentials");
                        }
                        Ok(credentials)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring unreadable s3cmd configuration");
                        Ok(None)
                    }
                }
            }
            Some(S3cmdSource::Home(_)) => Ok(None),
        }
    }

    /// Save configuration to disk
    ///
    /// Creates parent directories if they don't exist.
    /// Sets file permissions to 600 (owner read/write only).
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.config_path, permissions)?;
        }

        Ok(())
    }

    /// Migrate configuration from older schema version
    fn migrate(&self, config: Config) -> Result<Config> {
        let mut config = config;
        config.schema_version = SCHEMA_VERSION;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let manager = ConfigManager::with_path(config_path);
        (manager, temp_dir)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transfer.max_sockets, 30);
        assert!(config.transfer.hash_check);
        assert!(!config.transfer.insecure);
        assert_eq!(config.endpoint.region, "us-east-1");
        assert!(config.credentials.static_keys().is_none());
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let (manager, _temp_dir) = temp_config_manager();
        let config = manager.load().unwrap();
        assert_eq!(config.transfer.max_sockets, DEFAULT_MAX_SOCKETS);
    }

    #[test]
    fn test_save_and_load() {
        let (manager, _temp_dir) = temp_config_manager();

        let mut config = Config::default();
        config.credentials.access_key = Some("AKIA".to_string());
        config.credentials.secret_key = Some("secret".to_string());
        config.endpoint.url = Some("http://localhost:9000".to_string());
        config.transfer.max_sockets = 8;

        manager.save(&config).unwrap();
        let loaded = manager.load().unwrap();

        assert_eq!(loaded.credentials.static_keys(), Some(("AKIA", "secret")));
        assert_eq!(loaded.endpoint.url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(loaded.transfer.max_sockets, 8);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let (manager, _temp_dir) = temp_config_manager();
        std::fs::write(
            manager.config_path(),
            "[credentials]\naccess_key = \"a\"\nsecret_key = \"b\"\n",
        )
        .unwrap();

        let config = manager.load().unwrap();
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.transfer.part_size_mib, DEFAULT_PART_SIZE_MIB);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_schema_version_too_new() {
        let (manager, _temp_dir) = temp_config_manager();

        let content = format!("schema_version = {}\n", SCHEMA_VERSION + 1);
        std::fs::write(manager.config_path(), content).unwrap();

        let result = manager.load();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("newer than supported"));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let (manager, _temp_dir) = temp_config_manager();
        std::fs::write(manager.config_path(), "[endpoint]\nurl = \"not a url\"\n").unwrap();
        assert!(matches!(manager.load(), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_invalid_bucket_lookup_rejected() {
        let (manager, _temp_dir) = temp_config_manager();
        std::fs::write(manager.config_path(), "[endpoint]\nbucket_lookup = \"x\"\n").unwrap();
        assert!(matches!(manager.load(), Err(Error::Config(_))));
    }

    fn write_s3cfg(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("s3cfg");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_s3cmd_keys_fill_missing_credentials() {
        let (manager, temp_dir) = temp_config_manager();
        let s3cfg = write_s3cfg(
            &temp_dir,
            "[default]\naccess_key = AKIAS3CMD\nsecret_key = s3cmd-secret\nuse_https = True\n",
        );

        let config = manager.with_s3cmd_path(s3cfg).load().unwrap();
        assert_eq!(
            config.credentials.static_keys(),
            Some(("AKIAS3CMD", "s3cmd-secret"))
        );
    }

    #[test]
    fn test_toml_keys_win_over_s3cmd() {
        let (manager, temp_dir) = temp_config_manager();
        let mut config = Config::default();
        config.credentials.access_key = Some("toml".into());
        config.credentials.secret_key = Some("toml-secret".into());
        manager.save(&config).unwrap();
        let s3cfg = write_s3cfg(&temp_dir, "[default]\naccess_key = a\nsecret_key = b\n");

        let loaded = manager.with_s3cmd_path(s3cfg).load().unwrap();
        assert_eq!(loaded.credentials.static_keys(), Some(("toml", "toml-secret")));
    }

    #[test]
    fn test_explicit_s3cmd_file_must_have_keys() {
        let (manager, temp_dir) = temp_config_manager();
        let s3cfg = write_s3cfg(&temp_dir, "[default]\naccess_key = only-half\n");
        let result = manager.with_s3cmd_path(s3cfg).load();
        assert!(matches!(result, Err(Error::Config(message)) if message.contains("secret_key")));

        let (manager, temp_dir) = temp_config_manager();
        let missing = temp_dir.path().join("nope");
        assert!(matches!(
            manager.with_s3cmd_path(missing).load(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_s3cmd_without_default_section() {
        let temp_dir = TempDir::new().unwrap();
        let s3cfg = write_s3cfg(&temp_dir, "[other]\naccess_key = a\nsecret_key = b\n");
        assert!(Credentials::from_s3cmd(&s3cfg).unwrap().is_none());
    }

    #[test]
    fn test_derived_configs() {
        let mut config = Config::default();
        config.transfer.max_sockets = 4;
        config.transfer.part_size_mib = 8;
        config.transfer.hash_check = false;

        let transfer = config.transfer_config();
        assert_eq!(transfer.max_concurrency, 4);
        assert_eq!(transfer.part_size, 8 * 1024 * 1024);
        assert!(!transfer.hash_check);

        let client = config.client_config();
        assert!(!client.insecure);
        assert_eq!(client.part_size, 8 * 1024 * 1024);
    }
}
