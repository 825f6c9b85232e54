use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemon_common::security::TrustedSubnet;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_address")]
    pub http_address: String,
    #[serde(default = "default_grpc_address")]
    pub grpc_address: String,
    /// Shared HMAC key. When set, update requests must be signed and JSON
    /// responses are signed.
    #[serde(default)]
    pub signing_key: Option<String>,
    /// CIDR the `X-Real-IP` of ingestion calls must fall into.
    #[serde(default)]
    pub trusted_subnet: Option<String>,
    /// RSA private key for `UpdateMetricValueEncrypted`.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// How long in-flight requests may run after shutdown starts.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Relational backend DSN (`postgres://...`, `sqlite://...`). Takes
    /// precedence over the file backend.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_file_path")]
    pub file_path: PathBuf,
    /// Dump period; 0 saves after every update request.
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,
    #[serde(default = "default_restore")]
    pub restore: bool,
}

fn default_http_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_grpc_address() -> String {
    "0.0.0.0:3200".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_file_path() -> PathBuf {
    PathBuf::from("data/metrics.dump")
}

fn default_store_interval() -> u64 {
    300
}

fn default_restore() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            file_path: default_file_path(),
            store_interval_secs: default_store_interval(),
            restore: default_restore(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_address: default_http_address(),
            grpc_address: default_grpc_address(),
            signing_key: None,
            trusted_subnet: None,
            private_key_path: None,
            shutdown_timeout_secs: default_shutdown_timeout(),
            storage: StorageConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid {name}='{raw}': {e}"))
}

impl ServerConfig {
    /// Reads the TOML file at `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Applies environment overrides; values found by `lookup` win over the
    /// file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = lookup("ADDRESS") {
            self.http_address = v;
        }
        if let Some(v) = lookup("KEY") {
            self.signing_key = Some(v);
        }
        if let Some(v) = lookup("DATABASE_DSN") {
            self.storage.database_url = Some(v);
        }
        if let Some(v) = lookup("FILE_STORAGE_PATH") {
            self.storage.file_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("STORE_INTERVAL") {
            self.storage.store_interval_secs = parse_env("STORE_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("RESTORE") {
            self.storage.restore = parse_env("RESTORE", &v)?;
        }
        if let Some(v) = lookup("TRUSTED_SUBNET") {
            self.trusted_subnet = Some(v);
        }
        if let Some(v) = lookup("CRYPTO_KEY") {
            self.private_key_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.http_address.trim().is_empty() || self.grpc_address.trim().is_empty() {
            bail!("http_address and grpc_address must not be empty");
        }
        if self.http_address.trim() == self.grpc_address.trim() {
            bail!("http_address and grpc_address must differ");
        }
        if matches!(self.signing_key.as_deref(), Some("")) {
            bail!("signing_key must not be empty when set");
        }
        self.trusted_subnet()?;
        Ok(())
    }

    pub fn signing_key(&self) -> Option<&[u8]> {
        self.signing_key.as_deref().map(str::as_bytes)
    }

    pub fn trusted_subnet(&self) -> anyhow::Result<Option<TrustedSubnet>> {
        self.trusted_subnet
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(TrustedSubnet::parse)
            .transpose()
            .context("invalid trusted_subnet")
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Database URL with the password masked, for logging.
    pub fn redacted_database_url(&self) -> Option<String> {
        let url = self.storage.database_url.as_deref()?;
        let Some((scheme, rest)) = url.split_once("://") else {
            return Some(url.to_string());
        };
        let Some((credentials, host)) = rest.rsplit_once('@') else {
            return Some(url.to_string());
        };
        match credentials.split_once(':') {
            Some((user, _)) => Some(format!("{scheme}://{user}:***@{host}")),
            None => Some(url.to_string()),
        }
    }
}
