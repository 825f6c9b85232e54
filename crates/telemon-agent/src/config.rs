use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Grpc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    /// One request per metric, fanned out over the worker pool.
    #[default]
    Single,
    /// One request carrying the whole snapshot.
    Batch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub send_mode: SendMode,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Number of sender workers.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// Shared HMAC key; requests are signed when set.
    #[serde(default)]
    pub signing_key: Option<String>,
    /// Server RSA public key; gRPC updates are encrypted when set.
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Sent as `X-Real-IP` for the server's trusted-subnet check.
    #[serde(default)]
    pub client_ip: Option<String>,
}

fn default_server_address() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    1
}

fn default_request_timeout() -> u64 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            transport: TransportKind::default(),
            send_mode: SendMode::default(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            rate_limit: default_rate_limit(),
            signing_key: None,
            public_key_path: None,
            request_timeout_secs: default_request_timeout(),
            client_ip: None,
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

impl AgentConfig {
    /// Reads the TOML file at `path`. A missing file yields the defaults so
    /// the agent can be configured from the environment alone.
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

    /// Applies environment overrides. Values found by `lookup` win over the
    /// file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = lookup("ADDRESS") {
            self.server_address = v;
        }
        if let Some(v) = lookup("KEY") {
            self.signing_key = Some(v);
        }
        if let Some(v) = lookup("RATE_LIMIT") {
            self.rate_limit = parse_env("RATE_LIMIT", &v)?;
        }
        if let Some(v) = lookup("REPORT_INTERVAL") {
            self.report_interval_secs = parse_env("REPORT_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("POLL_INTERVAL") {
            self.poll_interval_secs = parse_env("POLL_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("CRYPTO_KEY") {
            self.public_key_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_address.trim().is_empty() {
            bail!("server_address must not be empty");
        }
        if self.poll_interval_secs == 0 || self.report_interval_secs == 0 {
            bail!("poll_interval_secs and report_interval_secs must be positive");
        }
        if self.rate_limit == 0 {
            bail!("rate_limit must be at least 1");
        }
        Ok(())
    }

    /// Base URL of the server, defaulting to `http://` when no scheme is given.
    pub fn server_url(&self) -> String {
        let addr = self.server_address.trim().trim_end_matches('/');
        if addr.contains("://") {
            return addr.to_string();
        }
        format!("http://{addr}")
    }

    pub fn signing_key(&self) -> Option<&[u8]> {
        self.signing_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(str::as_bytes)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
