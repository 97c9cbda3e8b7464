//! Server configuration.
//!
//! Configuration is read from a YAML document. Every field has a default, so
//! an empty document yields a server listening on `0.0.0.0:8081` with no
//! sites, which answers every request with 404.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

/// Environment variable naming the YAML configuration file.
pub const CONFIG_ENV: &str = "VIBE_CONFIG";

/// Environment variable overriding the listen address (`host:port`).
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ConnectorConfig,
    pub sessions: SessionConfig,
    pub sites: Vec<SiteConfig>,
    pub users: Vec<UserConfig>,
    pub groups: Vec<GroupConfig>,
    pub handlers: Vec<HandlerConfig>,
}

/// Settings consumed by the connector and its workers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Address to bind. Empty binds all interfaces.
    pub address: String,
    /// Virtual host. When set, requests for any other `Host` get a 404.
    pub host: String,
    pub port: u16,
    /// Size of the receive buffer and of the response output buffer.
    pub buffer_size: usize,
    pub client_timeout_ms: u64,
    /// Bound of the queue holding accepted clients while all workers are busy.
    pub max_clients: usize,
    pub max_header_size: usize,
    pub max_post_size: u64,
    pub max_workers: usize,
    pub tls: TlsConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            host: String::new(),
            port: 8081,
            buffer_size: 2048,
            client_timeout_ms: 45_000,
            max_clients: 150,
            max_header_size: 4096,
            max_post_size: 2_097_152,
            max_workers: 20,
            tls: TlsConfig::default(),
        }
    }
}

impl ConnectorConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    /// The `address:port` pair to bind.
    pub fn bind_addr(&self) -> String {
        let address = if self.address.is_empty() {
            "0.0.0.0"
        } else {
            self.address.as_str()
        };
        format!("{}:{}", address, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub certificate: PathBuf,
    pub key: PathBuf,
    pub key_password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_sessions: usize,
    /// Idle time after which an unreferenced session is evicted. Also the
    /// interval at which the reaper runs.
    pub session_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            session_timeout_ms: 45_000,
        }
    }
}

impl SessionConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub name: String,
    /// URI prefix the site is mounted at, e.g. `/share`. `/` or empty is the root.
    pub path: String,
    /// Directory the site serves files from.
    pub root: PathBuf,
    /// `basic`, `form` or anything else (which forbids every protected request).
    pub auth_type: String,
    pub auth_form: String,
    pub auth_realm: String,
    pub anonymous_access: bool,
    pub anonymous_user: String,
    pub default_documents: Vec<String>,
    pub error_pages: Vec<ErrorPageConfig>,
    pub mime_mappings: HashMap<String, String>,
    pub permissions: Vec<PermissionConfig>,
    /// strftime-style path of the access log file.
    pub access_log: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrorPageConfig {
    /// `"404"` or `"403.3"`.
    pub code: String,
    pub message: String,
    pub location: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub user: Option<String>,
    pub group: Option<String>,
    pub remote_address: Option<String>,
    pub allow: bool,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            user: None,
            group: None,
            remote_address: None,
            allow: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub guid: String,
    pub name: String,
    /// Plain-text password, hashed when the user store is built.
    pub password: Option<String>,
    pub password_sha256: Option<String>,
    pub disabled: bool,
    pub groups: Vec<String>,
    pub bypass_limits: bool,
    pub max_sessions: Option<u32>,
    pub max_sessions_per_ip: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub guid: String,
    pub name: String,
    pub disabled: bool,
    pub bypass_limits: bool,
    pub max_sessions: Option<u32>,
    pub max_sessions_per_ip: Option<u32>,
}

/// A request handler registration: built-in handler name plus the regex
/// matched against the site-relative request path.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerConfig {
    pub handler: String,
    pub url_pattern: String,
}

impl Config {
    /// Loads the configuration named by `VIBE_CONFIG`, falling back to the
    /// defaults, then applies the `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen) = std::env::var(LISTEN_ENV) {
            config.apply_listen(&listen)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("could not parse config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Overrides address and port from a `host:port` string.
    pub fn apply_listen(&mut self, listen: &str) -> anyhow::Result<()> {
        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("invalid listen address {:?}", listen))?;
        self.server.address = addr.ip().to_string();
        self.server.port = addr.port();
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.max_workers == 0 {
            bail!("server.max_workers must be at least 1");
        }
        if self.server.max_clients == 0 {
            bail!("server.max_clients must be at least 1");
        }
        if self.server.buffer_size == 0 {
            bail!("server.buffer_size must be at least 1");
        }
        if self.server.tls.enabled
            && (self.server.tls.certificate.as_os_str().is_empty()
                || self.server.tls.key.as_os_str().is_empty())
        {
            bail!("server.tls requires both certificate and key");
        }

        let mut paths = std::collections::HashSet::new();
        for site in &self.sites {
            let path = crate::site::normalize_site_path(&site.path);
            if !paths.insert(path.clone()) {
                bail!("duplicate site path {:?}", site.path);
            }
        }

        for handler in &self.handlers {
            regex::Regex::new(&handler.url_pattern).with_context(|| {
                format!(
                    "invalid url pattern {:?} for handler {:?}",
                    handler.url_pattern, handler.handler
                )
            })?;
        }

        Ok(())
    }
}
