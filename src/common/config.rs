//! Configuration for the client

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file used by the CLI
pub const CONFIG_ENV: &str = "PEGASUS_CLIENT_CONFIG";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Meta server seeds (`host:port`)
    pub meta_servers: Vec<String>,

    /// Table to operate on
    #[serde(default = "default_table")]
    pub table: String,

    /// Default per-operation timeout
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Upper bound for `init()` including retries
    #[serde(default = "default_init_timeout")]
    pub init_timeout_ms: u64,

    /// First backoff delay between meta query attempts
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_table() -> String {
    "temp".to_string()
}
fn default_operation_timeout() -> u64 {
    1000
}
fn default_connect_timeout() -> u64 {
    1000
}
fn default_init_timeout() -> u64 {
    5000
}
fn default_retry_delay() -> u64 {
    50
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            meta_servers: vec!["127.0.0.1:34601".to_string()],
            table: default_table(),
            operation_timeout_ms: default_operation_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            init_timeout_ms: default_init_timeout(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl ClientConfig {
    /// Config for the given seeds and table, defaults elsewhere
    pub fn new<S: Into<String>>(meta_servers: impl IntoIterator<Item = S>, table: &str) -> Self {
        Self {
            meta_servers: meta_servers.into_iter().map(Into::into).collect(),
            table: table.to_string(),
            ..Default::default()
        }
    }

    /// Load from a TOML file; `PEGASUS_*` environment variables override it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("PEGASUS")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("meta_servers"),
            )
            .build()?;
        let config: ClientConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check seeds and table name
    pub fn validate(&self) -> Result<()> {
        if self.meta_servers.is_empty() {
            return Err(Error::InvalidConfig("meta_servers is empty".into()));
        }
        for addr in &self.meta_servers {
            addr.parse::<SocketAddr>().map_err(|_| {
                Error::InvalidConfig(format!("invalid meta server address: {}", addr))
            })?;
        }
        if self.table.is_empty() {
            return Err(Error::InvalidConfig("table name is empty".into()));
        }
        if self.operation_timeout_ms == 0 {
            return Err(Error::InvalidConfig("operation_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
