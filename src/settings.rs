use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::warn;

use crate::cli::{Cli, LogFormat};

fn default_listen_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    2000
}

fn default_cache_max_bytes() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_client_timeout() -> u64 {
    30
}

fn default_upstream_connect_timeout() -> u64 {
    30
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_tunnel_idle_timeout() -> u64 {
    100
}

fn default_max_header_size() -> usize {
    8192
}

fn default_recv_chunk_size() -> usize {
    4096
}

fn default_tunnel_chunk_size() -> usize {
    8192
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
    #[serde(default = "default_tunnel_idle_timeout")]
    pub tunnel_idle_timeout: u64,
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    #[serde(default = "default_recv_chunk_size")]
    pub recv_chunk_size: usize,
    #[serde(default = "default_tunnel_chunk_size")]
    pub tunnel_chunk_size: usize,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = cli.config.as_deref() {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        } else if let Some(path) = default_config_candidates().iter().find(|p| p.exists()) {
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("CACHEGATE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply the positional port argument. An invalid value keeps the
    /// configured port rather than aborting startup.
    pub fn apply_cli_port(&mut self, cli: &Cli) {
        let Some(raw) = cli.port.as_deref() else {
            return;
        };
        match parse_port(raw) {
            Some(port) => self.listen_port = port,
            None => warn!(
                value = raw,
                fallback = self.listen_port,
                "invalid port argument; using configured port"
            ),
        }
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn tunnel_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_idle_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_connections > 0,
            "max_connections must be at least 1 (got {})",
            self.max_connections
        );
        ensure!(
            self.cache_max_bytes > 0,
            "cache_max_bytes must be greater than 0 (got {})",
            self.cache_max_bytes
        );
        ensure!(
            self.cache_max_entries > 0,
            "cache_max_entries must be greater than 0 (got {})",
            self.cache_max_entries
        );
        ensure!(
            self.max_header_size > 0,
            "max_header_size must be greater than 0 (got {})",
            self.max_header_size
        );
        ensure!(
            self.recv_chunk_size > 0,
            "recv_chunk_size must be greater than 0 (got {})",
            self.recv_chunk_size
        );
        ensure!(
            self.tunnel_chunk_size > 0,
            "tunnel_chunk_size must be greater than 0 (got {})",
            self.tunnel_chunk_size
        );
        ensure!(
            self.client_timeout > 0,
            "client_timeout must be greater than 0 seconds (got {})",
            self.client_timeout
        );
        ensure!(
            self.upstream_connect_timeout > 0,
            "upstream_connect_timeout must be greater than 0 seconds (got {})",
            self.upstream_connect_timeout
        );
        ensure!(
            self.upstream_timeout > 0,
            "upstream_timeout must be greater than 0 seconds (got {})",
            self.upstream_timeout
        );
        ensure!(
            self.tunnel_idle_timeout > 0,
            "tunnel_idle_timeout must be greater than 0 seconds (got {})",
            self.tunnel_idle_timeout
        );
        Ok(())
    }
}

fn parse_port(value: &str) -> Option<u16> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/cachegate/cachegate.toml"),
        PathBuf::from("cachegate.toml"),
    ]
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}
