use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use cachegate::{
    cli::LogFormat,
    proxy::{self, AppContext, cache::ResponseCache},
    settings::Settings,
};

use super::net::{find_free_port, wait_for_listener};

fn default_test_settings(port: u16) -> Settings {
    Settings {
        listen_port: port,
        max_connections: 64,
        cache_max_bytes: 1024 * 1024,
        cache_max_entries: 1024,
        client_timeout: 5,
        upstream_connect_timeout: 2,
        upstream_timeout: 5,
        tunnel_idle_timeout: 5,
        max_header_size: 8192,
        recv_chunk_size: 4096,
        tunnel_chunk_size: 8192,
        log: LogFormat::Text,
        metrics_listen: None,
    }
}

/// An in-process proxy bound to a loopback port, with direct access to its
/// cache for assertions.
pub struct ProxyHarness {
    pub addr: SocketAddr,
    pub settings: Arc<Settings>,
    pub cache: Arc<ResponseCache>,
    handle: JoinHandle<()>,
}

impl ProxyHarness {
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(modify: impl FnOnce(&mut Settings)) -> Result<Self> {
        let port = find_free_port()?;
        let mut settings = default_test_settings(port);
        modify(&mut settings);
        settings.validate()?;
        let settings = Arc::new(settings);

        let cache = Arc::new(ResponseCache::new(
            settings.cache_max_entries,
            settings.cache_max_bytes,
        )?);
        let app = AppContext::new(settings.clone(), cache.clone());
        let handle = tokio::spawn(async move {
            if let Err(err) = proxy::run(app).await {
                eprintln!("proxy exited with error: {err:?}");
            }
        });

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        wait_for_listener(addr).await?;
        Ok(Self {
            addr,
            settings,
            cache,
            handle,
        })
    }

    pub async fn connect(&self) -> Result<TcpStream> {
        Ok(TcpStream::connect(self.addr).await?)
    }

    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}
