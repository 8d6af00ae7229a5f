use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::debug;

use crate::util::timeout_with_context;

/// Resolve `host` and connect to the first address that answers within the
/// timeout. Any failure (resolution, no addresses, connect) surfaces as one
/// error; the caller decides whether that becomes a 502 or a dropped tunnel.
pub async fn connect_to_remote(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream> {
    let addrs: Vec<_> = timeout_with_context(
        connect_timeout,
        lookup_host((host, port)),
        format!("resolving {host}:{port}"),
    )
    .await?
    .collect();

    let mut last_err = None;
    for addr in addrs {
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(host, port, error = %err, "failed to set TCP_NODELAY on upstream stream");
                }
                debug!(host, port, addr = %addr, "connected to remote host");
                return Ok(stream);
            }
            Ok(Err(err)) => {
                let err = Err::<(), std::io::Error>(err)
                    .with_context(|| format!("failed to connect to {addr}"))
                    .unwrap_err();
                last_err = Some(err);
            }
            Err(_) => {
                last_err = Some(anyhow!("connection to {addr} timed out"));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{host}:{port} resolved to no addresses")))
}
