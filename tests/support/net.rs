use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::net::TcpStream;

/// Reserve a port by binding an ephemeral listener and dropping it.
pub fn find_free_port() -> Result<u16> {
    let listener = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .context("failed to bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// A port with nothing listening on it, for connect-failure scenarios.
pub fn unused_port() -> Result<u16> {
    find_free_port()
}

/// Poll until something accepts on `addr`, so tests do not race the proxy's
/// bind.
pub async fn wait_for_listener(addr: SocketAddr) -> Result<()> {
    for _ in 0..200 {
        if TcpStream::connect(addr).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("no listener came up on {addr}");
}
