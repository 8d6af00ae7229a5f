use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use http::StatusCode;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::io_util::{shutdown_with_timeout, write_all_with_timeout};
use crate::logging::AccessLogBuilder;
use crate::metrics;

use super::AppContext;
use super::codec::RequestHead;
use super::request::{parse_connect_target, request_target};
use super::respond::send_error_response;
use super::upstream::connect_to_remote;

const ESTABLISHED: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// Serve one CONNECT request: open the upstream connection, confirm the
/// tunnel to the client, then relay raw bytes in both directions until one
/// side closes or the tunnel sits idle past the configured timeout.
pub(super) async fn handle_connect(
    mut stream: TcpStream,
    peer: SocketAddr,
    conn: u64,
    head: RequestHead,
    app: &AppContext,
) -> Result<()> {
    let start = Instant::now();
    let settings = &app.settings;
    let client_timeout = settings.client_timeout();
    let bytes_in = head.total_len() as u64;
    let log = AccessLogBuilder::new(peer, conn).method("CONNECT");

    let target = request_target(&head.head).map(str::to_owned);
    let parts = match target.as_deref().map(parse_connect_target) {
        Some(Ok(parts)) => parts,
        Some(Err(err)) => {
            warn!(conn, target = target.as_deref().unwrap_or(""), error = %err, "invalid CONNECT target");
            let sent = send_error_response(&mut stream, StatusCode::BAD_REQUEST, client_timeout)
                .await
                .unwrap_or(0);
            log.target(target.unwrap_or_default())
                .outcome("ERROR")
                .status(StatusCode::BAD_REQUEST)
                .bytes(bytes_in, sent)
                .elapsed(start.elapsed())
                .log();
            return Ok(());
        }
        None => {
            warn!(conn, peer = %peer, "malformed CONNECT request line; dropping connection");
            let sent = send_error_response(&mut stream, StatusCode::BAD_REQUEST, client_timeout)
                .await
                .unwrap_or(0);
            log.outcome("ERROR")
                .status(StatusCode::BAD_REQUEST)
                .bytes(bytes_in, sent)
                .elapsed(start.elapsed())
                .log();
            return Ok(());
        }
    };
    let log = log.target(format!("{}:{}", parts.host, parts.port));

    info!(conn, host = %parts.host, port = parts.port, "establishing tunnel");
    let mut upstream = match connect_to_remote(
        &parts.host,
        parts.port,
        settings.upstream_connect_timeout(),
    )
    .await
    {
        Ok(stream) => stream,
        Err(err) => {
            // Tunnel failures get no HTTP reply; the client only sees the close.
            error!(conn, host = %parts.host, port = parts.port, error = %err, "failed to open tunnel");
            log.outcome("ERROR")
                .bytes(bytes_in, 0)
                .elapsed(start.elapsed())
                .log();
            return Ok(());
        }
    };

    write_all_with_timeout(
        &mut stream,
        ESTABLISHED,
        client_timeout,
        "writing tunnel established reply",
    )
    .await?;

    if !head.remainder.is_empty() {
        write_all_with_timeout(
            &mut upstream,
            &head.remainder,
            settings.upstream_timeout(),
            "forwarding buffered tunnel bytes",
        )
        .await?;
    }

    let (client_bytes, upstream_bytes) = relay_until_idle(
        &mut stream,
        &mut upstream,
        conn,
        settings.tunnel_idle_timeout(),
        settings.client_timeout(),
        settings.tunnel_chunk_size,
    )
    .await;
    metrics::record_tunnel_bytes(client_bytes + upstream_bytes);

    let _ = shutdown_with_timeout(&mut stream, client_timeout, "closing client stream").await;
    let _ = shutdown_with_timeout(
        &mut upstream,
        settings.upstream_timeout(),
        "closing upstream stream",
    )
    .await;

    info!(
        conn,
        host = %parts.host,
        port = parts.port,
        client_bytes,
        upstream_bytes,
        "tunnel closed"
    );
    log.outcome("TUNNEL")
        .status(StatusCode::OK)
        .bytes(
            bytes_in + client_bytes,
            ESTABLISHED.len() as u64 + upstream_bytes,
        )
        .elapsed(start.elapsed())
        .log();
    Ok(())
}

enum TunnelEvent {
    Client(std::io::Result<usize>),
    Upstream(std::io::Result<usize>),
}

/// Relay bytes between the two sides of the tunnel. Each readiness wake
/// handles one chunk from one direction, so neither side can starve the
/// other. Returns the byte counts relayed client→upstream and
/// upstream→client.
pub(crate) async fn relay_until_idle<C, U>(
    client: &mut C,
    upstream: &mut U,
    conn: u64,
    idle_timeout: Duration,
    write_timeout: Duration,
    chunk_size: usize,
) -> (u64, u64)
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_reader, mut client_writer) = io::split(client);
    let (mut upstream_reader, mut upstream_writer) = io::split(upstream);

    let mut client_chunk = vec![0u8; chunk_size];
    let mut upstream_chunk = vec![0u8; chunk_size];
    let mut client_bytes = 0u64;
    let mut upstream_bytes = 0u64;

    loop {
        let event = timeout(idle_timeout, async {
            tokio::select! {
                read = client_reader.read(&mut client_chunk) => TunnelEvent::Client(read),
                read = upstream_reader.read(&mut upstream_chunk) => TunnelEvent::Upstream(read),
            }
        })
        .await;

        match event {
            Err(_) => {
                info!(conn, "tunnel idle timeout");
                break;
            }
            Ok(TunnelEvent::Client(Ok(0))) => {
                debug!(conn, "client closed tunnel");
                break;
            }
            Ok(TunnelEvent::Client(Ok(read))) => {
                if let Err(err) = write_all_with_timeout(
                    &mut upstream_writer,
                    &client_chunk[..read],
                    write_timeout,
                    "forwarding tunnel bytes to remote host",
                )
                .await
                {
                    debug!(conn, error = %err, "tunnel write to remote host failed");
                    break;
                }
                client_bytes += read as u64;
            }
            Ok(TunnelEvent::Client(Err(err))) => {
                debug!(conn, error = %err, "tunnel read from client failed");
                break;
            }
            Ok(TunnelEvent::Upstream(Ok(0))) => {
                debug!(conn, "remote host closed tunnel");
                break;
            }
            Ok(TunnelEvent::Upstream(Ok(read))) => {
                if let Err(err) = write_all_with_timeout(
                    &mut client_writer,
                    &upstream_chunk[..read],
                    write_timeout,
                    "forwarding tunnel bytes to client",
                )
                .await
                {
                    debug!(conn, error = %err, "tunnel write to client failed");
                    break;
                }
                upstream_bytes += read as u64;
            }
            Ok(TunnelEvent::Upstream(Err(err))) => {
                debug!(conn, error = %err, "tunnel read from remote host failed");
                break;
            }
        }
    }

    (client_bytes, upstream_bytes)
}
