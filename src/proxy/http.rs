use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Result;
use http::StatusCode;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::io_util::{shutdown_with_timeout, write_all_with_timeout};
use crate::logging::AccessLogBuilder;
use crate::metrics;

use super::AppContext;
use super::codec::RequestHead;
use super::headers::rewrite_request;
use super::request::{parse_absolute_url, request_target};
use super::respond::send_error_response;
use super::upstream::connect_to_remote;

/// Serve one absolute-form GET: probe the cache, otherwise rewrite the
/// request to origin-form, stream the origin's response back, and insert the
/// captured body when it fits the cache limit.
pub(super) async fn handle_get(
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
    let log = AccessLogBuilder::new(peer, conn).method("GET");

    let Some(url) = request_target(&head.head).map(str::to_owned) else {
        warn!(conn, peer = %peer, "malformed request line; dropping connection");
        let sent = send_error_response(&mut stream, StatusCode::BAD_REQUEST, client_timeout)
            .await
            .unwrap_or(0);
        log.outcome("ERROR")
            .status(StatusCode::BAD_REQUEST)
            .bytes(bytes_in, sent)
            .elapsed(start.elapsed())
            .log();
        return Ok(());
    };
    let log = log.target(url.clone());

    if let Some(body) = app.cache.find(&url) {
        metrics::record_cache_lookup(true);
        info!(conn, url = %url, "CACHE_HIT");
        write_all_with_timeout(&mut stream, &body, client_timeout, "writing cached response")
            .await?;
        shutdown_with_timeout(&mut stream, client_timeout, "closing client stream").await?;
        log.outcome("CACHE_HIT")
            .bytes(bytes_in, body.len() as u64)
            .elapsed(start.elapsed())
            .log();
        return Ok(());
    }
    metrics::record_cache_lookup(false);
    info!(conn, url = %url, "CACHE_MISS");

    let parts = match parse_absolute_url(&url) {
        Ok(parts) => parts,
        Err(err) => {
            warn!(conn, url = %url, error = %err, "failed to parse request URL");
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

    debug!(conn, host = %parts.host, port = parts.port, "connecting to remote host");
    let mut upstream = match connect_to_remote(
        &parts.host,
        parts.port,
        settings.upstream_connect_timeout(),
    )
    .await
    {
        Ok(stream) => stream,
        Err(err) => {
            error!(conn, host = %parts.host, port = parts.port, error = %err, "failed to connect to remote host");
            let sent = send_error_response(&mut stream, StatusCode::BAD_GATEWAY, client_timeout)
                .await
                .unwrap_or(0);
            log.outcome("ERROR")
                .status(StatusCode::BAD_GATEWAY)
                .bytes(bytes_in, sent)
                .elapsed(start.elapsed())
                .log();
            return Ok(());
        }
    };

    let rewritten = rewrite_request(&head.head, &parts);
    debug!(conn, path = %parts.path, "forwarding rewritten request");
    if let Err(err) = write_all_with_timeout(
        &mut upstream,
        &rewritten,
        settings.upstream_timeout(),
        "forwarding request to remote host",
    )
    .await
    {
        error!(conn, error = %err, "failed to forward request");
        log.outcome("ERROR")
            .bytes(bytes_in, 0)
            .elapsed(start.elapsed())
            .log();
        return Ok(());
    }

    // Stream the response back, capturing it for the cache only while the
    // running total stays within the per-object limit.
    let mut chunk = vec![0u8; settings.recv_chunk_size];
    let mut captured: Vec<u8> = Vec::new();
    let mut capturing = true;
    let mut total: u64 = 0;

    loop {
        let read = match timeout(settings.upstream_timeout(), upstream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(read)) => read,
            Ok(Err(err)) => {
                debug!(conn, error = %err, "remote read ended with error");
                break;
            }
            Err(_) => {
                debug!(conn, "remote read timed out");
                break;
            }
        };

        if let Err(err) = write_all_with_timeout(
            &mut stream,
            &chunk[..read],
            client_timeout,
            "streaming response to client",
        )
        .await
        {
            debug!(conn, error = %err, "client went away mid-response");
            log.outcome("CACHE_MISS")
                .bytes(bytes_in, total)
                .elapsed(start.elapsed())
                .log();
            return Ok(());
        }

        total += read as u64;
        if capturing {
            if total <= settings.cache_max_bytes {
                captured.extend_from_slice(&chunk[..read]);
            } else {
                debug!(conn, url = %url, "response exceeds cache limit; not caching");
                capturing = false;
                captured = Vec::new();
            }
        }
    }

    if capturing && total > 0 {
        debug!(conn, url = %url, bytes = total, "CACHE_ADD");
        app.cache.add(&url, captured);
    }

    shutdown_with_timeout(&mut stream, client_timeout, "closing client stream").await?;
    log.outcome("CACHE_MISS")
        .bytes(bytes_in, total)
        .elapsed(start.elapsed())
        .log();
    Ok(())
}
