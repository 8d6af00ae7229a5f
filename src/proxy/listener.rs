use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::metrics;

use super::{AppContext, handler};

pub async fn start_listener(app: AppContext) -> Result<()> {
    let port = app.settings.listen_port;
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .with_context(|| format!("failed to bind listener on port {port}"))?;
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, "proxy listener started");

    let max_connections = app.settings.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut next_conn: u64 = 0;
    loop {
        // Acquire the admission permit before accepting so the kernel queue,
        // not the process, absorbs excess load.
        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    error!(error = %err, "failed to accept incoming connection");
                    continue;
                }
            },
        };

        next_conn += 1;
        let conn = next_conn;
        debug!(conn, peer = %peer, "accepted connection");
        if let Err(err) = stream.set_nodelay(true) {
            debug!(conn, peer = %peer, error = %err, "failed to set TCP_NODELAY on client stream");
        }

        let connection_app = app.clone();
        tokio::spawn(async move {
            let _permit = permit;
            metrics::record_connection_opened();
            if let Err(err) = handler::handle_client(stream, peer, conn, connection_app).await {
                debug!(conn, peer = %peer, error = %err, "connection closed with error");
            }
            metrics::record_connection_closed();
        });
    }

    // Stop accepting, then wait for every in-flight handler to give its
    // permit back before exiting.
    drop(listener);
    info!("shutdown requested; draining in-flight connections");
    let _ = semaphore.acquire_many(max_connections as u32).await;
    info!("all connections drained");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
    info!("shutdown signal received");
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
