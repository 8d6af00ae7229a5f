use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::metrics;

use super::codec::{HeadOutcome, read_request_head};
use super::request::{method_token, starts_with_method};
use super::{AppContext, connect, http};

/// Drive one accepted client connection from first byte to close. The caller
/// holds the admission permit and the socket for the duration of this call,
/// so every return path releases both.
pub(super) async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    conn: u64,
    app: AppContext,
) -> Result<()> {
    let settings = &app.settings;
    let outcome = read_request_head(
        &mut stream,
        settings.client_timeout(),
        settings.max_header_size,
        settings.recv_chunk_size,
    )
    .await?;

    let head = match outcome {
        HeadOutcome::Complete(head) => head,
        HeadOutcome::Disconnected { received: 0 } => {
            info!(conn, peer = %peer, "client disconnected immediately or timed out");
            return Ok(());
        }
        HeadOutcome::Disconnected { received } => {
            info!(conn, peer = %peer, received, "client disconnected while sending request headers");
            return Ok(());
        }
        HeadOutcome::Oversize => {
            warn!(conn, peer = %peer, limit = settings.max_header_size, "Header too large; dropping connection");
            metrics::record_request("OVERSIZE");
            return Ok(());
        }
    };

    if starts_with_method(&head.head, "CONNECT") {
        debug!(conn, peer = %peer, "CONNECT request received");
        connect::handle_connect(stream, peer, conn, head, &app).await
    } else if starts_with_method(&head.head, "GET") {
        debug!(conn, peer = %peer, "GET request received");
        http::handle_get(stream, peer, conn, head, &app).await
    } else {
        let method = method_token(&head.head);
        warn!(conn, peer = %peer, method = %method, "unsupported HTTP method; dropping connection");
        metrics::record_request("UNSUPPORTED");
        Ok(())
    }
}
