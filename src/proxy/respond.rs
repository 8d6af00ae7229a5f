use std::time::Duration;

use anyhow::Result;
use http::StatusCode;
use tokio::io::AsyncWrite;

use crate::io_util::{shutdown_with_timeout, write_all_with_timeout};

/// Render the fixed HTML error response used for conditions the proxy
/// reports itself (502 on unreachable origins, 400 on unparseable requests).
pub(crate) fn error_response(status: StatusCode) -> Vec<u8> {
    let code = status.as_u16();
    let message = status.canonical_reason().unwrap_or("Error");
    let body = format!("<html><body><h1>{code} {message}</h1></body></html>");
    format!(
        "HTTP/1.1 {code} {message}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Write the error response in full, then close the write side. Returns the
/// number of bytes sent so callers can account for them in the access log.
pub(crate) async fn send_error_response<S>(
    stream: &mut S,
    status: StatusCode,
    timeout_dur: Duration,
) -> Result<u64>
where
    S: AsyncWrite + Unpin,
{
    let response = error_response(status);
    write_all_with_timeout(
        stream,
        &response,
        timeout_dur,
        format!("writing {} response", status.as_u16()),
    )
    .await?;
    shutdown_with_timeout(stream, timeout_dur, "closing client stream after error").await?;
    Ok(response.len() as u64)
}
