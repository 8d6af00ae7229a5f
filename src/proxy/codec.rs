use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::util::find_subsequence;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// A complete request head plus any bytes the client sent past the blank
/// line. For CONNECT those bytes belong to the tunnel and must be forwarded
/// before the relay starts.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub head: Vec<u8>,
    pub remainder: Vec<u8>,
}

impl RequestHead {
    pub fn total_len(&self) -> usize {
        self.head.len() + self.remainder.len()
    }
}

#[derive(Debug)]
pub(crate) enum HeadOutcome {
    Complete(RequestHead),
    /// The peer closed, or a read timed out, before the header terminator
    /// arrived.
    Disconnected { received: usize },
    /// The accumulation cap was reached without seeing the terminator.
    Oversize,
}

/// Accumulate request bytes in `chunk_size` reads until the `\r\n\r\n`
/// terminator appears or `max_header_size` bytes have been buffered.
pub(crate) async fn read_request_head<S>(
    stream: &mut S,
    read_timeout: Duration,
    max_header_size: usize,
    chunk_size: usize,
) -> Result<HeadOutcome>
where
    S: AsyncRead + Unpin,
{
    let mut buffer: Vec<u8> = Vec::with_capacity(chunk_size);
    let mut chunk = vec![0u8; chunk_size];

    loop {
        let read = match timeout(read_timeout, stream.read(&mut chunk)).await {
            Ok(Ok(read)) => read,
            Ok(Err(err)) => return Err(err).context("reading request from client"),
            Err(_) => {
                return Ok(HeadOutcome::Disconnected {
                    received: buffer.len(),
                });
            }
        };
        if read == 0 {
            return Ok(HeadOutcome::Disconnected {
                received: buffer.len(),
            });
        }
        buffer.extend_from_slice(&chunk[..read]);

        if let Some(pos) = find_subsequence(&buffer, HEADER_END) {
            let remainder = buffer.split_off(pos + HEADER_END.len());
            return Ok(HeadOutcome::Complete(RequestHead {
                head: buffer,
                remainder,
            }));
        }
        if buffer.len() >= max_header_size {
            return Ok(HeadOutcome::Oversize);
        }
    }
}
