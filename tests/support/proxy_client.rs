use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Send one raw request and collect everything the proxy returns until it
/// closes the connection.
pub async fn send_request(addr: SocketAddr, request: &[u8]) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(request).await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(response)
}

/// Build an absolute-form GET for `authority` with a matching Host header.
pub fn get_request(authority: &str, path: &str) -> Vec<u8> {
    format!("GET http://{authority}{path} HTTP/1.1\r\nHost: {authority}\r\n\r\n").into_bytes()
}
