use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    time::timeout,
};

const METRICS_READ_TIMEOUT: Duration = Duration::from_secs(5);
const METRICS_MAX_REQUEST_BYTES: usize = 8192;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("connections_total", "Accepted client connections")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register connections_total");
    counter
});

static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("connections_active", "Client connections currently in flight")
        .expect("create gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register connections_active");
    gauge
});

static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_total", "Finished requests by outcome");
    let vec = IntCounterVec::new(opts, &["outcome"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_total");
    vec
});

static RESPONSE_STATUS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("response_status_total", "Responses by status class");
    let vec = IntCounterVec::new(opts, &["status_class"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register response_status_total");
    vec
});

static CACHE_LOOKUPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookups_total", "Cache lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookups_total");
    vec
});

static CACHE_STORES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_stores_total", "Responses inserted into the cache")
            .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_stores_total");
    counter
});

static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_evictions_total", "Entries evicted from the cache")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_evictions_total");
    counter
});

static CACHE_BYTES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("cache_bytes", "Bytes currently held by the cache")
        .expect("create gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register cache_bytes");
    gauge
});

static TUNNEL_BYTES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("tunnel_bytes_total", "Bytes relayed through CONNECT tunnels")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register tunnel_bytes_total");
    counter
});

pub fn record_connection_opened() {
    CONNECTIONS_TOTAL.inc();
    CONNECTIONS_ACTIVE.inc();
}

pub fn record_connection_closed() {
    CONNECTIONS_ACTIVE.dec();
}

pub fn record_request(outcome: &str) {
    REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_response_status(status: u16) {
    let class = match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };
    RESPONSE_STATUS_TOTAL.with_label_values(&[class]).inc();
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    CACHE_LOOKUPS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_cache_store() {
    CACHE_STORES_TOTAL.inc();
}

pub fn record_cache_eviction() {
    CACHE_EVICTIONS_TOTAL.inc();
}

pub fn set_cache_bytes(bytes: u64) {
    CACHE_BYTES.set(bytes as i64);
}

pub fn record_tunnel_bytes(bytes: u64) {
    TUNNEL_BYTES_TOTAL.inc_by(bytes);
}

pub fn gather() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("encode metrics");
    buffer
}

pub async fn serve(addr: SocketAddr, path: String) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let path = if path.is_empty() {
        "/metrics".to_string()
    } else {
        path
    };
    loop {
        let (stream, _) = listener.accept().await?;
        let path = path.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_stream(stream, &path).await {
                tracing::debug!(error = %err, "metrics handler error");
            }
        });
    }
}

async fn handle_stream<S>(stream: S, path: &str) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    let mut total_bytes = 0usize;
    let bytes = read_line_with_limits(&mut reader, &mut request_line, &mut total_bytes).await?;
    if bytes == 0 {
        return Ok(());
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let uri = parts.next().unwrap_or_default();

    // Consume and ignore headers until the empty line.
    loop {
        let mut line = String::new();
        let n = read_line_with_limits(&mut reader, &mut line, &mut total_bytes).await?;
        if n == 0 || line == "\r\n" {
            break;
        }
    }

    let response = if method == "GET" && uri == path {
        let body = gather();
        build_response(200, TextEncoder::new().format_type(), body)
    } else {
        build_response(404, "text/plain", b"not found".to_vec())
    };

    reader.get_mut().write_all(&response).await?;
    reader.get_mut().shutdown().await?;
    Ok(())
}

async fn read_line_with_limits<S>(
    reader: &mut BufReader<S>,
    line: &mut String,
    total_bytes: &mut usize,
) -> Result<usize>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let read = timeout(METRICS_READ_TIMEOUT, reader.read_line(line))
        .await
        .map_err(|_| anyhow::anyhow!("timed out reading metrics request"))??;
    *total_bytes += read;
    anyhow::ensure!(
        *total_bytes <= METRICS_MAX_REQUEST_BYTES,
        "metrics request exceeds {METRICS_MAX_REQUEST_BYTES} bytes"
    );
    Ok(read)
}

fn build_response(status: u16, content_type: &str, body: Vec<u8>) -> Vec<u8> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let mut response = header.into_bytes();
    response.extend_from_slice(&body);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_renders_registered_metrics() {
        record_connection_opened();
        record_cache_lookup(true);
        record_cache_lookup(false);
        record_connection_closed();

        let rendered = String::from_utf8(gather()).expect("metrics output is utf-8");
        assert!(rendered.contains("connections_total"));
        assert!(rendered.contains("cache_lookups_total"));
    }

    #[tokio::test]
    async fn serves_metrics_over_plain_http() -> Result<()> {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let handler = tokio::spawn(async move { handle_stream(server, "/metrics").await });

        let mut client = client;
        client
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await?;
        client.shutdown().await?;

        let mut response = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut response).await?;
        handler.await??;

        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_path_gets_404() -> Result<()> {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let handler = tokio::spawn(async move { handle_stream(server, "/metrics").await });

        let mut client = client;
        client
            .write_all(b"GET /other HTTP/1.1\r\n\r\n")
            .await?;
        client.shutdown().await?;

        let mut response = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut response).await?;
        handler.await??;

        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 404"));
        Ok(())
    }
}
