use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone)]
enum UpstreamBehavior {
    HttpResponse { response: Arc<Vec<u8>> },
    Echo,
}

/// Scripted origin server. `http_response` answers every request with fixed
/// bytes and records what it received; `echo` mirrors raw bytes for tunnel
/// tests.
pub struct TestUpstream {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<Vec<u8>>>>,
    handle: JoinHandle<()>,
}

impl TestUpstream {
    pub async fn http_response(response: impl Into<Vec<u8>>) -> Result<Self> {
        Self::spawn(UpstreamBehavior::HttpResponse {
            response: Arc::new(response.into()),
        })
        .await
    }

    pub async fn http_ok(body: &str) -> Result<Self> {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        Self::http_response(response.into_bytes()).await
    }

    pub async fn echo() -> Result<Self> {
        Self::spawn(UpstreamBehavior::Echo).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Raw request bytes seen so far, one entry per connection.
    pub fn captured_requests(&self) -> Vec<Vec<u8>> {
        self.captured.lock().expect("captured requests lock").clone()
    }

    async fn spawn(behavior: UpstreamBehavior) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));

        let loop_requests = requests.clone();
        let loop_captured = captured.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let behavior = behavior.clone();
                let requests = loop_requests.clone();
                let captured = loop_captured.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(&mut stream, behavior, requests, captured).await;
                });
            }
        });

        Ok(Self {
            addr,
            requests,
            captured,
            handle,
        })
    }
}

impl Drop for TestUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: &mut TcpStream,
    behavior: UpstreamBehavior,
    requests: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<Vec<u8>>>>,
) -> Result<()> {
    match behavior {
        UpstreamBehavior::HttpResponse { response } => {
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let read = stream.read(&mut buf).await?;
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
                if request.windows(4).any(|window| window == b"\r\n\r\n") {
                    break;
                }
            }
            if request.is_empty() {
                return Ok(());
            }
            requests.fetch_add(1, Ordering::SeqCst);
            captured
                .lock()
                .expect("captured requests lock")
                .push(request);

            stream.write_all(&response).await?;
            stream.shutdown().await?;
        }
        UpstreamBehavior::Echo => {
            let mut buf = [0u8; 4096];
            loop {
                let read = stream.read(&mut buf).await?;
                if read == 0 {
                    break;
                }
                stream.write_all(&buf[..read]).await?;
            }
            stream.shutdown().await?;
        }
    }
    Ok(())
}
