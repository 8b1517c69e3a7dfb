//! Test utilities and server harness for Gradecast tests.
//!
//! Provides:
//! - In-process test server setup
//! - WebSocket and raw HTTP client helpers
//! - Test database fixtures

#![allow(dead_code)]

use futures::StreamExt;
use gradecast::config::Config;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

type ServeResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Test fixture that manages a temporary data directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

impl TestFixture {
    /// Create a new test fixture with a temporary data directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        Self { temp_dir }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A Gradecast server running in-process on a random local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub fixture: TestFixture,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<ServeResult>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with a tweaked [`Config::test_config`].
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        Self::start_in(TestFixture::new(), configure).await
    }

    /// Start against an existing data directory, e.g. to restart a server.
    pub async fn start_in(fixture: TestFixture, configure: impl FnOnce(&mut Config)) -> Self {
        gradecast::observability::tracing::init_test_tracing();
        let mut config = Config::test_config(fixture.data_dir());
        configure(&mut config);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().expect("no local addr");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(gradecast::server::serve(listener, config, shutdown_rx));

        Self {
            addr,
            fixture,
            shutdown_tx,
            handle,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Open a WebSocket subscription.
    ///
    /// The server registers the session just after the handshake completes,
    /// so give it a moment before issuing writes the client must observe.
    pub async fn connect(&self) -> WsClient {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url())
            .await
            .expect("failed to connect");
        tokio::time::sleep(Duration::from_millis(100)).await;
        ws
    }

    /// Send a JSON request and return the status code and body.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (u16, serde_json::Value) {
        http_request(self.addr, method, path, body).await
    }

    pub async fn get_text(&self, path: &str) -> (u16, String) {
        raw_request(self.addr, "GET", path, None).await
    }

    /// Signal shutdown, wait for the server to stop and return its data dir.
    pub async fn shutdown(self) -> TestFixture {
        let _ = self.shutdown_tx.send(true);
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
            .expect("server returned an error");
        self.fixture
    }
}

/// Minimal HTTP/1.1 client; one request per connection.
pub async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Option<serde_json::Value>,
) -> (u16, serde_json::Value) {
    let (status, text) = raw_request(addr, method, path, body).await;
    let json = if text.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
    };
    (status, json)
}

async fn raw_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Option<serde_json::Value>,
) -> (u16, String) {
    let body = body.map(|b| b.to_string()).unwrap_or_default();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let mut stream = TcpStream::connect(addr).await.expect("failed to connect");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("failed to write request");
    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .expect("failed to read response");
    let response = String::from_utf8_lossy(&response).into_owned();

    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("malformed HTTP response");
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("missing status code");
    (status, body.to_string())
}

/// Wait for the next `database_update` and return its `changes` object.
pub async fn next_update(ws: &mut WsClient, timeout: Duration) -> Option<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next()).await.ok()??;
        match frame.ok()? {
            Message::Text(text) => {
                let msg: serde_json::Value = serde_json::from_str(&text).ok()?;
                if msg["type"] == "database_update" {
                    return Some(msg["changes"].clone());
                }
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

/// Assert that nothing arrives within `window`.
pub async fn expect_silence(ws: &mut WsClient, window: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(window, ws.next()).await {
        panic!("expected no notification, got {text}");
    }
}

pub fn student(id: &str, email: &str) -> serde_json::Value {
    serde_json::json!({
        "studentId": id,
        "firstName": "Maria",
        "lastName": "Santos",
        "course": "BSCS",
        "section": "A",
        "trimester": "1st",
        "email": email,
    })
}
