//! Listener and request dispatch
//!
//! Every accepted TCP connection is classified by its HTTP request line,
//! which is peeked rather than consumed:
//!
//! - `GET <ws_path>` is upgraded to a WebSocket and becomes a session
//! - `GET /health` and `GET /stats` answer with hub counters
//! - any other `GET` is served from `static_dir`, when one is configured

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async_with_config;
use tracing::{debug, info};

use switchboard_core::Config;

use crate::error::RelayError;
use crate::hub::{Hub, HubHandle};
use crate::transport::{self, websocket_config};

/// Bytes inspected to classify a request
const REQUEST_PEEK_LEN: usize = 1024;

/// How long a client may take to send its request line
const REQUEST_LINE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between peeks while the request line is incomplete
const PEEK_RETRY: Duration = Duration::from_millis(5);

/// Relay server: one hub plus the listener feeding it
pub struct RelayServer {
    config: Arc<Config>,
    hub: HubHandle,
}

impl RelayServer {
    /// Create the server and start its hub task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config) -> Self {
        let (hub, _task) = Hub::spawn(&config.hub);
        Self {
            config: Arc::new(config),
            hub,
        }
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind the configured address and serve until the listener fails
    pub async fn serve(&self) -> Result<(), RelayError> {
        let addr = self.config.server.addr();
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on(&self, listener: TcpListener) -> Result<(), RelayError> {
        info!(
            "Relay listening on {} (WebSocket path {})",
            listener.local_addr()?,
            self.config.server.ws_path
        );

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let config = self.config.clone();
            let hub = self.hub.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, config, hub).await {
                    debug!("Connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// First line of an HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestLine {
    method: String,
    path: String,
}

impl RequestLine {
    fn parse(head: &str) -> Option<Self> {
        let line = head.lines().next()?;
        let mut parts = line.split_whitespace();
        let method = parts.next()?.to_string();
        let target = parts.next()?;
        let path = target
            .split_once('?')
            .map_or(target, |(path, _query)| path)
            .to_string();
        Some(Self { method, path })
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<Config>,
    hub: HubHandle,
) -> Result<(), RelayError> {
    let request = match tokio::time::timeout(REQUEST_LINE_TIMEOUT, peek_request_line(&stream))
        .await
    {
        Ok(result) => match result? {
            Some(request) => request,
            None => return Ok(()),
        },
        Err(_) => return Err(RelayError::BadRequest),
    };

    if request.method == "GET" && request.path == config.server.ws_path {
        let ws = accept_async_with_config(stream, Some(websocket_config(&config.transport)))
            .await?;
        debug!("WebSocket upgrade from {}", peer_addr);
        return transport::run_session(ws, hub, &config).await;
    }

    handle_http_request(&mut stream, &request, &config, &hub).await
}

/// Peek until the whole request line is buffered, without consuming it.
///
/// Returns `None` if the client closed before sending anything.
async fn peek_request_line(stream: &TcpStream) -> Result<Option<RequestLine>, RelayError> {
    let mut buf = [0u8; REQUEST_PEEK_LEN];
    let mut seen = 0;
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if let Some(end) = buf[..n].iter().position(|&b| b == b'\n') {
            return RequestLine::parse(&String::from_utf8_lossy(&buf[..end]))
                .map(Some)
                .ok_or(RelayError::BadRequest);
        }
        if n == buf.len() {
            return Err(RelayError::BadRequest);
        }
        // Peek returns at once while data is buffered; wait for more.
        if n == seen {
            tokio::time::sleep(PEEK_RETRY).await;
        }
        seen = n;
    }
}

/// Answer a plain HTTP request
async fn handle_http_request(
    stream: &mut TcpStream,
    request: &RequestLine,
    config: &Config,
    hub: &HubHandle,
) -> Result<(), RelayError> {
    // Consume the request; only the peeked line matters.
    let mut buf = vec![0u8; REQUEST_PEEK_LEN];
    let _ = stream.read(&mut buf).await?;

    let response = if request.method != "GET" {
        Response::json("405 Method Not Allowed", r#"{"error":"method not allowed"}"#)
    } else {
        match request.path.as_str() {
            "/health" => {
                let stats = hub.stats().await?;
                Response::json(
                    "200 OK",
                    format!(
                        r#"{{"status":"healthy","sessions":{}}}"#,
                        stats.active_sessions
                    ),
                )
            }
            "/stats" => {
                let stats = hub.stats().await?;
                Response::json("200 OK", serde_json::to_string(&stats)?)
            }
            path => match &config.server.static_dir {
                Some(root) => serve_static(root, path).await,
                None => Response::not_found(),
            },
        }
    };

    stream.write_all(&response.into_bytes()).await?;
    Ok(())
}

struct Response {
    status: &'static str,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn json(status: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.into().into_bytes(),
        }
    }

    fn not_found() -> Self {
        Self::json("404 Not Found", r#"{"error":"not found"}"#)
    }

    fn into_bytes(self) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.content_type,
            self.body.len()
        )
        .into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

/// Map a request path onto a file below `root`, refusing anything that
/// could escape it
fn resolve_static_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');
    let relative = if relative.is_empty() {
        "index.html"
    } else {
        relative
    };

    let relative = Path::new(relative);
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

async fn serve_static(root: &Path, request_path: &str) -> Response {
    let Some(path) = resolve_static_path(root, request_path) else {
        debug!("Rejected static path {}", request_path);
        return Response::not_found();
    };

    match tokio::fs::read(&path).await {
        Ok(body) => Response {
            status: "200 OK",
            content_type: content_type(&path),
            body,
        },
        Err(e) => {
            debug!("Static file {:?} unavailable: {}", path, e);
            Response::not_found()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line_parsing() {
        let req = RequestLine::parse("GET /ws?token=x HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/ws");

        assert!(RequestLine::parse("").is_none());
        assert!(RequestLine::parse("GET").is_none());
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_request_line_split_across_writes() {
        let (mut client, server) = connected_pair().await;

        client.write_all(b"GET /w").await.unwrap();
        let peeking = tokio::spawn(async move {
            let line = peek_request_line(&server).await.unwrap();
            (line, server)
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(b"s HTTP/1.1\r\nHost: a\r\n\r\n").await.unwrap();

        let (line, server) = peeking.await.unwrap();
        let line = line.unwrap();
        assert_eq!(line.method, "GET");
        assert_eq!(line.path, "/ws");

        // Nothing was consumed.
        let mut buf = [0u8; 6];
        server.peek(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET /w");
    }

    #[tokio::test]
    async fn test_request_line_without_end_rejected() {
        let (mut client, server) = connected_pair().await;
        client.write_all(&[b'a'; REQUEST_PEEK_LEN]).await.unwrap();

        let result = peek_request_line(&server).await;
        assert!(matches!(result, Err(RelayError::BadRequest)));
    }

    #[tokio::test]
    async fn test_request_line_closed_before_data() {
        let (client, server) = connected_pair().await;
        drop(client);

        assert!(peek_request_line(&server).await.unwrap().is_none());
    }

    #[test]
    fn test_static_path_resolution() {
        let root = Path::new("/srv/www");
        assert_eq!(
            resolve_static_path(root, "/"),
            Some(PathBuf::from("/srv/www/index.html"))
        );
        assert_eq!(
            resolve_static_path(root, "/app.js"),
            Some(PathBuf::from("/srv/www/app.js"))
        );
        assert_eq!(resolve_static_path(root, "/../etc/passwd"), None);
        assert_eq!(resolve_static_path(root, "/a/../../b"), None);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type(Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("app.js")), "text/javascript; charset=utf-8");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn test_response_framing() {
        let bytes = Response::json("200 OK", "{}").into_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }

    #[tokio::test]
    async fn test_serve_static_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();

        let found = serve_static(dir.path(), "/").await;
        assert_eq!(found.status, "200 OK");
        assert_eq!(found.body, b"<h1>hi</h1>");

        let missing = serve_static(dir.path(), "/nope.js").await;
        assert_eq!(missing.status, "404 Not Found");
    }
}
