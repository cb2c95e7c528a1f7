//! Raw HTTP/1.1 listener accepting pushed Telegram updates.
//!
//! Deliberately framework-free: one request per connection, hand-parsed
//! head, hand-built response. Validation order is method, secret header,
//! JSON body; only then is the update normalized and published.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

use edb_core::bus::{EventBus, Payload, Topic};
use edb_core::{Error, Result};

use crate::normalize::normalize_update;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Upper bound on the request head; Telegram updates are small.
const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub struct WebhookServer {
    secret: String,
    bus: Arc<EventBus>,
    // Listening socket plus the shutdown signal `stop()` uses to end an
    // in-flight `serve()`; both are replaced on every `start()`.
    listener: Mutex<Option<(Arc<TcpListener>, CancellationToken)>>,
}

impl WebhookServer {
    pub fn new(secret: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            secret: secret.into(),
            bus,
            listener: Mutex::new(None),
        }
    }

    /// Bind the listening socket. Serving starts with [`serve`](Self::serve).
    pub async fn start(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let listener = TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "webhook server listening");
        *self.listener.lock().await = Some((Arc::new(listener), CancellationToken::new()));
        Ok(addr)
    }

    /// Stop accepting: close the listening socket and end any running
    /// [`serve`](Self::serve) loop.
    pub async fn stop(&self) {
        if let Some((_listener, shutdown)) = self.listener.lock().await.take() {
            shutdown.cancel();
            tracing::info!("webhook server stopped");
        }
    }

    /// Accept connections until the token is cancelled or [`stop`](Self::stop)
    /// is called.
    ///
    /// The listener is closed on every exit path, cancelled or not.
    pub async fn serve(&self, cancel: CancellationToken) -> Result<()> {
        let Some((listener, shutdown)) = self.listener.lock().await.clone() else {
            return Err(Error::Transport("webhook server is not started".into()));
        };
        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("webhook serve loop cancelled");
                    break Ok(());
                }
                _ = shutdown.cancelled() => {
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let secret = self.secret.clone();
                        let bus = self.bus.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, secret, bus).await;
                        });
                    }
                    Err(e) => break Err(Error::Io(e)),
                },
            }
        };
        self.stop().await;
        result
    }
}

/// Bind and serve in one call; the usual entry point for webhook mode.
pub async fn run_webhook(
    host: &str,
    port: u16,
    secret: String,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
) -> Result<()> {
    let server = WebhookServer::new(secret, bus);
    server.start(host, port).await?;
    server.serve(cancel).await
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    secret: String,
    bus: Arc<EventBus>,
) {
    let request = match read_request(&mut stream).await {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "failed to read webhook request");
            return;
        }
    };
    let (status, body) = process_request(&request, &secret, &bus).await;
    let response = format_response(status, &body);
    if let Err(e) = stream.write_all(&response).await {
        tracing::debug!(%peer, error = %e, "failed to write webhook response");
    }
    let _ = stream.shutdown().await;
}

pub(crate) struct Request {
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Read one HTTP request: head until the blank line, then exactly
/// `Content-Length` body bytes beyond what is already buffered.
async fn read_request(stream: &mut TcpStream) -> Result<Option<Request>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    while find_head_end(&data).is_none() {
        if data.len() > MAX_HEAD_BYTES {
            return Err(Error::Transport("request head too large".into()));
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    let Some(head_end) = find_head_end(&data) else {
        return Ok(None);
    };

    let head = String::from_utf8_lossy(&data[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.splitn(3, ' ');
    let (Some(method), Some(_path), Some(_proto)) = (parts.next(), parts.next(), parts.next())
    else {
        return Ok(None);
    };

    let mut headers = HashMap::new();
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        headers.insert(key.trim().to_lowercase(), value.trim().to_string());
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(Error::Transport("request body too large".into()));
    }

    let mut body = data[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::Transport("connection closed mid-body".into()));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    Ok(Some(Request {
        method: method.to_uppercase(),
        headers,
        body,
    }))
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Validate the request and publish the update on success.
pub(crate) async fn process_request(
    request: &Request,
    secret: &str,
    bus: &EventBus,
) -> (u16, Vec<u8>) {
    if request.method != "POST" {
        return (405, Vec::new());
    }
    match request.headers.get(SECRET_HEADER) {
        Some(token) if !token.is_empty() && token == secret => {}
        _ => return (403, Vec::new()),
    }
    let Ok(update) = serde_json::from_slice::<Value>(&request.body) else {
        return (400, Vec::new());
    };
    let mut metadata = Payload::new();
    metadata.insert("transport".into(), json!("webhook"));
    bus.publish(
        Topic::Update,
        normalize_update(&update).into_payload(),
        metadata,
    )
    .await;
    (200, b"{}".to_vec())
}

fn format_response(status: u16, body: &[u8]) -> Vec<u8> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        405 => "Method Not Allowed",
        _ => "OK",
    };
    let mut response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    if !body.is_empty() {
        response.push_str("Content-Type: application/json\r\n");
    }
    response.push_str("\r\n");
    let mut bytes = response.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}
