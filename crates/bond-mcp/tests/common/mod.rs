//! In-memory mock MCP server for driving a client over `tokio::io::duplex`.

#![allow(dead_code)]

use bond_mcp::{McpClient, McpServerConfig, TransportIo};
use serde_json::{Value, json};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf};
use tokio::io::DuplexStream;
use tokio::sync::Mutex;

const PIPE_CAPACITY: usize = 64 * 1024;

/// A mock server that answers each inbound message from its own task.
///
/// `behavior` receives every decoded message (requests and notifications)
/// and returns the lines to write back, in order.
pub fn serve<F, Fut>(behavior: F) -> TransportIo
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<Value>> + Send + 'static,
{
    let (client_side, server_side) = tokio::io::duplex(PIPE_CAPACITY);
    let (client_read, client_write) = tokio::io::split(client_side);
    let (server_read, server_write) = tokio::io::split(server_side);
    let server_write = Arc::new(Mutex::new(server_write));
    let behavior = Arc::new(behavior);

    tokio::spawn(async move {
        let mut lines = BufReader::new(server_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(message) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let behavior = Arc::clone(&behavior);
            let writer = Arc::clone(&server_write);
            tokio::spawn(async move {
                for reply in behavior(message).await {
                    let mut writer = writer.lock().await;
                    let _ = writer.write_all(format!("{reply}\n").as_bytes()).await;
                    let _ = writer.flush().await;
                }
            });
        }
    });

    TransportIo::new(client_read, client_write)
}

/// A manually driven server end of the pipe.
pub struct Peer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    /// Next message the client wrote, or `None` on EOF.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            let line = self.lines.next_line().await.ok()??;
            if let Ok(value) = serde_json::from_str(&line) {
                return Some(value);
            }
        }
    }

    pub async fn send(&mut self, value: &Value) {
        self.send_raw(&value.to_string()).await;
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Answer the `initialize` request and swallow `notifications/initialized`.
    pub async fn accept_handshake(&mut self) {
        let init = self.recv().await.expect("initialize request");
        assert_eq!(init["method"], "initialize");
        self.send(&reply(&init["id"], initialize_result())).await;
        let initialized = self.recv().await.expect("initialized notification");
        assert_eq!(initialized["method"], "notifications/initialized");
    }
}

/// A client transport paired with a manually driven peer.
pub fn pipe() -> (TransportIo, Peer) {
    pipe_with_capacity(PIPE_CAPACITY)
}

/// Like [`pipe`], buffering at most `capacity` bytes in each direction.
pub fn pipe_with_capacity(capacity: usize) -> (TransportIo, Peer) {
    let (client_side, server_side) = tokio::io::duplex(capacity);
    let (client_read, client_write) = tokio::io::split(client_side);
    let (server_read, server_write) = tokio::io::split(server_side);
    let peer = Peer {
        lines: BufReader::new(server_read).lines(),
        writer: server_write,
    };
    (TransportIo::new(client_read, client_write), peer)
}

/// Passes writes through until `broken` is set, then fails every write.
pub struct Breakable<W> {
    inner: W,
    broken: Arc<AtomicBool>,
}

impl<W: AsyncWrite + Unpin> AsyncWrite for Breakable<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.broken.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed")));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// A pipe whose client-side writer starts failing once the returned flag is set.
/// The read side stays open.
pub fn breakable_pipe() -> (TransportIo, Peer, Arc<AtomicBool>) {
    let (client_side, server_side) = tokio::io::duplex(PIPE_CAPACITY);
    let (client_read, client_write) = tokio::io::split(client_side);
    let (server_read, server_write) = tokio::io::split(server_side);
    let broken = Arc::new(AtomicBool::new(false));
    let writer = Breakable {
        inner: client_write,
        broken: Arc::clone(&broken),
    };
    let peer = Peer {
        lines: BufReader::new(server_read).lines(),
        writer: server_write,
    };
    (TransportIo::new(client_read, writer), peer, broken)
}

pub fn reply(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

pub fn reply_error(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "method": method, "params": params})
}

pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {"tools": {"listChanged": true}, "logging": {}},
        "serverInfo": {"name": "mock-server", "version": "0.1.0"}
    })
}

/// Replies for the handshake messages, or `None` for anything else.
pub fn handshake(message: &Value) -> Option<Vec<Value>> {
    match message["method"].as_str() {
        Some("initialize") => Some(vec![reply(&message["id"], initialize_result())]),
        Some("notifications/initialized") => Some(vec![]),
        _ => None,
    }
}

/// The standard mock:
/// - `ping` answers `{"pong": true, "message": <params.message>}`
/// - `echo` answers its params
/// - `delay` sleeps `params.ms` before answering `{"slept": ms}`
/// - `silent` never answers
/// - anything else is `-32601`
pub async fn standard(message: Value) -> Vec<Value> {
    if let Some(replies) = handshake(&message) {
        return replies;
    }
    let id = message["id"].clone();
    if id.is_null() {
        return vec![];
    }
    match message["method"].as_str().unwrap_or_default() {
        "ping" => vec![reply(
            &id,
            json!({"pong": true, "message": message["params"]["message"]}),
        )],
        "echo" => vec![reply(&id, message["params"].clone())],
        "delay" => {
            let ms = message["params"]["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            vec![reply(&id, json!({"slept": ms}))]
        }
        "silent" => vec![],
        other => vec![reply_error(
            &id,
            -32601,
            &format!("Method '{other}' not found"),
        )],
    }
}

/// A client named `mock` with the given default timeout.
pub fn client(timeout_ms: u64) -> McpClient {
    McpClient::new("mock", McpServerConfig::new("unused").with_timeout_ms(timeout_ms))
}

/// A client already started against the standard mock.
pub async fn started() -> McpClient {
    let client = client(2000);
    client.start_with_io(serve(standard)).await.unwrap();
    client
}
