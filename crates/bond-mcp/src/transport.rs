//! Stdio transport for MCP server communication.
//!
//! Spawns the server as a child process and runs three background tasks per
//! connection: a writer that owns the server's stdin, the response
//! dispatcher reading its stdout, and a waiter on process exit.

use crate::client::Shared;
use crate::config::McpServerConfig;
use crate::dispatch::run_dispatcher;
use crate::error::McpError;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the outbound line queue.
const WRITE_QUEUE: usize = 64;

/// The byte streams a client talks over.
///
/// Normally the child's stdout and stdin; tests inject in-memory pipes.
pub struct TransportIo {
    pub(crate) reader: Box<dyn AsyncRead + Send + Unpin>,
    pub(crate) writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl TransportIo {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

impl std::fmt::Debug for TransportIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportIo").finish_non_exhaustive()
    }
}

/// Spawn the configured server with piped stdin/stdout and inherited stderr.
pub(crate) fn spawn_process(
    name: &str,
    config: &McpServerConfig,
) -> Result<(Child, TransportIo), McpError> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd);
    }

    let startup = |source: io::Error| McpError::Startup {
        name: name.to_string(),
        source,
    };
    let mut child = cmd.spawn().map_err(startup)?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| startup(io::Error::other("stdin was not piped")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| startup(io::Error::other("stdout was not piped")))?;

    tracing::debug!(
        "Spawned MCP server '{}' ({}) with pid {:?}",
        name,
        config.command,
        child.id()
    );
    Ok((child, TransportIo::new(stdout, stdin)))
}

struct WriteRequest {
    line: String,
    ack: oneshot::Sender<io::Result<()>>,
}

/// Handle to the single writer task. Cloning shares the same task.
///
/// Lines are written whole and in queue order, so concurrent callers never
/// interleave partial messages.
#[derive(Clone)]
pub(crate) struct LineWriter {
    tx: mpsc::Sender<WriteRequest>,
}

impl LineWriter {
    /// Queue one line (without newline) and wait until it has been flushed.
    pub(crate) async fn write_line(&self, line: String) -> io::Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriteRequest { line, ack })
            .await
            .map_err(|_| closed())?;
        done.await.map_err(|_| closed())?
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection writer is closed")
}

/// Start the writer task. `on_failure` runs once if a write fails, after the
/// failing caller has been acknowledged.
fn spawn_writer(
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    cancel: CancellationToken,
    on_failure: impl FnOnce(String) + Send + 'static,
) -> (LineWriter, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(WRITE_QUEUE);
    let handle = tokio::spawn(async move {
        if let Some(reason) = write_loop(writer, rx, cancel).await {
            on_failure(reason);
        }
    });
    (LineWriter { tx }, handle)
}

/// Returns the failure reason when a write failed.
async fn write_loop(
    mut writer: Box<dyn AsyncWrite + Send + Unpin>,
    mut rx: mpsc::Receiver<WriteRequest>,
    cancel: CancellationToken,
) -> Option<String> {
    let failure = loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break None,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break None,
            },
        };
        let result = write_one(&mut writer, &request.line).await;
        let failure = result.as_ref().err().map(|e| format!("write failed: {e}"));
        let _ = request.ack.send(result);
        if failure.is_some() {
            break failure;
        }
    };
    // EOF to the server
    let _ = writer.shutdown().await;
    failure
}

async fn write_one(writer: &mut (dyn AsyncWrite + Send + Unpin), line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Wait for the child to exit. On cancellation, give it `grace` to exit on
/// its own after stdin closes, then kill it.
async fn watch_process(
    mut child: Child,
    cancel: CancellationToken,
    reader_done: CancellationToken,
    grace: Duration,
    shared: Arc<Shared>,
) {
    let status = tokio::select! {
        status = child.wait() => {
            // Let the dispatcher drain whatever the server wrote before exiting.
            let _ = tokio::time::timeout(grace, reader_done.cancelled()).await;
            status
        }
        _ = cancel.cancelled() => match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    "MCP server '{}' did not exit within {}ms, killing it",
                    shared.name,
                    grace.as_millis()
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill MCP server '{}': {}", shared.name, e);
                }
                child.wait().await
            }
        },
    };
    let reason = match status {
        Ok(status) => format!("process exited ({status})"),
        Err(e) => format!("failed to wait on process: {e}"),
    };
    shared.connection_lost(&reason);
}

/// One live connection: its background tasks and the writer handle.
pub(crate) struct Connection {
    writer: LineWriter,
    shutdown: CancellationToken,
    reader: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    process: Option<JoinHandle<()>>,
}

impl Connection {
    /// Start the writer, dispatcher, and (with a child) process waiter.
    pub(crate) fn open(
        io: TransportIo,
        child: Option<Child>,
        shared: Arc<Shared>,
        grace: Duration,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let reader_done = CancellationToken::new();
        let (writer, writer_task) = {
            let shared = Arc::clone(&shared);
            spawn_writer(io.writer, shutdown.clone(), move |reason| {
                shared.connection_lost(&reason)
            })
        };

        let reader = {
            let shared = Arc::clone(&shared);
            let writer = writer.clone();
            let cancel = shutdown.clone();
            let done = reader_done.clone();
            tokio::spawn(async move {
                let _done = done.drop_guard();
                run_dispatcher(io.reader, shared, writer, cancel).await;
            })
        };

        let process = child.map(|child| {
            tokio::spawn(watch_process(
                child,
                shutdown.clone(),
                reader_done,
                grace,
                shared,
            ))
        });

        Self {
            writer,
            shutdown,
            reader,
            writer_task,
            process,
        }
    }

    pub(crate) fn writer(&self) -> LineWriter {
        self.writer.clone()
    }

    /// Close stdin, wait up to `grace` for the server to exit (then kill it),
    /// and join the background tasks.
    pub(crate) async fn shutdown(mut self, grace: Duration) {
        self.shutdown.cancel();
        if let Some(process) = self.process.as_mut() {
            let _ = process.await;
        }
        if tokio::time::timeout(grace, &mut self.reader).await.is_err() {
            self.reader.abort();
        }
        if tokio::time::timeout(grace, &mut self.writer_task)
            .await
            .is_err()
        {
            self.writer_task.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn config(command: &str, args: &[&str]) -> McpServerConfig {
        McpServerConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
            timeout_ms: 1000,
            shutdown_timeout_ms: 200,
        }
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails() {
        let result = spawn_process("ghost", &config("this_command_does_not_exist_xyz123", &[]));
        match result {
            Err(McpError::Startup { name, .. }) => assert_eq!(name, "ghost"),
            Err(other) => panic!("Expected Startup, got: {other:?}"),
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[tokio::test]
    async fn cat_echoes_written_lines() {
        let (mut child, io) = spawn_process("cat", &config("cat", &[])).unwrap();
        let cancel = CancellationToken::new();
        let (writer, task) = spawn_writer(io.writer, cancel.clone(), |_| {});

        writer.write_line(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string())
            .await
            .unwrap();
        let mut lines = BufReader::new(io.reader).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);

        // Cancelling the writer closes stdin, so cat exits on its own.
        cancel.cancel();
        task.await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn working_directory_is_applied() {
        let dir = std::env::temp_dir();
        let mut cfg = config("pwd", &[]);
        cfg.cwd = Some(dir.clone());
        let (_child, io) = spawn_process("pwd", &cfg).unwrap();
        let mut lines = BufReader::new(io.reader).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let expected = dir.canonicalize().unwrap();
        assert_eq!(std::path::Path::new(&line).canonicalize().unwrap(), expected);
    }

    #[tokio::test]
    async fn environment_is_passed() {
        let mut cfg = config("sh", &["-c", "echo $BOND_TEST_VALUE"]);
        cfg.env.insert("BOND_TEST_VALUE".into(), "from-config".into());
        let (_child, io) = spawn_process("env", &cfg).unwrap();
        let mut lines = BufReader::new(io.reader).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "from-config");
    }

    #[tokio::test]
    async fn writes_fail_after_writer_stops() {
        let (client, _server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let (writer, task) = spawn_writer(Box::new(client), cancel.clone(), |_| {});
        cancel.cancel();
        task.await.unwrap();
        let err = writer.write_line("{}".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failed_write_is_acknowledged_then_reported() {
        let (reported_tx, reported_rx) = oneshot::channel();
        let (writer, task) = spawn_writer(
            Box::new(BrokenPipe),
            CancellationToken::new(),
            move |reason| {
                let _ = reported_tx.send(reason);
            },
        );
        let err = writer.write_line("{}".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        task.await.unwrap();
        let reason = reported_rx.await.unwrap();
        assert!(reason.starts_with("write failed"), "{reason}");
        // The task is gone, so later writes fail without reaching the stream.
        assert!(writer.write_line("{}".to_string()).await.is_err());
    }
}
