//! Inbound message routing.
//!
//! A single reader task consumes the server's stdout line by line and routes
//! each decoded message: responses go to the pending table, notifications to
//! the handler registry, and server-initiated requests get an immediate reply.

use crate::client::Shared;
use crate::jsonrpc::{self, Frame, JsonRpcError, Message, Notification, Request, Response};
use crate::transport::LineWriter;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;

/// Boxed future produced by a notification handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// An async callback for server notifications of one method.
pub type NotificationHandler = Arc<dyn Fn(Notification) -> HandlerFuture + Send + Sync>;

/// Method name to notification handler.
///
/// Each dispatched notification runs in its own task, so handlers see
/// notifications unordered, at most once, with no backpressure on the reader.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, NotificationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler, replacing any previous one for `method`.
    pub fn register<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers
            .write()
            .unwrap()
            .insert(method.into(), wrap(handler));
    }

    /// Install a handler only if none exists. Returns `true` if installed.
    pub fn register_default<F, Fut>(&self, method: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handlers = self.handlers.write().unwrap();
        let method = method.into();
        if handlers.contains_key(&method) {
            return false;
        }
        handlers.insert(method, wrap(handler));
        true
    }

    /// Returns `true` if a handler was removed.
    pub fn remove(&self, method: &str) -> bool {
        self.handlers.write().unwrap().remove(method).is_some()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.read().unwrap().contains_key(method)
    }

    /// Spawn the handler for this notification. Returns `false` when no
    /// handler is registered for its method.
    pub fn dispatch(&self, notification: Notification) -> bool {
        let handler = self
            .handlers
            .read()
            .unwrap()
            .get(&notification.method)
            .cloned();
        match handler {
            Some(handler) => {
                // The handler itself runs in the task, not just its future.
                tokio::spawn(async move { handler(notification).await });
                true
            }
            None => {
                tracing::debug!(
                    "No handler for notification '{}', dropping",
                    notification.method
                );
                false
            }
        }
    }
}

fn wrap<F, Fut>(handler: F) -> NotificationHandler
where
    F: Fn(Notification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |notification: Notification| {
        Box::pin(handler(notification)) as HandlerFuture
    })
}

/// Read and route lines until EOF, a read error, or cancellation.
///
/// EOF and read errors mark the connection lost; cancellation means the
/// client is stopping and already owns the teardown.
pub(crate) async fn run_dispatcher(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    shared: Arc<Shared>,
    writer: LineWriter,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = lines.next_line() => next,
        };
        match next {
            Ok(Some(line)) => handle_line(&line, &shared, &writer),
            Ok(None) => break "server closed its output".to_string(),
            Err(e) => break format!("read error: {e}"),
        }
    };
    shared.connection_lost(&reason);
}

fn handle_line(line: &str, shared: &Shared, writer: &LineWriter) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let frame = match Frame::parse(line) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("MCP server '{}' sent an undecodable line: {}", shared.name, e);
            return;
        }
    };
    for value in frame.into_values() {
        let request_id = jsonrpc::request_id(&value);
        match Message::from_value(value) {
            Ok(message) => route(message, shared, writer),
            Err(e) => {
                tracing::warn!("MCP server '{}' sent an invalid message: {}", shared.name, e);
                if let Some(id) = request_id {
                    reply(
                        Response::failure(Some(id), JsonRpcError::invalid_request(&e)),
                        shared,
                        writer,
                    );
                }
            }
        }
    }
}

fn route(message: Message, shared: &Shared, writer: &LineWriter) {
    match message {
        Message::Response(response) => {
            let Some(unmatched) = shared.pending.deliver(response) else {
                return;
            };
            match unmatched.embedded_method() {
                Some(method) => {
                    let notification = Notification {
                        method: method.to_string(),
                        params: unmatched.result().cloned(),
                    };
                    shared.handlers.dispatch(notification);
                }
                None => tracing::debug!(
                    "Dropping response with no waiting request (id {:?}) from '{}'",
                    unmatched.id,
                    shared.name
                ),
            }
        }
        Message::Notification(notification) => {
            shared.handlers.dispatch(notification);
        }
        Message::Request(request) => answer(request, shared, writer),
    }
}

/// Reply to a server-initiated request. Only `ping` is supported.
fn answer(request: Request, shared: &Shared, writer: &LineWriter) {
    let Some(id) = request.id else {
        return;
    };
    let response = if request.method == "ping" {
        Response::success(id, serde_json::json!({}))
    } else {
        tracing::debug!(
            "MCP server '{}' called unsupported method '{}'",
            shared.name,
            request.method
        );
        Response::failure(Some(id), JsonRpcError::method_not_found(&request.method))
    };
    reply(response, shared, writer);
}

fn reply(response: Response, shared: &Shared, writer: &LineWriter) {
    let line = match response.encode() {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!("Failed to encode reply: {}", e);
            return;
        }
    };
    // Replies go through the writer task from their own task so a full stdin
    // pipe never blocks the reader.
    let writer = writer.clone();
    let name = shared.name.clone();
    tokio::spawn(async move {
        if let Err(e) = writer.write_line(line).await {
            tracing::warn!("Failed to reply to MCP server '{}': {}", name, e);
        }
    });
}
