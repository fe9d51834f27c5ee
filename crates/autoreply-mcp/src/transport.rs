//! Stdio JSON-RPC transport
//!
//! One reader loop, one serialized writer. Incoming frames with a non-null
//! id and a result/error member are responses to our own outbound requests
//! (elicitation) and route through the pending map; everything else is a
//! client request dispatched here. Tool calls run in spawned tasks so a
//! slow tool never blocks the reader.

use crate::error::{McpError, Result};
use crate::protocol::{
    self, ErrorObject, RequestFrame, ResponseFrame, TOOL_ERROR, is_response,
};
use crate::registry::ToolRegistry;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Server identity reported during `initialize`
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Default)]
struct ClientState {
    name: Option<String>,
    supports_elicitation: bool,
}

type PendingSender = oneshot::Sender<std::result::Result<Value, ErrorObject>>;

struct Shared {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: std::sync::Mutex<HashMap<u64, PendingSender>>,
    next_id: AtomicU64,
    client: std::sync::RwLock<ClientState>,
}

impl Shared {
    async fn write_frame<T: serde::Serialize>(&self, frame: &T) -> Result<()> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    fn route_response(&self, frame: &Value) {
        let Some(id) = frame.get("id").and_then(Value::as_u64) else {
            tracing::debug!("response frame with unusable id, dropping");
            return;
        };
        let sender = self.pending.lock().expect("pending lock").remove(&id);
        let Some(sender) = sender else {
            tracing::debug!(id, "response for unknown request id");
            return;
        };
        let outcome = match frame.get("error") {
            Some(error) => match serde_json::from_value::<ErrorObject>(error.clone()) {
                Ok(error) => Err(error),
                Err(_) => Err(ErrorObject::new(TOOL_ERROR, "malformed error object")),
            },
            None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = sender.send(outcome);
    }
}

/// Removes a pending entry when the awaiting side goes away, so a
/// cancelled tool call never leaks its correlation slot.
struct PendingGuard {
    shared: Arc<Shared>,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.shared
            .pending
            .lock()
            .expect("pending lock")
            .remove(&self.id);
    }
}

/// Outcome of a server-initiated elicitation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElicitOutcome {
    /// Client supplied the requested content
    Accept(Value),
    /// Client explicitly declined; not an error
    Decline,
    /// Client dismissed the prompt; not an error
    Cancel,
}

/// Handle tools use to ask the client questions mid-call
#[derive(Clone)]
pub struct ElicitationHandle {
    shared: Arc<Shared>,
}

impl ElicitationHandle {
    /// True when the client advertised elicitation support at initialize
    pub fn supports_elicitation(&self) -> bool {
        self.shared
            .client
            .read()
            .expect("client lock")
            .supports_elicitation
    }

    /// Send `elicitation/create` and suspend until the client answers.
    ///
    /// Decline and cancel come back as distinguishable outcomes, not
    /// errors; the calling tool chooses its follow-up.
    pub async fn request_elicitation(
        &self,
        message: &str,
        schema: Value,
    ) -> Result<ElicitOutcome> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .expect("pending lock")
            .insert(id, tx);
        let _guard = PendingGuard {
            shared: self.shared.clone(),
            id,
        };

        let frame = RequestFrame::new(
            id,
            "elicitation/create",
            json!({
                "message": message,
                "requestedSchema": schema,
            }),
        );
        self.shared.write_frame(&frame).await?;

        let outcome = rx.await.map_err(|_| McpError::Closed)?;
        let result = outcome.map_err(|e| McpError::BadElicitation(e.message))?;
        match result.get("action").and_then(Value::as_str) {
            Some("accept") => Ok(ElicitOutcome::Accept(
                result.get("content").cloned().unwrap_or(Value::Null),
            )),
            Some("decline") => Ok(ElicitOutcome::Decline),
            Some("cancel") => Ok(ElicitOutcome::Cancel),
            other => Err(McpError::BadElicitation(format!(
                "unknown action: {other:?}"
            ))),
        }
    }
}

/// Per-call context handed to tools
#[derive(Clone, Default)]
pub struct ToolContext {
    elicitor: Option<ElicitationHandle>,
}

impl ToolContext {
    /// Context with no transport behind it (CLI invocation)
    pub fn detached() -> Self {
        Self::default()
    }

    /// The elicitation handle, when the tool runs under a live transport
    pub fn elicitor(&self) -> Option<&ElicitationHandle> {
        self.elicitor.as_ref()
    }
}

/// The MCP server: registry + stdio loop
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    info: ServerInfo,
}

impl McpServer {
    pub fn new(registry: Arc<ToolRegistry>, info: ServerInfo) -> Self {
        Self { registry, info }
    }

    /// Serve on process stdin/stdout until EOF
    pub async fn run_stdio(self) -> Result<()> {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve on an arbitrary byte stream pair (tests use a duplex pipe)
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Box::new(writer) as Box<dyn AsyncWrite + Send + Unpin>),
            pending: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            client: std::sync::RwLock::new(ClientState::default()),
        });
        let running: Arc<std::sync::Mutex<HashMap<String, AbortHandle>>> =
            Arc::new(std::sync::Mutex::new(HashMap::new()));

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let frame: Value = match serde_json::from_str(&line) {
                Ok(frame) => frame,
                Err(_) => {
                    shared
                        .write_frame(&ResponseFrame::failure(
                            Value::Null,
                            ErrorObject::parse_error(),
                        ))
                        .await?;
                    continue;
                }
            };

            if is_response(&frame) {
                shared.route_response(&frame);
                continue;
            }

            let request: RequestFrame = match serde_json::from_value(frame) {
                Ok(request) => request,
                Err(_) => {
                    shared
                        .write_frame(&ResponseFrame::failure(
                            Value::Null,
                            ErrorObject::parse_error(),
                        ))
                        .await?;
                    continue;
                }
            };

            if request.is_notification() {
                self.handle_notification(&request, &running);
                continue;
            }
            self.handle_request(request, &shared, &running).await?;
        }

        // Reader closed: fail any suspended elicitations.
        shared.pending.lock().expect("pending lock").clear();
        Ok(())
    }

    fn handle_notification(
        &self,
        request: &RequestFrame,
        running: &Arc<std::sync::Mutex<HashMap<String, AbortHandle>>>,
    ) {
        match request.method.as_str() {
            "notifications/cancelled" => {
                let request_id = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("requestId"))
                    .map(|id| id.to_string());
                if let Some(request_id) = request_id {
                    if let Some(handle) = running
                        .lock()
                        .expect("running lock")
                        .remove(&request_id)
                    {
                        tracing::debug!(request_id = %request_id, "cancelling in-flight tool call");
                        handle.abort();
                    }
                }
            }
            // notifications/initialized and anything else: nothing to do
            _ => {}
        }
    }

    async fn handle_request(
        &self,
        request: RequestFrame,
        shared: &Arc<Shared>,
        running: &Arc<std::sync::Mutex<HashMap<String, AbortHandle>>>,
    ) -> Result<()> {
        let id = request.id.clone().unwrap_or(Value::Null);
        match request.method.as_str() {
            "initialize" => {
                {
                    let mut client = shared.client.write().expect("client lock");
                    let params = request.params.as_ref();
                    client.name = params
                        .and_then(|p| p.pointer("/clientInfo/name"))
                        .and_then(Value::as_str)
                        .map(String::from);
                    client.supports_elicitation = params
                        .and_then(|p| p.pointer("/capabilities/elicitation"))
                        .is_some();
                    tracing::info!(
                        client = client.name.as_deref().unwrap_or("<unnamed>"),
                        elicitation = client.supports_elicitation,
                        "client initialized"
                    );
                }
                let result = json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {
                        "tools": {"list": true, "call": true},
                    },
                    "serverInfo": {
                        "name": self.info.name,
                        "version": self.info.version,
                    },
                    "tools": self.registry.descriptors(),
                });
                shared
                    .write_frame(&ResponseFrame::success(id, result))
                    .await
            }
            "ping" => {
                shared
                    .write_frame(&ResponseFrame::success(id, json!({})))
                    .await
            }
            "tools/list" => {
                let result = json!({"tools": self.registry.descriptors()});
                shared
                    .write_frame(&ResponseFrame::success(id, result))
                    .await
            }
            "tools/call" => {
                let params = request.params.unwrap_or(Value::Null);
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .map(String::from);
                let Some(name) = name else {
                    return shared
                        .write_frame(&ResponseFrame::failure(
                            id,
                            ErrorObject::new(
                                protocol::INVALID_PARAMS,
                                "tools/call requires a `name`",
                            ),
                        ))
                        .await;
                };
                let args = params.get("arguments").cloned().unwrap_or(json!({}));

                let registry = self.registry.clone();
                let task_shared = shared.clone();
                let task_running = running.clone();
                let running_key = id.to_string();
                let task_key = running_key.clone();
                let ctx = ToolContext {
                    elicitor: Some(ElicitationHandle {
                        shared: shared.clone(),
                    }),
                };
                let task = tokio::spawn(async move {
                    let response = match registry.call(&name, args, &ctx).await {
                        Ok(result) => ResponseFrame::success(id, result.to_value()),
                        Err(error) => ResponseFrame::failure(
                            id,
                            ErrorObject::new(TOOL_ERROR, error.message.clone())
                                .with_data(json!({"code": error.code})),
                        ),
                    };
                    task_running
                        .lock()
                        .expect("running lock")
                        .remove(&task_key);
                    if let Err(e) = task_shared.write_frame(&response).await {
                        tracing::warn!(error = %e, "failed to write tool response");
                    }
                });
                running
                    .lock()
                    .expect("running lock")
                    .insert(running_key, task.abort_handle());
                Ok(())
            }
            method => {
                shared
                    .write_frame(&ResponseFrame::failure(
                        id,
                        ErrorObject::method_not_found(method),
                    ))
                    .await
            }
        }
    }
}
