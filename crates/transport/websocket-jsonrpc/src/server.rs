//! WebSocket server implementation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use rhizome_plinth_core::{ContextId, PluginDescriptor, RuntimeError};
use rhizome_plinth_runtime::PlinthRuntime;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::host::SessionHost;
use crate::protocol::{
    self, ContextParams, NewContextParams, RpcError, SetStateParams, SubmitParams,
};
use crate::session::{Session, SessionId};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

type Sessions = Arc<RwLock<HashMap<SessionId, Session>>>;
type Plugins = Arc<HashMap<String, PluginDescriptor>>;

/// The Plinth WebSocket server.
pub struct Server {
    config: ServerConfig,
    runtime: PlinthRuntime,
    plugins: Plugins,
    sessions: Sessions,
}

impl Server {
    /// Create a new server with the given runtime and configuration.
    pub fn new(runtime: PlinthRuntime, config: ServerConfig) -> Self {
        Self {
            config,
            runtime,
            plugins: Arc::new(HashMap::new()),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Make plugins addressable by id in `newContext`.
    pub fn with_plugins(mut self, plugins: impl IntoIterator<Item = PluginDescriptor>) -> Self {
        self.plugins = Arc::new(
            plugins
                .into_iter()
                .map(|descriptor| (descriptor.id.clone(), descriptor))
                .collect(),
        );
        self
    }

    pub fn runtime(&self) -> &PlinthRuntime {
        &self.runtime
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Listening on ws://{}", addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let runtime = self.runtime.clone();
            let plugins = Arc::clone(&self.plugins);
            let sessions = Arc::clone(&self.sessions);

            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, addr, runtime, plugins, sessions).await
                {
                    error!("Connection error from {}: {}", addr, err);
                }
            });
        }
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    runtime: PlinthRuntime,
    plugins: Plugins,
    sessions: Sessions,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let session_id = SessionId::new();
    info!(session = %session_id, "New connection from {}", addr);
    sessions
        .write()
        .await
        .insert(session_id, Session::new(session_id, addr));

    // Responses and collaborator notifications share one outbound queue.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(err) = ws_sender.send(Message::Text(msg.into())).await {
                error!("Failed to send message: {}", err);
                break;
            }
        }
    });

    let handler = Handler {
        session: session_id,
        runtime: &runtime,
        plugins: &plugins,
        sessions: &sessions,
        outbound: &tx,
    };

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(reply) = handler.handle(text.as_str()).await {
                    let _ = tx.send(reply.to_string());
                }
            }
            Ok(Message::Close(_)) => {
                info!(session = %session_id, "Client {} disconnected", addr);
                break;
            }
            Ok(_) => {}
            Err(err) => {
                error!("WebSocket error from {}: {}", addr, err);
                break;
            }
        }
    }

    // Contexts do not outlive the session that created them.
    let owned = sessions
        .write()
        .await
        .remove(&session_id)
        .map(|session| session.contexts().collect::<Vec<_>>())
        .unwrap_or_default();
    for context in owned {
        if let Err(err) = runtime.delete_context(context).await {
            warn!(session = %session_id, context_id = %context, "cleanup failed: {}", err);
        }
    }
    sender_task.abort();
    info!(session = %session_id, "Connection closed: {}", addr);

    Ok(())
}

/// Per-connection request router.
struct Handler<'a> {
    session: SessionId,
    runtime: &'a PlinthRuntime,
    plugins: &'a HashMap<String, PluginDescriptor>,
    sessions: &'a RwLock<HashMap<SessionId, Session>>,
    outbound: &'a mpsc::UnboundedSender<String>,
}

impl Handler<'_> {
    /// Handle one JSON-RPC message. Returns the reply, if one is owed.
    async fn handle(&self, text: &str) -> Option<Value> {
        let request: Value = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(err) => {
                let err = RpcError::Parse(err.to_string());
                warn!(session = %self.session, "{}", err);
                return Some(protocol::error_response(None, &err));
            }
        };

        // Requests without an id are notifications and never get a reply.
        let id = request.get("id");
        let Some(method) = request.get("method").and_then(|m| m.as_str()) else {
            let err = RpcError::InvalidParams("missing method".to_string());
            debug!(session = %self.session, kind = err.kind(), "{}", err);
            return id.map(|id| protocol::error_response(Some(id), &err));
        };
        let params = request.get("params");

        let result = self.route(method, params).await;
        if let Err(err) = &result {
            debug!(session = %self.session, method, kind = err.kind(), "{}", err);
        }
        let id = id?;
        Some(match result {
            Ok(result) => protocol::response(Some(id), result),
            Err(err) => protocol::error_response(Some(id), &err),
        })
    }

    async fn route(&self, method: &str, params: Option<&Value>) -> Result<Value, RpcError> {
        match method {
            "ping" => Ok(json!("pong")),

            "setState" => {
                let SetStateParams { state, block } = protocol::params(params)?;
                self.runtime.set_state(state, block);
                Ok(json!({ "status": "ok" }))
            }

            "newContext" => {
                let descriptor = match protocol::params(params)? {
                    NewContextParams::Inline(descriptor) => descriptor,
                    NewContextParams::Registered { plugin } => self
                        .plugins
                        .get(&plugin)
                        .cloned()
                        .ok_or(RpcError::UnknownPlugin(plugin))?,
                };
                let host = Arc::new(SessionHost::new(self.session, self.outbound.clone()));
                let context = self.runtime.new_context(descriptor, host).await?;
                if let Some(session) = self.sessions.write().await.get_mut(&self.session) {
                    session.track(context);
                }
                Ok(json!({ "contextId": context }))
            }

            "deleteContext" => {
                let ContextParams { context_id } = protocol::params(params)?;
                let owned = match self.sessions.write().await.get_mut(&self.session) {
                    Some(session) => session.untrack(context_id),
                    None => false,
                };
                if owned {
                    self.runtime.delete_context(context_id).await?;
                }
                Ok(json!({ "status": "ok" }))
            }

            "hasContext" => {
                let ContextParams { context_id } = protocol::params(params)?;
                if !self.owns(context_id).await {
                    return Ok(json!(false));
                }
                Ok(json!(self.runtime.has_context(context_id).await?))
            }

            "update" => {
                let ContextParams { context_id } = protocol::params(params)?;
                self.check_owner(context_id).await?;
                let response = self.runtime.update(context_id).await?;
                serde_json::to_value(response).map_err(|e| RpcError::Encode(e.to_string()))
            }

            "submit" => {
                let SubmitParams {
                    context_id,
                    submission,
                } = protocol::params(params)?;
                self.check_owner(context_id).await?;
                self.runtime.submit(context_id, submission).await?;
                Ok(json!({ "status": "ok" }))
            }

            _ => Err(RpcError::UnknownMethod(method.to_string())),
        }
    }

    async fn owns(&self, context: ContextId) -> bool {
        self.sessions
            .read()
            .await
            .get(&self.session)
            .is_some_and(|session| session.owns(context))
    }

    async fn check_owner(&self, context: ContextId) -> Result<(), RpcError> {
        if self.owns(context).await {
            Ok(())
        } else {
            Err(RuntimeError::UnknownContext(context).into())
        }
    }
}
