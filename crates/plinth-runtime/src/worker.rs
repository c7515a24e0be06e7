//! The single lane that owns every Lua VM.
//!
//! Lua state cannot leave the thread that created it, so all contexts live on
//! one dedicated thread driving a current-thread runtime and a `LocalSet`.
//! Renders and submits are spawned as local tasks: while one is suspended in
//! a host dispatch the lane keeps serving other requests.

use crate::registry::ContextRegistry;
use rhizome_plinth_core::{
    ContextId, HostCallbacks, PluginDescriptor, RenderResponse, RuntimeError, Snapshot, Submission,
};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tracing::{debug, trace};

pub(crate) const THREAD_NAME: &str = "plinth-worker";

pub(crate) enum Request {
    SetState(Snapshot),
    NewContext {
        descriptor: PluginDescriptor,
        host: Arc<dyn HostCallbacks>,
        reply: oneshot::Sender<Result<ContextId, RuntimeError>>,
    },
    DeleteContext {
        id: ContextId,
        reply: oneshot::Sender<bool>,
    },
    HasContext {
        id: ContextId,
        reply: oneshot::Sender<bool>,
    },
    Update {
        id: ContextId,
        reply: oneshot::Sender<Result<RenderResponse, RuntimeError>>,
    },
    Submit {
        id: ContextId,
        submission: Submission,
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

/// Start the worker thread.
pub(crate) fn spawn() -> std::io::Result<(mpsc::UnboundedSender<Request>, JoinHandle<()>)> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let handle = std::thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || {
            let local = LocalSet::new();
            local.block_on(&runtime, run(receiver));
            // Let renders that were already running deliver their replies.
            runtime.block_on(local);
            debug!("worker stopped");
        })?;

    Ok((sender, handle))
}

async fn run(mut requests: mpsc::UnboundedReceiver<Request>) {
    let mut registry = ContextRegistry::new();
    let mut current: Option<Snapshot> = None;

    while let Some(request) = requests.recv().await {
        match request {
            Request::SetState(snapshot) => {
                trace!(block = snapshot.block(), "state replaced");
                current = Some(snapshot);
            }
            Request::NewContext {
                descriptor,
                host,
                reply,
            } => {
                let created = registry
                    .create(&descriptor, host)
                    .map_err(RuntimeError::from);
                let _ = reply.send(created);
            }
            Request::DeleteContext { id, reply } => {
                let _ = reply.send(registry.remove(id));
            }
            Request::HasContext { id, reply } => {
                let _ = reply.send(registry.contains(id));
            }
            Request::Update { id, reply } => {
                let context = match registry.get(id) {
                    Ok(context) => context,
                    Err(err) => {
                        let _ = reply.send(Err(err));
                        continue;
                    }
                };
                // The snapshot is captured here; later pushes do not affect
                // this render even if it suspends.
                let Some(snapshot) = current.clone() else {
                    let _ = reply.send(Err(RuntimeError::NotReady));
                    continue;
                };
                tokio::task::spawn_local(async move {
                    let response = context.update(&snapshot).await;
                    let _ = reply.send(Ok(response));
                });
            }
            Request::Submit {
                id,
                submission,
                reply,
            } => {
                let context = match registry.get(id) {
                    Ok(context) => context,
                    Err(err) => {
                        let _ = reply.send(Err(err));
                        continue;
                    }
                };
                tokio::task::spawn_local(async move {
                    context.submit(&submission).await;
                    let _ = reply.send(Ok(()));
                });
            }
        }
    }

    debug!(contexts = registry.len(), "request channel closed");
}
