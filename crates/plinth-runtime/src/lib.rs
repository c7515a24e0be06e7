//! Plinth plugin runtime.
//!
//! [`PlinthRuntime`] is a cloneable, thread-safe handle to the worker lane
//! that owns every execution context. Hosts push state snapshots, create
//! contexts from plugin descriptors, and drive `update`/`submit` through it.
//! Script failures never come back as errors; only misuse of the host
//! contract does.

pub mod context;
pub mod registry;
mod worker;

pub use context::ExecutionContext;
pub use registry::ContextRegistry;

use rhizome_plinth_core::{
    ContextId, HostCallbacks, PluginDescriptor, RenderResponse, RuntimeError, Snapshot, Submission,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use worker::Request;

/// Handle to a running worker.
///
/// The worker stops once every clone of the handle has been dropped.
#[derive(Clone)]
pub struct PlinthRuntime {
    requests: mpsc::UnboundedSender<Request>,
}

impl PlinthRuntime {
    /// Spawn the worker thread.
    pub fn start() -> std::io::Result<Self> {
        let (requests, _thread) = worker::spawn()?;
        Ok(Self { requests })
    }

    /// Replace the current snapshot.
    ///
    /// Renders already in flight keep the snapshot they started with.
    pub fn set_state(&self, state: serde_json::Value, block: u64) {
        self.push(Snapshot::new(state, block));
    }

    pub fn push(&self, snapshot: Snapshot) {
        if self.requests.send(Request::SetState(snapshot)).is_err() {
            tracing::debug!("state dropped: worker is gone");
        }
    }

    /// Load a plugin into a new context bound to `host`.
    pub async fn new_context(
        &self,
        descriptor: PluginDescriptor,
        host: Arc<dyn HostCallbacks>,
    ) -> Result<ContextId, RuntimeError> {
        self.call(|reply| Request::NewContext {
            descriptor,
            host,
            reply,
        })
        .await?
    }

    /// Destroy a context. Deleting an unknown id is not an error.
    pub async fn delete_context(&self, id: ContextId) -> Result<(), RuntimeError> {
        self.call(|reply| Request::DeleteContext { id, reply })
            .await
            .map(|_| ())
    }

    pub async fn has_context(&self, id: ContextId) -> Result<bool, RuntimeError> {
        self.call(|reply| Request::HasContext { id, reply }).await
    }

    /// Render a context against the current snapshot.
    pub async fn update(&self, id: ContextId) -> Result<RenderResponse, RuntimeError> {
        self.call(|reply| Request::Update { id, reply }).await?
    }

    /// Deliver a button press or form submission.
    pub async fn submit(&self, id: ContextId, submission: Submission) -> Result<(), RuntimeError> {
        self.call(|reply| Request::Submit {
            id,
            submission,
            reply,
        })
        .await?
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(request(reply))
            .map_err(|_| RuntimeError::Disconnected)?;
        response.await.map_err(|_| RuntimeError::Disconnected)
    }
}

impl std::fmt::Debug for PlinthRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlinthRuntime")
            .field("running", &!self.requests.is_closed())
            .finish()
    }
}
