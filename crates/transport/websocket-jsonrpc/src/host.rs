//! Collaborator callbacks that forward to a connected client.

use futures_util::future::BoxFuture;
use rhizome_plinth_core::{ContextId, DispatchError, HostCallbacks};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::notification;
use crate::session::SessionId;

/// Routes `dispatch`, `log` and `quest` calls to the session that owns the
/// context, as JSON-RPC notifications.
///
/// Dispatch resolves once the notification is queued for the client.
pub struct SessionHost {
    session: SessionId,
    outbound: mpsc::UnboundedSender<String>,
}

impl SessionHost {
    pub fn new(session: SessionId, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { session, outbound }
    }

    fn notify(&self, method: &str, context: ContextId, args: Vec<Value>) -> bool {
        let sent = self
            .outbound
            .send(notification(method, context, args).to_string())
            .is_ok();
        if !sent {
            debug!(session = %self.session, context_id = %context, method, "client gone");
        }
        sent
    }
}

impl HostCallbacks for SessionHost {
    fn dispatch(
        &self,
        context: ContextId,
        actions: Vec<Value>,
    ) -> BoxFuture<'static, Result<(), DispatchError>> {
        let result = if self.notify("dispatch", context, actions) {
            Ok(())
        } else {
            Err(DispatchError(format!("session {} is closed", self.session)))
        };
        Box::pin(async move { result })
    }

    fn log(&self, context: ContextId, args: Vec<Value>) {
        self.notify("log", context, args);
    }

    fn quest(&self, context: ContextId, args: Vec<Value>) {
        self.notify("quest", context, args);
    }
}
