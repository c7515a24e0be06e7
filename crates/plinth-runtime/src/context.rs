//! Execution context: one loaded plugin plus the callbacks from its latest render.

use rhizome_plinth_core::{
    ContextId, HostCallbacks, LoadError, PluginDescriptor, RenderResponse, Snapshot, Submission,
};
use rhizome_plinth_runtime_luajit::{Capabilities, LoadedModule, RefTable, loader};
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use tracing::{debug, warn};

/// A live plugin instance.
///
/// The reference table belongs to exactly one render pass. Every `update`
/// replaces it wholesale, including a failed one, which leaves it empty.
/// When renders overlap, only the one that started last installs its table.
pub struct ExecutionContext {
    id: ContextId,
    refs: RefCell<RefTable>,
    generation: Cell<u64>,
    module: LoadedModule,
}

impl ExecutionContext {
    /// Load the plugin and bind its `ds` table to `host`.
    pub fn new(
        id: ContextId,
        descriptor: &PluginDescriptor,
        host: Arc<dyn HostCallbacks>,
    ) -> Result<Self, LoadError> {
        let module = loader::load(descriptor)?;
        module
            .install(Capabilities::new(id, &descriptor.id, host))
            .map_err(|e| LoadError::Sandbox {
                plugin: descriptor.id.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            id,
            refs: RefCell::new(RefTable::new()),
            generation: Cell::new(0),
            module,
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn plugin(&self) -> &str {
        self.module.plugin()
    }

    pub fn module(&self) -> &LoadedModule {
        &self.module
    }

    /// Number of callbacks reachable from the latest render.
    pub fn reference_count(&self) -> usize {
        self.refs.borrow().len()
    }

    /// Render against `snapshot`.
    ///
    /// Script failures are logged and produce an empty response.
    pub async fn update(&self, snapshot: &Snapshot) -> RenderResponse {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let rendered = self.module.update(snapshot).await;
        let (response, refs) = match rendered {
            Ok(rendered) => (rendered.response, rendered.refs),
            Err(err) => {
                warn!(
                    context_id = %self.id,
                    plugin = %self.plugin(),
                    trust = %self.module.trust(),
                    block = snapshot.block(),
                    "update failed: {}",
                    err
                );
                (RenderResponse::empty(), RefTable::new())
            }
        };

        debug!(
            context_id = %self.id,
            plugin = %self.plugin(),
            components = response.components.len(),
            references = refs.len(),
            "rendered"
        );
        if self.generation.get() == generation {
            *self.refs.borrow_mut() = refs;
        } else {
            debug!(
                context_id = %self.id,
                plugin = %self.plugin(),
                generation,
                "superseded render, keeping newer references"
            );
        }
        response
    }

    /// Invoke the callback behind `submission.reference`.
    ///
    /// References that the latest render did not mint are ignored.
    pub async fn submit(&self, submission: &Submission) {
        let callback = self.refs.borrow().get(&submission.reference).cloned();
        let Some(callback) = callback else {
            debug!(
                context_id = %self.id,
                plugin = %self.plugin(),
                reference = %submission.reference,
                "ignoring stale reference"
            );
            return;
        };

        if let Err(err) = self.module.invoke(&callback, &submission.values).await {
            warn!(
                context_id = %self.id,
                plugin = %self.plugin(),
                reference = %submission.reference,
                "callback failed: {}",
                err
            );
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("generation", &self.generation.get())
            .field("references", &self.reference_count())
            .finish()
    }
}
