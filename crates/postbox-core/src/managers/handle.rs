use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};

#[derive(Default)]
struct SlotState {
    disposed: bool,
    task: Option<AbortHandle>,
}

/// The wait currently armed by a manager loop, shared with its handle so
/// disposal cancels it directly instead of through the loop task.
#[derive(Default)]
pub(crate) struct ArmedSlot {
    state: Mutex<SlotState>,
}

impl ArmedSlot {
    /// Record a newly armed wait. After disposal it is aborted on the spot.
    pub(crate) fn arm(&self, task: AbortHandle) {
        let mut state = self.state.lock();
        if state.disposed {
            task.abort();
            return;
        }
        state.task = Some(task);
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    fn dispose(&self) {
        let mut state = self.state.lock();
        state.disposed = true;
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }
}

/// Owner of a running manager loop. Disposing aborts the loop together with
/// its armed wait; an enactment transaction already queued still completes.
pub struct ManagerHandle {
    name: &'static str,
    task: Mutex<Option<JoinHandle<()>>>,
    armed: Arc<ArmedSlot>,
}

impl ManagerHandle {
    pub(crate) fn new(name: &'static str, task: JoinHandle<()>, armed: Arc<ArmedSlot>) -> Self {
        Self {
            name,
            task: Mutex::new(Some(task)),
            armed,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Idempotent; safe to call from any thread.
    pub fn dispose(&self) {
        self.armed.dispose();
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::debug!(manager = self.name, "Manager disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.task.lock().is_none()
    }
}

impl Drop for ManagerHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}
