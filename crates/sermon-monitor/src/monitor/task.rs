//! Handle for the monitor's background loops.

use tokio::task::JoinHandle;

/// A spawned periodic loop. Stopping (or dropping) the handle aborts it.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub(crate) fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(self) {
        log::debug!("Stopping {} task", self.name);
        self.handle.abort();
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
