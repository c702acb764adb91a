mod pipeline;
mod reconcile;
mod run;
#[cfg(test)]
mod tests;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::{RwLock, Semaphore};

use crate::{
    config::Config,
    detect::SharedSnapshot,
    error::{Error, Result},
    locks::RemoteLocks,
    progress::ProgressSink,
    remote::SharedRemote,
    stats::Stats,
    store::StateStore,
};

pub use self::run::Run;

/// Shared by the orchestrator and every pipeline of one run.
#[derive(Debug)]
pub struct RunState {
    pub config: Arc<Config>,
    pub remote: SharedRemote,
    pub store: StateStore,
    pub progress: Arc<dyn ProgressSink>,
    pub snapshot: SharedSnapshot,
    /// Mirror copies and record writes.
    pub disk: Semaphore,
    pub remote_locks: RemoteLocks,
    pub stats: RwLock<Stats>,
    cancelled: AtomicBool,
}

impl RunState {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Checked at every phase boundary.
    pub fn ensure_running(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
