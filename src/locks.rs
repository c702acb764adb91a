use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// One remote operation sequence at a time, process-wide.
    Global,
    /// One remote operation sequence at a time per key.
    PerKey,
}

/// Gates remote existence-check/delete/upload/reclassify sequences.
#[derive(Debug)]
pub struct RemoteLocks {
    mode: LockMode,
    global: Arc<Semaphore>,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl RemoteLocks {
    pub fn new(mode: LockMode) -> Self {
        RemoteLocks {
            mode,
            global: Arc::new(Semaphore::new(1)),
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, key: &str) -> Result<OwnedSemaphorePermit> {
        let semaphore = match self.mode {
            LockMode::Global => self.global.clone(),
            LockMode::PerKey => self.semaphore(key).await,
        };

        let permit = semaphore.acquire_owned().await?;
        Ok(permit)
    }

    async fn semaphore(&self, key: &str) -> Arc<Semaphore> {
        self.semaphores
            .lock()
            .await
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }
}
