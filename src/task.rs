use std::{future::Future, sync::Arc};

use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinSet},
};

use crate::error::Result;

/// A `JoinSet` that holds at most `max_tasks` running tasks; `spawn` waits for a free slot.
pub struct BoundedJoinSet<T> {
    semaphore: Arc<Semaphore>,
    join_set: JoinSet<T>,
}

impl<T: Send + 'static> BoundedJoinSet<T> {
    pub fn new(max_tasks: usize) -> Self {
        BoundedJoinSet {
            semaphore: Arc::new(Semaphore::new(max_tasks.max(1))),
            join_set: JoinSet::new(),
        }
    }

    pub async fn spawn<F>(&mut self, task: F) -> Result<()>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permit = self.semaphore.clone().acquire_owned().await?;
        self.join_set.spawn(async move {
            let value = task.await;
            drop(permit);
            value
        });
        Ok(())
    }

    pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
        self.join_set.join_next().await
    }

    pub fn try_join_next(&mut self) -> Option<Result<T, JoinError>> {
        self.join_set.try_join_next()
    }
}
