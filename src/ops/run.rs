use std::{
    pin::pin,
    sync::{atomic::AtomicBool, Arc},
};

use log::{error, info, warn};
use tokio::{
    sync::{Mutex, RwLock, Semaphore},
    task::JoinError,
};
use tokio_stream::StreamExt;

use crate::{
    config::Config,
    detect::{ChangeDetector, Status},
    error::{Error, Result},
    locks::RemoteLocks,
    progress::{Progress, ProgressSink},
    remote::SharedRemote,
    stats::Stats,
    store::{Snapshot, StateStore},
    task::BoundedJoinSet,
};

use super::{pipeline::back_up, reconcile::reconcile, RunState};

type Joined = Result<(String, Result<()>), JoinError>;

#[derive(Debug, Default)]
struct Outcome {
    walk_errors: u64,
    failures: u64,
    fatal: Option<Error>,
}

/// One backup run: load state, back up changed files concurrently, then
/// retire files that disappeared.
///
/// Per-file failures do not stop the run; they are counted and reported as
/// `Error::FilesFailed` at the end. Failures of shared infrastructure cancel
/// the run: no new pipelines start, running ones stop at their next phase
/// boundary, and reconciliation is skipped.
#[derive(Debug)]
pub struct Run {
    state: Arc<RunState>,
}

impl Run {
    pub fn new(
        config: Config,
        remote: SharedRemote,
        store: StateStore,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let remote_locks = RemoteLocks::new(config.remote_lock_mode);
        let state = RunState {
            config: Arc::new(config),
            remote,
            store,
            progress,
            snapshot: Arc::new(Mutex::new(Snapshot::new())),
            disk: Semaphore::new(1),
            remote_locks,
            stats: RwLock::new(Stats::new()),
            cancelled: AtomicBool::new(false),
        };

        Run {
            state: Arc::new(state),
        }
    }

    pub async fn execute(&self) -> Result<()> {
        let result = self.execute_phases().await;
        self.state.stats.write().await.end();
        result
    }

    pub async fn stats(&self) -> Stats {
        self.state.stats.read().await.clone()
    }

    #[cfg(test)]
    pub(super) fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    async fn execute_phases(&self) -> Result<()> {
        let state = &self.state;
        let snapshot = state.store.load_all().await?;
        info!("loaded {} record(s)", snapshot.len());
        *state.snapshot.lock().await = snapshot;

        let outcome = self.back_up_changed().await?;
        if let Some(err) = outcome.fatal {
            return Err(err);
        }

        if outcome.walk_errors > 0 {
            return Err(Error::IncompleteWalk(state.config.source_dir.clone()));
        }

        let failures = outcome.failures + reconcile(state).await?;
        if failures > 0 {
            return Err(Error::FilesFailed(failures));
        }

        Ok(())
    }

    async fn back_up_changed(&self) -> Result<Outcome> {
        let state = &self.state;
        let detector = ChangeDetector::new(state.config.clone(), state.snapshot.clone());
        let mut decisions = pin!(detector.decisions());
        let mut tasks = BoundedJoinSet::new(state.config.task_count);
        let mut outcome = Outcome::default();

        while let Some(result) = decisions.next().await {
            if state.is_cancelled() {
                break;
            }

            let decision = match result {
                Ok(decision) => decision,
                Err(err) => {
                    warn!("{err}");
                    outcome.walk_errors += 1;
                    continue;
                }
            };

            state.stats.write().await.files_seen += 1;
            let identity = decision.identity.clone();
            match decision.status {
                Status::Unchanged => {
                    state.stats.write().await.files_unchanged += 1;
                    state.progress.report(Progress::Unchanged { identity });
                }
                Status::ChangedOrNew => {
                    state.progress.report(Progress::Detected {
                        identity: identity.clone(),
                    });
                    if state.config.dry_run {
                        continue;
                    }

                    let state = state.clone();
                    tasks
                        .spawn(async move {
                            let result = back_up(&state, decision).await;
                            (identity, result)
                        })
                        .await?;
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                self.settle(joined, &mut outcome).await;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.settle(joined, &mut outcome).await;
        }

        if outcome.walk_errors > 0 {
            warn!(
                "skipping reconciliation after {} walk error(s)",
                outcome.walk_errors
            );
        }

        Ok(outcome)
    }

    async fn settle(&self, joined: Joined, outcome: &mut Outcome) {
        let (identity, err) = match joined {
            Ok((_, Ok(()))) => return,
            Ok((identity, Err(err))) => (Some(identity), err),
            Err(err) => (None, err.into()),
        };

        match err {
            Error::Cancelled => {}
            err if err.is_fatal() => {
                self.state.cancel();
                if outcome.fatal.is_none() {
                    error!("cancelling run: {err}");
                    outcome.fatal = Some(err);
                }
            }
            err => {
                outcome.failures += 1;
                self.state.stats.write().await.files_failed += 1;
                self.state.progress.report(Progress::Failed {
                    identity: identity.unwrap_or_default(),
                    error: err.to_string(),
                });
            }
        }
    }
}
