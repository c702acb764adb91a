use itertools::Itertools;

use crate::{
    error::Result,
    progress::Progress,
    remote::StorageClass,
};

use super::RunState;

/// Retires every identity the walk did not reach. Remote objects are archived,
/// never deleted, so history survives an accidental local deletion.
///
/// Returns the number of identities that could not be retired; those keep
/// their records and are retried next run.
pub async fn reconcile(state: &RunState) -> Result<u64> {
    let removed = state
        .snapshot
        .lock()
        .await
        .drain()
        .map(|(identity, _)| identity)
        .sorted()
        .collect::<Vec<_>>();

    let mut failures = 0;
    for identity in removed {
        state.ensure_running()?;
        state.progress.report(Progress::Removed {
            identity: identity.clone(),
        });
        if state.config.dry_run {
            continue;
        }

        match retire(state, &identity).await {
            Ok(()) => state.stats.write().await.files_removed += 1,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                failures += 1;
                state.stats.write().await.files_failed += 1;
                state.progress.report(Progress::Failed {
                    identity,
                    error: err.to_string(),
                });
            }
        }
    }

    Ok(failures)
}

async fn retire(state: &RunState, identity: &str) -> Result<()> {
    let permit = state.remote_locks.acquire(identity).await?;
    if state.remote.head(identity).await? == Some(StorageClass::Standard) {
        state
            .remote
            .reclassify(identity, StorageClass::Archived)
            .await?;
        state.stats.write().await.files_archived += 1;
        state.progress.report(Progress::Archived {
            identity: identity.to_owned(),
        });
    }
    drop(permit);

    state.store.delete(identity).await?;
    Ok(())
}
