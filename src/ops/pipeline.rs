use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use tokio::fs;

use crate::{
    detect::BackupDecision,
    error::{Result, OK},
    format::format_path,
    progress::Progress,
    remote::StorageClass,
};

use super::RunState;

/// Mirror copy, remote transfer, then record. Each phase holds only its own
/// lock, so phases of different files overlap; a failed phase leaves the
/// record untouched and the file is detected as changed again next run.
pub async fn back_up(state: &RunState, decision: BackupDecision) -> Result<()> {
    let BackupDecision {
        identity,
        last_modified,
        source_path,
        mirror_path,
        ..
    } = decision;

    state.ensure_running()?;
    copy_to_mirror(state, &identity, &source_path, &mirror_path).await?;

    state.ensure_running()?;
    transfer(state, &identity, &source_path).await?;

    state.ensure_running()?;
    record(state, &identity, last_modified).await
}

async fn copy_to_mirror(
    state: &RunState,
    identity: &str,
    source_path: &Path,
    mirror_path: &Path,
) -> Result<()> {
    let _permit = state.disk.acquire().await?;

    if let Some(parent) = mirror_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    debug!("copying to {}", format_path(mirror_path));
    let size = fs::copy(source_path, mirror_path).await?;

    let mut stats = state.stats.write().await;
    stats.files_copied += 1;
    stats.bytes_copied += size;
    drop(stats);

    state.progress.report(Progress::Copied {
        identity: identity.to_owned(),
        size,
    });
    OK
}

async fn transfer(state: &RunState, identity: &str, source_path: &Path) -> Result<()> {
    let _permit = state.remote_locks.acquire(identity).await?;
    let remote = &state.remote;

    if remote.head(identity).await? == Some(StorageClass::Archived) {
        state.stats.write().await.files_already_archived += 1;
        state.progress.report(Progress::AlreadyArchived {
            identity: identity.to_owned(),
        });
        return OK;
    }

    // A stale or partial object from an earlier failed run.
    remote.delete_if_exists(identity).await?;
    remote.upload(source_path, identity).await?;
    state.stats.write().await.files_uploaded += 1;
    state.progress.report(Progress::Uploaded {
        identity: identity.to_owned(),
    });

    if state.config.policy.is_immutable(identity) {
        remote.reclassify(identity, StorageClass::Archived).await?;
        state.stats.write().await.files_archived += 1;
        state.progress.report(Progress::Archived {
            identity: identity.to_owned(),
        });
    }

    OK
}

async fn record(state: &RunState, identity: &str, last_modified: DateTime<Utc>) -> Result<()> {
    let _permit = state.disk.acquire().await?;
    state.store.upsert(identity, last_modified).await?;
    state.snapshot.lock().await.remove(identity);

    state.progress.report(Progress::Recorded {
        identity: identity.to_owned(),
        last_modified,
    });
    OK
}
