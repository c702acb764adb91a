
use std::{
    collections::HashSet,
    fs::Metadata,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::anyhow;
use async_stream::stream;
use async_walkdir::{Filtering, WalkDir};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::{fs, sync::Mutex};
use tokio_stream::{Stream, StreamExt};

use crate::{
    config::{Config, Policy},
    error::{Error, Result},
    format::format_path,
    store::Snapshot,
};

pub type SharedSnapshot = Arc<Mutex<Snapshot>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Unchanged,
    ChangedOrNew,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupDecision {
    pub status: Status,
    pub identity: String,
    pub last_modified: DateTime<Utc>,
    pub source_path: PathBuf,
    pub mirror_path: PathBuf,
}

/// A top-level directory of the source tree. Identities start with its name.
#[derive(Debug)]
struct Unit {
    name: String,
    path: PathBuf,
}

/// Diffs the source tree against the run snapshot.
///
/// Every identity the walk reaches is removed from the snapshot, so once the
/// stream is exhausted without errors the snapshot holds exactly the
/// identities that no longer exist locally.
#[derive(Debug)]
pub struct ChangeDetector {
    config: Arc<Config>,
    snapshot: SharedSnapshot,
}

impl ChangeDetector {
    pub fn new(config: Arc<Config>, snapshot: SharedSnapshot) -> Self {
        ChangeDetector { config, snapshot }
    }

    /// Errors are yielded in place and the walk continues past them; a caller
    /// that sees any error must treat the walk as incomplete.
    pub fn decisions(&self) -> impl Stream<Item = Result<BackupDecision>> + '_ {
        stream! {
            let units = match self.list_units().await {
                Ok(units) => units,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            for unit in units {
                let unit = Arc::new(unit);
                let mut roots = vec![unit.path.clone()];
                let mut visited = HashSet::new();
                if let Ok(canonical) = fs::canonicalize(&unit.path).await {
                    visited.insert(canonical);
                }

                while let Some(root) = roots.pop() {
                    let mut walker = walk(&self.config, &unit, &root);
                    loop {
                        let entry = match walker.try_next().await {
                            Ok(Some(entry)) => entry,
                            Ok(None) => break,
                            Err(err) => {
                                yield Err(walk_error(err));
                                continue;
                            }
                        };

                        match self.visit(&unit, entry.path(), &mut roots, &mut visited).await {
                            Ok(Some(decision)) => yield Ok(decision),
                            Ok(None) => {}
                            Err(err) => yield Err(err),
                        }
                    }
                }
            }
        }
    }

    async fn list_units(&self) -> Result<Vec<Unit>> {
        let source_dir = &self.config.source_dir;
        let metadata = fs::metadata(source_dir).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                Error::FileDoesNotExist(source_dir.clone())
            } else {
                err.into()
            }
        })?;
        if !metadata.is_dir() {
            return Err(Error::FileIsNotDirectory(source_dir.clone()));
        }

        let mut units = vec![];
        let mut entries = fs::read_dir(source_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                warn!("skipped {} (name is not valid UTF-8)", format_path(&path));
                continue;
            };

            let link_metadata = fs::symlink_metadata(&path).await?;
            if is_excluded(&self.config.policy, &name, Path::new(&name), &link_metadata) {
                debug!("ignored {}", format_path(&path));
                continue;
            }

            let Some(metadata) = follow(&path, link_metadata).await else {
                continue;
            };

            if metadata.is_dir() {
                units.push(Unit { name, path });
            } else {
                warn!("skipped {} (not inside a top-level directory)", format_path(&path));
            }
        }

        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    async fn visit(
        &self,
        unit: &Unit,
        path: PathBuf,
        roots: &mut Vec<PathBuf>,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<Option<BackupDecision>> {
        let link_metadata = fs::symlink_metadata(&path).await?;
        let is_symlink = link_metadata.is_symlink();
        let relative = path.strip_prefix(&unit.path)?.to_owned();
        let Some(identity) = identity(&unit.name, &relative) else {
            warn!("skipped {} (name is not valid UTF-8)", format_path(&path));
            return Ok(None);
        };

        if is_excluded(&self.config.policy, &identity, &relative, &link_metadata) {
            debug!("ignored {}", format_path(&path));
            return Ok(None);
        }

        let Some(metadata) = follow(&path, link_metadata).await else {
            return Ok(None);
        };

        if metadata.is_dir() {
            // Plain directories are walked by the current walker; linked ones
            // get their own root, once per target.
            if is_symlink && visited.insert(fs::canonicalize(&path).await?) {
                roots.push(path);
            }

            return Ok(None);
        }

        if !metadata.is_file() {
            warn!("skipped special file {}", format_path(&path));
            return Ok(None);
        }

        let last_modified = DateTime::<Utc>::from(metadata.modified()?);
        let status = classify(&mut *self.snapshot.lock().await, &identity, last_modified);
        let mirror_path = self.config.mirror_dir.join(&unit.name).join(&relative);

        Ok(Some(BackupDecision {
            status,
            identity,
            last_modified,
            source_path: path,
            mirror_path,
        }))
    }
}

fn is_excluded(policy: &Policy, identity: &str, relative: &Path, metadata: &Metadata) -> bool {
    let name = relative
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();

    policy.is_ignored_name(&name)
        || policy.is_ignored_identity(identity)
        || (policy.skip_hidden() && is_hidden(relative, metadata))
}

/// Walks `root`, never descending into excluded directories.
fn walk(config: &Arc<Config>, unit: &Arc<Unit>, root: &Path) -> WalkDir {
    let config = config.clone();
    let unit = unit.clone();
    WalkDir::new(root).filter(move |entry| {
        let config = config.clone();
        let unit = unit.clone();
        async move {
            if is_excluded_dir(&config.policy, &unit, &entry.path()).await {
                Filtering::IgnoreDir
            } else {
                Filtering::Continue
            }
        }
    })
}

/// Entries that cannot be inspected here are left to `visit`, which reports them.
async fn is_excluded_dir(policy: &Policy, unit: &Unit, path: &Path) -> bool {
    let Ok(metadata) = fs::symlink_metadata(path).await else {
        return false;
    };
    if !metadata.is_dir() {
        return false;
    }

    let Ok(relative) = path.strip_prefix(&unit.path) else {
        return false;
    };
    identity(&unit.name, relative)
        .is_some_and(|identity| is_excluded(policy, &identity, relative, &metadata))
}

/// Removes `identity` from the snapshot and compares timestamps exactly.
pub fn classify(snapshot: &mut Snapshot, identity: &str, last_modified: DateTime<Utc>) -> Status {
    match snapshot.remove(identity) {
        Some(recorded) if recorded == last_modified => Status::Unchanged,
        _ => Status::ChangedOrNew,
    }
}

/// `<unit>/<path inside unit>` with `/` separators, or `None` for non-UTF-8 names.
pub fn identity(unit: &str, relative: &Path) -> Option<String> {
    let mut identity = unit.to_owned();
    for component in relative.components() {
        identity.push('/');
        identity.push_str(component.as_os_str().to_str()?);
    }

    Some(identity)
}

/// Metadata of the link target, or `None` for a link that cannot be resolved:
/// a missing target, a link to itself, or a chain of links that loops.
async fn follow(path: &Path, link_metadata: Metadata) -> Option<Metadata> {
    if !link_metadata.is_symlink() {
        return Some(link_metadata);
    }

    match fs::metadata(path).await {
        Ok(metadata) => Some(metadata),
        Err(err) => {
            warn!("skipped broken symlink {} ({err})", format_path(path));
            None
        }
    }
}

fn walk_error(err: async_walkdir::Error) -> Error {
    match (err.io(), err.path()) {
        (Some(io_err), Some(path)) => {
            anyhow!("could not read {} ({io_err})", format_path(path)).into()
        }
        _ => err.into(),
    }
}

#[cfg(windows)]
fn is_hidden(_relative: &Path, metadata: &Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;

    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

/// Dot-prefixed files, and anything inside a dot-prefixed directory.
#[cfg(not(windows))]
fn is_hidden(relative: &Path, _metadata: &Metadata) -> bool {
    relative
        .components()
        .any(|component| component.as_os_str().to_string_lossy().starts_with('.'))
}
