use std::{
    collections::{HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, OnceLock, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::{
    config::{Config, ConfigFile},
    error::{Error, Result},
    locks::LockMode,
    ops::{Run, RunState},
    progress::{Progress, ProgressSink},
    remote::{Remote, StorageClass},
    stats::Stats,
    store::{RecordBackend, Snapshot, StateFile, StateStore},
};

#[derive(Debug, Default)]
struct MemoryRemote {
    objects: Mutex<HashMap<String, StorageClass>>,
    calls: Mutex<Vec<String>>,
    failing_uploads: Mutex<HashSet<String>>,
    /// Uploads wait until all of these paths exist.
    upload_gate: Mutex<Vec<PathBuf>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryRemote {
    async fn track(&self, call: String) {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn class(&self, key: &str) -> Option<StorageClass> {
        self.objects.lock().unwrap().get(key).copied()
    }

    fn insert(&self, key: &str, class: StorageClass) {
        self.objects.lock().unwrap().insert(key.to_owned(), class);
    }

    fn fail_uploads_of(&self, key: &str) {
        self.failing_uploads.lock().unwrap().insert(key.to_owned());
    }

    fn clear_failures(&self) {
        self.failing_uploads.lock().unwrap().clear();
    }

    fn hold_uploads_until(&self, paths: Vec<PathBuf>) {
        *self.upload_gate.lock().unwrap() = paths;
    }

    async fn wait_for_gate(&self, local_path: &Path) -> Result<()> {
        let gate = self.upload_gate.lock().unwrap().clone();
        for _ in 0..1000 {
            if gate.iter().all(|path| path.exists()) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        Err(Error::TransferFailed {
            path: local_path.to_owned(),
            reason: "gate never opened".to_owned(),
        })
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    async fn head(&self, key: &str) -> Result<Option<StorageClass>> {
        self.track(format!("head {key}")).await;
        Ok(self.class(key))
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        self.track(format!("upload {key}")).await;
        self.wait_for_gate(local_path).await?;
        if self.failing_uploads.lock().unwrap().contains(key) {
            return Err(Error::TransferFailed {
                path: local_path.to_owned(),
                reason: "no completion status".to_owned(),
            });
        }

        fs::metadata(local_path)?;
        self.insert(key, StorageClass::Standard);
        Ok(())
    }

    async fn reclassify(&self, key: &str, class: StorageClass) -> Result<()> {
        self.track(format!("reclassify {key} {class:?}")).await;
        let mut objects = self.objects.lock().unwrap();
        let current = objects
            .get_mut(key)
            .ok_or_else(|| Error::ItemNotFound(key.to_owned()))?;
        *current = class;
        Ok(())
    }

    async fn delete_if_exists(&self, key: &str) -> Result<()> {
        self.track(format!("delete {key}")).await;
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RecordingProgress {
    events: Mutex<Vec<Progress>>,
}

impl ProgressSink for RecordingProgress {
    fn report(&self, event: Progress) {
        self.events.lock().unwrap().push(event);
    }
}

/// Checks that mirror copies and record writes are reported while the disk
/// permit is held.
#[derive(Debug, Default)]
struct DiskWitness {
    state: OnceLock<Weak<RunState>>,
    checked: AtomicUsize,
    unguarded: AtomicUsize,
}

impl ProgressSink for DiskWitness {
    fn report(&self, event: Progress) {
        if !matches!(event, Progress::Copied { .. } | Progress::Recorded { .. }) {
            return;
        }

        if let Some(state) = self.state.get().and_then(Weak::upgrade) {
            self.checked.fetch_add(1, Ordering::SeqCst);
            if state.disk.available_permits() != 0 {
                self.unguarded.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Loads fine, fails every write.
#[derive(Debug)]
struct ReadOnlyBackend {
    records: Snapshot,
}

impl RecordBackend for ReadOnlyBackend {
    fn load_all(&mut self) -> Result<Snapshot> {
        Ok(self.records.clone())
    }

    fn upsert(&mut self, identity: &str, _last_modified: DateTime<Utc>) -> Result<()> {
        Err(read_only(identity))
    }

    fn delete(&mut self, identity: &str) -> Result<bool> {
        Err(read_only(identity))
    }
}

fn read_only(identity: &str) -> Error {
    Error::other(io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("read-only store, cannot change {identity}"),
    ))
}

fn stale_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

struct Fixture {
    source: TempDir,
    mirror: TempDir,
    state: TempDir,
    remote: Arc<MemoryRemote>,
}

struct Report {
    result: Result<()>,
    stats: Stats,
    events: Vec<Progress>,
}

impl Fixture {
    fn new() -> Self {
        Fixture {
            source: tempfile::tempdir().unwrap(),
            mirror: tempfile::tempdir().unwrap(),
            state: tempfile::tempdir().unwrap(),
            remote: Arc::new(MemoryRemote::default()),
        }
    }

    fn config(&self) -> Config {
        Config::new(
            self.source.path(),
            self.mirror.path(),
            ConfigFile::default().policy().unwrap(),
        )
    }

    fn write(&self, relative: &str, contents: &str) {
        let path = self.source.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn modified(&self, relative: &str) -> DateTime<Utc> {
        let metadata = fs::metadata(self.source.path().join(relative)).unwrap();
        metadata.modified().unwrap().into()
    }

    fn records(&self) -> Snapshot {
        StateFile::open(self.state.path())
            .unwrap()
            .load_all()
            .unwrap()
    }

    fn seed_record(&self, identity: &str, last_modified: DateTime<Utc>) {
        let mut file = StateFile::open(self.state.path()).unwrap();
        file.upsert(identity, last_modified).unwrap();
    }

    async fn run(&self) -> Report {
        self.run_with(self.config()).await
    }

    async fn run_with(&self, config: Config) -> Report {
        let store = StateStore::open(self.state.path()).unwrap();
        self.run_with_store(config, store).await
    }

    async fn run_with_store(&self, config: Config, store: StateStore) -> Report {
        let progress = Arc::new(RecordingProgress::default());
        let run = Run::new(config, self.remote.clone(), store, progress.clone());
        let result = run.execute().await;
        let stats = run.stats().await;
        let events = std::mem::take(&mut *progress.events.lock().unwrap());
        Report {
            result,
            stats,
            events,
        }
    }
}

#[tokio::test]
async fn new_file_is_copied_uploaded_archived_and_recorded() {
    let fixture = Fixture::new();
    fixture.write("showA/ep1.mp4", "episode one");
    fixture.run().await.result.unwrap();
    fixture.remote.take_calls();

    fixture.write("showA/ep2.mp4", "episode two");
    let report = fixture.run().await;
    report.result.unwrap();

    assert_eq!(
        fixture.remote.take_calls(),
        vec![
            "head showA/ep2.mp4",
            "delete showA/ep2.mp4",
            "upload showA/ep2.mp4",
            "reclassify showA/ep2.mp4 Archived",
        ]
    );
    assert_eq!(fixture.remote.class("showA/ep2.mp4"), Some(StorageClass::Archived));

    let mirrored = fs::read_to_string(fixture.mirror.path().join("showA/ep2.mp4")).unwrap();
    assert_eq!(mirrored, "episode two");

    let records = fixture.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records["showA/ep1.mp4"], fixture.modified("showA/ep1.mp4"));
    assert_eq!(records["showA/ep2.mp4"], fixture.modified("showA/ep2.mp4"));

    assert!(report.events.contains(&Progress::Unchanged {
        identity: "showA/ep1.mp4".to_owned()
    }));
    assert!(report.events.contains(&Progress::Detected {
        identity: "showA/ep2.mp4".to_owned()
    }));
    assert_eq!(report.stats.files_seen, 2);
    assert_eq!(report.stats.files_unchanged, 1);
    assert_eq!(report.stats.files_copied, 1);
    assert_eq!(report.stats.files_uploaded, 1);
    assert_eq!(report.stats.files_archived, 1);
}

#[tokio::test]
async fn second_run_without_changes_does_nothing() {
    let fixture = Fixture::new();
    fixture.write("showA/ep1.mp4", "one");
    fixture.write("showA/extras/notes.txt", "notes");
    fixture.write("showB/ep1.mov", "b one");
    let first = fixture.run().await;
    first.result.unwrap();
    assert_eq!(first.stats.files_uploaded, 3);
    fixture.remote.take_calls();

    let second = fixture.run().await;
    second.result.unwrap();
    assert!(fixture.remote.take_calls().is_empty());
    assert_eq!(second.stats.files_seen, 3);
    assert_eq!(second.stats.files_unchanged, 3);
    assert_eq!(second.stats.files_copied, 0);
    assert_eq!(second.stats.files_uploaded, 0);
    assert_eq!(fixture.records().len(), 3);
}

#[tokio::test]
async fn working_files_stay_in_standard_storage() {
    let fixture = Fixture::new();
    fixture.write("showA/project.prproj", "timeline");
    fixture.run().await.result.unwrap();

    assert_eq!(
        fixture.remote.class("showA/project.prproj"),
        Some(StorageClass::Standard)
    );
    assert!(!fixture
        .remote
        .take_calls()
        .iter()
        .any(|call| call.starts_with("reclassify")));
}

#[tokio::test]
async fn archived_remote_object_is_not_uploaded_again() {
    let fixture = Fixture::new();
    fixture.write("showA/ep1.mp4", "one");
    fixture.remote.insert("showA/ep1.mp4", StorageClass::Archived);

    let report = fixture.run().await;
    report.result.unwrap();

    assert_eq!(fixture.remote.take_calls(), vec!["head showA/ep1.mp4"]);
    assert!(fixture.mirror.path().join("showA/ep1.mp4").exists());
    assert_eq!(report.stats.files_already_archived, 1);
    assert!(fixture.records().contains_key("showA/ep1.mp4"));
}

#[tokio::test]
async fn changed_file_replaces_stale_object() {
    let fixture = Fixture::new();
    fixture.write("showA/project.prproj", "v2");
    fixture.seed_record("showA/project.prproj", stale_time());
    fixture.remote.insert("showA/project.prproj", StorageClass::Standard);

    fixture.run().await.result.unwrap();

    assert_eq!(
        fixture.remote.take_calls(),
        vec![
            "head showA/project.prproj",
            "delete showA/project.prproj",
            "upload showA/project.prproj",
        ]
    );
    assert_eq!(
        fixture.records()["showA/project.prproj"],
        fixture.modified("showA/project.prproj")
    );
}

#[tokio::test]
async fn removed_files_are_archived_and_forgotten() {
    let fixture = Fixture::new();
    fixture.write("showA/ep1.mp4", "one");
    fixture.seed_record("showA/ep1.mp4", fixture.modified("showA/ep1.mp4"));
    fixture.seed_record("showB/old.mov", Utc::now());
    fixture.seed_record("showB/cut.prproj", Utc::now());
    fixture.seed_record("showB/never-uploaded.mp4", Utc::now());
    fixture.remote.insert("showB/old.mov", StorageClass::Archived);
    fixture.remote.insert("showB/cut.prproj", StorageClass::Standard);

    let report = fixture.run().await;
    report.result.unwrap();

    assert_eq!(
        fixture.remote.take_calls(),
        vec![
            "head showB/cut.prproj",
            "reclassify showB/cut.prproj Archived",
            "head showB/never-uploaded.mp4",
            "head showB/old.mov",
        ]
    );
    assert_eq!(fixture.remote.class("showB/old.mov"), Some(StorageClass::Archived));
    assert_eq!(
        fixture.remote.class("showB/cut.prproj"),
        Some(StorageClass::Archived)
    );

    let records = fixture.records();
    assert_eq!(records.keys().collect::<Vec<_>>(), vec!["showA/ep1.mp4"]);
    assert_eq!(report.stats.files_removed, 3);
    assert!(report.events.contains(&Progress::Removed {
        identity: "showB/old.mov".to_owned()
    }));
}

#[tokio::test]
async fn failed_upload_is_retried_next_run() {
    let fixture = Fixture::new();
    fixture.write("showA/ep1.mp4", "one");
    fixture.write("showA/ep2.mp4", "two");
    fixture.remote.fail_uploads_of("showA/ep2.mp4");

    let first = fixture.run().await;
    assert_eq!(first.result, Err(Error::FilesFailed(1)));
    assert_eq!(first.stats.files_failed, 1);
    assert!(fixture.mirror.path().join("showA/ep2.mp4").exists());
    assert_eq!(fixture.remote.class("showA/ep2.mp4"), None);
    assert!(!fixture
        .remote
        .take_calls()
        .contains(&"reclassify showA/ep2.mp4 Archived".to_owned()));

    let records = fixture.records();
    assert!(records.contains_key("showA/ep1.mp4"));
    assert!(!records.contains_key("showA/ep2.mp4"));
    assert!(first.events.iter().any(|event| matches!(
        event,
        Progress::Failed { identity, .. } if identity == "showA/ep2.mp4"
    )));

    fixture.remote.clear_failures();
    let second = fixture.run().await;
    second.result.unwrap();
    assert_eq!(second.stats.files_unchanged, 1);
    assert_eq!(second.stats.files_uploaded, 1);
    assert_eq!(fixture.remote.class("showA/ep2.mp4"), Some(StorageClass::Archived));
    assert!(fixture.records().contains_key("showA/ep2.mp4"));
}

#[tokio::test]
async fn failed_reupload_keeps_previous_record() {
    let fixture = Fixture::new();
    fixture.write("showA/project.prproj", "v2");
    let previous = stale_time();
    fixture.seed_record("showA/project.prproj", previous);
    fixture.remote.insert("showA/project.prproj", StorageClass::Standard);
    fixture.remote.fail_uploads_of("showA/project.prproj");

    let report = fixture.run().await;
    assert_eq!(report.result, Err(Error::FilesFailed(1)));
    assert_eq!(fixture.records()["showA/project.prproj"], previous);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_operations_never_overlap() {
    let fixture = Fixture::new();
    for n in 0..24 {
        fixture.write(&format!("show{}/ep{n}.mp4", n % 3), "frames");
    }

    let config = Config {
        task_count: 8,
        ..fixture.config()
    };
    let report = fixture.run_with(config).await;
    report.result.unwrap();

    assert_eq!(report.stats.files_uploaded, 24);
    assert_eq!(fixture.remote.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.records().len(), 24);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_key_remote_locks_back_up_everything() {
    let fixture = Fixture::new();
    for n in 0..12 {
        fixture.write(&format!("showA/ep{n}.wav"), "audio");
    }

    let config = Config {
        remote_lock_mode: LockMode::PerKey,
        ..fixture.config()
    };
    fixture.run_with(config).await.result.unwrap();

    let records = fixture.records();
    assert_eq!(records.len(), 12);
    for n in 0..12 {
        let key = format!("showA/ep{n}.wav");
        assert_eq!(fixture.remote.class(&key), Some(StorageClass::Archived));
        assert_eq!(records[&key], fixture.modified(&key));
    }
}

#[tokio::test]
async fn store_failure_cancels_run() {
    let fixture = Fixture::new();
    fixture.write("showA/ep1.mp4", "one");
    let backend = ReadOnlyBackend {
        records: Snapshot::from([("showB/old.prproj".to_owned(), Utc::now())]),
    };
    fixture.remote.insert("showB/old.prproj", StorageClass::Standard);
    let store = StateStore::spawn(backend).unwrap();

    let report = fixture.run_with_store(fixture.config(), store).await;
    assert!(matches!(report.result, Err(Error::Store(_))));
    assert_eq!(
        fixture.remote.class("showB/old.prproj"),
        Some(StorageClass::Standard)
    );
    assert!(!report
        .events
        .iter()
        .any(|event| matches!(event, Progress::Removed { .. })));
}

#[tokio::test]
async fn missing_source_skips_reconciliation() {
    let fixture = Fixture::new();
    fixture.seed_record("showA/ep1.mp4", Utc::now());
    fixture.remote.insert("showA/ep1.mp4", StorageClass::Standard);

    let config = Config {
        source_dir: fixture.source.path().join("missing"),
        ..fixture.config()
    };
    let report = fixture.run_with(config).await;

    assert!(matches!(report.result, Err(Error::IncompleteWalk(_))));
    assert!(fixture.remote.take_calls().is_empty());
    assert!(fixture.records().contains_key("showA/ep1.mp4"));
}

#[tokio::test]
async fn dry_run_changes_nothing() {
    let fixture = Fixture::new();
    fixture.write("showA/ep2.mp4", "two");
    fixture.seed_record("showB/old.mov", Utc::now());

    let config = Config {
        dry_run: true,
        ..fixture.config()
    };
    let report = fixture.run_with(config).await;
    report.result.unwrap();

    assert!(fixture.remote.take_calls().is_empty());
    assert!(!fixture.mirror.path().join("showA/ep2.mp4").exists());
    assert_eq!(
        fixture.records().keys().collect::<Vec<_>>(),
        vec!["showB/old.mov"]
    );
    assert_eq!(
        report.events,
        vec![
            Progress::Detected {
                identity: "showA/ep2.mp4".to_owned()
            },
            Progress::Removed {
                identity: "showB/old.mov".to_owned()
            },
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mirror_copy_overlaps_remote_phase() {
    let fixture = Fixture::new();
    fixture.write("showA/a.mp4", "a");
    fixture.write("showA/b.mp4", "b");

    // Whichever file uploads first holds the remote lock until the other
    // file's mirror copy exists.
    fixture.remote.hold_uploads_until(vec![
        fixture.mirror.path().join("showA/a.mp4"),
        fixture.mirror.path().join("showA/b.mp4"),
    ]);

    let report = fixture.run().await;
    report.result.unwrap();
    assert_eq!(report.stats.files_uploaded, 2);
    assert_eq!(fixture.remote.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disk_phases_hold_the_disk_permit() {
    let fixture = Fixture::new();
    for n in 0..16 {
        fixture.write(&format!("show{}/ep{n}.mov", n % 2), "frames");
    }

    let config = Config {
        remote_lock_mode: LockMode::PerKey,
        ..fixture.config()
    };
    let store = StateStore::open(fixture.state.path()).unwrap();
    let witness = Arc::new(DiskWitness::default());
    let run = Run::new(config, fixture.remote.clone(), store, witness.clone());
    witness.state.set(Arc::downgrade(run.state())).unwrap();

    run.execute().await.unwrap();

    assert_eq!(witness.checked.load(Ordering::SeqCst), 32);
    assert_eq!(witness.unguarded.load(Ordering::SeqCst), 0);
    assert_eq!(run.state().disk.available_permits(), 1);
    assert_eq!(fixture.records().len(), 16);
}

#[cfg(unix)]
#[tokio::test]
async fn looping_symlink_does_not_block_reconciliation() {
    use std::os::unix::fs::symlink;

    let fixture = Fixture::new();
    fixture.write("showA/ep1.mp4", "one");
    symlink("self", fixture.source.path().join("showA/self")).unwrap();
    fixture.seed_record("showB/old.mov", Utc::now());
    fixture.remote.insert("showB/old.mov", StorageClass::Standard);

    let report = fixture.run().await;
    report.result.unwrap();

    assert_eq!(fixture.remote.class("showB/old.mov"), Some(StorageClass::Archived));
    let records = fixture.records();
    assert!(records.contains_key("showA/ep1.mp4"));
    assert!(!records.contains_key("showB/old.mov"));
}
