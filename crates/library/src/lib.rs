use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{join_relpath, ParsedTags, TrackId, TrackRecord};
use metadata::{CachingTagReader, LoftyTagReader, TagError, TagReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

pub mod config;
pub mod discovery;
pub mod events;
pub mod executor;
pub mod indexer;
pub mod records;
pub mod store;

pub use config::{
    config_path_from_env, load_or_create_config, resolve_music_root, resolve_path, save_config,
    ConfigError, LibraryConfig,
};
pub use discovery::{
    DirEntryInfo, DirIterator, DiscoveredEntry, DiscoveryError, DiscoveryReport, FileDiscovery,
    WalkdirDiscovery,
};
pub use events::{EventHub, IndexEvent, ScanSummary, Stage, UpdateOutcome};
pub use executor::{PendingResult, StoreExecutor, DEFAULT_QUEUE_DEPTH};
pub use indexer::{LibraryIndexer, SharedTagReader};
pub use records::{Admission, IndexStats, INDEX_VERSION};
pub use store::{MemoryStore, RedbStore, Store, StoreError};

/// Handle to an indexed music library.
///
/// Owns the store executor, the cached tag reader and the indexer. Clones
/// share all of them. Store accessors return a [`PendingResult`] that can be
/// waited on or awaited.
#[derive(Clone)]
pub struct Library {
    root: PathBuf,
    executor: StoreExecutor,
    reader: SharedTagReader,
    indexer: Arc<LibraryIndexer>,
    events: EventHub,
    tombstone_retention_secs: u64,
}

impl Library {
    /// Opens the redb index named by `config` and starts its executor.
    /// Relative paths in `config` resolve against `config_path`'s directory.
    pub fn open(config: &LibraryConfig, config_path: &Path) -> Result<Self, LibraryError> {
        let root = resolve_music_root(config_path, &config.music_root)
            .ok_or(LibraryError::Unconfigured)?;
        let index_path = resolve_path(config_path, &config.index_path);
        let store = RedbStore::open(&index_path)?;
        info!("Opened index at {:?}", index_path);

        Self::with_parts(
            root,
            Box::new(store),
            Box::new(LoftyTagReader),
            Arc::new(WalkdirDiscovery {
                skip_hidden: config.skip_hidden,
            }),
            config,
        )
    }

    pub fn with_parts(
        root: PathBuf,
        store: Box<dyn Store>,
        reader: Box<dyn TagReader>,
        discovery: Arc<dyn FileDiscovery>,
        config: &LibraryConfig,
    ) -> Result<Self, LibraryError> {
        let executor = StoreExecutor::new(store, config.queue_depth);
        executor.start();
        let reader: SharedTagReader =
            Arc::new(CachingTagReader::new(reader, config.tag_cache_capacity));
        let events = EventHub::default();
        let indexer = Arc::new(LibraryIndexer::new(
            root.clone(),
            executor.clone(),
            Arc::clone(&reader),
            discovery,
            events.clone(),
        ));
        indexer.prepare()?;

        Ok(Self {
            root,
            executor,
            reader,
            indexer,
            events,
            tombstone_retention_secs: config.tombstone_retention_secs,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn executor(&self) -> &StoreExecutor {
        &self.executor
    }

    pub fn subscribe(&self) -> UnboundedReceiver<IndexEvent> {
        self.events.subscribe()
    }

    pub fn is_updating(&self) -> bool {
        self.indexer.is_updating()
    }

    /// Runs a reconciliation pass on the calling thread. A pass already in
    /// progress makes this fail with `AlreadyUpdating`.
    pub fn rescan(&self) -> Result<ScanSummary, LibraryError> {
        self.indexer.run_pass()
    }

    /// Runs a reconciliation pass on a new thread.
    pub fn spawn_rescan(
        &self,
    ) -> Result<JoinHandle<Result<ScanSummary, LibraryError>>, LibraryError> {
        let indexer = Arc::clone(&self.indexer);
        let handle = thread::Builder::new()
            .name("library-update".into())
            .spawn(move || indexer.run_pass())?;
        Ok(handle)
    }

    pub fn get_track(&self, id: TrackId) -> PendingResult<Option<TrackRecord>> {
        self.executor
            .submit_for_result(move |store| records::get_track(store, id))
    }

    pub fn track_id_for_path(&self, relpath: &str) -> PendingResult<Option<TrackId>> {
        let relpath = relpath.to_string();
        self.executor
            .submit_for_result(move |store| records::track_id_for_path(store, &relpath))
    }

    /// Live tracks in id order.
    pub fn list_tracks(&self, offset: usize, limit: usize) -> PendingResult<Vec<TrackRecord>> {
        self.executor
            .submit_for_result(move |store| records::list_tracks(store, offset, limit))
    }

    /// Counts one play of `id`. Resolves to the updated record, or `None` if
    /// the id is unknown.
    pub fn record_play(&self, id: TrackId) -> PendingResult<Option<TrackRecord>> {
        self.executor
            .submit_for_result(move |store| records::record_play(store, id))
    }

    pub fn get_custom(&self, key: &str) -> PendingResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.executor
            .submit_for_result(move |store| records::get_custom(store, &key))
    }

    /// An empty `value` removes the key.
    pub fn put_custom(&self, key: &str, value: Vec<u8>) -> PendingResult<()> {
        let key = key.to_string();
        self.executor
            .submit_for_result(move |store| records::put_custom(store, &key, &value))
    }

    pub fn stats(&self) -> PendingResult<IndexStats> {
        self.executor.submit_for_result(|store| records::stats(store))
    }

    /// The record for `id` together with its tags, read through the tag
    /// cache. Blocks on the store.
    pub fn get_track_tags(
        &self,
        id: TrackId,
    ) -> Result<Option<(TrackRecord, Arc<ParsedTags>)>, LibraryError> {
        let Some(record) = self.get_track(id).wait()? else {
            return Ok(None);
        };
        let tags = self
            .reader
            .read_tags(&join_relpath(&self.root, record.path()))?;
        Ok(Some((record, tags)))
    }

    /// Deletes records that have been tombstoned for longer than the
    /// configured retention, as of `now` (seconds since the epoch). Each
    /// deletion is its own store unit. Returns how many were removed.
    pub fn purge_tombstoned(&self, now: u64) -> Result<usize, LibraryError> {
        let cutoff = now.saturating_sub(self.tombstone_retention_secs);
        let ids = self
            .executor
            .submit_for_result(move |store| records::purge_candidates(store, cutoff))
            .wait()?;

        let mut removed = 0;
        for id in ids {
            let deleted = self
                .executor
                .submit_for_result(move |store| match records::get_track(store, id)? {
                    Some(record) if record.is_tombstoned() && record.tombstoned_at() <= cutoff => {
                        Ok(records::delete_track(store, id)?.is_some())
                    }
                    _ => Ok(false),
                })
                .wait()?;
            if deleted {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Purged {} tombstoned tracks", removed);
        }
        Ok(removed)
    }

    /// Opens a browsing iterator over `relpath` below the music root.
    pub fn browse(&self, relpath: &str, show_hidden: bool) -> Result<DirIterator, LibraryError> {
        Ok(DirIterator::new(&join_relpath(&self.root, relpath), show_hidden)?)
    }

    /// Drains and stops the store executor. Store accessors fail with
    /// `NotRunning` afterwards.
    pub fn shutdown(&self) {
        self.executor.stop();
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Store(StoreError),
    Config(ConfigError),
    Tag(TagError),
    Discovery(DiscoveryError),
    /// Two live records claimed the same identity. The pass was abandoned.
    IdentityConflict(String),
    AlreadyUpdating,
    /// No music root is configured.
    Unconfigured,
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Store(err) => write!(f, "store error: {}", err),
            LibraryError::Config(err) => write!(f, "config error: {}", err),
            LibraryError::Tag(err) => write!(f, "tag error: {}", err),
            LibraryError::Discovery(err) => write!(f, "discovery error: {}", err),
            LibraryError::IdentityConflict(value) => write!(f, "identity conflict: {}", value),
            LibraryError::AlreadyUpdating => write!(f, "a library update is already running"),
            LibraryError::Unconfigured => write!(f, "music_root is not configured"),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<StoreError> for LibraryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::IdentityConflict(value) => LibraryError::IdentityConflict(value),
            other => LibraryError::Store(other),
        }
    }
}

impl From<ConfigError> for LibraryError {
    fn from(err: ConfigError) -> Self {
        LibraryError::Config(err)
    }
}

impl From<TagError> for LibraryError {
    fn from(err: TagError) -> Self {
        LibraryError::Tag(err)
    }
}

impl From<DiscoveryError> for LibraryError {
    fn from(err: DiscoveryError) -> Self {
        LibraryError::Discovery(err)
    }
}
