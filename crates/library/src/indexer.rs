use std::fs;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use common::{join_relpath, TrackId};
use metadata::{CachingTagReader, TagReader};
use tracing::{debug, info, warn};

use crate::discovery::{modified_secs, DiscoveredEntry, DiscoveryError, FileDiscovery};
use crate::events::{EventHub, IndexEvent, ScanSummary, Stage, UpdateOutcome};
use crate::executor::StoreExecutor;
use crate::records::{self, Admission};
use crate::store::{Store, StoreError};
use crate::{now_secs, LibraryError};

pub type SharedTagReader = Arc<CachingTagReader<Box<dyn TagReader>>>;

/// Brings the stored index in line with the files under `root`.
///
/// A pass first verifies every live record against its file, then walks the
/// tree for files the index does not know yet. Every record write is its own
/// unit on the store executor, so whatever a pass committed before failing
/// stays committed.
pub struct LibraryIndexer {
    root: PathBuf,
    executor: StoreExecutor,
    reader: SharedTagReader,
    discovery: Arc<dyn FileDiscovery>,
    events: EventHub,
    next_id: Arc<AtomicU32>,
    updating: AtomicBool,
}

impl LibraryIndexer {
    pub fn new(
        root: PathBuf,
        executor: StoreExecutor,
        reader: SharedTagReader,
        discovery: Arc<dyn FileDiscovery>,
        events: EventHub,
    ) -> Self {
        Self {
            root,
            executor,
            reader,
            discovery,
            events,
            next_id: Arc::new(AtomicU32::new(1)),
            updating: AtomicBool::new(false),
        }
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    /// Checks the index version and loads the next free track id. Ids only
    /// ever move forward, even if the index was cleared.
    pub fn prepare(&self) -> Result<(), LibraryError> {
        let (cleared, next) = self
            .executor
            .submit_for_result(|store| {
                let cleared = records::ensure_version(store)?;
                let next = records::next_track_id(store)?;
                Ok((cleared, next))
            })
            .wait()?;
        if cleared {
            debug!("Index namespaces reset");
        }
        self.next_id.fetch_max(next, Ordering::SeqCst);
        Ok(())
    }

    /// Runs one reconciliation pass on the calling thread.
    ///
    /// Exactly one `UpdateFinished` event is emitted for every pass that
    /// starts, whether it completes or fails.
    pub fn run_pass(&self) -> Result<ScanSummary, LibraryError> {
        if self
            .updating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LibraryError::AlreadyUpdating);
        }
        let _guard = UpdatingGuard(&self.updating);

        info!("Library update started for {}", self.root.display());
        self.events.emit(IndexEvent::UpdateStarted);
        let started = Instant::now();

        let mut pass = Pass::new(self);
        let result = pass.run();
        pass.enter(Stage::Idle);

        match &result {
            Ok(summary) => {
                info!(
                    "Library update finished in {:.2?}: {} verified, {} updated, {} tombstoned, {} added, {} exhumed, {} skipped",
                    started.elapsed(),
                    summary.verified,
                    summary.updated,
                    summary.tombstoned,
                    summary.added,
                    summary.exhumed,
                    summary.skipped
                );
                self.events
                    .emit(IndexEvent::UpdateFinished(UpdateOutcome::Completed(*summary)));
            }
            Err(err) => {
                warn!("Library update failed: {}", err);
                self.events
                    .emit(IndexEvent::UpdateFinished(UpdateOutcome::Failed(err.to_string())));
            }
        }
        result
    }

    fn call<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Store) -> Result<T, StoreError> + Send + 'static,
    {
        self.executor.submit_for_result(work).wait()
    }
}

struct UpdatingGuard<'a>(&'a AtomicBool);

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Pass<'a> {
    indexer: &'a LibraryIndexer,
    stage: Stage,
    processed: u64,
    skipped: u64,
    summary: ScanSummary,
}

impl<'a> Pass<'a> {
    fn new(indexer: &'a LibraryIndexer) -> Self {
        Self {
            indexer,
            stage: Stage::Idle,
            processed: 0,
            skipped: 0,
            summary: ScanSummary::default(),
        }
    }

    fn run(&mut self) -> Result<ScanSummary, LibraryError> {
        // An unmounted or missing root must not tombstone the whole library.
        let root = &self.indexer.root;
        let meta = fs::metadata(root).map_err(|source| DiscoveryError::Io {
            path: root.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(DiscoveryError::NotADirectory(root.clone()).into());
        }

        self.indexer.prepare()?;
        self.verify_existing()?;
        self.scan_for_new()?;
        Ok(self.summary)
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.report();
    }

    fn step(&mut self) {
        self.processed += 1;
        self.report();
    }

    fn skip(&mut self) {
        self.skipped += 1;
        self.summary.skipped += 1;
    }

    fn report(&self) {
        self.indexer.events.emit(IndexEvent::UpdateProgress {
            stage: self.stage,
            processed: self.processed,
            skipped: self.skipped,
        });
    }

    /// Fatal store errors end the pass; anything else costs one item.
    fn absorb(&mut self, context: &str, err: StoreError) -> Result<(), LibraryError> {
        if err.is_fatal() {
            return Err(err.into());
        }
        warn!("Skipping {}: {}", context, err);
        self.skip();
        Ok(())
    }

    fn verify_existing(&mut self) -> Result<(), LibraryError> {
        self.enter(Stage::VerifyingExistingTracks);
        let ids = self.indexer.call(|store| records::list_track_ids(store))?;
        for id in ids {
            self.verify_one(id)?;
            self.step();
        }
        Ok(())
    }

    fn verify_one(&mut self, id: TrackId) -> Result<(), LibraryError> {
        let record = match self.indexer.call(move |store| records::get_track(store, id)) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(err @ (StoreError::Bincode(_) | StoreError::Malformed(_))) => {
                warn!("Dropping malformed record {}: {}", id, err);
                if let Err(err) = self
                    .indexer
                    .call(move |store| records::drop_record_entry(store, id))
                {
                    return self.absorb("malformed record", err);
                }
                self.skip();
                return Ok(());
            }
            Err(err) => return self.absorb(&format!("record {}", id), err),
        };
        if record.is_tombstoned() {
            return Ok(());
        }
        self.summary.verified += 1;

        let path = join_relpath(&self.indexer.root, record.path());
        let modified_at = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => modified_secs(&meta),
            _ => {
                info!("Tombstoning track {}: {} is gone", id, record.path());
                self.indexer.reader.forget(&path);
                return self.tombstone(id);
            }
        };
        if modified_at == record.modified_at() {
            return Ok(());
        }

        let tags = match self.indexer.reader.read_fresh(&path) {
            Ok(tags) => tags,
            Err(err) => {
                info!(
                    "Tombstoning track {}: {} no longer reads ({})",
                    id,
                    record.path(),
                    err
                );
                return self.tombstone(id);
            }
        };

        let fingerprint = tags.fingerprint();
        let changed = fingerprint != record.fingerprint();
        if changed {
            debug!(
                "Fingerprint of track {} changed ({:016x} -> {:016x})",
                id,
                record.fingerprint(),
                fingerprint
            );
        }
        let result = self.indexer.call(move |store| {
            let Some(current) = records::get_track(store, id)? else {
                return Ok(());
            };
            if current.is_tombstoned() {
                return Ok(());
            }
            let next = if changed {
                current.with_fingerprint(fingerprint, modified_at)
            } else {
                current.with_modified_at(modified_at)
            };
            records::put_track(store, &next)
        });
        match result {
            Ok(()) => {
                if changed {
                    self.summary.updated += 1;
                }
                Ok(())
            }
            Err(err) => self.absorb(&format!("record {}", id), err),
        }
    }

    fn tombstone(&mut self, id: TrackId) -> Result<(), LibraryError> {
        let now = now_secs();
        let result = self.indexer.call(move |store| {
            match records::get_track(store, id)? {
                Some(current) if !current.is_tombstoned() => {
                    records::put_track(store, &current.tombstone(now))?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        });
        match result {
            Ok(true) => {
                self.summary.tombstoned += 1;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(err) => self.absorb(&format!("record {}", id), err),
        }
    }

    fn scan_for_new(&mut self) -> Result<(), LibraryError> {
        self.enter(Stage::ScanningForNewTracks);
        let indexer = self.indexer;
        let mut failure = None;

        let report = indexer.discovery.find_files(&indexer.root, &mut |entry| {
            if entry.is_dir {
                return ControlFlow::Continue(());
            }
            match self.scan_one(entry) {
                Ok(()) => {
                    self.step();
                    ControlFlow::Continue(())
                }
                Err(err) => {
                    failure = Some(err);
                    ControlFlow::Break(())
                }
            }
        })?;

        if let Some(err) = failure {
            return Err(err);
        }
        for _ in &report.errors {
            self.skip();
        }
        Ok(())
    }

    fn scan_one(&mut self, entry: &DiscoveredEntry) -> Result<(), LibraryError> {
        let relpath = entry.relpath.clone();
        let known = {
            let relpath = relpath.clone();
            self.indexer
                .call(move |store| records::track_id_for_path(store, &relpath))
        };
        match known {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {}
            Err(err) => return self.absorb(&relpath, err),
        }

        let tags = match self.indexer.reader.read_tags(&entry.path) {
            Ok(tags) => tags,
            Err(err) => {
                debug!("Skipping {}: {}", relpath, err);
                self.skip();
                return Ok(());
            }
        };

        let fingerprint = tags.fingerprint();
        let modified_at = entry.modified_at;
        let next_id = Arc::clone(&self.indexer.next_id);
        let admitted = {
            let relpath = relpath.clone();
            self.indexer.call(move |store| {
                records::admit_track(store, &relpath, fingerprint, modified_at, &next_id)
            })
        };
        match admitted {
            Ok(Admission::Added(id)) => {
                debug!("Indexed {} as track {}", relpath, id);
                self.summary.added += 1;
                Ok(())
            }
            Ok(Admission::Exhumed(_)) => {
                self.summary.exhumed += 1;
                Ok(())
            }
            Ok(Admission::AlreadyKnown(_)) => Ok(()),
            Err(err) => self.absorb(&relpath, err),
        }
    }
}
