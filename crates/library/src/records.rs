use std::sync::atomic::{AtomicU32, Ordering};

use common::{TrackId, TrackRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::{Store, StoreError};

pub const INDEX_VERSION: u32 = 1;
const KEY_SEP: char = '\x1f';

const RECORD_PREFIX: &str = "D";
const PATH_PREFIX: &str = "P";
const HASH_PREFIX: &str = "H";
const META_PREFIX: &str = "M";
const CUSTOM_PREFIX: &str = "C";

const META_VERSION_KEY: &str = "version";
const META_NEXT_ID_KEY: &str = "next_id";

/// Counts over every record in the index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub live: u32,
    pub tombstoned: u32,
    pub total_plays: u64,
}

/// What happened when a discovered file was offered to the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The path already belongs to a live record.
    AlreadyKnown(TrackId),
    /// A tombstoned record with the same fingerprint was revived at this path.
    Exhumed(TrackId),
    /// A new record was created.
    Added(TrackId),
}

pub fn record_key(id: TrackId) -> String {
    let mut out = prefix_key(RECORD_PREFIX);
    out.push_str(&format!("{:010}", id));
    out
}

fn path_key(path: &str) -> String {
    let mut out = prefix_key(PATH_PREFIX);
    out.push_str(path);
    out
}

fn hash_prefix(fingerprint: u64) -> String {
    let mut out = prefix_key(HASH_PREFIX);
    out.push_str(&format!("{:016x}", fingerprint));
    out.push(KEY_SEP);
    out
}

fn hash_key(fingerprint: u64, id: TrackId) -> String {
    let mut out = hash_prefix(fingerprint);
    out.push_str(&format!("{:010}", id));
    out
}

fn meta_key(name: &str) -> String {
    let mut out = prefix_key(META_PREFIX);
    out.push_str(name);
    out
}

fn custom_key(name: &str) -> String {
    let mut out = prefix_key(CUSTOM_PREFIX);
    out.push_str(name);
    out
}

fn prefix_key(prefix: &str) -> String {
    let mut out = String::new();
    out.push_str(prefix);
    out.push(KEY_SEP);
    out
}

fn trailing_id(key: &str) -> Result<TrackId, StoreError> {
    let (_, id) = split_key_last(key)?;
    id.parse::<TrackId>()
        .map_err(|_| StoreError::Malformed(key.to_string()))
}

fn split_key_last(value: &str) -> Result<(&str, &str), StoreError> {
    let idx = value
        .rfind(KEY_SEP)
        .ok_or_else(|| StoreError::Malformed(value.to_string()))?;
    let next = idx + KEY_SEP.len_utf8();
    Ok((&value[..idx], &value[next..]))
}

pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn get_track(store: &dyn Store, id: TrackId) -> Result<Option<TrackRecord>, StoreError> {
    match store.get(&record_key(id))? {
        Some(bytes) => Ok(Some(decode_value(&bytes)?)),
        None => Ok(None),
    }
}

/// The live record currently at `path`. Index entries that point at a
/// missing, moved or tombstoned record are ignored.
pub fn live_track_at_path(
    store: &dyn Store,
    path: &str,
) -> Result<Option<TrackRecord>, StoreError> {
    let Some(bytes) = store.get(&path_key(path))? else {
        return Ok(None);
    };
    let id: TrackId = decode_value(&bytes)?;
    match get_track(store, id)? {
        Some(record) if !record.is_tombstoned() && record.path() == path => Ok(Some(record)),
        _ => Ok(None),
    }
}

pub fn track_id_for_path(store: &dyn Store, path: &str) -> Result<Option<TrackId>, StoreError> {
    Ok(live_track_at_path(store, path)?.map(|record| record.id()))
}

/// Every record carrying `fingerprint`, live or tombstoned, in id order.
/// Index entries whose record is gone or has moved on to another
/// fingerprint are ignored.
pub fn tracks_for_fingerprint(
    store: &dyn Store,
    fingerprint: u64,
) -> Result<Vec<TrackRecord>, StoreError> {
    let mut ids = Vec::new();
    store.scan_prefix(&hash_prefix(fingerprint), &mut |key, _| {
        match trailing_id(key) {
            Ok(id) => ids.push(id),
            Err(err) => warn!("Skipping fingerprint key: {}", err),
        }
        true
    })?;

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        match get_track(store, id)? {
            Some(record) if record.fingerprint() == fingerprint => out.push(record),
            _ => {}
        }
    }
    Ok(out)
}

/// Writes `record` and keeps the path and fingerprint indexes in step.
///
/// A live record owns its path; finding another live record already there
/// is an identity conflict and nothing is written. The fingerprint index
/// holds one entry per record, so tracks sharing tags all stay reachable
/// for exhuming.
pub fn put_track(store: &mut dyn Store, record: &TrackRecord) -> Result<(), StoreError> {
    let previous = get_track(store, record.id())?;

    if !record.is_tombstoned() {
        if let Some(owner) = live_track_at_path(store, record.path())? {
            if owner.id() != record.id() {
                return Err(StoreError::IdentityConflict(format!(
                    "{} is held by track {}, refusing track {}",
                    record.path(),
                    owner.id(),
                    record.id()
                )));
            }
        }
    }

    store.put(&record_key(record.id()), &encode_value(record)?)?;

    if let Some(previous) = &previous {
        if previous.path() != record.path() {
            release_path(store, previous.path(), record.id())?;
        }
        if previous.fingerprint() != record.fingerprint() {
            store.delete(&hash_key(previous.fingerprint(), record.id()))?;
        }
    }

    if record.is_tombstoned() {
        release_path(store, record.path(), record.id())?;
    } else {
        store.put(&path_key(record.path()), &encode_value(&record.id())?)?;
    }

    store.put(
        &hash_key(record.fingerprint(), record.id()),
        &encode_value(&record.id())?,
    )?;
    Ok(())
}

fn release_path(store: &mut dyn Store, path: &str, id: TrackId) -> Result<(), StoreError> {
    let key = path_key(path);
    if let Some(bytes) = store.get(&key)? {
        if decode_value::<TrackId>(&bytes).ok() == Some(id) {
            store.delete(&key)?;
        }
    }
    Ok(())
}

/// Persists a record under an id that must not be in use yet.
pub fn insert_new_track(store: &mut dyn Store, record: &TrackRecord) -> Result<(), StoreError> {
    if store.get(&record_key(record.id()))?.is_some() {
        return Err(StoreError::IdentityConflict(format!(
            "track id {} is already taken",
            record.id()
        )));
    }
    put_track(store, record)
}

/// Removes a record and its index entries. Returns the removed record.
pub fn delete_track(store: &mut dyn Store, id: TrackId) -> Result<Option<TrackRecord>, StoreError> {
    let Some(record) = get_track(store, id)? else {
        return Ok(None);
    };
    raise_id_floor(store, id)?;
    store.delete(&record_key(id))?;
    release_path(store, record.path(), id)?;
    store.delete(&hash_key(record.fingerprint(), id))?;
    Ok(Some(record))
}

/// Drops the raw record entry without decoding it. Index entries that still
/// point at it are treated as absent by every lookup.
pub fn drop_record_entry(store: &mut dyn Store, id: TrackId) -> Result<bool, StoreError> {
    raise_id_floor(store, id)?;
    store.delete(&record_key(id))
}

/// Ids of every stored record, live or tombstoned, ascending.
pub fn list_track_ids(store: &dyn Store) -> Result<Vec<TrackId>, StoreError> {
    let mut ids = Vec::new();
    store.scan_prefix(&prefix_key(RECORD_PREFIX), &mut |key, _| {
        match trailing_id(key) {
            Ok(id) => ids.push(id),
            Err(err) => warn!("Skipping record key: {}", err),
        }
        true
    })?;
    Ok(ids)
}

/// A page of live records in id order.
pub fn list_tracks(
    store: &dyn Store,
    offset: usize,
    limit: usize,
) -> Result<Vec<TrackRecord>, StoreError> {
    let mut out = Vec::new();
    let mut skipped = 0usize;
    if limit == 0 {
        return Ok(out);
    }
    store.scan_prefix(&prefix_key(RECORD_PREFIX), &mut |key, value| {
        let record: TrackRecord = match decode_value(value) {
            Ok(record) => record,
            Err(err) => {
                debug!("Skipping undecodable record {:?}: {}", key, err);
                return true;
            }
        };
        if record.is_tombstoned() {
            return true;
        }
        if skipped < offset {
            skipped += 1;
            return true;
        }
        out.push(record);
        out.len() < limit
    })?;
    Ok(out)
}

/// The id after the highest one ever stored, or 1 for an empty index.
///
/// Deleted records leave a floor behind in the meta namespace, so removing
/// the newest record does not make its id available again.
pub fn next_track_id(store: &dyn Store) -> Result<TrackId, StoreError> {
    let from_records = match store.last_with_prefix(&prefix_key(RECORD_PREFIX))? {
        Some((key, _)) => {
            let last = trailing_id(&key)?;
            last.checked_add(1).ok_or_else(|| {
                StoreError::Malformed(format!("track id space exhausted at {}", last))
            })?
        }
        None => 1,
    };
    let floor = match store.get(&meta_key(META_NEXT_ID_KEY))? {
        Some(bytes) => decode_value::<TrackId>(&bytes)?,
        None => 1,
    };
    Ok(from_records.max(floor))
}

fn raise_id_floor(store: &mut dyn Store, removed: TrackId) -> Result<(), StoreError> {
    let next = removed.saturating_add(1);
    let key = meta_key(META_NEXT_ID_KEY);
    let current = match store.get(&key)? {
        Some(bytes) => decode_value::<TrackId>(&bytes).unwrap_or(1),
        None => 1,
    };
    if next > current {
        store.put(&key, &encode_value(&next)?)?;
    }
    Ok(())
}

pub fn read_version(store: &dyn Store) -> Result<Option<u32>, StoreError> {
    match store.get(&meta_key(META_VERSION_KEY))? {
        Some(bytes) => Ok(Some(decode_value(&bytes)?)),
        None => Ok(None),
    }
}

/// Makes sure the index was written by this version of the code. An index
/// from another version has its record namespaces cleared; custom values
/// are kept. Returns whether anything was cleared.
pub fn ensure_version(store: &mut dyn Store) -> Result<bool, StoreError> {
    match read_version(store)? {
        Some(version) if version == INDEX_VERSION => return Ok(false),
        Some(version) => {
            warn!("Index version mismatch ({}); clearing records", version);
            clear_index(store)?;
        }
        None => {
            info!("Initialising empty index");
            clear_index(store)?;
        }
    }
    store.put(&meta_key(META_VERSION_KEY), &encode_value(&INDEX_VERSION)?)?;
    Ok(true)
}

fn clear_index(store: &mut dyn Store) -> Result<(), StoreError> {
    let next = next_track_id(store)?;
    if next > 1 {
        raise_id_floor(store, next - 1)?;
    }
    for prefix in [RECORD_PREFIX, PATH_PREFIX, HASH_PREFIX] {
        let mut keys = Vec::new();
        store.scan_prefix(&prefix_key(prefix), &mut |key, _| {
            keys.push(key.to_string());
            true
        })?;
        for key in keys {
            store.delete(&key)?;
        }
    }
    Ok(())
}

pub fn get_custom(store: &dyn Store, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
    store.get(&custom_key(name))
}

/// Stores a custom value. An empty value deletes the entry.
pub fn put_custom(store: &mut dyn Store, name: &str, value: &[u8]) -> Result<(), StoreError> {
    if value.is_empty() {
        store.delete(&custom_key(name))?;
    } else {
        store.put(&custom_key(name), value)?;
    }
    Ok(())
}

pub fn stats(store: &dyn Store) -> Result<IndexStats, StoreError> {
    let mut stats = IndexStats::default();
    store.scan_prefix(&prefix_key(RECORD_PREFIX), &mut |_, value| {
        if let Ok(record) = decode_value::<TrackRecord>(value) {
            if record.is_tombstoned() {
                stats.tombstoned += 1;
            } else {
                stats.live += 1;
            }
            stats.total_plays += u64::from(record.play_count());
        }
        true
    })?;
    Ok(stats)
}

pub fn record_play(store: &mut dyn Store, id: TrackId) -> Result<Option<TrackRecord>, StoreError> {
    let Some(record) = get_track(store, id)? else {
        return Ok(None);
    };
    let played = record.with_play_recorded();
    put_track(store, &played)?;
    Ok(Some(played))
}

/// Offers a discovered playable file to the index.
///
/// Runs as one unit on the store worker so the path lookup, the exhume
/// lookup and the write cannot interleave with other work. Ids come from
/// `next_id`, which only this worker advances.
pub fn admit_track(
    store: &mut dyn Store,
    path: &str,
    fingerprint: u64,
    modified_at: u64,
    next_id: &AtomicU32,
) -> Result<Admission, StoreError> {
    if let Some(record) = live_track_at_path(store, path)? {
        return Ok(Admission::AlreadyKnown(record.id()));
    }

    // A tombstoned match that used to live at this very path wins, then the
    // lowest tombstoned id. Live matches are duplicate copies.
    let candidates = tracks_for_fingerprint(store, fingerprint)?;
    let buried = candidates
        .iter()
        .filter(|record| record.is_tombstoned())
        .min_by_key(|record| (record.path() != path, record.id()));
    if let Some(candidate) = buried {
        let revived = candidate.exhume(path, modified_at);
        put_track(store, &revived)?;
        info!(
            "Exhumed track {} at {} (was {})",
            revived.id(),
            path,
            candidate.path()
        );
        return Ok(Admission::Exhumed(revived.id()));
    }
    if let Some(duplicate) = candidates.first() {
        debug!(
            "{} duplicates live track {} at {}",
            path,
            duplicate.id(),
            duplicate.path()
        );
    }

    let id = next_id.fetch_add(1, Ordering::SeqCst);
    if id == 0 {
        return Err(StoreError::Malformed("track id space exhausted".to_string()));
    }
    insert_new_track(store, &TrackRecord::new(id, path, fingerprint, modified_at))?;
    debug!("Added track {} at {}", id, path);
    Ok(Admission::Added(id))
}

/// Ids of records tombstoned at or before `cutoff`.
pub fn purge_candidates(store: &dyn Store, cutoff: u64) -> Result<Vec<TrackId>, StoreError> {
    let mut ids = Vec::new();
    store.scan_prefix(&prefix_key(RECORD_PREFIX), &mut |_, value| {
        if let Ok(record) = decode_value::<TrackRecord>(value) {
            if record.is_tombstoned() && record.tombstoned_at() <= cutoff {
                ids.push(record.id());
            }
        }
        true
    })?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store_with(records: &[TrackRecord]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for record in records {
            put_track(&mut store, record).unwrap();
        }
        store
    }

    #[test]
    fn record_keys_sort_numerically() {
        assert!(record_key(9) < record_key(10));
        assert_eq!(trailing_id(&record_key(42)).unwrap(), 42);
        assert!(trailing_id("D-nonsense").is_err());
    }

    #[test]
    fn path_index_follows_live_records() {
        let live = TrackRecord::new(1, "a.mp3", 10, 0);
        let mut store = store_with(&[live.clone()]);
        assert_eq!(track_id_for_path(&store, "a.mp3").unwrap(), Some(1));

        put_track(&mut store, &live.tombstone(5)).unwrap();
        assert_eq!(track_id_for_path(&store, "a.mp3").unwrap(), None);
        assert!(get_track(&store, 1).unwrap().unwrap().is_tombstoned());
    }

    #[test]
    fn second_live_record_at_same_path_is_a_conflict() {
        let mut store = store_with(&[TrackRecord::new(1, "a.mp3", 10, 0)]);
        let err = put_track(&mut store, &TrackRecord::new(2, "a.mp3", 11, 0)).unwrap_err();
        assert!(matches!(err, StoreError::IdentityConflict(_)));
        assert!(get_track(&store, 2).unwrap().is_none());
    }

    #[test]
    fn insert_refuses_taken_id() {
        let mut store = store_with(&[TrackRecord::new(1, "a.mp3", 10, 0)]);
        let err = insert_new_track(&mut store, &TrackRecord::new(1, "b.mp3", 11, 0)).unwrap_err();
        assert!(matches!(err, StoreError::IdentityConflict(_)));
    }

    #[test]
    fn fingerprint_change_moves_hash_entry() {
        let original = TrackRecord::new(1, "a.mp3", 10, 0);
        let mut store = store_with(&[original.clone()]);
        put_track(&mut store, &original.with_fingerprint(20, 1)).unwrap();

        assert!(tracks_for_fingerprint(&store, 10).unwrap().is_empty());
        assert!(store.get(&hash_key(10, 1)).unwrap().is_none());
        let ids: Vec<TrackId> = tracks_for_fingerprint(&store, 20)
            .unwrap()
            .iter()
            .map(|record| record.id())
            .collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn admit_adds_then_recognises_path() {
        let mut store = MemoryStore::new();
        let next = AtomicU32::new(1);
        assert_eq!(
            admit_track(&mut store, "a.mp3", 10, 0, &next).unwrap(),
            Admission::Added(1)
        );
        assert_eq!(
            admit_track(&mut store, "a.mp3", 10, 0, &next).unwrap(),
            Admission::AlreadyKnown(1)
        );
        assert_eq!(next.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn admit_exhumes_tombstoned_match() {
        let buried = TrackRecord::new(4, "old/a.mp3", 10, 0)
            .with_play_recorded()
            .tombstone(50);
        let mut store = store_with(&[buried]);
        let next = AtomicU32::new(5);

        let admission = admit_track(&mut store, "new/a.mp3", 10, 60, &next).unwrap();
        assert_eq!(admission, Admission::Exhumed(4));

        let revived = get_track(&store, 4).unwrap().unwrap();
        assert!(!revived.is_tombstoned());
        assert_eq!(revived.path(), "new/a.mp3");
        assert_eq!(revived.play_count(), 1);
        assert_eq!(track_id_for_path(&store, "new/a.mp3").unwrap(), Some(4));
        assert_eq!(next.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn live_duplicate_gets_fresh_id() {
        let mut store = store_with(&[TrackRecord::new(1, "a.mp3", 10, 0)]);
        let next = AtomicU32::new(2);
        assert_eq!(
            admit_track(&mut store, "copy/a.mp3", 10, 0, &next).unwrap(),
            Admission::Added(2)
        );
        assert_eq!(tracks_for_fingerprint(&store, 10).unwrap().len(), 2);
    }

    #[test]
    fn tracks_sharing_tags_are_all_exhumed_at_their_own_paths() {
        let a = TrackRecord::new(2, "a/song.mp3", 10, 0).with_play_recorded();
        let b = TrackRecord::new(1, "b/song.mp3", 10, 0);
        let mut store = store_with(&[a.clone(), b.clone()]);
        put_track(&mut store, &b.tombstone(5)).unwrap();
        put_track(&mut store, &a.tombstone(6)).unwrap();
        let next = AtomicU32::new(3);

        assert_eq!(
            admit_track(&mut store, "a/song.mp3", 10, 7, &next).unwrap(),
            Admission::Exhumed(2)
        );
        assert_eq!(
            admit_track(&mut store, "b/song.mp3", 10, 7, &next).unwrap(),
            Admission::Exhumed(1)
        );
        assert_eq!(next.load(Ordering::SeqCst), 3);
        assert_eq!(get_track(&store, 2).unwrap().unwrap().play_count(), 1);
        assert!(tracks_for_fingerprint(&store, 10)
            .unwrap()
            .iter()
            .all(|record| !record.is_tombstoned()));
    }

    #[test]
    fn moved_file_exhumes_lowest_tombstoned_match() {
        let mut store = store_with(&[
            TrackRecord::new(5, "x.mp3", 10, 0).tombstone(1),
            TrackRecord::new(3, "y.mp3", 10, 0).tombstone(1),
            TrackRecord::new(4, "z.mp3", 10, 0),
        ]);
        let next = AtomicU32::new(6);
        assert_eq!(
            admit_track(&mut store, "moved/x.mp3", 10, 2, &next).unwrap(),
            Admission::Exhumed(3)
        );
    }

    #[test]
    fn next_id_follows_highest_record() {
        let mut store = MemoryStore::new();
        assert_eq!(next_track_id(&store).unwrap(), 1);
        put_track(&mut store, &TrackRecord::new(7, "a.mp3", 1, 0)).unwrap();
        put_track(&mut store, &TrackRecord::new(3, "b.mp3", 2, 0)).unwrap();
        assert_eq!(next_track_id(&store).unwrap(), 8);
    }

    #[test]
    fn deleting_newest_record_keeps_its_id_retired() {
        let mut store = store_with(&[
            TrackRecord::new(1, "a.mp3", 1, 0),
            TrackRecord::new(2, "b.mp3", 2, 0),
        ]);
        delete_track(&mut store, 2).unwrap();
        assert_eq!(next_track_id(&store).unwrap(), 3);

        drop_record_entry(&mut store, 1).unwrap();
        assert_eq!(next_track_id(&store).unwrap(), 3);
    }

    #[test]
    fn version_mismatch_clears_records_but_not_custom_values() {
        let mut store = store_with(&[TrackRecord::new(1, "a.mp3", 10, 0)]);
        put_custom(&mut store, "volume", b"7").unwrap();

        assert!(ensure_version(&mut store).unwrap());
        assert!(!ensure_version(&mut store).unwrap());
        assert!(list_track_ids(&store).unwrap().is_empty());
        assert!(store.get(&hash_key(10, 1)).unwrap().is_none());
        assert_eq!(get_custom(&store, "volume").unwrap(), Some(b"7".to_vec()));
        assert_eq!(read_version(&store).unwrap(), Some(INDEX_VERSION));
        assert_eq!(next_track_id(&store).unwrap(), 2);
    }

    #[test]
    fn empty_custom_value_deletes() {
        let mut store = MemoryStore::new();
        put_custom(&mut store, "k", b"v").unwrap();
        put_custom(&mut store, "k", b"").unwrap();
        assert_eq!(get_custom(&store, "k").unwrap(), None);
    }

    #[test]
    fn list_tracks_pages_over_live_records() {
        let mut store = store_with(&[
            TrackRecord::new(1, "a.mp3", 1, 0),
            TrackRecord::new(2, "b.mp3", 2, 0).tombstone(1),
            TrackRecord::new(3, "c.mp3", 3, 0),
            TrackRecord::new(4, "d.mp3", 4, 0),
        ]);
        store.put(&record_key(5), b"garbage").unwrap();

        let page: Vec<TrackId> = list_tracks(&store, 1, 2)
            .unwrap()
            .iter()
            .map(|record| record.id())
            .collect();
        assert_eq!(page, vec![3, 4]);
        assert!(list_tracks(&store, 0, 0).unwrap().is_empty());
        assert_eq!(list_track_ids(&store).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn stats_and_purge_candidates() {
        let store = store_with(&[
            TrackRecord::new(1, "a.mp3", 1, 0).with_play_recorded(),
            TrackRecord::new(2, "b.mp3", 2, 0).tombstone(100),
            TrackRecord::new(3, "c.mp3", 3, 0).tombstone(300),
        ]);
        let stats = stats(&store).unwrap();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.tombstoned, 2);
        assert_eq!(stats.total_plays, 1);

        assert_eq!(purge_candidates(&store, 200).unwrap(), vec![2]);
    }

    #[test]
    fn delete_removes_index_entries() {
        let mut store = store_with(&[TrackRecord::new(1, "a.mp3", 10, 0)]);
        assert!(delete_track(&mut store, 1).unwrap().is_some());
        assert!(delete_track(&mut store, 1).unwrap().is_none());
        assert_eq!(track_id_for_path(&store, "a.mp3").unwrap(), None);
        assert!(store.get(&hash_key(10, 1)).unwrap().is_none());
    }

    #[test]
    fn record_play_increments_count() {
        let mut store = store_with(&[TrackRecord::new(1, "a.mp3", 10, 0)]);
        record_play(&mut store, 1).unwrap();
        let played = record_play(&mut store, 1).unwrap().unwrap();
        assert_eq!(played.play_count(), 2);
        assert!(record_play(&mut store, 99).unwrap().is_none());
    }
}
