use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod fingerprint;
mod lru;

pub use fingerprint::{fingerprint, Fingerprinter};
pub use lru::BoundedLruCache;

/// Identity of an indexed track. Assigned once and never handed to another file.
pub type TrackId = u32;

/// Audio encodings the indexer knows how to hand to a decoder.
///
/// Persisted as part of cached tag data only, never inside a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Unsupported,
    Mp3,
    Wav,
    Ogg,
    Opus,
    Flac,
}

impl Encoding {
    pub fn from_path(path: &Path) -> Encoding {
        let ext = match path.extension() {
            Some(ext) => ext.to_string_lossy().to_ascii_lowercase(),
            None => return Encoding::Unsupported,
        };
        match ext.as_str() {
            "mp3" => Encoding::Mp3,
            "wav" => Encoding::Wav,
            "ogg" | "oga" => Encoding::Ogg,
            "opus" => Encoding::Opus,
            "flac" => Encoding::Flac,
            _ => Encoding::Unsupported,
        }
    }

    pub fn is_playable(self) -> bool {
        self != Encoding::Unsupported
    }
}

/// Tags extracted from one file. Transient: only the fingerprint of these
/// fields is ever persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedTags {
    pub encoding: Encoding,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub file_size: u64,
}

impl ParsedTags {
    pub fn fingerprint(&self) -> u64 {
        fingerprint(self)
    }
}

/// Durable record of one indexed track.
///
/// Values are never edited in place: every change goes through one of the
/// `with_*`/`tombstone`/`exhume` methods, which return a new record. Anyone
/// still holding the old value keeps a consistent snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    id: TrackId,
    path: String,
    fingerprint: u64,
    play_count: u32,
    tombstoned: bool,
    modified_at: u64,
    tombstoned_at: u64,
}

impl TrackRecord {
    /// A freshly discovered track: no plays, not tombstoned.
    pub fn new(id: TrackId, path: impl Into<String>, fingerprint: u64, modified_at: u64) -> Self {
        Self {
            id,
            path: path.into(),
            fingerprint,
            play_count: 0,
            tombstoned: false,
            modified_at,
            tombstoned_at: 0,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn play_count(&self) -> u32 {
        self.play_count
    }

    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned
    }

    /// Seconds since the epoch of the file's last modification, as of the
    /// last time its tags were read.
    pub fn modified_at(&self) -> u64 {
        self.modified_at
    }

    /// When the record was tombstoned, in seconds since the epoch. Zero for
    /// live records.
    pub fn tombstoned_at(&self) -> u64 {
        self.tombstoned_at
    }

    pub fn with_fingerprint(&self, fingerprint: u64, modified_at: u64) -> Self {
        Self {
            fingerprint,
            modified_at,
            ..self.clone()
        }
    }

    pub fn with_modified_at(&self, modified_at: u64) -> Self {
        Self {
            modified_at,
            ..self.clone()
        }
    }

    pub fn with_play_recorded(&self) -> Self {
        Self {
            play_count: self.play_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Marks the backing file as gone. Identity, fingerprint and play history
    /// are kept so the track can be exhumed later.
    pub fn tombstone(&self, now: u64) -> Self {
        Self {
            tombstoned: true,
            tombstoned_at: now,
            ..self.clone()
        }
    }

    /// Brings a tombstoned track back at the path it was rediscovered at.
    pub fn exhume(&self, new_path: impl Into<String>, modified_at: u64) -> Self {
        Self {
            path: new_path.into(),
            tombstoned: false,
            tombstoned_at: 0,
            modified_at,
            ..self.clone()
        }
    }
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transformations_leave_original_untouched() {
        let original = TrackRecord::new(7, "a/b.mp3", 42, 100);
        let played = original.with_play_recorded().with_play_recorded();
        let buried = played.tombstone(500);

        assert_eq!(original.play_count(), 0);
        assert_eq!(played.play_count(), 2);
        assert!(!played.is_tombstoned());
        assert!(buried.is_tombstoned());
        assert_eq!(buried.tombstoned_at(), 500);
        assert_eq!(buried.id(), 7);
        assert_eq!(buried.fingerprint(), 42);
        assert_eq!(buried.play_count(), 2);
    }

    #[test]
    fn exhume_moves_and_revives() {
        let buried = TrackRecord::new(3, "old/x.flac", 9, 1)
            .with_play_recorded()
            .tombstone(10);
        let revived = buried.exhume("new/x.flac", 20);

        assert!(!revived.is_tombstoned());
        assert_eq!(revived.tombstoned_at(), 0);
        assert_eq!(revived.path(), "new/x.flac");
        assert_eq!(revived.id(), 3);
        assert_eq!(revived.play_count(), 1);
        assert_eq!(revived.fingerprint(), 9);
        assert_eq!(revived.modified_at(), 20);
    }

    #[test]
    fn record_survives_bincode() {
        let record = TrackRecord::new(11, "Artist/Album/01.mp3", u64::MAX, 3)
            .with_play_recorded()
            .tombstone(77);
        let bytes = bincode::serialize(&record).unwrap();
        let decoded: TrackRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn encoding_from_extension() {
        assert_eq!(Encoding::from_path(Path::new("a/b.MP3")), Encoding::Mp3);
        assert_eq!(Encoding::from_path(Path::new("b.oga")), Encoding::Ogg);
        assert_eq!(Encoding::from_path(Path::new("track.xyz")), Encoding::Unsupported);
        assert_eq!(Encoding::from_path(Path::new("noext")), Encoding::Unsupported);
        assert!(!Encoding::Unsupported.is_playable());
    }

    #[test]
    fn relpaths_use_forward_slashes() {
        let root = Path::new("/music");
        let rel = relpath_from(root, &root.join("Artist").join("track.mp3")).unwrap();
        assert_eq!(rel, "Artist/track.mp3");
        assert_eq!(join_relpath(root, &rel), root.join("Artist").join("track.mp3"));
        assert!(relpath_from(root, Path::new("/elsewhere/x.mp3")).is_none());
    }
}
