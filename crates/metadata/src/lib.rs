use std::path::Path;
use std::sync::Arc;

use common::{BoundedLruCache, Encoding, ParsedTags};
use lofty::error::LoftyError;
use lofty::file::FileType;
use lofty::prelude::{ItemKey, TaggedFileExt};
use parking_lot::Mutex;
use tracing::debug;

/// Turns a file into tags. Implementations must be callable from any thread.
pub trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<Arc<ParsedTags>, TagError>;
}

impl<T: TagReader + ?Sized> TagReader for Box<T> {
    fn read_tags(&self, path: &Path) -> Result<Arc<ParsedTags>, TagError> {
        (**self).read_tags(path)
    }
}

impl<T: TagReader + ?Sized> TagReader for Arc<T> {
    fn read_tags(&self, path: &Path) -> Result<Arc<ParsedTags>, TagError> {
        (**self).read_tags(path)
    }
}

#[derive(Debug)]
pub enum TagError {
    /// Not an audio format we can index.
    Unsupported(String),
    /// Looked like audio, but the container or its tags could not be read.
    ParseFailed(String),
    Io(std::io::Error),
}

impl std::fmt::Display for TagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagError::Unsupported(path) => write!(f, "unsupported file: {}", path),
            TagError::ParseFailed(reason) => write!(f, "tag parse failed: {}", reason),
            TagError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for TagError {}

impl From<std::io::Error> for TagError {
    fn from(err: std::io::Error) -> Self {
        TagError::Io(err)
    }
}

impl From<LoftyError> for TagError {
    fn from(err: LoftyError) -> Self {
        TagError::ParseFailed(err.to_string())
    }
}

/// Reads tags with lofty. Files whose extension is not a known audio
/// encoding are rejected before they are opened.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn read_tags(&self, path: &Path) -> Result<Arc<ParsedTags>, TagError> {
        if !Encoding::from_path(path).is_playable() {
            return Err(TagError::Unsupported(path.display().to_string()));
        }

        let file_size = std::fs::metadata(path)?.len();
        let tagged_file = lofty::read_from_path(path)?;
        let encoding = encoding_for(tagged_file.file_type());
        if !encoding.is_playable() {
            return Err(TagError::Unsupported(path.display().to_string()));
        }

        let mut info = ParsedTags {
            encoding,
            file_size,
            ..ParsedTags::default()
        };
        if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            info.title = tag.get_string(&ItemKey::TrackTitle).map(|v| v.to_string());
            info.album = tag.get_string(&ItemKey::AlbumTitle).map(|v| v.to_string());
            info.artist = tag
                .get_string(&ItemKey::TrackArtist)
                .or_else(|| tag.get_string(&ItemKey::AlbumArtist))
                .map(|v| v.to_string());
        }

        Ok(Arc::new(info))
    }
}

fn encoding_for(file_type: FileType) -> Encoding {
    match file_type {
        FileType::Mpeg => Encoding::Mp3,
        FileType::Flac => Encoding::Flac,
        FileType::Vorbis => Encoding::Ogg,
        FileType::Opus => Encoding::Opus,
        FileType::Wav => Encoding::Wav,
        _ => Encoding::Unsupported,
    }
}

/// Remembers the most recent parse results of the wrapped reader, keyed by
/// path.
///
/// The cache lock is only held while the map is touched, never while the
/// inner reader runs, so a slow parse does not block other lookups. Two
/// concurrent misses on the same path may both parse it. Failures are not
/// cached.
pub struct CachingTagReader<R> {
    inner: R,
    cache: Mutex<BoundedLruCache<String, Arc<ParsedTags>>>,
}

impl<R: TagReader> CachingTagReader<R> {
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(BoundedLruCache::new(capacity)),
        }
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Drops whatever is cached for `path`.
    pub fn forget(&self, path: &Path) {
        self.cache.lock().remove(&*path.to_string_lossy());
    }

    /// Parses `path` even if it is cached. Used when the file is known to
    /// have changed on disk: success replaces the cached entry, failure
    /// drops it.
    pub fn read_fresh(&self, path: &Path) -> Result<Arc<ParsedTags>, TagError> {
        let key = path.to_string_lossy().into_owned();
        match self.inner.read_tags(path) {
            Ok(tags) => {
                self.cache.lock().put(key, Arc::clone(&tags));
                Ok(tags)
            }
            Err(err) => {
                self.cache.lock().remove(&key);
                Err(err)
            }
        }
    }
}

impl<R: TagReader> TagReader for CachingTagReader<R> {
    fn read_tags(&self, path: &Path) -> Result<Arc<ParsedTags>, TagError> {
        let key = path.to_string_lossy();
        if let Some(hit) = self.cache.lock().get(&*key) {
            return Ok(Arc::clone(hit));
        }

        let tags = self.inner.read_tags(path)?;
        debug!("Parsed tags for {:?}", path);

        self.cache.lock().put(key.into_owned(), Arc::clone(&tags));
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingReader {
        calls: AtomicUsize,
    }

    impl TagReader for CountingReader {
        fn read_tags(&self, path: &Path) -> Result<Arc<ParsedTags>, TagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path.extension().map(|e| e == "xyz").unwrap_or(false) {
                return Err(TagError::Unsupported(path.display().to_string()));
            }
            Ok(Arc::new(ParsedTags {
                encoding: Encoding::Mp3,
                title: Some(path.display().to_string()),
                ..ParsedTags::default()
            }))
        }
    }

    fn counting() -> CountingReader {
        CountingReader {
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn hit_skips_inner_reader() {
        let reader = CachingTagReader::new(counting(), 4);
        let first = reader.read_tags(Path::new("/m/a.mp3")).unwrap();
        let second = reader.read_tags(Path::new("/m/a.mp3")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reader.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eviction_falls_back_to_parsing() {
        let reader = CachingTagReader::new(counting(), 1);
        reader.read_tags(Path::new("/m/a.mp3")).unwrap();
        reader.read_tags(Path::new("/m/b.mp3")).unwrap();
        let again = reader.read_tags(Path::new("/m/a.mp3")).unwrap();

        assert_eq!(again.title.as_deref(), Some("/m/a.mp3"));
        assert_eq!(reader.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failures_are_not_cached() {
        let reader = CachingTagReader::new(counting(), 4);
        assert!(matches!(
            reader.read_tags(Path::new("track.xyz")),
            Err(TagError::Unsupported(_))
        ));
        assert!(reader.read_tags(Path::new("track.xyz")).is_err());
        assert_eq!(reader.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_forces_reparse() {
        let reader = CachingTagReader::new(counting(), 4);
        reader.read_tags(Path::new("/m/a.mp3")).unwrap();
        reader.clear();
        reader.read_tags(Path::new("/m/a.mp3")).unwrap();
        assert_eq!(reader.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn read_fresh_bypasses_and_refreshes_cache() {
        let reader = CachingTagReader::new(counting(), 4);
        let cached = reader.read_tags(Path::new("/m/a.mp3")).unwrap();
        let fresh = reader.read_fresh(Path::new("/m/a.mp3")).unwrap();
        let after = reader.read_tags(Path::new("/m/a.mp3")).unwrap();

        assert!(!Arc::ptr_eq(&cached, &fresh));
        assert!(Arc::ptr_eq(&fresh, &after));
        assert_eq!(reader.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_fresh_read_drops_stale_entry() {
        struct Flaky {
            broken: AtomicBool,
        }

        impl TagReader for Flaky {
            fn read_tags(&self, path: &Path) -> Result<Arc<ParsedTags>, TagError> {
                if self.broken.load(Ordering::SeqCst) {
                    return Err(TagError::ParseFailed(path.display().to_string()));
                }
                Ok(Arc::new(ParsedTags::default()))
            }
        }

        let reader = CachingTagReader::new(
            Flaky {
                broken: AtomicBool::new(false),
            },
            4,
        );
        let path = Path::new("/m/a.mp3");
        reader.read_tags(path).unwrap();

        reader.inner().broken.store(true, Ordering::SeqCst);
        assert!(reader.read_fresh(path).is_err());
        assert!(reader.read_tags(path).is_err());
    }

    #[test]
    fn forget_forces_reparse_of_one_path() {
        let reader = CachingTagReader::new(counting(), 4);
        reader.read_tags(Path::new("/m/a.mp3")).unwrap();
        reader.read_tags(Path::new("/m/b.mp3")).unwrap();
        reader.forget(Path::new("/m/a.mp3"));

        reader.read_tags(Path::new("/m/a.mp3")).unwrap();
        reader.read_tags(Path::new("/m/b.mp3")).unwrap();
        assert_eq!(reader.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn lofty_reader_rejects_unknown_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert!(matches!(
            LoftyTagReader.read_tags(&path),
            Err(TagError::Unsupported(_))
        ));
    }

    #[test]
    fn lofty_reader_reports_garbage_audio_as_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.flac");
        std::fs::write(&path, b"definitely not flac").unwrap();
        assert!(matches!(
            LoftyTagReader.read_tags(&path),
            Err(TagError::ParseFailed(_))
        ));
    }
}
