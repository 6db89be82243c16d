use std::ffi::OsStr;
use std::fs::{self, ReadDir};
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use common::{relpath_from, Encoding};
use tracing::warn;
use walkdir::WalkDir;

/// One filesystem entry seen during a walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredEntry {
    /// Forward-slash path relative to the walk root.
    pub relpath: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub is_hidden: bool,
    pub size: u64,
    /// Seconds since the epoch; zero when the filesystem does not say.
    pub modified_at: u64,
}

/// What a walk ran into besides the entries it visited.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub visited: usize,
    /// Paths that could not be read. Their subtrees were skipped.
    pub errors: Vec<DiscoveryError>,
    /// The visitor asked to stop before the walk finished.
    pub stopped: bool,
}

/// Walks a directory tree, handing every entry below `root` to `visit`.
///
/// Entry order within a directory is whatever the filesystem returns. A
/// directory that cannot be read is reported and skipped; only an
/// unreadable `root` fails the walk.
pub trait FileDiscovery: Send + Sync {
    fn find_files(
        &self,
        root: &Path,
        visit: &mut dyn FnMut(&DiscoveredEntry) -> ControlFlow<()>,
    ) -> Result<DiscoveryReport, DiscoveryError>;
}

#[derive(Clone, Copy, Debug)]
pub struct WalkdirDiscovery {
    pub skip_hidden: bool,
}

impl Default for WalkdirDiscovery {
    fn default() -> Self {
        Self { skip_hidden: true }
    }
}

impl FileDiscovery for WalkdirDiscovery {
    fn find_files(
        &self,
        root: &Path,
        visit: &mut dyn FnMut(&DiscoveredEntry) -> ControlFlow<()>,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        let meta = fs::metadata(root).map_err(|source| DiscoveryError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
        }

        let skip_hidden = self.skip_hidden;
        let mut report = DiscoveryReport::default();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(move |entry| !(skip_hidden && is_hidden_name(entry.file_name())));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.to_path_buf());
                    warn!("Skipping unreadable path {:?}: {}", path, err);
                    report.errors.push(DiscoveryError::Io {
                        path,
                        source: err.into(),
                    });
                    continue;
                }
            };
            let Some(relpath) = relpath_from(root, entry.path()) else {
                continue;
            };

            let metadata = entry.metadata().ok();
            let discovered = DiscoveredEntry {
                relpath,
                path: entry.path().to_path_buf(),
                is_dir: entry.file_type().is_dir(),
                is_hidden: is_hidden_name(entry.file_name()),
                size: metadata.as_ref().map(|m| m.len()).unwrap_or(0),
                modified_at: metadata.as_ref().map(modified_secs).unwrap_or(0),
            };
            report.visited += 1;
            if visit(&discovered).is_break() {
                report.stopped = true;
                break;
            }
        }

        Ok(report)
    }
}

pub(crate) fn is_hidden_name(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

pub(crate) fn modified_secs(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

/// One entry of the directory a [`DirIterator`] walks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// Position among the visible entries, stable while the directory is
    /// unchanged.
    pub offset: usize,
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub is_hidden: bool,
    pub is_track: bool,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Position {
    Start,
    At,
    End,
}

/// Steps back and forth through a single directory for browsing.
///
/// Directory handles only read forwards, so `prev` reopens the directory and
/// reads up to the previous entry. Stepping before the first entry or past
/// the last one leaves no current value; there is no wraparound.
pub struct DirIterator {
    dir: PathBuf,
    show_hidden: bool,
    handle: Option<ReadDir>,
    consumed: usize,
    position: Position,
    current: Option<DirEntryInfo>,
}

impl DirIterator {
    pub fn new(dir: &Path, show_hidden: bool) -> Result<Self, DiscoveryError> {
        let mut iter = Self {
            dir: dir.to_path_buf(),
            show_hidden,
            handle: None,
            consumed: 0,
            position: Position::Start,
            current: None,
        };
        iter.rewind()?;
        Ok(iter)
    }

    pub fn value(&self) -> Option<&DirEntryInfo> {
        self.current.as_ref()
    }

    /// Moves to the next entry. `Ok(None)` means the end of the directory
    /// was reached; an error means the read itself failed.
    pub fn next(&mut self) -> Result<Option<&DirEntryInfo>, DiscoveryError> {
        match self.position {
            Position::End => return Ok(None),
            Position::Start => self.rewind()?,
            Position::At => {}
        }
        let entry = self.advance()?;
        self.settle(entry);
        Ok(self.current.as_ref())
    }

    /// Moves to the previous entry. From the first entry this clears the
    /// current value and returns `Ok(None)`.
    pub fn prev(&mut self) -> Result<Option<&DirEntryInfo>, DiscoveryError> {
        let current_offset = self.current.as_ref().map(|entry| entry.offset);
        let target = match (self.position, current_offset) {
            (Position::Start, _) => return Ok(None),
            (Position::At, Some(offset)) if offset > 0 => offset - 1,
            (Position::At, _) => {
                self.position = Position::Start;
                self.current = None;
                self.handle = None;
                return Ok(None);
            }
            (Position::End, _) if self.consumed > 0 => self.consumed - 1,
            (Position::End, _) => {
                self.position = Position::Start;
                return Ok(None);
            }
        };

        self.rewind()?;
        let mut entry = None;
        while let Some(next) = self.advance()? {
            if next.offset == target {
                entry = Some(next);
                break;
            }
        }
        self.settle(entry);
        Ok(self.current.as_ref())
    }

    fn settle(&mut self, entry: Option<DirEntryInfo>) {
        self.position = if entry.is_some() {
            Position::At
        } else {
            Position::End
        };
        self.current = entry;
    }

    fn rewind(&mut self) -> Result<(), DiscoveryError> {
        let handle = fs::read_dir(&self.dir).map_err(|source| DiscoveryError::Io {
            path: self.dir.clone(),
            source,
        })?;
        self.handle = Some(handle);
        self.consumed = 0;
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<DirEntryInfo>, DiscoveryError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(None);
        };
        for entry in handle {
            let entry = entry.map_err(|source| DiscoveryError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let is_hidden = is_hidden_name(&entry.file_name());
            if is_hidden && !self.show_hidden {
                continue;
            }
            let path = entry.path();
            let file_type = entry.file_type().map_err(|source| DiscoveryError::Io {
                path: path.clone(),
                source,
            })?;
            let size = if file_type.is_file() {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            } else {
                0
            };

            let info = DirEntryInfo {
                offset: self.consumed,
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
                is_hidden,
                is_track: file_type.is_file() && Encoding::from_path(&path).is_playable(),
                size,
                path,
            };
            self.consumed += 1;
            return Ok(Some(info));
        }
        Ok(None)
    }
}

#[derive(Debug)]
pub enum DiscoveryError {
    Io { path: PathBuf, source: io::Error },
    NotADirectory(PathBuf),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::Io { path, source } => write!(f, "cannot read {:?}: {}", path, source),
            DiscoveryError::NotADirectory(path) => write!(f, "{:?} is not a directory", path),
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiscoveryError::Io { source, .. } => Some(source),
            DiscoveryError::NotADirectory(_) => None,
        }
    }
}
