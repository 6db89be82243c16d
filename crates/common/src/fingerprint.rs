use crate::ParsedTags;

const UNTAGGED_DOMAIN: &[u8] = b"untagged";

/// Incremental fingerprint over a track's identifying text fields.
///
/// Fields are fed one at a time, each length-prefixed, so the fields never
/// need to be joined into one buffer and `("ab", "c")` differs from
/// `("a", "bc")`. A missing field hashes exactly like an empty one.
///
/// When every field is empty the track has nothing to identify it by, so
/// the file size is mixed in to keep distinct untagged files apart.
#[derive(Clone)]
pub struct Fingerprinter {
    hasher: blake3::Hasher,
    tagged: bool,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
            tagged: false,
        }
    }

    pub fn field(&mut self, value: Option<&str>) -> &mut Self {
        let value = value.unwrap_or("");
        if !value.is_empty() {
            self.tagged = true;
        }
        self.hasher.update(&(value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    pub fn finish(&self, file_size: u64) -> u64 {
        let mut hasher = self.hasher.clone();
        if !self.tagged {
            hasher.update(UNTAGGED_DOMAIN);
            hasher.update(&file_size.to_le_bytes());
        }
        let hash = hasher.finalize();
        let mut out = [0u8; 8];
        out.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(out)
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn fingerprint(tags: &ParsedTags) -> u64 {
    Fingerprinter::new()
        .field(tags.title.as_deref())
        .field(tags.artist.as_deref())
        .field(tags.album.as_deref())
        .finish(tags.file_size)
}
