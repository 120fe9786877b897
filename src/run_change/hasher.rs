use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;

use parking_lot::Mutex;
use sha1::Digest;
use sha1::Sha1;

use crate::Result;
use crate::SystemError;

/// SHA-1 digest of a file's content.
pub type ContentDigest = [u8; 20];

struct CacheEntry {
    modified: SystemTime,
    len: u64,
    digest: ContentDigest,
}

/// Memoizing SHA-1 hasher for condition files.
///
/// Digests are cached per path and refreshed when the file's metadata
/// (mtime, length) moves. Entries are never evicted: the set of distinct
/// condition files in one job is bounded and small, so the cache only ever
/// holds a handful of entries.
#[derive(Default)]
pub struct FileHasher {
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl FileHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content digest of `path`; an unreadable file is an I/O error, which
    /// callers treat as fatal for the run.
    pub fn digest(
        &self,
        path: &Path,
    ) -> Result<ContentDigest> {
        let meta = std::fs::metadata(path).map_err(SystemError::Io)?;
        let modified = meta.modified().map_err(SystemError::Io)?;
        let len = meta.len();

        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get(path) {
            if entry.modified == modified && entry.len == len {
                return Ok(entry.digest);
            }
        }

        let bytes = std::fs::read(path).map_err(SystemError::Io)?;
        let digest: ContentDigest = Sha1::digest(&bytes).into();
        cache.insert(
            path.to_path_buf(),
            CacheEntry {
                modified,
                len,
                digest,
            },
        );
        Ok(digest)
    }
}
