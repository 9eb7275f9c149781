//! Per-folder scan cache
//!
//! Each processed folder carries a `zz_cache.lokstra.json` recording, per
//! source file, the content checksum and what was generated from it, plus the
//! checksum of the generated file itself. The cache is authoritative exactly
//! when `generated_checksum` matches the generated file on disk; any mismatch
//! (including a hand edit) forces regeneration of the whole folder.
//!
//! Cache writes are atomic: a temp file in the same directory, then a rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{GenError, Result};

/// Bumped when the cache layout changes; older versions are discarded.
pub const CACHE_VERSION: u32 = 1;

/// Per-source-file cache entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub checksum: String,
    pub annotation_count: usize,
    pub last_scan: String,
    /// Names of the structs generated from this file.
    pub generated: Vec<String>,
}

/// The persisted cache for one folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderCache {
    pub version: u32,
    pub files: BTreeMap<String, FileEntry>,
    /// Checksum of the generated file this cache describes.
    pub generated_checksum: String,
    pub updated_at: String,
}

impl FolderCache {
    pub fn new() -> Self {
        Self {
            version: CACHE_VERSION,
            files: BTreeMap::new(),
            generated_checksum: String::new(),
            updated_at: now_rfc3339(),
        }
    }
}

impl Default for FolderCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Lower-hex SHA-256 of a byte slice.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn now_rfc3339() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}

fn cache_path(folder: &Path) -> PathBuf {
    folder.join(crate::CACHE_FILE_NAME)
}

/// Load a folder's cache. A missing file, unreadable JSON, or a version
/// mismatch all count as "no cache".
pub fn load(folder: &Path) -> Option<FolderCache> {
    let bytes = std::fs::read(cache_path(folder)).ok()?;
    let cache: FolderCache = serde_json::from_slice(&bytes).ok()?;
    if cache.version != CACHE_VERSION {
        tracing::debug!(
            target: "lokstra_codegen",
            folder = %folder.display(),
            found = cache.version,
            expected = CACHE_VERSION,
            "discarding cache with stale version"
        );
        return None;
    }
    Some(cache)
}

/// Persist a folder's cache atomically (temp file, then rename).
pub fn save(folder: &Path, cache: &FolderCache) -> Result<()> {
    let path = cache_path(folder);
    let json = serde_json::to_vec_pretty(cache).map_err(|e| GenError::Cache {
        path: path.clone(),
        message: e.to_string(),
    })?;
    write_atomic(&path, &json)
}

/// Remove a folder's cache file if present.
pub fn remove(folder: &Path) {
    let _ = std::fs::remove_file(cache_path(folder));
}

/// Write a file atomically: temp file in the target directory, then rename.
/// An interrupted run therefore never leaves a half-written artifact.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| GenError::io(path, e))?;
    std::fs::write(tmp.path(), bytes).map_err(|e| GenError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| GenError::io(path, e.error))?;
    Ok(())
}
