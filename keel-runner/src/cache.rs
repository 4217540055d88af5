//! Local layer cache
//!
//! Entries live in `<cache_dir>/<os>-<service>-<head>/`, each part escaped so
//! that `-` and path separators only ever appear as delimiters, each with a
//! `keel-cache.json` marker recording its key and write time. A build reads
//! from a restored entry and writes into a private staging directory under
//! `<cache_dir>/.staging/`; the staging directory replaces the durable entry
//! only when committed after a successful build and push.

use chrono::{DateTime, Utc};
use keel_core::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub const MARKER_FILE: &str = "keel-cache.json";
const STAGING_DIR: &str = ".staging";

/// Primary cache key `(os, service, head)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    pub os: String,
    pub service: String,
    pub head: String,
}

impl CacheKey {
    pub fn new(os: impl Into<String>, service: impl Into<String>, head: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            service: service.into(),
            head: head.into(),
        }
    }

    /// Directory name of the durable entry
    ///
    /// Distinct keys always map to distinct names, and a name is always a
    /// single path component.
    pub fn dir_name(&self) -> String {
        format!(
            "{}-{}-{}",
            escape_part(&self.os),
            escape_part(&self.service),
            escape_part(&self.head)
        )
    }

    /// True when `other` is in the same `(os, service)` family
    pub fn same_family(&self, other: &CacheKey) -> bool {
        self.os == other.os && self.service == other.service
    }
}

/// Keeps `[A-Za-z0-9._]` and percent-encodes every other byte
fn escape_part(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'_' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }
    escaped
}

/// Contents of the marker file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMarker {
    #[serde(flatten)]
    pub key: CacheKey,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    path: PathBuf,
    marker: CacheMarker,
}

/// Durable cache directory with retention
#[derive(Debug, Clone)]
pub struct LayerCache {
    root: PathBuf,
    retain: usize,
}

impl LayerCache {
    pub fn new(root: impl Into<PathBuf>, retain: usize) -> Self {
        Self {
            root: root.into(),
            retain: retain.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Finds the entry to build from: the exact key, else the most recently
    /// written entry of the same service. A miss is `None`, not an error.
    pub fn restore(&self, key: &CacheKey) -> Result<Option<PathBuf>> {
        let exact = self.root.join(key.dir_name());
        if let Some(marker) = read_marker(&exact) {
            if marker.key == *key {
                debug!("Cache hit for {}", key.dir_name());
                return Ok(Some(exact));
            }
        }

        let newest = self
            .family(key)?
            .into_iter()
            .max_by_key(|entry| entry.marker.written_at);

        match newest {
            Some(entry) => {
                debug!(
                    "Restoring cache for {} from {}",
                    key.service,
                    entry.path.display()
                );
                Ok(Some(entry.path))
            }
            None => {
                debug!("Cache miss for {}", key.dir_name());
                Ok(None)
            }
        }
    }

    /// Creates a fresh staging directory for a build writing under `key`
    pub fn stage(&self, key: &CacheKey) -> Result<StagingCache> {
        let path = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}-{}", key.dir_name(), Uuid::new_v4()));
        fs::create_dir_all(&path)?;

        Ok(StagingCache {
            path,
            root: self.root.clone(),
            key: key.clone(),
            committed: false,
        })
    }

    /// Removes the oldest entries of `key`'s family beyond the retention count.
    /// Returns the number of removed entries.
    pub fn prune(&self, key: &CacheKey) -> Result<usize> {
        let mut entries = self.family(key)?;
        if entries.len() <= self.retain {
            return Ok(0);
        }

        entries.sort_by(|a, b| b.marker.written_at.cmp(&a.marker.written_at));

        let mut removed = 0;
        for entry in entries.into_iter().skip(self.retain) {
            match fs::remove_dir_all(&entry.path) {
                Ok(()) => {
                    debug!("Pruned cache entry {}", entry.path.display());
                    removed += 1;
                }
                Err(e) => warn!(
                    "Failed to prune cache entry {}: {}",
                    entry.path.display(),
                    e
                ),
            }
        }

        Ok(removed)
    }

    /// Durable entries of the same `(os, service)` as `key`
    ///
    /// Matching goes through the marker, never the directory name, so
    /// `cart` never picks up entries of `cart-api`.
    fn family(&self, key: &CacheKey) -> Result<Vec<CacheEntry>> {
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for item in dir {
            let item = item?;
            if item.file_name() == STAGING_DIR || !item.file_type()?.is_dir() {
                continue;
            }

            let path = item.path();
            if let Some(marker) = read_marker(&path) {
                if marker.key.same_family(key) {
                    entries.push(CacheEntry { path, marker });
                }
            }
        }

        Ok(entries)
    }
}

fn read_marker(dir: &Path) -> Option<CacheMarker> {
    let contents = fs::read_to_string(dir.join(MARKER_FILE)).ok()?;
    match serde_json::from_str(&contents) {
        Ok(marker) => Some(marker),
        Err(e) => {
            warn!("Ignoring cache entry {} with invalid marker: {}", dir.display(), e);
            None
        }
    }
}

/// Staging location owned by one build unit
///
/// Dropping the handle without calling [`StagingCache::commit`] removes the
/// staging directory and leaves the durable entry untouched.
#[derive(Debug)]
pub struct StagingCache {
    path: PathBuf,
    root: PathBuf,
    key: CacheKey,
    committed: bool,
}

impl StagingCache {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Promotes the staging directory to the durable entry for its key
    pub fn commit(mut self) -> Result<PathBuf> {
        let marker = CacheMarker {
            key: self.key.clone(),
            written_at: Utc::now(),
        };
        fs::write(
            self.path.join(MARKER_FILE),
            serde_json::to_vec_pretty(&marker)?,
        )?;

        let durable = self.root.join(self.key.dir_name());
        if durable.exists() {
            let retired = self
                .root
                .join(STAGING_DIR)
                .join(format!("retired-{}", Uuid::new_v4()));
            fs::rename(&durable, &retired)?;
            fs::rename(&self.path, &durable)?;
            if let Err(e) = fs::remove_dir_all(&retired) {
                warn!("Failed to remove retired cache {}: {}", retired.display(), e);
            }
        } else {
            fs::rename(&self.path, &durable)?;
        }

        self.committed = true;
        debug!("Committed cache entry {}", durable.display());
        Ok(durable)
    }
}

impl Drop for StagingCache {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to discard staging cache {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn write_entry(root: &Path, key: &CacheKey, written_at: DateTime<Utc>) -> PathBuf {
        let dir = root.join(key.dir_name());
        fs::create_dir_all(&dir).unwrap();
        let marker = CacheMarker {
            key: key.clone(),
            written_at,
        };
        fs::write(dir.join(MARKER_FILE), serde_json::to_vec(&marker).unwrap()).unwrap();
        dir
    }

    #[test]
    fn test_dir_names_do_not_collide() {
        let cart = CacheKey::new("linux", "cart", "api-x");
        let cart_api = CacheKey::new("linux", "cart-api", "x");
        assert_ne!(cart.dir_name(), cart_api.dir_name());
        assert_eq!(
            CacheKey::new("linux", "frontend", "9fceb02").dir_name(),
            "linux-frontend-9fceb02"
        );

        let nested = CacheKey::new("linux", "frontend", "feat/login-page").dir_name();
        assert!(!nested.contains('/'));
        assert_eq!(Path::new(&nested).components().count(), 1);
    }

    #[test]
    fn test_commit_keeps_entries_of_similar_services_apart() {
        let root = TempDir::new().unwrap();
        let cache = LayerCache::new(root.path(), 3);
        let cart = CacheKey::new("linux", "cart", "api-x");
        let cart_api = CacheKey::new("linux", "cart-api", "x");

        let staging = cache.stage(&cart).unwrap();
        fs::write(staging.path().join("blob"), "cart").unwrap();
        let cart_dir = staging.commit().unwrap();

        let staging = cache.stage(&cart_api).unwrap();
        fs::write(staging.path().join("blob"), "cart-api").unwrap();
        let cart_api_dir = staging.commit().unwrap();

        assert_ne!(cart_dir, cart_api_dir);
        assert_eq!(fs::read_to_string(cart_dir.join("blob")).unwrap(), "cart");
        assert_eq!(cache.restore(&cart).unwrap(), Some(cart_dir));
        assert_eq!(cache.restore(&cart_api).unwrap(), Some(cart_api_dir));
    }

    #[test]
    fn test_restore_miss_on_empty_cache() {
        let root = TempDir::new().unwrap();
        let cache = LayerCache::new(root.path().join("missing"), 3);
        let key = CacheKey::new("linux", "frontend", "abc");
        assert_eq!(cache.restore(&key).unwrap(), None);
    }

    #[test]
    fn test_restore_prefers_exact_key() {
        let root = TempDir::new().unwrap();
        let now = Utc::now();
        let key = CacheKey::new("linux", "frontend", "abc");
        let exact = write_entry(root.path(), &key, now - Duration::hours(2));
        write_entry(root.path(), &CacheKey::new("linux", "frontend", "def"), now);

        let cache = LayerCache::new(root.path(), 3);
        assert_eq!(cache.restore(&key).unwrap(), Some(exact));
    }

    #[test]
    fn test_restore_falls_back_to_newest_of_same_service() {
        let root = TempDir::new().unwrap();
        let now = Utc::now();
        write_entry(root.path(), &CacheKey::new("linux", "cart", "old"), now - Duration::hours(3));
        let newest = write_entry(root.path(), &CacheKey::new("linux", "cart", "new"), now - Duration::hours(1));
        write_entry(root.path(), &CacheKey::new("linux", "cart-api", "x"), now);
        write_entry(root.path(), &CacheKey::new("windows", "cart", "y"), now);

        let cache = LayerCache::new(root.path(), 3);
        let key = CacheKey::new("linux", "cart", "head");
        assert_eq!(cache.restore(&key).unwrap(), Some(newest));
    }

    #[test]
    fn test_dropped_staging_is_discarded() {
        let root = TempDir::new().unwrap();
        let key = CacheKey::new("linux", "frontend", "abc");
        let durable = write_entry(root.path(), &key, Utc::now());
        let cache = LayerCache::new(root.path(), 3);

        let staging = cache.stage(&key).unwrap();
        let staging_path = staging.path().to_path_buf();
        fs::write(staging_path.join("blob"), "layer").unwrap();
        assert!(staging_path.exists());

        drop(staging);

        assert!(!staging_path.exists());
        assert!(durable.join(MARKER_FILE).exists());
        assert!(!durable.join("blob").exists());
    }

    #[test]
    fn test_commit_replaces_durable_entry() {
        let root = TempDir::new().unwrap();
        let key = CacheKey::new("linux", "frontend", "abc");
        let durable = write_entry(root.path(), &key, Utc::now() - Duration::hours(1));
        fs::write(durable.join("stale"), "old").unwrap();
        let cache = LayerCache::new(root.path(), 3);

        let staging = cache.stage(&key).unwrap();
        fs::write(staging.path().join("blob"), "layer").unwrap();
        let committed = staging.commit().unwrap();

        assert_eq!(committed, durable);
        assert!(durable.join("blob").exists());
        assert!(!durable.join("stale").exists());
        assert_eq!(read_marker(&durable).unwrap().key, key);
        assert_eq!(cache.restore(&key).unwrap(), Some(durable));
    }

    #[test]
    fn test_prune_keeps_newest_entries() {
        let root = TempDir::new().unwrap();
        let now = Utc::now();
        let mut dirs = Vec::new();
        for i in 0..4 {
            let key = CacheKey::new("linux", "frontend", format!("h{}", i));
            dirs.push(write_entry(root.path(), &key, now - Duration::hours(10 - i)));
        }
        let other = write_entry(root.path(), &CacheKey::new("linux", "backend", "h0"), now - Duration::days(9));

        let cache = LayerCache::new(root.path(), 2);
        let removed = cache.prune(&CacheKey::new("linux", "frontend", "h3")).unwrap();

        assert_eq!(removed, 2);
        assert!(!dirs[0].exists());
        assert!(!dirs[1].exists());
        assert!(dirs[2].exists());
        assert!(dirs[3].exists());
        assert!(other.exists());
    }
}
