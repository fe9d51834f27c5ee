//! On-disk archive store
//!
//! Two-tier content-addressed layout keyed by sanitized DID:
//! `<root>/<first two chars>/<sanitized>/{archive.bin, metadata.json}`.
//! Writes are atomic (temp file, fsync, rename; archive strictly before
//! metadata) so a crash never leaves metadata pointing at a partial archive.

use crate::error::{RepoError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

const ARCHIVE_FILE: &str = "archive.bin";
const METADATA_FILE: &str = "metadata.json";
const TMP_SUFFIX: &str = ".tmp";

/// Validator and freshness metadata stored next to each archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub did: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    pub cached_at: DateTime<Utc>,
    pub ttl_hours: u64,
}

impl CacheMetadata {
    pub fn new(did: impl Into<String>, ttl_hours: u64) -> Self {
        Self {
            did: did.into(),
            etag: None,
            last_modified: None,
            content_length: None,
            cached_at: Utc::now(),
            ttl_hours,
        }
    }

    /// Attach response validators from a fetch
    pub fn with_validators(
        mut self,
        etag: Option<String>,
        last_modified: Option<String>,
        content_length: Option<u64>,
    ) -> Self {
        self.etag = etag;
        self.last_modified = last_modified;
        self.content_length = content_length;
        self
    }

    /// True while the entry has not outlived its TTL
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        fresh_at(self.cached_at, self.ttl_hours, now)
    }
}

/// Freshness predicate: `now < cached_at + ttl_hours * 3600`
pub fn fresh_at(cached_at: DateTime<Utc>, ttl_hours: u64, now: DateTime<Utc>) -> bool {
    let expiry = cached_at + chrono::Duration::seconds(ttl_hours as i64 * 3600);
    now < expiry
}

/// Sanitize a DID into a filesystem-safe directory name.
///
/// Strips the known method prefix, maps `:` to `__`, and replaces anything
/// outside `[A-Za-z0-9._-]` with `_`. Idempotent.
pub fn sanitize_did(did: &str) -> String {
    let stripped = did
        .strip_prefix("did:plc:")
        .or_else(|| did.strip_prefix("did:web:"))
        .unwrap_or(did);
    stripped
        .chars()
        .flat_map(|c| {
            let mapped: Vec<char> = match c {
                ':' => "__".chars().collect(),
                c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => vec![c],
                _ => vec!['_'],
            };
            mapped
        })
        .collect()
}

/// Archive store rooted at a cache directory
pub struct ArchiveStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArchiveStore {
    /// Open a store at an explicit root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Open the store at the platform cache location
    /// (`<user_cache>/autoreply/did`).
    pub fn open_default() -> Result<Self> {
        let base = dirs::cache_dir().ok_or_else(|| {
            RepoError::cache(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no user cache directory",
            ))
        })?;
        Ok(Self::new(base.join("autoreply").join("did")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one DID's cache entry
    pub fn entry_dir(&self, did: &str) -> PathBuf {
        let sanitized = sanitize_did(did);
        let prefix: String = sanitized.chars().take(2).collect();
        self.root.join(prefix).join(sanitized)
    }

    fn archive_path(&self, did: &str) -> PathBuf {
        self.entry_dir(did).join(ARCHIVE_FILE)
    }

    fn metadata_path(&self, did: &str) -> PathBuf {
        self.entry_dir(did).join(METADATA_FILE)
    }

    async fn lock_for(&self, did: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(sanitize_did(did))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read metadata for a DID, if present and parseable
    pub async fn metadata(&self, did: &str) -> Option<CacheMetadata> {
        let bytes = fs::read(self.metadata_path(did)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// True iff a metadata entry exists, parses, and is within its TTL
    pub async fn is_fresh(&self, did: &str) -> bool {
        self.is_fresh_within(did, None).await
    }

    /// Freshness under the stored TTL, optionally capped by a caller
    /// maximum (profile lookups tolerate less staleness than full reads).
    pub async fn is_fresh_within(&self, did: &str, max_age_hours: Option<u64>) -> bool {
        self.metadata(did).await.is_some_and(|m| {
            let ttl = match max_age_hours {
                Some(cap) => cap.min(m.ttl_hours),
                None => m.ttl_hours,
            };
            fresh_at(m.cached_at, ttl, Utc::now())
        })
    }

    /// Read the cached archive bytes for a DID
    pub async fn read_archive(&self, did: &str) -> Result<Vec<u8>> {
        fs::read(self.archive_path(did))
            .await
            .map_err(|_| RepoError::not_found("cached archive", did))
    }

    /// Atomically persist an archive and its metadata.
    ///
    /// Both files land under a temporary suffix first; the archive is
    /// fsynced and renamed before the metadata so readers never observe
    /// metadata for a missing archive.
    #[tracing::instrument(level = "debug", skip(self, bytes), fields(did = %metadata.did, len = bytes.len()))]
    pub async fn store(&self, bytes: &[u8], metadata: &CacheMetadata) -> Result<()> {
        let did = metadata.did.as_str();
        let guard = self.lock_for(did).await;
        let _guard = guard.lock().await;

        let dir = self.entry_dir(did);
        fs::create_dir_all(&dir).await?;

        let archive_path = self.archive_path(did);
        let metadata_path = self.metadata_path(did);
        let archive_tmp = archive_path.with_extension(format!("bin{TMP_SUFFIX}"));
        let metadata_tmp = metadata_path.with_extension(format!("json{TMP_SUFFIX}"));

        let result = self
            .write_pair(&archive_tmp, &metadata_tmp, &archive_path, &metadata_path, bytes, metadata)
            .await;
        if result.is_err() {
            let _ = fs::remove_file(&archive_tmp).await;
            let _ = fs::remove_file(&metadata_tmp).await;
        }
        result
    }

    async fn write_pair(
        &self,
        archive_tmp: &Path,
        metadata_tmp: &Path,
        archive_path: &Path,
        metadata_path: &Path,
        bytes: &[u8],
        metadata: &CacheMetadata,
    ) -> Result<()> {
        {
            let mut f = fs::File::create(archive_tmp).await?;
            tokio::io::AsyncWriteExt::write_all(&mut f, bytes).await?;
            f.sync_all().await?;
        }
        let meta_json = serde_json::to_vec_pretty(metadata).map_err(RepoError::serialization)?;
        {
            let mut f = fs::File::create(metadata_tmp).await?;
            tokio::io::AsyncWriteExt::write_all(&mut f, &meta_json).await?;
            f.sync_all().await?;
        }
        fs::rename(archive_tmp, archive_path).await?;
        fs::rename(metadata_tmp, metadata_path).await?;
        Ok(())
    }

    /// Refresh `cached_at` without touching the archive (304 revalidation)
    pub async fn touch(&self, did: &str) -> Result<()> {
        let Some(mut metadata) = self.metadata(did).await else {
            return Err(RepoError::not_found("cache metadata", did));
        };
        metadata.cached_at = Utc::now();

        let guard = self.lock_for(did).await;
        let _guard = guard.lock().await;
        let metadata_path = self.metadata_path(did);
        let metadata_tmp = metadata_path.with_extension(format!("json{TMP_SUFFIX}"));
        let meta_json = serde_json::to_vec_pretty(&metadata).map_err(RepoError::serialization)?;
        {
            let mut f = fs::File::create(&metadata_tmp).await?;
            tokio::io::AsyncWriteExt::write_all(&mut f, &meta_json).await?;
            f.sync_all().await?;
        }
        fs::rename(&metadata_tmp, &metadata_path).await?;
        Ok(())
    }

    /// Drop a DID's cache entry entirely (corrupt archive, logout, etc.)
    pub async fn evict(&self, did: &str) -> Result<()> {
        let guard = self.lock_for(did).await;
        let _guard = guard.lock().await;
        let dir = self.entry_dir(did);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Walk the tree and remove every entry whose TTL has expired.
    ///
    /// Returns the number of entries removed.
    pub async fn cleanup(&self) -> Result<usize> {
        let mut removed = 0;
        let now = Utc::now();
        let mut shards = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata_path = entry.path().join(METADATA_FILE);
                let expired = match fs::read(&metadata_path).await {
                    Ok(bytes) => serde_json::from_slice::<CacheMetadata>(&bytes)
                        .map(|m| !m.is_fresh_at(now))
                        .unwrap_or(true),
                    Err(_) => continue,
                };
                if expired {
                    fs::remove_dir_all(entry.path()).await?;
                    removed += 1;
                    tracing::debug!(entry = %entry.path().display(), "removed expired cache entry");
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ArchiveStore) {
        let dir = TempDir::new().unwrap();
        let store = ArchiveStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn sanitize_strips_method_and_maps_chars() {
        assert_eq!(sanitize_did("did:plc:abc123"), "abc123");
        assert_eq!(sanitize_did("did:web:example.com"), "example.com");
        assert_eq!(sanitize_did("did:web:example.com:user:alice"), "example.com__user__alice");
        assert_eq!(sanitize_did("did:key:z6Mk"), "did__key__z6Mk");
        assert_eq!(sanitize_did("weird/../did"), "weird_.._did");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for did in [
            "did:plc:abc123",
            "did:web:example.com:user:alice",
            "odd chars\u{1F600}here",
            "did:plc:UPPER.lower_mixed-09",
        ] {
            let once = sanitize_did(did);
            assert_eq!(sanitize_did(&once), once, "not idempotent for {did}");
            assert!(
                once.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')),
                "bad char in {once}"
            );
        }
    }

    #[test]
    fn freshness_boundary() {
        let cached_at = Utc::now();
        assert!(fresh_at(cached_at, 1, cached_at));
        assert!(fresh_at(
            cached_at,
            1,
            cached_at + chrono::Duration::seconds(3599)
        ));
        assert!(!fresh_at(
            cached_at,
            1,
            cached_at + chrono::Duration::seconds(3600)
        ));
        assert!(!fresh_at(cached_at, 0, cached_at));
    }

    #[test]
    fn entry_dir_uses_two_char_shard() {
        let (_dir, store) = store();
        let path = store.entry_dir("did:plc:abc123");
        let mut comps = path.components().rev();
        assert_eq!(comps.next().unwrap().as_os_str(), "abc123");
        assert_eq!(comps.next().unwrap().as_os_str(), "ab");
    }

    #[tokio::test]
    async fn store_then_read_round_trip() {
        let (_dir, store) = store();
        let meta = CacheMetadata::new("did:plc:xyz", 24).with_validators(
            Some("W/\"v1\"".into()),
            None,
            Some(4),
        );
        store.store(b"\x01\x02\x03\x04", &meta).await.unwrap();

        assert!(store.is_fresh("did:plc:xyz").await);
        assert_eq!(store.read_archive("did:plc:xyz").await.unwrap(), b"\x01\x02\x03\x04");
        let read_back = store.metadata("did:plc:xyz").await.unwrap();
        assert_eq!(read_back.etag.as_deref(), Some("W/\"v1\""));
        assert_eq!(read_back.content_length, Some(4));
    }

    #[tokio::test]
    async fn store_leaves_no_temporaries() {
        let (_dir, store) = store();
        let meta = CacheMetadata::new("did:plc:xyz", 24);
        store.store(b"data", &meta).await.unwrap();
        let mut names = Vec::new();
        for entry in std::fs::read_dir(store.entry_dir("did:plc:xyz")).unwrap() {
            names.push(entry.unwrap().file_name().into_string().unwrap());
        }
        names.sort();
        assert_eq!(names, vec!["archive.bin", "metadata.json"]);
    }

    #[tokio::test]
    async fn crashed_write_leaves_no_metadata() {
        // Simulate a crash between the archive temp write and the rename:
        // only the temp file exists; the validity predicate must not fire.
        let (_dir, store) = store();
        let dir = store.entry_dir("did:plc:crash");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("archive.bin.tmp"), b"partial").unwrap();

        assert!(!store.is_fresh("did:plc:crash").await);
        assert!(store.read_archive("did:plc:crash").await.is_err());
    }

    #[tokio::test]
    async fn touch_refreshes_cached_at_only() {
        let (_dir, store) = store();
        let mut meta = CacheMetadata::new("did:plc:xyz", 24);
        meta.cached_at = Utc::now() - chrono::Duration::hours(48);
        store.store(b"old", &meta).await.unwrap();
        assert!(!store.is_fresh("did:plc:xyz").await);

        store.touch("did:plc:xyz").await.unwrap();
        assert!(store.is_fresh("did:plc:xyz").await);
        assert_eq!(store.read_archive("did:plc:xyz").await.unwrap(), b"old");
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_entries() {
        let (_dir, store) = store();
        let fresh = CacheMetadata::new("did:plc:fresh", 24);
        store.store(b"a", &fresh).await.unwrap();

        let mut stale = CacheMetadata::new("did:plc:stale", 1);
        stale.cached_at = Utc::now() - chrono::Duration::hours(2);
        store.store(b"b", &stale).await.unwrap();

        let removed = store.cleanup().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.metadata("did:plc:fresh").await.is_some());
        assert!(store.metadata("did:plc:stale").await.is_none());
    }

    #[tokio::test]
    async fn evict_is_idempotent() {
        let (_dir, store) = store();
        let meta = CacheMetadata::new("did:plc:xyz", 24);
        store.store(b"x", &meta).await.unwrap();
        store.evict("did:plc:xyz").await.unwrap();
        store.evict("did:plc:xyz").await.unwrap();
        assert!(store.metadata("did:plc:xyz").await.is_none());
    }
}
