// Persistent tier - encrypted sealed entries on disk under a byte quota
// Author: kelexine (https://github.com/kelexine)

use super::key::{is_fingerprint, CacheKey};
use super::models::{CacheEntry, RejectReason, TierCounters, TierKind};
use super::tier::{check_binding, CacheTier, TierLookup};
use crate::config::PersistentTierConfig;
use crate::error::Result;
use crate::integrity::SealedEntry;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// On-disk record: the sealed wire format plus the normalized request text.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    canonical: String,
    #[serde(flatten)]
    sealed: SealedEntry,
}

/// Directory name for an owner's entries. Raw owner ids never touch the filesystem.
pub fn owner_dir_name(owner_id: &str) -> String {
    hex::encode(Sha256::digest(owner_id.as_bytes()))[..32].to_string()
}

/// One JSON file per (owner, fingerprint) below `root`.
///
/// Writes go through a temp file and a rename; byte usage is tracked against
/// `disk_quota_bytes` and the write path is serialized so two stores cannot
/// both squeeze under the quota.
pub struct PersistentTier {
    root: PathBuf,
    quota: u64,
    ttl: Duration,
    used: AtomicU64,
    entries: AtomicUsize,
    write_lock: Mutex<()>,
    counters: TierCounters,
}

impl PersistentTier {
    /// Open (creating if needed) the tier rooted at `config.directory` and
    /// account for entries already on disk.
    pub async fn open(config: &PersistentTierConfig) -> Result<Self> {
        let root = PathBuf::from(&config.directory);
        fs::create_dir_all(&root).await?;

        let tier = Self {
            root,
            quota: config.disk_quota_bytes,
            ttl: config.ttl(),
            used: AtomicU64::new(0),
            entries: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
            counters: TierCounters::default(),
        };

        let (bytes, count) = tier.scan().await?;
        tier.used.store(bytes, Ordering::SeqCst);
        tier.entries.store(count, Ordering::SeqCst);
        info!(
            "Persistent cache at {} holds {} entries ({} bytes, quota {})",
            tier.root.display(),
            count,
            bytes,
            tier.quota
        );
        Ok(tier)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Path of the file holding `fingerprint` for `owner_id`.
    pub fn entry_path(&self, owner_id: &str, fingerprint: &str) -> PathBuf {
        self.root
            .join(owner_dir_name(owner_id))
            .join(format!("{}.json", fingerprint))
    }

    async fn scan(&self) -> Result<(u64, usize)> {
        let mut bytes = 0;
        let mut count = 0;
        for path in self.entry_files().await? {
            if let Ok(meta) = fs::metadata(&path).await {
                bytes += meta.len();
                count += 1;
            }
        }
        Ok((bytes, count))
    }

    async fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut owners = fs::read_dir(&self.root).await?;
        while let Some(owner) = owners.next_entry().await? {
            if !owner.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(owner.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    async fn delete_file(&self, path: &Path) -> bool {
        let size = match fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => return false,
        };
        match fs::remove_file(path).await {
            Ok(()) => {
                self.release(size);
                true
            }
            Err(e) => {
                warn!("Failed to remove cache file {}: {}", path.display(), e);
                false
            }
        }
    }

    fn fits(&self, existing: Option<u64>, size: u64) -> bool {
        self.used_bytes().saturating_sub(existing.unwrap_or(0)) + size <= self.quota
    }

    fn release(&self, size: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| Some(used.saturating_sub(size)));
        let _ = self
            .entries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    /// Remove expired and unreadable files. Caller must hold the write lock.
    async fn sweep_locked(&self) -> usize {
        let files = match self.entry_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!("Persistent sweep could not list {}: {}", self.root.display(), e);
                return 0;
            }
        };

        let now = Utc::now();
        let mut removed = 0;
        for path in files {
            let stale = match fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<StoredEntry>(&raw) {
                    Ok(stored) => stored.sealed.is_expired_at(now),
                    Err(_) => true,
                },
                Err(_) => false,
            };
            if stale && self.delete_file(&path).await {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Persistent sweep removed {} entries", removed);
        }
        removed
    }
}

async fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).await.map(|m| m.len()).ok()
}

#[async_trait]
impl CacheTier for PersistentTier {
    fn kind(&self) -> TierKind {
        TierKind::Persistent
    }

    async fn get(&self, key: &CacheKey, owner_id: &str) -> TierLookup {
        if !is_fingerprint(key.fingerprint()) {
            return TierLookup::NotFound;
        }
        let path = self.entry_path(owner_id, key.fingerprint());
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(_) => return TierLookup::NotFound,
        };

        let stored: StoredEntry = match serde_json::from_slice(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                let _guard = self.write_lock.lock().await;
                self.delete_file(&path).await;
                return TierLookup::Corrupt(format!("unreadable entry: {}", e));
            }
        };

        if stored.sealed.is_expired_at(Utc::now()) {
            let _guard = self.write_lock.lock().await;
            if self.delete_file(&path).await {
                self.counters.evicted(1);
            }
            return TierLookup::NotFound;
        }

        let mut entry = CacheEntry::new(
            key.fingerprint(),
            stored.canonical,
            stored.sealed,
            TierKind::Persistent,
        );
        entry.last_access = Utc::now();
        TierLookup::Found(entry)
    }

    async fn put(
        &self,
        key: &CacheKey,
        owner_id: &str,
        entry: CacheEntry,
    ) -> std::result::Result<(), RejectReason> {
        if !is_fingerprint(key.fingerprint()) {
            return Err(RejectReason::Invalid);
        }
        check_binding(key, owner_id, &entry)?;
        if !entry.is_encrypted() {
            return Err(RejectReason::Sealing);
        }

        let path = self.entry_path(owner_id, key.fingerprint());
        let stored = StoredEntry {
            canonical: entry.canonical,
            sealed: entry.sealed,
        };
        let body = serde_json::to_vec(&stored).map_err(|_| RejectReason::Sealing)?;
        let size = body.len() as u64;

        let _guard = self.write_lock.lock().await;
        let mut existing = file_size(&path).await;
        if !self.fits(existing, size) {
            let swept = self.sweep_locked().await;
            self.counters.evicted(swept);
            existing = file_size(&path).await;
            if !self.fits(existing, size) {
                debug!(
                    "Persistent quota exhausted: {} used, {} needed, {} quota",
                    self.used_bytes(),
                    size,
                    self.quota
                );
                return Err(RejectReason::Capacity);
            }
        }

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        let tmp = dir.join(format!(".{}.tmp", key.fingerprint()));
        let written = async {
            fs::create_dir_all(&dir).await?;
            fs::write(&tmp, &body).await?;
            fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(e) = written {
            warn!("Failed to write cache entry {}: {}", key, e);
            let _ = fs::remove_file(&tmp).await;
            return Err(RejectReason::Sealing);
        }

        let replaced = existing.unwrap_or(0);
        let _ = self.used.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
            Some(used.saturating_sub(replaced) + size)
        });
        if existing.is_none() {
            self.entries.fetch_add(1, Ordering::SeqCst);
        }
        self.counters.store();
        Ok(())
    }

    async fn remove(&self, fingerprint: &str, owner_id: &str) -> bool {
        if !is_fingerprint(fingerprint) {
            return false;
        }
        let _guard = self.write_lock.lock().await;
        self.delete_file(&self.entry_path(owner_id, fingerprint)).await
    }

    async fn purge_expired(&self) -> usize {
        let _guard = self.write_lock.lock().await;
        let removed = self.sweep_locked().await;
        self.counters.evicted(removed);
        removed
    }

    async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        if let Ok(files) = self.entry_files().await {
            for path in files {
                self.delete_file(&path).await;
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    fn counters(&self) -> &TierCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_dir_name_is_digest() {
        let name = owner_dir_name("../alice");
        assert_eq!(name.len(), 32);
        assert!(name.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(name, owner_dir_name("alice"));
    }
}
