//! Disk-backed adapter.
//!
//! Layout: one directory per key under the root, one file per hash key
//! inside it, each file holding one encoded envelope.
//!
//! ```text
//! <root>/<enc(key)>/<enc(hash_key)>
//! ```
//!
//! Path segments are percent-encoded so no key can escape the root. Writes
//! go to a dot-prefixed temporary file and are renamed into place, so readers
//! never observe a partially written envelope.
//!
//! Saves share a lock that anything removing files or directories takes
//! exclusively. An expired entry is re-read under that lock before it is
//! evicted, so a save that lands in between is never lost. The lock is per
//! adapter; several adapters over one root only get the retry in `save`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cachet_core::envelope::{self, fresh_payload};
use cachet_core::{
    system_clock, CacheAdapter, CachetResult, Clock, Payload, SaveOutcome, StoreError,
};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::field_for;

/// Adapter persisting envelopes as files under a root directory.
///
/// A load that finds an expired or unreadable entry evicts it. The TTL is an
/// argument of each read, so a read with a short TTL also removes the entry
/// for later readers passing a longer one.
#[derive(Debug)]
pub struct FilesystemAdapter {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    /// Shared by saves, exclusive for removals.
    removal: RwLock<()>,
}

impl FilesystemAdapter {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> CachetResult<Self> {
        Self::with_clock(root, system_clock())
    }

    pub fn with_clock(root: impl AsRef<Path>, clock: Arc<dyn Clock>) -> CachetResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| io_error(&root, &e))?;
        Ok(Self {
            root,
            clock,
            removal: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn group_dir(&self, key: &str) -> PathBuf {
        self.root.join(encode_segment(key))
    }

    fn entry_path(&self, key: &str, hash_key: Option<&str>) -> PathBuf {
        self.group_dir(key)
            .join(encode_segment(field_for(key, hash_key)))
    }

    /// Count entry files in one group directory.
    async fn count_entries(dir: &Path) -> CachetResult<u64> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(dir, &e).into()),
        };

        let mut count = 0u64;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(dir, &e))?
        {
            if is_entry_name(&entry.file_name().to_string_lossy()) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Drop an expired or unreadable entry, and its group once empty.
    ///
    /// The entry is read again under the exclusive lock and kept if a save
    /// replaced it since the caller looked.
    async fn evict(&self, key: &str, path: &Path, ttl: u64) {
        let _exclusive = self.removal.write().await;
        match fs::read_to_string(path).await {
            Ok(raw) if fresh_payload(&raw, ttl, self.clock.as_ref()).is_some() => return,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            _ => {}
        }

        match fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Evicted expired cache entry"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to evict cache entry");
                return;
            }
        }
        remove_if_empty(&self.group_dir(key)).await;
    }

    /// Group directories under the root, with their decoded keys.
    async fn groups(&self) -> CachetResult<Vec<(String, PathBuf)>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, &e).into()),
        };

        let mut groups = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, &e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_entry_name(&name) {
                groups.push((decode_segment(&name), entry.path()));
            }
        }
        Ok(groups)
    }
}

#[async_trait]
impl CacheAdapter for FilesystemAdapter {
    async fn load(
        &self,
        key: &str,
        ttl: u64,
        hash_key: Option<&str>,
    ) -> CachetResult<Option<Payload>> {
        if key.is_empty() {
            return Ok(None);
        }

        let path = self.entry_path(key, hash_key);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, &e).into()),
        };

        let payload = fresh_payload(&raw, ttl, self.clock.as_ref());
        if payload.is_none() {
            self.evict(key, &path, ttl).await;
        }
        Ok(payload)
    }

    async fn save(
        &self,
        key: &str,
        payload: Payload,
        hash_key: Option<&str>,
    ) -> CachetResult<SaveOutcome> {
        if let Some(outcome) = SaveOutcome::precheck(key, &payload) {
            return Ok(outcome);
        }

        let raw = envelope::encode(&payload, self.clock.as_ref())?;
        let dir = self.group_dir(key);
        let path = self.entry_path(key, hash_key);

        let _shared = self.removal.read().await;
        let temp = match write_temp(&dir, raw.as_bytes()).await {
            Ok(temp) => temp,
            // The group directory vanished under us; recreate it once.
            Err(e) if e.kind() == ErrorKind::NotFound => write_temp(&dir, raw.as_bytes())
                .await
                .map_err(|e| io_error(&dir, &e))?,
            Err(e) => return Err(io_error(&dir, &e).into()),
        };

        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(io_error(&path, &e).into());
        }

        debug!(path = %path.display(), "Saved cache entry");
        Ok(SaveOutcome::Saved(payload))
    }

    async fn list(&self, key: &str) -> CachetResult<Vec<String>> {
        if key.is_empty() {
            return Ok(Vec::new());
        }

        let dir = self.group_dir(key);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, &e).into()),
        };

        let mut fields = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&dir, &e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_entry_name(&name) {
                fields.push(decode_segment(&name));
            }
        }
        fields.sort();
        Ok(fields)
    }

    async fn purge(&self, key: &str, hash_key: Option<&str>) -> CachetResult<bool> {
        if key.is_empty() {
            return Ok(false);
        }

        let _exclusive = self.removal.write().await;
        match hash_key {
            Some(field) if !field.is_empty() => {
                let path = self.entry_path(key, Some(field));
                match fs::remove_file(&path).await {
                    Ok(()) => {
                        remove_if_empty(&self.group_dir(key)).await;
                        Ok(true)
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(io_error(&path, &e).into()),
                }
            }
            _ => {
                let dir = self.group_dir(key);
                let count = Self::count_entries(&dir).await?;
                match fs::remove_dir_all(&dir).await {
                    Ok(()) => Ok(count > 0),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(io_error(&dir, &e).into()),
                }
            }
        }
    }

    async fn flush(&self) -> CachetResult<bool> {
        let _exclusive = self.removal.write().await;
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&self.root, &e).into()),
        }
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, &e))?;
        Ok(true)
    }

    async fn ping(&self) -> bool {
        match fs::metadata(&self.root).await {
            Ok(metadata) => metadata.is_dir(),
            Err(_) => false,
        }
    }

    async fn size(&self) -> CachetResult<u64> {
        let mut total = 0u64;
        for (_, dir) in self.groups().await? {
            total += Self::count_entries(&dir).await?;
        }
        Ok(total)
    }

    fn name(&self, _key: Option<&str>) -> String {
        "filesystem".to_string()
    }

    async fn purge_prefix(&self, prefix: &str) -> CachetResult<Option<u64>> {
        let _exclusive = self.removal.write().await;
        let mut removed = 0u64;
        for (key, dir) in self.groups().await? {
            if !key.starts_with(prefix) {
                continue;
            }
            let count = Self::count_entries(&dir).await?;
            match fs::remove_dir_all(&dir).await {
                Ok(()) => removed += count,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&dir, &e).into()),
            }
        }
        Ok(Some(removed))
    }
}

/// Remove a group directory if nothing is left in it. Fails quietly when
/// the directory is gone or still holds entries.
async fn remove_if_empty(dir: &Path) {
    let _ = fs::remove_dir(dir).await;
}

/// Create `dir` if needed and write `data` to a fresh temporary file in it.
async fn write_temp(dir: &Path, data: &[u8]) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let temp = dir.join(format!(".tmp-{}", Uuid::now_v7()));
    fs::write(&temp, data).await?;
    Ok(temp)
}

fn io_error(path: &Path, err: &std::io::Error) -> StoreError {
    StoreError::io(path.display().to_string(), err)
}

/// Temporary files are dot-prefixed; encoded segments never are.
fn is_entry_name(name: &str) -> bool {
    !name.starts_with('.')
}

/// Percent-encode every byte outside `[A-Za-z0-9._-]`, plus a leading `.`.
pub(crate) fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for (i, byte) in segment.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || byte == b'_'
            || byte == b'-'
            || (byte == b'.' && i > 0);
        if keep {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

pub(crate) fn decode_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
