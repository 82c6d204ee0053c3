//! File Backend
//!
//! Filesystem storage with one subdirectory per key namespace. Each entry is
//! a value file plus a JSON metadata sidecar, both named from the SHA-256 of
//! the full key:
//!
//! ```text
//! <root>/entities/<sha256>.val
//! <root>/entities/<sha256>.meta.json   {"original_key", "ttl", "expires_at", "stored_at"}
//! ```
//!
//! Expired pairs are dropped lazily on read and by an opportunistic sweep
//! that piggybacks on writes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::backends::CacheBackend;
use crate::cache::{codec, current_timestamp_ms, expiry_from_now, is_expired_at, pattern};
use crate::error::{CacheError, Result};

const VALUE_SUFFIX: &str = ".val";
const META_SUFFIX: &str = ".meta.json";
const TMP_SUFFIX: &str = ".tmp";
const ROOT_NAMESPACE_DIR: &str = "_root";

// == Sidecar ==
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct EntryMetadata {
    original_key: String,
    /// TTL in seconds the entry was stored with
    ttl: u64,
    /// Unix milliseconds
    expires_at: u64,
    stored_at: DateTime<Utc>,
}

impl EntryMetadata {
    fn is_expired(&self) -> bool {
        is_expired_at(self.expires_at, current_timestamp_ms())
    }
}

struct EntryPaths {
    dir: PathBuf,
    value: PathBuf,
    meta: PathBuf,
}

// == File Backend ==
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    sweep_interval: Duration,
    last_sweep_ms: AtomicU64,
}

impl FileBackend {
    /// Creates a backend rooted at `root`. Nothing touches the disk until the
    /// first operation or [`CacheBackend::health_check`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sweep_interval: Duration::from_secs(60),
            last_sweep_ms: AtomicU64::new(current_timestamp_ms()),
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    fn paths(&self, key: &str) -> EntryPaths {
        let dir = self.root.join(namespace_dir(key));
        let stem = hex::encode(Sha256::digest(key.as_bytes()));
        EntryPaths {
            value: dir.join(format!("{}{}", stem, VALUE_SUFFIX)),
            meta: dir.join(format!("{}{}", stem, META_SUFFIX)),
            dir,
        }
    }

    /// Reads a sidecar; `Ok(None)` when it does not exist.
    async fn read_meta(path: &Path) -> Result<Option<EntryMetadata>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a value/sidecar pair; returns whether the sidecar existed.
    async fn remove_pair(value: &Path, meta: &Path) -> Result<bool> {
        let existed = remove_if_exists(meta).await?;
        remove_if_exists(value).await?;
        Ok(existed)
    }

    /// Namespace directories a pattern can touch.
    async fn candidate_dirs(&self, key_pattern: &str) -> Result<Vec<PathBuf>> {
        let literal = pattern::literal_prefix(key_pattern);
        if literal.contains(pattern::SEPARATOR) || literal.len() == key_pattern.len() {
            return Ok(vec![self.root.join(namespace_dir(literal))]);
        }

        let mut dirs = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    /// Every sidecar under `dir`, paired with its value file path.
    async fn sidecars(dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut found = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(META_SUFFIX) {
                let value = dir.join(format!("{}{}", stem, VALUE_SUFFIX));
                found.push((entry.path(), value));
            }
        }
        Ok(found)
    }

    /// Live sidecars across the given directories.
    async fn live_entries(&self, dirs: &[PathBuf]) -> Result<Vec<EntryMetadata>> {
        let mut live = Vec::new();
        for dir in dirs {
            for (meta_path, _) in Self::sidecars(dir).await? {
                match Self::read_meta(&meta_path).await {
                    Ok(Some(meta)) if !meta.is_expired() => live.push(meta),
                    Ok(_) => {}
                    Err(e) => debug!(path = %meta_path.display(), error = %e, "Skipping unreadable sidecar"),
                }
            }
        }
        Ok(live)
    }

    /// Runs a sweep if the interval has elapsed since the last one. Only one
    /// concurrent writer wins the right to sweep.
    async fn maybe_sweep(&self) {
        let now = current_timestamp_ms();
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.sweep_interval.as_millis() as u64 {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        match self.sweep_expired().await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "File cache sweep removed expired entries"),
            Err(e) => warn!(error = %e, "File cache sweep failed"),
        }
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let paths = self.paths(key);
        let meta = match Self::read_meta(&paths.meta).await? {
            Some(meta) => meta,
            None => return Ok(None),
        };

        if meta.original_key != key {
            return Err(CacheError::Serialization(format!(
                "Sidecar for '{}' belongs to '{}'",
                key, meta.original_key
            )));
        }

        if meta.is_expired() {
            Self::remove_pair(&paths.value, &paths.meta).await?;
            return Ok(None);
        }

        match fs::read(&paths.value).await {
            Ok(bytes) => codec::decode(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: u64) -> Result<()> {
        let bytes = codec::encode(&value)?;
        let paths = self.paths(key);
        let now = current_timestamp_ms();
        let meta = EntryMetadata {
            original_key: key.to_string(),
            ttl: ttl_seconds,
            expires_at: expiry_from_now(now, ttl_seconds),
            stored_at: Utc::now(),
        };

        fs::create_dir_all(&paths.dir).await?;
        write_atomic(&paths.value, &bytes).await?;
        write_atomic(&paths.meta, &serde_json::to_vec_pretty(&meta)?).await?;

        self.maybe_sweep().await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let paths = self.paths(key);
        Self::remove_pair(&paths.value, &paths.meta).await
    }

    async fn keys(&self, key_pattern: &str) -> Result<Vec<String>> {
        let dirs = self.candidate_dirs(key_pattern).await?;
        Ok(self
            .live_entries(&dirs)
            .await?
            .into_iter()
            .map(|meta| meta.original_key)
            .filter(|key| pattern::matches(key_pattern, key))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        for dir in self.candidate_dirs("*").await? {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn size(&self) -> Result<usize> {
        let dirs = self.candidate_dirs("*").await?;
        Ok(self.live_entries(&dirs).await?.len())
    }

    async fn health_check(&self) -> bool {
        let probe = self.root.join(".health");
        let result: Result<()> = async {
            fs::create_dir_all(&self.root).await?;
            fs::write(&probe, b"ok").await?;
            fs::remove_file(&probe).await?;
            Ok::<(), CacheError>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "File cache directory is not usable");
                false
            }
        }
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for dir in self.candidate_dirs("*").await? {
            for (meta_path, value_path) in Self::sidecars(&dir).await? {
                let stale = match Self::read_meta(&meta_path).await {
                    Ok(Some(meta)) => meta.is_expired(),
                    Ok(None) => false,
                    // Unreadable sidecars can never be served again
                    Err(_) => true,
                };
                if stale && Self::remove_pair(&value_path, &meta_path).await? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

// == Helpers ==
/// Directory name for the key's first segment.
fn namespace_dir(key: &str) -> String {
    match key.split_once(pattern::SEPARATOR) {
        Some((ns, _)) => sanitize(ns),
        None => ROOT_NAMESPACE_DIR.to_string(),
    }
}

fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned == ROOT_NAMESPACE_DIR {
        format!("{}_", ROOT_NAMESPACE_DIR)
    } else {
        cleaned
    }
}

/// Writes through a temporary file and renames it into place, so readers
/// never observe a half-written file. Each write gets its own temporary name,
/// so concurrent writers of one key never share a file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(
        ".{}.{}{}",
        std::process::id(),
        NEXT_TMP.fetch_add(1, Ordering::Relaxed),
        TMP_SUFFIX
    ));
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
