//! File-backed key-value store.
//!
//! Layout: `<root>/<namespace>/<key>.entry`, one file per key.
//! - Async I/O only (tokio)
//! - Writes land in a temp file first, then rename over the entry
//! - Every operation is timed out; transient errors are retried with backoff

use super::{KeyValueStore, StoreError};
use crate::utils::validation::validate_store_key;
use async_trait::async_trait;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::time::{timeout, Duration};

const OP_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    op_timeout: Duration,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>, namespace: &str) -> Result<Self, StoreError> {
        validate_store_key(namespace).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            dir: root.as_ref().join(namespace),
            op_timeout: OP_TIMEOUT,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_store_key(key).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(self.dir.join(format!("{key}.entry")))
    }

    /// Drop `<key>.entry.tmp-*` files left by a write that was cut off.
    async fn remove_stale_temps(&self, key: &str) {
        let prefix = format!("{key}.entry.tmp-");
        let Ok(mut rd) = tokio::fs::read_dir(&self.dir).await else {
            return;
        };
        while let Ok(Some(entry)) = rd.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                debug!(
                    "[PHASE: storage] [STEP: set] removing stale temp file {}",
                    entry.path().display()
                );
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
    }

    async fn write_once(&self, key: &str, path: &Path, value: &[u8]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        self.remove_stale_temps(key).await;
        let tmp = path.with_extension(format!("entry.tmp-{}", uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp, value).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

fn is_transient(err: &StoreError) -> bool {
    match err {
        StoreError::Timeout(_) => true,
        StoreError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::PermissionDenied
        ),
        StoreError::Unavailable(_) => false,
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.entry_path(key)?;
        match timeout(self.op_timeout, tokio::fs::read(&path)).await {
            Ok(Ok(bytes)) => Ok(Some(bytes)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.entry_path(key)?;
        let mut last_err: Option<StoreError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let started = Instant::now();
            let res = match timeout(self.op_timeout, self.write_once(key, &path, value)).await {
                Ok(r) => r,
                Err(_) => {
                    // The cut-off write may have left its temp file behind.
                    let _ = timeout(self.op_timeout, self.remove_stale_temps(key)).await;
                    Err(StoreError::Timeout(self.op_timeout))
                }
            };
            match res {
                Ok(()) => {
                    debug!(
                        "[PHASE: storage] [STEP: set] ok (key={}, bytes={}, attempt={}, duration_ms={})",
                        key,
                        value.len(),
                        attempt,
                        started.elapsed().as_millis()
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "[PHASE: storage] [STEP: set] failed (key={}, attempt={}, error={})",
                        key, attempt, e
                    );
                    let retry = is_transient(&e);
                    last_err = Some(e);
                    if !retry || attempt == MAX_ATTEMPTS {
                        break;
                    }
                }
            }
            let backoff_ms = 50_u64.saturating_mul(1_u64 << (attempt - 1));
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }

        Err(last_err.unwrap_or_else(|| StoreError::Unavailable("write failed".to_string())))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.entry_path(key)?;
        match timeout(self.op_timeout, tokio::fs::remove_file(&path)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.dir.display())
    }
}
