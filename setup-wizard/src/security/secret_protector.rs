// Encryption-at-rest for the persisted wizard form
//
// The saved form carries the database password and the admin password, so the file store can
// be wrapped in `EncryptedStore`:
// - Deterministic "is sealed?" detection via a byte prefix
// - Authenticated encryption using AES-256-GCM (nonce || ciphertext+tag)
// - Lazy, file-backed master key (base64) created on first use

use crate::storage::{KeyValueStore, StoreError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use log::warn;
use ring::rand::{SecureRandom, SystemRandom};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

const SEAL_PREFIX: &[u8] = b"ENCv1:";
const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

#[derive(Debug)]
pub struct SecretProtector {
    key_path: PathBuf,
    key: OnceCell<[u8; KEY_BYTES]>,
}

impl SecretProtector {
    pub fn new(key_path: PathBuf) -> Self {
        Self {
            key_path,
            key: OnceCell::new(),
        }
    }

    pub fn is_sealed(&self, value: &[u8]) -> bool {
        value.starts_with(SEAL_PREFIX)
    }

    pub async fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = *self.get_or_init_key().await?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| anyhow::anyhow!("Internal error: invalid AES-256 key length"))?;

        let mut nonce_bytes = [0u8; NONCE_BYTES];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;

        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| anyhow::anyhow!("Encryption failed"))?;

        let mut blob = Vec::with_capacity(SEAL_PREFIX.len() + NONCE_BYTES + ciphertext.len());
        blob.extend_from_slice(SEAL_PREFIX);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub async fn open(&self, value: &[u8]) -> Result<Vec<u8>> {
        if !self.is_sealed(value) {
            // Written before encryption was switched on: pass through.
            return Ok(value.to_vec());
        }

        let blob = &value[SEAL_PREFIX.len()..];
        if blob.len() < NONCE_BYTES {
            anyhow::bail!("Sealed value is too short");
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_BYTES);
        let nonce = Nonce::from_slice(nonce_bytes);

        let key = *self.get_or_init_key().await?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| anyhow::anyhow!("Internal error: invalid AES-256 key length"))?;

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow::anyhow!("Decryption failed (wrong key or tampered value)"))
    }

    async fn get_or_init_key(&self) -> Result<&[u8; KEY_BYTES]> {
        self.key
            .get_or_try_init(|| async {
                if tokio::fs::try_exists(&self.key_path).await.unwrap_or(false) {
                    return read_key_file(&self.key_path).await;
                }

                if let Some(parent) = self.key_path.parent() {
                    tokio::fs::create_dir_all(parent).await.with_context(|| {
                        format!("Failed to create key directory: {:?}", parent)
                    })?;
                }

                let mut key_bytes = [0u8; KEY_BYTES];
                SystemRandom::new()
                    .fill(&mut key_bytes)
                    .map_err(|_| anyhow::anyhow!("Failed to generate key"))?;

                let encoded = base64::engine::general_purpose::STANDARD.encode(key_bytes);
                let write_action = || async {
                    // create_new: never clobber a key another process just wrote.
                    let mut opts = tokio::fs::OpenOptions::new();
                    opts.write(true).create_new(true);
                    let mut file = opts.open(&self.key_path).await.with_context(|| {
                        format!("Failed to create key file: {:?}", self.key_path)
                    })?;
                    use tokio::io::AsyncWriteExt;
                    file.write_all(encoded.as_bytes()).await?;
                    file.flush().await?;
                    Ok::<(), anyhow::Error>(())
                };

                let retry_strategy = ExponentialBackoff::from_millis(50)
                    .factor(2)
                    .max_delay(std::time::Duration::from_millis(750))
                    .take(3)
                    .map(jitter);

                if let Err(e) =
                    RetryIf::spawn(retry_strategy, write_action, is_transient_io_error).await
                {
                    // Lost a create race: the other writer's key is the one on disk.
                    if tokio::fs::try_exists(&self.key_path).await.unwrap_or(false) {
                        return read_key_file(&self.key_path).await;
                    }
                    return Err(e);
                }
                Ok(key_bytes)
            })
            .await
    }
}

async fn read_key_file(path: &Path) -> Result<[u8; KEY_BYTES]> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read key file: {:?}", path))?;
    let text = String::from_utf8_lossy(&bytes);
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .context("Failed to decode key file (base64)")?;
    if decoded.len() != KEY_BYTES {
        anyhow::bail!("Key file has invalid length (expected {KEY_BYTES} bytes)");
    }
    let mut key = [0u8; KEY_BYTES];
    key.copy_from_slice(&decoded);
    Ok(key)
}

fn is_transient_io_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("used by another process")
        || msg.contains("access is denied")
        || msg.contains("sharing violation")
        || msg.contains("resource busy")
}

/// Key file location next to the store's namespace directories.
pub fn default_key_path(store_root: &Path) -> PathBuf {
    store_root.join("secrets").join("wizard_master_key.b64")
}

/// Store wrapper that seals every value before it reaches `inner`.
pub struct EncryptedStore<S> {
    inner: S,
    protector: SecretProtector,
}

impl<S: KeyValueStore> EncryptedStore<S> {
    pub fn new(inner: S, protector: SecretProtector) -> Self {
        Self { inner, protector }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for EncryptedStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(raw) = self.inner.get(key).await? else {
            return Ok(None);
        };
        match self.protector.open(&raw).await {
            Ok(plain) => Ok(Some(plain)),
            Err(e) => {
                warn!(
                    "[PHASE: storage] [STEP: decrypt] Stored value could not be opened (key={}): {}",
                    key, e
                );
                Err(StoreError::Unavailable(e.to_string()))
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let sealed = self
            .protector
            .seal(value)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.inner.set(key, &sealed).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    fn describe(&self) -> String {
        format!("encrypted({})", self.inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn seal_open_roundtrip_and_key_reuse() {
        let tmp = tempfile::tempdir().unwrap();
        let key_path = default_key_path(tmp.path());

        let first = SecretProtector::new(key_path.clone());
        let sealed = first.seal(b"{\"password\":\"secret1\"}").await.unwrap();
        assert!(first.is_sealed(&sealed));
        assert!(!sealed.windows(7).any(|w| w == b"secret1"));
        assert!(key_path.exists());

        // A fresh protector picks up the key file from disk.
        let second = SecretProtector::new(key_path);
        let opened = second.open(&sealed).await.unwrap();
        assert_eq!(opened, b"{\"password\":\"secret1\"}".to_vec());
    }

    #[tokio::test]
    async fn plaintext_values_pass_through() {
        let tmp = tempfile::tempdir().unwrap();
        let protector = SecretProtector::new(default_key_path(tmp.path()));
        assert_eq!(protector.open(b"{}").await.unwrap(), b"{}".to_vec());
    }

    #[tokio::test]
    async fn tampered_value_fails_to_open() {
        let tmp = tempfile::tempdir().unwrap();
        let protector = SecretProtector::new(default_key_path(tmp.path()));
        let mut sealed = protector.seal(b"payload").await.unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(protector.open(&sealed).await.is_err());
    }

    struct SharedStore(Arc<MemoryStore>);

    #[async_trait]
    impl KeyValueStore for SharedStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            self.0.set(key, value).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key).await
        }
    }

    #[tokio::test]
    async fn encrypted_store_seals_values_at_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let backing = Arc::new(MemoryStore::new());
        let store = EncryptedStore::new(
            SharedStore(Arc::clone(&backing)),
            SecretProtector::new(default_key_path(tmp.path())),
        );

        store.set("form", b"hunter22").await.unwrap();
        let raw = backing.get("form").await.unwrap().unwrap();
        assert!(raw.starts_with(SEAL_PREFIX));
        assert_eq!(store.get("form").await.unwrap(), Some(b"hunter22".to_vec()));

        store.delete("form").await.unwrap();
        assert_eq!(store.get("form").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreadable_sealed_value_reports_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let backing = Arc::new(MemoryStore::new());
        backing.set("form", b"ENCv1:short").await.unwrap();
        let store = EncryptedStore::new(
            SharedStore(Arc::clone(&backing)),
            SecretProtector::new(default_key_path(tmp.path())),
        );
        assert!(matches!(
            store.get("form").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
