//! Form state container.
//!
//! Owns the live `WizardFormState` and is the only code that talks to the key-value store.
//! Saves are fire-and-forget from the caller's point of view, but they all go through one
//! writer task per container:
//! - snapshots are written in the order they were issued
//! - a snapshot superseded before it reaches the store is dropped
//! - `clear()` and `flush()` are sequenced behind every earlier save

use super::persistence::{decode_entry, encode_entry};
use crate::models::form::{FieldUpdate, WizardFormState};
use crate::security::crypto::blob_fingerprint;
use crate::storage::KeyValueStore;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};

enum WriterCmd {
    Save(WizardFormState),
    Flush(oneshot::Sender<()>),
    Clear(oneshot::Sender<()>),
}

pub struct FormContainer {
    state: WizardFormState,
    defaults: WizardFormState,
    store: Arc<dyn KeyValueStore>,
    key: String,
    writer: mpsc::UnboundedSender<WriterCmd>,
    ready: watch::Sender<bool>,
}

impl FormContainer {
    /// Must be called from within a tokio runtime (spawns the writer task).
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        defaults: WizardFormState,
        save_debounce: Duration,
    ) -> Self {
        let key = key.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(
            Arc::clone(&store),
            key.clone(),
            rx,
            save_debounce,
        ));
        let (ready, _) = watch::channel(false);

        Self {
            state: defaults.clone(),
            defaults,
            store,
            key,
            writer: tx,
            ready,
        }
    }

    /// Read the persisted entry. Absent, unreadable, or malformed entries yield the defaults.
    pub async fn load(&mut self) -> &WizardFormState {
        let started = Instant::now();
        // Anything this container already issued must land before we read back.
        self.flush().await;

        let loaded = match self.store.get(&self.key).await {
            Ok(Some(bytes)) => match decode_entry(&bytes) {
                Ok(state) => {
                    info!(
                        "[PHASE: wizard] [STEP: load] Restored saved form (store={}, key={}, fingerprint={})",
                        self.store.describe(),
                        self.key,
                        blob_fingerprint(&bytes)
                    );
                    state
                }
                Err(e) => {
                    warn!(
                        "[PHASE: wizard] [STEP: load] Discarding malformed saved form (key={}): {}",
                        self.key, e
                    );
                    self.defaults.clone()
                }
            },
            Ok(None) => {
                info!(
                    "[PHASE: wizard] [STEP: load] No saved form (store={}, key={}); starting fresh",
                    self.store.describe(),
                    self.key
                );
                self.defaults.clone()
            }
            Err(e) => {
                warn!(
                    "[PHASE: wizard] [STEP: load] Storage unavailable, starting fresh (key={}): {}",
                    self.key, e
                );
                self.defaults.clone()
            }
        };

        self.state = loaded;
        self.ready.send_replace(true);
        debug!(
            "[PHASE: wizard] [STEP: load] ready (duration_ms={})",
            started.elapsed().as_millis()
        );
        &self.state
    }

    pub fn state(&self) -> &WizardFormState {
        &self.state
    }

    /// True once the first `load()` has resolved.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Overwrite one field and queue a save of the full state.
    pub fn update_field(&mut self, update: FieldUpdate) {
        debug!(
            "[PHASE: wizard] [STEP: update_field] {}.{}",
            update.section(),
            update.field_name()
        );
        self.state.apply(update);
        if self
            .writer
            .send(WriterCmd::Save(self.state.clone()))
            .is_err()
        {
            warn!("[PHASE: wizard] [STEP: save] Writer task is gone; edit kept in memory only");
        }
    }

    /// Wait until every save issued so far has been attempted.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer.send(WriterCmd::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Delete the persisted entry. The in-memory state is left as it is.
    pub async fn clear(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer.send(WriterCmd::Clear(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_writer(
    store: Arc<dyn KeyValueStore>,
    key: String,
    mut rx: mpsc::UnboundedReceiver<WriterCmd>,
    debounce: Duration,
) {
    while let Some(cmd) = rx.recv().await {
        let snapshot = match cmd {
            WriterCmd::Save(snapshot) => snapshot,
            other => {
                handle_control(store.as_ref(), &key, other).await;
                continue;
            }
        };

        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }

        // Coalesce: keep only the newest snapshot queued ahead of the next control command.
        let mut latest = snapshot;
        let mut superseded = 0usize;
        let mut next_control = None;
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                WriterCmd::Save(s) => {
                    latest = s;
                    superseded += 1;
                }
                other => {
                    next_control = Some(other);
                    break;
                }
            }
        }

        write_snapshot(store.as_ref(), &key, &latest, superseded).await;

        if let Some(cmd) = next_control {
            handle_control(store.as_ref(), &key, cmd).await;
        }
    }
    debug!("[PHASE: wizard] [STEP: writer] Writer stopped (key={})", key);
}

async fn write_snapshot(
    store: &dyn KeyValueStore,
    key: &str,
    state: &WizardFormState,
    superseded: usize,
) {
    let bytes = match encode_entry(state) {
        Ok(b) => b,
        Err(e) => {
            warn!(
                "[PHASE: wizard] [STEP: save] Failed to encode form (key={}): {}",
                key, e
            );
            return;
        }
    };
    match store.set(key, &bytes).await {
        Ok(()) => debug!(
            "[PHASE: wizard] [STEP: save] Saved form (key={}, bytes={}, superseded={}, fingerprint={})",
            key,
            bytes.len(),
            superseded,
            blob_fingerprint(&bytes)
        ),
        // Best effort: the next edit saves the full state again.
        Err(e) => warn!(
            "[PHASE: wizard] [STEP: save] Save failed; will retry on next edit (key={}): {}",
            key, e
        ),
    }
}

async fn handle_control(store: &dyn KeyValueStore, key: &str, cmd: WriterCmd) {
    match cmd {
        WriterCmd::Flush(done) => {
            let _ = done.send(());
        }
        WriterCmd::Clear(done) => {
            match store.delete(key).await {
                Ok(()) => info!("[PHASE: wizard] [STEP: clear] Saved form removed (key={})", key),
                Err(e) => warn!(
                    "[PHASE: wizard] [STEP: clear] Failed to remove saved form (key={}): {}",
                    key, e
                ),
            }
            let _ = done.send(());
        }
        WriterCmd::Save(_) => {}
    }
}
