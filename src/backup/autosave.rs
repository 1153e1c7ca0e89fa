//! Debounced settings persistence.
//!
//! Front ends submit every edit; the saver thread only writes once edits stop arriving for
//! the debounce delay, and always flushes the last pending value on shutdown.

use crate::backup::settings::{JsonSettingsStore, Settings};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

pub struct AutoSaver {
    tx: Option<Sender<Settings>>,
    handle: Option<JoinHandle<()>>,
}

impl AutoSaver {
    pub fn spawn(store: JsonSettingsStore) -> std::io::Result<Self> {
        Self::with_debounce(store, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(store: JsonSettingsStore, debounce: Duration) -> std::io::Result<Self> {
        let (tx, rx) = channel();
        let handle = std::thread::Builder::new()
            .name("settings-autosave".into())
            .spawn(move || save_loop(&store, rx, debounce))?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Replaces any value still waiting to be written.
    pub fn submit(&self, settings: Settings) {
        if let Some(tx) = &self.tx {
            if tx.send(settings).is_err() {
                error!("Settings autosave thread is gone, change not persisted");
            }
        }
    }

    /// Flushes the pending value and waits for the saver thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Settings autosave thread panicked");
            }
        }
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn save_loop(store: &JsonSettingsStore, rx: Receiver<Settings>, debounce: Duration) {
    let mut pending: Option<Settings> = None;
    loop {
        let received = match pending {
            Some(_) => rx.recv_timeout(debounce),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(settings) => {
                debug!("Settings change queued for saving");
                pending = Some(settings);
            }
            Err(RecvTimeoutError::Timeout) => persist(store, pending.take()),
            Err(RecvTimeoutError::Disconnected) => {
                persist(store, pending.take());
                break;
            }
        }
    }
}

fn persist(store: &JsonSettingsStore, settings: Option<Settings>) {
    if let Some(settings) = settings {
        if let Err(e) = store.save(&settings) {
            error!("Auto-save settings failed: {e}");
        }
    }
}
