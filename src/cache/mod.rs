//! Shadow cache: last-known values, mirrored to a single JSON file.
//!
//! The in-memory map is the source of truth; the file is a best-effort
//! mirror written by one background task. Every mutation fires a one-slot
//! wakeup channel, so bursts of updates coalesce into a single disk write.
//! Disk failures are logged and counted, never surfaced to callers.

#[cfg(test)]
mod cache_test;

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::kv::Value;
use crate::metrics::CACHE_DISK_READ_ERRORS;
use crate::metrics::CACHE_DISK_WRITE_ERRORS;

/// On-disk representation: a single JSON object keyed by fully-qualified key.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    values: HashMap<String, Value>,
}

#[derive(Serialize)]
struct CacheFileRef<'a> {
    values: &'a HashMap<String, Value>,
}

pub(crate) struct ValueCache {
    values: RwLock<HashMap<String, Value>>,
    notify_tx: mpsc::Sender<()>,
    file: Option<PathBuf>,
}

impl ValueCache {
    /// Builds the cache and, when a file path is configured, loads the
    /// previous snapshot and spawns the persister task.
    ///
    /// Load failures leave the cache empty; they never fail construction.
    pub(crate) async fn open(
        file: Option<PathBuf>,
        dir_mode: u32,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let (notify_tx, notify_rx) = mpsc::channel(1);

        let mut values = HashMap::new();
        if let Some(path) = &file {
            match load_from_file(path, dir_mode).await {
                Ok(loaded) => {
                    info!(file = %path.display(), entries = loaded.len(), "loaded cache from file");
                    values = loaded;
                }
                Err(e) => {
                    CACHE_DISK_READ_ERRORS.inc();
                    warn!(file = %path.display(), error = %e, "could not load cache from file");
                }
            }
        }

        let cache = Arc::new(Self {
            values: RwLock::new(values),
            notify_tx,
            file,
        });

        if cache.file.is_some() {
            tokio::spawn(persist_loop(cache.clone(), notify_rx, shutdown_rx));
        }

        cache
    }

    pub(crate) fn get(
        &self,
        key: &str,
    ) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Stores `value` iff the key is absent or `value` is strictly newer,
    /// waking the persister on change.
    pub(crate) fn merge_if_newer(
        &self,
        key: &str,
        value: &Value,
    ) {
        let mut values = self.values.write();

        let stale = match values.get(key) {
            Some(current) => value.is_newer(current),
            None => true,
        };
        if stale {
            values.insert(key.to_string(), value.clone());
            self.notify_update();
        }
    }

    /// Removes the entry, waking the persister only if it existed.
    pub(crate) fn delete(
        &self,
        key: &str,
    ) {
        let mut values = self.values.write();

        if values.remove(key).is_some() {
            self.notify_update();
        }
    }

    /// One-slot, non-blocking wakeup: many mutations collapse into one write.
    fn notify_update(&self) {
        let _ = self.notify_tx.try_send(());
    }

    async fn write_to_file(&self) -> std::io::Result<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };

        let encoded = {
            let values = self.values.read();
            serde_json::to_vec(&CacheFileRef { values: &values })
                .map_err(std::io::Error::other)?
        };

        // Write-then-rename keeps a crash from leaving a torn file behind.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &encoded).await?;
        tokio::fs::rename(&tmp, path).await?;

        Ok(())
    }
}

/// Creates the cache directory with the configured mode, then decodes the
/// snapshot file.
async fn load_from_file(
    path: &Path,
    dir_mode: u32,
) -> std::io::Result<HashMap<String, Value>> {
    if let Some(dir) = path.parent() {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(dir_mode);
        }
        #[cfg(not(unix))]
        let _ = dir_mode;
        builder.create(dir)?;
    }

    let raw = tokio::fs::read(path).await?;
    let decoded: CacheFile = serde_json::from_slice(&raw).map_err(std::io::Error::other)?;

    Ok(decoded.values)
}

/// Single-writer persistence task: waits on the wakeup channel, mirrors the
/// map to disk, and performs a final flush at shutdown.
async fn persist_loop(
    cache: Arc<ValueCache>,
    mut notify_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if let Err(e) = cache.write_to_file().await {
                    CACHE_DISK_WRITE_ERRORS.inc();
                    warn!(error = %e, "final cache flush failed");
                }
                debug!("cache persister stopped");
                return;
            }
            received = notify_rx.recv() => {
                match received {
                    Some(()) => {
                        if let Err(e) = cache.write_to_file().await {
                            CACHE_DISK_WRITE_ERRORS.inc();
                            warn!(error = %e, "failed to write cache to file");
                        }
                    }
                    None => {
                        debug!("cache wakeup channel closed, persister stopping");
                        return;
                    }
                }
            }
        }
    }
}
