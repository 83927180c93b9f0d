use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task;

use super::{Position, PositionObserver};
use crate::common::logger::Logger;

/// Flat-file JSON mirror of the open positions, keyed by asset id.
///
/// The file holds a pretty-printed array of [`Position`] records. Writes go
/// to a sibling temp file first and are renamed into place.
pub struct JsonPositionCache {
    path: PathBuf,
    write_lock: Mutex<()>,
    logger: Logger,
}

impl JsonPositionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            logger: Logger::new("Cache"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All cached records; an absent file is an empty cache.
    pub fn load(&self) -> Result<Vec<Position>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", self.path.display()))
    }

    fn store(&self, records: &[Position]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(records)?)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move {} into place", tmp.display()))?;
        Ok(())
    }

    /// Insert or replace the record for `position.asset_id`.
    pub fn upsert(&self, position: &Position) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.load()?;
        match records.iter_mut().find(|r| r.asset_id == position.asset_id) {
            Some(existing) => *existing = position.clone(),
            None => records.push(position.clone()),
        }
        self.store(&records)
    }

    /// Drop the record for `asset_id`; a missing record is not an error.
    pub fn remove(&self, asset_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|r| r.asset_id != asset_id);
        if records.len() == before {
            return Ok(());
        }
        self.store(&records)
    }
}

impl PositionObserver for JsonPositionCache {
    fn on_open(&self, position: &Position) {
        if let Err(e) = self.upsert(position) {
            self.logger.error(format!("Failed to cache {}: {:#}", position.asset_id, e));
        }
    }

    fn on_update(&self, position: &Position) {
        if let Err(e) = self.upsert(position) {
            self.logger.error(format!("Failed to update cache for {}: {:#}", position.asset_id, e));
        }
    }

    fn on_close(&self, asset_id: &str) {
        if let Err(e) = self.remove(asset_id) {
            self.logger.error(format!("Failed to drop {} from cache: {:#}", asset_id, e));
        }
    }
}

enum CacheOp {
    Upsert(Position),
    Remove(String),
    Flush(oneshot::Sender<()>),
}

/// Position observer that hands cache writes to a background task.
///
/// Observer callbacks only enqueue; the task applies the writes one at a
/// time, in the order they were queued, on tokio's blocking pool. Must be
/// spawned from inside a tokio runtime.
pub struct CacheWriter {
    tx: mpsc::UnboundedSender<CacheOp>,
    logger: Logger,
}

impl CacheWriter {
    pub fn spawn(cache: Arc<JsonPositionCache>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<CacheOp>();
        let logger = Logger::new("Cache");
        let task_logger = logger.clone();
        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                let cache = cache.clone();
                let written = match op {
                    CacheOp::Flush(done) => {
                        let _ = done.send(());
                        continue;
                    }
                    CacheOp::Upsert(position) => {
                        task::spawn_blocking(move || {
                            cache
                                .upsert(&position)
                                .with_context(|| format!("failed to cache {}", position.asset_id))
                        })
                        .await
                    }
                    CacheOp::Remove(asset_id) => {
                        task::spawn_blocking(move || {
                            cache
                                .remove(&asset_id)
                                .with_context(|| format!("failed to drop {} from cache", asset_id))
                        })
                        .await
                    }
                };
                match written {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => task_logger.error(format!("{:#}", e)),
                    Err(e) => task_logger.error(format!("Cache write panicked: {}", e)),
                }
            }
        });
        Self { tx, logger }
    }

    /// Resolves once every write queued before the call has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (done, applied) = oneshot::channel();
        self.tx
            .send(CacheOp::Flush(done))
            .map_err(|_| anyhow!("cache writer has stopped"))?;
        applied.await.context("cache writer has stopped")
    }

    fn submit(&self, op: CacheOp) {
        if self.tx.send(op).is_err() {
            self.logger.error("Cache writer has stopped, write dropped");
        }
    }
}

impl PositionObserver for CacheWriter {
    fn on_open(&self, position: &Position) {
        self.submit(CacheOp::Upsert(position.clone()));
    }

    fn on_update(&self, position: &Position) {
        self.submit(CacheOp::Upsert(position.clone()));
    }

    fn on_close(&self, asset_id: &str) {
        self.submit(CacheOp::Remove(asset_id.to_string()));
    }
}
