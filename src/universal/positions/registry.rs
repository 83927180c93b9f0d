use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::{Position, PositionError, PositionObserver};
use crate::common::logger::Logger;

/// Default re-entrancy window for duplicate opens of the same asset.
pub const DEFAULT_COOLDOWN_SECS: i64 = 24 * 3600;

/// In-memory store of open positions keyed by asset mint.
///
/// Every call takes the inner lock only for the map access itself, so each
/// operation is atomic on its own. Callers that need a read-evaluate-write
/// sequence (including an awaited exit swap) to be exclusive for an asset
/// hold that asset's lane from [`PositionStore::acquire_lane`] around it.
/// Lanes are per asset; different assets never contend.
pub struct PositionStore {
    inner: Mutex<HashMap<String, Position>>,
    lanes: DashMap<String, Arc<AsyncMutex<()>>>,
    observers: Vec<Arc<dyn PositionObserver>>,
    cooldown_secs: i64,
    logger: Logger,
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_SECS)
    }
}

impl PositionStore {
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            lanes: DashMap::new(),
            observers: Vec::new(),
            cooldown_secs,
            logger: Logger::new("Positions"),
        }
    }

    /// Register an observer for open/update/close notifications.
    pub fn with_observer(mut self, observer: Arc<dyn PositionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn cooldown_secs(&self) -> i64 {
        self.cooldown_secs
    }

    fn lock(&self, op: &str) -> Result<MutexGuard<'_, HashMap<String, Position>>, PositionError> {
        self.inner
            .lock()
            .map_err(|e| PositionError::Internal(format!("Mutex poisoned in {}: {}", op, e)))
    }

    /// Wait for exclusive use of `asset_id`'s serialization lane.
    pub async fn acquire_lane(&self, asset_id: &str) -> OwnedMutexGuard<()> {
        let lane = self
            .lanes
            .entry(asset_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lane.lock_owned().await
    }

    /// Drop `asset_id`'s lane when no position is open for it and nobody
    /// holds or waits on it. Returns whether the lane was removed.
    pub fn prune_lane(&self, asset_id: &str) -> bool {
        self.lanes
            .remove_if(asset_id, |_, lane| Arc::strong_count(lane) == 1 && !self.contains(asset_id))
            .is_some()
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Open a position for `asset_id`.
    ///
    /// Returns `Err(PositionError::DuplicateOpen)` when a position for the
    /// asset was opened less than the cooldown window before `opened_at`; an
    /// older one is replaced.
    pub fn open(
        &self,
        asset_id: &str,
        entry_price: f64,
        size: f64,
        decimals: u8,
        opened_at: i64,
    ) -> Result<Position, PositionError> {
        if !(entry_price.is_finite() && entry_price > 0.0) {
            return Err(PositionError::InvalidEntry(format!(
                "entry price {} for {}",
                entry_price, asset_id
            )));
        }
        if !(size.is_finite() && size > 0.0) {
            return Err(PositionError::InvalidEntry(format!("size {} for {}", size, asset_id)));
        }

        let position = Position::new(asset_id, entry_price, size, decimals, opened_at);
        let replaced = {
            let mut guard = self.lock("open")?;
            if let Some(existing) = guard.get(asset_id) {
                if opened_at < existing.opened_at + self.cooldown_secs {
                    return Err(PositionError::DuplicateOpen(asset_id.into(), existing.opened_at));
                }
            }
            guard.insert(asset_id.to_string(), position.clone())
        };

        if let Some(old) = replaced {
            self.logger.log(format!(
                "Replacing stale position for {} opened at {}",
                asset_id, old.opened_at
            ));
        }
        self.logger.log(format!(
            "Opened {}: entry={:.10} SOL size={}",
            asset_id, entry_price, size
        ));
        for observer in &self.observers {
            observer.on_open(&position);
        }
        Ok(position)
    }

    /// Restore positions loaded from the cache at startup.
    ///
    /// Bypasses the cooldown check; observers are notified so the feed picks
    /// the assets up again. Invalid records are skipped.
    pub fn rehydrate(&self, positions: Vec<Position>) -> usize {
        let mut restored = Vec::new();
        match self.lock("rehydrate") {
            Ok(mut guard) => {
                for position in positions {
                    if !(position.entry_price > 0.0 && position.size > 0.0) {
                        self.logger.warn(format!("Skipping invalid cached position {}", position.asset_id));
                        continue;
                    }
                    guard.insert(position.asset_id.clone(), position.clone());
                    restored.push(position);
                }
            }
            Err(e) => {
                self.logger.error(e.to_string());
                return 0;
            }
        }

        for position in &restored {
            for observer in &self.observers {
                observer.on_open(position);
            }
        }
        self.logger.log(format!("Rehydrated {} position(s)", restored.len()));
        restored.len()
    }

    /// Returns a clone of the current position for `asset_id`, if any.
    pub fn get(&self, asset_id: &str) -> Option<Position> {
        let guard = self.inner.lock().ok()?;
        guard.get(asset_id).cloned()
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.get(asset_id).is_some()
    }

    /// Snapshot of all open positions.
    pub fn list(&self) -> Vec<Position> {
        match self.inner.lock() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomic read-modify-write of an open position.
    ///
    /// Returns `Ok(None)` when the asset is not open. The stop price never
    /// regresses: a mutator that lowers it is clamped back and logged.
    pub fn update<F>(&self, asset_id: &str, mutator: F) -> Result<Option<Position>, PositionError>
    where
        F: FnOnce(&mut Position),
    {
        let (updated, changed) = {
            let mut guard = self.lock("update")?;
            let Some(position) = guard.get_mut(asset_id) else {
                return Ok(None);
            };
            let before_stop = position.stop_price;
            let before_index = position.ladder_index;

            mutator(&mut *position);

            if !(position.stop_price >= before_stop) {
                self.logger.warn(format!(
                    "Refusing to lower stop for {} from {:.10} to {:.10}",
                    asset_id, before_stop, position.stop_price
                ));
                position.stop_price = before_stop;
            }
            let changed = position.stop_price != before_stop || position.ladder_index != before_index;
            (position.clone(), changed)
        };

        if changed {
            for observer in &self.observers {
                observer.on_update(&updated);
            }
        }
        Ok(Some(updated))
    }

    /// Remove the position for `asset_id`.
    ///
    /// Idempotent: closing an asset that is not open is logged and returns
    /// `Ok(None)`.
    pub fn close(&self, asset_id: &str) -> Result<Option<Position>, PositionError> {
        let removed = self.lock("close")?.remove(asset_id);
        match &removed {
            Some(_) => {
                self.logger.log(format!("Closed {}", asset_id));
                for observer in &self.observers {
                    observer.on_close(asset_id);
                }
            }
            None => self.logger.debug(format!("Close for {} ignored, not open", asset_id)),
        }
        Ok(removed)
    }
}
