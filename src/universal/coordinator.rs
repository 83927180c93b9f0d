//! Ingress coordinator.
//!
//! Routes classified trades into the position store and price samples through
//! the ratchet into the exit executor. All work for one asset runs under that
//! asset's store lane, so an open, an evaluation and an exit swap for the same
//! asset never interleave; different assets proceed independently. A lane is
//! dropped again once its asset has no position and nobody is waiting on it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};

use crate::common::logger::Logger;
use crate::universal::classifier::{self, TradeEvent, TransactionRecord};
use crate::universal::executor::{ExitExecutor, ExitOrder, ExitReceipt};
use crate::universal::positions::{Position, PositionError, PositionStore};
use crate::universal::price_feed::{PriceFeed, PriceSample};
use crate::universal::ratchet::{self, ExitDecision, ExitStrategy};

/// What happened to one price sample.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleOutcome {
    /// Invalid price; nothing evaluated.
    Ignored,
    /// No open position for the asset (never opened or already closed).
    NoPosition,
    Held,
    StopRaised { ladder_index: usize, stop_price: f64 },
    /// Exit confirmed; the position is closed (or reduced, for a partial exit).
    Liquidated(ExitReceipt),
    /// Exit failed; the position stays open for the next sample to retry.
    ExitFailed,
}

pub struct Coordinator {
    store: Arc<PositionStore>,
    strategy: ExitStrategy,
    executor: Arc<dyn ExitExecutor>,
    feed: Option<Arc<dyn PriceFeed>>,
    observer_wallet: Option<String>,
    dex_programs: Vec<String>,
    fee_offset: f64,
    logger: Logger,
}

impl Coordinator {
    pub fn new(store: Arc<PositionStore>, strategy: ExitStrategy, executor: Arc<dyn ExitExecutor>) -> Self {
        Self {
            store,
            strategy,
            executor,
            feed: None,
            observer_wallet: None,
            dex_programs: Vec::new(),
            fee_offset: 0.0,
            logger: Logger::new("Coordinator"),
        }
    }

    /// Only trades by `wallet` open positions. Unset, each transaction's fee
    /// payer is the observer.
    pub fn with_observer_wallet(mut self, wallet: Option<String>) -> Self {
        self.observer_wallet = wallet;
        self
    }

    /// Feed to ask for a fresh quote after a failed exit, so the retry does
    /// not wait for the price to move.
    pub fn with_feed(mut self, feed: Arc<dyn PriceFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Only transactions referencing one of `programs` are trades. Empty
    /// accepts every transaction.
    pub fn with_dex_programs(mut self, programs: Vec<String>) -> Self {
        self.dex_programs = programs;
        self
    }

    /// Fixed SOL fee subtracted from a trade's base leg before computing the
    /// entry price.
    pub fn with_fee_offset(mut self, fee_offset: f64) -> Self {
        self.fee_offset = fee_offset;
        self
    }

    pub fn store(&self) -> &Arc<PositionStore> {
        &self.store
    }

    pub fn strategy(&self) -> &ExitStrategy {
        &self.strategy
    }

    pub fn touches_dex(&self, record: &TransactionRecord) -> bool {
        self.dex_programs.is_empty() || record.references_any(&self.dex_programs)
    }

    /// Classify a raw transaction and open a position if it is an acquisition.
    pub async fn handle_transaction(&self, record: &TransactionRecord) -> Option<Position> {
        if !self.touches_dex(record) {
            self.logger.debug("Transaction did not interact with a known DEX");
            return None;
        }
        let wallet = match self.observer_wallet.as_deref().or_else(|| record.fee_payer()) {
            Some(wallet) => wallet.to_string(),
            None => {
                self.logger.debug("Transaction without account keys skipped");
                return None;
            }
        };
        let event = classifier::classify(record, &wallet)?;
        self.handle_event(&event).await
    }

    /// Open a position for an acquisition event; disposals are logged only.
    pub async fn handle_event(&self, event: &TradeEvent) -> Option<Position> {
        if !event.is_acquisition() {
            self.logger.debug(format!(
                "{:?} of {} ({}) does not open a position",
                event.direction, event.asset_id, event.asset_amount
            ));
            return None;
        }
        let Some(entry_price) = event.entry_price(self.fee_offset) else {
            self.logger.warn(format!(
                "No usable entry price for {}: base={} amount={} fee={}",
                event.asset_id, event.base_amount, event.asset_amount, self.fee_offset
            ));
            return None;
        };
        let opened_at = if event.timestamp > 0 {
            event.timestamp
        } else {
            Utc::now().timestamp()
        };

        let lane = self.store.acquire_lane(&event.asset_id).await;
        let opened = self
            .store
            .open(&event.asset_id, entry_price, event.asset_amount, event.decimals, opened_at);
        drop(lane);
        match opened {
            Ok(position) => Some(position),
            Err(PositionError::DuplicateOpen(asset_id, at)) => {
                self.logger.debug(format!(
                    "Duplicate open for {} ignored (existing opened at {})",
                    asset_id, at
                ));
                None
            }
            Err(e) => {
                self.logger.error(format!("Failed to open {}: {}", event.asset_id, e));
                self.store.prune_lane(&event.asset_id);
                None
            }
        }
    }

    /// Run one price sample through the ratchet for its asset.
    ///
    /// The ratchet works on a copy of the position. Hold and stop-raise
    /// results are committed; a liquidation is committed only once the
    /// executor confirms it, so a failed exit leaves the stored state as it
    /// was, the feed is asked to re-send the price and the next sample
    /// re-evaluates from there.
    pub async fn handle_sample(&self, sample: PriceSample) -> SampleOutcome {
        if !sample.is_valid() {
            self.logger.warn(format!(
                "Ignoring invalid price {} for {}",
                sample.price, sample.asset_id
            ));
            return SampleOutcome::Ignored;
        }

        let outcome = {
            let _lane = self.store.acquire_lane(&sample.asset_id).await;
            self.evaluate_locked(&sample).await
        };
        match outcome {
            SampleOutcome::NoPosition | SampleOutcome::Liquidated(_) => {
                self.store.prune_lane(&sample.asset_id);
            }
            SampleOutcome::ExitFailed => {
                if let Some(feed) = &self.feed {
                    feed.refresh(&sample.asset_id);
                }
            }
            _ => {}
        }
        outcome
    }

    async fn evaluate_locked(&self, sample: &PriceSample) -> SampleOutcome {
        let asset_id = sample.asset_id.as_str();
        let Some(current) = self.store.get(asset_id) else {
            return SampleOutcome::NoPosition;
        };
        let mut candidate = current.clone();
        let decision = ratchet::evaluate(&mut candidate, sample.price, &self.strategy);

        match decision {
            ExitDecision::Skip => SampleOutcome::Ignored,
            ExitDecision::Hold => {
                self.commit(&candidate);
                SampleOutcome::Held
            }
            ExitDecision::StopRaised {
                ladder_index,
                stop_price,
            } => {
                self.logger.log(format!(
                    "{} crossed rung {} at {:.10} ({:.2}x), stop now {:.10}",
                    asset_id,
                    ladder_index,
                    sample.price,
                    candidate.multiple(sample.price),
                    stop_price
                ));
                self.commit(&candidate);
                SampleOutcome::StopRaised {
                    ladder_index,
                    stop_price,
                }
            }
            ExitDecision::Liquidate { fraction, reason } => {
                let order = ExitOrder {
                    asset_id: asset_id.to_string(),
                    amount: candidate.size * fraction,
                    decimals: candidate.decimals,
                    reason,
                    trigger_price: sample.price,
                };
                self.logger.log(format!(
                    "Liquidating {} of {} at {:.10} ({:.2}x): {:?}",
                    order.amount,
                    asset_id,
                    sample.price,
                    candidate.multiple(sample.price),
                    reason
                ));

                match self.executor.liquidate(&order).await {
                    Ok(receipt) => {
                        self.settle(&candidate, fraction);
                        SampleOutcome::Liquidated(receipt)
                    }
                    Err(e) => {
                        self.logger.error(format!(
                            "Exit for {} failed, keeping position open: {:#}",
                            asset_id, e
                        ));
                        SampleOutcome::ExitFailed
                    }
                }
            }
        }
    }

    fn commit(&self, candidate: &Position) {
        let result = self.store.update(&candidate.asset_id, |p| {
            p.ladder_index = candidate.ladder_index;
            p.stop_price = candidate.stop_price;
            p.last_price = candidate.last_price;
        });
        if let Err(e) = result {
            self.logger.error(format!("Failed to update {}: {}", candidate.asset_id, e));
        }
    }

    fn settle(&self, candidate: &Position, fraction: f64) {
        let result = if fraction >= 1.0 {
            self.store.close(&candidate.asset_id).map(|_| ())
        } else {
            let sold = candidate.size * fraction;
            self.store
                .update(&candidate.asset_id, |p| {
                    p.size -= sold;
                    p.ladder_index = candidate.ladder_index;
                    p.stop_price = candidate.stop_price;
                    p.last_price = candidate.last_price;
                })
                .map(|_| ())
        };
        if let Err(e) = result {
            self.logger.error(format!("Failed to settle exit for {}: {}", candidate.asset_id, e));
        }
    }

    /// Drop a position without selling it.
    pub async fn cancel(&self, asset_id: &str) -> Option<Position> {
        let removed = {
            let _lane = self.store.acquire_lane(asset_id).await;
            match self.store.close(asset_id) {
                Ok(removed) => removed,
                Err(e) => {
                    self.logger.error(format!("Failed to cancel {}: {}", asset_id, e));
                    None
                }
            }
        };
        self.store.prune_lane(asset_id);
        removed
    }

    /// Consume samples until the channel closes.
    ///
    /// Each asset gets its own worker task. A worker only ever holds the
    /// latest sample for its asset: samples that arrive while it is busy
    /// replace each other and the newest one is evaluated next. A worker
    /// exits once its position is gone and is respawned by the next sample.
    pub async fn run(self: Arc<Self>, mut samples: mpsc::Receiver<PriceSample>) {
        let mut workers: HashMap<String, watch::Sender<PriceSample>> = HashMap::new();

        while let Some(sample) = samples.recv().await {
            let sample = match workers.get(&sample.asset_id) {
                Some(worker) => match worker.send(sample) {
                    Ok(()) => continue,
                    Err(watch::error::SendError(sample)) => sample,
                },
                None => sample,
            };

            workers.retain(|_, worker| !worker.is_closed());
            let asset_id = sample.asset_id.clone();
            let (tx, rx) = watch::channel(sample);
            tokio::spawn(self.clone().drain(rx));
            workers.insert(asset_id, tx);
        }
        self.logger.log("Sample channel closed, coordinator stopping");
    }

    async fn drain(self: Arc<Self>, mut rx: watch::Receiver<PriceSample>) {
        loop {
            let sample = rx.borrow_and_update().clone();
            let asset_id = sample.asset_id.clone();
            let finished = match self.handle_sample(sample).await {
                SampleOutcome::NoPosition => true,
                SampleOutcome::Liquidated(_) => !self.store.contains(&asset_id),
                _ => false,
            };
            if finished {
                if !rx.has_changed().unwrap_or(false) {
                    break;
                }
            } else if rx.changed().await.is_err() {
                break;
            }
        }
    }
}
