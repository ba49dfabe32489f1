//! The stock ledger: the only code path that moves stock counters.
//!
//! Each key's counters live in one `StockItem` stream. Every operation is a
//! load/decide/append-at-version cycle, retried on conflict, so operations on the same key
//! are linearizable while different keys never contend.
//!
//! Loads start from the last state this ledger saw for the key and replay only the events
//! appended since, so a hot key costs one short tail read per operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use stockcart_core::AggregateId;
use stockcart_infra::{apply_committed, Attempt, DispatchError, RetryError, RetryPolicy, SnapshotCache};
use stockcart_inventory::{
    CommitStock, RegisterStock, ReleaseStock, ReserveStock, RestockItem, StockCommand, StockItem,
    StockKey, StockLevels, AGGREGATE_TYPE,
};

use crate::error::{with_not_found, CartError};
use crate::services::Dispatcher;

fn make_stock(id: AggregateId) -> StockItem {
    StockItem::empty(StockKey(id))
}

pub struct StockLedger {
    dispatcher: Arc<Dispatcher>,
    retry: RetryPolicy,
    settle: RetryPolicy,
    snapshots: SnapshotCache<StockItem>,
}

impl StockLedger {
    pub fn new(dispatcher: Arc<Dispatcher>, retry: RetryPolicy, settle: RetryPolicy) -> Self {
        Self {
            dispatcher,
            retry,
            settle,
            snapshots: SnapshotCache::new(),
        }
    }

    /// Create counters for `key` with `initial` available units.
    pub fn register(&self, key: StockKey, initial: i64) -> Result<StockLevels, CartError> {
        self.execute("register", key, &self.retry, |occurred_at| {
            StockCommand::Register(RegisterStock {
                key,
                initial,
                occurred_at,
            })
        })
    }

    /// Receive `quantity` more units into `available`.
    pub fn restock(&self, key: StockKey, quantity: i64) -> Result<StockLevels, CartError> {
        self.execute("restock", key, &self.retry, |occurred_at| {
            StockCommand::Restock(RestockItem {
                key,
                quantity,
                occurred_at,
            })
        })
    }

    /// Move `quantity` from available to reserved, or fail with `InsufficientStock` and
    /// change nothing.
    pub fn reserve(&self, key: StockKey, quantity: i64) -> Result<StockLevels, CartError> {
        self.execute("reserve", key, &self.retry, |occurred_at| {
            StockCommand::Reserve(ReserveStock {
                key,
                quantity,
                occurred_at,
            })
        })
    }

    /// Return `quantity` reserved units to available.
    pub fn release(&self, key: StockKey, quantity: i64) -> Result<StockLevels, CartError> {
        self.execute("release", key, &self.settle, |occurred_at| {
            StockCommand::Release(ReleaseStock {
                key,
                quantity,
                occurred_at,
            })
        })
    }

    /// Consume `quantity` reserved units permanently.
    pub fn commit(&self, key: StockKey, quantity: i64) -> Result<StockLevels, CartError> {
        self.execute("commit", key, &self.settle, |occurred_at| {
            StockCommand::Commit(CommitStock {
                key,
                quantity,
                occurred_at,
            })
        })
    }

    /// Release units a cart has already given up.
    ///
    /// The cart side is committed by the time this runs, so contention never ends it: rounds
    /// of the settle policy repeat until the release lands or fails for another reason.
    pub(crate) fn release_owed(&self, key: StockKey, quantity: i64) -> Result<StockLevels, CartError> {
        self.until_settled("release", key, || self.release(key, quantity))
    }

    /// Commit units of a cart that has already been checked out. Same contract as
    /// `release_owed`.
    pub(crate) fn commit_owed(&self, key: StockKey, quantity: i64) -> Result<StockLevels, CartError> {
        self.until_settled("commit", key, || self.commit(key, quantity))
    }

    fn until_settled(
        &self,
        op: &'static str,
        key: StockKey,
        settle: impl Fn() -> Result<StockLevels, CartError>,
    ) -> Result<StockLevels, CartError> {
        let mut round: u32 = 1;
        loop {
            match settle() {
                Err(CartError::ConcurrentModification) => {
                    warn!(op, %key, round, "stock still contended, settling again");
                    round = round.saturating_add(1);
                    std::thread::yield_now();
                }
                other => return other,
            }
        }
    }

    pub fn get_levels(&self, key: StockKey) -> Result<StockLevels, CartError> {
        let item = self.load(key)?;
        if !item.is_registered() {
            return Err(CartError::StockNotFound);
        }
        Ok(item.levels())
    }

    fn load(&self, key: StockKey) -> Result<StockItem, CartError> {
        let Some(mut item) = self.snapshots.get(key.0) else {
            let item = self.dispatcher.load(AGGREGATE_TYPE, key.0, make_stock)?;
            self.remember(&item);
            return Ok(item);
        };

        if let Err(err) = self.dispatcher.catch_up(&mut item, AGGREGATE_TYPE, key.0) {
            self.snapshots.evict(key.0);
            return Err(err.into());
        }
        self.remember(&item);
        Ok(item)
    }

    fn remember(&self, item: &StockItem) {
        if item.is_registered() {
            self.snapshots.store(item.key().0, item.clone());
        }
    }

    fn execute(
        &self,
        op: &'static str,
        key: StockKey,
        policy: &RetryPolicy,
        command: impl Fn(DateTime<Utc>) -> StockCommand,
    ) -> Result<StockLevels, CartError> {
        let outcome = policy.run(|attempt| {
            let mut item = match self.load(key) {
                Ok(item) => item,
                Err(e) => return Attempt::Failed(e),
            };

            let cmd = command(Utc::now());
            match self.dispatcher.dispatch_at(&item, AGGREGATE_TYPE, key.0, cmd) {
                Ok(committed) => match apply_committed(&mut item, &committed) {
                    Ok(()) => {
                        self.remember(&item);
                        Attempt::Done(item.levels())
                    }
                    Err(err) => {
                        // Already appended: report the stored levels, never retry the command.
                        error!(op, %key, error = %err, "committed stock events did not apply locally");
                        self.snapshots.evict(key.0);
                        match self.load(key) {
                            Ok(fresh) => Attempt::Done(fresh.levels()),
                            Err(e) => Attempt::Failed(e),
                        }
                    }
                },
                Err(DispatchError::Concurrency(_)) => {
                    debug!(op, %key, attempt, "stock counter moved, retrying");
                    Attempt::Conflict
                }
                Err(e) => Attempt::Failed(with_not_found(e, CartError::StockNotFound)),
            }
        });

        match outcome {
            Ok(levels) => {
                debug!(
                    op,
                    %key,
                    available = levels.available,
                    reserved = levels.reserved,
                    committed = levels.committed,
                    "stock updated"
                );
                Ok(levels)
            }
            Err(RetryError::Failed(err)) => {
                if err.is_defect() {
                    error!(op, %key, error = %err, "stock ledger invariant violated");
                }
                Err(err)
            }
            Err(RetryError::Exhausted { attempts }) => {
                warn!(op, %key, attempts, "stock retry budget exhausted");
                Err(CartError::ConcurrentModification)
            }
        }
    }
}
