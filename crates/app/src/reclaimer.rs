//! Background expiry of idle carts.
//!
//! Candidates come from the cart directory, which may lag. Each candidate is re-read from its
//! stream and only expired if the stream still shows it ACTIVE and idle, at the version that
//! was read. A cart touched in between fails that compare-and-set and is left alone.

use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use stockcart_cart::{CartCommand, CartId, ExpireCart, AGGREGATE_TYPE};
use stockcart_core::DomainError;
use stockcart_infra::workers::WorkerHandle;
use stockcart_infra::DispatchError;

use crate::cart_manager::load_cart;
use crate::checkout::{settle_lines, Settle};
use crate::error::CartError;
use crate::ledger::StockLedger;
use crate::services::{Directory, Dispatcher};

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    /// Candidates that turned out to be active again, already closed, or claimed by a
    /// concurrent writer.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug)]
enum Reclaim {
    Expired,
    Skipped,
}

pub struct ExpiryReclaimer {
    dispatcher: Arc<Dispatcher>,
    ledger: Arc<StockLedger>,
    directory: Arc<Directory>,
    ttl: chrono::Duration,
}

impl ExpiryReclaimer {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        ledger: Arc<StockLedger>,
        directory: Arc<Directory>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            dispatcher,
            ledger,
            directory,
            ttl,
        }
    }

    /// Expire every cart idle for longer than the TTL as of `now`, releasing its stock.
    ///
    /// Safe to run concurrently with itself and with any cart operation.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let cutoff = now - self.ttl;
        let mut report = SweepReport::default();

        for candidate in self.directory.idle_before(cutoff) {
            report.scanned += 1;
            match self.reclaim(candidate.cart_id, cutoff, now) {
                Ok(Reclaim::Expired) => report.expired += 1,
                Ok(Reclaim::Skipped) => report.skipped += 1,
                Err(err) => {
                    warn!(cart_id = %candidate.cart_id, error = %err, "failed to expire cart");
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "expiry sweep finished"
            );
        }
        report
    }

    fn reclaim(&self, cart_id: CartId, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<Reclaim, CartError> {
        let cart = match load_cart(&self.dispatcher, cart_id) {
            Ok(cart) => cart,
            Err(CartError::CartNotFound) => return Ok(Reclaim::Skipped),
            Err(e) => return Err(e),
        };

        let idle = cart.last_activity_at().is_some_and(|t| t < cutoff);
        if !cart.is_active() || !idle {
            debug!(%cart_id, status = %cart.status(), "cart no longer eligible for expiry");
            return Ok(Reclaim::Skipped);
        }

        let cmd = CartCommand::Expire(ExpireCart {
            cart_id,
            idle_before: cutoff,
            occurred_at: now,
        });
        match self.dispatcher.dispatch_at(&cart, AGGREGATE_TYPE, cart_id.0, cmd) {
            Ok(_) => {}
            Err(DispatchError::Concurrency(_))
            | Err(DispatchError::Domain(DomainError::Conflict(_)))
            | Err(DispatchError::Domain(DomainError::CartClosed(_))) => {
                debug!(%cart_id, "cart changed during expiry, skipped");
                return Ok(Reclaim::Skipped);
            }
            Err(e) => return Err(e.into()),
        }

        settle_lines(&self.ledger, cart_id, cart.items(), Settle::Release)?;
        info!(%cart_id, lines = cart.items().len(), "idle cart expired");
        Ok(Reclaim::Expired)
    }

    /// Run `sweep_once` every `interval` on a background thread until shut down.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let reclaimer = Arc::clone(self);

        let join = thread::Builder::new()
            .name("cart-expiry".to_string())
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            reclaimer.sweep_once(Utc::now());
                        }
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!(worker = "cart-expiry", "worker stopped");
            })?;

        info!(worker = "cart-expiry", interval_ms = interval.as_millis() as u64, "worker started");
        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}

impl core::fmt::Debug for ExpiryReclaimer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExpiryReclaimer").field("ttl", &self.ttl).finish()
    }
}
