//! Runtime configuration, read from the environment.

use std::time::Duration;

use tracing::warn;

use stockcart_infra::RetryPolicy;

const DEFAULT_CART_TTL_SECS: u64 = 30 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_SETTLE_ATTEMPTS: u32 = 50;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Idle time after which an ACTIVE cart may be expired.
    pub cart_ttl: Duration,
    pub sweep_interval: Duration,
    /// Budget for contended reserves and cart compare-and-sets.
    pub retry: RetryPolicy,
    /// Budget for release and commit, which can only fail on contention.
    pub settle: RetryPolicy,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cart_ttl: Duration::from_secs(DEFAULT_CART_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            retry: RetryPolicy::default().with_max_attempts(DEFAULT_RETRY_ATTEMPTS),
            settle: RetryPolicy::default().with_max_attempts(DEFAULT_SETTLE_ATTEMPTS),
            use_persistent_stores: false,
            database_url: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let cart_ttl = parse_or(&lookup, "CART_TTL_SECS", DEFAULT_CART_TTL_SECS);
        let sweep_interval = parse_or(&lookup, "SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS).max(1);
        let retry_attempts = parse_or(&lookup, "STOCK_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS);
        let settle_attempts = parse_or(&lookup, "STOCK_SETTLE_ATTEMPTS", DEFAULT_SETTLE_ATTEMPTS);
        let use_persistent_stores = parse_or(&lookup, "USE_PERSISTENT_STORES", false);
        let database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());

        if use_persistent_stores && database_url.is_none() {
            warn!("USE_PERSISTENT_STORES=true but DATABASE_URL is not set");
        }

        Self {
            cart_ttl: Duration::from_secs(cart_ttl),
            sweep_interval: Duration::from_secs(sweep_interval),
            retry: defaults.retry.with_max_attempts(retry_attempts),
            settle: defaults.settle.with_max_attempts(settle_attempts),
            use_persistent_stores,
            database_url,
        }
    }

    pub fn cart_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cart_ttl).unwrap_or(chrono::Duration::seconds(DEFAULT_CART_TTL_SECS as i64))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + core::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, ?default, "invalid configuration value, using default");
                default
            }
        },
    }
}
