//! Per-address, per-class rate limiting
//!
//! Each (egress address, backend class) pair owns an independent token
//! bucket. Nothing is shared between addresses or between classes, so one
//! busy address never slows another down.

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::proxy::router::BackendClass;

/// Returned when the caller gave up before a token became available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter wait cancelled")]
pub struct Cancelled;

/// Token bucket parameters for one backend class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassQuota {
    /// Tokens added per second
    pub per_second: NonZeroU32,
    /// Bucket capacity
    pub burst: NonZeroU32,
}

impl ClassQuota {
    pub const STATS: ClassQuota = ClassQuota {
        per_second: NonZeroU32::new(30).unwrap(),
        burst: NonZeroU32::new(90).unwrap(),
    };

    pub const WEB: ClassQuota = ClassQuota {
        per_second: NonZeroU32::new(12).unwrap(),
        burst: NonZeroU32::new(90).unwrap(),
    };

    pub fn quota(&self) -> Quota {
        Quota::per_second(self.per_second).allow_burst(self.burst)
    }
}

/// Quotas for both backend classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaTable {
    pub stats: ClassQuota,
    pub web: ClassQuota,
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self {
            stats: ClassQuota::STATS,
            web: ClassQuota::WEB,
        }
    }
}

impl QuotaTable {
    pub fn get(&self, class: BackendClass) -> ClassQuota {
        match class {
            BackendClass::Stats => self.stats,
            BackendClass::Web => self.web,
        }
    }
}

type Bucket<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Token buckets for every (address index, backend class) pair
pub struct RateLimiterBank<C: Clock = DefaultClock> {
    buckets: Vec<[Bucket<C>; 2]>,
    clock: C,
}

impl RateLimiterBank<DefaultClock> {
    pub fn new(addresses: usize, quotas: QuotaTable) -> Self {
        Self::with_clock(addresses, quotas, DefaultClock::default())
    }
}

impl<C: Clock + Clone> RateLimiterBank<C> {
    /// Creates a bank driven by the given clock.
    pub fn with_clock(addresses: usize, quotas: QuotaTable, clock: C) -> Self {
        let buckets = (0..addresses)
            .map(|_| {
                BackendClass::ALL.map(|class| {
                    RateLimiter::direct_with_clock(quotas.get(class).quota(), clock.clone())
                })
            })
            .collect();

        Self { buckets, clock }
    }

    /// Number of egress addresses covered
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn bucket(&self, address: usize, class: BackendClass) -> &Bucket<C> {
        &self.buckets[address][class.slot()]
    }

    /// Takes a token if one is available right now.
    pub fn try_acquire(&self, address: usize, class: BackendClass) -> bool {
        self.bucket(address, class).check().is_ok()
    }

    /// Waits for a token from the (address, class) bucket.
    ///
    /// Only the calling task is suspended. If `cancel` fires first, no token
    /// is taken and [`Cancelled`] is returned; an already cancelled token
    /// returns immediately without touching the bucket.
    ///
    /// # Panics
    ///
    /// Panics if `address` is outside the bank.
    pub async fn wait(
        &self,
        address: usize,
        class: BackendClass,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        let bucket = self.bucket(address, class);

        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let delay = match bucket.check() {
                Ok(()) => return Ok(()),
                Err(not_until) => not_until.wait_time_from(self.clock.now()),
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
