//! Dispatch counters
//!
//! Lock-free counters updated on the request path and read by a periodic
//! reporter. All updates use relaxed ordering; the numbers are for
//! observation only and never drive dispatch decisions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::proxy::router::BackendClass;

#[derive(Debug, Default)]
struct ClassCounters {
    dispatched: AtomicU64,
    forwarded: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
}

impl ClassCounters {
    fn snapshot(&self) -> ClassSnapshot {
        ClassSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Counters per backend class and per egress address
#[derive(Debug)]
pub struct DispatchStats {
    classes: [ClassCounters; 2],
    addresses: Vec<AtomicU64>,
}

impl DispatchStats {
    pub fn new(addresses: usize) -> Self {
        Self {
            classes: Default::default(),
            addresses: (0..addresses).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Record a request assigned to an address
    #[inline]
    pub fn record_dispatch(&self, class: BackendClass, address: usize) {
        self.classes[class.slot()]
            .dispatched
            .fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.addresses.get(address) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an upstream response, whatever its status
    #[inline]
    pub fn record_forwarded(&self, class: BackendClass) {
        self.classes[class.slot()]
            .forwarded
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cancelled(&self, class: BackendClass) {
        self.classes[class.slot()]
            .cancelled
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an outbound call that produced no response
    #[inline]
    pub fn record_failed(&self, class: BackendClass) {
        self.classes[class.slot()]
            .failed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            stats: self.classes[BackendClass::Stats.slot()].snapshot(),
            web: self.classes[BackendClass::Web.slot()].snapshot(),
            per_address: self
                .addresses
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassSnapshot {
    pub dispatched: u64,
    pub forwarded: u64,
    pub cancelled: u64,
    pub failed: u64,
}

impl ClassSnapshot {
    fn since(&self, earlier: &ClassSnapshot) -> ClassSnapshot {
        ClassSnapshot {
            dispatched: self.dispatched.saturating_sub(earlier.dispatched),
            forwarded: self.forwarded.saturating_sub(earlier.forwarded),
            cancelled: self.cancelled.saturating_sub(earlier.cancelled),
            failed: self.failed.saturating_sub(earlier.failed),
        }
    }
}

impl fmt::Display for ClassSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dispatched={} forwarded={} cancelled={} failed={}",
            self.dispatched, self.forwarded, self.cancelled, self.failed
        )
    }
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub stats: ClassSnapshot,
    pub web: ClassSnapshot,
    pub per_address: Vec<u64>,
}

impl StatsSnapshot {
    pub fn class(&self, class: BackendClass) -> &ClassSnapshot {
        match class {
            BackendClass::Stats => &self.stats,
            BackendClass::Web => &self.web,
        }
    }

    /// Counter deltas between `earlier` and this snapshot.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            stats: self.stats.since(&earlier.stats),
            web: self.web.since(&earlier.web),
            per_address: self
                .per_address
                .iter()
                .enumerate()
                .map(|(i, n)| n.saturating_sub(earlier.per_address.get(i).copied().unwrap_or(0)))
                .collect(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.stats.dispatched == 0 && self.web.dispatched == 0
    }
}

/// Logs counter deltas every `interval`. Runs until the task is dropped.
pub async fn report_periodically(stats: &DispatchStats, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately
    ticker.tick().await;
    let mut last = stats.snapshot();

    loop {
        ticker.tick().await;
        let now = stats.snapshot();
        let window = now.since(&last);

        if window.is_idle() {
            debug!(window_secs = interval.as_secs(), "No requests dispatched");
        } else {
            info!(
                window_secs = interval.as_secs(),
                stats = %window.stats,
                www = %window.web,
                per_address = ?window.per_address,
                "Dispatch summary"
            );
        }

        last = now;
    }
}
