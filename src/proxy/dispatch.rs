//! Outbound dispatch
//!
//! [`DispatchTransport`] is the process-wide dispatch context. It is built
//! once at startup and shared by every connection task. Per request it:
//!
//! 1. Classifies the request and rewrites it for its upstream
//! 2. Picks the next egress address for that class (round-robin)
//! 3. Waits on the (address, class) token bucket
//! 4. Stamps the shared credential on authorized requests
//! 5. Sends the request from the chosen address
//!
//! The (address, class) pair is fixed before the wait and never changes.
//! No retries happen here, and the upstream response is returned untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::http::request::Request;
use crate::proxy::credential::CredentialInjector;
use crate::proxy::egress::EgressAddressPool;
use crate::proxy::error::DispatchError;
use crate::proxy::limiter::{QuotaTable, RateLimiterBank};
use crate::proxy::router::{BackendClass, BackendRouter, Upstreams};
use crate::proxy::stats::DispatchStats;

/// Round-robin counter for one backend class
#[derive(Debug, Default)]
pub struct DispatchCounter {
    value: AtomicU64,
}

impl DispatchCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter and maps the new value onto `0..pool_size`.
    ///
    /// # Panics
    ///
    /// Panics if `pool_size` is zero.
    pub fn next_index(&self, pool_size: usize) -> usize {
        let n = self.value.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        (n % pool_size as u64) as usize
    }

    /// Number of increments so far
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Shared state for dispatching requests upstream
pub struct DispatchTransport {
    router: BackendRouter,
    pool: EgressAddressPool,
    limiters: RateLimiterBank,
    counters: [DispatchCounter; 2],
    credential: CredentialInjector,
    stats: DispatchStats,
}

impl DispatchTransport {
    pub fn new(
        router: BackendRouter,
        pool: EgressAddressPool,
        quotas: QuotaTable,
        credential: CredentialInjector,
    ) -> Self {
        let limiters = RateLimiterBank::new(pool.len(), quotas);
        let stats = DispatchStats::new(pool.len());

        Self {
            router,
            pool,
            limiters,
            counters: Default::default(),
            credential,
            stats,
        }
    }

    /// Builds the egress pool, limiters and router described by `cfg`.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let pool = EgressAddressPool::sequential(cfg.egress_base, cfg.egress_count)?;
        let router = BackendRouter::new(Upstreams::for_domain(&cfg.api_domain));
        let credential = CredentialInjector::new(&cfg.api_key)?;

        Ok(Self::new(router, pool, cfg.quotas, credential))
    }

    pub fn pool(&self) -> &EgressAddressPool {
        &self.pool
    }

    pub fn limiters(&self) -> &RateLimiterBank {
        &self.limiters
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Dispatch counter for a class
    pub fn counter(&self, class: BackendClass) -> &DispatchCounter {
        &self.counters[class.slot()]
    }

    /// Forwards one request and returns the upstream response unmodified.
    ///
    /// `cancel` covers the whole attempt: if it fires during the rate-limit
    /// wait no token is spent, and if it fires during the outbound call the
    /// call is abandoned. Either way the result is [`DispatchError::Cancelled`].
    pub async fn dispatch(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, DispatchError> {
        let outbound = self.router.route(request)?;
        let class = outbound.class;
        let index = self.counters[class.slot()].next_index(self.pool.len());
        let address = self.pool.get(index);
        self.stats.record_dispatch(class, index);

        let started = Instant::now();
        if let Err(cancelled) = self.limiters.wait(index, class, cancel).await {
            self.stats.record_cancelled(class);
            debug!(
                class = %class,
                address = index,
                waited_ms = started.elapsed().as_millis() as u64,
                "Cancelled while waiting for rate limiter"
            );
            return Err(cancelled.into());
        }

        let mut headers = outbound.headers;
        if self.credential.apply(&mut headers) {
            debug!(class = %class, address = index, "Credential matched, forwarding as trusted");
        }

        debug!(
            class = %class,
            address = index,
            source = %address.ip(),
            method = %outbound.method,
            url = %outbound.url,
            headers = ?headers,
            waited_ms = started.elapsed().as_millis() as u64,
            "Sending request upstream"
        );

        let call = address
            .client()
            .request(outbound.method, outbound.url)
            .headers(headers)
            .body(outbound.body)
            .send();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            res = call => res.map_err(DispatchError::from),
        };

        match &result {
            Ok(response) => {
                self.stats.record_forwarded(class);
                debug!(
                    class = %class,
                    address = index,
                    status = response.status().as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Upstream responded"
                );
            }
            Err(DispatchError::Cancelled) => {
                self.stats.record_cancelled(class);
                debug!(class = %class, address = index, "Cancelled during upstream call");
            }
            Err(e) => {
                self.stats.record_failed(class);
                warn!(
                    class = %class,
                    address = index,
                    source = %address.ip(),
                    error = %e,
                    "Upstream request failed"
                );
            }
        }

        result
    }
}
