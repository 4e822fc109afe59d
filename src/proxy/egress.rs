//! Egress address pool
//!
//! Each local address owns its own HTTP client bound to that address, so
//! every outbound connection (and its keep-alive pool) originates from a
//! fixed source IP.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use thiserror::Error;

/// Dial timeout for outbound connections
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP keep-alive interval for outbound connections
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// How long an idle pooled connection is kept
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("egress pool needs at least one address")]
    Empty,

    #[error("{count} sequential addresses starting at {base} overflow the address space")]
    AddressOverflow { base: IpAddr, count: usize },

    #[error("cannot build HTTP client for {address}")]
    Client {
        address: IpAddr,
        #[source]
        source: reqwest::Error,
    },
}

/// One local address and the client that dials from it
#[derive(Debug, Clone)]
pub struct EgressAddress {
    index: usize,
    ip: IpAddr,
    client: reqwest::Client,
}

impl EgressAddress {
    /// Builds a client whose connections all originate from `ip`.
    ///
    /// Redirects are not followed and no system proxy is used: the upstream
    /// response goes back to the caller as-is.
    pub fn bind(index: usize, ip: IpAddr) -> Result<Self, PoolError> {
        let client = reqwest::Client::builder()
            .local_address(ip)
            .connect_timeout(DIAL_TIMEOUT)
            .tcp_keepalive(KEEP_ALIVE)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|source| PoolError::Client { address: ip, source })?;

        Ok(Self { index, ip, client })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Fixed set of egress addresses, selected by index
#[derive(Debug, Clone)]
pub struct EgressAddressPool {
    addresses: Vec<EgressAddress>,
}

impl EgressAddressPool {
    pub fn new(ips: impl IntoIterator<Item = IpAddr>) -> Result<Self, PoolError> {
        let addresses = ips
            .into_iter()
            .enumerate()
            .map(|(index, ip)| EgressAddress::bind(index, ip))
            .collect::<Result<Vec<_>, _>>()?;

        if addresses.is_empty() {
            return Err(PoolError::Empty);
        }

        Ok(Self { addresses })
    }

    /// Pool of `count` consecutive addresses beginning at `base`.
    pub fn sequential(base: IpAddr, count: usize) -> Result<Self, PoolError> {
        Self::new(sequential_addresses(base, count)?)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Address for a dispatch index. Indices wrap around the pool size.
    pub fn get(&self, index: usize) -> &EgressAddress {
        &self.addresses[index % self.addresses.len()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &EgressAddress> {
        self.addresses.iter()
    }
}

/// Returns `base`, `base + 1`, ... `base + count - 1`.
pub fn sequential_addresses(base: IpAddr, count: usize) -> Result<Vec<IpAddr>, PoolError> {
    let overflow = || PoolError::AddressOverflow { base, count };

    (0..count)
        .map(|offset| match base {
            IpAddr::V4(v4) => u32::try_from(offset)
                .ok()
                .and_then(|offset| u32::from(v4).checked_add(offset))
                .map(|bits| IpAddr::V4(Ipv4Addr::from(bits)))
                .ok_or_else(overflow),
            IpAddr::V6(v6) => u128::from(v6)
                .checked_add(offset as u128)
                .map(|bits| IpAddr::V6(Ipv6Addr::from(bits)))
                .ok_or_else(overflow),
        })
        .collect()
}
