//! Platform route driver (C1): add/delete/list routes, and distinguish the
//! physical gateway from whatever the kernel currently calls "default".
//!
//! [`RouteDriver`] is the trait the Reconciler and Supervisor hold as a
//! trait object. Production code uses [`linux::NetlinkDriver`] or
//! [`bsd::RouteSocketDriver`] depending on target; tests use the stateful
//! mock in `mocks`.

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd", target_os = "netbsd"))]
pub mod bsd;

pub mod parse;

#[cfg(test)]
pub mod mocks;

use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use splitroute_core::route::Route;

pub const DEFAULT_BATCH_WIDTH: usize = 50;
pub const DEFAULT_BATCH_RETRIES: u32 = 3;
pub const CHUNK_THRESHOLD: usize = 1000;
pub const CHUNK_SIZE: usize = 500;
pub const CHUNK_PAUSE: Duration = Duration::from_millis(10);

/// Interfaces whose name starts with one of these are the physical uplink.
pub const PHYSICAL_IFACE_PREFIXES: &[&str] = &["en", "eth"];
/// Interfaces whose name starts with one of these belong to a VPN/tunnel.
pub const VPN_IFACE_PREFIXES: &[&str] = &["utun", "tun", "tap", "ppp", "ipsec", "wg"];
/// Interfaces whose name starts with one of these are system/virtual, never
/// a candidate physical uplink nor a VPN.
pub const SYSTEM_IFACE_PREFIXES: &[&str] = &["lo", "awdl", "bridge", "gif", "stf"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceClass {
    Physical,
    Vpn,
    System,
    Unknown,
}

/// Classifies an interface name per the physical/VPN/system prefix sets.
/// VPN and system prefixes are checked first so an interface can never be
/// mistaken for physical just because no exclusion matched.
pub fn classify_iface(name: &str) -> IfaceClass {
    if VPN_IFACE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        IfaceClass::Vpn
    } else if SYSTEM_IFACE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        IfaceClass::System
    } else if PHYSICAL_IFACE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        IfaceClass::Physical
    } else {
        IfaceClass::Unknown
    }
}

pub fn is_rfc1918(addr: Ipv4Addr) -> bool {
    let o = addr.octets();
    match o[0] {
        10 => true,
        172 => (16..=31).contains(&o[1]),
        192 => o[1] == 168,
        _ => false,
    }
}

/// Conventional gateway for a host's own subnet: the network address with
/// the low bit set, e.g. `192.168.1.0/24` -> `192.168.1.1`.
pub fn conventional_gateway(addr: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    let network = splitroute_core::prefix::Prefix::new(addr, prefix_len).addr();
    let bits = u32::from(network) | 1;
    Ipv4Addr::from(bits)
}

/// Primary physical-gateway discovery strategy: walk the kernel's interface
/// list via `getifaddrs`, filter to UP interfaces classifying as physical,
/// and derive the conventional gateway from each's own RFC1918 address and
/// netmask. Returns `None` if no such interface is found, in which case the
/// caller falls back to [`physical_gateway_by_route_tally`].
#[cfg(unix)]
pub fn physical_gateway_via_interfaces() -> Option<(Ipv4Addr, String)> {
    use std::ffi::CStr;

    let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: `addrs` is an out-param populated by `getifaddrs` on success and
    // freed via `freeifaddrs` below regardless of the outcome.
    if unsafe { libc::getifaddrs(&mut addrs) } != 0 {
        return None;
    }

    let mut cursor = addrs;
    let mut found = None;
    while !cursor.is_null() {
        // SAFETY: `cursor` is non-null and was populated by the `getifaddrs` call above.
        let ifa = unsafe { &*cursor };
        cursor = ifa.ifa_next;

        if ifa.ifa_addr.is_null() || ifa.ifa_netmask.is_null() {
            continue;
        }
        // SAFETY: `ifa_addr` was checked non-null; `getifaddrs` guarantees a valid `sockaddr` here.
        if unsafe { (*ifa.ifa_addr).sa_family as i32 } != libc::AF_INET {
            continue;
        }
        if ifa.ifa_flags as i32 & libc::IFF_UP == 0 {
            continue;
        }

        // SAFETY: `ifa_name` is a NUL-terminated string for the lifetime of this entry.
        let name = unsafe { CStr::from_ptr(ifa.ifa_name) }.to_string_lossy().into_owned();
        if classify_iface(&name) != IfaceClass::Physical {
            continue;
        }

        // SAFETY: `sa_family` checked as `AF_INET` above, so `sockaddr_in` is the correct layout.
        let addr = u32::from_be(unsafe { (*ifa.ifa_addr.cast::<libc::sockaddr_in>()).sin_addr.s_addr });
        let mask = u32::from_be(unsafe { (*ifa.ifa_netmask.cast::<libc::sockaddr_in>()).sin_addr.s_addr });
        let addr = Ipv4Addr::from(addr);
        if !is_rfc1918(addr) {
            continue;
        }

        let prefix_len = mask.count_ones() as u8;
        found = Some((conventional_gateway(addr, prefix_len), name));
        break;
    }

    // SAFETY: `addrs` was populated by the successful `getifaddrs` call above.
    unsafe { libc::freeifaddrs(addrs) };
    found
}

/// Fallback physical-gateway discovery: tally per-gateway the number of
/// routes whose interface classifies as physical, and return the gateway
/// with the highest tally. Used when no RFC1918-addressed physical
/// interface can be found directly.
pub fn physical_gateway_by_route_tally(routes: &[Route]) -> Option<Ipv4Addr> {
    use std::collections::HashMap;
    let mut tally: HashMap<Ipv4Addr, usize> = HashMap::new();
    for route in routes {
        let Some(iface) = &route.iface else { continue };
        if classify_iface(iface) != IfaceClass::Physical {
            continue;
        }
        *tally.entry(route.gateway).or_insert(0) += 1;
    }
    tally.into_iter().max_by_key(|(_, count)| *count).map(|(gw, _)| gw)
}

/// Error taxonomy shared by every platform driver. Variant names mirror the
/// conceptual taxonomy in the design doc so call sites can match on
/// classification instead of string content.
#[derive(Debug, Error)]
pub enum Error {
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("transient network error: {0}")]
    Network(String),
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    #[error("system call failed: {0}")]
    SystemCall(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("route not found")]
    NotFound,
    #[error("route already exists")]
    AlreadyExists,
    #[error("driver is closed")]
    Closed,
}

impl Error {
    /// Non-fatal outcomes in batch mode: the caller already got what it
    /// wanted (the route is present, or it's gone), so these count as
    /// success rather than failure.
    pub fn is_idempotent_success(&self) -> bool {
        matches!(self, Error::NotFound | Error::AlreadyExists)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::SystemCall(_) | Error::Timeout(_))
    }
}

/// Aggregate result of a batch operation: how many were attempted, how many
/// failed (after exhausting retries), and up to a handful of causes for
/// the error log record.
#[derive(Debug, Default, Clone)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub failed: usize,
    pub causes: Vec<String>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn merge(&mut self, other: BatchOutcome) {
        self.attempted += other.attempted;
        self.failed += other.failed;
        self.causes.extend(other.causes);
    }
}

#[async_trait]
pub trait RouteDriver: Send + Sync {
    async fn add_route(&self, route: &Route) -> Result<(), Error>;
    async fn delete_route(&self, route: &Route) -> Result<(), Error>;

    async fn batch_add(&self, routes: &[Route]) -> BatchOutcome {
        run_batch(routes, DEFAULT_BATCH_WIDTH, DEFAULT_BATCH_RETRIES, move |r| async move { self.add_route(&r).await })
            .await
    }

    async fn batch_delete(&self, routes: &[Route]) -> BatchOutcome {
        run_batch(routes, DEFAULT_BATCH_WIDTH, DEFAULT_BATCH_RETRIES, move |r| async move {
            self.delete_route(&r).await
        })
        .await
    }

    /// Gateway of the currently-up, non-VPN, non-loopback physical
    /// interface, even when a VPN owns the default route.
    async fn get_physical_gateway(&self) -> Result<(Ipv4Addr, String), Error>;

    /// Whatever the kernel currently resolves `0.0.0.0/0` to, which may be
    /// a VPN endpoint.
    async fn get_system_default_route(&self) -> Result<(Ipv4Addr, String), Error>;

    async fn list_system_routes(&self) -> Result<Vec<Route>, Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// Shared batch engine used by every driver's default `batch_add`/
/// `batch_delete`. Below the chunking threshold, dispatches with bounded
/// concurrency and per-route retry with linear backoff; above it, chunks
/// sequentially with an inter-chunk pause to avoid overwhelming the
/// kernel's routing socket buffer.
pub async fn run_batch<F, Fut>(routes: &[Route], width: usize, retries: u32, op: F) -> BatchOutcome
where
    F: Fn(Route) -> Fut + Send + Sync + Clone,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    if routes.len() > CHUNK_THRESHOLD {
        let mut outcome = BatchOutcome::default();
        for chunk in routes.chunks(CHUNK_SIZE) {
            outcome.merge(run_parallel(chunk, width, retries, op.clone()).await);
            sleep(CHUNK_PAUSE).await;
        }
        outcome
    } else {
        run_parallel(routes, width, retries, op).await
    }
}

async fn run_parallel<F, Fut>(routes: &[Route], width: usize, retries: u32, op: F) -> BatchOutcome
where
    F: Fn(Route) -> Fut + Send + Sync + Clone,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    let semaphore = Semaphore::new(width.max(1));
    let mut futures = Vec::with_capacity(routes.len());

    // Each future acquires its own permit lazily, once polled — acquiring
    // eagerly here (before any future has had a chance to run and release
    // a permit) would deadlock past the first `width` routes.
    for route in routes {
        let route = route.clone();
        let op = op.clone();
        let semaphore = &semaphore;
        futures.push(async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            run_with_retry(route, retries, op).await
        });
    }

    let results = futures::future::join_all(futures).await;

    let mut outcome = BatchOutcome { attempted: results.len(), ..Default::default() };
    for result in results {
        if let Err(cause) = result {
            outcome.failed += 1;
            outcome.causes.push(cause);
        }
    }
    outcome
}

async fn run_with_retry<F, Fut>(route: Route, retries: u32, op: F) -> Result<(), String>
where
    F: Fn(Route) -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(route.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_idempotent_success() => return Ok(()),
            Err(e) if e.is_retryable() && attempt <= retries => {
                sleep(Duration::from_secs(u64::from(attempt))).await;
                continue;
            }
            Err(e) => return Err(format!("{route}: {e}")),
        }
    }
}
