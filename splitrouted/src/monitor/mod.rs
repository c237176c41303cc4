//! Network Monitor (C3): emits ordered [`NetworkEvent`]s on topology change,
//! from a hybrid event/poll source with health arbitration between the two.

mod socket_source;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use splitroute_core::event::{EventKind, NetworkEvent};

use crate::driver::RouteDriver;
use socket_source::SocketEventSource;

pub const EVENT_CHANNEL_CAPACITY: usize = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);
pub const EVENT_RATE_LIMIT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Sample {
    physical_gateway: Ipv4Addr,
    physical_iface: String,
    default_iface: String,
}

/// Classifies a transition between two samples per the rules in the design:
/// VPN connect/disconnect outranks a bare physical-gateway change when both
/// apply to the same sample.
fn classify(prev: &Sample, curr: &Sample) -> Option<EventKind> {
    let prev_vpn = crate::driver::classify_iface(&prev.default_iface) == crate::driver::IfaceClass::Vpn;
    let curr_vpn = crate::driver::classify_iface(&curr.default_iface) == crate::driver::IfaceClass::Vpn;

    if curr_vpn && !prev_vpn {
        return Some(EventKind::VpnConnected);
    }
    if prev_vpn && !curr_vpn {
        return Some(EventKind::VpnDisconnected);
    }
    if curr.physical_gateway != prev.physical_gateway || curr.physical_iface != prev.physical_iface {
        return Some(EventKind::PhysicalGatewayChanged);
    }
    None
}

/// Hybrid event/poll topology monitor. Holds its own internal snapshot,
/// separate from the Supervisor's [`splitroute_core::gateway::GatewaySnapshot`].
pub struct Monitor {
    driver: Arc<dyn RouteDriver>,
    poll_interval: Duration,
    health_interval: Duration,
    error_threshold: u32,
}

impl Monitor {
    pub fn new(driver: Arc<dyn RouteDriver>) -> Self {
        Self {
            driver,
            poll_interval: DEFAULT_POLL_INTERVAL,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }

    async fn sample(&self) -> Option<Sample> {
        let (physical_gateway, physical_iface) = self.driver.get_physical_gateway().await.ok()?;
        let (_, default_iface) = self.driver.get_system_default_route().await.ok()?;
        Some(Sample { physical_gateway, physical_iface, default_iface })
    }

    /// Re-samples the driver once and classifies the result against a gateway
    /// state described by the caller, returning an event if the classifier
    /// detects a transition. Lets the Supervisor reuse the same sample/classify
    /// path for a one-off backup check (e.g. after an address-change
    /// notification that might not itself carry a real topology change)
    /// without running the full poll/event loop.
    pub async fn check(&self, prev_gateway: Ipv4Addr, prev_physical_iface: &str, prev_default_iface: &str) -> Option<NetworkEvent> {
        let prev = Sample {
            physical_gateway: prev_gateway,
            physical_iface: prev_physical_iface.to_string(),
            default_iface: prev_default_iface.to_string(),
        };
        let curr = self.sample().await?;
        let kind = classify(&prev, &curr)?;
        Some(NetworkEvent::new(kind, curr.physical_gateway, curr.physical_iface, curr.default_iface))
    }

    /// Runs the monitor loop until `cancel` fires. Events are sent on `tx`,
    /// a bounded channel; the producer blocks on full rather than dropping.
    pub async fn run(&self, tx: mpsc::Sender<NetworkEvent>, cancel: CancellationToken) {
        let (tick_tx, mut tick_rx) = mpsc::channel::<()>(1);
        let socket_errors = Arc::new(AtomicU32::new(0));
        let socket = SocketEventSource::spawn(tick_tx, Arc::clone(&socket_errors)).ok();
        if socket.is_none() {
            warn!("route-change socket unavailable, falling back to poll-only monitoring");
        }

        let mut polling_enabled = socket.is_none();

        let mut poll_ticker = interval(self.poll_interval);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut health_ticker = interval(self.health_interval);
        health_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_sample = self.sample().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(socket) = &socket {
                        socket.stop();
                    }
                    break;
                }
                Some(()) = tick_rx.recv() => {
                    tokio::time::sleep(SETTLE_DELAY).await;
                    if !self.resample_and_emit(&mut last_sample, &tx, &cancel).await {
                        break;
                    }
                }
                _ = poll_ticker.tick(), if polling_enabled => {
                    if !self.resample_and_emit(&mut last_sample, &tx, &cancel).await {
                        break;
                    }
                }
                _ = health_ticker.tick() => {
                    let errors = socket_errors.swap(0, Ordering::SeqCst);
                    if errors >= self.error_threshold && !polling_enabled {
                        warn!(errors, "route-change socket degraded, enabling poll fallback");
                        polling_enabled = true;
                    } else if errors == 0 && polling_enabled && socket.is_some() {
                        debug!("route-change socket recovered, disabling poll fallback");
                        polling_enabled = false;
                    }
                }
            }
        }
    }

    /// Re-samples the driver, classifies against the last known sample, and
    /// emits an event if warranted. Returns `false` if the send was
    /// cancelled mid-wait (channel send races the cancellation token so a
    /// full channel during shutdown doesn't hang forever).
    async fn resample_and_emit(
        &self,
        last_sample: &mut Option<Sample>,
        tx: &mpsc::Sender<NetworkEvent>,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(curr) = self.sample().await else { return true };
        let kind = match last_sample {
            Some(prev) => classify(prev, &curr),
            None => None,
        };
        *last_sample = Some(curr.clone());

        let Some(kind) = kind else { return true };
        let event = NetworkEvent::new(kind, curr.physical_gateway, curr.physical_iface.clone(), curr.default_iface.clone());

        tokio::select! {
            result = tx.send(event) => result.is_ok(),
            _ = cancel.cancelled() => false,
        }
    }
}
