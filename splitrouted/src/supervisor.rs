//! Supervisor (C5): owns the process lifecycle, the exclusive gateway
//! snapshot, and the single-task event loop that drives convergence.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use splitroute_core::event::{EventKind, NetworkEvent};
use splitroute_core::gateway::GatewaySnapshot;
use splitroute_core::managed_set::ManagedSet;

use crate::driver::{classify_iface, IfaceClass, RouteDriver};
use crate::monitor::{Monitor, EVENT_CHANNEL_CAPACITY};
use crate::reconciler::Reconciler;

const IDLE: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;
const STOPPED: u8 = 4;

const ADDRESS_CHANGED_DELAY: Duration = Duration::from_millis(500);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum Error {
    #[error("supervisor already started")]
    AlreadyStarted,
    #[error("startup convergence failed: {0}")]
    Startup(#[from] crate::reconciler::Error),
    #[error("failed to query initial gateway: {0}")]
    InitialGateway(#[source] crate::driver::Error),
}

pub struct Supervisor {
    driver: Arc<dyn RouteDriver>,
    managed_set: ManagedSet,
    snapshot: Mutex<GatewaySnapshot>,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(driver: Arc<dyn RouteDriver>, managed_set: ManagedSet) -> Self {
        Self {
            driver,
            managed_set,
            snapshot: Mutex::new(GatewaySnapshot::new(std::net::Ipv4Addr::UNSPECIFIED, "", "", false)),
            state: AtomicU8::new(IDLE),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    /// Requests shutdown. Idempotent: calling this more than once, or
    /// before `start`, is a no-op beyond the first call.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Runs startup and the event loop to completion. Returns once the loop
    /// exits after a stop signal or cancellation, having waited up to 10s
    /// for it to drain.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        if self.state.compare_exchange(IDLE, STARTING, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(Error::AlreadyStarted);
        }

        let (physical_gw, physical_iface) =
            self.driver.get_physical_gateway().await.map_err(Error::InitialGateway)?;
        let (_, default_iface) = self.driver.get_system_default_route().await.map_err(Error::InitialGateway)?;
        let vpn_connected = classify_iface(&default_iface) == IfaceClass::Vpn;

        {
            let mut snapshot = self.snapshot.lock().await;
            *snapshot = GatewaySnapshot::new(physical_gw, physical_iface, default_iface, vpn_connected);
        }

        {
            let reconciler = Reconciler::new(self.driver.as_ref(), &self.managed_set);
            reconciler.init_routes().await?;
        }
        info!(%physical_gw, vpn_connected, "initial convergence complete");

        let (tx, mut rx) = mpsc::channel::<NetworkEvent>(EVENT_CHANNEL_CAPACITY);
        let monitor = Monitor::new(Arc::clone(&self.driver));
        let monitor_cancel = self.cancel.clone();
        let monitor_task = tokio::spawn(async move {
            monitor.run(tx, monitor_cancel).await;
        });

        self.state.store(RUNNING, Ordering::SeqCst);
        info!("supervisor running");

        let event_loop = async {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    event = rx.recv() => {
                        match event {
                            Some(event) => Arc::clone(&self).handle_event(event).await,
                            None => break,
                        }
                    }
                }
            }
        };

        // Once cancelled, `event_loop` exits as soon as any in-flight
        // convergence call returns; this bounds that drain to 10s.
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, event_loop).await.is_err() {
            warn!("event loop did not exit promptly on shutdown");
        }
        self.state.store(STOPPING, Ordering::SeqCst);

        rx.close();
        while rx.try_recv().is_ok() {}

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, monitor_task).await.is_err() {
            warn!("monitor task did not exit within the shutdown window");
        }

        let _ = self.driver.close().await;
        self.state.store(STOPPED, Ordering::SeqCst);
        info!("supervisor stopped");
        Ok(())
    }

    async fn handle_event(self: Arc<Self>, event: NetworkEvent) {
        let mut snapshot = self.snapshot.lock().await;
        let reconciler = Reconciler::new(self.driver.as_ref(), &self.managed_set);

        match event.kind {
            EventKind::PhysicalGatewayChanged if snapshot.vpn_connected => {
                match reconciler.setup_routes(event.physical_gateway).await {
                    Ok(report) => {
                        snapshot.physical = event.physical_gateway;
                        snapshot.physical_iface = event.physical_iface.clone();
                        info!(gateway = %event.physical_gateway, deleted = report.deleted, added = report.added, "convergence completed");
                    }
                    Err(e) => error!(cause = %e, "convergence failed"),
                }
            }
            EventKind::PhysicalGatewayChanged => {
                info!("physical gateway changed while VPN is down, no managed routes to maintain");
            }
            EventKind::VpnConnected => {
                match reconciler.setup_routes(event.physical_gateway).await {
                    Ok(report) => {
                        snapshot.vpn_connected = true;
                        snapshot.physical = event.physical_gateway;
                        snapshot.physical_iface = event.physical_iface.clone();
                        snapshot.default_iface = event.default_iface.clone();
                        info!(gateway = %event.physical_gateway, deleted = report.deleted, added = report.added, "convergence completed");
                    }
                    Err(e) => error!(cause = %e, "convergence failed"),
                }
            }
            EventKind::VpnDisconnected => match reconciler.clean_routes().await {
                Ok(deleted) => {
                    snapshot.vpn_connected = false;
                    snapshot.default_iface = event.default_iface.clone();
                    info!(deleted, "managed routes cleared on VPN disconnect");
                }
                Err(e) => error!(cause = %e, "cleanup failed"),
            },
            EventKind::AddressChanged => {
                let prev_physical = snapshot.physical;
                let prev_physical_iface = snapshot.physical_iface.clone();
                let prev_default_iface = snapshot.default_iface.clone();
                drop(snapshot);

                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(ADDRESS_CHANGED_DELAY) => {}
                        _ = this.cancel.cancelled() => return,
                    }

                    let monitor = Monitor::new(Arc::clone(&this.driver));
                    match monitor.check(prev_physical, &prev_physical_iface, &prev_default_iface).await {
                        Some(event) => {
                            info!(kind = ?event.kind, "address-change re-sample found a real topology change, converging");
                            Arc::clone(&this).handle_event(event).await;
                        }
                        None => debug!("address-change re-sample found no topology change"),
                    }
                });
            }
            EventKind::InterfaceUp | EventKind::InterfaceDown => {
                // Subsumed by the next gateway re-sample; no direct action.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mocks::MockDriver;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    fn managed_set() -> ManagedSet {
        ManagedSet::from_text("223.5.5.5/32\n1.0.1.0/24\n", &PathBuf::from("routes"), "", &PathBuf::from("dns")).unwrap()
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let driver: Arc<dyn RouteDriver> = Arc::new(
            MockDriver::new()
                .with_physical_gateway(Ipv4Addr::new(192, 168, 1, 1), "en0")
                .with_system_default(Ipv4Addr::new(192, 168, 1, 1), "en0"),
        );
        let sup = Arc::new(Supervisor::new(driver, managed_set()));
        sup.state.store(RUNNING, Ordering::SeqCst);
        let err = Arc::clone(&sup).run().await.unwrap_err();
        assert!(matches!(err, Error::AlreadyStarted));
    }

    #[tokio::test]
    async fn stop_before_start_does_not_panic() {
        let driver: Arc<dyn RouteDriver> = Arc::new(MockDriver::new());
        let sup = Arc::new(Supervisor::new(driver, managed_set()));
        sup.stop();
        sup.stop();
    }

    #[tokio::test]
    async fn vpn_disconnect_event_clears_routes_and_updates_snapshot() {
        let driver: Arc<dyn RouteDriver> = Arc::new(
            MockDriver::new()
                .with_physical_gateway(Ipv4Addr::new(192, 168, 1, 1), "en0")
                .with_system_default(Ipv4Addr::new(192, 168, 1, 1), "en0"),
        );
        let sup = Arc::new(Supervisor::new(Arc::clone(&driver), managed_set()));
        {
            let reconciler = Reconciler::new(driver.as_ref(), &sup.managed_set);
            reconciler.setup_routes(Ipv4Addr::new(192, 168, 1, 1)).await.unwrap();
        }
        {
            let mut snapshot = sup.snapshot.lock().await;
            *snapshot = GatewaySnapshot::new(Ipv4Addr::new(192, 168, 1, 1), "en0", "utun0", true);
        }

        let event = NetworkEvent::new(EventKind::VpnDisconnected, Ipv4Addr::new(192, 168, 1, 1), "en0", "en0");
        Arc::clone(&sup).handle_event(event).await;

        let snapshot = sup.snapshot.lock().await;
        assert!(!snapshot.vpn_connected);
    }
}
