//! Reconciler / RouteSwitch (C4): a pure planner plus driver executor that
//! converges the kernel route table toward the managed policy.

use std::net::Ipv4Addr;

use thiserror::Error;

use splitroute_core::managed_set::ManagedSet;
use splitroute_core::route::Route;

use crate::driver::{BatchOutcome, RouteDriver};

#[derive(Debug, Error)]
pub enum Error {
    #[error("setup_routes called without a physical gateway")]
    NoGateway,
    #[error("failed to list kernel routes: {0}")]
    Listing(#[source] crate::driver::Error),
    #[error("{failed}/{attempted} routes failed during {phase}: {causes:?}")]
    Batch { phase: &'static str, attempted: usize, failed: usize, causes: Vec<String> },
    #[error(transparent)]
    Driver(#[from] crate::driver::Error),
}

impl Error {
    fn from_outcome(phase: &'static str, outcome: BatchOutcome) -> Result<(), Error> {
        if outcome.is_success() {
            Ok(())
        } else {
            Err(Error::Batch { phase, attempted: outcome.attempted, failed: outcome.failed, causes: outcome.causes })
        }
    }
}

/// Summary of a completed convergence, logged by the caller as one `INFO` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvergenceReport {
    pub deleted: usize,
    pub added: usize,
}

pub struct Reconciler<'a> {
    driver: &'a dyn RouteDriver,
    managed_set: &'a ManagedSet,
}

impl<'a> Reconciler<'a> {
    pub fn new(driver: &'a dyn RouteDriver, managed_set: &'a ManagedSet) -> Self {
        Self { driver, managed_set }
    }

    /// Startup reconciliation: converge if a VPN already owns the default
    /// route, otherwise ensure no managed routes linger from a previous run.
    pub async fn init_routes(&self) -> Result<ConvergenceReport, Error> {
        let (gateway, iface) = self.driver.get_system_default_route().await?;
        if crate::driver::classify_iface(&iface) == crate::driver::IfaceClass::Vpn {
            self.setup_routes(gateway).await
        } else {
            let deleted = self.clean_routes().await?;
            Ok(ConvergenceReport { deleted, added: 0 })
        }
    }

    /// Two-phase convergence: delete every managed route (regardless of
    /// gateway), then install the full managed set against `physical_gw`.
    /// No managed destination is left pointed at a stale gateway once both
    /// phases complete.
    pub async fn setup_routes(&self, physical_gw: Ipv4Addr) -> Result<ConvergenceReport, Error> {
        if physical_gw.is_unspecified() {
            return Err(Error::NoGateway);
        }

        let deleted = self.clean_routes().await?;

        let routes: Vec<Route> = self.managed_set.iter().map(|prefix| Route::new(*prefix, physical_gw)).collect();
        let outcome = self.driver.batch_add(&routes).await;
        Error::from_outcome("install", outcome)?;

        Ok(ConvergenceReport { deleted, added: routes.len() })
    }

    /// Deletes every kernel route whose destination is in the managed set,
    /// independent of gateway. Never touches a route outside the set.
    pub async fn clean_routes(&self) -> Result<usize, Error> {
        let system_routes = self.driver.list_system_routes().await.map_err(Error::Listing)?;
        let managed: Vec<Route> =
            system_routes.into_iter().filter(|route| self.managed_set.contains(&route.destination)).collect();

        let count = managed.len();
        let outcome = self.driver.batch_delete(&managed).await;
        Error::from_outcome("cleanup", outcome)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mocks::MockDriver;
    use splitroute_core::prefix::Prefix;
    use std::path::PathBuf;

    fn managed_set() -> ManagedSet {
        ManagedSet::from_text(
            "223.5.5.5/32\n1.0.1.0/24\n",
            &PathBuf::from("routes"),
            "",
            &PathBuf::from("dns"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn cold_start_with_vpn_up_installs_both_routes() {
        let driver = MockDriver::new().with_system_default(Ipv4Addr::new(10, 8, 0, 1), "utun0");
        let set = managed_set();
        let reconciler = Reconciler::new(&driver, &set);

        let report = reconciler.init_routes().await.unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.deleted, 0);
        assert_eq!(driver.route_count(), 0);
    }

    #[tokio::test]
    async fn cold_start_with_vpn_down_is_a_noop() {
        let driver = MockDriver::new().with_system_default(Ipv4Addr::new(192, 168, 1, 1), "en0");
        let set = managed_set();
        let reconciler = Reconciler::new(&driver, &set);

        let report = reconciler.init_routes().await.unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn gateway_change_moves_both_managed_routes() {
        let driver = MockDriver::new();
        let set = managed_set();
        let reconciler = Reconciler::new(&driver, &set);
        reconciler.setup_routes(Ipv4Addr::new(192, 168, 1, 1)).await.unwrap();

        let report = reconciler.setup_routes(Ipv4Addr::new(192, 168, 32, 1)).await.unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.added, 2);

        let p1: Prefix = "223.5.5.5/32".parse().unwrap();
        let p2: Prefix = "1.0.1.0/24".parse().unwrap();
        assert!(driver.contains(&Route::new(p1, Ipv4Addr::new(192, 168, 32, 1))));
        assert!(driver.contains(&Route::new(p2, Ipv4Addr::new(192, 168, 32, 1))));
    }

    #[tokio::test]
    async fn vpn_disconnect_clears_managed_routes_only() {
        let driver = MockDriver::new();
        let set = managed_set();
        let reconciler = Reconciler::new(&driver, &set);
        reconciler.setup_routes(Ipv4Addr::new(192, 168, 1, 1)).await.unwrap();

        let unmanaged = Route::new("198.51.100.0/24".parse().unwrap(), Ipv4Addr::new(192, 168, 1, 1));
        driver.add_route(&unmanaged).await.unwrap();

        let deleted = reconciler.clean_routes().await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(driver.route_count(), 1);
        assert!(driver.contains(&unmanaged));
    }

    #[tokio::test]
    async fn add_of_already_existing_route_counts_as_success() {
        let driver = MockDriver::new();
        let set = managed_set();
        let reconciler = Reconciler::new(&driver, &set);

        let existing = Route::new("1.0.1.0/24".parse().unwrap(), Ipv4Addr::new(192, 168, 1, 1));
        driver.add_route(&existing).await.unwrap();

        let report = reconciler.setup_routes(Ipv4Addr::new(192, 168, 1, 1)).await.unwrap();
        assert_eq!(report.added, 2);
    }

    #[tokio::test]
    async fn setup_routes_rejects_unspecified_gateway() {
        let driver = MockDriver::new();
        let set = managed_set();
        let reconciler = Reconciler::new(&driver, &set);
        let err = reconciler.setup_routes(Ipv4Addr::UNSPECIFIED).await.unwrap_err();
        assert!(matches!(err, Error::NoGateway));
    }

    #[tokio::test]
    async fn batch_failure_surfaces_as_aggregate_error() {
        let driver = MockDriver::new();
        let set = managed_set();
        let reconciler = Reconciler::new(&driver, &set);
        driver.fail_next("add_route", crate::driver::Error::Permission("denied".into()));

        let err = reconciler.setup_routes(Ipv4Addr::new(192, 168, 1, 1)).await.unwrap_err();
        match err {
            Error::Batch { phase, failed, .. } => {
                assert_eq!(phase, "install");
                assert_eq!(failed, 1);
            }
            other => panic!("expected Batch error, got {other:?}"),
        }
    }
}
