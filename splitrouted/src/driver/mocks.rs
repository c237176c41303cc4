//! Stateful mock driver for exercising the reconciler, monitor and
//! supervisor without touching a real routing table.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use async_trait::async_trait;

use splitroute_core::route::Route;

use super::{BatchOutcome, Error, RouteDriver};

#[derive(Debug, Default)]
struct State {
    routes: HashSet<Route>,
    closed: bool,
    physical_gateway: Option<(Ipv4Addr, String)>,
    system_default: Option<(Ipv4Addr, String)>,
    /// Method name -> error to return instead of acting, consumed on first use.
    fail_on: HashMap<String, Error>,
    add_calls: usize,
    delete_calls: usize,
}

/// In-memory stand-in for a platform [`RouteDriver`]. Routes are tracked in
/// a `HashSet` keyed by destination, matching the real equality rule.
/// Inject a failure for the next call to a given method with [`Self::fail_next`];
/// the entry is consumed so subsequent calls succeed normally.
#[derive(Debug, Default)]
pub struct MockDriver {
    state: Mutex<State>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_physical_gateway(self, gateway: Ipv4Addr, iface: impl Into<String>) -> Self {
        self.state.lock().unwrap().physical_gateway = Some((gateway, iface.into()));
        self
    }

    pub fn with_system_default(self, gateway: Ipv4Addr, iface: impl Into<String>) -> Self {
        self.state.lock().unwrap().system_default = Some((gateway, iface.into()));
        self
    }

    pub fn set_system_default(&self, gateway: Ipv4Addr, iface: impl Into<String>) {
        self.state.lock().unwrap().system_default = Some((gateway, iface.into()));
    }

    /// Arranges for the next call to `method` (e.g. `"add_route"`) to return
    /// `err` instead of performing the operation.
    pub fn fail_next(&self, method: &str, err: Error) {
        self.state.lock().unwrap().fail_on.insert(method.to_string(), err);
    }

    pub fn contains(&self, route: &Route) -> bool {
        self.state.lock().unwrap().routes.contains(route)
    }

    pub fn route_count(&self) -> usize {
        self.state.lock().unwrap().routes.len()
    }

    pub fn add_calls(&self) -> usize {
        self.state.lock().unwrap().add_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.state.lock().unwrap().delete_calls
    }

    fn take_failure(state: &mut State, method: &str) -> Option<Error> {
        state.fail_on.remove(method)
    }
}

#[async_trait]
impl RouteDriver for MockDriver {
    async fn add_route(&self, route: &Route) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.add_calls += 1;
        if state.closed {
            return Err(Error::Closed);
        }
        if let Some(err) = Self::take_failure(&mut state, "add_route") {
            return Err(err);
        }
        if !state.routes.insert(route.clone()) {
            return Err(Error::AlreadyExists);
        }
        Ok(())
    }

    async fn delete_route(&self, route: &Route) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.delete_calls += 1;
        if state.closed {
            return Err(Error::Closed);
        }
        if let Some(err) = Self::take_failure(&mut state, "delete_route") {
            return Err(err);
        }
        if !state.routes.remove(route) {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn batch_add(&self, routes: &[Route]) -> BatchOutcome {
        let mut outcome = BatchOutcome { attempted: routes.len(), ..Default::default() };
        for route in routes {
            if let Err(e) = self.add_route(route).await {
                if !e.is_idempotent_success() {
                    outcome.failed += 1;
                    outcome.causes.push(format!("{route}: {e}"));
                }
            }
        }
        outcome
    }

    async fn batch_delete(&self, routes: &[Route]) -> BatchOutcome {
        let mut outcome = BatchOutcome { attempted: routes.len(), ..Default::default() };
        for route in routes {
            if let Err(e) = self.delete_route(route).await {
                if !e.is_idempotent_success() {
                    outcome.failed += 1;
                    outcome.causes.push(format!("{route}: {e}"));
                }
            }
        }
        outcome
    }

    async fn get_physical_gateway(&self) -> Result<(Ipv4Addr, String), Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = Self::take_failure(&mut state, "get_physical_gateway") {
            return Err(err);
        }
        state.physical_gateway.clone().ok_or(Error::NotFound)
    }

    async fn get_system_default_route(&self) -> Result<(Ipv4Addr, String), Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = Self::take_failure(&mut state, "get_system_default_route") {
            return Err(err);
        }
        state.system_default.clone().ok_or(Error::NotFound)
    }

    async fn list_system_routes(&self) -> Result<Vec<Route>, Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = Self::take_failure(&mut state, "list_system_routes") {
            return Err(err);
        }
        Ok(state.routes.iter().cloned().collect())
    }

    async fn close(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(dest: &str, gw: Ipv4Addr) -> Route {
        Route::new(dest.parse().unwrap(), gw)
    }

    #[tokio::test]
    async fn add_then_delete_round_trips() {
        let driver = MockDriver::new();
        let r = route("10.0.0.0/8", Ipv4Addr::new(192, 168, 1, 1));
        driver.add_route(&r).await.unwrap();
        assert!(driver.contains(&r));
        driver.delete_route(&r).await.unwrap();
        assert!(!driver.contains(&r));
    }

    #[tokio::test]
    async fn duplicate_add_is_already_exists() {
        let driver = MockDriver::new();
        let r = route("10.0.0.0/8", Ipv4Addr::new(192, 168, 1, 1));
        driver.add_route(&r).await.unwrap();
        let err = driver.add_route(&r).await.unwrap_err();
        assert!(err.is_idempotent_success());
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let driver = MockDriver::new();
        let r = route("10.0.0.0/8", Ipv4Addr::new(192, 168, 1, 1));
        let err = driver.delete_route(&r).await.unwrap_err();
        assert!(err.is_idempotent_success());
    }

    #[tokio::test]
    async fn fail_next_is_consumed_once() {
        let driver = MockDriver::new();
        let r = route("10.0.0.0/8", Ipv4Addr::new(192, 168, 1, 1));
        driver.fail_next("add_route", Error::Permission("denied".into()));
        let err = driver.add_route(&r).await.unwrap_err();
        assert!(!err.is_idempotent_success());
        assert!(!driver.contains(&r));

        driver.add_route(&r).await.unwrap();
        assert!(driver.contains(&r));
    }

    #[tokio::test]
    async fn batch_add_absorbs_duplicates() {
        let driver = MockDriver::new();
        let r = route("10.0.0.0/8", Ipv4Addr::new(192, 168, 1, 1));
        driver.add_route(&r).await.unwrap();
        let outcome = driver.batch_add(&[r]).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn closed_driver_rejects_operations() {
        let driver = MockDriver::new();
        driver.close().await.unwrap();
        let r = route("10.0.0.0/8", Ipv4Addr::new(192, 168, 1, 1));
        assert!(matches!(driver.add_route(&r).await, Err(Error::Closed)));
    }
}
