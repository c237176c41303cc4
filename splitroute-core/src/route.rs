use std::fmt;
use std::net::Ipv4Addr;

use crate::prefix::Prefix;

/// A kernel route: `(destination, gateway)`.
///
/// Interface name, metric and kernel flags are informational only —
/// equality and hashing are defined solely over `destination`, matching
/// the ownership rule the Reconciler relies on (it asserts ownership by
/// destination match against the `ManagedSet`, never by gateway or iface).
#[derive(Debug, Clone)]
pub struct Route {
    pub destination: Prefix,
    pub gateway: Ipv4Addr,
    pub iface: Option<String>,
    pub metric: Option<u32>,
}

impl Route {
    pub fn new(destination: Prefix, gateway: Ipv4Addr) -> Self {
        Route { destination, gateway, iface: None, metric: None }
    }

    pub fn with_iface(mut self, iface: impl Into<String>) -> Self {
        self.iface = Some(iface.into());
        self
    }

    pub fn with_metric(mut self, metric: u32) -> Self {
        self.metric = Some(metric);
        self
    }
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.destination == other.destination
    }
}
impl Eq for Route {}

impl std::hash::Hash for Route {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.destination.hash(state);
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.destination, self.gateway)
    }
}
