use std::net::Ipv4Addr;

/// `(physical, physical_iface, default_iface, vpn_connected)`.
///
/// Owned exclusively by the Supervisor and mutated only under its
/// exclusive lock; the Monitor keeps its own, separate internal snapshot
/// for diffing and never touches this one directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySnapshot {
    pub physical: Ipv4Addr,
    pub physical_iface: String,
    pub default_iface: String,
    pub vpn_connected: bool,
}

impl GatewaySnapshot {
    pub fn new(physical: Ipv4Addr, physical_iface: impl Into<String>, default_iface: impl Into<String>, vpn_connected: bool) -> Self {
        GatewaySnapshot {
            physical,
            physical_iface: physical_iface.into(),
            default_iface: default_iface.into(),
            vpn_connected,
        }
    }
}
