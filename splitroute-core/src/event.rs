use std::net::Ipv4Addr;
use std::time::Instant;

/// Emitted by the Network Monitor on an observed topology change.
///
/// Carries enough of the observed sample that the Supervisor can act
/// without re-querying the driver, though it may choose to re-snapshot
/// anyway (see `AddressChanged`'s delayed re-sample).
#[derive(Debug, Clone)]
pub struct NetworkEvent {
    pub kind: EventKind,
    pub physical_gateway: Ipv4Addr,
    pub physical_iface: String,
    pub default_iface: String,
    pub observed_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PhysicalGatewayChanged,
    VpnConnected,
    VpnDisconnected,
    InterfaceUp,
    InterfaceDown,
    AddressChanged,
}

impl NetworkEvent {
    pub fn new(kind: EventKind, physical_gateway: Ipv4Addr, physical_iface: impl Into<String>, default_iface: impl Into<String>) -> Self {
        NetworkEvent {
            kind,
            physical_gateway,
            physical_iface: physical_iface.into(),
            default_iface: default_iface.into(),
            observed_at: Instant::now(),
        }
    }
}
