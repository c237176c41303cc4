//! BSD-family (macOS, FreeBSD, OpenBSD, NetBSD) [`RouteDriver`] backed by
//! `PF_ROUTE` sockets via the `net-route` crate, rather than shelling out to
//! the `route` command as earlier split-tunnel prototypes did.

use std::ffi::{CStr, CString};
use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use net_route::Handle;

use splitroute_core::prefix::Prefix;
use splitroute_core::route::Route;

use super::{Error, RouteDriver};

pub struct RouteSocketDriver {
    handle: Handle,
}

impl RouteSocketDriver {
    pub fn new() -> Result<Self, Error> {
        let handle = Handle::new().map_err(|e| Error::SystemCall(format!("opening PF_ROUTE socket: {e}")))?;
        Ok(Self { handle })
    }

    fn ifindex_to_name(ifindex: u32) -> Option<String> {
        let mut buf = [0u8; libc::IF_NAMESIZE];
        // SAFETY: `buf` is sized per IF_NAMESIZE and the call writes at most that many bytes.
        let ptr = unsafe { libc::if_indextoname(ifindex, buf.as_mut_ptr().cast()) };
        if ptr.is_null() {
            return None;
        }
        // SAFETY: `if_indextoname` returns a NUL-terminated string within `buf` on success.
        let cstr = unsafe { CStr::from_ptr(buf.as_ptr().cast()) };
        cstr.to_str().ok().map(str::to_string)
    }

    fn name_to_ifindex(name: &str) -> Result<u32, Error> {
        let cname = CString::new(name).map_err(|_| Error::InvalidRoute(format!("interface name `{name}` has an embedded NUL")))?;
        // SAFETY: `cname` is a valid NUL-terminated C string for the duration of the call.
        let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
        if idx == 0 {
            Err(Error::InvalidRoute(format!("no such interface `{name}`")))
        } else {
            Ok(idx)
        }
    }

    fn to_net_route(route: &Route) -> Result<net_route::Route, Error> {
        let mut nr = net_route::Route::new(IpAddr::V4(route.destination.addr()), route.destination.len())
            .with_gateway(IpAddr::V4(route.gateway));
        if let Some(iface) = &route.iface {
            nr = nr.with_ifindex(Self::name_to_ifindex(iface)?);
        }
        Ok(nr)
    }

    fn from_net_route(route: &net_route::Route) -> Option<Route> {
        let IpAddr::V4(dest) = route.destination else { return None };
        let gateway = match route.gateway {
            Some(IpAddr::V4(gw)) => gw,
            _ => return None,
        };
        let prefix = Prefix::new(dest, route.prefix);
        let mut r = Route::new(prefix, gateway);
        if let Some(idx) = route.ifindex {
            r.iface = Self::ifindex_to_name(idx);
        }
        Some(r)
    }
}

#[async_trait]
impl RouteDriver for RouteSocketDriver {
    async fn add_route(&self, route: &Route) -> Result<(), Error> {
        let nr = Self::to_net_route(route)?;
        self.handle.add(&nr).await.map_err(classify_io_error)
    }

    async fn delete_route(&self, route: &Route) -> Result<(), Error> {
        let nr = Self::to_net_route(route)?;
        self.handle.delete(&nr).await.map_err(classify_io_error)
    }

    async fn get_physical_gateway(&self) -> Result<(Ipv4Addr, String), Error> {
        if let Some((gw, iface)) = super::physical_gateway_via_interfaces() {
            tracing::debug!(strategy = "interface-derivation", %gw, %iface, "resolved physical gateway");
            return Ok((gw, iface));
        }

        let routes = self.list_system_routes().await?;
        if let Some(gw) = super::physical_gateway_by_route_tally(&routes) {
            let iface = routes.iter().find(|r| r.gateway == gw).and_then(|r| r.iface.clone()).unwrap_or_default();
            tracing::debug!(strategy = "route-dump-fallback", %gw, %iface, "resolved physical gateway");
            return Ok((gw, iface));
        }
        Err(Error::NotFound)
    }

    async fn get_system_default_route(&self) -> Result<(Ipv4Addr, String), Error> {
        let default = self.handle.default_route().await.map_err(classify_io_error)?.ok_or(Error::NotFound)?;
        let route = Self::from_net_route(&default).ok_or(Error::NotFound)?;
        let iface = route.iface.unwrap_or_default();
        Ok((route.gateway, iface))
    }

    async fn list_system_routes(&self) -> Result<Vec<Route>, Error> {
        let all = self.handle.list().await.map_err(classify_io_error)?;
        Ok(all.iter().filter_map(Self::from_net_route).collect())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

fn classify_io_error(e: std::io::Error) -> Error {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::AlreadyExists => Error::AlreadyExists,
        ErrorKind::NotFound => Error::NotFound,
        ErrorKind::PermissionDenied => Error::Permission(e.to_string()),
        ErrorKind::TimedOut => Error::Timeout(e.to_string()),
        _ => Error::SystemCall(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_net_route_type() {
        let route = Route::new("10.0.0.0/8".parse().unwrap(), Ipv4Addr::new(192, 168, 1, 1)).with_iface("lo0");
        let nr = RouteSocketDriver::to_net_route(&route).unwrap();
        assert_eq!(nr.destination, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)));
        assert_eq!(nr.prefix, 8);
        assert_eq!(nr.gateway, Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
    }

    #[test]
    fn unresolvable_interface_name_is_invalid_route() {
        let route = Route::new("10.0.0.0/8".parse().unwrap(), Ipv4Addr::new(192, 168, 1, 1))
            .with_iface("definitely-not-a-real-interface-name");
        assert!(matches!(RouteSocketDriver::to_net_route(&route), Err(Error::InvalidRoute(_))));
    }
}
