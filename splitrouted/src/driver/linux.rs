//! Linux [`RouteDriver`] backed by `rtnetlink`.
//!
//! Opens its own netlink socket and spawns the connection's driving future;
//! `rtnetlink::Handle` is cheaply cloneable so callers that also need raw
//! access (link enumeration, policy rules) can clone it out of [`NetlinkDriver::handle`].

use std::net::Ipv4Addr;

use async_trait::async_trait;
use futures::TryStreamExt;
use rtnetlink::packet_route::link::LinkAttribute;
use rtnetlink::packet_route::route::{RouteAddress, RouteAttribute};

use splitroute_core::prefix::Prefix;
use splitroute_core::route::Route;

use super::{Error, RouteDriver};

pub struct NetlinkDriver {
    handle: rtnetlink::Handle,
}

impl NetlinkDriver {
    pub fn new() -> Result<Self, Error> {
        let (conn, handle, _) =
            rtnetlink::new_connection().map_err(|e| Error::SystemCall(format!("opening netlink socket: {e}")))?;
        tokio::task::spawn(conn);
        Ok(Self { handle })
    }

    pub fn handle(&self) -> rtnetlink::Handle {
        self.handle.clone()
    }

    async fn resolve_ifindex(&self, iface: &str) -> Result<u32, Error> {
        let links: Vec<_> = self
            .handle
            .link()
            .get()
            .match_name(iface.to_string())
            .execute()
            .try_collect()
            .await
            .map_err(|e| Error::Network(format!("resolving interface `{iface}`: {e}")))?;
        links.first().map(|l| l.header.index).ok_or_else(|| Error::InvalidRoute(format!("no such interface `{iface}`")))
    }

    async fn link_name(&self, index: u32) -> Option<String> {
        let links: Vec<_> = self.handle.link().get().execute().try_collect().await.ok()?;
        links.iter().find(|l| l.header.index == index).and_then(|l| {
            l.attributes.iter().find_map(|a| match a {
                LinkAttribute::IfName(n) => Some(n.clone()),
                _ => None,
            })
        })
    }

    fn message_to_route(msg: &rtnetlink::packet_route::route::RouteMessage) -> Option<Route> {
        let destination = msg
            .attributes
            .iter()
            .find_map(|a| match a {
                RouteAttribute::Destination(RouteAddress::Inet(ip)) => Some(*ip),
                _ => None,
            })
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        let gateway = msg.attributes.iter().find_map(|a| match a {
            RouteAttribute::Gateway(RouteAddress::Inet(ip)) => Some(*ip),
            _ => None,
        })?;
        let if_index = msg.attributes.iter().find_map(|a| match a {
            RouteAttribute::Oif(idx) => Some(*idx),
            _ => None,
        });

        let prefix = Prefix::new(destination, msg.header.destination_prefix_length);
        let mut route = Route::new(prefix, gateway);
        if let Some(idx) = if_index {
            route.iface = Some(idx.to_string());
        }
        Some(route)
    }

    fn build_message(route: &Route, if_index: u32) -> rtnetlink::packet_route::route::RouteMessage {
        rtnetlink::RouteMessageBuilder::<Ipv4Addr>::default()
            .destination_prefix(route.destination.addr(), route.destination.len())
            .gateway(route.gateway)
            .output_interface(if_index)
            .build()
    }

    /// Resolves the output interface for a route lacking an explicit one by
    /// finding which existing system route already uses the same gateway.
    async fn resolve_output_interface(&self, route: &Route) -> Result<u32, Error> {
        if let Some(iface) = &route.iface {
            return self.resolve_ifindex(iface).await;
        }
        let routes = self.list_system_routes().await?;
        let iface = routes
            .iter()
            .find(|r| r.gateway == route.gateway)
            .and_then(|r| r.iface.clone())
            .ok_or_else(|| Error::InvalidRoute(format!("no interface known for gateway {}", route.gateway)))?;
        self.resolve_ifindex(&iface).await
    }
}

#[async_trait]
impl RouteDriver for NetlinkDriver {
    async fn add_route(&self, route: &Route) -> Result<(), Error> {
        let if_index = self.resolve_output_interface(route).await?;
        let msg = Self::build_message(route, if_index);
        self.handle.route().add(msg).execute().await.map_err(classify_rtnetlink_error)
    }

    async fn delete_route(&self, route: &Route) -> Result<(), Error> {
        let if_index = self.resolve_output_interface(route).await?;
        let msg = Self::build_message(route, if_index);
        self.handle.route().del(msg).execute().await.map_err(classify_rtnetlink_error)
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
        let routes: Vec<_> = self
            .handle
            .route()
            .get(rtnetlink::RouteMessageBuilder::<Ipv4Addr>::default().build())
            .execute()
            .try_collect()
            .await
            .map_err(classify_rtnetlink_error)?;

        let default_msg = routes
            .iter()
            .find(|r| r.header.destination_prefix_length == 0)
            .ok_or(Error::NotFound)?;

        let route = Self::message_to_route(default_msg).ok_or(Error::NotFound)?;
        let if_index: u32 = route.iface.as_deref().and_then(|s| s.parse().ok()).ok_or(Error::NotFound)?;
        let name = self.link_name(if_index).await.unwrap_or_default();
        Ok((route.gateway, name))
    }

    async fn list_system_routes(&self) -> Result<Vec<Route>, Error> {
        let msgs: Vec<_> = self
            .handle
            .route()
            .get(rtnetlink::RouteMessageBuilder::<Ipv4Addr>::default().build())
            .execute()
            .try_collect()
            .await
            .map_err(classify_rtnetlink_error)?;

        let mut routes = Vec::with_capacity(msgs.len());
        for msg in &msgs {
            let Some(mut route) = Self::message_to_route(msg) else { continue };
            if let Some(idx_str) = &route.iface {
                if let Ok(idx) = idx_str.parse::<u32>() {
                    route.iface = self.link_name(idx).await;
                }
            }
            routes.push(route);
        }
        Ok(routes)
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

fn classify_rtnetlink_error(e: rtnetlink::Error) -> Error {
    let msg = e.to_string();
    if msg.contains("EEXIST") {
        Error::AlreadyExists
    } else if msg.contains("ESRCH") || msg.contains("ENOENT") {
        Error::NotFound
    } else if msg.contains("EPERM") || msg.contains("EACCES") {
        Error::Permission(msg)
    } else {
        Error::SystemCall(msg)
    }
}
