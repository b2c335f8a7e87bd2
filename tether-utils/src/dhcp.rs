//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use derive_new::new;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::UnboundedSender;
use crate::link::InterfaceType;

// Fixed DHCPv4 lease time handed out on every downstream.
pub const DHCP_LEASE_TIME_SECS: u32 = 3600;

// Parameters under which the DHCP server serves a downstream.
//
// Recomputed whenever the downstream address or the upstream changes, and
// immutable once handed to the server until the next recompute. The server
// address is always a usable host address strictly inside the announced
// prefix; the default router and DNS server are the server itself.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DhcpServingParams {
    pub server_addr: Ipv4Network,
    pub default_router: Ipv4Addr,
    pub dns_server: Ipv4Addr,
    pub lease_time_secs: u32,
    pub change_prefix_on_decline: bool,
}

// Failure reported by the DHCP server process.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct DhcpError {
    pub message: String,
}

// Messages delivered back into the controller's serialized queue by the
// DHCP server factory and the running server.
//
// Creation callbacks may fire on any thread; the start index ties a
// callback to the lifecycle generation that requested it so stale
// callbacks can be discarded.
#[derive(Debug)]
pub enum DhcpServerMsg {
    Created {
        index: u32,
        result: Result<Arc<dyn DhcpServerHandle>, DhcpError>,
    },
    CreationTimeout {
        index: u32,
    },
    // The server observed a client declining the offered address and
    // requests a whole new prefix.
    NewPrefixRequest,
}

// Completion callback handed to the DHCP server factory.
#[derive(Clone, Debug, new)]
pub struct DhcpCreateCallback {
    index: u32,
    tx: UnboundedSender<DhcpServerMsg>,
}

// Factory for external DHCP server processes. Creation is asynchronous;
// the result is delivered through the provided callback.
pub trait DhcpServerFactory: Send + Sync + std::fmt::Debug {
    fn make_dhcp_server(
        &self,
        ifname: &str,
        params: &DhcpServingParams,
        callback: DhcpCreateCallback,
    );
}

// Handle to a created DHCP server process.
pub trait DhcpServerHandle: Send + Sync + std::fmt::Debug {
    fn start_with_callbacks(
        &self,
        params: &DhcpServingParams,
        events: UnboundedSender<DhcpServerMsg>,
    ) -> Result<(), DhcpError>;

    fn update_params(
        &self,
        params: &DhcpServingParams,
    ) -> Result<(), DhcpError>;

    fn stop(&self) -> Result<(), DhcpError>;
}

// ===== impl DhcpServingParams =====

impl DhcpServingParams {
    // Computes the serving parameters for the given downstream prefix.
    pub fn from_prefix(
        prefix: Ipv4Network,
        if_type: InterfaceType,
        lease_time_secs: u32,
    ) -> DhcpServingParams {
        let server = prefix.ip();
        DhcpServingParams {
            server_addr: prefix,
            default_router: server,
            dns_server: server,
            lease_time_secs,
            change_prefix_on_decline: if_type.change_prefix_on_decline(),
        }
    }
}

// ===== impl DhcpError =====

impl std::fmt::Display for DhcpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DhcpError {}

// ===== impl DhcpCreateCallback =====

impl DhcpCreateCallback {
    // Delivers the creation result into the controller's queue. Safe to
    // call from any thread.
    pub fn complete(
        &self,
        result: Result<Arc<dyn DhcpServerHandle>, DhcpError>,
    ) {
        let _ = self.tx.send(DhcpServerMsg::Created {
            index: self.index,
            result,
        });
    }
}
