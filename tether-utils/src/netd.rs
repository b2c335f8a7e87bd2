//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bitflags::bitflags;
use derive_new::new;
use ipnetwork::{IpNetwork, Ipv4Network};
use serde::{Deserialize, Serialize};

use crate::bpf::ForwardingRule;

// Network ID of the local network all tethered downstreams are attached to.
pub const LOCAL_NET_ID: u32 = 99;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct InterfaceFlags: u8 {
        const UP = 0x01;
        const RUNNING = 0x02;
    }
}

// Administrative configuration of a network interface.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceConfig {
    pub ifname: String,
    pub addr: Option<Ipv4Network>,
    pub flags: InterfaceFlags,
}

// A route programmed into one of the daemon's networks.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct RouteConfig {
    pub net_id: u32,
    pub ifname: String,
    pub destination: IpNetwork,
    pub nexthop: Option<IpAddr>,
}

// Traffic counters returned when an upstream's offload rules are detached.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct OffloadStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum IpFamily {
    Ipv4,
    Ipv6,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ProcSysSection {
    Conf,
    Neigh,
}

// Remote-call failure reported by the network control daemon.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct CallError {
    pub message: String,
}

// Interface to the network control daemon.
//
// All calls are synchronous and may block; any call may fail with a
// remote-call error. Callers never let these errors escape the controller.
pub trait NetdApi: Send + Sync + std::fmt::Debug {
    fn interface_set_cfg(
        &self,
        cfg: &InterfaceConfig,
    ) -> Result<(), CallError>;

    fn interface_get_cfg(
        &self,
        ifname: &str,
    ) -> Result<InterfaceConfig, CallError>;

    fn tether_interface_add(&self, ifname: &str) -> Result<(), CallError>;

    fn tether_interface_remove(&self, ifname: &str) -> Result<(), CallError>;

    fn network_add_interface(
        &self,
        net_id: u32,
        ifname: &str,
    ) -> Result<(), CallError>;

    fn network_remove_interface(
        &self,
        net_id: u32,
        ifname: &str,
    ) -> Result<(), CallError>;

    fn network_add_route(&self, route: &RouteConfig) -> Result<(), CallError>;

    // Reapplies the current DNS configuration to the set of tethered
    // interfaces.
    fn tether_apply_dns_interfaces(&self) -> Result<(), CallError>;

    fn ipfwd_add_interface_forward(
        &self,
        from_iface: &str,
        to_iface: &str,
    ) -> Result<(), CallError>;

    fn ipfwd_remove_interface_forward(
        &self,
        from_iface: &str,
        to_iface: &str,
    ) -> Result<(), CallError>;

    fn tether_add_forward(
        &self,
        intern_iface: &str,
        extern_iface: &str,
    ) -> Result<(), CallError>;

    fn tether_remove_forward(
        &self,
        intern_iface: &str,
        extern_iface: &str,
    ) -> Result<(), CallError>;

    fn tether_offload_rule_add(
        &self,
        rule: &ForwardingRule,
    ) -> Result<(), CallError>;

    fn tether_offload_rule_remove(
        &self,
        rule: &ForwardingRule,
    ) -> Result<(), CallError>;

    fn tether_offload_rule_clear(
        &self,
        downstream_ifindex: u32,
    ) -> Result<(), CallError>;

    fn tether_offload_get_and_clear_stats(
        &self,
        upstream_ifindex: u32,
    ) -> Result<OffloadStats, CallError>;

    fn get_proc_sys_net(
        &self,
        family: IpFamily,
        section: ProcSysSection,
        ifname: &str,
        parameter: &str,
    ) -> Result<String, CallError>;
}

// ===== impl CallError =====

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CallError {}
