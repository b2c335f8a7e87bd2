//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::mac_addr::MacAddr;
use crate::netd::CallError;

// A hardware-offloaded IPv6 forwarding rule.
//
// Conceptually keyed by (downstream interface, destination address). A
// `dst_mac` of `None` means the neighbor's MAC is unknown and the rule is
// matched by destination only; removal keys built from FAILED neighbor
// events carry no MAC.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct ForwardingRule {
    pub upstream_ifindex: u32,
    pub downstream_ifindex: u32,
    pub dst: Ipv6Addr,
    pub downstream_mac: MacAddr,
    pub dst_mac: Option<MacAddr>,
}

// Coordinator for BPF-offloaded forwarding rules.
//
// A single coordinator instance is shared by all downstream controllers;
// it serializes concurrent calls internally. Controllers identify
// themselves by downstream ifindex.
pub trait BpfCoordinator: Send + Sync + std::fmt::Debug {
    fn tether_offload_rule_add(
        &self,
        rule: &ForwardingRule,
    ) -> Result<(), CallError>;

    fn tether_offload_rule_remove(
        &self,
        rule: &ForwardingRule,
    ) -> Result<(), CallError>;

    // Rebinds every rule of the given downstream to a new upstream.
    fn tether_offload_rule_update(
        &self,
        downstream_ifindex: u32,
        new_upstream_ifindex: u32,
    ) -> Result<(), CallError>;

    fn tether_offload_rule_clear(
        &self,
        downstream_ifindex: u32,
    ) -> Result<(), CallError>;
}

// ===== impl ForwardingRule =====

impl ForwardingRule {
    // Returns a copy of this rule bound to a different upstream interface.
    pub fn on_new_upstream(&self, upstream_ifindex: u32) -> ForwardingRule {
        ForwardingRule {
            upstream_ifindex,
            ..self.clone()
        }
    }

    // The MAC address carried in daemon calls for this rule. Unknown MACs
    // are sent as the all-zero address.
    pub fn dst_mac_or_unspecified(&self) -> MacAddr {
        self.dst_mac.unwrap_or(MacAddr::UNSPECIFIED)
    }
}
