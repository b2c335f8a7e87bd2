//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::Ipv4Network;
use tether_utils::bpf::ForwardingRule;
use tether_utils::neighbor::NeighborEvent;
use tracing::{debug, debug_span};

use crate::instance::{DownstreamState, ServingMode};

// Downstream controller debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceCreate,
    InstanceDispose,
    FsmTransition(DownstreamState, DownstreamState),
    CommandIgnored(&'static str, DownstreamState),
    ServingStart(ServingMode),
    ServingStop,
    UpstreamChange(Option<&'a str>),
    UpstreamDuplicate,
    Ipv6UpstreamChange(Option<u32>),
    DhcpServerCreated(u32),
    NewPrefixRequest(&'a Ipv4Network),
    RaRebuild(u8),
    NeighborUpdate(&'a NeighborEvent),
    RuleAdd(&'a ForwardingRule),
    RuleRemove(&'a ForwardingRule),
    RuleClear(usize),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceCreate | Debug::InstanceDispose => {
                debug!("{}", self);
            }
            Debug::FsmTransition(old_state, new_state) => {
                debug!(?old_state, ?new_state, "{}", self);
            }
            Debug::CommandIgnored(command, state) => {
                debug!(%command, ?state, "{}", self);
            }
            Debug::ServingStart(mode) => {
                debug!(?mode, "{}", self);
            }
            Debug::ServingStop => {
                debug!("{}", self);
            }
            Debug::UpstreamChange(ifname) => {
                debug!(?ifname, "{}", self);
            }
            Debug::UpstreamDuplicate => {
                debug!("{}", self);
            }
            Debug::Ipv6UpstreamChange(ifindex) => {
                debug!(?ifindex, "{}", self);
            }
            Debug::DhcpServerCreated(index) => {
                debug_span!("dhcp").in_scope(|| {
                    debug!(%index, "{}", self);
                });
            }
            Debug::NewPrefixRequest(prefix) => {
                debug_span!("dhcp").in_scope(|| {
                    debug!(%prefix, "{}", self);
                });
            }
            Debug::RaRebuild(hop_limit) => {
                debug_span!("ra").in_scope(|| {
                    debug!(%hop_limit, "{}", self);
                });
            }
            Debug::NeighborUpdate(event) => {
                debug_span!("neighbor").in_scope(|| {
                    debug!(
                        ifindex = %event.ifindex, addr = %event.addr,
                        state = %event.state, "{}", self,
                    );
                });
            }
            Debug::RuleAdd(rule) | Debug::RuleRemove(rule) => {
                debug_span!("neighbor").in_scope(|| {
                    debug!(
                        dst = %rule.dst,
                        upstream_ifindex = %rule.upstream_ifindex,
                        "{}", self,
                    );
                });
            }
            Debug::RuleClear(count) => {
                debug_span!("neighbor").in_scope(|| {
                    debug!(%count, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceCreate => {
                write!(f, "downstream instance created")
            }
            Debug::InstanceDispose => {
                write!(f, "downstream instance disposed")
            }
            Debug::FsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::CommandIgnored(..) => {
                write!(f, "command ignored in current state")
            }
            Debug::ServingStart(..) => {
                write!(f, "serving started")
            }
            Debug::ServingStop => {
                write!(f, "serving stopped")
            }
            Debug::UpstreamChange(..) => {
                write!(f, "upstream changed")
            }
            Debug::UpstreamDuplicate => {
                write!(f, "duplicate upstream notification")
            }
            Debug::Ipv6UpstreamChange(..) => {
                write!(f, "IPv6 upstream changed")
            }
            Debug::DhcpServerCreated(..) => {
                write!(f, "DHCP server created")
            }
            Debug::NewPrefixRequest(..) => {
                write!(f, "new prefix requested")
            }
            Debug::RaRebuild(..) => {
                write!(f, "rebuilding router advertisement")
            }
            Debug::NeighborUpdate(..) => {
                write!(f, "neighbor updated")
            }
            Debug::RuleAdd(..) => {
                write!(f, "forwarding rule installed")
            }
            Debug::RuleRemove(..) => {
                write!(f, "forwarding rule removed")
            }
            Debug::RuleClear(..) => {
                write!(f, "forwarding rules cleared")
            }
        }
    }
}
