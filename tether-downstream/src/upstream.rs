//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use derive_new::new;
use serde::{Deserialize, Serialize};
use tether_utils::link::LinkProperties;

// IPv6 side of the current upstream.
//
// `ttl_adjustment` is -2 when the network stack classifies the upstream as
// a cellular path, 0 otherwise; the classification is the caller's.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct Ipv6Upstream {
    pub ifindex: u32,
    pub props: LinkProperties,
    pub ttl_adjustment: i8,
}

// Result of replacing one side of the tracked upstream. `Changed` carries
// the previous value.
#[derive(Debug, Eq, PartialEq)]
pub enum UpstreamChange<T> {
    Unchanged,
    Changed(Option<T>),
}

// Tracks the current upstream of a served downstream.
//
// The IPv4 identity (name + ifindex) is replaced wholesale on each
// upstream-changed command; the IPv6 side is replaced on each IPv6 update.
// Both replacements detect duplicate notifications by value comparison so
// repeated identical notifications produce no observable side effects.
#[derive(Debug, Default)]
pub struct UpstreamTracker {
    ifname: Option<String>,
    ifindex: u32,
    v6: Option<Ipv6Upstream>,
}

// ===== impl UpstreamTracker =====

impl UpstreamTracker {
    pub fn ifname(&self) -> Option<&str> {
        self.ifname.as_deref()
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn v6(&self) -> Option<&Ipv6Upstream> {
        self.v6.as_ref()
    }

    pub fn has_ipv6(&self) -> bool {
        self.v6.is_some()
    }

    // Replaces the upstream identity. Returns `Unchanged` for duplicate
    // notifications.
    pub fn set_upstream(
        &mut self,
        ifname: Option<String>,
        ifindex: u32,
    ) -> UpstreamChange<String> {
        if self.ifname == ifname && self.ifindex == ifindex {
            return UpstreamChange::Unchanged;
        }

        let old = std::mem::replace(&mut self.ifname, ifname);
        self.ifindex = ifindex;
        UpstreamChange::Changed(old)
    }

    // Forgets the upstream identity without touching the IPv6 side. Used
    // when forwarding programming fails and must be retried on the next
    // notification.
    pub fn clear_upstream(&mut self) {
        self.ifname = None;
        self.ifindex = 0;
    }

    // Replaces the IPv6 side of the upstream. Returns `Unchanged` when
    // neither the identity nor the IPv6 properties changed.
    pub fn set_ipv6(
        &mut self,
        upstream: Option<Ipv6Upstream>,
    ) -> UpstreamChange<Ipv6Upstream> {
        if self.v6 == upstream {
            return UpstreamChange::Unchanged;
        }

        let old = std::mem::replace(&mut self.v6, upstream);
        UpstreamChange::Changed(old)
    }

    // Forgets everything known about the upstream.
    pub fn clear(&mut self) {
        self.ifname = None;
        self.ifindex = 0;
        self.v6 = None;
    }
}
