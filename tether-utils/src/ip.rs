//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};

// Extension methods for Ipv6Addr.
pub trait Ipv6AddrExt {
    // Returns true if this is a link-local unicast address (fe80::/10).
    fn is_link_local(&self) -> bool;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    // Returns true if the given address is a usable host address strictly
    // inside this prefix (not the network or broadcast address).
    fn is_usable_host(&self, addr: Ipv4Addr) -> bool;
}

// ===== impl Ipv6Addr =====

impl Ipv6AddrExt for Ipv6Addr {
    fn is_link_local(&self) -> bool {
        (self.segments()[0] & 0xffc0) == 0xfe80
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    fn is_usable_host(&self, addr: Ipv4Addr) -> bool {
        self.contains(addr)
            && addr != self.network()
            && addr != self.broadcast()
    }
}

// ===== global functions =====

// The IPv6 link-local prefix (fe80::/64), programmed as an on-link route
// on every served downstream.
pub fn ipv6_link_local_prefix() -> Ipv6Network {
    Ipv6Network::new(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 64)
        .expect("valid constant prefix")
}
