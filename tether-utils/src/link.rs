//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::borrow::Cow;
use std::net::IpAddr;

use derive_new::new;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

// Type of a downstream interface.
//
// Fixed at construction time. The type determines whether the interface is
// administratively brought up when serving starts, and whether the DHCP
// server may renegotiate the whole subnet on a declined offer.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceType {
    Usb,
    Wifi,
    WifiP2p,
    Bluetooth,
    Ncm,
    Ethernet,
}

// A route associated with a downstream interface.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct RouteEntry {
    pub destination: IpNetwork,
    pub ifname: String,
}

// The IP configuration of a downstream interface, as reported to the
// controller's owner.
//
// Invariant: `ifname` is never empty when reported. Addresses and routes
// may be empty (interface down or not serving).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LinkProperties {
    pub ifname: String,
    pub addresses: Vec<IpNetwork>,
    pub routes: Vec<RouteEntry>,
    pub dns_server: Option<IpAddr>,
}

// ===== impl InterfaceType =====

impl InterfaceType {
    // Whether serving setup administratively brings the interface up.
    //
    // Bluetooth PAN interfaces are brought up by the Bluetooth stack and
    // must not be reconfigured here.
    pub fn starts_admin_up(&self) -> bool {
        !matches!(self, InterfaceType::Bluetooth)
    }

    // Whether the DHCP server may request a whole new subnet when a client
    // declines the offered address.
    pub fn change_prefix_on_decline(&self) -> bool {
        matches!(self, InterfaceType::Ncm)
    }

    pub fn as_str(&self) -> Cow<'static, str> {
        match self {
            InterfaceType::Usb => "usb".into(),
            InterfaceType::Wifi => "wifi".into(),
            InterfaceType::WifiP2p => "wifi-p2p".into(),
            InterfaceType::Bluetooth => "bluetooth".into(),
            InterfaceType::Ncm => "ncm".into(),
            InterfaceType::Ethernet => "ethernet".into(),
        }
    }
}

impl std::fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl LinkProperties =====

impl LinkProperties {
    pub fn new(ifname: String) -> LinkProperties {
        LinkProperties {
            ifname,
            ..Default::default()
        }
    }

    // Removes all addresses, routes and DNS information, retaining the
    // interface name.
    pub fn clear(&mut self) {
        self.addresses.clear();
        self.routes.clear();
        self.dns_server = None;
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
            && self.routes.is_empty()
            && self.dns_server.is_none()
    }
}
