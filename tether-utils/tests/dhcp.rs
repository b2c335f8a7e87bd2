//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::dhcp::{DHCP_LEASE_TIME_SECS, DhcpServingParams};
use tether_utils::ip::Ipv4NetworkExt;
use tether_utils::link::InterfaceType;

#[test]
fn test_serving_params_from_prefix() {
    let prefix = "192.168.42.129/24".parse().unwrap();
    let params = DhcpServingParams::from_prefix(
        prefix,
        InterfaceType::Usb,
        DHCP_LEASE_TIME_SECS,
    );

    // The server address lies strictly inside the announced prefix; the
    // default router and DNS server are the server itself.
    assert!(params.server_addr.is_usable_host(params.server_addr.ip()));
    assert_eq!(params.default_router, params.server_addr.ip());
    assert_eq!(params.dns_server, params.server_addr.ip());
    assert_eq!(params.lease_time_secs, DHCP_LEASE_TIME_SECS);
    assert!(!params.change_prefix_on_decline);
}

#[test]
fn test_prefix_renegotiation_per_interface_type() {
    for (if_type, expected) in [
        (InterfaceType::Usb, false),
        (InterfaceType::Wifi, false),
        (InterfaceType::WifiP2p, false),
        (InterfaceType::Bluetooth, false),
        (InterfaceType::Ncm, true),
        (InterfaceType::Ethernet, false),
    ] {
        let prefix = "192.168.42.1/24".parse().unwrap();
        let params =
            DhcpServingParams::from_prefix(prefix, if_type, DHCP_LEASE_TIME_SECS);
        assert_eq!(params.change_prefix_on_decline, expected);
    }
}

#[test]
fn test_usable_host() {
    let prefix: ipnetwork::Ipv4Network = "192.168.42.0/24".parse().unwrap();
    assert!(prefix.is_usable_host("192.168.42.1".parse().unwrap()));
    assert!(!prefix.is_usable_host("192.168.42.0".parse().unwrap()));
    assert!(!prefix.is_usable_host("192.168.42.255".parse().unwrap()));
    assert!(!prefix.is_usable_host("192.168.43.1".parse().unwrap()));
}
