//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use ipnetwork::{IpNetwork, Ipv4Network};
use tether_utils::ip::ipv6_link_local_prefix;
use tether_utils::netd::{
    InterfaceConfig, InterfaceFlags, LOCAL_NET_ID, NetdApi, RouteConfig,
};

use crate::error::Error;

// Synchronous wrapper around the network control daemon for one downstream
// interface.
//
// Setup sequences are fail-fast: the first failing call aborts the
// remaining steps and the caller drives a full rollback. Teardown
// sequences are best-effort: every failure is logged and the remaining
// steps still run, so a flaky daemon call cannot leave forwarding state
// outliving the address lease.
#[derive(Debug)]
pub struct InterfaceConfigurator {
    netd: Arc<dyn NetdApi>,
    ifname: String,
}

// ===== impl InterfaceConfigurator =====

impl InterfaceConfigurator {
    pub fn new(netd: Arc<dyn NetdApi>, ifname: String) -> Self {
        InterfaceConfigurator { netd, ifname }
    }

    // Assigns the downstream IPv4 address and brings the interface up.
    pub fn configure_ipv4(&self, addr: Ipv4Network) -> Result<(), Error> {
        let cfg = InterfaceConfig::new(
            self.ifname.clone(),
            Some(addr),
            InterfaceFlags::UP | InterfaceFlags::RUNNING,
        );
        self.netd
            .interface_set_cfg(&cfg)
            .map_err(|error| Error::NetdCall("interface-set-cfg", error))
    }

    // Clears the downstream IPv4 configuration, logging failures.
    pub fn unconfigure_ipv4_best_effort(&self) {
        let cfg = InterfaceConfig::new(
            self.ifname.clone(),
            None,
            InterfaceFlags::empty(),
        );
        if let Err(error) = self.netd.interface_set_cfg(&cfg) {
            Error::NetdCall("interface-set-cfg", error).log();
        }
    }

    // Attaches the interface to the tethering subsystem and the local
    // network.
    pub fn attach(&self) -> Result<(), Error> {
        self.netd
            .tether_interface_add(&self.ifname)
            .map_err(|error| Error::NetdCall("tether-interface-add", error))?;
        self.netd
            .network_add_interface(LOCAL_NET_ID, &self.ifname)
            .map_err(|error| Error::NetdCall("network-add-interface", error))
    }

    // Programs the on-link routes of a served downstream: the allocated
    // IPv4 subnet and the IPv6 link-local prefix.
    pub fn add_local_routes(&self, prefix: Ipv4Network) -> Result<(), Error> {
        let subnet = subnet_of(prefix);
        for destination in
            [IpNetwork::from(subnet), ipv6_link_local_prefix().into()]
        {
            let route = RouteConfig::new(
                LOCAL_NET_ID,
                self.ifname.clone(),
                destination,
                None,
            );
            self.netd
                .network_add_route(&route)
                .map_err(|error| Error::NetdCall("network-add-route", error))?;
        }
        Ok(())
    }

    // Detaches the interface from the tethering subsystem, in the required
    // order, continuing past individual failures.
    pub fn detach_best_effort(&self) {
        if let Err(error) = self.netd.tether_apply_dns_interfaces() {
            Error::NetdCall("tether-apply-dns-interfaces", error).log();
        }
        if let Err(error) = self.netd.tether_interface_remove(&self.ifname) {
            Error::NetdCall("tether-interface-remove", error).log();
        }
        if let Err(error) =
            self.netd.network_remove_interface(LOCAL_NET_ID, &self.ifname)
        {
            Error::NetdCall("network-remove-interface", error).log();
        }
    }

    // Programs NAT forwarding between this downstream and the given
    // upstream. On partial failure the already-programmed half is removed
    // before the error is returned.
    pub fn enable_forwarding(&self, upstream: &str) -> Result<(), Error> {
        self.netd
            .tether_add_forward(&self.ifname, upstream)
            .map_err(|error| Error::NetdCall("tether-add-forward", error))?;
        if let Err(error) =
            self.netd.ipfwd_add_interface_forward(&self.ifname, upstream)
        {
            if let Err(error) =
                self.netd.tether_remove_forward(&self.ifname, upstream)
            {
                Error::NetdCall("tether-remove-forward", error).log();
            }
            return Err(Error::NetdCall("ipfwd-add-interface-forward", error));
        }
        Ok(())
    }

    // Removes NAT forwarding towards the given upstream, logging failures.
    pub fn disable_forwarding_best_effort(&self, upstream: &str) {
        if let Err(error) =
            self.netd.ipfwd_remove_interface_forward(&self.ifname, upstream)
        {
            Error::NetdCall("ipfwd-remove-interface-forward", error).log();
        }
        if let Err(error) =
            self.netd.tether_remove_forward(&self.ifname, upstream)
        {
            Error::NetdCall("tether-remove-forward", error).log();
        }
    }
}

// ===== global functions =====

// Masks the downstream address to its subnet prefix.
pub(crate) fn subnet_of(prefix: Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(prefix.network(), prefix.prefix())
        .expect("prefix length was already validated")
}
