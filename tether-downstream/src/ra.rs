//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use tether_utils::ip::Ipv6AddrExt;
use tether_utils::netd::{IpFamily, NetdApi, ProcSysSection};
use tether_utils::ra::{DEFAULT_IPV6_HOP_LIMIT, RaDaemon, RaParams};

use crate::debug::Debug;
use crate::error::Error;
use crate::upstream::Ipv6Upstream;

// Computes Router Advertisement parameters for a served downstream and
// drives the RA daemon.
//
// Recomputation is cheap and `build_new_ra` is the authoritative way to
// apply it, so every recomputation triggers exactly one rebuild call even
// when the resulting parameters are unchanged.
#[derive(Debug)]
pub struct RaCoordinator {
    netd: Arc<dyn NetdApi>,
    daemon: Arc<dyn RaDaemon>,
    running: bool,
    params: RaParams,
}

// ===== impl RaCoordinator =====

impl RaCoordinator {
    pub fn new(netd: Arc<dyn NetdApi>, daemon: Arc<dyn RaDaemon>) -> Self {
        RaCoordinator {
            netd,
            daemon,
            running: false,
            params: Default::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn params(&self) -> &RaParams {
        &self.params
    }

    // Starts the RA daemon. Failure leaves the downstream serving
    // IPv4-only; it is logged by the caller and is not a state machine
    // error.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.running {
            return Ok(());
        }
        if !self.daemon.start() {
            return Err(Error::RaStart);
        }
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.running {
            self.daemon.stop();
            self.running = false;
            self.params = Default::default();
        }
    }

    // Recomputes the RA parameters from the current upstream and rebuilds
    // the advertisement.
    pub fn update(&mut self, upstream: Option<&Ipv6Upstream>) {
        if !self.running {
            return;
        }

        self.params = self.compute_params(upstream);
        Debug::RaRebuild(self.params.hop_limit).log();
        self.daemon
            .build_new_ra(upstream.map(|up| &up.props), &self.params);
    }

    fn compute_params(&self, upstream: Option<&Ipv6Upstream>) -> RaParams {
        let mut params = RaParams {
            hop_limit: self.hop_limit(upstream),
            ..Default::default()
        };

        if let Some(up) = upstream {
            // Advertise the upstream's global prefixes downstream.
            params.prefixes = up
                .props
                .addresses
                .iter()
                .filter_map(|addr| match addr {
                    IpNetwork::V6(network)
                        if !network.ip().is_link_local()
                            && !network.ip().is_multicast() =>
                    {
                        Some(*network)
                    }
                    _ => None,
                })
                .collect();
            params.has_default_route = up
                .props
                .routes
                .iter()
                .any(|route| {
                    matches!(route.destination, IpNetwork::V6(network)
                        if network.prefix() == 0)
                });
            if let Some(IpAddr::V6(dns)) = up.props.dns_server {
                params.dns_servers = vec![dns];
            }
        }

        params
    }

    // Computes the hop limit announced downstream: the upstream's own hop
    // limit (default 65 when it cannot be read) plus the path adjustment,
    // clamped to the valid range.
    fn hop_limit(&self, upstream: Option<&Ipv6Upstream>) -> u8 {
        let Some(up) = upstream else {
            return DEFAULT_IPV6_HOP_LIMIT;
        };

        let base = self
            .netd
            .get_proc_sys_net(
                IpFamily::Ipv6,
                ProcSysSection::Conf,
                &up.props.ifname,
                "hop_limit",
            )
            .ok()
            .and_then(|value| value.trim().parse::<i32>().ok())
            .unwrap_or(DEFAULT_IPV6_HOP_LIMIT as i32);

        (base + up.ttl_adjustment as i32).clamp(1, 255) as u8
    }
}
