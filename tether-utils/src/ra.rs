//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};

use crate::link::LinkProperties;

// Default hop limit announced in Router Advertisements when the upstream's
// own hop limit cannot be determined.
pub const DEFAULT_IPV6_HOP_LIMIT: u8 = 65;

// Parameters from which the RA daemon builds its advertisements.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RaParams {
    pub has_default_route: bool,
    pub hop_limit: u8,
    pub prefixes: Vec<Ipv6Network>,
    pub dns_servers: Vec<Ipv6Addr>,
}

// Interface to the Router Advertisement daemon.
//
// `build_new_ra` is the authoritative way to apply recomputed parameters;
// it is invoked on every recomputation regardless of whether the values
// changed.
pub trait RaDaemon: Send + Sync + std::fmt::Debug {
    fn start(&self) -> bool;

    fn stop(&self);

    fn build_new_ra(
        &self,
        upstream: Option<&LinkProperties>,
        params: &RaParams,
    );
}
