//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::Ipv4Network;

use crate::link::InterfaceType;

// Failure to allocate a downstream prefix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocError;

// Shared allocator of non-conflicting downstream IPv4 prefixes.
//
// One allocator instance serves every downstream controller; allocations
// are keyed by interface type. `avoid` excludes a prefix the downstream
// just gave up on (a declined DHCP offer).
pub trait AddressAllocator: Send + Sync + std::fmt::Debug {
    fn request_downstream_address(
        &self,
        if_type: InterfaceType,
        avoid: Option<Ipv4Network>,
    ) -> Result<Ipv4Network, AllocError>;

    fn release_downstream(&self, if_type: InterfaceType);
}

// ===== impl AllocError =====

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no downstream prefix available")
    }
}

impl std::error::Error for AllocError {}
