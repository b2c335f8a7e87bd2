//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod debug;
pub mod dhcp;
pub mod error;
pub mod events;
pub mod instance;
pub mod neighbor;
pub mod netlink;
pub mod ra;
pub mod southbound;
pub mod tasks;
#[cfg(feature = "testing")]
pub mod testing;
pub mod upstream;
