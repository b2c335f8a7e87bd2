//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::UnboundedSender;
use crate::mac_addr::MacAddr;

// Kernel neighbor unreachability detection states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum NudState {
    Incomplete,
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
    NoArp,
    Permanent,
    None,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum NeighborEventKind {
    New,
    Del,
}

// A neighbor table update delivered by the neighbor monitor.
//
// Transient; never persisted. FAILED events and deletions carry no MAC.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct NeighborEvent {
    pub ifindex: u32,
    pub kind: NeighborEventKind,
    pub addr: IpAddr,
    pub state: NudState,
    pub mac: Option<MacAddr>,
}

// Source of neighbor table updates for one downstream interface.
pub trait NeighborMonitor: Send + Sync + std::fmt::Debug {
    fn start(
        &self,
        tx: UnboundedSender<NeighborEvent>,
    ) -> std::io::Result<()>;

    fn stop(&self);
}

// ===== impl NudState =====

impl NudState {
    // Whether the kernel considers the neighbor entry valid (a superset of
    // REACHABLE; mirrors NUD_VALID).
    pub fn is_valid(&self) -> bool {
        matches!(
            self,
            NudState::Reachable
                | NudState::Stale
                | NudState::Delay
                | NudState::Probe
                | NudState::Permanent
                | NudState::NoArp
        )
    }
}

impl std::fmt::Display for NudState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NudState::Incomplete => "incomplete",
            NudState::Reachable => "reachable",
            NudState::Stale => "stale",
            NudState::Delay => "delay",
            NudState::Probe => "probe",
            NudState::Failed => "failed",
            NudState::NoArp => "noarp",
            NudState::Permanent => "permanent",
            NudState::None => "none",
        };
        write!(f, "{}", name)
    }
}
