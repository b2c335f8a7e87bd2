//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::single_match)]

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Mutex;

use futures::StreamExt;
use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::constants::{
    AF_INET, AF_INET6, NUD_DELAY, NUD_FAILED, NUD_INCOMPLETE, NUD_NOARP,
    NUD_PERMANENT, NUD_PROBE, NUD_REACHABLE, NUD_STALE, RTNLGRP_NEIGH,
};
use netlink_packet_route::rtnl::RtnlMessage;
use netlink_packet_route::NeighbourMessage;
use netlink_sys::{AsyncSocket, SocketAddr};
use rtnetlink::new_connection;
use tether_utils::UnboundedSender;
use tether_utils::mac_addr::MacAddr;
use tether_utils::neighbor::{
    NeighborEvent, NeighborEventKind, NeighborMonitor, NudState,
};
use tether_utils::task::Task;

// Neighbor monitor backed by an rtnetlink subscription to the kernel's
// neighbor table (RTM_NEWNEIGH/RTM_DELNEIGH). The kernel performs neighbor
// discovery; this only consumes its notifications.
#[derive(Debug, Default)]
pub struct NetlinkNeighborMonitor {
    task: Mutex<Option<Task<()>>>,
}

// ===== impl NetlinkNeighborMonitor =====

impl NetlinkNeighborMonitor {
    pub fn new() -> Self {
        Default::default()
    }
}

impl NeighborMonitor for NetlinkNeighborMonitor {
    fn start(&self, tx: UnboundedSender<NeighborEvent>) -> std::io::Result<()> {
        // Create netlink socket subscribed to neighbor updates.
        let (mut conn, _handle, mut messages) = new_connection()?;
        let groups = 1 << (RTNLGRP_NEIGH - 1);
        let addr = SocketAddr::new(0, groups);
        conn.socket_mut().socket_mut().bind(&addr)?;

        // Relay parsed events into the instance queue.
        let task = Task::spawn(async move {
            tokio::pin!(conn);
            loop {
                tokio::select! {
                    _ = &mut conn => break,
                    msg = messages.next() => match msg {
                        Some((msg, _addr)) => {
                            if let Some(event) = process_msg(msg) {
                                let _ = tx.send(event);
                            }
                        }
                        None => break,
                    }
                }
            }
        });
        *self.task.lock().unwrap() = Some(task);

        Ok(())
    }

    fn stop(&self) {
        // Dropping the task handle cancels the subscription.
        self.task.lock().unwrap().take();
    }
}

// ===== helper functions =====

fn process_msg(msg: NetlinkMessage<RtnlMessage>) -> Option<NeighborEvent> {
    if let NetlinkPayload::InnerMessage(msg) = msg.payload {
        match msg {
            RtnlMessage::NewNeighbour(msg) => {
                process_neighbour_msg(msg, NeighborEventKind::New)
            }
            RtnlMessage::DelNeighbour(msg) => {
                process_neighbour_msg(msg, NeighborEventKind::Del)
            }
            _ => None,
        }
    } else {
        None
    }
}

fn process_neighbour_msg(
    msg: NeighbourMessage,
    kind: NeighborEventKind,
) -> Option<NeighborEvent> {
    use netlink_packet_route::neighbour::nlas::Nla;

    // Fetch neighbor attributes.
    let ifindex = msg.header.ifindex;
    let state = parse_nud_state(msg.header.state);
    let mut addr = None;
    let mut mac = None;
    for nla in msg.nlas.into_iter() {
        match nla {
            Nla::Destination(bytes) => {
                addr = parse_address(msg.header.family, bytes)
            }
            Nla::LinkLocalAddress(bytes) => {
                mac = MacAddr::try_from(bytes.as_slice()).ok()
            }
            _ => (),
        }
    }
    let addr = addr?;

    Some(NeighborEvent::new(ifindex, kind, addr, state, mac))
}

fn parse_address(family: u8, bytes: Vec<u8>) -> Option<IpAddr> {
    match family as u16 {
        AF_INET => {
            let addr_array: [u8; 4] = bytes.try_into().ok()?;
            Some(Ipv4Addr::from(addr_array).into())
        }
        AF_INET6 => {
            let addr_array: [u8; 16] = bytes.try_into().ok()?;
            Some(Ipv6Addr::from(addr_array).into())
        }
        _ => None,
    }
}

fn parse_nud_state(state: u16) -> NudState {
    match state {
        NUD_INCOMPLETE => NudState::Incomplete,
        NUD_REACHABLE => NudState::Reachable,
        NUD_STALE => NudState::Stale,
        NUD_DELAY => NudState::Delay,
        NUD_PROBE => NudState::Probe,
        NUD_FAILED => NudState::Failed,
        NUD_NOARP => NudState::NoArp,
        NUD_PERMANENT => NudState::Permanent,
        _ => NudState::None,
    }
}
