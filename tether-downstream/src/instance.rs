//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use chrono::{DateTime, Utc};
use derive_new::new;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tether_utils::addr::AddressAllocator;
use tether_utils::bpf::BpfCoordinator;
use tether_utils::dhcp::{DhcpServerFactory, DhcpServerMsg};
use tether_utils::link::{InterfaceType, LinkProperties};
use tether_utils::mac_addr::MacAddr;
use tether_utils::neighbor::{NeighborEvent, NeighborMonitor};
use tether_utils::netd::NetdApi;
use tether_utils::ra::RaDaemon;
use tether_utils::task::Task;
use tether_utils::{Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;
use tracing::{Instrument, debug_span};

use crate::debug::Debug;
use crate::dhcp::DhcpLifecycle;
use crate::error::{Error, ErrorCode};
use crate::events;
use crate::neighbor::NeighborRuleManager;
use crate::ra::RaCoordinator;
use crate::southbound::InterfaceConfigurator;
use crate::tasks::messages::input::{CommandMsg, StopMsg};
use crate::upstream::UpstreamTracker;

// Operational state of a downstream interface. Exactly one is active per
// instance; mutated only by the instance itself in response to queued
// commands and events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DownstreamState {
    Unavailable,
    Available,
    Tethered,
    LocalOnly,
}

// Requested serving mode carried by a tether request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ServingMode {
    Tethered,
    LocalOnly,
}

// Static configuration of a downstream instance, fixed at construction.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct InstanceCfg {
    pub ifname: String,
    pub ifindex: u32,
    pub mac: MacAddr,
    pub if_type: InterfaceType,
    pub bpf_offload: bool,
    pub dhcp_lease_time_secs: u32,
}

// Fire-and-forget notifications delivered to the instance's owner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OwnerMsg {
    InterfaceStateChanged {
        ifname: String,
        state: DownstreamState,
        error: ErrorCode,
    },
    LinkPropertiesChanged(LinkProperties),
}

// External collaborators injected at construction. The BPF coordinator is
// shared by all downstream instances and serializes concurrent calls
// internally.
#[derive(Clone, Debug, new)]
pub struct Collaborators {
    pub netd: Arc<dyn NetdApi>,
    pub allocator: Arc<dyn AddressAllocator>,
    pub dhcp_factory: Arc<dyn DhcpServerFactory>,
    pub ra_daemon: Arc<dyn RaDaemon>,
    pub neighbor_monitor: Arc<dyn NeighborMonitor>,
    pub bpf: Arc<dyn BpfCoordinator>,
}

// Instance output channels.
#[derive(Clone, Debug, new)]
pub struct InstanceChannelsTx {
    pub owner: UnboundedSender<OwnerMsg>,
    pub command: Sender<CommandMsg>,
    pub dhcp: UnboundedSender<DhcpServerMsg>,
    pub neighbor: UnboundedSender<NeighborEvent>,
}

// Instance input channels.
#[derive(Debug, new)]
pub struct InstanceChannelsRx {
    pub command: Receiver<CommandMsg>,
    pub dhcp: UnboundedReceiver<DhcpServerMsg>,
    pub neighbor: UnboundedReceiver<NeighborEvent>,
}

// Instance input message.
#[derive(Debug)]
pub enum InstanceMsg {
    Command(CommandMsg),
    Dhcp(DhcpServerMsg),
    Neighbor(NeighborEvent),
}

#[derive(Debug)]
pub struct Statistics {
    pub create_time: DateTime<Utc>,
    pub last_state_change_time: Option<DateTime<Utc>>,
    pub state_changes: u32,
}

// A downstream interface controller.
//
// All state is owned by the single instance task; external commands and
// asynchronous collaborator callbacks are marshaled into one serialized
// queue, so no two transitions or daemon-call sequences ever interleave
// for the same interface.
#[derive(Debug)]
pub struct Instance {
    // Instance configuration data.
    pub cfg: InstanceCfg,
    // Operational state and the last reported error code.
    pub state: DownstreamState,
    pub last_error: ErrorCode,
    // Link properties republished to the owner on every visible change.
    pub link: LinkProperties,
    // Allocated downstream IPv4 prefix, while serving.
    pub v4_addr: Option<Ipv4Network>,
    pub serving_mode: Option<ServingMode>,
    // Current upstream.
    pub upstream: UpstreamTracker,
    // Collaborator front-ends.
    pub configurator: InterfaceConfigurator,
    pub dhcp: DhcpLifecycle,
    pub ra: RaCoordinator,
    pub neighbors: NeighborRuleManager,
    pub allocator: Arc<dyn AddressAllocator>,
    pub monitor: Arc<dyn NeighborMonitor>,
    // Instance statistics.
    pub statistics: Statistics,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx,
}

// Handle to a spawned downstream instance task. Dropping it disposes the
// instance.
#[derive(Debug)]
pub struct DownstreamHandle {
    pub tx: InstanceChannelsTx,
    _task: Task<()>,
}

// ===== impl DownstreamState =====

impl DownstreamState {
    pub fn is_serving(&self) -> bool {
        matches!(self, DownstreamState::Tethered | DownstreamState::LocalOnly)
    }
}

// ===== impl ServingMode =====

impl ServingMode {
    pub fn state(&self) -> DownstreamState {
        match self {
            ServingMode::Tethered => DownstreamState::Tethered,
            ServingMode::LocalOnly => DownstreamState::LocalOnly,
        }
    }
}

// ===== impl Statistics =====

impl Default for Statistics {
    fn default() -> Statistics {
        Statistics {
            create_time: Utc::now(),
            last_state_change_time: None,
            state_changes: 0,
        }
    }
}

// ===== impl Instance =====

impl Instance {
    pub fn new(
        cfg: InstanceCfg,
        collaborators: Collaborators,
        tx: InstanceChannelsTx,
    ) -> Instance {
        Debug::InstanceCreate.log();

        let configurator = InterfaceConfigurator::new(
            collaborators.netd.clone(),
            cfg.ifname.clone(),
        );
        let dhcp = DhcpLifecycle::new(
            collaborators.dhcp_factory,
            tx.dhcp.clone(),
            cfg.ifname.clone(),
        );
        let ra = RaCoordinator::new(
            collaborators.netd.clone(),
            collaborators.ra_daemon,
        );
        let neighbors = NeighborRuleManager::new(
            collaborators.netd,
            collaborators.bpf,
            cfg.ifindex,
            cfg.mac,
            cfg.bpf_offload,
        );
        let link = LinkProperties::new(cfg.ifname.clone());

        Instance {
            cfg,
            state: DownstreamState::Available,
            last_error: ErrorCode::None,
            link,
            v4_addr: None,
            serving_mode: None,
            upstream: Default::default(),
            configurator,
            dhcp,
            ra,
            neighbors,
            allocator: collaborators.allocator,
            monitor: collaborators.neighbor_monitor,
            statistics: Default::default(),
            tx,
        }
    }

    // Reports the initial state to the owner and starts the neighbor
    // monitor. The monitor only runs when IPv6 offload is enabled.
    pub fn init(&mut self) {
        if self.cfg.bpf_offload
            && let Err(error) = self.monitor.start(self.tx.neighbor.clone())
        {
            Error::NeighborMonitorStart(error).log();
        }

        self.report_state(DownstreamState::Available, ErrorCode::None);
        self.report_link_properties();
    }

    // Processes one queued message to completion. Returns false once the
    // instance has been disposed; no further messages are accepted.
    pub fn process_msg(&mut self, msg: InstanceMsg) -> bool {
        match msg {
            InstanceMsg::Command(msg) => {
                return self.process_command_msg(msg);
            }
            InstanceMsg::Dhcp(msg) => {
                if let Err(error) = events::process_dhcp_msg(self, msg) {
                    error.log();
                }
            }
            InstanceMsg::Neighbor(event) => {
                events::process_neighbor_event(self, event);
            }
        }
        true
    }

    fn process_command_msg(&mut self, msg: CommandMsg) -> bool {
        match msg {
            CommandMsg::TetherRequest(msg) => {
                if let Err(error) =
                    events::process_tether_request(self, msg.mode)
                {
                    error.log();
                }
            }
            CommandMsg::TetherUnrequest(_msg) => {
                events::process_tether_unrequest(self);
            }
            CommandMsg::InterfaceDown(_msg) => {
                events::process_interface_down(self);
            }
            CommandMsg::UpstreamChanged(msg) => {
                if let Err(error) = events::process_upstream_changed(
                    self, msg.ifname, msg.ifindex,
                ) {
                    error.log();
                }
            }
            CommandMsg::Ipv6TetherUpdate(msg) => {
                events::process_ipv6_update(self, msg.upstream);
            }
            CommandMsg::Stop(_msg) => {
                events::process_stop(self);
                return false;
            }
        }
        true
    }

    // Updates the operational state and notifies the owner.
    pub(crate) fn report_state(
        &mut self,
        state: DownstreamState,
        error: ErrorCode,
    ) {
        if self.state != state {
            Debug::FsmTransition(self.state, state).log();
            self.state = state;
            self.statistics.state_changes += 1;
            self.statistics.last_state_change_time = Some(Utc::now());
        }
        self.last_error = error;
        let _ = self.tx.owner.send(OwnerMsg::InterfaceStateChanged {
            ifname: self.cfg.ifname.clone(),
            state,
            error,
        });
    }

    // Notifies the owner of the current link properties.
    pub(crate) fn report_link_properties(&self) {
        let _ = self
            .tx
            .owner
            .send(OwnerMsg::LinkPropertiesChanged(self.link.clone()));
    }
}

// ===== helper functions =====

async fn event_loop(instance: &mut Instance, mut rx: InstanceChannelsRx) {
    loop {
        // Receive event message.
        let msg = tokio::select! {
            msg = rx.command.recv() => match msg {
                Some(msg) => InstanceMsg::Command(msg),
                // Owner dropped the handle; dispose the instance.
                None => InstanceMsg::Command(CommandMsg::Stop(StopMsg {})),
            },
            Some(msg) = rx.dhcp.recv() => InstanceMsg::Dhcp(msg),
            Some(msg) = rx.neighbor.recv() => InstanceMsg::Neighbor(msg),
        };

        // Process event message.
        if !instance.process_msg(msg) {
            return;
        }
    }
}

// ===== global functions =====

pub fn instance_channels(
    owner: UnboundedSender<OwnerMsg>,
) -> (InstanceChannelsTx, InstanceChannelsRx) {
    let (commandp, commandc) = mpsc::channel(4);
    let (dhcpp, dhcpc) = mpsc::unbounded_channel();
    let (neighborp, neighborc) = mpsc::unbounded_channel();

    let tx = InstanceChannelsTx::new(owner, commandp, dhcpp, neighborp);
    let rx = InstanceChannelsRx::new(commandc, dhcpc, neighborc);

    (tx, rx)
}

// Spawns the serialized event-loop task of one downstream instance.
pub fn spawn_downstream_task(
    cfg: InstanceCfg,
    collaborators: Collaborators,
    owner: UnboundedSender<OwnerMsg>,
) -> DownstreamHandle {
    let (channels_tx, channels_rx) = instance_channels(owner);
    let tx = channels_tx.clone();

    let span = debug_span!("downstream", ifname = %cfg.ifname);
    let task = Task::spawn(
        async move {
            let mut instance = Instance::new(cfg, collaborators, channels_tx);
            instance.init();
            event_loop(&mut instance, channels_rx).await;
        }
        .instrument(span),
    );

    DownstreamHandle { tx, _task: task }
}
