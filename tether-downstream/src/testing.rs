//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//
//! Recording fakes for every collaborator, used by the integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ipnetwork::Ipv4Network;
use tether_utils::addr::{AddressAllocator, AllocError};
use tether_utils::bpf::{BpfCoordinator, ForwardingRule};
use tether_utils::dhcp::{
    DHCP_LEASE_TIME_SECS, DhcpCreateCallback, DhcpError, DhcpServerFactory,
    DhcpServerHandle, DhcpServerMsg, DhcpServingParams,
};
use tether_utils::link::InterfaceType;
use tether_utils::mac_addr::MacAddr;
use tether_utils::neighbor::{NeighborEvent, NeighborMonitor};
use tether_utils::netd::{
    CallError, InterfaceConfig, InterfaceFlags, IpFamily, NetdApi,
    OffloadStats, ProcSysSection, RouteConfig,
};
use tether_utils::ra::{RaDaemon, RaParams};
use tether_utils::{UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;

use crate::instance::{
    Collaborators, Instance, InstanceCfg, InstanceChannelsRx, InstanceMsg,
    OwnerMsg, ServingMode, instance_channels,
};
use crate::tasks::messages::input::{CommandMsg, TetherRequestMsg};
use crate::upstream::Ipv6Upstream;

// ===== FakeNetd =====

// One recorded network daemon call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetdCall {
    InterfaceSetCfg(InterfaceConfig),
    TetherInterfaceAdd(String),
    TetherInterfaceRemove(String),
    NetworkAddInterface(u32, String),
    NetworkRemoveInterface(u32, String),
    NetworkAddRoute(RouteConfig),
    TetherApplyDnsInterfaces,
    IpfwdAddInterfaceForward(String, String),
    IpfwdRemoveInterfaceForward(String, String),
    TetherAddForward(String, String),
    TetherRemoveForward(String, String),
    OffloadRuleAdd(ForwardingRule),
    OffloadRuleRemove(ForwardingRule),
    OffloadRuleClear(u32),
    OffloadGetAndClearStats(u32),
    GetProcSysNet(String, String),
}

#[derive(Debug, Default)]
pub struct FakeNetd {
    pub calls: Mutex<Vec<NetdCall>>,
    // Operations that fail when invoked.
    pub fail_ops: Mutex<Vec<&'static str>>,
    // Value returned by get_proc_sys_net queries.
    pub proc_sys_value: Mutex<Option<String>>,
}

impl FakeNetd {
    pub fn fail_on(&self, op: &'static str) {
        self.fail_ops.lock().unwrap().push(op);
    }

    pub fn take_calls(&self) -> Vec<NetdCall> {
        std::mem::take(&mut self.calls.lock().unwrap())
    }

    fn record(
        &self,
        op: &'static str,
        call: NetdCall,
    ) -> Result<(), CallError> {
        self.calls.lock().unwrap().push(call);
        if self.fail_ops.lock().unwrap().contains(&op) {
            return Err(CallError::new(format!("{} failed", op)));
        }
        Ok(())
    }
}

impl NetdApi for FakeNetd {
    fn interface_set_cfg(
        &self,
        cfg: &InterfaceConfig,
    ) -> Result<(), CallError> {
        self.record(
            "interface-set-cfg",
            NetdCall::InterfaceSetCfg(cfg.clone()),
        )
    }

    fn interface_get_cfg(
        &self,
        ifname: &str,
    ) -> Result<InterfaceConfig, CallError> {
        Ok(InterfaceConfig::new(
            ifname.to_owned(),
            None,
            InterfaceFlags::empty(),
        ))
    }

    fn tether_interface_add(&self, ifname: &str) -> Result<(), CallError> {
        self.record(
            "tether-interface-add",
            NetdCall::TetherInterfaceAdd(ifname.to_owned()),
        )
    }

    fn tether_interface_remove(&self, ifname: &str) -> Result<(), CallError> {
        self.record(
            "tether-interface-remove",
            NetdCall::TetherInterfaceRemove(ifname.to_owned()),
        )
    }

    fn network_add_interface(
        &self,
        net_id: u32,
        ifname: &str,
    ) -> Result<(), CallError> {
        self.record(
            "network-add-interface",
            NetdCall::NetworkAddInterface(net_id, ifname.to_owned()),
        )
    }

    fn network_remove_interface(
        &self,
        net_id: u32,
        ifname: &str,
    ) -> Result<(), CallError> {
        self.record(
            "network-remove-interface",
            NetdCall::NetworkRemoveInterface(net_id, ifname.to_owned()),
        )
    }

    fn network_add_route(&self, route: &RouteConfig) -> Result<(), CallError> {
        self.record(
            "network-add-route",
            NetdCall::NetworkAddRoute(route.clone()),
        )
    }

    fn tether_apply_dns_interfaces(&self) -> Result<(), CallError> {
        self.record(
            "tether-apply-dns-interfaces",
            NetdCall::TetherApplyDnsInterfaces,
        )
    }

    fn ipfwd_add_interface_forward(
        &self,
        from_iface: &str,
        to_iface: &str,
    ) -> Result<(), CallError> {
        self.record(
            "ipfwd-add-interface-forward",
            NetdCall::IpfwdAddInterfaceForward(
                from_iface.to_owned(),
                to_iface.to_owned(),
            ),
        )
    }

    fn ipfwd_remove_interface_forward(
        &self,
        from_iface: &str,
        to_iface: &str,
    ) -> Result<(), CallError> {
        self.record(
            "ipfwd-remove-interface-forward",
            NetdCall::IpfwdRemoveInterfaceForward(
                from_iface.to_owned(),
                to_iface.to_owned(),
            ),
        )
    }

    fn tether_add_forward(
        &self,
        intern_iface: &str,
        extern_iface: &str,
    ) -> Result<(), CallError> {
        self.record(
            "tether-add-forward",
            NetdCall::TetherAddForward(
                intern_iface.to_owned(),
                extern_iface.to_owned(),
            ),
        )
    }

    fn tether_remove_forward(
        &self,
        intern_iface: &str,
        extern_iface: &str,
    ) -> Result<(), CallError> {
        self.record(
            "tether-remove-forward",
            NetdCall::TetherRemoveForward(
                intern_iface.to_owned(),
                extern_iface.to_owned(),
            ),
        )
    }

    fn tether_offload_rule_add(
        &self,
        rule: &ForwardingRule,
    ) -> Result<(), CallError> {
        self.record(
            "tether-offload-rule-add",
            NetdCall::OffloadRuleAdd(rule.clone()),
        )
    }

    fn tether_offload_rule_remove(
        &self,
        rule: &ForwardingRule,
    ) -> Result<(), CallError> {
        self.record(
            "tether-offload-rule-remove",
            NetdCall::OffloadRuleRemove(rule.clone()),
        )
    }

    fn tether_offload_rule_clear(
        &self,
        downstream_ifindex: u32,
    ) -> Result<(), CallError> {
        self.record(
            "tether-offload-rule-clear",
            NetdCall::OffloadRuleClear(downstream_ifindex),
        )
    }

    fn tether_offload_get_and_clear_stats(
        &self,
        upstream_ifindex: u32,
    ) -> Result<OffloadStats, CallError> {
        self.record(
            "tether-offload-get-and-clear-stats",
            NetdCall::OffloadGetAndClearStats(upstream_ifindex),
        )?;
        Ok(OffloadStats::default())
    }

    fn get_proc_sys_net(
        &self,
        _family: IpFamily,
        _section: ProcSysSection,
        ifname: &str,
        parameter: &str,
    ) -> Result<String, CallError> {
        self.record(
            "get-proc-sys-net",
            NetdCall::GetProcSysNet(
                ifname.to_owned(),
                parameter.to_owned(),
            ),
        )?;
        self.proc_sys_value
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CallError::new("no such parameter".to_owned()))
    }
}

// ===== FakeAllocator =====

#[derive(Debug)]
pub struct FakeAllocator {
    pub prefixes: Mutex<VecDeque<Ipv4Network>>,
    pub requests: Mutex<Vec<(InterfaceType, Option<Ipv4Network>)>>,
    pub releases: Mutex<u32>,
}

impl Default for FakeAllocator {
    fn default() -> FakeAllocator {
        let prefixes = ["192.168.42.1/24", "192.168.51.1/24", "192.168.62.1/24"]
            .iter()
            .map(|prefix| prefix.parse().unwrap())
            .collect();
        FakeAllocator {
            prefixes: Mutex::new(prefixes),
            requests: Mutex::new(Vec::new()),
            releases: Mutex::new(0),
        }
    }
}

impl AddressAllocator for FakeAllocator {
    fn request_downstream_address(
        &self,
        if_type: InterfaceType,
        avoid: Option<Ipv4Network>,
    ) -> Result<Ipv4Network, AllocError> {
        self.requests.lock().unwrap().push((if_type, avoid));
        self.prefixes.lock().unwrap().pop_front().ok_or(AllocError)
    }

    fn release_downstream(&self, _if_type: InterfaceType) {
        *self.releases.lock().unwrap() += 1;
    }
}

// ===== FakeDhcpFactory / FakeDhcpServer =====

#[derive(Debug, Default)]
pub struct FakeDhcpFactory {
    pub requests: Mutex<Vec<(String, DhcpServingParams, DhcpCreateCallback)>>,
}

impl FakeDhcpFactory {
    pub fn last_callback(&self) -> Option<DhcpCreateCallback> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|(_, _, callback)| callback.clone())
    }
}

impl DhcpServerFactory for FakeDhcpFactory {
    fn make_dhcp_server(
        &self,
        ifname: &str,
        params: &DhcpServingParams,
        callback: DhcpCreateCallback,
    ) {
        self.requests.lock().unwrap().push((
            ifname.to_owned(),
            params.clone(),
            callback,
        ));
    }
}

#[derive(Debug, Default)]
pub struct FakeDhcpServer {
    pub started: Mutex<Vec<DhcpServingParams>>,
    pub updated: Mutex<Vec<DhcpServingParams>>,
    pub stopped: Mutex<u32>,
    pub events: Mutex<Option<UnboundedSender<DhcpServerMsg>>>,
    pub fail_start: Mutex<bool>,
}

impl DhcpServerHandle for FakeDhcpServer {
    fn start_with_callbacks(
        &self,
        params: &DhcpServingParams,
        events: UnboundedSender<DhcpServerMsg>,
    ) -> Result<(), DhcpError> {
        if *self.fail_start.lock().unwrap() {
            return Err(DhcpError::new("start failed".to_owned()));
        }
        self.started.lock().unwrap().push(params.clone());
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn update_params(
        &self,
        params: &DhcpServingParams,
    ) -> Result<(), DhcpError> {
        self.updated.lock().unwrap().push(params.clone());
        Ok(())
    }

    fn stop(&self) -> Result<(), DhcpError> {
        *self.stopped.lock().unwrap() += 1;
        Ok(())
    }
}

// ===== FakeRaDaemon =====

#[derive(Debug)]
pub struct FakeRaDaemon {
    pub start_ok: Mutex<bool>,
    pub starts: Mutex<u32>,
    pub stops: Mutex<u32>,
    pub builds: Mutex<Vec<RaParams>>,
}

impl Default for FakeRaDaemon {
    fn default() -> FakeRaDaemon {
        FakeRaDaemon {
            start_ok: Mutex::new(true),
            starts: Mutex::new(0),
            stops: Mutex::new(0),
            builds: Mutex::new(Vec::new()),
        }
    }
}

impl RaDaemon for FakeRaDaemon {
    fn start(&self) -> bool {
        *self.starts.lock().unwrap() += 1;
        *self.start_ok.lock().unwrap()
    }

    fn stop(&self) {
        *self.stops.lock().unwrap() += 1;
    }

    fn build_new_ra(
        &self,
        _upstream: Option<&tether_utils::link::LinkProperties>,
        params: &RaParams,
    ) {
        self.builds.lock().unwrap().push(params.clone());
    }
}

// ===== FakeNeighborMonitor =====

#[derive(Debug, Default)]
pub struct FakeNeighborMonitor {
    pub starts: Mutex<u32>,
    pub stops: Mutex<u32>,
    pub tx: Mutex<Option<UnboundedSender<NeighborEvent>>>,
}

impl NeighborMonitor for FakeNeighborMonitor {
    fn start(
        &self,
        tx: UnboundedSender<NeighborEvent>,
    ) -> std::io::Result<()> {
        *self.starts.lock().unwrap() += 1;
        *self.tx.lock().unwrap() = Some(tx);
        Ok(())
    }

    fn stop(&self) {
        *self.stops.lock().unwrap() += 1;
    }
}

// ===== FakeBpf =====

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BpfCall {
    RuleAdd(ForwardingRule),
    RuleRemove(ForwardingRule),
    RuleUpdate(u32, u32),
    RuleClear(u32),
}

#[derive(Debug, Default)]
pub struct FakeBpf {
    pub calls: Mutex<Vec<BpfCall>>,
}

impl FakeBpf {
    pub fn take_calls(&self) -> Vec<BpfCall> {
        std::mem::take(&mut self.calls.lock().unwrap())
    }
}

impl BpfCoordinator for FakeBpf {
    fn tether_offload_rule_add(
        &self,
        rule: &ForwardingRule,
    ) -> Result<(), CallError> {
        self.calls.lock().unwrap().push(BpfCall::RuleAdd(rule.clone()));
        Ok(())
    }

    fn tether_offload_rule_remove(
        &self,
        rule: &ForwardingRule,
    ) -> Result<(), CallError> {
        self.calls
            .lock()
            .unwrap()
            .push(BpfCall::RuleRemove(rule.clone()));
        Ok(())
    }

    fn tether_offload_rule_update(
        &self,
        downstream_ifindex: u32,
        new_upstream_ifindex: u32,
    ) -> Result<(), CallError> {
        self.calls.lock().unwrap().push(BpfCall::RuleUpdate(
            downstream_ifindex,
            new_upstream_ifindex,
        ));
        Ok(())
    }

    fn tether_offload_rule_clear(
        &self,
        downstream_ifindex: u32,
    ) -> Result<(), CallError> {
        self.calls
            .lock()
            .unwrap()
            .push(BpfCall::RuleClear(downstream_ifindex));
        Ok(())
    }
}

// ===== TestContext =====

// A downstream instance wired to fakes, with direct access to its input
// and owner channels. Tests drive the instance synchronously through
// `process_msg`, mirroring the serialized event loop.
pub struct TestContext {
    pub netd: Arc<FakeNetd>,
    pub allocator: Arc<FakeAllocator>,
    pub dhcp_factory: Arc<FakeDhcpFactory>,
    pub ra: Arc<FakeRaDaemon>,
    pub monitor: Arc<FakeNeighborMonitor>,
    pub bpf: Arc<FakeBpf>,
    pub owner_rx: UnboundedReceiver<OwnerMsg>,
    pub rx: InstanceChannelsRx,
    pub instance: Instance,
}

impl TestContext {
    pub fn new(cfg: InstanceCfg) -> TestContext {
        let netd = Arc::new(FakeNetd::default());
        let allocator = Arc::new(FakeAllocator::default());
        let dhcp_factory = Arc::new(FakeDhcpFactory::default());
        let ra = Arc::new(FakeRaDaemon::default());
        let monitor = Arc::new(FakeNeighborMonitor::default());
        let bpf = Arc::new(FakeBpf::default());

        let collaborators = Collaborators::new(
            netd.clone(),
            allocator.clone(),
            dhcp_factory.clone(),
            ra.clone(),
            monitor.clone(),
            bpf.clone(),
        );

        let (owner_tx, owner_rx) = mpsc::unbounded_channel();
        let (tx, rx) = instance_channels(owner_tx);
        let instance = Instance::new(cfg, collaborators, tx);

        TestContext {
            netd,
            allocator,
            dhcp_factory,
            ra,
            monitor,
            bpf,
            owner_rx,
            rx,
            instance,
        }
    }

    // Wi-Fi hotspot configuration with BPF offload enabled.
    pub fn wifi() -> TestContext {
        TestContext::new(InstanceCfg::new(
            "wlan1".to_owned(),
            10,
            MacAddr::from([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
            InterfaceType::Wifi,
            true,
            DHCP_LEASE_TIME_SECS,
        ))
    }

    pub fn command(&mut self, msg: CommandMsg) -> bool {
        self.instance.process_msg(InstanceMsg::Command(msg))
    }

    pub fn tether_request(&mut self, mode: ServingMode) {
        self.command(CommandMsg::TetherRequest(TetherRequestMsg { mode }));
    }

    pub fn neighbor_event(&mut self, event: NeighborEvent) {
        self.instance.process_msg(InstanceMsg::Neighbor(event));
    }

    pub fn ipv6_update(&mut self, upstream: Option<Ipv6Upstream>) {
        use crate::tasks::messages::input::Ipv6TetherUpdateMsg;
        self.command(CommandMsg::Ipv6TetherUpdate(Ipv6TetherUpdateMsg {
            upstream,
        }));
    }

    // Feeds every queued DHCP and neighbor message into the instance, the
    // way the event loop would.
    pub fn pump(&mut self) {
        loop {
            if let Ok(msg) = self.rx.dhcp.try_recv() {
                self.instance.process_msg(InstanceMsg::Dhcp(msg));
                continue;
            }
            if let Ok(msg) = self.rx.neighbor.try_recv() {
                self.instance.process_msg(InstanceMsg::Neighbor(msg));
                continue;
            }
            break;
        }
    }

    // Drains all pending owner notifications.
    pub fn owner_msgs(&mut self) -> Vec<OwnerMsg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = self.owner_rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }
}
