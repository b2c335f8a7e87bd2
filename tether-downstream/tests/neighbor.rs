//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use tether_downstream::instance::ServingMode;
use tether_downstream::testing::{BpfCall, NetdCall, TestContext};
use tether_downstream::upstream::Ipv6Upstream;
use tether_utils::bpf::ForwardingRule;
use tether_utils::dhcp::DHCP_LEASE_TIME_SECS;
use tether_utils::link::{InterfaceType, LinkProperties, RouteEntry};
use tether_utils::mac_addr::MacAddr;
use tether_utils::neighbor::{NeighborEvent, NeighborEventKind, NudState};

//
// Helper functions.
//

const DOWNSTREAM_IFINDEX: u32 = 10;

fn downstream_mac() -> MacAddr {
    MacAddr::from([0x02, 0x00, 0x00, 0x00, 0x00, 0x01])
}

fn neighbor_mac() -> MacAddr {
    MacAddr::from([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
}

fn upstream(ifindex: u32) -> Ipv6Upstream {
    let mut props = LinkProperties::new("rmnet0".to_owned());
    props.addresses = vec!["2001:db8:1::1/64".parse().unwrap()];
    props.routes = vec![RouteEntry::new(
        "::/0".parse().unwrap(),
        "rmnet0".to_owned(),
    )];
    Ipv6Upstream::new(ifindex, props, 0)
}

fn reachable(addr: Ipv6Addr) -> NeighborEvent {
    NeighborEvent::new(
        DOWNSTREAM_IFINDEX,
        NeighborEventKind::New,
        addr.into(),
        NudState::Reachable,
        Some(neighbor_mac()),
    )
}

fn failed(addr: Ipv6Addr) -> NeighborEvent {
    NeighborEvent::new(
        DOWNSTREAM_IFINDEX,
        NeighborEventKind::New,
        addr.into(),
        NudState::Failed,
        None,
    )
}

fn rule(upstream_ifindex: u32, dst: Ipv6Addr) -> ForwardingRule {
    ForwardingRule::new(
        upstream_ifindex,
        DOWNSTREAM_IFINDEX,
        dst,
        downstream_mac(),
        Some(neighbor_mac()),
    )
}

// A tethered downstream with an IPv6-reachable upstream (ifindex 42).
fn offloading_ctx() -> TestContext {
    let mut ctx = TestContext::wifi();
    ctx.instance.init();
    ctx.tether_request(ServingMode::Tethered);
    ctx.ipv6_update(Some(upstream(42)));
    ctx.owner_msgs();
    ctx.netd.take_calls();
    ctx.bpf.take_calls();
    ctx
}

//
// Tests.
//

#[tokio::test]
async fn reachable_neighbor_installs_rule() {
    let mut ctx = offloading_ctx();
    let dst: Ipv6Addr = "2001:db8:1::100".parse().unwrap();

    ctx.neighbor_event(reachable(dst));

    let expected = rule(42, dst);
    assert_eq!(ctx.bpf.take_calls(), vec![BpfCall::RuleAdd(expected.clone())]);
    assert_eq!(
        ctx.netd.take_calls(),
        vec![NetdCall::OffloadRuleAdd(expected)]
    );
}

#[tokio::test]
async fn failed_neighbor_removes_rule_by_destination() {
    let mut ctx = offloading_ctx();
    let dst: Ipv6Addr = "2001:db8:1::100".parse().unwrap();

    ctx.neighbor_event(reachable(dst));
    ctx.netd.take_calls();
    ctx.bpf.take_calls();

    ctx.neighbor_event(failed(dst));

    // FAILED events carry no MAC: the removal key matches by destination
    // only.
    let key = ForwardingRule {
        dst_mac: None,
        ..rule(42, dst)
    };
    assert_eq!(ctx.bpf.take_calls(), vec![BpfCall::RuleRemove(key.clone())]);
    assert_eq!(
        ctx.netd.take_calls(),
        vec![
            NetdCall::OffloadRuleRemove(key),
            // Last rule towards this upstream: counters are collected.
            NetdCall::OffloadGetAndClearStats(42),
        ]
    );
}

#[tokio::test]
async fn deleted_neighbor_removes_rule() {
    let mut ctx = offloading_ctx();
    let dst: Ipv6Addr = "2001:db8:1::100".parse().unwrap();

    ctx.neighbor_event(reachable(dst));
    ctx.netd.take_calls();
    ctx.bpf.take_calls();

    ctx.neighbor_event(NeighborEvent::new(
        DOWNSTREAM_IFINDEX,
        NeighborEventKind::Del,
        dst.into(),
        NudState::Stale,
        None,
    ));

    let key = ForwardingRule {
        dst_mac: None,
        ..rule(42, dst)
    };
    assert_eq!(ctx.bpf.take_calls(), vec![BpfCall::RuleRemove(key)]);
}

#[tokio::test]
async fn irrelevant_events_are_dropped() {
    let mut ctx = offloading_ctx();

    // Wrong interface.
    let mut event = reachable("2001:db8:1::100".parse().unwrap());
    event.ifindex = 99;
    ctx.neighbor_event(event);

    // Link-local and multicast destinations.
    ctx.neighbor_event(reachable("fe80::1".parse().unwrap()));
    ctx.neighbor_event(reachable("ff02::1".parse().unwrap()));

    // IPv4 neighbors.
    ctx.neighbor_event(NeighborEvent::new(
        DOWNSTREAM_IFINDEX,
        NeighborEventKind::New,
        "192.168.42.100".parse().unwrap(),
        NudState::Reachable,
        Some(neighbor_mac()),
    ));

    // REACHABLE without a MAC.
    let mut event = reachable("2001:db8:1::100".parse().unwrap());
    event.mac = None;
    ctx.neighbor_event(event);

    assert!(ctx.bpf.take_calls().is_empty());
    assert!(ctx.netd.take_calls().is_empty());
}

#[tokio::test]
async fn no_rules_without_ipv6_upstream() {
    let mut ctx = TestContext::wifi();
    ctx.instance.init();
    ctx.tether_request(ServingMode::Tethered);
    ctx.netd.take_calls();

    ctx.neighbor_event(reachable("2001:db8:1::100".parse().unwrap()));

    assert!(ctx.bpf.take_calls().is_empty());
    assert!(ctx.netd.take_calls().is_empty());
}

#[tokio::test]
async fn upstream_change_rebinds_rules() {
    let mut ctx = offloading_ctx();
    let dst: Ipv6Addr = "2001:db8:1::100".parse().unwrap();

    ctx.neighbor_event(reachable(dst));
    ctx.netd.take_calls();
    ctx.bpf.take_calls();

    ctx.ipv6_update(Some(upstream(43)));

    assert_eq!(
        ctx.bpf.take_calls(),
        vec![BpfCall::RuleUpdate(DOWNSTREAM_IFINDEX, 43)]
    );

    // Clear-then-repopulate on the daemon side: the old rule is removed
    // (with its original key), an equivalent rule bound to the new
    // upstream is installed, and the old upstream's counters are
    // collected. The RA rebuild reads the upstream hop limit first.
    assert_eq!(
        ctx.netd.take_calls(),
        vec![
            NetdCall::GetProcSysNet("rmnet0".to_owned(), "hop_limit".to_owned()),
            NetdCall::OffloadRuleRemove(rule(42, dst)),
            NetdCall::OffloadRuleAdd(rule(43, dst)),
            NetdCall::OffloadGetAndClearStats(42),
        ]
    );
}

#[tokio::test]
async fn upstream_loss_clears_rules() {
    let mut ctx = offloading_ctx();
    let dst: Ipv6Addr = "2001:db8:1::100".parse().unwrap();

    ctx.neighbor_event(reachable(dst));
    ctx.netd.take_calls();
    ctx.bpf.take_calls();

    ctx.ipv6_update(None);

    assert_eq!(
        ctx.bpf.take_calls(),
        vec![BpfCall::RuleClear(DOWNSTREAM_IFINDEX)]
    );
    let calls = ctx.netd.take_calls();
    assert!(calls.contains(&NetdCall::OffloadRuleRemove(rule(42, dst))));
    assert!(calls.contains(&NetdCall::OffloadGetAndClearStats(42)));
}

#[tokio::test]
async fn last_writer_wins_for_same_destination() {
    let mut ctx = offloading_ctx();
    let dst: Ipv6Addr = "2001:db8:1::100".parse().unwrap();

    ctx.neighbor_event(reachable(dst));

    // The neighbor moved to a different MAC; the new rule replaces the
    // prior one.
    let new_mac = MacAddr::from([0xaa, 0xbb, 0xcc, 0x00, 0x00, 0x01]);
    let mut event = reachable(dst);
    event.mac = Some(new_mac);
    ctx.neighbor_event(event);

    let rules: Vec<_> = ctx.instance.neighbors.rules().collect();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].dst_mac, Some(new_mac));
}

#[tokio::test]
async fn offload_disabled_is_a_complete_noop() {
    let mut ctx = TestContext::new(
        tether_downstream::instance::InstanceCfg::new(
            "wlan1".to_owned(),
            DOWNSTREAM_IFINDEX,
            downstream_mac(),
            InterfaceType::Wifi,
            false,
            DHCP_LEASE_TIME_SECS,
        ),
    );
    ctx.instance.init();
    ctx.tether_request(ServingMode::Tethered);
    ctx.ipv6_update(Some(upstream(42)));
    ctx.netd.take_calls();

    assert_eq!(*ctx.monitor.starts.lock().unwrap(), 0);

    ctx.neighbor_event(reachable("2001:db8:1::100".parse().unwrap()));
    assert!(ctx.bpf.take_calls().is_empty());
    assert!(ctx.netd.take_calls().is_empty());
}

#[tokio::test]
async fn stop_clears_installed_rules() {
    let mut ctx = offloading_ctx();
    let dst: Ipv6Addr = "2001:db8:1::100".parse().unwrap();

    ctx.neighbor_event(reachable(dst));
    ctx.netd.take_calls();
    ctx.bpf.take_calls();

    use tether_downstream::tasks::messages::input::{CommandMsg, StopMsg};
    ctx.command(CommandMsg::Stop(StopMsg {}));

    assert_eq!(
        ctx.bpf.take_calls(),
        vec![BpfCall::RuleClear(DOWNSTREAM_IFINDEX)]
    );
    let calls = ctx.netd.take_calls();
    assert!(calls.contains(&NetdCall::OffloadRuleRemove(rule(42, dst))));
}
