//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use tether_downstream::error::ErrorCode;
use tether_downstream::instance::{
    DownstreamState, InstanceCfg, OwnerMsg, ServingMode,
};
use tether_downstream::tasks::messages::input::{
    CommandMsg, InterfaceDownMsg, StopMsg, TetherUnrequestMsg,
    UpstreamChangedMsg,
};
use tether_downstream::testing::{FakeDhcpServer, NetdCall, TestContext};
use tether_utils::dhcp::DHCP_LEASE_TIME_SECS;
use tether_utils::link::InterfaceType;
use tether_utils::mac_addr::MacAddr;
use tether_utils::netd::{
    InterfaceConfig, InterfaceFlags, LOCAL_NET_ID, RouteConfig,
};

//
// Helper functions.
//

fn upstream_changed(ifname: &str, ifindex: u32) -> CommandMsg {
    CommandMsg::UpstreamChanged(UpstreamChangedMsg {
        ifname: Some(ifname.to_owned()),
        ifindex,
    })
}

fn tethered_ctx() -> TestContext {
    let mut ctx = TestContext::wifi();
    ctx.instance.init();
    ctx.tether_request(ServingMode::Tethered);
    ctx.owner_msgs();
    ctx.netd.take_calls();
    ctx
}

//
// Tests.
//

#[tokio::test]
async fn initial_state_is_available() {
    let mut ctx = TestContext::wifi();
    ctx.instance.init();

    let msgs = ctx.owner_msgs();
    assert_eq!(msgs.len(), 2);
    assert_eq!(
        msgs[0],
        OwnerMsg::InterfaceStateChanged {
            ifname: "wlan1".to_owned(),
            state: DownstreamState::Available,
            error: ErrorCode::None,
        }
    );
    let OwnerMsg::LinkPropertiesChanged(link) = &msgs[1] else {
        panic!("expected link properties notification");
    };
    assert_eq!(link.ifname, "wlan1");
    assert!(link.is_empty());

    // No daemon interaction beyond construction.
    assert!(ctx.netd.take_calls().is_empty());
    assert!(ctx.bpf.take_calls().is_empty());

    // Offload is enabled, so the neighbor monitor runs.
    assert_eq!(*ctx.monitor.starts.lock().unwrap(), 1);
}

#[tokio::test]
async fn tether_request_daemon_call_order() {
    let mut ctx = TestContext::wifi();
    ctx.instance.init();
    ctx.owner_msgs();

    ctx.tether_request(ServingMode::Tethered);

    let prefix = "192.168.42.1/24".parse().unwrap();
    let subnet = "192.168.42.0/24".parse().unwrap();
    let link_local = "fe80::/64".parse().unwrap();
    assert_eq!(
        ctx.netd.take_calls(),
        vec![
            NetdCall::InterfaceSetCfg(InterfaceConfig::new(
                "wlan1".to_owned(),
                Some(prefix),
                InterfaceFlags::UP | InterfaceFlags::RUNNING,
            )),
            NetdCall::TetherInterfaceAdd("wlan1".to_owned()),
            NetdCall::NetworkAddInterface(LOCAL_NET_ID, "wlan1".to_owned()),
            NetdCall::NetworkAddRoute(RouteConfig::new(
                LOCAL_NET_ID,
                "wlan1".to_owned(),
                subnet,
                None,
            )),
            NetdCall::NetworkAddRoute(RouteConfig::new(
                LOCAL_NET_ID,
                "wlan1".to_owned(),
                link_local,
                None,
            )),
        ]
    );

    let msgs = ctx.owner_msgs();
    assert_eq!(msgs.len(), 2);
    assert_eq!(
        msgs[0],
        OwnerMsg::InterfaceStateChanged {
            ifname: "wlan1".to_owned(),
            state: DownstreamState::Tethered,
            error: ErrorCode::None,
        }
    );
    let OwnerMsg::LinkPropertiesChanged(link) = &msgs[1] else {
        panic!("expected link properties notification");
    };
    assert_eq!(link.addresses, vec![prefix.into()]);
    assert_eq!(link.routes.len(), 2);
    assert_eq!(link.dns_server, Some("192.168.42.1".parse().unwrap()));

    // RA daemon was started and DHCP server creation was requested.
    assert_eq!(*ctx.ra.starts.lock().unwrap(), 1);
    let requests = ctx.dhcp_factory.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (ifname, params, _) = &requests[0];
    assert_eq!(ifname, "wlan1");
    assert_eq!(params.server_addr, prefix);
    assert_eq!(params.default_router, "192.168.42.1".parse::<std::net::Ipv4Addr>().unwrap());
    assert_eq!(params.dns_server, params.default_router);
    assert_eq!(params.lease_time_secs, DHCP_LEASE_TIME_SECS);
    assert!(!params.change_prefix_on_decline);
}

#[tokio::test]
async fn bluetooth_skips_interface_config() {
    let mut ctx = TestContext::new(InstanceCfg::new(
        "bt-pan".to_owned(),
        7,
        MacAddr::from([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]),
        InterfaceType::Bluetooth,
        false,
        DHCP_LEASE_TIME_SECS,
    ));
    ctx.instance.init();
    ctx.owner_msgs();

    ctx.tether_request(ServingMode::Tethered);

    let calls = ctx.netd.take_calls();
    assert!(
        !calls
            .iter()
            .any(|call| matches!(call, NetdCall::InterfaceSetCfg(_)))
    );
    assert_eq!(calls[0], NetdCall::TetherInterfaceAdd("bt-pan".to_owned()));

    // Offload disabled: the neighbor monitor must not run.
    assert_eq!(*ctx.monitor.starts.lock().unwrap(), 0);
}

#[tokio::test]
async fn setup_failure_rolls_back_to_available() {
    let mut ctx = TestContext::wifi();
    ctx.instance.init();
    ctx.owner_msgs();
    ctx.netd.fail_on("tether-interface-add");

    ctx.tether_request(ServingMode::Tethered);

    assert_eq!(ctx.instance.state, DownstreamState::Available);

    let msgs = ctx.owner_msgs();
    assert_eq!(
        msgs[0],
        OwnerMsg::InterfaceStateChanged {
            ifname: "wlan1".to_owned(),
            state: DownstreamState::Available,
            error: ErrorCode::TetherIface,
        }
    );
    let OwnerMsg::LinkPropertiesChanged(link) = &msgs[1] else {
        panic!("expected link properties notification");
    };
    assert_eq!(link.ifname, "wlan1");
    assert!(link.addresses.is_empty());
    assert!(link.routes.is_empty());

    // The allocated address was released exactly once and no DHCP server
    // was requested.
    assert_eq!(*ctx.allocator.releases.lock().unwrap(), 1);
    assert!(ctx.dhcp_factory.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unrequest_round_trip() {
    let mut ctx = tethered_ctx();

    // Deliver the DHCP server and let it start.
    let server = Arc::new(FakeDhcpServer::default());
    let callback = ctx.dhcp_factory.last_callback().unwrap();
    callback.complete(Ok(server.clone()));
    ctx.pump();
    assert_eq!(server.started.lock().unwrap().len(), 1);

    ctx.command(CommandMsg::TetherUnrequest(TetherUnrequestMsg {}));

    assert_eq!(ctx.instance.state, DownstreamState::Available);

    // Ordered teardown: DNS reapplication, tether interface removal,
    // local network removal, interface reset.
    assert_eq!(
        ctx.netd.take_calls(),
        vec![
            NetdCall::TetherApplyDnsInterfaces,
            NetdCall::TetherInterfaceRemove("wlan1".to_owned()),
            NetdCall::NetworkRemoveInterface(LOCAL_NET_ID, "wlan1".to_owned()),
            NetdCall::InterfaceSetCfg(InterfaceConfig::new(
                "wlan1".to_owned(),
                None,
                InterfaceFlags::empty(),
            )),
        ]
    );

    // Link properties returned to empty with the name still populated,
    // the address was released exactly once, and the collaborators were
    // stopped.
    let msgs = ctx.owner_msgs();
    let OwnerMsg::LinkPropertiesChanged(link) = msgs.last().unwrap() else {
        panic!("expected link properties notification");
    };
    assert_eq!(link.ifname, "wlan1");
    assert!(link.is_empty());
    assert_eq!(*ctx.allocator.releases.lock().unwrap(), 1);
    assert_eq!(*server.stopped.lock().unwrap(), 1);
    assert_eq!(*ctx.ra.stops.lock().unwrap(), 1);
}

#[tokio::test]
async fn upstream_notifications_are_idempotent() {
    let mut ctx = tethered_ctx();

    ctx.command(upstream_changed("rmnet0", 42));
    assert_eq!(
        ctx.netd.take_calls(),
        vec![
            NetdCall::TetherAddForward("wlan1".to_owned(), "rmnet0".to_owned()),
            NetdCall::IpfwdAddInterfaceForward(
                "wlan1".to_owned(),
                "rmnet0".to_owned(),
            ),
        ]
    );

    // Identical notifications are no-ops.
    ctx.command(upstream_changed("rmnet0", 42));
    ctx.command(upstream_changed("rmnet0", 42));
    assert!(ctx.netd.take_calls().is_empty());
}

#[tokio::test]
async fn upstream_change_swaps_forwarding() {
    let mut ctx = tethered_ctx();

    ctx.command(upstream_changed("rmnet0", 42));
    ctx.netd.take_calls();

    ctx.command(upstream_changed("wlan0", 43));
    assert_eq!(
        ctx.netd.take_calls(),
        vec![
            NetdCall::IpfwdRemoveInterfaceForward(
                "wlan1".to_owned(),
                "rmnet0".to_owned(),
            ),
            NetdCall::TetherRemoveForward(
                "wlan1".to_owned(),
                "rmnet0".to_owned(),
            ),
            NetdCall::TetherAddForward("wlan1".to_owned(), "wlan0".to_owned()),
            NetdCall::IpfwdAddInterfaceForward(
                "wlan1".to_owned(),
                "wlan0".to_owned(),
            ),
        ]
    );
}

#[tokio::test]
async fn forwarding_failure_stays_tethered() {
    let mut ctx = tethered_ctx();
    ctx.netd.fail_on("ipfwd-add-interface-forward");

    ctx.command(upstream_changed("rmnet0", 42));

    // The partially programmed forward was removed again.
    assert_eq!(
        ctx.netd.take_calls(),
        vec![
            NetdCall::TetherAddForward("wlan1".to_owned(), "rmnet0".to_owned()),
            NetdCall::IpfwdAddInterfaceForward(
                "wlan1".to_owned(),
                "rmnet0".to_owned(),
            ),
            NetdCall::TetherRemoveForward(
                "wlan1".to_owned(),
                "rmnet0".to_owned(),
            ),
        ]
    );

    assert_eq!(ctx.instance.state, DownstreamState::Tethered);
    assert_eq!(ctx.instance.last_error, ErrorCode::EnableForwarding);
    assert_eq!(
        ctx.owner_msgs().last().unwrap(),
        &OwnerMsg::InterfaceStateChanged {
            ifname: "wlan1".to_owned(),
            state: DownstreamState::Tethered,
            error: ErrorCode::EnableForwarding,
        }
    );
}

#[tokio::test]
async fn interface_down_is_best_effort() {
    let mut ctx = tethered_ctx();

    // Daemon failures during teardown must not stop the remaining steps.
    ctx.netd.fail_on("tether-interface-remove");
    ctx.netd.fail_on("interface-set-cfg");

    ctx.command(CommandMsg::InterfaceDown(InterfaceDownMsg {}));

    assert_eq!(ctx.instance.state, DownstreamState::Unavailable);
    let msgs = ctx.owner_msgs();
    let OwnerMsg::LinkPropertiesChanged(link) = msgs.last().unwrap() else {
        panic!("expected link properties notification");
    };
    assert_eq!(link.ifname, "wlan1");
    assert!(link.is_empty());
    assert_eq!(*ctx.allocator.releases.lock().unwrap(), 1);

    // All teardown steps were still attempted.
    let calls = ctx.netd.take_calls();
    assert!(calls.contains(&NetdCall::TetherApplyDnsInterfaces));
    assert!(calls.contains(&NetdCall::NetworkRemoveInterface(
        LOCAL_NET_ID,
        "wlan1".to_owned()
    )));
}

#[tokio::test]
async fn local_only_ignores_upstream_changes() {
    let mut ctx = TestContext::wifi();
    ctx.instance.init();
    ctx.tether_request(ServingMode::LocalOnly);
    assert_eq!(ctx.instance.state, DownstreamState::LocalOnly);
    ctx.netd.take_calls();

    ctx.command(upstream_changed("rmnet0", 42));
    assert!(ctx.netd.take_calls().is_empty());
}

#[tokio::test]
async fn request_while_serving_is_a_noop() {
    let mut ctx = tethered_ctx();

    ctx.tether_request(ServingMode::Tethered);
    assert!(ctx.netd.take_calls().is_empty());
    assert!(ctx.owner_msgs().is_empty());
}

#[tokio::test]
async fn stale_dhcp_creation_callback_is_discarded() {
    let mut ctx = tethered_ctx();
    let callback = ctx.dhcp_factory.last_callback().unwrap();

    // Teardown bumps the lifecycle generation before the callback lands.
    ctx.command(CommandMsg::TetherUnrequest(TetherUnrequestMsg {}));

    let server = Arc::new(FakeDhcpServer::default());
    callback.complete(Ok(server.clone()));
    ctx.pump();

    assert!(server.started.lock().unwrap().is_empty());
    assert_eq!(*server.stopped.lock().unwrap(), 1);
}

#[tokio::test]
async fn dhcp_new_prefix_request_renumbers_downstream() {
    let mut ctx = tethered_ctx();

    let server = Arc::new(FakeDhcpServer::default());
    let callback = ctx.dhcp_factory.last_callback().unwrap();
    callback.complete(Ok(server.clone()));
    ctx.pump();
    ctx.owner_msgs();

    // The server observed a DHCPDECLINE and asks for a whole new prefix.
    let events = server.events.lock().unwrap().clone().unwrap();
    events
        .send(tether_utils::dhcp::DhcpServerMsg::NewPrefixRequest)
        .unwrap();
    ctx.pump();

    // A fresh prefix was requested, avoiding the declined one.
    let old_prefix = "192.168.42.1/24".parse().unwrap();
    let new_prefix = "192.168.51.1/24".parse().unwrap();
    {
        let requests = ctx.allocator.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], (InterfaceType::Wifi, Some(old_prefix)));
    }

    // The interface was reconfigured and the live server updated, without
    // a state transition.
    assert_eq!(
        ctx.netd.take_calls(),
        vec![NetdCall::InterfaceSetCfg(InterfaceConfig::new(
            "wlan1".to_owned(),
            Some(new_prefix),
            InterfaceFlags::UP | InterfaceFlags::RUNNING,
        ))]
    );
    {
        let updated = server.updated.lock().unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].server_addr, new_prefix);
    }

    let msgs = ctx.owner_msgs();
    assert_eq!(msgs.len(), 1);
    let OwnerMsg::LinkPropertiesChanged(link) = &msgs[0] else {
        panic!("expected link properties notification");
    };
    assert!(link.addresses.contains(&new_prefix.into()));
    assert_eq!(ctx.instance.state, DownstreamState::Tethered);
}

#[tokio::test]
async fn stop_disposes_the_instance() {
    let mut ctx = tethered_ctx();

    let more = ctx.command(CommandMsg::Stop(StopMsg {}));
    assert!(!more);

    // Disposal released the address and stopped the neighbor monitor.
    assert_eq!(*ctx.allocator.releases.lock().unwrap(), 1);
    assert_eq!(*ctx.monitor.stops.lock().unwrap(), 1);
}

#[tokio::test]
async fn ncm_enables_prefix_renegotiation() {
    let mut ctx = TestContext::new(InstanceCfg::new(
        "ncm0".to_owned(),
        12,
        MacAddr::from([0x02, 0x00, 0x00, 0x00, 0x00, 0x03]),
        InterfaceType::Ncm,
        false,
        DHCP_LEASE_TIME_SECS,
    ));
    ctx.instance.init();
    ctx.tether_request(ServingMode::Tethered);

    let requests = ctx.dhcp_factory.requests.lock().unwrap();
    assert!(requests[0].1.change_prefix_on_decline);
}
