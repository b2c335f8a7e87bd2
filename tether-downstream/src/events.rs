//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use tether_utils::dhcp::{DhcpServerMsg, DhcpServingParams};
use tether_utils::ip::ipv6_link_local_prefix;
use tether_utils::link::RouteEntry;
use tether_utils::neighbor::NeighborEvent;

use crate::debug::Debug;
use crate::error::{Error, ErrorCode};
use crate::instance::{DownstreamState, Instance, ServingMode};
use crate::southbound::subnet_of;
use crate::upstream::{Ipv6Upstream, UpstreamChange};

// ===== Tether request =====

pub(crate) fn process_tether_request(
    instance: &mut Instance,
    mode: ServingMode,
) -> Result<(), Error> {
    if instance.state != DownstreamState::Available {
        Debug::CommandIgnored("tether-request", instance.state).log();
        return Ok(());
    }

    Debug::ServingStart(mode).log();
    match serving_setup(instance, mode) {
        Ok(()) => {
            instance.serving_mode = Some(mode);
            instance.report_state(mode.state(), ErrorCode::None);
            instance.report_link_properties();
            Ok(())
        }
        Err((code, error)) => {
            // Fail-fast rollback: the remaining setup steps were aborted;
            // undo everything so the interface is never left half
            // configured, and never report a serving state on failure.
            serving_teardown(instance);
            instance.report_state(DownstreamState::Available, code);
            instance.report_link_properties();
            Err(error)
        }
    }
}

// Runs the ordered serving setup sequence, stopping at the first failing
// daemon call.
fn serving_setup(
    instance: &mut Instance,
    _mode: ServingMode,
) -> Result<(), (ErrorCode, Error)> {
    let if_type = instance.cfg.if_type;

    // Downstream IPv4 prefix.
    let prefix = instance
        .allocator
        .request_downstream_address(if_type, None)
        .map_err(|error| {
            (ErrorCode::IfaceCfg, Error::AddressAllocation(if_type, error))
        })?;
    instance.v4_addr = Some(prefix);

    // Interface configuration. Interfaces owned by another stack
    // (Bluetooth PAN) are already up and keep their configuration.
    if if_type.starts_admin_up() {
        instance
            .configurator
            .configure_ipv4(prefix)
            .map_err(|error| (ErrorCode::IfaceCfg, error))?;
    }

    // Attach to the tethering subsystem and program on-link routes.
    instance
        .configurator
        .attach()
        .map_err(|error| (ErrorCode::TetherIface, error))?;
    instance
        .configurator
        .add_local_routes(prefix)
        .map_err(|error| (ErrorCode::TetherIface, error))?;

    // Publishable link properties.
    instance.link.addresses = vec![prefix.into()];
    instance.link.routes = vec![
        RouteEntry::new(
            subnet_of(prefix).into(),
            instance.cfg.ifname.clone(),
        ),
        RouteEntry::new(
            ipv6_link_local_prefix().into(),
            instance.cfg.ifname.clone(),
        ),
    ];
    instance.link.dns_server = Some(prefix.ip().into());

    // Router advertisements. A daemon start failure leaves the downstream
    // serving IPv4-only and is not a state machine error.
    if let Err(error) = instance.ra.start() {
        error.log();
    }

    // DHCP serving; creation completes asynchronously.
    let params = DhcpServingParams::from_prefix(
        prefix,
        if_type,
        instance.cfg.dhcp_lease_time_secs,
    );
    instance.dhcp.start_serving(params);

    Ok(())
}

// Reverses all serving-time programming. Daemon-call failures are logged
// and the remaining steps still run, so partially applied forwarding state
// cannot outlive the address lease.
fn serving_teardown(instance: &mut Instance) {
    // Stop DHCP serving and router advertisements.
    instance.dhcp.stop_serving();
    instance.ra.stop();

    // Clear offloaded forwarding rules.
    instance.neighbors.clear_rules();

    // Remove NAT forwarding towards the current upstream.
    if instance.state == DownstreamState::Tethered
        && let Some(upstream) = instance.upstream.ifname()
    {
        instance.configurator.disable_forwarding_best_effort(upstream);
    }

    // Ordered detach: DNS reapplication, tether interface removal, local
    // network removal, interface reset, address release.
    instance.configurator.detach_best_effort();
    if instance.cfg.if_type.starts_admin_up() {
        instance.configurator.unconfigure_ipv4_best_effort();
    }
    if instance.v4_addr.take().is_some() {
        instance.allocator.release_downstream(instance.cfg.if_type);
    }

    instance.upstream.clear();
    instance.link.clear();
    instance.serving_mode = None;
}

// ===== Tether unrequest =====

pub(crate) fn process_tether_unrequest(instance: &mut Instance) {
    if !instance.state.is_serving() {
        Debug::CommandIgnored("tether-unrequest", instance.state).log();
        return;
    }

    Debug::ServingStop.log();
    serving_teardown(instance);
    instance.report_state(DownstreamState::Available, ErrorCode::None);
    instance.report_link_properties();
}

// ===== Interface down =====

pub(crate) fn process_interface_down(instance: &mut Instance) {
    if instance.state == DownstreamState::Unavailable {
        Debug::CommandIgnored("interface-down", instance.state).log();
        return;
    }

    if instance.state.is_serving() {
        serving_teardown(instance);
    }
    instance.report_state(DownstreamState::Unavailable, ErrorCode::None);
    instance.report_link_properties();
}

// ===== Upstream change =====

pub(crate) fn process_upstream_changed(
    instance: &mut Instance,
    ifname: Option<String>,
    ifindex: u32,
) -> Result<(), Error> {
    // Upstream forwarding only exists in tethered mode.
    if instance.state != DownstreamState::Tethered {
        Debug::CommandIgnored("upstream-changed", instance.state).log();
        return Ok(());
    }

    match instance.upstream.set_upstream(ifname, ifindex) {
        UpstreamChange::Unchanged => {
            Debug::UpstreamDuplicate.log();
            Ok(())
        }
        UpstreamChange::Changed(old) => {
            Debug::UpstreamChange(instance.upstream.ifname()).log();

            if let Some(old) = &old {
                instance.configurator.disable_forwarding_best_effort(old);
            }

            let new = instance.upstream.ifname().map(str::to_owned);
            if let Some(new) = new
                && let Err(error) = instance.configurator.enable_forwarding(&new)
            {
                // Forget the upstream so the next notification retries;
                // the downstream stays tethered.
                instance.upstream.clear_upstream();
                instance.report_state(
                    DownstreamState::Tethered,
                    ErrorCode::EnableForwarding,
                );
                return Err(error);
            }

            // Refresh the DHCP serving parameters; a no-op unless they
            // actually changed.
            if let Some(prefix) = instance.v4_addr {
                let params = DhcpServingParams::from_prefix(
                    prefix,
                    instance.cfg.if_type,
                    instance.cfg.dhcp_lease_time_secs,
                );
                if let Err(error) = instance.dhcp.update_params(params) {
                    error.log();
                }
            }
            Ok(())
        }
    }
}

// ===== IPv6 upstream update =====

pub(crate) fn process_ipv6_update(
    instance: &mut Instance,
    upstream: Option<Ipv6Upstream>,
) {
    if !instance.state.is_serving() {
        Debug::CommandIgnored("ipv6-tether-update", instance.state).log();
        return;
    }

    match instance.upstream.set_ipv6(upstream) {
        UpstreamChange::Unchanged => {
            Debug::UpstreamDuplicate.log();
        }
        UpstreamChange::Changed(old) => {
            Debug::Ipv6UpstreamChange(
                instance.upstream.v6().map(|up| up.ifindex),
            )
            .log();

            // Recompute RA parameters and rebuild the advertisement.
            instance.ra.update(instance.upstream.v6());

            // Rebind the offloaded rules when the forwarding target
            // changed.
            let old_ifindex = old.as_ref().map(|up| up.ifindex);
            let new_ifindex = instance.upstream.v6().map(|up| up.ifindex);
            if old_ifindex != new_ifindex {
                instance.neighbors.update_upstream(instance.upstream.v6());
            }
        }
    }
}

// ===== DHCP server events =====

pub(crate) fn process_dhcp_msg(
    instance: &mut Instance,
    msg: DhcpServerMsg,
) -> Result<(), Error> {
    match msg {
        // Asynchronous creation completed.
        DhcpServerMsg::Created { index, result } => {
            let serving = instance.state.is_serving();
            instance.dhcp.handle_created(index, result, serving)
        }
        // Bounded creation wait expired.
        DhcpServerMsg::CreationTimeout { index } => {
            instance.dhcp.handle_creation_timeout(index)
        }
        // A client declined the offered address.
        DhcpServerMsg::NewPrefixRequest => {
            process_new_prefix_request(instance)
        }
    }
}

fn process_new_prefix_request(instance: &mut Instance) -> Result<(), Error> {
    if !instance.state.is_serving() {
        return Ok(());
    }
    let Some(old_prefix) = instance.v4_addr else {
        return Ok(());
    };

    // Request a fresh prefix, explicitly avoiding the declined one.
    let prefix = instance
        .allocator
        .request_downstream_address(instance.cfg.if_type, Some(old_prefix))
        .map_err(|error| {
            Error::AddressAllocation(instance.cfg.if_type, error)
        })?;
    Debug::NewPrefixRequest(&prefix).log();

    // Reconfigure the interface with the new address.
    if instance.cfg.if_type.starts_admin_up() {
        instance.configurator.configure_ipv4(prefix)?;
    }
    instance.v4_addr = Some(prefix);

    // Republish link properties with the new IPv4 configuration.
    instance
        .link
        .addresses
        .retain(|addr| !matches!(addr, IpNetwork::V4(_)));
    instance.link.addresses.insert(0, prefix.into());
    instance
        .link
        .routes
        .retain(|route| !matches!(route.destination, IpNetwork::V4(_)));
    instance.link.routes.insert(
        0,
        RouteEntry::new(
            subnet_of(prefix).into(),
            instance.cfg.ifname.clone(),
        ),
    );
    instance.link.dns_server = Some(prefix.ip().into());
    instance.report_link_properties();

    // Update the live server; no restart and no state transition.
    let params = DhcpServingParams::from_prefix(
        prefix,
        instance.cfg.if_type,
        instance.cfg.dhcp_lease_time_secs,
    );
    instance.dhcp.update_params(params)
}

// ===== Neighbor events =====

pub(crate) fn process_neighbor_event(
    instance: &mut Instance,
    event: NeighborEvent,
) {
    Debug::NeighborUpdate(&event).log();

    // Offload is only eligible while serving with an IPv6-reachable
    // upstream; rule removals are processed regardless.
    let upstream = if instance.state.is_serving() {
        instance.upstream.v6()
    } else {
        None
    };
    instance.neighbors.process_event(&event, upstream);
}

// ===== Disposal =====

pub(crate) fn process_stop(instance: &mut Instance) {
    Debug::InstanceDispose.log();

    if instance.state.is_serving() {
        serving_teardown(instance);
    } else {
        instance.neighbors.clear_rules();
    }
    instance.monitor.stop();
}
