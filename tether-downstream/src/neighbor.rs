//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

use tether_utils::bpf::{BpfCoordinator, ForwardingRule};
use tether_utils::ip::Ipv6AddrExt;
use tether_utils::mac_addr::MacAddr;
use tether_utils::neighbor::{NeighborEvent, NeighborEventKind, NudState};
use tether_utils::netd::NetdApi;

use crate::debug::Debug;
use crate::error::Error;
use crate::upstream::Ipv6Upstream;

// Maintains the 1:1 mapping from reachable IPv6 neighbors to offloaded
// forwarding rules for one downstream interface.
//
// Rule installs go through the BPF coordinator first and the network
// daemon second; removals mirror this. A failed daemon call is logged and
// counted but never rolls the rule table back (the table is eventually
// consistent with the daemon).
//
// With offload disabled every entry point is a complete no-op. The
// neighbor monitor is not even started in that mode; the guard here exists
// so that a stray event still cannot produce daemon calls.
#[derive(Debug)]
pub struct NeighborRuleManager {
    netd: Arc<dyn NetdApi>,
    bpf: Arc<dyn BpfCoordinator>,
    downstream_ifindex: u32,
    downstream_mac: MacAddr,
    offload_enabled: bool,
    rules: HashMap<Ipv6Addr, ForwardingRule>,
    pub statistics: RuleStatistics,
}

#[derive(Debug, Default)]
pub struct RuleStatistics {
    pub rules_added: u64,
    pub rules_removed: u64,
    pub add_failures: u64,
    pub remove_failures: u64,
}

// ===== impl NeighborRuleManager =====

impl NeighborRuleManager {
    pub fn new(
        netd: Arc<dyn NetdApi>,
        bpf: Arc<dyn BpfCoordinator>,
        downstream_ifindex: u32,
        downstream_mac: MacAddr,
        offload_enabled: bool,
    ) -> Self {
        NeighborRuleManager {
            netd,
            bpf,
            downstream_ifindex,
            downstream_mac,
            offload_enabled,
            rules: Default::default(),
            statistics: Default::default(),
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = &'_ ForwardingRule> + '_ {
        self.rules.values()
    }

    // Processes one neighbor table update. `upstream` is the current IPv6
    // upstream when the downstream is eligible for offload (serving state,
    // upstream reachable over IPv6), `None` otherwise.
    pub fn process_event(
        &mut self,
        event: &NeighborEvent,
        upstream: Option<&Ipv6Upstream>,
    ) {
        if !self.offload_enabled {
            return;
        }
        if event.ifindex != self.downstream_ifindex {
            return;
        }
        let IpAddr::V6(dst) = event.addr else {
            return;
        };
        if dst.is_link_local() || dst.is_multicast() {
            return;
        }

        match (event.kind, event.state, event.mac) {
            // Neighbor became reachable with a known MAC.
            (NeighborEventKind::New, NudState::Reachable, Some(mac)) => {
                let Some(up) = upstream else {
                    return;
                };
                let rule = ForwardingRule::new(
                    up.ifindex,
                    self.downstream_ifindex,
                    dst,
                    self.downstream_mac,
                    Some(mac),
                );
                self.add_rule(rule);
            }
            // Neighbor failed or was deleted. FAILED events carry no MAC;
            // the removal key matches by destination only.
            (NeighborEventKind::Del, ..)
            | (NeighborEventKind::New, NudState::Failed, _) => {
                self.remove_rule(dst);
            }
            _ => (),
        }
    }

    // Rebinds every rule to a new upstream: remove everything bound to the
    // old one, then (if the new upstream is reachable over IPv6) reinstall
    // an equivalent rule per known neighbor. A bulk clear-then-repopulate,
    // not an incremental diff.
    pub fn update_upstream(&mut self, upstream: Option<&Ipv6Upstream>) {
        if !self.offload_enabled {
            return;
        }

        let Some(up) = upstream else {
            self.clear_rules();
            return;
        };

        if self.rules.is_empty() {
            return;
        }

        if let Err(error) = self
            .bpf
            .tether_offload_rule_update(self.downstream_ifindex, up.ifindex)
        {
            Error::NetdCall("tether-offload-rule-update", error).log();
        }

        let old_rules = std::mem::take(&mut self.rules);
        let mut old_upstreams: Vec<u32> = Vec::new();
        for (dst, rule) in old_rules {
            if let Err(error) = self.netd.tether_offload_rule_remove(&rule) {
                self.statistics.remove_failures += 1;
                Error::OffloadRuleRemove(dst, error).log();
            }
            self.statistics.rules_removed += 1;
            if !old_upstreams.contains(&rule.upstream_ifindex) {
                old_upstreams.push(rule.upstream_ifindex);
            }

            let rule = rule.on_new_upstream(up.ifindex);
            Debug::RuleAdd(&rule).log();
            if let Err(error) = self.netd.tether_offload_rule_add(&rule) {
                self.statistics.add_failures += 1;
                Error::OffloadRuleAdd(dst, error).log();
            }
            self.statistics.rules_added += 1;
            self.rules.insert(dst, rule);
        }

        // Fetch and reset the offload counters of every detached upstream.
        for upstream_ifindex in old_upstreams {
            if upstream_ifindex == up.ifindex {
                continue;
            }
            if let Err(error) =
                self.netd.tether_offload_get_and_clear_stats(upstream_ifindex)
            {
                Error::NetdCall("tether-offload-get-and-clear-stats", error)
                    .log();
            }
        }
    }

    // Removes every rule of this downstream unconditionally. Invoked on
    // upstream IPv6 loss, offload disable and interface stop.
    pub fn clear_rules(&mut self) {
        if !self.offload_enabled || self.rules.is_empty() {
            return;
        }

        Debug::RuleClear(self.rules.len()).log();
        if let Err(error) =
            self.bpf.tether_offload_rule_clear(self.downstream_ifindex)
        {
            Error::NetdCall("tether-offload-rule-clear", error).log();
        }

        let old_rules = std::mem::take(&mut self.rules);
        let mut upstreams: Vec<u32> = Vec::new();
        for (dst, rule) in &old_rules {
            if let Err(error) = self.netd.tether_offload_rule_remove(rule) {
                self.statistics.remove_failures += 1;
                Error::OffloadRuleRemove(*dst, error).log();
            }
            self.statistics.rules_removed += 1;
            if !upstreams.contains(&rule.upstream_ifindex) {
                upstreams.push(rule.upstream_ifindex);
            }
        }

        // Fetch and reset the offload counters of every detached upstream.
        for upstream_ifindex in upstreams {
            if let Err(error) =
                self.netd.tether_offload_get_and_clear_stats(upstream_ifindex)
            {
                Error::NetdCall("tether-offload-get-and-clear-stats", error)
                    .log();
            }
        }
    }

    fn add_rule(&mut self, rule: ForwardingRule) {
        Debug::RuleAdd(&rule).log();

        if let Err(error) = self.bpf.tether_offload_rule_add(&rule) {
            self.statistics.add_failures += 1;
            Error::OffloadRuleAdd(rule.dst, error).log();
        }
        if let Err(error) = self.netd.tether_offload_rule_add(&rule) {
            self.statistics.add_failures += 1;
            Error::OffloadRuleAdd(rule.dst, error).log();
        }

        self.statistics.rules_added += 1;
        // Last-writer-wins: a rule for the same destination replaces any
        // prior one.
        self.rules.insert(rule.dst, rule);
    }

    fn remove_rule(&mut self, dst: Ipv6Addr) {
        let Some(rule) = self.rules.remove(&dst) else {
            return;
        };

        // The removal key carries no destination MAC.
        let key = ForwardingRule {
            dst_mac: None,
            ..rule
        };
        Debug::RuleRemove(&key).log();

        if let Err(error) = self.bpf.tether_offload_rule_remove(&key) {
            self.statistics.remove_failures += 1;
            Error::OffloadRuleRemove(dst, error).log();
        }
        if let Err(error) = self.netd.tether_offload_rule_remove(&key) {
            self.statistics.remove_failures += 1;
            Error::OffloadRuleRemove(dst, error).log();
        }

        self.statistics.rules_removed += 1;
        self.detach_stats_if_last(rule.upstream_ifindex);
    }

    // Fetches and resets the upstream's offload counters once no rule of
    // this downstream is bound to it anymore.
    fn detach_stats_if_last(&mut self, upstream_ifindex: u32) {
        let still_bound = self
            .rules
            .values()
            .any(|rule| rule.upstream_ifindex == upstream_ifindex);
        if still_bound {
            return;
        }
        if let Err(error) =
            self.netd.tether_offload_get_and_clear_stats(upstream_ifindex)
        {
            Error::NetdCall("tether-offload-get-and-clear-stats", error)
                .log();
        }
    }
}
