// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Southbound contract (spec §6) and the local-topology adapter (C7) that
//! translates it into overlay publishes and topology-store updates.
//!
//! The OpenFlow wire codec and session I/O themselves are out of scope
//! (spec §1): this module defines the plain event/command types a
//! collaborator implementing that codec would produce and consume, the
//! way `controller.py`'s handler set does at the Ryu boundary, without
//! implementing OpenFlow parsing.

use crate::topology::{Cid, Dpid, Host, LinkKey, LinkOp, Port, PortOp, Switch, SwitchOp};

/// Events the southbound collaborator hands to the core.
#[derive(Debug, Clone, PartialEq)]
pub enum SouthboundEvent {
    SwitchEnter { switch: Switch, ports: Vec<Port> },
    SwitchLeave { dpid: Dpid },
    PortAdd(Port),
    PortModify(Port),
    PortDelete(Port),
    LinkAdd(Link),
    LinkDelete(Link),
    HostAdd(Host),
    /// `(datapath, in_port, data)` — opaque payload, ARP/L2 learning is a
    /// neighbor concern; the core only needs to know a packet arrived so
    /// it can coexist with the table-miss contract.
    PacketIn { dpid: Dpid, in_port: u16, data: Vec<u8> },
    OfpErrorMsg { dpid: Dpid, code: u32, kind: String },
    StateChange { dpid: Dpid, state: DatapathState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatapathState {
    Main,
    Dead,
}

/// Convenience alias matching spec §3's link shape (undirected pair of
/// directed [`LinkKey`]s); southbound collaborators typically discover
/// one direction at a time.
pub type Link = LinkKey;

/// Commands the core emits for the southbound collaborator to realize on
/// its switches (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub enum SouthboundCommand {
    FlowMod {
        dpid: Dpid,
        priority: u16,
        match_ipv4_dst: Option<String>,
        actions: Vec<FlowAction>,
        buffer_id: Option<u32>,
    },
    GroupMod {
        dpid: Dpid,
        command: GroupModCommand,
        group_id: u16,
        buckets: Vec<GroupBucket>,
    },
    PacketOut {
        dpid: Dpid,
        in_port: u16,
        actions: Vec<FlowAction>,
        data: Option<Vec<u8>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupModCommand {
    Add,
    Modify,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowAction {
    Output(u16),
    Group(u16),
    ToController,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupBucket {
    pub actions: Vec<FlowAction>,
}

impl SouthboundCommand {
    /// The table-miss entry every switch must carry (spec §6): priority
    /// 0, match-any, send to controller.
    pub fn table_miss(dpid: Dpid) -> Self {
        Self::FlowMod {
            dpid,
            priority: 0,
            match_ipv4_dst: None,
            actions: vec![FlowAction::ToController],
            buffer_id: None,
        }
    }
}

/// Local-topology adapter (C7): turns southbound events into store
/// updates on one controller's own region of the replicated view, and
/// into a list of records to publish to peers via the overlay. Kept
/// decoupled from the overlay transport itself — callers take the
/// returned publish list and hand it to `Overlay::publish`.
pub struct LocalTopologyAdapter {
    cid: Cid,
}

/// One record to fan out over the overlay, tagged by topic (spec §4.4's
/// four topics).
#[derive(Debug, Clone)]
pub enum OutboundRecord {
    Switch(Switch, SwitchOp),
    Port(Port, PortOp),
    Link(LinkKey, LinkOp),
    Host(Host),
}

impl LocalTopologyAdapter {
    pub fn new(cid: Cid) -> Self {
        Self { cid }
    }

    /// Translates one southbound event into the topology-store apply call
    /// (the caller owns the store and issues it) and the overlay records
    /// to publish. Events this controller does not own (switches outside
    /// its shard) never originate here, so every `Switch` built carries
    /// this adapter's own `cid`.
    pub fn translate(&self, event: &SouthboundEvent) -> Vec<OutboundRecord> {
        match event {
            SouthboundEvent::SwitchEnter { switch, ports } => {
                let mut out = vec![OutboundRecord::Switch(
                    Switch { dpid: switch.dpid, cid: self.cid, port_count: switch.port_count },
                    SwitchOp::Enter,
                )];
                out.extend(
                    ports.iter().cloned().map(|p| OutboundRecord::Port(p, PortOp::Add)),
                );
                out
            }
            SouthboundEvent::SwitchLeave { dpid } => vec![OutboundRecord::Switch(
                Switch { dpid: *dpid, cid: self.cid, port_count: 0 },
                SwitchOp::Leave,
            )],
            SouthboundEvent::PortAdd(p) => vec![OutboundRecord::Port(p.clone(), PortOp::Add)],
            SouthboundEvent::PortModify(p) => {
                vec![OutboundRecord::Port(p.clone(), PortOp::Modify)]
            }
            SouthboundEvent::PortDelete(p) => {
                vec![OutboundRecord::Port(p.clone(), PortOp::Delete)]
            }
            SouthboundEvent::LinkAdd(l) => vec![OutboundRecord::Link(*l, LinkOp::Add)],
            SouthboundEvent::LinkDelete(l) => vec![OutboundRecord::Link(*l, LinkOp::Delete)],
            SouthboundEvent::HostAdd(h) => vec![OutboundRecord::Host(h.clone())],
            // PacketIn/OFPErrorMsg/state-change don't mutate topology; the
            // orchestrator and distributor react to them directly (spec
            // §7's southbound-rejection handling, §5's ARP/L2 coexistence
            // contract).
            SouthboundEvent::PacketIn { .. }
            | SouthboundEvent::OfpErrorMsg { .. }
            | SouthboundEvent::StateChange { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_enter_yields_switch_then_ports() {
        let adapter = LocalTopologyAdapter::new(7);
        let port = Port {
            dpid: 1,
            port_no: 1,
            hw_addr: "aa".into(),
            name: "p1".into(),
            ofp_version: "OF13".into(),
            config: 0,
            state: 0,
            is_live: true,
        };
        let event = SouthboundEvent::SwitchEnter {
            switch: Switch { dpid: 1, cid: 0, port_count: 1 },
            ports: vec![port],
        };
        let out = adapter.translate(&event);
        assert_eq!(out.len(), 2);
        match &out[0] {
            OutboundRecord::Switch(sw, SwitchOp::Enter) => assert_eq!(sw.cid, 7),
            _ => panic!("expected switch-enter first"),
        }
    }

    #[test]
    fn packet_in_does_not_mutate_topology() {
        let adapter = LocalTopologyAdapter::new(1);
        let event = SouthboundEvent::PacketIn { dpid: 1, in_port: 2, data: vec![] };
        assert!(adapter.translate(&event).is_empty());
    }

    #[test]
    fn table_miss_is_priority_zero_match_any() {
        let cmd = SouthboundCommand::table_miss(42);
        match cmd {
            SouthboundCommand::FlowMod { priority, match_ipv4_dst, actions, .. } => {
                assert_eq!(priority, 0);
                assert!(match_ipv4_dst.is_none());
                assert_eq!(actions, vec![FlowAction::ToController]);
            }
            _ => panic!("expected FlowMod"),
        }
    }
}
