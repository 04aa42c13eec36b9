// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Southbound listener (spec §6): accepts a TCP connection from the
//! OpenFlow collaborator (e.g. a Ryu app) on `--ofp-tcp-listen-port` and
//! exchanges newline-delimited JSON in place of implementing the OpenFlow
//! wire codec itself, which is explicitly out of scope for the core.
//!
//! One line in is one [`SouthboundEvent`]; one line out is one
//! [`SouthboundCommand`]. Only the most recently accepted connection is
//! fed outgoing commands — a collaborator that reconnects simply replaces
//! the prior one, mirroring a single-process Ryu app restarting.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};
use hdds_sdn_core::southbound::{
    DatapathState, FlowAction, GroupBucket, GroupModCommand, SouthboundCommand, SouthboundEvent,
};
use hdds_sdn_core::topology::{Host, LinkKey, Port, Switch};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// JSON line shape for events coming up from the collaborator. Mirrors
/// `hdds_sdn_core::southbound::SouthboundEvent` field-for-field; kept as a
/// separate type so the wire shape doesn't change if the core enum grows
/// internal-only variants.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
enum EventWire {
    SwitchEnter { dpid: u64, cid: i16, port_count: u16, ports: Vec<PortWire> },
    SwitchLeave { dpid: u64 },
    PortAdd(PortWire),
    PortModify(PortWire),
    PortDelete(PortWire),
    LinkAdd { src_dpid: u64, src_port_no: u16, dst_dpid: u64, dst_port_no: u16 },
    LinkDelete { src_dpid: u64, src_port_no: u16, dst_dpid: u64, dst_port_no: u16 },
    HostAdd { dpid: u64, port_no: u16, mac: String, ipv4: String, ipv6: String },
    PacketIn { dpid: u64, in_port: u16, data: Vec<u8> },
    OfpErrorMsg { dpid: u64, code: u32, kind_str: String },
    StateChange { dpid: u64, state: String },
}

#[derive(Debug, Deserialize)]
struct PortWire {
    dpid: u64,
    port_no: u16,
    hw_addr: String,
    name: String,
    ofp_version: String,
    config: u16,
    state: u16,
    is_live: bool,
}

impl From<PortWire> for Port {
    fn from(p: PortWire) -> Self {
        Port {
            dpid: p.dpid,
            port_no: p.port_no,
            hw_addr: p.hw_addr,
            name: p.name,
            ofp_version: p.ofp_version,
            config: p.config,
            state: p.state,
            is_live: p.is_live,
        }
    }
}

fn event_from_wire(wire: EventWire) -> SouthboundEvent {
    match wire {
        EventWire::SwitchEnter { dpid, cid, port_count, ports } => SouthboundEvent::SwitchEnter {
            switch: Switch { dpid, cid, port_count },
            ports: ports.into_iter().map(Port::from).collect(),
        },
        EventWire::SwitchLeave { dpid } => SouthboundEvent::SwitchLeave { dpid },
        EventWire::PortAdd(p) => SouthboundEvent::PortAdd(p.into()),
        EventWire::PortModify(p) => SouthboundEvent::PortModify(p.into()),
        EventWire::PortDelete(p) => SouthboundEvent::PortDelete(p.into()),
        EventWire::LinkAdd { src_dpid, src_port_no, dst_dpid, dst_port_no } => {
            SouthboundEvent::LinkAdd(LinkKey { src_dpid, src_port_no, dst_dpid, dst_port_no })
        }
        EventWire::LinkDelete { src_dpid, src_port_no, dst_dpid, dst_port_no } => {
            SouthboundEvent::LinkDelete(LinkKey { src_dpid, src_port_no, dst_dpid, dst_port_no })
        }
        EventWire::HostAdd { dpid, port_no, mac, ipv4, ipv6 } => {
            SouthboundEvent::HostAdd(Host { dpid, port_no, mac, ipv4, ipv6 })
        }
        EventWire::PacketIn { dpid, in_port, data } => SouthboundEvent::PacketIn { dpid, in_port, data },
        EventWire::OfpErrorMsg { dpid, code, kind_str } => {
            SouthboundEvent::OfpErrorMsg { dpid, code, kind: kind_str }
        }
        EventWire::StateChange { dpid, state } => SouthboundEvent::StateChange {
            dpid,
            state: if state.eq_ignore_ascii_case("dead") { DatapathState::Dead } else { DatapathState::Main },
        },
    }
}

/// JSON line shape for commands going down to the collaborator.
#[derive(Debug, Serialize)]
#[serde(tag = "kind")]
enum CommandWire {
    FlowMod { dpid: u64, priority: u16, match_ipv4_dst: Option<String>, actions: Vec<ActionWire>, buffer_id: Option<u32> },
    GroupMod { dpid: u64, command: &'static str, group_id: u16, buckets: Vec<Vec<ActionWire>> },
    PacketOut { dpid: u64, in_port: u16, actions: Vec<ActionWire>, data: Option<Vec<u8>> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ActionWire {
    Output { port: u16 },
    Group { group_id: u16 },
    ToController,
}

fn action_to_wire(a: &FlowAction) -> ActionWire {
    match a {
        FlowAction::Output(port) => ActionWire::Output { port: *port },
        FlowAction::Group(group_id) => ActionWire::Group { group_id: *group_id },
        FlowAction::ToController => ActionWire::ToController,
    }
}

fn buckets_to_wire(buckets: &[GroupBucket]) -> Vec<Vec<ActionWire>> {
    buckets.iter().map(|b| b.actions.iter().map(action_to_wire).collect()).collect()
}

fn command_to_wire(cmd: &SouthboundCommand) -> CommandWire {
    match cmd {
        SouthboundCommand::FlowMod { dpid, priority, match_ipv4_dst, actions, buffer_id } => CommandWire::FlowMod {
            dpid: *dpid,
            priority: *priority,
            match_ipv4_dst: match_ipv4_dst.clone(),
            actions: actions.iter().map(action_to_wire).collect(),
            buffer_id: *buffer_id,
        },
        SouthboundCommand::GroupMod { dpid, command, group_id, buckets } => CommandWire::GroupMod {
            dpid: *dpid,
            command: match command {
                GroupModCommand::Add => "add",
                GroupModCommand::Modify => "modify",
                GroupModCommand::Delete => "delete",
            },
            group_id: *group_id,
            buckets: buckets_to_wire(buckets),
        },
        SouthboundCommand::PacketOut { dpid, in_port, actions, data } => CommandWire::PacketOut {
            dpid: *dpid,
            in_port: *in_port,
            actions: actions.iter().map(action_to_wire).collect(),
            data: data.clone(),
        },
    }
}

/// Shared state for the currently connected southbound collaborator, if
/// any. A `None` means commands are dropped with a warning (there is
/// nothing downstream to realize them on).
type CurrentLink = Arc<Mutex<Option<TcpStream>>>;

/// Accepts southbound connections on `listener` forever, pushing decoded
/// events onto `events_tx` and keeping `current` pointed at the newest
/// live connection for the command-writer loop to use. Exits only on a
/// listener-level I/O error.
pub fn accept_loop(listener: TcpListener, events_tx: Sender<SouthboundEvent>, current: CurrentLink) {
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                log::warn!("[southbound_stub::accept_loop] accept failed: {e}");
                continue;
            }
        };
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".into());
        log::info!("[southbound_stub::accept_loop] southbound collaborator connected from {peer}");
        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                log::warn!("[southbound_stub::accept_loop] clone failed: {e}");
                continue;
            }
        };
        *current.lock() = Some(stream);

        let events_tx = events_tx.clone();
        std::thread::spawn(move || read_events(reader_stream, events_tx));
    }
}

fn read_events(stream: TcpStream, events_tx: Sender<SouthboundEvent>) {
    let mut lines = BufReader::new(stream).lines();
    while let Some(Ok(line)) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventWire>(&line) {
            Ok(wire) => {
                if events_tx.send(event_from_wire(wire)).is_err() {
                    break;
                }
            }
            Err(e) => log::warn!("[southbound_stub::read_events] malformed event line dropped: {e}"),
        }
    }
    log::info!("[southbound_stub::read_events] southbound collaborator disconnected");
}

/// Drains `commands_rx` forever, writing each one as a JSON line to
/// whatever southbound connection is currently live.
pub fn command_writer_loop(commands_rx: Receiver<SouthboundCommand>, current: CurrentLink) {
    for cmd in commands_rx.iter() {
        let wire = command_to_wire(&cmd);
        let mut line = match serde_json::to_string(&wire) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("[southbound_stub::command_writer_loop] encode failed: {e}");
                continue;
            }
        };
        line.push('\n');

        let mut guard = current.lock();
        match guard.as_mut() {
            Some(stream) => {
                if let Err(e) = stream.write_all(line.as_bytes()) {
                    log::warn!("[southbound_stub::command_writer_loop] write failed, dropping link: {e}");
                    *guard = None;
                }
            }
            None => log::warn!(
                "[southbound_stub::command_writer_loop] no southbound collaborator connected, dropping command"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_switch_enter_converts_ports_in_order() {
        let wire = EventWire::SwitchEnter {
            dpid: 1,
            cid: 2,
            port_count: 1,
            ports: vec![PortWire {
                dpid: 1,
                port_no: 1,
                hw_addr: "aa:bb".into(),
                name: "p1".into(),
                ofp_version: "OF13".into(),
                config: 0,
                state: 0,
                is_live: true,
            }],
        };
        match event_from_wire(wire) {
            SouthboundEvent::SwitchEnter { switch, ports } => {
                assert_eq!(switch.dpid, 1);
                assert_eq!(ports.len(), 1);
            }
            _ => panic!("expected switch enter"),
        }
    }

    #[test]
    fn command_to_wire_table_miss_is_to_controller_action() {
        let cmd = SouthboundCommand::table_miss(7);
        let wire = command_to_wire(&cmd);
        match wire {
            CommandWire::FlowMod { priority, actions, .. } => {
                assert_eq!(priority, 0);
                assert!(matches!(actions.as_slice(), [ActionWire::ToController]));
            }
            _ => panic!("expected flow mod"),
        }
    }
}
