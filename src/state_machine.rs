// Copyright 2018 Steven Sheffey
// This file is part of packet_captor_sakura.
//
// packet_captor_sakura is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// packet_captor_sakura is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with packet_captor_sakura.  If not, see <https:// www.gnu.org/licenses/>.

//! The per-flow connection state machine. See `SPEC_FULL.md` §4.3.

use crate::flow::{ConnState, Direction, Flow, FlowKey};
use crate::flow_table::{FlowTable, PacketTuple};
use crate::parser::{ParsedHeader, PacketType};
use crate::reassembler::{self, AddSegmentOutcome};
use crate::sink::EventSink;
use log::{debug, warn};
use std::net::IpAddr;

/// Running totals for the end-of-capture summary. Pending-packet and
/// pending-fragment counts are derived separately by the `Tracer` once the
/// capture is exhausted.
#[derive(Debug, Default)]
pub struct Stats {
    pub flows_added: u64,
    pub flows_closed: u64,
    pub segments_delivered: u64,
    pub total_bytes: u64,
}

/// Entry point for one parsed uTP packet riding on a UDP datagram.
///
/// Looks the packet up against `table` (§4.2's asymmetric rule), then
/// dispatches on `(state, type, direction)` per §4.3. `flow_exists = false`
/// is handled here directly (only a SYN is a recognized transition from
/// `INIT`); everything else is delegated to `apply_transition`.
pub fn dispatch(
    table: &mut FlowTable,
    sink: &mut dyn EventSink,
    stats: &mut Stats,
    src_ip: IpAddr,
    src_port: u16,
    dst_ip: IpAddr,
    dst_port: u16,
    header: &ParsedHeader<'_>,
) {
    let tuple = PacketTuple {
        src_ip,
        src_port,
        dst_ip,
        dst_port,
        packet_type: header.packet_type,
        connid: header.connid,
    };

    match table.lookup(&tuple) {
        None => {
            if header.packet_type == PacketType::Syn {
                create_flow_from_syn(table, sink, stats, src_ip, src_port, dst_ip, dst_port, header);
            } else {
                debug!(
                    "unknown transition: no flow for type {:?} connid {}",
                    header.packet_type, header.connid
                );
            }
        }
        Some((key, direction)) => {
            let state = match table.get_mut(&key) {
                Some(flow) => flow.state,
                None => return,
            };
            apply_transition(table, sink, stats, key, state, direction, header);
        }
    }
}

/// Groups the seven "half-closed or fully-closed-but-draining" states that
/// share the blanket DATA and SYN rows at the bottom of §4.3's table.
fn is_fin_like(state: ConnState) -> bool {
    matches!(
        state,
        ConnState::InitiatorSentFin
            | ConnState::AccepterSentFin
            | ConnState::InitiatorFinAcked
            | ConnState::AccepterFinAcked
            | ConnState::BothSentFin
            | ConnState::BothSentFinInitiatorAcked
            | ConnState::BothSentFinAccepterAcked
    )
}

fn apply_transition(
    table: &mut FlowTable,
    sink: &mut dyn EventSink,
    stats: &mut Stats,
    key: FlowKey,
    state: ConnState,
    direction: Direction,
    header: &ParsedHeader<'_>,
) {
    let i_to_a = direction == Direction::InitiatorToAccepter;

    match (state, header.packet_type) {
        (ConnState::Handshake, PacketType::State) => {
            if i_to_a {
                warn!("STATE in HANDSHAKE from initiator; ignoring");
            } else if let Some(flow) = table.get_mut(&key) {
                flow.seq1 = header.seq;
                flow.state = ConnState::SynAcked;
            }
        }
        (ConnState::Handshake, PacketType::Syn) => {
            if i_to_a {
                debug!("duplicate SYN from initiator; ignoring");
            } else {
                warn!("simultaneous open: supplanting flow with connid {}", key.connid);
                close_flow(table, sink, stats, &key);
                create_flow_from_syn(
                    table,
                    sink,
                    stats,
                    key.accepter_ip,
                    key.accepter_port,
                    key.initiator_ip,
                    key.initiator_port,
                    header,
                );
            }
        }

        (ConnState::SynAcked, PacketType::Fin) => {
            let next = if i_to_a {
                ConnState::InitiatorSentFin
            } else {
                ConnState::AccepterSentFin
            };
            set_state(table, &key, next);
        }
        (ConnState::SynAcked, PacketType::Data) | (ConnState::Connected, PacketType::Data) => {
            handle_data(table, sink, stats, key, direction, header, false);
            if let Some(flow) = table.get_mut(&key) {
                if flow.state == ConnState::SynAcked {
                    flow.state = ConnState::Connected;
                }
            }
        }

        (ConnState::Connected, PacketType::State) => {}
        (ConnState::Connected, PacketType::Reset) => {
            close_flow(table, sink, stats, &key);
        }
        (ConnState::Connected, PacketType::Fin) => {
            let next = if i_to_a {
                ConnState::InitiatorSentFin
            } else {
                ConnState::AccepterSentFin
            };
            set_state(table, &key, next);
        }

        (ConnState::InitiatorSentFin, PacketType::State) => {
            set_state(table, &key, ConnState::InitiatorFinAcked);
        }
        (ConnState::AccepterSentFin, PacketType::State) => {
            if !i_to_a {
                set_state(table, &key, ConnState::AccepterFinAcked);
            }
        }
        (ConnState::InitiatorFinAcked, PacketType::Fin) => {
            // The initiator's own FIN is already acked; this row fires on
            // the accepter's (still-outstanding) FIN, which travels A->I.
            if !i_to_a {
                set_state(table, &key, ConnState::BothSentFinInitiatorAcked);
            }
        }
        (ConnState::AccepterFinAcked, PacketType::Fin) => {
            // Symmetric case: waiting on the initiator's FIN, I->A.
            if i_to_a {
                set_state(table, &key, ConnState::BothSentFinAccepterAcked);
            }
        }
        (ConnState::InitiatorSentFin, PacketType::Fin) => {
            if !i_to_a {
                set_state(table, &key, ConnState::BothSentFin);
            }
        }
        (ConnState::AccepterSentFin, PacketType::Fin) => {
            if i_to_a {
                set_state(table, &key, ConnState::BothSentFin);
            }
        }
        (ConnState::BothSentFin, PacketType::State) => {
            let next = if i_to_a {
                ConnState::BothSentFinInitiatorAcked
            } else {
                ConnState::BothSentFinAccepterAcked
            };
            set_state(table, &key, next);
        }
        (ConnState::BothSentFinInitiatorAcked, PacketType::State) => {
            // Initiator's FIN already acked; the closing ack is the
            // initiator acking the accepter's FIN, I->A.
            if i_to_a {
                close_if_drained(table, sink, stats, key);
            }
        }
        (ConnState::BothSentFinAccepterAcked, PacketType::State) => {
            // Symmetric case: accepter acking the initiator's FIN, A->I.
            if !i_to_a {
                close_if_drained(table, sink, stats, key);
            }
        }

        (ConnState::PendingClose, PacketType::Data) => {
            handle_data(table, sink, stats, key, direction, header, true);
        }

        (state, PacketType::Data) if is_fin_like(state) => {
            handle_data(table, sink, stats, key, direction, header, false);
        }
        (state, PacketType::Syn) if is_fin_like(state) => {
            close_flow(table, sink, stats, &key);
            let (src_ip, src_port, dst_ip, dst_port) = if i_to_a {
                (key.initiator_ip, key.initiator_port, key.accepter_ip, key.accepter_port)
            } else {
                (key.accepter_ip, key.accepter_port, key.initiator_ip, key.initiator_port)
            };
            create_flow_from_syn(table, sink, stats, src_ip, src_port, dst_ip, dst_port, header);
        }

        _ => {
            debug!(
                "unknown transition: state {:?}, type {:?}, connid {}",
                state, header.packet_type, key.connid
            );
        }
    }
}

fn set_state(table: &mut FlowTable, key: &FlowKey, new_state: ConnState) {
    if let Some(flow) = table.get_mut(key) {
        flow.state = new_state;
    }
}

fn close_flow(table: &mut FlowTable, sink: &mut dyn EventSink, stats: &mut Stats, key: &FlowKey) {
    if table.remove(key).is_some() {
        sink.flow_closed(key);
        stats.flows_closed += 1;
    }
}

fn close_if_drained(table: &mut FlowTable, sink: &mut dyn EventSink, stats: &mut Stats, key: FlowKey) {
    let pending_empty = table.get_mut(&key).map(|flow| flow.is_pending_empty()).unwrap_or(true);
    if pending_empty {
        close_flow(table, sink, stats, &key);
    } else {
        set_state(table, &key, ConnState::PendingClose);
    }
}

fn handle_data(
    table: &mut FlowTable,
    sink: &mut dyn EventSink,
    stats: &mut Stats,
    key: FlowKey,
    direction: Direction,
    header: &ParsedHeader<'_>,
    close_when_drained: bool,
) {
    let outcome = match table.get_mut(&key) {
        Some(flow) => reassembler::add_segment(flow, direction, header.seq, header.body),
        None => return,
    };

    match outcome {
        AddSegmentOutcome::Delivered(payloads) => {
            for payload in &payloads {
                stats.segments_delivered += 1;
                stats.total_bytes += payload.len() as u64;
                sink.new_segment(&key, direction, payload);
            }
            if close_when_drained {
                let pending_empty = table.get_mut(&key).map(|flow| flow.is_pending_empty()).unwrap_or(true);
                if pending_empty {
                    close_flow(table, sink, stats, &key);
                }
            }
        }
        AddSegmentOutcome::PendingOverflow => {
            close_flow(table, sink, stats, &key);
        }
        AddSegmentOutcome::Buffered | AddSegmentOutcome::Duplicate => {}
    }
}

fn create_flow_from_syn(
    table: &mut FlowTable,
    sink: &mut dyn EventSink,
    stats: &mut Stats,
    src_ip: IpAddr,
    src_port: u16,
    dst_ip: IpAddr,
    dst_port: u16,
    header: &ParsedHeader<'_>,
) {
    let key = FlowKey {
        initiator_ip: src_ip,
        initiator_port: src_port,
        accepter_ip: dst_ip,
        accepter_port: dst_port,
        connid: header.connid,
    };
    table.insert(Flow::new_from_syn(key, header.seq));
    sink.new_flow(&key);
    stats.flows_added += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::net::Ipv4Addr;
    use std::rc::Rc;

    #[derive(Default, Clone)]
    struct RecordingSink {
        events: Rc<RefCell<Vec<String>>>,
    }

    impl EventSink for RecordingSink {
        fn new_flow(&mut self, key: &FlowKey) {
            self.events.borrow_mut().push(format!("new_flow({})", key.connid));
        }
        fn new_segment(&mut self, key: &FlowKey, direction: Direction, data: &[u8]) {
            self.events.borrow_mut().push(format!(
                "new_segment({}, {:?}, {:?})",
                key.connid,
                direction,
                String::from_utf8_lossy(data)
            ));
        }
        fn flow_closed(&mut self, key: &FlowKey) {
            self.events.borrow_mut().push(format!("flow_closed({})", key.connid));
        }
        fn finish(&mut self) {}
    }

    fn addr(last_octet: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet))
    }

    fn header(packet_type: PacketType, connid: u16, seq: u16, body: &'static [u8]) -> ParsedHeader<'static> {
        ParsedHeader {
            packet_type,
            connid,
            seq: seq.into(),
            body,
        }
    }

    #[test]
    fn test_clean_handshake_two_segments_and_close() {
        let mut table = FlowTable::new();
        let mut sink = RecordingSink::default();
        let mut stats = Stats::default();
        let a = addr(1);
        let b = addr(2);

        dispatch(&mut table, &mut sink, &mut stats, a, 1111, b, 2222, &header(PacketType::Syn, 7, 100, b""));
        dispatch(&mut table, &mut sink, &mut stats, b, 2222, a, 1111, &header(PacketType::State, 7, 500, b""));
        dispatch(&mut table, &mut sink, &mut stats, a, 1111, b, 2222, &header(PacketType::Data, 8, 101, b"hello"));
        dispatch(&mut table, &mut sink, &mut stats, a, 1111, b, 2222, &header(PacketType::Data, 8, 102, b"world"));
        dispatch(&mut table, &mut sink, &mut stats, a, 1111, b, 2222, &header(PacketType::Fin, 8, 103, b""));
        dispatch(&mut table, &mut sink, &mut stats, b, 2222, a, 1111, &header(PacketType::State, 7, 501, b""));
        dispatch(&mut table, &mut sink, &mut stats, b, 2222, a, 1111, &header(PacketType::Fin, 7, 502, b""));
        dispatch(&mut table, &mut sink, &mut stats, a, 1111, b, 2222, &header(PacketType::State, 8, 104, b""));

        let events = sink.events.borrow();
        assert_eq!(events[0], "new_flow(7)");
        assert!(events.contains(&"new_segment(7, InitiatorToAccepter, \"hello\")".to_string()));
        assert!(events.contains(&"new_segment(7, InitiatorToAccepter, \"world\")".to_string()));
        assert!(events.iter().any(|e| e == "flow_closed(7)"));
        assert_eq!(stats.flows_added, 1);
        assert_eq!(stats.flows_closed, 1);
        assert_eq!(stats.segments_delivered, 2);
        assert!(table.is_empty());
    }

    #[test]
    fn test_reset_closes_connected_flow() {
        let mut table = FlowTable::new();
        let mut sink = RecordingSink::default();
        let mut stats = Stats::default();
        let a = addr(1);
        let b = addr(2);

        dispatch(&mut table, &mut sink, &mut stats, a, 1111, b, 2222, &header(PacketType::Syn, 7, 100, b""));
        dispatch(&mut table, &mut sink, &mut stats, b, 2222, a, 1111, &header(PacketType::State, 7, 500, b""));
        dispatch(&mut table, &mut sink, &mut stats, a, 1111, b, 2222, &header(PacketType::Data, 8, 101, b"x"));
        dispatch(&mut table, &mut sink, &mut stats, b, 2222, a, 1111, &header(PacketType::Reset, 7, 501, b""));

        assert!(table.is_empty());
        assert_eq!(stats.flows_closed, 1);
    }

    #[test]
    fn test_supplanting_syn() {
        let mut table = FlowTable::new();
        let mut sink = RecordingSink::default();
        let mut stats = Stats::default();
        let a = addr(1);
        let b = addr(2);

        dispatch(&mut table, &mut sink, &mut stats, a, 1111, b, 2222, &header(PacketType::Syn, 7, 100, b""));
        // B sends its own SYN back before acking A's: simultaneous open.
        dispatch(&mut table, &mut sink, &mut stats, b, 2222, a, 1111, &header(PacketType::Syn, 9, 200, b""));

        assert_eq!(stats.flows_added, 2);
        assert_eq!(stats.flows_closed, 1);
        assert_eq!(table.len(), 1);
        let events = sink.events.borrow();
        assert_eq!(events[0], "new_flow(7)");
        assert_eq!(events[1], "flow_closed(7)");
        assert_eq!(events[2], "new_flow(9)");
    }

    #[test]
    fn test_unknown_transition_leaves_state_untouched() {
        let mut table = FlowTable::new();
        let mut sink = RecordingSink::default();
        let mut stats = Stats::default();
        let a = addr(1);
        let b = addr(2);

        dispatch(&mut table, &mut sink, &mut stats, a, 1111, b, 2222, &header(PacketType::Syn, 7, 100, b""));
        // RESET in HANDSHAKE has no registered transition.
        dispatch(&mut table, &mut sink, &mut stats, b, 2222, a, 1111, &header(PacketType::Reset, 7, 500, b""));

        assert_eq!(table.len(), 1);
        assert_eq!(stats.flows_closed, 0);
    }
}
