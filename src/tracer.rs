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

//! Wires the driver-level decoders to the reconstruction core and owns the
//! end-of-capture summary counters, grounded in the reference tracer's
//! `MyUtpTracer` (`original_source/utptrace.py`).

use crate::flow_table::FlowTable;
use crate::fragments::FragmentTracker;
use crate::linklayer::{self, DecodedFrame};
use crate::parser;
use crate::sink::EventSink;
use crate::state_machine::{self, Stats};
use log::debug;
use pnet_packet::ip::IpNextHeaderProtocol;
use std::fmt;
use std::net::IpAddr;

pub struct Tracer<S> {
    table: FlowTable,
    sink: S,
    stats: Stats,
    fragments: FragmentTracker,
}

/// End-of-capture counters, printed by the CLI driver in this exact order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Summary {
    pub flows_added: u64,
    pub flows_closed: u64,
    pub flows_remaining: u64,
    pub segments_delivered: u64,
    pub total_bytes: u64,
    pub pending_packets: u64,
    pub pending_fragments: u64,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Added flows: {}", self.flows_added)?;
        writeln!(f, "Closed flows: {}", self.flows_closed)?;
        writeln!(f, "Remaining flows: {}", self.flows_remaining)?;
        writeln!(f, "Segments arrived: {}", self.segments_delivered)?;
        writeln!(f, "Total bytes: {}", self.total_bytes)?;
        writeln!(f, "Pending packets: {}", self.pending_packets)?;
        write!(f, "Pending IPv4 fragments: {}", self.pending_fragments)
    }
}

impl<S: EventSink> Tracer<S> {
    pub fn new(sink: S) -> Self {
        Tracer {
            table: FlowTable::new(),
            sink,
            stats: Stats::default(),
            fragments: FragmentTracker::new(),
        }
    }

    /// Feeds one captured link-layer frame through decode, IPv4
    /// defragmentation, UDP decode, uTP header parsing, and finally the
    /// state machine. Any failure at any stage is a silent drop (this is
    /// offline traffic analysis, not a protocol implementation that must
    /// reject malformed input loudly).
    pub fn handle_frame(&mut self, frame: &[u8]) {
        let decoded = match linklayer::decode_frame(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("dropping frame: {}", e);
                return;
            }
        };

        match decoded {
            DecodedFrame::Ipv4(datagram) => {
                if let Some((src_ip, dst_ip, protocol, payload)) = self.fragments.accept(datagram) {
                    self.handle_ip_payload(src_ip, dst_ip, protocol, &payload);
                }
            }
            DecodedFrame::Ipv6 {
                src_ip,
                dst_ip,
                protocol,
                payload,
            } => {
                self.handle_ip_payload(src_ip, dst_ip, protocol, &payload);
            }
        }
    }

    fn handle_ip_payload(&mut self, src_ip: IpAddr, dst_ip: IpAddr, protocol: IpNextHeaderProtocol, payload: &[u8]) {
        let (src_port, dst_port, body) = match linklayer::decode_udp(protocol, payload) {
            Ok(decoded) => decoded,
            Err(_) => return,
        };
        let header = match parser::parse(&body) {
            Some(header) => header,
            None => return,
        };
        state_machine::dispatch(
            &mut self.table,
            &mut self.sink,
            &mut self.stats,
            src_ip,
            src_port,
            dst_ip,
            dst_port,
            &header,
        );
    }

    /// Flushes the sink's file buffers (but does not run the close
    /// procedure on flows still open in the table, matching the
    /// reference's `atexit`-flush-without-close behavior) and returns the
    /// final summary counters.
    pub fn finish(mut self) -> Summary {
        let pending_packets: u64 = self.table.values().map(|flow| flow.pending_len() as u64).sum();
        let flows_remaining = self.table.len() as u64;
        self.sink.finish();
        Summary {
            flows_added: self.stats.flows_added,
            flows_closed: self.stats.flows_closed,
            flows_remaining,
            segments_delivered: self.stats.segments_delivered,
            total_bytes: self.stats.total_bytes,
            pending_packets,
            pending_fragments: self.fragments.pending_count() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Direction, FlowKey};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default, Clone)]
    struct CountingSink {
        flows: Rc<RefCell<u64>>,
    }
    impl EventSink for CountingSink {
        fn new_flow(&mut self, _key: &FlowKey) {
            *self.flows.borrow_mut() += 1;
        }
        fn new_segment(&mut self, _key: &FlowKey, _direction: Direction, _data: &[u8]) {}
        fn flow_closed(&mut self, _key: &FlowKey) {}
        fn finish(&mut self) {}
    }

    #[test]
    fn test_garbage_frame_does_not_panic() {
        let mut tracer = Tracer::new(CountingSink::default());
        tracer.handle_frame(&[0u8; 3]);
        let summary = tracer.finish();
        assert_eq!(summary.flows_added, 0);
    }
}
