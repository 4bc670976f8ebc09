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

//! In-order byte stream reassembly from out-of-order DATA packets.
//! See `SPEC_FULL.md` §4.4.

use crate::flow::{Direction, Flow, MAX_PENDING_SEGMENTS};
use crate::serial::Seq16;

/// What happened when a DATA segment was fed to a flow.
#[derive(Debug, PartialEq, Eq)]
pub enum AddSegmentOutcome {
    /// The segment (and zero or more now-contiguous pending segments) were
    /// delivered in order. Carries one entry per delivered payload, in
    /// ascending sequence order -- the segment just added first, then any
    /// pending segments it promoted.
    Delivered(Vec<Vec<u8>>),
    /// The segment arrived ahead of the expected sequence number and was
    /// buffered.
    Buffered,
    /// The segment's sequence number is behind the expected one -- a
    /// retransmission of data already delivered. Dropped.
    Duplicate,
    /// The flow's pending-segment buffer hit `MAX_PENDING_SEGMENTS`; the
    /// caller should flush and close the flow.
    PendingOverflow,
}

/// Adds a DATA segment arriving on `direction`, draining any pending
/// segments that become contiguous as a result.
///
/// Mirrors the reference tracer's `add_segment`: a segment at exactly the
/// expected sequence number is delivered immediately and the pending map is
/// then drained for as long as the next expected number is present in it.
/// A segment ahead of the expected number is parked in the pending map
/// keyed by its raw sequence number; a segment behind it is a duplicate and
/// dropped. Unlike the reference implementation's per-call rescan of an
/// unordered list, the pending map's ordering means promotion is a direct
/// key lookup rather than an O(n) scan.
pub fn add_segment(flow: &mut Flow, direction: Direction, seq: Seq16, body: &[u8]) -> AddSegmentOutcome {
    let expected = flow.expected_seq(direction);

    if seq == expected {
        let mut out = vec![body.to_vec()];
        flow.advance_expected_seq(direction);
        loop {
            let next = flow.expected_seq(direction);
            let pending = flow.pending_for(direction);
            match pending.remove(&next.0) {
                Some(buffered) => {
                    out.push(buffered);
                    flow.advance_expected_seq(direction);
                }
                None => break,
            }
        }
        return AddSegmentOutcome::Delivered(out);
    }

    if seq.serial_lt(expected) {
        return AddSegmentOutcome::Duplicate;
    }

    if flow.pending_len() >= MAX_PENDING_SEGMENTS {
        return AddSegmentOutcome::PendingOverflow;
    }

    flow.pending_for(direction).insert(seq.0, body.to_vec());
    AddSegmentOutcome::Buffered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowKey;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_flow() -> Flow {
        let key = FlowKey {
            initiator_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            initiator_port: 1111,
            accepter_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            accepter_port: 2222,
            connid: 5,
        };
        Flow::new_from_syn(key, Seq16::new(99))
    }

    #[test]
    fn test_in_order_delivery() {
        let mut flow = test_flow();
        let outcome = add_segment(&mut flow, Direction::InitiatorToAccepter, Seq16::new(100), b"abc");
        assert_eq!(outcome, AddSegmentOutcome::Delivered(vec![b"abc".to_vec()]));
        assert_eq!(flow.seq0, Seq16::new(101));
    }

    #[test]
    fn test_out_of_order_then_drain() {
        let mut flow = test_flow();
        // seq 101 arrives first: expected is 100, so it's buffered.
        let outcome = add_segment(&mut flow, Direction::InitiatorToAccepter, Seq16::new(101), b"second");
        assert_eq!(outcome, AddSegmentOutcome::Buffered);
        assert_eq!(flow.pending_len(), 1);

        // seq 100 then arrives, draining 101 along with it.
        let outcome = add_segment(&mut flow, Direction::InitiatorToAccepter, Seq16::new(100), b"first");
        assert_eq!(
            outcome,
            AddSegmentOutcome::Delivered(vec![b"first".to_vec(), b"second".to_vec()])
        );
        assert!(flow.is_pending_empty());
        assert_eq!(flow.seq0, Seq16::new(102));
    }

    #[test]
    fn test_multi_segment_drain() {
        let mut flow = test_flow();
        add_segment(&mut flow, Direction::InitiatorToAccepter, Seq16::new(102), b"c");
        add_segment(&mut flow, Direction::InitiatorToAccepter, Seq16::new(101), b"b");
        let outcome = add_segment(&mut flow, Direction::InitiatorToAccepter, Seq16::new(100), b"a");
        assert_eq!(
            outcome,
            AddSegmentOutcome::Delivered(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
        );
        assert!(flow.is_pending_empty());
    }

    #[test]
    fn test_duplicate_dropped() {
        let mut flow = test_flow();
        add_segment(&mut flow, Direction::InitiatorToAccepter, Seq16::new(100), b"a");
        let outcome = add_segment(&mut flow, Direction::InitiatorToAccepter, Seq16::new(100), b"a-again");
        assert_eq!(outcome, AddSegmentOutcome::Duplicate);
    }

    #[test]
    fn test_directions_are_independent() {
        let mut flow = test_flow();
        add_segment(&mut flow, Direction::InitiatorToAccepter, Seq16::new(100), b"i");
        let outcome = add_segment(&mut flow, Direction::AccepterToInitiator, Seq16::new(0), b"a");
        assert_eq!(outcome, AddSegmentOutcome::Delivered(vec![b"a".to_vec()]));
    }

    #[test]
    fn test_pending_overflow() {
        let mut flow = test_flow();
        for i in 0..MAX_PENDING_SEGMENTS {
            let seq = Seq16::new(100u16.wrapping_add(1 + i as u16));
            let outcome = add_segment(&mut flow, Direction::InitiatorToAccepter, seq, b"x");
            assert_eq!(outcome, AddSegmentOutcome::Buffered);
        }
        let seq = Seq16::new(100u16.wrapping_add(1 + MAX_PENDING_SEGMENTS as u16));
        let outcome = add_segment(&mut flow, Direction::InitiatorToAccepter, seq, b"overflow");
        assert_eq!(outcome, AddSegmentOutcome::PendingOverflow);
    }
}
