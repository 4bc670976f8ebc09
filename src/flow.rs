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

//! The `Flow` data model. See `SPEC_FULL.md` §3.1 and §4.3.

use crate::serial::Seq16;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Which side of a flow a packet travelled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 0: initiator -> accepter
    InitiatorToAccepter,
    /// 1: accepter -> initiator
    AccepterToInitiator,
}

impl Direction {
    pub fn index(self) -> usize {
        match self {
            Direction::InitiatorToAccepter => 0,
            Direction::AccepterToInitiator => 1,
        }
    }
}

/// The 11 states a live `Flow` can be in. `INIT` (the absence of a flow)
/// is not a variant here -- see `state_machine.rs`, which treats "no flow"
/// as a distinct dispatch case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Handshake,
    SynAcked,
    Connected,
    InitiatorSentFin,
    AccepterSentFin,
    InitiatorFinAcked,
    AccepterFinAcked,
    BothSentFin,
    BothSentFinInitiatorAcked,
    BothSentFinAccepterAcked,
    PendingClose,
}

/// Uniquely identifies a `Flow` in the `FlowTable`: `SPEC_FULL.md` §3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub initiator_ip: IpAddr,
    pub initiator_port: u16,
    pub accepter_ip: IpAddr,
    pub accepter_port: u16,
    pub connid: u16,
}

/// Maximum number of out-of-order segments (summed across both directions)
/// a flow may hold before it is flush-and-closed. `SPEC_FULL.md` §4.4.
pub const MAX_PENDING_SEGMENTS: usize = 4096;

/// One observed uTP connection.
#[derive(Debug)]
pub struct Flow {
    pub key: FlowKey,
    pub state: ConnState,
    /// Next expected sequence number from the initiator.
    pub seq0: Seq16,
    /// Next expected sequence number from the accepter.
    pub seq1: Seq16,
    /// Out-of-order DATA buffer, one ordered map per direction, keyed by
    /// the packet's raw sequence number.
    pending: [BTreeMap<u16, Vec<u8>>; 2],
}

impl Flow {
    /// Creates a new flow as observed from a SYN: `seq0` starts at
    /// `syn_seq + 1` (the initiator's first DATA/FIN will carry that
    /// sequence number); `seq1` is unknown until the accepter's STATE.
    pub fn new_from_syn(key: FlowKey, syn_seq: Seq16) -> Self {
        Flow {
            key,
            state: ConnState::Handshake,
            seq0: syn_seq.next(),
            seq1: Seq16::new(0),
            pending: [BTreeMap::new(), BTreeMap::new()],
        }
    }

    pub fn initiator_ip(&self) -> IpAddr {
        self.key.initiator_ip
    }

    pub fn initiator_port(&self) -> u16 {
        self.key.initiator_port
    }

    pub fn accepter_ip(&self) -> IpAddr {
        self.key.accepter_ip
    }

    pub fn accepter_port(&self) -> u16 {
        self.key.accepter_port
    }

    pub fn connid(&self) -> u16 {
        self.key.connid
    }

    /// Next expected sequence number for `direction`.
    pub fn expected_seq(&self, direction: Direction) -> Seq16 {
        match direction {
            Direction::InitiatorToAccepter => self.seq0,
            Direction::AccepterToInitiator => self.seq1,
        }
    }

    pub fn advance_expected_seq(&mut self, direction: Direction) {
        match direction {
            Direction::InitiatorToAccepter => self.seq0 = self.seq0.next(),
            Direction::AccepterToInitiator => self.seq1 = self.seq1.next(),
        }
    }

    pub fn pending_for(&mut self, direction: Direction) -> &mut BTreeMap<u16, Vec<u8>> {
        &mut self.pending[direction.index()]
    }

    /// Total number of out-of-order segments buffered, across both directions.
    pub fn pending_len(&self) -> usize {
        self.pending[0].len() + self.pending[1].len()
    }

    pub fn is_pending_empty(&self) -> bool {
        self.pending_len() == 0
    }
}
