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

//! Maps five-tuples to live `Flow`s, with the asymmetric `connid` lookup
//! rule of `SPEC_FULL.md` §4.2.

use crate::flow::{Direction, Flow, FlowKey};
use crate::parser::PacketType;
use std::collections::HashMap;
use std::net::IpAddr;

/// The raw endpoint/connid tuple of an incoming packet, prior to knowing
/// which side is the flow's initiator.
#[derive(Debug, Clone, Copy)]
pub struct PacketTuple {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub packet_type: PacketType,
    pub connid: u16,
}

#[derive(Default)]
pub struct FlowTable {
    flows: HashMap<FlowKey, Flow>,
}

impl FlowTable {
    pub fn new() -> Self {
        FlowTable {
            flows: HashMap::new(),
        }
    }

    /// The asymmetric lookup rule of `SPEC_FULL.md` §4.2: tries the
    /// packet's source as initiator first (using the direction-adjusted
    /// `connid`), then its destination as initiator.
    ///
    /// Returns the matching flow's key (not a borrow of the flow itself),
    /// so callers are free to also `remove`/`insert` in the same table
    /// without fighting the borrow checker; look the flow back up with
    /// `get_mut` once the key is known.
    pub fn lookup(&self, pkt: &PacketTuple) -> Option<(FlowKey, Direction)> {
        let k = if pkt.packet_type == PacketType::Syn {
            pkt.connid
        } else {
            pkt.connid.wrapping_sub(1)
        };

        let as_initiator_key = FlowKey {
            initiator_ip: pkt.src_ip,
            initiator_port: pkt.src_port,
            accepter_ip: pkt.dst_ip,
            accepter_port: pkt.dst_port,
            connid: k,
        };
        if self.flows.contains_key(&as_initiator_key) {
            return Some((as_initiator_key, Direction::InitiatorToAccepter));
        }

        let as_accepter_key = FlowKey {
            initiator_ip: pkt.dst_ip,
            initiator_port: pkt.dst_port,
            accepter_ip: pkt.src_ip,
            accepter_port: pkt.src_port,
            connid: pkt.connid,
        };
        if self.flows.contains_key(&as_accepter_key) {
            return Some((as_accepter_key, Direction::AccepterToInitiator));
        }
        None
    }

    pub fn get_mut(&mut self, key: &FlowKey) -> Option<&mut Flow> {
        self.flows.get_mut(key)
    }

    pub fn insert(&mut self, flow: Flow) {
        let key = flow.key;
        self.flows.insert(key, flow);
    }

    pub fn remove(&mut self, key: &FlowKey) -> Option<Flow> {
        self.flows.remove(key)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    pub fn into_values(self) -> impl Iterator<Item = Flow> {
        self.flows.into_iter().map(|(_, flow)| flow)
    }
}
