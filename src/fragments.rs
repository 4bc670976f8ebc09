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

//! Best-effort IPv4 fragment reassembly, grounded in the reference
//! tracer's own `fragments` list (`original_source/utptrace.py`,
//! `trace_pcap`). Out of the core's scope, but needed to run the CLI
//! end-to-end and to populate the "pending IP fragments" summary line.

use crate::linklayer::DecodedIpv4;
use pnet_packet::ip::IpNextHeaderProtocol;
use std::collections::HashMap;
use std::net::IpAddr;

type GroupKey = (IpAddr, IpAddr, u16);

#[derive(Default)]
pub struct FragmentTracker {
    groups: HashMap<GroupKey, Vec<DecodedIpv4>>,
}

impl FragmentTracker {
    pub fn new() -> Self {
        FragmentTracker {
            groups: HashMap::new(),
        }
    }

    /// Feeds one IPv4 datagram through the tracker. Datagrams that are not
    /// fragments pass straight through. Fragments are held until the whole
    /// run for their `(src, dst, identification)` group is present and
    /// contiguous from offset 0 to the final fragment (`more_fragments ==
    /// false`), at which point the reassembled payload is returned.
    pub fn accept(
        &mut self,
        datagram: DecodedIpv4,
    ) -> Option<(IpAddr, IpAddr, IpNextHeaderProtocol, Vec<u8>)> {
        if datagram.fragment_offset == 0 && !datagram.more_fragments {
            return Some((datagram.src_ip, datagram.dst_ip, datagram.protocol, datagram.payload));
        }

        let key = (datagram.src_ip, datagram.dst_ip, datagram.identification);
        let group = self.groups.entry(key).or_insert_with(Vec::new);
        group.push(datagram);
        group.sort_by_key(|f| f.fragment_offset);

        if !is_complete(group) {
            return None;
        }

        let group = self.groups.remove(&key).expect("just inserted");
        let src_ip = group[0].src_ip;
        let dst_ip = group[0].dst_ip;
        let protocol = group[0].protocol;
        let mut payload = Vec::new();
        for fragment in group {
            payload.extend_from_slice(&fragment.payload);
        }
        Some((src_ip, dst_ip, protocol, payload))
    }

    /// Number of fragments currently retained awaiting completion, across
    /// all groups -- reported as the "pending IP fragments" summary line.
    pub fn pending_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

fn is_complete(fragments: &[DecodedIpv4]) -> bool {
    if fragments.is_empty() || fragments[0].fragment_offset != 0 {
        return false;
    }
    if fragments.last().map(|f| f.more_fragments).unwrap_or(true) {
        return false;
    }
    let mut expected_offset = 0u16;
    for fragment in fragments {
        if fragment.fragment_offset != expected_offset {
            return false;
        }
        expected_offset = expected_offset.saturating_add(fragment.payload.len() as u16);
    }
    true
}
