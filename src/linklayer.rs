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

//! Ethernet/IPv4/IPv6/UDP decoding, trimmed from the teacher's TCP+UDP
//! decoder down to UDP only.

use crate::error::LinkLayerError;
use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::ipv6::Ipv6Packet;
use pnet_packet::udp::UdpPacket;
use pnet_packet::FromPacket;
use std::net::IpAddr;

/// An IPv4 datagram, possibly a fragment. `fragment_offset` is in bytes
/// (already converted from the wire's 8-byte units).
#[derive(Debug, Clone)]
pub struct DecodedIpv4 {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub identification: u16,
    pub more_fragments: bool,
    pub fragment_offset: u16,
    pub protocol: IpNextHeaderProtocol,
    pub payload: Vec<u8>,
}

/// The result of decoding one link-layer frame down to its IP layer.
#[derive(Debug)]
pub enum DecodedFrame {
    Ipv4(DecodedIpv4),
    Ipv6 {
        src_ip: IpAddr,
        dst_ip: IpAddr,
        protocol: IpNextHeaderProtocol,
        payload: Vec<u8>,
    },
}

/// Decodes one captured frame's Ethernet header and, below it, its IPv4 or
/// IPv6 header. Does not look past the IP layer: IPv4 fragments are handed
/// back uninterpreted so the caller can run them through a fragment
/// tracker before attempting transport-layer decode.
pub fn decode_frame(frame: &[u8]) -> Result<DecodedFrame, LinkLayerError> {
    let ethernet = EthernetPacket::new(frame).ok_or(LinkLayerError::InvalidEthernetHeader)?;

    match ethernet.get_ethertype() {
        EtherTypes::Ipv4 => {
            let ipv4 = Ipv4Packet::owned(ethernet.payload().to_vec())
                .ok_or(LinkLayerError::InvalidIpv4Header)?;
            let header = ipv4.from_packet();
            Ok(DecodedFrame::Ipv4(DecodedIpv4 {
                src_ip: IpAddr::V4(header.source),
                dst_ip: IpAddr::V4(header.destination),
                identification: header.identification,
                more_fragments: header.flags & 0x1 != 0,
                fragment_offset: header.fragment_offset * 8,
                protocol: header.next_level_protocol,
                payload: header.payload,
            }))
        }
        EtherTypes::Ipv6 => {
            let ipv6 = Ipv6Packet::owned(ethernet.payload().to_vec())
                .ok_or(LinkLayerError::InvalidIpv6Header)?;
            let header = ipv6.from_packet();
            Ok(DecodedFrame::Ipv6 {
                src_ip: IpAddr::V6(header.source),
                dst_ip: IpAddr::V6(header.destination),
                protocol: header.next_header,
                payload: header.payload,
            })
        }
        _ => Err(LinkLayerError::UnsupportedEthertype),
    }
}

/// Decodes a UDP header out of an IP payload, returning the source and
/// destination ports plus the application-layer body.
pub fn decode_udp(protocol: IpNextHeaderProtocol, payload: &[u8]) -> Result<(u16, u16, Vec<u8>), LinkLayerError> {
    if protocol != IpNextHeaderProtocols::Udp {
        return Err(LinkLayerError::NotUdp);
    }
    let udp = UdpPacket::owned(payload.to_vec()).ok_or(LinkLayerError::InvalidUdpHeader)?;
    let header = udp.from_packet();
    Ok((header.source, header.destination, header.payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_truncated_ethernet_frame() {
        assert!(decode_frame(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_decode_udp_rejects_non_udp() {
        let result = decode_udp(IpNextHeaderProtocols::Tcp, &[0u8; 20]);
        assert!(matches!(result, Err(LinkLayerError::NotUdp)));
    }

    #[test]
    fn test_decode_udp_rejects_short_payload() {
        let result = decode_udp(IpNextHeaderProtocols::Udp, &[0u8; 4]);
        assert!(matches!(result, Err(LinkLayerError::InvalidUdpHeader)));
    }
}
