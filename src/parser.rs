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

//! Parses a uTP header out of a UDP payload. See `SPEC_FULL.md` §4.1.

use crate::serial::Seq16;
use byteorder::{BigEndian, ByteOrder};
use log::debug;

pub const HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Data = 0,
    Fin = 1,
    State = 2,
    Reset = 3,
    Syn = 4,
}

impl PacketType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketType::Data),
            1 => Some(PacketType::Fin),
            2 => Some(PacketType::State),
            3 => Some(PacketType::Reset),
            4 => Some(PacketType::Syn),
            _ => None,
        }
    }
}

/// A parsed uTP header plus a reference to the trailing application payload.
#[derive(Debug, Clone, Copy)]
pub struct ParsedHeader<'a> {
    pub packet_type: PacketType,
    pub connid: u16,
    pub seq: Seq16,
    pub body: &'a [u8],
}

/// Parses a uTP header out of a UDP payload, per `SPEC_FULL.md` §4.1.
///
/// Returns `None` (with a debug-level log) if `payload` is not a uTP
/// packet. This never surfaces an error to the caller: rejection is
/// silent, as the core is never meant to abort processing of a capture
/// because of one malformed datagram.
pub fn parse(payload: &[u8]) -> Option<ParsedHeader<'_>> {
    if payload.len() < HEADER_LEN {
        debug!(
            "payload smaller than {} bytes ({}); not a uTP packet",
            HEADER_LEN,
            payload.len()
        );
        return None;
    }

    let version = payload[0] & 0x0f;
    if version != 1 {
        debug!("invalid version {}; not a uTP packet", version);
        return None;
    }

    let raw_type = payload[0] >> 4;
    let packet_type = match PacketType::from_u8(raw_type) {
        Some(t) => t,
        None => {
            debug!("invalid type {}; not a uTP packet", raw_type);
            return None;
        }
    };

    // Walk the extension chain starting at offset HEADER_LEN.
    let mut extension = payload[1];
    let mut ext_cursor: usize = 0;
    while extension != 0 {
        if payload.len() < HEADER_LEN + ext_cursor + 2 {
            debug!("truncated extension chain; not a uTP packet");
            return None;
        }
        extension = payload[HEADER_LEN + ext_cursor];
        let length = payload[HEADER_LEN + ext_cursor + 1] as usize;
        ext_cursor += 2 + length;
        if payload.len() < HEADER_LEN + ext_cursor {
            debug!("extension length overruns payload; not a uTP packet");
            return None;
        }
    }

    let connid = BigEndian::read_u16(&payload[2..4]);
    let seq = Seq16::new(BigEndian::read_u16(&payload[16..18]));
    let body = &payload[HEADER_LEN + ext_cursor..];

    Some(ParsedHeader {
        packet_type,
        connid,
        seq,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal 20-byte header with no extensions.
    fn header(packet_type: u8, connid: u16, seq: u16) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = (packet_type << 4) | 1;
        buf[1] = 0; // no extension
        BigEndian::write_u16(&mut buf[2..4], connid);
        BigEndian::write_u16(&mut buf[16..18], seq);
        buf
    }

    #[test]
    fn test_rejects_short_payload() {
        assert!(parse(&[0u8; 19]).is_none());
    }

    #[test]
    fn test_rejects_bad_version() {
        let mut buf = header(PacketType::Data as u8, 1, 1);
        buf[0] = (buf[0] & 0xf0) | 2; // version 2
        assert!(parse(&buf).is_none());
    }

    #[test]
    fn test_rejects_bad_type() {
        let mut buf = header(0, 1, 1);
        buf[0] = (5 << 4) | 1; // type 5 is invalid
        assert!(parse(&buf).is_none());
    }

    #[test]
    fn test_parses_minimal_syn() {
        let buf = header(PacketType::Syn as u8, 7, 100);
        let parsed = parse(&buf).expect("should parse");
        assert_eq!(parsed.packet_type, PacketType::Syn);
        assert_eq!(parsed.connid, 7);
        assert_eq!(parsed.seq, Seq16::new(100));
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn test_parses_body_after_header() {
        let mut buf = header(PacketType::Data as u8, 8, 101);
        buf.extend_from_slice(b"hello");
        let parsed = parse(&buf).expect("should parse");
        assert_eq!(parsed.body, b"hello");
    }

    #[test]
    fn test_skips_single_extension() {
        let mut buf = header(PacketType::Data as u8, 8, 101);
        buf[1] = 1; // one extension follows
        // Extension record: next=0 (terminate), length=3
        buf.extend_from_slice(&[0, 3, 0xaa, 0xbb, 0xcc]);
        buf.extend_from_slice(b"payload");
        let parsed = parse(&buf).expect("should parse");
        assert_eq!(parsed.body, b"payload");
    }

    #[test]
    fn test_rejects_truncated_extension() {
        let mut buf = header(PacketType::Data as u8, 8, 101);
        buf[1] = 1; // claims an extension follows but nothing does
        assert!(parse(&buf).is_none());
    }

    #[test]
    fn test_chains_multiple_extensions() {
        let mut buf = header(PacketType::Data as u8, 8, 101);
        buf[1] = 2; // first extension type (arbitrary, just non-zero)
        // First ext: next=3, length=1, payload byte
        buf.extend_from_slice(&[3, 1, 0xff]);
        // Second ext: next=0 (terminate), length=2
        buf.extend_from_slice(&[0, 2, 0x01, 0x02]);
        buf.extend_from_slice(b"x");
        let parsed = parse(&buf).expect("should parse");
        assert_eq!(parsed.body, b"x");
    }
}
