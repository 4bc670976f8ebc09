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

//! Crate-wide error types for the driver (not the core, which never
//! surfaces per-packet failures -- see `SPEC_FULL.md` §7).

use failure::Fail;

#[derive(Debug, Fail)]
pub enum LinkLayerError {
    #[fail(display = "failed to parse ethernet header")]
    InvalidEthernetHeader,
    #[fail(display = "failed to parse IPv4 header")]
    InvalidIpv4Header,
    #[fail(display = "failed to parse IPv6 header")]
    InvalidIpv6Header,
    #[fail(display = "unsupported ethertype, not IPv4 or IPv6")]
    UnsupportedEthertype,
    #[fail(display = "failed to parse UDP header")]
    InvalidUdpHeader,
    #[fail(display = "not a UDP datagram")]
    NotUdp,
}

#[derive(Debug, Fail)]
pub enum SinkError {
    #[fail(display = "failed to open stream file {:?}: {}", path, source)]
    OpenFailed {
        path: std::path::PathBuf,
        #[fail(cause)]
        source: std::io::Error,
    },
    #[fail(display = "failed to write stream file {:?}: {}", path, source)]
    WriteFailed {
        path: std::path::PathBuf,
        #[fail(cause)]
        source: std::io::Error,
    },
}
