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

//! Passive reconstruction of uTP application byte streams from an offline
//! packet capture.

pub mod error;
pub mod flow;
pub mod flow_table;
pub mod fragments;
pub mod linklayer;
pub mod parser;
pub mod pcap;
pub mod reassembler;
pub mod serial;
pub mod sink;
pub mod state_machine;
pub mod tracer;

pub use sink::{EventSink, FileSink};
pub use tracer::{Summary, Tracer};
