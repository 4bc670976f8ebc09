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

//! Legacy-pcap reader yielding raw link-layer frames, adapted from the
//! teacher crate's `PcapReader2`. Unlike the teacher's version, read
//! failures are surfaced as `Result`s rather than panics, so a corrupt
//! capture fails the run cleanly instead of aborting the process.

use failure::{format_err, Error};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::Linktype;
use std::convert::TryInto;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

pub struct PcapReader<R> {
    reader: Box<dyn PcapReaderIterator<R>>,
    network: Linktype,
}

impl PcapReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        PcapReader::from_reader(BufReader::new(file))
    }
}

impl<R: 'static> PcapReader<R>
where
    R: Read,
{
    pub fn from_reader(rdr: R) -> Result<Self, Error> {
        let mut reader = pcap_parser::create_reader(2 << 20, rdr)?;
        match reader.next() {
            Ok((offset, pcap_parser::PcapBlockOwned::LegacyHeader(header))) => {
                reader.consume(offset);
                Ok(Self {
                    reader,
                    network: header.network,
                })
            }
            Ok(_) => Err(format_err!("capture does not start with a legacy pcap global header")),
            Err(e) => Err(format_err!("failed to read pcap global header: {:?}", e)),
        }
    }
}

impl<R: 'static> Iterator for PcapReader<R>
where
    R: Read,
{
    type Item = Result<Vec<u8>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    use pcap_parser::PcapBlockOwned::*;
                    match block {
                        Legacy(block) => {
                            let data = match pcap_parser::data::get_packetdata(
                                block.data,
                                self.network,
                                block.caplen.try_into().unwrap_or(0),
                            ) {
                                Some(pcap_parser::data::PacketData::L2(data)) => data.to_vec(),
                                _ => Vec::new(),
                            };
                            self.reader.consume(offset);
                            return Some(Ok(data));
                        }
                        NG(_block) => {
                            self.reader.consume(offset);
                        }
                        LegacyHeader(_header) => {
                            self.reader.consume(offset);
                        }
                    }
                }
                Err(pcap_parser::PcapError::Eof) => return None,
                Err(pcap_parser::PcapError::Incomplete) => {
                    if let Err(e) = self.reader.refill() {
                        return Some(Err(format_err!("failed to refill pcap buffer: {:?}", e)));
                    }
                }
                Err(e) => return Some(Err(format_err!("error reading pcap record: {:?}", e))),
            }
        }
    }
}
