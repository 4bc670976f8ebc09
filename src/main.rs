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

use clap::{crate_authors, crate_description, crate_name, crate_version, App, Arg};
use failure::{format_err, Error};
use log::{error, info};
use std::path::Path;
use std::process;

use utptrace::pcap::PcapReader;
use utptrace::sink::FileSink;
use utptrace::tracer::Tracer;

fn run() -> Result<(), Error> {
    drop(env_logger::init());

    let matches = App::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .arg(
            Arg::with_name("capture_file")
                .value_name("CAPTURE_FILE")
                .help("Path to the pcap capture to reconstruct uTP streams from")
                .required(true)
                .index(1),
        )
        .get_matches();

    let capture_path = Path::new(
        matches
            .value_of("capture_file")
            .ok_or_else(|| format_err!("capture file is required"))?,
    );
    let output_dir = Path::new(".");

    info!("reading capture {:?}", capture_path);
    let reader = PcapReader::open(capture_path)?;
    let sink = FileSink::new(output_dir);
    let mut tracer = Tracer::new(sink);

    for frame in reader {
        let frame = frame?;
        tracer.handle_frame(&frame);
    }

    let summary = tracer.finish();
    println!("{}", summary);
    Ok(())
}

fn main() {
    if let Err(error) = run() {
        error!("Error: {:?}", error);
        process::exit(1);
    }
}
