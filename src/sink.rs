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

//! Event sink: where reconstructed bytes and lifecycle events go.
//! See `SPEC_FULL.md` §5 and §6.

use crate::error::SinkError;
use crate::flow::{Direction, FlowKey};
use failure::Error;
use log::info;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// 32 KiB, matching the reference tracer's buffer-flush threshold.
const FLUSH_THRESHOLD: usize = 32 * 1024;

/// Where reconstructed segments and flow lifecycle events are reported.
/// Implemented by `FileSink` for the CLI and by an in-memory recorder in
/// tests.
pub trait EventSink {
    fn new_flow(&mut self, key: &FlowKey);
    fn new_segment(&mut self, key: &FlowKey, direction: Direction, data: &[u8]);
    fn flow_closed(&mut self, key: &FlowKey);
    /// Called once at the end of a capture: flush any buffered bytes, but
    /// do not treat still-open flows as closed (see `SPEC_FULL.md` §3.1).
    fn finish(&mut self);
}

struct StreamFile {
    writer: BufWriter<File>,
    buffered: usize,
    path: PathBuf,
}

/// Writes each flow/direction's reconstructed byte stream to its own file.
///
/// File names follow
/// `stream-{direction}-{initiator_ip}-{initiator_port}-{accepter_ip}-{accepter_port}-{connid}`,
/// with a numeric collision suffix appended the first time a name is reused
/// and cached for the rest of the flow's lifetime.
pub struct FileSink {
    output_dir: PathBuf,
    files: HashMap<(FlowKey, usize), StreamFile>,
    filenames: HashMap<(FlowKey, usize), PathBuf>,
}

impl FileSink {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        FileSink {
            output_dir: output_dir.into(),
            files: HashMap::new(),
            filenames: HashMap::new(),
        }
    }

    fn base_filename(&self, key: &FlowKey, direction: Direction) -> PathBuf {
        let name = format!(
            "stream-{}-{}-{}-{}-{}-{}",
            direction.index(),
            key.initiator_ip,
            key.initiator_port,
            key.accepter_ip,
            key.accepter_port,
            key.connid
        );
        self.output_dir.join(name)
    }

    /// Picks a non-colliding path for `(key, direction)`, appending `.N`
    /// the first free index for which no file already exists on disk, and
    /// remembers the choice so later segments of the same flow reuse it.
    /// Mirrors the reference tracer's `os.path.exists` collision loop.
    fn filename_for(&mut self, key: &FlowKey, direction: Direction) -> PathBuf {
        let cache_key = (*key, direction.index());
        if let Some(cached) = self.filenames.get(&cache_key) {
            return cached.clone();
        }

        let base = self.base_filename(key, direction);
        let mut path = base.clone();
        let mut n = 1u32;
        while path.exists() {
            path = base.with_file_name(format!("{}.{}", base.file_name().unwrap().to_string_lossy(), n));
            n += 1;
        }
        self.filenames.insert(cache_key, path.clone());
        path
    }

    fn open(&mut self, key: &FlowKey, direction: Direction) -> Result<&mut StreamFile, Error> {
        let cache_key = (*key, direction.index());
        if !self.files.contains_key(&cache_key) {
            let path = self.filename_for(key, direction);
            let file = File::create(&path).map_err(|source| SinkError::OpenFailed {
                path: path.clone(),
                source,
            })?;
            self.files.insert(
                cache_key,
                StreamFile {
                    writer: BufWriter::new(file),
                    buffered: 0,
                    path,
                },
            );
        }
        Ok(self.files.get_mut(&cache_key).expect("just inserted"))
    }

    fn write(&mut self, key: &FlowKey, direction: Direction, data: &[u8]) -> Result<(), Error> {
        let stream = self.open(key, direction)?;
        stream
            .writer
            .write_all(data)
            .map_err(|source| SinkError::WriteFailed {
                path: stream.path.clone(),
                source,
            })?;
        stream.buffered += data.len();
        if stream.buffered >= FLUSH_THRESHOLD {
            stream.writer.flush().map_err(|source| SinkError::WriteFailed {
                path: stream.path.clone(),
                source,
            })?;
            stream.buffered = 0;
        }
        Ok(())
    }

    fn flush_direction(&mut self, key: &FlowKey, direction: Direction) {
        let cache_key = (*key, direction.index());
        if let Some(stream) = self.files.get_mut(&cache_key) {
            if let Err(err) = stream.writer.flush() {
                log::warn!("failed to flush {:?}: {}", stream.path, err);
            }
            stream.buffered = 0;
        }
    }
}

impl EventSink for FileSink {
    fn new_flow(&mut self, key: &FlowKey) {
        info!(
            "new flow {}:{} -> {}:{} (connid {})",
            key.initiator_ip, key.initiator_port, key.accepter_ip, key.accepter_port, key.connid
        );
    }

    fn new_segment(&mut self, key: &FlowKey, direction: Direction, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Err(err) = self.write(key, direction, data) {
            log::warn!("failed to write segment: {}", err);
        }
    }

    fn flow_closed(&mut self, key: &FlowKey) {
        self.flush_direction(key, Direction::InitiatorToAccepter);
        self.flush_direction(key, Direction::AccepterToInitiator);
        info!(
            "flow closed {}:{} -> {}:{} (connid {})",
            key.initiator_ip, key.initiator_port, key.accepter_ip, key.accepter_port, key.connid
        );
    }

    fn finish(&mut self) {
        let keys: Vec<(FlowKey, usize)> = self.files.keys().cloned().collect();
        for (key, _) in keys {
            self.flush_direction(&key, Direction::InitiatorToAccepter);
            self.flush_direction(&key, Direction::AccepterToInitiator);
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        self.finish();
    }
}
