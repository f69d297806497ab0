// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Dummy playback backend.
//!
//! Used when no hardware could be opened. Replays whole blocks of a flat raw
//! capture file (HackRF byte encoding) at a fixed cadence, cycling back to the
//! first block after the last. A trailing partial block is never read.
//! Without a usable file it plays a single zero-filled block.

use std::path::Path;
use std::time::Duration;

use crate::backend::{Backend, BackendKind};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result};

/// Replays raw blocks from memory.
#[derive(Debug)]
pub struct DummyBackend {
    data: Vec<u8>,
    block_len: usize,
    block_count: usize,
    index: usize,
    interval: Duration,
    started: bool,
}

impl DummyBackend {
    /// Load `data_file` for playback.
    ///
    /// A missing, unreadable or too short file is logged and replaced with a
    /// zero-filled block. Only a zero `block_len` is an error.
    pub fn load(data_file: Option<&Path>, config: &DeviceConfig) -> Result<Self> {
        match data_file {
            Some(path) => {
                log::warn!(
                    "Couldn't open SDR device. Falling back on data file {}",
                    path.display()
                );
                match std::fs::read(path) {
                    Ok(data) if data.len() >= config.block_len => {
                        Self::from_bytes(data, config.block_len, config.playback_interval)
                    }
                    Ok(data) => {
                        log::warn!(
                            "{} holds {} bytes, less than one {}-byte block. Using empty buffer.",
                            path.display(),
                            data.len(),
                            config.block_len
                        );
                        Self::silent(config)
                    }
                    Err(e) => {
                        log::warn!("Couldn't open {}: {e}. Using empty buffer.", path.display());
                        Self::silent(config)
                    }
                }
            }
            None => {
                log::warn!("Couldn't open SDR device and no data file given. Using empty buffer.");
                Self::silent(config)
            }
        }
    }

    /// One zero-filled block.
    pub fn silent(config: &DeviceConfig) -> Result<Self> {
        Self::from_bytes(vec![0; config.block_len], config.block_len, config.playback_interval)
    }

    /// Play back `data` in blocks of `block_len` bytes.
    ///
    /// Bytes past the last whole block are kept but never read. If `data`
    /// holds no whole block it is replaced by a single zero-filled block.
    pub fn from_bytes(mut data: Vec<u8>, block_len: usize, interval: Duration) -> Result<Self> {
        if block_len == 0 {
            return Err(DeviceError::Configuration("playback block_len must be non-zero".into()));
        }
        let mut block_count = data.len() / block_len;
        if block_count == 0 {
            data = vec![0; block_len];
            block_count = 1;
        }
        log::info!(
            "Dummy playback: {block_count} block(s) of {block_len} bytes, {} trailing byte(s) ignored",
            data.len() % block_len
        );
        Ok(Self {
            data,
            block_len,
            block_count,
            index: 0,
            interval,
            started: false,
        })
    }

    /// Number of whole blocks available for playback.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Index of the block the next read returns.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.index
    }
}

impl Backend for DummyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dummy
    }

    fn read_block(&mut self) -> Result<&[u8]> {
        // Pace replay: one block per interval after the first.
        if self.started && !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        self.started = true;

        let start = self.index * self.block_len;
        self.index = (self.index + 1) % self.block_count;
        Ok(&self.data[start..start + self.block_len])
    }

    /// Playback has no tuner: retuning is a no-op.
    fn retune(&mut self, _frequency_mhz: f64) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}
