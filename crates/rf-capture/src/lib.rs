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

//! SDR capture library: raw IQ acquisition with live analysis buffers.
//!
//! A [`Device`] streams raw interleaved I/Q bytes from the first backend that
//! opens, in fixed priority order:
//!
//! - **RTL-SDR** (`rtlsdr` feature)
//! - **HackRF** (`hackrf` feature)
//! - **Dummy playback** of a raw capture file, or silence
//!
//! Every block is turned into normalized IQ samples, a 256×256 histogram of
//! raw byte pairs and a forward FFT whose row is pushed onto a scrolling
//! waterfall history. Consumers read the latest [`Frame`] through
//! [`Device::read_frame`].
//!
//! # Quick Start
//!
//! ```no_run
//! use rf_capture::Device;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let device = Device::create(100.0, Some(Path::new("capture.iq")))?;
//! println!("Streaming from {}", device.kind());
//!
//! std::thread::sleep(Duration::from_secs(1));
//! device.read_frame(|frame| {
//!     println!("{} blocks, {} IQ pairs in the last one", frame.blocks, frame.histogram.total());
//! });
//!
//! device.retune(105.2)?;
//! let summary = device.destroy()?;
//! println!("Processed {} blocks", summary.blocks);
//! # Ok::<(), rf_capture::DeviceError>(())
//! ```
//!
//! # Custom backends
//!
//! [`Device::create_with_openers`] accepts any ordered list of
//! [`BackendOpener`]s, which is how alternate sources (and tests) plug in.

pub mod acquisition;
pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod processor;
pub mod waterfall;

pub use acquisition::{Frame, LoopSummary};
pub use backend::{default_openers, Backend, BackendKind, BackendOpener, DummyBackend};
pub use config::{
    DeviceConfig, HackRfSettings, RtlSdrSettings, BLOCK_LEN, FFT_HISTORY_SIZE, FFT_SIZE,
    PLAYBACK_INTERVAL,
};
pub use device::Device;
pub use error::{DeviceError, Result};
pub use processor::{IqHistogram, IqSample, SampleProcessor, HISTOGRAM_SIDE};
pub use waterfall::{magnitude_to_gray, FftBin, WaterfallHistory, DEFAULT_EXPORT_SCALE};
