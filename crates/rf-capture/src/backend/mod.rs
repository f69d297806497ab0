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

//! Backend layer: one implementation per family of sample source.
//!
//! - **RTL-SDR**: blocking synchronous reads (`rtlsdr` feature)
//! - **HackRF**: per-transfer bulk reads (`hackrf` feature)
//! - **Dummy playback**: replays a raw capture file, or silence
//!
//! Hardware handles are not `Send`, so backends are opened on the
//! acquisition thread that drives them. [`BackendOpener`] carries the
//! opening step to that thread.

pub mod dummy;
pub mod hackrf;
pub mod rtlsdr;

use std::fmt;
use std::path::PathBuf;

use crate::config::DeviceConfig;
use crate::error::Result;

pub use dummy::DummyBackend;

/// Which family of source is driving a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// RTL-SDR dongle
    RtlSdr,
    /// HackRF-class streaming hardware
    HackRf,
    /// Playback of a raw capture file (or a silent buffer)
    Dummy,
}

impl BackendKind {
    /// Fallback priority used by [`default_openers`].
    pub const PRIORITY: [BackendKind; 3] = [Self::RtlSdr, Self::HackRf, Self::Dummy];

    /// Whether raw bytes from this source are offset-encoded and must be
    /// recentered with `(byte + 128) mod 256` before use as IQ samples.
    #[must_use]
    pub fn recenters_samples(self) -> bool {
        matches!(self, Self::HackRf | Self::Dummy)
    }

    /// Human readable backend name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::RtlSdr => "RTL-SDR",
            Self::HackRf => "HackRF",
            Self::Dummy => "Dummy playback",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capability set shared by every sample source.
pub trait Backend {
    /// The family this backend belongs to.
    fn kind(&self) -> BackendKind;

    /// Obtain the next raw block of interleaved I/Q bytes.
    ///
    /// Blocks until data is available. Any error returned here is treated
    /// as fatal for the acquisition loop.
    fn read_block(&mut self) -> Result<&[u8]>;

    /// Retune the center frequency.
    fn retune(&mut self, frequency_mhz: f64) -> Result<()>;

    /// Stop streaming and release the hardware handle.
    ///
    /// Called exactly once, on the acquisition thread, when the loop exits.
    fn stop(&mut self) -> Result<()>;
}

type OpenFn = dyn FnOnce(&DeviceConfig, f64) -> Result<Box<dyn Backend>> + Send;

/// Deferred open step for one backend, executed on the acquisition thread.
pub struct BackendOpener {
    kind: BackendKind,
    open: Box<OpenFn>,
}

impl fmt::Debug for BackendOpener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendOpener")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl BackendOpener {
    /// Wrap an open function for the given backend kind.
    pub fn new<F>(kind: BackendKind, open: F) -> Self
    where
        F: FnOnce(&DeviceConfig, f64) -> Result<Box<dyn Backend>> + Send + 'static,
    {
        Self {
            kind,
            open: Box::new(open),
        }
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Run the open step. Consumes the opener.
    pub fn open(self, config: &DeviceConfig, frequency_mhz: f64) -> Result<Box<dyn Backend>> {
        (self.open)(config, frequency_mhz)
    }
}

/// The fixed fallback chain: RTL-SDR, then HackRF, then dummy playback of
/// `fallback_file`.
#[must_use]
pub fn default_openers(fallback_file: Option<PathBuf>) -> Vec<BackendOpener> {
    vec![
        BackendOpener::new(BackendKind::RtlSdr, rtlsdr::open),
        BackendOpener::new(BackendKind::HackRf, hackrf::open),
        BackendOpener::new(BackendKind::Dummy, move |config, _frequency_mhz| {
            Ok(Box::new(DummyBackend::load(fallback_file.as_deref(), config)?) as Box<dyn Backend>)
        }),
    ]
}

/// Convert a frequency in MHz to Hz.
///
/// Values are not range-checked; out-of-range requests saturate and are
/// rejected (or not) by the hardware itself.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "tuning values are passed through unvalidated"
)]
pub(crate) fn mhz_to_hz(frequency_mhz: f64) -> u64 {
    (frequency_mhz * 1e6).round() as u64
}
