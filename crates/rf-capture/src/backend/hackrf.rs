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

//! HackRF backend.
//!
//! The radio streams USB bulk transfers of at most 128 KiB once put in
//! receive mode. Consecutive transfers are concatenated until a full block is
//! available, so the HackRF runs under the same one-step-per-block contract
//! as the other backends. Bytes are signed and get recentered by the sample
//! processor.
//! Enable the `hackrf` feature to compile with HackRF support.

use crate::backend::{Backend, BackendKind};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result};

/// Open the HackRF backend at the given frequency.
#[cfg(feature = "hackrf")]
pub fn open(config: &DeviceConfig, frequency_mhz: f64) -> Result<Box<dyn Backend>> {
    Ok(Box::new(HackRfBackend::open(config, frequency_mhz)?))
}

/// Open the HackRF backend (stub when the `hackrf` feature is disabled).
#[cfg(not(feature = "hackrf"))]
pub fn open(_config: &DeviceConfig, _frequency_mhz: f64) -> Result<Box<dyn Backend>> {
    Err(DeviceError::open(
        BackendKind::HackRf,
        "HackRF support not compiled (enable the 'hackrf' feature)",
    ))
}

#[cfg(feature = "hackrf")]
pub use hardware::HackRfBackend;

/// Replace `buffer` with exactly `block_len` bytes drawn from consecutive
/// transfers. Bytes of the last transfer past the block are dropped. An
/// empty transfer is a fatal short read.
#[cfg_attr(
    not(feature = "hackrf"),
    allow(dead_code, reason = "only the hardware backend streams transfers")
)]
fn fill_block(
    buffer: &mut Vec<u8>,
    block_len: usize,
    mut next_transfer: impl FnMut() -> Result<Vec<u8>>,
) -> Result<()> {
    buffer.clear();
    while buffer.len() < block_len {
        let transfer = next_transfer()?;
        if transfer.is_empty() {
            return Err(DeviceError::fatal(
                BackendKind::HackRf,
                format!("empty transfer after {} of {block_len} bytes", buffer.len()),
            ));
        }
        let wanted = (block_len - buffer.len()).min(transfer.len());
        buffer.extend_from_slice(&transfer[..wanted]);
    }
    Ok(())
}

#[cfg(feature = "hackrf")]
mod hardware {
    use hackrfone::{HackRfOne, RxMode, UnknownMode};

    use crate::backend::{mhz_to_hz, Backend, BackendKind};
    use crate::config::DeviceConfig;
    use crate::error::{DeviceError, Result};

    const KIND: BackendKind = BackendKind::HackRf;

    /// A HackRF in receive mode.
    pub struct HackRfBackend {
        /// `None` once streaming has been stopped
        device: Option<HackRfOne<RxMode>>,
        block_len: usize,
        buffer: Vec<u8>,
    }

    impl std::fmt::Debug for HackRfBackend {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("HackRfBackend")
                .field("streaming", &self.device.is_some())
                .field("block_len", &self.block_len)
                .finish_non_exhaustive()
        }
    }

    impl HackRfBackend {
        /// Open the first HackRF, configure it and start receiving.
        pub fn open(config: &DeviceConfig, frequency_mhz: f64) -> Result<Self> {
            log::info!("Opening HackRF device...");
            let mut device = HackRfOne::<UnknownMode>::new()
                .ok_or_else(|| DeviceError::open(KIND, "no HackRF device found"))?;

            let settings = &config.hackrf;
            device
                .set_freq(mhz_to_hz(frequency_mhz))
                .map_err(|e| DeviceError::open(KIND, format!("set frequency: {e:?}")))?;
            device
                .set_sample_rate(settings.sample_rate, 1)
                .map_err(|e| DeviceError::open(KIND, format!("set sample rate: {e:?}")))?;
            device
                .set_amp_enable(settings.amp_enable)
                .map_err(|e| DeviceError::open(KIND, format!("set amp enable: {e:?}")))?;
            device
                .set_lna_gain(settings.lna_gain)
                .map_err(|e| DeviceError::open(KIND, format!("set LNA gain: {e:?}")))?;
            device
                .set_vga_gain(settings.vga_gain)
                .map_err(|e| DeviceError::open(KIND, format!("set VGA gain: {e:?}")))?;

            let device = device
                .into_rx_mode()
                .map_err(|e| DeviceError::open(KIND, format!("start rx: {e:?}")))?;

            log::info!("HackRF configured:");
            log::info!("  Center frequency: {frequency_mhz:.3} MHz");
            log::info!("  Sample rate: {} Hz", settings.sample_rate);
            log::info!(
                "  Amp: {}, LNA: {} dB, VGA: {} dB",
                settings.amp_enable,
                settings.lna_gain,
                settings.vga_gain
            );

            Ok(Self {
                device: Some(device),
                block_len: config.block_len,
                buffer: Vec::with_capacity(config.block_len),
            })
        }

        fn device(&mut self) -> Result<&mut HackRfOne<RxMode>> {
            self.device
                .as_mut()
                .ok_or_else(|| DeviceError::fatal(KIND, "receive already stopped"))
        }
    }

    impl Backend for HackRfBackend {
        fn kind(&self) -> BackendKind {
            KIND
        }

        fn read_block(&mut self) -> Result<&[u8]> {
            let block_len = self.block_len;
            let mut buffer = std::mem::take(&mut self.buffer);
            let device = self.device()?;
            let filled = super::fill_block(&mut buffer, block_len, || {
                device
                    .rx()
                    .map_err(|e| DeviceError::fatal(KIND, format!("rx transfer: {e:?}")))
            });
            self.buffer = buffer;
            filled?;
            Ok(&self.buffer)
        }

        fn retune(&mut self, frequency_mhz: f64) -> Result<()> {
            self.device()?
                .set_freq(mhz_to_hz(frequency_mhz))
                .map_err(|e| DeviceError::fatal(KIND, format!("set frequency: {e:?}")))
        }

        fn stop(&mut self) -> Result<()> {
            let Some(device) = self.device.take() else {
                return Ok(());
            };
            log::info!("Stopping HackRF receive");
            // Dropping the returned handle closes the device.
            device
                .stop_rx()
                .map(drop)
                .map_err(|e| DeviceError::fatal(KIND, format!("stop rx: {e:?}")))
        }
    }
}
