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

//! RTL-SDR backend.
//!
//! Opens the dongle with a 2 MHz sample rate and automatic gain, then reads
//! fixed-size blocks with blocking synchronous reads.
//! Enable the `rtlsdr` feature to compile with RTL-SDR support.

use crate::backend::Backend;
use crate::config::DeviceConfig;
use crate::error::Result;

/// Open the RTL-SDR backend at the given frequency.
#[cfg(feature = "rtlsdr")]
pub fn open(config: &DeviceConfig, frequency_mhz: f64) -> Result<Box<dyn Backend>> {
    Ok(Box::new(RtlSdrBackend::open(config, frequency_mhz)?))
}

/// Open the RTL-SDR backend (stub when the `rtlsdr` feature is disabled).
#[cfg(not(feature = "rtlsdr"))]
pub fn open(_config: &DeviceConfig, _frequency_mhz: f64) -> Result<Box<dyn Backend>> {
    Err(crate::error::DeviceError::open(
        crate::backend::BackendKind::RtlSdr,
        "RTL-SDR support not compiled (enable the 'rtlsdr' feature)",
    ))
}

#[cfg(feature = "rtlsdr")]
pub use hardware::RtlSdrBackend;

#[cfg(feature = "rtlsdr")]
mod hardware {
    use crate::backend::{mhz_to_hz, Backend, BackendKind};
    use crate::config::DeviceConfig;
    use crate::error::{DeviceError, Result};

    const KIND: BackendKind = BackendKind::RtlSdr;

    /// An opened and configured RTL-SDR dongle.
    ///
    /// The handle closes itself when dropped; it is never closed explicitly.
    pub struct RtlSdrBackend {
        /// `None` once stopped
        device: Option<::rtlsdr::RTLSDRDevice>,
        block_len: usize,
        buffer: Vec<u8>,
    }

    impl std::fmt::Debug for RtlSdrBackend {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RtlSdrBackend")
                .field("block_len", &self.block_len)
                .field("open", &self.device.is_some())
                .finish_non_exhaustive()
        }
    }

    impl RtlSdrBackend {
        /// Open and configure device `config.rtlsdr.device_index`.
        ///
        /// A configuration failure drops (and so closes) the device again and
        /// reports [`DeviceError::HardwareOpen`] so the caller can fall back.
        pub fn open(config: &DeviceConfig, frequency_mhz: f64) -> Result<Self> {
            let index = config.rtlsdr.device_index;
            log::info!("Opening RTL-SDR device {index}...");

            #[allow(clippy::cast_possible_wrap, reason = "rtlsdr crate expects i32 index")]
            let mut device = ::rtlsdr::open(index as i32)
                .map_err(|e| DeviceError::open(KIND, format!("device {index}: {e}")))?;

            configure(&mut device, config, frequency_mhz)?;

            log::info!("RTL-SDR configured:");
            log::info!("  Center frequency: {frequency_mhz:.3} MHz");
            #[allow(clippy::cast_precision_loss, reason = "display only")]
            let rate_mhz = f64::from(config.rtlsdr.sample_rate) / 1e6;
            log::info!("  Sample rate: {rate_mhz:.3} MHz");
            log::info!("  Gain: automatic (AGC on)");

            Ok(Self {
                device: Some(device),
                block_len: config.block_len,
                buffer: Vec::with_capacity(config.block_len),
            })
        }

        fn device(&mut self) -> Result<&mut ::rtlsdr::RTLSDRDevice> {
            self.device
                .as_mut()
                .ok_or_else(|| DeviceError::fatal(KIND, "device already closed"))
        }
    }

    fn configure(
        device: &mut ::rtlsdr::RTLSDRDevice,
        config: &DeviceConfig,
        frequency_mhz: f64,
    ) -> Result<()> {
        device
            .set_sample_rate(config.rtlsdr.sample_rate)
            .map_err(|e| DeviceError::open(KIND, format!("set sample rate: {e}")))?;
        // false = automatic tuner gain
        device
            .set_tuner_gain_mode(false)
            .map_err(|e| DeviceError::open(KIND, format!("set tuner gain mode: {e}")))?;
        device
            .set_agc_mode(true)
            .map_err(|e| DeviceError::open(KIND, format!("set AGC mode: {e}")))?;
        device
            .set_center_freq(center_freq(frequency_mhz))
            .map_err(|e| DeviceError::open(KIND, format!("set center frequency: {e}")))?;
        device
            .reset_buffer()
            .map_err(|e| DeviceError::open(KIND, format!("reset buffer: {e}")))?;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, reason = "RTL-SDR tunes with a u32 in Hz")]
    fn center_freq(frequency_mhz: f64) -> u32 {
        mhz_to_hz(frequency_mhz).min(u64::from(u32::MAX)) as u32
    }

    impl Backend for RtlSdrBackend {
        fn kind(&self) -> BackendKind {
            KIND
        }

        fn read_block(&mut self) -> Result<&[u8]> {
            let block_len = self.block_len;
            let buf = self
                .device()?
                .read_sync(block_len)
                .map_err(|e| DeviceError::fatal(KIND, format!("read_sync: {e}")))?;
            if buf.len() < self.block_len {
                return Err(DeviceError::fatal(
                    KIND,
                    format!("short read ({} of {} bytes), samples lost", buf.len(), self.block_len),
                ));
            }
            self.buffer = buf;
            Ok(&self.buffer)
        }

        fn retune(&mut self, frequency_mhz: f64) -> Result<()> {
            self.device()?
                .set_center_freq(center_freq(frequency_mhz))
                .map_err(|e| DeviceError::fatal(KIND, format!("set center frequency: {e}")))
        }

        fn stop(&mut self) -> Result<()> {
            if let Some(device) = self.device.take() {
                log::info!("Closing RTL-SDR device, releasing USB interface");
                // Dropping the handle closes the USB connection.
                drop(device);
            }
            Ok(())
        }
    }
}


#[cfg(all(test, feature = "rtlsdr"))]
mod hardware_tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::error::DeviceError;

    #[test]
    fn test_missing_device_index_fails_to_open() {
        let mut config = DeviceConfig::default();
        config.rtlsdr.device_index = 99;
        let err = RtlSdrBackend::open(&config, 100.0).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::HardwareOpen {
                backend: BackendKind::RtlSdr,
                ..
            }
        ));
    }

    #[test]
    #[ignore = "needs an RTL-SDR dongle"]
    fn test_stop_releases_handle_once() {
        let mut backend = RtlSdrBackend::open(&DeviceConfig::default(), 100.0).unwrap();
        assert_eq!(backend.read_block().unwrap().len(), crate::config::BLOCK_LEN);

        backend.stop().unwrap();
        backend.stop().unwrap();
        assert!(matches!(backend.read_block(), Err(DeviceError::HardwareFatal { .. })));
        assert!(backend.retune(101.0).is_err());
        // dropping a stopped backend must not touch the handle again
        drop(backend);

        let mut reopened = RtlSdrBackend::open(&DeviceConfig::default(), 100.0).unwrap();
        reopened.stop().unwrap();
    }
}
