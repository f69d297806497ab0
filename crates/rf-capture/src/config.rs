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

//! Device configuration: buffer geometry and per-backend radio settings.
//!
//! Every buffer a [`Device`](crate::Device) owns is sized from this
//! configuration at creation time and never resized afterwards.

use std::time::Duration;

use crate::error::{DeviceError, Result};

/// Number of bins in one FFT row.
pub const FFT_SIZE: usize = 2048;

/// Number of rows kept in the waterfall history.
pub const FFT_HISTORY_SIZE: usize = 200;

/// Length in bytes of one raw block of interleaved I/Q bytes.
pub const BLOCK_LEN: usize = 262_144;

/// Replay interval of the dummy playback backend (~60 Hz).
pub const PLAYBACK_INTERVAL: Duration = Duration::from_millis(1000 / 60);

/// RTL-SDR radio settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtlSdrSettings {
    /// Device index to open
    pub device_index: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl Default for RtlSdrSettings {
    fn default() -> Self {
        Self {
            device_index: 0,
            sample_rate: 2_000_000,
        }
    }
}

/// HackRF radio settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HackRfSettings {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Front-end RF amplifier
    pub amp_enable: bool,
    /// LNA (IF) gain in dB
    pub lna_gain: u16,
    /// VGA (baseband) gain in dB
    pub vga_gain: u16,
}

impl Default for HackRfSettings {
    fn default() -> Self {
        Self {
            sample_rate: 5_000_000,
            amp_enable: false,
            lna_gain: 32,
            vga_gain: 30,
        }
    }
}

/// Configuration for a capture device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// FFT size (number of frequency bins per row)
    pub fft_size: usize,
    /// Waterfall depth (number of rows kept)
    pub history_size: usize,
    /// Raw block length in bytes (two bytes per IQ pair)
    pub block_len: usize,
    /// Time between replayed blocks in dummy playback
    pub playback_interval: Duration,
    pub rtlsdr: RtlSdrSettings,
    pub hackrf: HackRfSettings,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            fft_size: FFT_SIZE,
            history_size: FFT_HISTORY_SIZE,
            block_len: BLOCK_LEN,
            playback_interval: PLAYBACK_INTERVAL,
            rtlsdr: RtlSdrSettings::default(),
            hackrf: HackRfSettings::default(),
        }
    }
}

impl DeviceConfig {
    /// Number of IQ pairs in one full block.
    #[must_use]
    pub fn pairs_per_block(&self) -> usize {
        self.block_len / 2
    }

    /// Check the buffer geometry.
    ///
    /// Frequencies are deliberately not part of this check; tuning values are
    /// passed through to the hardware unvalidated.
    pub fn validate(&self) -> Result<()> {
        if self.fft_size == 0 {
            return Err(DeviceError::Configuration("fft_size must be non-zero".into()));
        }
        if self.history_size == 0 {
            return Err(DeviceError::Configuration("history_size must be non-zero".into()));
        }
        if self.block_len == 0 || self.block_len % 2 != 0 {
            return Err(DeviceError::Configuration(format!(
                "block_len must be a non-zero even number of bytes, got {}",
                self.block_len
            )));
        }
        if self.pairs_per_block() < self.fft_size {
            return Err(DeviceError::Configuration(format!(
                "a block of {} IQ pairs cannot fill an FFT of size {}",
                self.pairs_per_block(),
                self.fft_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = DeviceConfig::default();
        assert_eq!(config.fft_size, 2048);
        assert_eq!(config.history_size, 200);
        assert_eq!(config.pairs_per_block(), 131_072);
        assert_eq!(config.rtlsdr.sample_rate, 2_000_000);
        assert_eq!(config.hackrf.sample_rate, 5_000_000);
        assert_eq!((config.hackrf.lna_gain, config.hackrf.vga_gain), (32, 30));
        assert!(!config.hackrf.amp_enable);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        let odd = DeviceConfig {
            block_len: 31,
            ..Default::default()
        };
        assert!(matches!(odd.validate(), Err(DeviceError::Configuration(_))));

        let tiny_block = DeviceConfig {
            fft_size: 64,
            block_len: 64,
            ..Default::default()
        };
        assert!(matches!(tiny_block.validate(), Err(DeviceError::Configuration(_))));

        let no_history = DeviceConfig {
            history_size: 0,
            ..Default::default()
        };
        assert!(no_history.validate().is_err());
    }
}
