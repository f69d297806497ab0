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

//! Frequency sweep: retune, let the waterfall fill, write it out as a PNG.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use image::GrayImage;
use log::{info, warn};
use rf_capture::{BackendKind, Device, DeviceConfig};

use crate::config::ExportConfig;

/// How often the block counter is checked while waiting for rows.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Center frequencies from `start` to `end` inclusive, `step` apart.
///
/// Computed by index so rounding does not drop or add the last step.
#[must_use]
pub fn sweep_frequencies(start: f64, end: f64, step: f64) -> Vec<f64> {
    if step <= 0.0 || end < start || !step.is_finite() {
        return Vec::new();
    }
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "count is non-negative and bounded by the sweep range"
    )]
    let steps = ((end - start) / step + 1e-9).floor() as u64;
    #[allow(clippy::cast_precision_loss, reason = "sweep indices are small")]
    (0..=steps).map(|n| start + n as f64 * step).collect()
}

/// Output file name for one sweep frequency, e.g. `fft-200.0000.png`.
#[must_use]
pub fn file_name(frequency_mhz: f64) -> String {
    format!("fft-{frequency_mhz:.4}.png")
}

/// Run the whole sweep described by `config` on a freshly created device.
pub fn run(config: &ExportConfig) -> Result<Vec<PathBuf>> {
    let frequencies = sweep_frequencies(config.frequency_start, config.frequency_end, config.frequency_step);
    ensure!(
        !frequencies.is_empty(),
        "empty sweep: start {} MHz, end {} MHz, step {} MHz",
        config.frequency_start,
        config.frequency_end,
        config.frequency_step
    );

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;

    let device = Device::create_with_config(
        DeviceConfig::default(),
        frequencies[0],
        config.fallback_file.as_deref(),
    )
    .context("failed to create capture device")?;

    if device.kind() == BackendKind::Dummy {
        warn!("No SDR hardware found; every image will show the same playback data");
    }
    info!(
        "Sweeping {} frequencies from {:.4} to {:.4} MHz on {}",
        frequencies.len(),
        config.frequency_start,
        config.frequency_end,
        device.kind()
    );

    let mut written = Vec::with_capacity(frequencies.len());
    for frequency in frequencies {
        written.push(capture(&device, frequency, config)?);
    }

    let summary = device.destroy().context("capture device failed during sweep")?;
    info!("Sweep done: {} images, {} blocks processed", written.len(), summary.blocks);
    Ok(written)
}

/// Retune to `frequency_mhz`, collect a full history and write it out.
pub fn capture(device: &Device, frequency_mhz: f64, config: &ExportConfig) -> Result<PathBuf> {
    device
        .retune(frequency_mhz)
        .with_context(|| format!("failed to retune to {frequency_mhz:.4} MHz"))?;

    let history = device.config().history_size as u64;
    wait_for_blocks(device, config.blocks_to_skip + history)?;

    let path = config.output_dir.join(file_name(frequency_mhz));
    write_image(device, config.scale, &path)?;
    info!("Wrote {}", path.display());
    Ok(path)
}

/// Block until `count` more blocks have been published.
fn wait_for_blocks(device: &Device, count: u64) -> Result<()> {
    let target = device.blocks_processed() + count;
    while device.blocks_processed() < target {
        if !device.is_receiving() {
            bail!("{} stopped streaming", device.kind());
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

fn write_image(device: &Device, scale: f32, path: &Path) -> Result<()> {
    let width = u32::try_from(device.config().fft_size).context("FFT size does not fit an image")?;
    let height = u32::try_from(device.config().history_size).context("history does not fit an image")?;
    let pixels = device.waterfall_gray(scale);

    let image = GrayImage::from_raw(width, height, pixels).context("waterfall export has the wrong size")?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}
