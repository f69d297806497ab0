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

//! Batch waterfall exporter.
//!
//! Sweeps a frequency range and writes one grayscale PNG of the FFT history
//! per step:
//!
//! ```bash
//! rf-waterfall --start 88 --end 108 --step 0.5 --output-dir captures
//! ```
//!
//! Without hardware the device falls back to replaying `--fallback-file`.

mod config;
mod export;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use config::ExportConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Export SDR waterfall history across a frequency sweep", long_about = None)]
struct Cli {
    /// First sweep frequency in MHz
    #[arg(long)]
    start: Option<f64>,

    /// Last sweep frequency in MHz (inclusive)
    #[arg(long)]
    end: Option<f64>,

    /// Sweep step in MHz
    #[arg(long)]
    step: Option<f64>,

    /// Blocks to discard after each retune
    #[arg(long)]
    skip: Option<u64>,

    /// Magnitude scale applied before clipping to 0..=255
    #[arg(long)]
    scale: Option<f32>,

    /// Directory for the generated images
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Raw capture to replay when no SDR hardware is found
    #[arg(short, long)]
    fallback_file: Option<PathBuf>,

    /// Ignore the stored configuration file
    #[arg(long)]
    no_config: bool,

    /// Store the effective settings as the new defaults
    #[arg(long, conflicts_with = "no_config")]
    save_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut ExportConfig) {
        if let Some(start) = self.start {
            config.frequency_start = start;
        }
        if let Some(end) = self.end {
            config.frequency_end = end;
        }
        if let Some(step) = self.step {
            config.frequency_step = step;
        }
        if let Some(skip) = self.skip {
            config.blocks_to_skip = skip;
        }
        if let Some(scale) = self.scale {
            config.scale = scale;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(file) = &self.fallback_file {
            config.fallback_file = Some(file.clone());
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = if cli.no_config {
        ExportConfig::default()
    } else {
        ExportConfig::load().context("failed to load configuration")?
    };
    cli.apply(&mut config);

    if cli.save_config {
        config.save().context("failed to save configuration")?;
        if let Ok(path) = ExportConfig::config_path() {
            info!("Saved configuration to {}", path.display());
        }
    }

    let written = export::run(&config)?;
    info!("Wrote {} images to {}", written.len(), config.output_dir.display());
    Ok(())
}
