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

//! Exporter configuration.
//!
//! Persistent defaults live in a TOML file managed by `confy`; command line
//! flags override individual values for a single run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const APP_NAME: &str = "rf-waterfall";
const CONFIG_NAME: &str = "export";

/// Sweep and export settings stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExportConfig {
    /// First center frequency of the sweep, MHz
    #[serde(default = "default_frequency_start")]
    pub frequency_start: f64,

    /// Last center frequency of the sweep (inclusive), MHz
    #[serde(default = "default_frequency_end")]
    pub frequency_end: f64,

    /// Step between sweep frequencies, MHz
    #[serde(default = "default_frequency_step")]
    pub frequency_step: f64,

    /// Blocks discarded after each retune before collecting rows
    #[serde(default = "default_blocks_to_skip")]
    pub blocks_to_skip: u64,

    /// Magnitude multiplier applied before clipping to a byte
    #[serde(default = "default_scale")]
    pub scale: f32,

    /// Directory the PNG files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Raw capture replayed when no hardware is present
    #[serde(default)]
    pub fallback_file: Option<PathBuf>,
}

fn default_frequency_start() -> f64 {
    200.0
}

fn default_frequency_end() -> f64 {
    210.0
}

fn default_frequency_step() -> f64 {
    1.0
}

fn default_blocks_to_skip() -> u64 {
    10
}

fn default_scale() -> f32 {
    rf_capture::DEFAULT_EXPORT_SCALE
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            frequency_start: default_frequency_start(),
            frequency_end: default_frequency_end(),
            frequency_step: default_frequency_step(),
            blocks_to_skip: default_blocks_to_skip(),
            scale: default_scale(),
            output_dir: default_output_dir(),
            fallback_file: None,
        }
    }
}

impl ExportConfig {
    /// Load configuration from disk, creating it with defaults on first run
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn config_path() -> Result<PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }
}
