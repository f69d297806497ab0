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

//! Error types for device creation and streaming.

use thiserror::Error;

use crate::backend::BackendKind;

/// Errors that can occur while opening, tuning or streaming from a device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A backend failed to open or configure. Device creation falls through
    /// to the next backend in priority order.
    #[error("{backend} failed to open: {reason}")]
    HardwareOpen { backend: BackendKind, reason: String },

    /// A backend failed while streaming (status error from a control call,
    /// short read). The acquisition loop stops and the error is handed to
    /// the device owner.
    #[error("{backend} streaming failure: {reason}")]
    HardwareFatal { backend: BackendKind, reason: String },

    #[error("invalid device configuration: {0}")]
    Configuration(String),

    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A control call arrived after the acquisition loop ended.
    #[error("device is no longer receiving")]
    NotReceiving,
}

impl DeviceError {
    pub(crate) fn open(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::HardwareOpen {
            backend,
            reason: reason.into(),
        }
    }

    pub(crate) fn fatal(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::HardwareFatal {
            backend,
            reason: reason.into(),
        }
    }

    /// Whether this error ends the acquisition loop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::HardwareFatal { .. } | Self::Spawn(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = DeviceError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_backend() {
        let err = DeviceError::open(BackendKind::RtlSdr, "no device");
        assert_eq!(err.to_string(), "RTL-SDR failed to open: no device");
        assert!(!err.is_fatal());

        let err = DeviceError::fatal(BackendKind::HackRf, "short read");
        assert_eq!(err.to_string(), "HackRF streaming failure: short read");
        assert!(err.is_fatal());
    }
}
