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

//! Scrolling waterfall history of FFT rows.
//!
//! Rows are stored contiguously, newest first. Each push moves every row down
//! by one and drops the oldest, so readers always see a chronologically
//! ordered buffer with no ring-index arithmetic.

use num_complex::Complex;

/// Default magnitude-to-byte scale for grayscale export.
pub const DEFAULT_EXPORT_SCALE: f32 = 2.0;

/// One FFT bin as stored in the waterfall.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FftBin {
    pub re: f32,
    pub im: f32,
    /// Bin index divided by the FFT size (0..1)
    pub position: f32,
}

impl FftBin {
    /// Magnitude `sqrt(re² + im²)`.
    #[must_use]
    pub fn magnitude(&self) -> f32 {
        self.re.hypot(self.im)
    }
}

/// Map a bin magnitude to a grayscale byte, clipped to 0..=255.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is clamped to the byte range first"
)]
pub fn magnitude_to_gray(magnitude: f32, scale: f32) -> u8 {
    (magnitude * scale).clamp(0.0, 255.0) as u8
}

/// Fixed-depth history of FFT rows, row 0 newest.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterfallHistory {
    fft_size: usize,
    depth: usize,
    bins: Vec<FftBin>,
}

impl WaterfallHistory {
    /// A history of `depth` zeroed rows of `fft_size` bins.
    #[must_use]
    pub fn new(fft_size: usize, depth: usize) -> Self {
        Self {
            fft_size,
            depth,
            bins: vec![FftBin::default(); fft_size * depth],
        }
    }

    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of rows; constant for the lifetime of the history.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Shift all rows down by one and store `spectrum` as row 0.
    pub fn push_row(&mut self, spectrum: &[Complex<f32>]) {
        debug_assert_eq!(spectrum.len(), self.fft_size);
        let len = self.bins.len();
        self.bins.copy_within(0..len - self.fft_size, self.fft_size);

        #[allow(clippy::cast_precision_loss, reason = "bin positions fit f32 precision")]
        let size = self.fft_size as f32;
        for (n, (bin, value)) in self.bins[..self.fft_size].iter_mut().zip(spectrum).enumerate() {
            #[allow(clippy::cast_precision_loss, reason = "bin positions fit f32 precision")]
            let position = n as f32 / size;
            *bin = FftBin {
                re: value.re,
                im: value.im,
                position,
            };
        }
    }

    /// Row `index`, 0 being the newest.
    #[must_use]
    pub fn row(&self, index: usize) -> &[FftBin] {
        let start = index * self.fft_size;
        &self.bins[start..start + self.fft_size]
    }

    /// Rows from newest to oldest.
    pub fn rows(&self) -> impl Iterator<Item = &[FftBin]> {
        self.bins.chunks_exact(self.fft_size)
    }

    /// All bins, row-major, newest row first.
    #[must_use]
    pub fn as_slice(&self) -> &[FftBin] {
        &self.bins
    }

    /// Row-major grayscale bytes (`fft_size` wide, `depth` high), each the
    /// clipped scaled magnitude of its bin. Suitable for direct 8-bit
    /// grayscale image encoding.
    #[must_use]
    pub fn export_gray(&self, scale: f32) -> Vec<u8> {
        self.bins
            .iter()
            .map(|bin| magnitude_to_gray(bin.magnitude(), scale))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(values: &[f32]) -> Vec<Complex<f32>> {
        values.iter().map(|&v| Complex::new(v, -v)).collect()
    }

    #[test]
    fn test_new_history_has_fixed_depth() {
        let history = WaterfallHistory::new(4, 3);
        assert_eq!(history.rows().count(), 3);
        assert_eq!(history.as_slice().len(), 12);
        assert!(history.as_slice().iter().all(|b| *b == FftBin::default()));
    }

    #[test]
    fn test_push_shifts_rows_down() {
        let mut history = WaterfallHistory::new(2, 3);
        history.push_row(&spectrum(&[1.0, 1.5]));
        history.push_row(&spectrum(&[2.0, 2.5]));
        let before: Vec<Vec<FftBin>> = history.rows().map(<[FftBin]>::to_vec).collect();

        history.push_row(&spectrum(&[3.0, 3.5]));

        assert_eq!(history.rows().count(), 3);
        assert_eq!(history.row(0)[0], FftBin { re: 3.0, im: -3.0, position: 0.0 });
        assert_eq!(history.row(0)[1], FftBin { re: 3.5, im: -3.5, position: 0.5 });
        assert_eq!(history.row(1), before[0].as_slice());
        assert_eq!(history.row(2), before[1].as_slice());
    }

    #[test]
    fn test_oldest_row_is_discarded() {
        let mut history = WaterfallHistory::new(1, 2);
        for v in [1.0, 2.0, 3.0] {
            history.push_row(&spectrum(&[v]));
        }
        let values: Vec<f32> = history.rows().map(|r| r[0].re).collect();
        assert_eq!(values, vec![3.0, 2.0]);
    }

    #[test]
    fn test_single_row_history() {
        let mut history = WaterfallHistory::new(2, 1);
        history.push_row(&spectrum(&[5.0, 6.0]));
        history.push_row(&spectrum(&[7.0, 8.0]));
        assert_eq!(history.row(0)[1].re, 8.0);
    }

    #[test]
    fn test_magnitude_to_gray_clips() {
        assert_eq!(magnitude_to_gray(0.0, 2.0), 0);
        assert_eq!(magnitude_to_gray(10.0, 2.0), 20);
        assert_eq!(magnitude_to_gray(1000.0, 2.0), 255);
        assert_eq!(magnitude_to_gray(f32::NAN, 2.0), 0);
    }

    #[test]
    fn test_export_gray_is_row_major() {
        let mut history = WaterfallHistory::new(2, 2);
        history.push_row(&[Complex::new(3.0, 4.0), Complex::new(0.0, 0.0)]);
        history.push_row(&[Complex::new(0.0, 1.0), Complex::new(200.0, 0.0)]);

        let pixels = history.export_gray(DEFAULT_EXPORT_SCALE);
        assert_eq!(pixels, vec![2, 255, 10, 0]);
    }
}
