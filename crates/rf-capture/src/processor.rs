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

//! Per-block sample processing.
//!
//! Turns one raw block of interleaved I/Q bytes into:
//! - normalized IQ samples with their position in the block
//! - a 256×256 occurrence histogram of raw byte pairs
//! - the forward FFT of the first `fft_size` pairs
//!
//! All outputs describe the latest block only; nothing accumulates across
//! blocks except the stale tail of the FFT input after a short block.

use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::backend::BackendKind;

/// Side length of the IQ histogram (one cell per byte value).
pub const HISTOGRAM_SIDE: usize = 256;

/// One normalized IQ sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IqSample {
    /// In-phase component, `byte / 256`
    pub i: f32,
    /// Quadrature component, `byte / 256`
    pub q: f32,
    /// Fractional position within the block (0..1)
    pub t: f32,
}

/// Occurrence counts keyed by the raw `(i, q)` byte pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IqHistogram {
    counts: Vec<u32>,
}

impl Default for IqHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl IqHistogram {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: vec![0; HISTOGRAM_SIDE * HISTOGRAM_SIDE],
        }
    }

    pub fn reset(&mut self) {
        self.counts.fill(0);
    }

    fn increment(&mut self, i: u8, q: u8) {
        self.counts[usize::from(i) * HISTOGRAM_SIDE + usize::from(q)] += 1;
    }

    /// Count for the byte pair `(i, q)`.
    #[must_use]
    pub fn count(&self, i: u8, q: u8) -> u32 {
        self.counts[usize::from(i) * HISTOGRAM_SIDE + usize::from(q)]
    }

    /// Sum of all cells; equals the number of pairs in the last block.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    /// Row-major cells, `i * 256 + q`.
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.counts
    }
}

/// Converts raw blocks into samples, histogram and FFT output.
///
/// The FFT plan is built once in [`SampleProcessor::new`] and reused for
/// every block.
pub struct SampleProcessor {
    fft: Arc<dyn Fft<f32>>,
    fft_input: Vec<Complex<f32>>,
    fft_output: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    samples: Vec<IqSample>,
    histogram: IqHistogram,
}

impl std::fmt::Debug for SampleProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleProcessor")
            .field("fft_size", &self.fft_input.len())
            .field("max_pairs", &self.samples.len())
            .finish_non_exhaustive()
    }
}

impl SampleProcessor {
    /// Plan an FFT of `fft_size` and allocate buffers for up to `max_pairs`
    /// IQ pairs per block.
    #[must_use]
    pub fn new(fft_size: usize, max_pairs: usize) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        log::debug!("Planned forward FFT of size {fft_size} for blocks of {max_pairs} pairs");
        Self {
            fft,
            fft_input: vec![Complex::default(); fft_size],
            fft_output: vec![Complex::default(); fft_size],
            scratch,
            samples: vec![IqSample::default(); max_pairs],
            histogram: IqHistogram::new(),
        }
    }

    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.fft_input.len()
    }

    /// Process one raw block. Returns the number of IQ pairs consumed.
    ///
    /// Bytes from HackRF and dummy sources are recentered before they become
    /// samples. The histogram and the FFT input always see the raw bytes.
    pub fn process(&mut self, block: &[u8], kind: BackendKind) -> usize {
        self.samples.fill(IqSample::default());
        self.histogram.reset();

        let pairs = (block.len() / 2).min(self.samples.len());
        let recenter = kind.recenters_samples();
        #[allow(clippy::cast_precision_loss, reason = "block positions fit f32 precision")]
        let span = pairs as f32;

        for (n, pair) in block.chunks_exact(2).take(pairs).enumerate() {
            let (raw_i, raw_q) = (pair[0], pair[1]);
            let (vi, vq) = if recenter {
                (raw_i.wrapping_add(128), raw_q.wrapping_add(128))
            } else {
                (raw_i, raw_q)
            };

            #[allow(clippy::cast_precision_loss, reason = "block positions fit f32 precision")]
            let t = n as f32 / span;
            self.samples[n] = IqSample {
                i: f32::from(vi) / 256.0,
                q: f32::from(vq) / 256.0,
                t,
            };

            self.histogram.increment(raw_i, raw_q);

            if let Some(slot) = self.fft_input.get_mut(n) {
                *slot = Complex::new(f32::from(raw_i) / 255.0, f32::from(raw_q) / 255.0);
            }
        }

        self.fft_output.copy_from_slice(&self.fft_input);
        self.fft.process_with_scratch(&mut self.fft_output, &mut self.scratch);

        pairs
    }

    /// Samples of the last block; slots past the block's pairs are zero.
    #[must_use]
    pub fn samples(&self) -> &[IqSample] {
        &self.samples
    }

    #[must_use]
    pub fn histogram(&self) -> &IqHistogram {
        &self.histogram
    }

    /// Forward FFT of the last block.
    #[must_use]
    pub fn fft_output(&self) -> &[Complex<f32>] {
        &self.fft_output
    }

    /// Exchange sample and histogram buffers with a published frame.
    ///
    /// Both are fully rewritten by the next [`process`](Self::process), so
    /// whatever the frame held before is safe to reuse as working space.
    pub(crate) fn swap_buffers(&mut self, samples: &mut Vec<IqSample>, histogram: &mut IqHistogram) {
        std::mem::swap(&mut self.samples, samples);
        std::mem::swap(&mut self.histogram, histogram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(pairs: &[(u8, u8)]) -> Vec<u8> {
        pairs.iter().flat_map(|&(i, q)| [i, q]).collect()
    }

    #[test]
    fn test_rtlsdr_bytes_used_directly() {
        let mut processor = SampleProcessor::new(2, 4);
        let pairs = processor.process(&block(&[(0, 64), (128, 255), (10, 20), (30, 40)]), BackendKind::RtlSdr);

        assert_eq!(pairs, 4);
        let s = processor.samples();
        assert_eq!(s[0], IqSample { i: 0.0, q: 0.25, t: 0.0 });
        assert_eq!(s[1], IqSample { i: 0.5, q: 255.0 / 256.0, t: 0.25 });
        assert_eq!(s[3].t, 0.75);
    }

    #[test]
    fn test_offset_bytes_are_recentered() {
        let mut processor = SampleProcessor::new(2, 2);
        processor.process(&block(&[(0, 128), (255, 64)]), BackendKind::HackRf);

        let s = processor.samples();
        assert_eq!((s[0].i, s[0].q), (0.5, 0.0));
        assert_eq!((s[1].i, s[1].q), (127.0 / 256.0, 0.75));
    }

    #[test]
    fn test_histogram_counts_raw_pairs() {
        let mut processor = SampleProcessor::new(2, 8);
        let input = block(&[(0, 0), (0, 0), (255, 1), (3, 4), (255, 1)]);
        let pairs = processor.process(&input, BackendKind::Dummy);

        let h = processor.histogram();
        assert_eq!(h.total(), pairs as u64);
        // keyed by the raw bytes, not the recentered ones
        assert_eq!(h.count(0, 0), 2);
        assert_eq!(h.count(128, 128), 0);
        assert_eq!(h.count(255, 1), 2);
        assert_eq!(h.count(3, 4), 1);
    }

    #[test]
    fn test_histogram_and_samples_reset_each_block() {
        let mut processor = SampleProcessor::new(2, 4);
        processor.process(&block(&[(9, 9), (9, 9), (9, 9), (9, 9)]), BackendKind::RtlSdr);
        processor.process(&block(&[(1, 2), (3, 4)]), BackendKind::RtlSdr);

        assert_eq!(processor.histogram().total(), 2);
        assert_eq!(processor.histogram().count(9, 9), 0);
        assert_eq!(processor.samples()[2], IqSample::default());
        assert_eq!(processor.samples()[1].t, 0.5);
    }

    #[test]
    fn test_fft_input_ignores_recentering() {
        // A constant raw block has all its energy in bin 0.
        let mut processor = SampleProcessor::new(4, 4);
        processor.process(&block(&[(255, 0); 4]), BackendKind::Dummy);

        let out = processor.fft_output();
        assert!((out[0].re - 4.0).abs() < 1e-5);
        assert!(out[0].im.abs() < 1e-5);
        for bin in &out[1..] {
            assert!(bin.norm() < 1e-5);
        }
    }

    #[test]
    fn test_fft_uses_only_first_fft_size_pairs() {
        let mut processor = SampleProcessor::new(2, 4);
        processor.process(&block(&[(0, 0), (0, 0), (255, 255), (255, 255)]), BackendKind::RtlSdr);

        assert!(processor.fft_output().iter().all(|c| c.norm() < 1e-6));
    }

    #[test]
    fn test_all_zero_block_gives_zero_spectrum() {
        let mut processor = SampleProcessor::new(8, 16);
        processor.process(&[0u8; 32], BackendKind::Dummy);

        assert!(processor.fft_output().iter().all(|c| c.norm() == 0.0));
    }

    #[test]
    fn test_swap_buffers_exchanges_published_frame() {
        let mut processor = SampleProcessor::new(2, 2);
        processor.process(&block(&[(1, 1), (2, 2)]), BackendKind::RtlSdr);

        let mut samples = vec![IqSample::default(); 2];
        let mut histogram = IqHistogram::new();
        processor.swap_buffers(&mut samples, &mut histogram);

        assert_eq!(histogram.total(), 2);
        assert_eq!(samples[1].t, 0.5);
        assert_eq!(processor.histogram().total(), 0);
    }
}
