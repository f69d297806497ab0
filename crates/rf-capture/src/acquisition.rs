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

//! Acquisition loop: read a block, process it, publish it, repeat.
//!
//! The loop runs on the device's dedicated thread and owns the backend and
//! the sample processor. Consumers only see [`Frame`]s that were published
//! after a block finished processing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};

use crate::backend::{Backend, BackendKind};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result};
use crate::processor::{IqHistogram, IqSample, SampleProcessor};
use crate::waterfall::WaterfallHistory;

/// Blocks between periodic throughput log lines.
const STATS_INTERVAL: u64 = 100;

/// The consumer-visible result of the most recent block.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Normalized IQ samples of the last block
    pub samples: Vec<IqSample>,
    /// Raw byte-pair histogram of the last block
    pub histogram: IqHistogram,
    /// FFT rows, newest first
    pub waterfall: WaterfallHistory,
    /// Number of blocks published so far
    pub blocks: u64,
}

impl Frame {
    pub(crate) fn new(config: &DeviceConfig) -> Self {
        Self {
            samples: vec![IqSample::default(); config.pairs_per_block()],
            histogram: IqHistogram::new(),
            waterfall: WaterfallHistory::new(config.fft_size, config.history_size),
            blocks: 0,
        }
    }
}

/// State shared between the device handle and its acquisition thread.
#[derive(Debug)]
pub(crate) struct Shared {
    receiving: AtomicBool,
    frequency_bits: AtomicU64,
    blocks: AtomicU64,
    frame: Mutex<Frame>,
}

impl Shared {
    pub(crate) fn new(config: &DeviceConfig, frequency_mhz: f64) -> Self {
        Self {
            receiving: AtomicBool::new(false),
            frequency_bits: AtomicU64::new(frequency_mhz.to_bits()),
            blocks: AtomicU64::new(0),
            frame: Mutex::new(Frame::new(config)),
        }
    }

    pub(crate) fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::SeqCst)
    }

    pub(crate) fn start_receiving(&self) {
        self.receiving.store(true, Ordering::SeqCst);
    }

    /// Clear `receiving`. Returns whether this call made the transition.
    pub(crate) fn stop_receiving(&self) -> bool {
        self.receiving.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn frequency_mhz(&self) -> f64 {
        f64::from_bits(self.frequency_bits.load(Ordering::SeqCst))
    }

    fn set_frequency_mhz(&self, frequency_mhz: f64) {
        self.frequency_bits.store(frequency_mhz.to_bits(), Ordering::SeqCst);
    }

    pub(crate) fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::SeqCst)
    }

    pub(crate) fn lock_frame(&self) -> MutexGuard<'_, Frame> {
        // A panicking consumer must not take the producer down with it.
        self.frame.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Control requests handled by the loop between blocks.
#[derive(Debug)]
pub(crate) enum Command {
    Retune {
        frequency_mhz: f64,
        reply: Sender<Result<()>>,
    },
}

/// Totals reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Blocks processed
    pub blocks: u64,
    /// IQ pairs processed
    pub pairs: u64,
}

pub(crate) struct AcquisitionLoop {
    backend: Box<dyn Backend>,
    kind: BackendKind,
    processor: SampleProcessor,
    shared: std::sync::Arc<Shared>,
    commands: Receiver<Command>,
}

impl AcquisitionLoop {
    pub(crate) fn new(
        backend: Box<dyn Backend>,
        processor: SampleProcessor,
        shared: std::sync::Arc<Shared>,
        commands: Receiver<Command>,
    ) -> Self {
        let kind = backend.kind();
        Self {
            backend,
            kind,
            processor,
            shared,
            commands,
        }
    }

    /// Run until `receiving` is cleared or the backend fails.
    ///
    /// The backend is always stopped before this returns. A fatal error is
    /// returned to the device owner rather than ending the process.
    pub(crate) fn run(mut self) -> Result<LoopSummary> {
        info!("{} acquisition loop started (thread: {:?})", self.kind, std::thread::current().id());

        let result = self.stream();
        self.shared.stop_receiving();
        self.reject_pending();

        if let Err(e) = self.backend.stop() {
            warn!("Failed to stop {}: {e}", self.kind);
        }

        match &result {
            Ok(summary) => info!(
                "{} acquisition loop exited after {} blocks ({} IQ pairs)",
                self.kind, summary.blocks, summary.pairs
            ),
            Err(e) => error!("{} acquisition loop terminated: {e}", self.kind),
        }
        result
    }

    fn stream(&mut self) -> Result<LoopSummary> {
        let mut summary = LoopSummary::default();

        while self.shared.is_receiving() {
            self.apply_commands()?;

            let block = self.backend.read_block()?;
            let pairs = self.processor.process(block, self.kind);
            self.publish();

            summary.blocks += 1;
            summary.pairs += pairs as u64;
            if summary.blocks % STATS_INTERVAL == 0 {
                debug!(
                    "{} block #{}: {} IQ pairs, {:.3} MHz",
                    self.kind,
                    summary.blocks,
                    pairs,
                    self.shared.frequency_mhz()
                );
            }
        }

        Ok(summary)
    }

    fn apply_commands(&mut self) -> Result<()> {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Retune { frequency_mhz, reply } => match self.backend.retune(frequency_mhz) {
                    Ok(()) => {
                        self.shared.set_frequency_mhz(frequency_mhz);
                        info!("{} retuned to {frequency_mhz:.3} MHz", self.kind);
                        let _ = reply.send(Ok(()));
                    }
                    Err(DeviceError::HardwareFatal { backend, reason }) => {
                        let _ = reply.send(Err(DeviceError::HardwareFatal {
                            backend,
                            reason: reason.clone(),
                        }));
                        return Err(DeviceError::HardwareFatal { backend, reason });
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                },
            }
        }
        Ok(())
    }

    /// Hand the finished block to consumers.
    fn publish(&mut self) {
        let mut frame = self.shared.lock_frame();
        let Frame {
            samples,
            histogram,
            waterfall,
            blocks,
        } = &mut *frame;
        self.processor.swap_buffers(samples, histogram);
        waterfall.push_row(self.processor.fft_output());
        *blocks += 1;
        drop(frame);
        self.shared.blocks.fetch_add(1, Ordering::SeqCst);
    }

    fn reject_pending(&self) {
        for command in self.commands.try_iter() {
            let Command::Retune { reply, .. } = command;
            let _ = reply.send(Err(DeviceError::NotReceiving));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::*;

    /// Serves queued blocks, then fails with a short read.
    struct QueuedBackend {
        blocks: VecDeque<Vec<u8>>,
        current: Vec<u8>,
        stopped: Arc<AtomicBool>,
    }

    impl Backend for QueuedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::RtlSdr
        }

        fn read_block(&mut self) -> Result<&[u8]> {
            self.current = self
                .blocks
                .pop_front()
                .ok_or_else(|| DeviceError::fatal(BackendKind::RtlSdr, "short read"))?;
            Ok(&self.current)
        }

        fn retune(&mut self, _frequency_mhz: f64) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn small_config() -> DeviceConfig {
        DeviceConfig {
            fft_size: 2,
            history_size: 3,
            block_len: 8,
            ..Default::default()
        }
    }

    #[test]
    fn test_fatal_read_ends_loop_and_stops_backend() {
        let config = small_config();
        let shared = Arc::new(Shared::new(&config, 100.0));
        shared.start_receiving();
        let stopped = Arc::new(AtomicBool::new(false));
        let backend = QueuedBackend {
            blocks: VecDeque::from(vec![vec![1; 8], vec![2; 8]]),
            current: Vec::new(),
            stopped: stopped.clone(),
        };
        let (_tx, rx) = crossbeam_channel::unbounded();
        let processor = SampleProcessor::new(config.fft_size, config.pairs_per_block());

        let result = AcquisitionLoop::new(Box::new(backend), processor, shared.clone(), rx).run();

        assert!(matches!(result, Err(DeviceError::HardwareFatal { .. })));
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!shared.is_receiving());
        assert_eq!(shared.blocks(), 2);

        let frame = shared.lock_frame();
        assert_eq!(frame.blocks, 2);
        assert_eq!(frame.histogram.count(2, 2), 4);
        assert_eq!(frame.waterfall.depth(), 3);
    }

    #[test]
    fn test_pending_retune_rejected_after_exit() {
        let config = small_config();
        let shared = Arc::new(Shared::new(&config, 100.0));
        let (tx, rx) = crossbeam_channel::unbounded();
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        tx.send(Command::Retune {
            frequency_mhz: 99.0,
            reply: reply_tx,
        })
        .unwrap();

        let backend = QueuedBackend {
            blocks: VecDeque::new(),
            current: Vec::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        };
        let processor = SampleProcessor::new(config.fft_size, config.pairs_per_block());
        // receiving was never set, so the loop exits immediately
        let result = AcquisitionLoop::new(Box::new(backend), processor, shared.clone(), rx).run();

        assert_eq!(result.unwrap(), LoopSummary::default());
        assert!(matches!(reply_rx.recv().unwrap(), Err(DeviceError::NotReceiving)));
        assert_eq!(shared.frequency_mhz(), 100.0);
    }
}
