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

//! Device lifecycle: backend fallback, retuning and teardown.
//!
//! A [`Device`] owns every buffer it uses and exactly one acquisition
//! thread. Creation tries each backend opener in priority order on a fresh
//! thread; the first one that opens keeps its thread as the acquisition loop.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{error, info, warn};

use crate::acquisition::{AcquisitionLoop, Command, Frame, LoopSummary, Shared};
use crate::backend::{default_openers, BackendKind, BackendOpener};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result};
use crate::processor::SampleProcessor;
use crate::waterfall::FftBin;

/// How often a pending retune checks whether the loop is still alive.
const REPLY_POLL: Duration = Duration::from_millis(50);

type OpenResult = std::result::Result<(), (DeviceError, SampleProcessor)>;

/// Outcome of one backend attempt.
enum Attempt {
    Streaming(JoinHandle<Result<LoopSummary>>),
    Failed(DeviceError, SampleProcessor),
}

/// A capture device bound to one backend.
pub struct Device {
    kind: BackendKind,
    config: DeviceConfig,
    shared: Arc<Shared>,
    commands: Sender<Command>,
    thread: Option<JoinHandle<Result<LoopSummary>>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("kind", &self.kind)
            .field("frequency_mhz", &self.frequency_mhz())
            .field("receiving", &self.is_receiving())
            .field("blocks", &self.blocks_processed())
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Start receiving at `frequency_mhz` with the default configuration.
    ///
    /// Tries RTL-SDR, then HackRF, then falls back to playing back
    /// `fallback_file` (or silence).
    pub fn create(frequency_mhz: f64, fallback_file: Option<&Path>) -> Result<Self> {
        Self::create_with_config(DeviceConfig::default(), frequency_mhz, fallback_file)
    }

    /// Like [`Device::create`] with an explicit configuration.
    pub fn create_with_config(
        config: DeviceConfig,
        frequency_mhz: f64,
        fallback_file: Option<&Path>,
    ) -> Result<Self> {
        let openers = default_openers(fallback_file.map(Path::to_path_buf));
        Self::create_with_openers(config, frequency_mhz, openers)
    }

    /// Create a device from an explicit, ordered list of backend openers.
    ///
    /// The first opener that succeeds becomes the active backend. Open
    /// failures, and failures to spawn an attempt's thread, fall through to
    /// the next opener. A spawn failure on the last opener is returned as
    /// is; otherwise if every opener fails the last error is returned.
    pub fn create_with_openers(
        config: DeviceConfig,
        frequency_mhz: f64,
        openers: Vec<BackendOpener>,
    ) -> Result<Self> {
        config.validate()?;

        let processor = SampleProcessor::new(config.fft_size, config.pairs_per_block());
        let shared = Arc::new(Shared::new(&config, frequency_mhz));
        let (command_tx, command_rx) = crossbeam_channel::unbounded();

        let (kind, thread) = select_backend(openers, processor, |opener, processor| {
            spawn_attempt(opener, processor, &config, frequency_mhz, &shared, &command_rx)
        })?;

        info!("{kind} backend active");
        Ok(Self {
            kind,
            config,
            shared,
            commands: command_tx,
            thread: Some(thread),
        })
    }

    /// Retune to `frequency_mhz`.
    ///
    /// For RTL-SDR and HackRF this waits until the acquisition thread has
    /// applied the new frequency (at most one block later). Dummy playback
    /// has no tuner: the call is a no-op that returns `Ok` and leaves the
    /// reported frequency unchanged. Frequencies are not validated.
    pub fn retune(&self, frequency_mhz: f64) -> Result<()> {
        if self.kind == BackendKind::Dummy {
            warn!("Ignoring retune to {frequency_mhz:.3} MHz: dummy playback has no tuner");
            return Ok(());
        }
        if !self.is_receiving() {
            return Err(DeviceError::NotReceiving);
        }

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.commands
            .send(Command::Retune {
                frequency_mhz,
                reply: reply_tx,
            })
            .map_err(|_| DeviceError::NotReceiving)?;
        self.wait_reply(&reply_rx)
    }

    fn wait_reply(&self, reply_rx: &Receiver<Result<()>>) -> Result<()> {
        loop {
            match reply_rx.recv_timeout(REPLY_POLL) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Disconnected) => return Err(DeviceError::NotReceiving),
                Err(RecvTimeoutError::Timeout) => {
                    let finished = self.thread.as_ref().map_or(true, JoinHandle::is_finished);
                    if finished {
                        return reply_rx.try_recv().unwrap_or(Err(DeviceError::NotReceiving));
                    }
                }
            }
        }
    }

    /// Stop receiving, join the acquisition thread and release everything.
    ///
    /// The backend is stopped on its own thread before the join returns.
    /// Returns the loop's summary, or the fatal streaming error that ended
    /// it early. Safe to call when streaming already stopped.
    pub fn destroy(mut self) -> Result<LoopSummary> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<LoopSummary> {
        let Some(thread) = self.thread.take() else {
            return Ok(LoopSummary::default());
        };
        if self.shared.stop_receiving() {
            info!("Stopping {} device", self.kind);
        }
        match thread.join() {
            Ok(result) => result,
            Err(_) => Err(DeviceError::fatal(self.kind, "acquisition thread panicked")),
        }
    }

    /// The active backend.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Currently tuned frequency in MHz.
    #[must_use]
    pub fn frequency_mhz(&self) -> f64 {
        self.shared.frequency_mhz()
    }

    /// Whether the acquisition loop is still running.
    #[must_use]
    pub fn is_receiving(&self) -> bool {
        self.shared.is_receiving()
    }

    /// Number of blocks published since creation.
    #[must_use]
    pub fn blocks_processed(&self) -> u64 {
        self.shared.blocks()
    }

    /// Run `f` against the latest published frame.
    ///
    /// The producer is held off while `f` runs, so keep it short. Do not call
    /// [`Device::retune`] from inside `f`: the acquisition thread applies
    /// retunes only after publishing, which waits for `f` to return, so the
    /// call deadlocks.
    pub fn read_frame<R>(&self, f: impl FnOnce(&Frame) -> R) -> R {
        f(&self.shared.lock_frame())
    }

    /// Copy of the newest waterfall row.
    #[must_use]
    pub fn latest_row(&self) -> Vec<FftBin> {
        self.read_frame(|frame| frame.waterfall.row(0).to_vec())
    }

    /// Row-major grayscale export of the whole waterfall history.
    #[must_use]
    pub fn waterfall_gray(&self, scale: f32) -> Vec<u8> {
        self.read_frame(|frame| frame.waterfall.export_gray(scale))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("{} device stopped with error: {e}", self.kind);
        }
    }
}

/// Walk `openers` in order until one attempt starts streaming.
///
/// `attempt` hands the processor back when an open fails. A spawn error
/// loses it, so the FFT is re-planned before trying the next opener.
fn select_backend(
    openers: Vec<BackendOpener>,
    mut processor: SampleProcessor,
    mut attempt: impl FnMut(BackendOpener, SampleProcessor) -> Result<Attempt>,
) -> Result<(BackendKind, JoinHandle<Result<LoopSummary>>)> {
    let (fft_size, max_pairs) = (processor.fft_size(), processor.samples().len());
    let count = openers.len();
    let mut last_error = None;

    for (position, opener) in openers.into_iter().enumerate() {
        let kind = opener.kind();
        match attempt(opener, processor) {
            Ok(Attempt::Streaming(thread)) => return Ok((kind, thread)),
            Ok(Attempt::Failed(e, returned)) => {
                warn!("{e}");
                processor = returned;
                last_error = Some(e);
            }
            Err(e) if position + 1 < count => {
                warn!("{kind} attempt skipped: {e}");
                processor = SampleProcessor::new(fft_size, max_pairs);
                last_error = Some(e);
            }
            Err(e) => {
                error!("{kind} attempt failed: {e}");
                return Err(e);
            }
        }
    }

    error!("No backend could be started");
    Err(last_error.unwrap_or_else(|| DeviceError::Configuration("no backend openers supplied".into())))
}

/// Open one backend on a new thread and wait for the result.
///
/// On success the thread carries on as the acquisition loop. On failure the
/// processor comes back over the handshake channel so the FFT plan is reused
/// by the next attempt.
fn spawn_attempt(
    opener: BackendOpener,
    processor: SampleProcessor,
    config: &DeviceConfig,
    frequency_mhz: f64,
    shared: &Arc<Shared>,
    commands: &Receiver<Command>,
) -> Result<Attempt> {
    let kind = opener.kind();
    info!("Trying {kind} backend at {frequency_mhz:.3} MHz");
    let (init_tx, init_rx) = crossbeam_channel::bounded::<OpenResult>(1);
    let thread_config = config.clone();
    let thread_shared = Arc::clone(shared);
    let thread_commands = commands.clone();

    let thread = std::thread::Builder::new()
        .name(format!("rf-{}", kind.name().to_lowercase().replace(' ', "-")))
        .spawn(move || {
            let backend = match opener.open(&thread_config, frequency_mhz) {
                Ok(backend) => backend,
                Err(e) => {
                    let _ = init_tx.send(Err((e, processor)));
                    return Ok(LoopSummary::default());
                }
            };
            thread_shared.start_receiving();
            let _ = init_tx.send(Ok(()));
            AcquisitionLoop::new(backend, processor, thread_shared, thread_commands).run()
        })
        .map_err(DeviceError::Spawn)?;

    match init_rx.recv() {
        Ok(Ok(())) => Ok(Attempt::Streaming(thread)),
        Ok(Err((e, processor))) => {
            let _ = thread.join();
            Ok(Attempt::Failed(e, processor))
        }
        Err(_) => {
            // The open step panicked and took the processor with it.
            let _ = thread.join();
            warn!("{kind} open panicked, re-planning FFT");
            Ok(Attempt::Failed(
                DeviceError::open(kind, "open panicked"),
                SampleProcessor::new(config.fft_size, config.pairs_per_block()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::backend::{Backend, DummyBackend};

    fn small_config() -> DeviceConfig {
        DeviceConfig {
            fft_size: 4,
            history_size: 3,
            block_len: 16,
            playback_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn wait_for_blocks(device: &Device, blocks: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while device.blocks_processed() < blocks {
            assert!(Instant::now() < deadline, "timed out waiting for blocks");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn failing(kind: BackendKind) -> BackendOpener {
        BackendOpener::new(kind, move |_, _| Err(DeviceError::open(kind, "not present")))
    }

    fn dummy() -> BackendOpener {
        BackendOpener::new(BackendKind::Dummy, |config, _| {
            Ok(Box::new(DummyBackend::silent(config)?) as Box<dyn Backend>)
        })
    }

    #[test]
    fn test_falls_back_to_dummy() {
        let openers = vec![failing(BackendKind::RtlSdr), failing(BackendKind::HackRf), dummy()];
        let device = Device::create_with_openers(small_config(), 100.0, openers).unwrap();

        assert_eq!(device.kind(), BackendKind::Dummy);
        assert!(device.is_receiving());
        wait_for_blocks(&device, 1);
        assert!(device.destroy().is_ok());
    }

    #[test]
    fn test_all_openers_fail() {
        let openers = vec![failing(BackendKind::RtlSdr), failing(BackendKind::HackRf)];
        let err = Device::create_with_openers(small_config(), 100.0, openers).unwrap_err();

        assert!(matches!(
            err,
            DeviceError::HardwareOpen {
                backend: BackendKind::HackRf,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_config_rejected_before_open() {
        let config = DeviceConfig {
            block_len: 7,
            ..small_config()
        };
        let err = Device::create_with_openers(config, 100.0, vec![dummy()]).unwrap_err();
        assert!(matches!(err, DeviceError::Configuration(_)));
    }

    #[test]
    fn test_dummy_retune_is_noop() {
        let device = Device::create_with_openers(small_config(), 88.5, vec![dummy()]).unwrap();

        assert!(device.retune(105.2).is_ok());
        assert_eq!(device.frequency_mhz(), 88.5);
        assert!(device.is_receiving());
        device.destroy().unwrap();
    }

    #[test]
    fn test_buffers_have_configured_sizes() {
        let config = small_config();
        let device = Device::create_with_openers(config.clone(), 100.0, vec![dummy()]).unwrap();
        wait_for_blocks(&device, 2);

        device.read_frame(|frame| {
            assert_eq!(frame.samples.len(), config.pairs_per_block());
            assert_eq!(frame.histogram.as_slice().len(), 256 * 256);
            assert_eq!(frame.waterfall.depth(), config.history_size);
            assert_eq!(frame.waterfall.fft_size(), config.fft_size);
        });
        assert_eq!(device.latest_row().len(), config.fft_size);
        assert_eq!(device.waterfall_gray(2.0).len(), config.fft_size * config.history_size);
        device.destroy().unwrap();
    }

    #[test]
    fn test_drop_stops_thread() {
        let device = Device::create_with_openers(small_config(), 100.0, vec![dummy()]).unwrap();
        let shared = Arc::clone(&device.shared);
        drop(device);
        assert!(!shared.is_receiving());
    }

    fn spawn_error() -> DeviceError {
        DeviceError::Spawn(std::io::Error::other("thread limit reached"))
    }

    #[test]
    fn test_spawn_failure_falls_through_to_next_backend() {
        let openers = vec![failing(BackendKind::RtlSdr), failing(BackendKind::HackRf), dummy()];
        let processor = SampleProcessor::new(4, 8);
        let mut tried = Vec::new();

        let (kind, thread) = select_backend(openers, processor, |opener, processor| {
            tried.push(opener.kind());
            match opener.kind() {
                BackendKind::RtlSdr => Err(spawn_error()),
                BackendKind::HackRf => {
                    assert_eq!(processor.fft_size(), 4);
                    Ok(Attempt::Failed(DeviceError::open(BackendKind::HackRf, "not present"), processor))
                }
                BackendKind::Dummy => Ok(Attempt::Streaming(std::thread::spawn(|| Ok(LoopSummary::default())))),
            }
        })
        .unwrap();

        assert_eq!(kind, BackendKind::Dummy);
        assert_eq!(tried, BackendKind::PRIORITY);
        assert!(thread.join().unwrap().is_ok());
    }

    #[test]
    fn test_spawn_failure_on_last_backend_is_fatal() {
        let openers = vec![failing(BackendKind::RtlSdr), dummy()];
        let processor = SampleProcessor::new(4, 8);

        let err = select_backend(openers, processor, |opener, processor| match opener.kind() {
            BackendKind::Dummy => Err(spawn_error()),
            kind => Ok(Attempt::Failed(DeviceError::open(kind, "not present"), processor)),
        })
        .unwrap_err();

        assert!(matches!(err, DeviceError::Spawn(_)));
    }

    /// Hardware-kind backend serving zero blocks.
    struct ZeroTuner(Vec<u8>);

    impl Backend for ZeroTuner {
        fn kind(&self) -> BackendKind {
            BackendKind::RtlSdr
        }

        fn read_block(&mut self) -> Result<&[u8]> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(&self.0)
        }

        fn retune(&mut self, _frequency_mhz: f64) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_retune_after_read_frame_returns() {
        let opener = BackendOpener::new(BackendKind::RtlSdr, |config, _| {
            Ok(Box::new(ZeroTuner(vec![0; config.block_len])) as Box<dyn Backend>)
        });
        let device = Device::create_with_openers(small_config(), 100.0, vec![opener]).unwrap();
        wait_for_blocks(&device, 1);

        // retune only once the frame guard is released
        let blocks = device.read_frame(|frame| frame.blocks);
        device.retune(101.5).unwrap();

        assert!(blocks >= 1);
        assert_eq!(device.frequency_mhz(), 101.5);
        device.destroy().unwrap();
    }
}
