//! Block dispatcher — the read/advance/dispatch loop.
//!
//! ## Loop (per iteration)
//!
//! ```text
//! 1. Apply any pending geometry change (external reconfiguration)
//! 2. Retain the trailing `overlap` samples, read `block - overlap` new ones
//! 3. On a short final read: zero-pad and mark the event `last`
//! 4. Build an AudioEvent (timestamp from cumulative samples consumed)
//! 5. Invoke every chain unit in registration order; `Flow::Stop`
//!    short-circuits the rest of the chain and ends the run
//! 6. Adopt geometry the chain mutated on the event for the next iteration
//! ```
//!
//! On every termination path — end of stream, stop request, fatal source or
//! processor error — each chain unit receives exactly one `finish()`
//! notification, in chain order, before the error (if any) surfaces.
//!
//! ## Threading
//!
//! One execution context drives a given dispatcher; units are invoked
//! strictly sequentially. `run()` blocks the caller; `start()` moves the
//! dispatcher onto a dedicated worker thread and returns a handle. The
//! [`DispatcherController`] is the only cross-thread surface: `stop()` takes
//! effect at the end of the in-flight block, geometry changes at the next
//! read.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::{CadenzaError, Result},
    event::AudioEvent,
    processor::{AudioProcessor, Flow},
    source::{SampleSource, SilenceSource},
};

/// (block length, overlap) pair describing the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub block_length: usize,
    pub overlap: usize,
}

impl WindowGeometry {
    pub fn new(block_length: usize, overlap: usize) -> Self {
        Self {
            block_length,
            overlap,
        }
    }

    /// Enforces `0 <= overlap < block_length`.
    pub fn validate(&self) -> Result<()> {
        if self.block_length == 0 || self.overlap >= self.block_length {
            return Err(CadenzaError::Configuration(format!(
                "overlap {} must be smaller than block length {}",
                self.overlap, self.block_length
            )));
        }
        Ok(())
    }
}

pub struct DispatcherDiagnostics {
    pub blocks_dispatched: AtomicU64,
    pub samples_consumed: AtomicU64,
    pub reconfigurations: AtomicU64,
}

impl Default for DispatcherDiagnostics {
    fn default() -> Self {
        Self {
            blocks_dispatched: AtomicU64::new(0),
            samples_consumed: AtomicU64::new(0),
            reconfigurations: AtomicU64::new(0),
        }
    }
}

impl DispatcherDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_dispatched: self.blocks_dispatched.load(Ordering::Relaxed),
            samples_consumed: self.samples_consumed.load(Ordering::Relaxed),
            reconfigurations: self.reconfigurations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub blocks_dispatched: u64,
    pub samples_consumed: u64,
    pub reconfigurations: u64,
}

type Chain = Arc<Mutex<Vec<Box<dyn AudioProcessor>>>>;

/// Cloneable cross-thread control surface for a running dispatcher.
#[derive(Clone)]
pub struct DispatcherController {
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    pending: Arc<Mutex<Option<WindowGeometry>>>,
    chain: Chain,
}

impl DispatcherController {
    /// Request termination after the in-flight block completes. Idempotent.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Change the window geometry, effective on the next read. Rejected
    /// before taking effect when `overlap >= block_length`.
    pub fn set_step_size_and_overlap(&self, block_length: usize, overlap: usize) -> Result<()> {
        let geometry = WindowGeometry::new(block_length, overlap);
        geometry.validate()?;
        *self.pending.lock() = Some(geometry);
        Ok(())
    }

    /// Append a unit to the chain. During a run the unit sees events from
    /// the next block onward — the driver reads the chain once per event.
    pub fn add_processor(&self, processor: Box<dyn AudioProcessor>) {
        self.chain.lock().push(processor);
    }
}

/// Drives the sliding window over a [`SampleSource`] and owns the chain.
pub struct BlockDispatcher {
    source: Box<dyn SampleSource>,
    sample_rate: u32,
    geometry: WindowGeometry,
    zero_pad_final: bool,
    chain: Chain,
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    pending: Arc<Mutex<Option<WindowGeometry>>>,
    diagnostics: Arc<DispatcherDiagnostics>,
}

impl BlockDispatcher {
    /// Create a dispatcher over `source`.
    ///
    /// # Errors
    /// `CadenzaError::Configuration` when `overlap >= block_length`.
    pub fn new<S: SampleSource + 'static>(
        source: S,
        sample_rate: u32,
        block_length: usize,
        overlap: usize,
    ) -> Result<Self> {
        let geometry = WindowGeometry::new(block_length, overlap);
        geometry.validate()?;
        Ok(Self {
            source: Box::new(source),
            sample_rate,
            geometry,
            zero_pad_final: true,
            chain: Arc::new(Mutex::new(Vec::new())),
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Mutex::new(None)),
            diagnostics: Arc::new(DispatcherDiagnostics::default()),
        })
    }

    /// A dispatcher over endless silence: the synthesis entry point. Chain
    /// generator units produce the signal.
    pub fn generator(sample_rate: u32, block_length: usize, overlap: usize) -> Result<Self> {
        Self::new(SilenceSource, sample_rate, block_length, overlap)
    }

    /// Whether an incomplete final window is zero-padded and dispatched
    /// (default) or silently skipped.
    pub fn zero_pad_final_block(mut self, enabled: bool) -> Self {
        self.zero_pad_final = enabled;
        self
    }

    pub fn add_processor(&self, processor: Box<dyn AudioProcessor>) {
        self.chain.lock().push(processor);
    }

    pub fn controller(&self) -> DispatcherController {
        DispatcherController {
            stop_requested: Arc::clone(&self.stop_requested),
            running: Arc::clone(&self.running),
            pending: Arc::clone(&self.pending),
            chain: Arc::clone(&self.chain),
        }
    }

    /// See [`DispatcherController::stop`].
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// See [`DispatcherController::set_step_size_and_overlap`].
    pub fn set_step_size_and_overlap(&self, block_length: usize, overlap: usize) -> Result<()> {
        self.controller().set_step_size_and_overlap(block_length, overlap)
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Run the dispatch loop on the calling thread until the source is
    /// exhausted, a unit returns [`Flow::Stop`], or a stop is requested.
    ///
    /// A call while a run is in progress returns `AlreadyRunning`. Calling
    /// again after completion starts a fresh run over whatever the source
    /// still yields, with its own round of finish notifications.
    pub fn run(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CadenzaError::AlreadyRunning);
        }
        let outcome = self.run_loop();

        // Finish notifications fire on every termination path, before the
        // error (if any) surfaces to the caller.
        for unit in self.chain.lock().iter_mut() {
            unit.finish();
        }
        self.source.close();
        self.running.store(false, Ordering::SeqCst);

        let snap = self.diagnostics.snapshot();
        info!(
            blocks_dispatched = snap.blocks_dispatched,
            samples_consumed = snap.samples_consumed,
            reconfigurations = snap.reconfigurations,
            ok = outcome.is_ok(),
            "dispatcher stopped"
        );
        outcome
    }

    /// Run on a dedicated worker thread; control through the returned
    /// handle (or any [`DispatcherController`] taken beforehand).
    pub fn start(mut self) -> Result<DispatcherHandle> {
        let controller = self.controller();
        let join = std::thread::Builder::new()
            .name("cadenza-dispatcher".into())
            .spawn(move || self.run())
            .map_err(|e| CadenzaError::Other(e.into()))?;
        Ok(DispatcherHandle {
            controller,
            join: Some(join),
        })
    }

    fn run_loop(&mut self) -> Result<()> {
        info!(
            sample_rate = self.sample_rate,
            block_length = self.geometry.block_length,
            overlap = self.geometry.overlap,
            "dispatcher started"
        );

        // Contents of the previous block (post-chain, so member mutations
        // propagate into the next window's retained region).
        let mut window: Vec<f32> = Vec::new();
        let mut prev_start: u64 = 0;
        let mut first = true;

        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                debug!("stop requested — ending run");
                return Ok(());
            }

            // External reconfiguration binds at the read boundary and takes
            // precedence over an in-chain mutation from the previous block.
            if let Some(geometry) = self.pending.lock().take() {
                debug!(
                    block_length = geometry.block_length,
                    overlap = geometry.overlap,
                    "window geometry reconfigured"
                );
                self.geometry = geometry;
                self.diagnostics
                    .reconfigurations
                    .fetch_add(1, Ordering::Relaxed);
            }
            let geometry = self.geometry;

            let mut block = vec![0.0f32; geometry.block_length];
            let retained = if first {
                0
            } else {
                geometry.overlap.min(window.len())
            };
            if retained > 0 {
                block[..retained].copy_from_slice(&window[window.len() - retained..]);
            }
            let block_start = if first {
                0
            } else {
                prev_start + (window.len() - retained) as u64
            };

            let wanted = geometry.block_length - retained;
            let got = self
                .source
                .read(&mut block[retained..])
                .map_err(|e| CadenzaError::SourceRead(e.to_string()))?;
            self.diagnostics
                .samples_consumed
                .fetch_add(got as u64, Ordering::Relaxed);

            let last = got < wanted;
            if last && (got == 0 || !self.zero_pad_final) {
                // Nothing new to deliver, or padding is disallowed.
                debug!(got, wanted, "source exhausted — skipping partial window");
                return Ok(());
            }
            // On a short read the tail of `block` is already silence.

            let mut event = AudioEvent::new(block, self.sample_rate).with_position(
                block_start,
                retained,
                last,
            );

            let mut stopped = false;
            {
                let mut chain = self.chain.lock();
                for unit in chain.iter_mut() {
                    match unit.process(&mut event) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => {
                            debug!(time = event.time_stamp(), "unit requested stop");
                            stopped = true;
                            break;
                        }
                        Err(e) => {
                            return Err(CadenzaError::Processing(e.to_string()));
                        }
                    }
                }
            }
            self.diagnostics
                .blocks_dispatched
                .fetch_add(1, Ordering::Relaxed);

            // Adopt geometry the chain mutated on the event.
            let mutated = WindowGeometry::new(event.buffer_size(), event.overlap);
            if mutated != geometry {
                match mutated.validate() {
                    Ok(()) => {
                        debug!(
                            block_length = mutated.block_length,
                            overlap = mutated.overlap,
                            "adopting chain-mutated geometry"
                        );
                        self.geometry = mutated;
                    }
                    Err(e) => warn!("ignoring invalid chain-mutated geometry: {e}"),
                }
            }

            prev_start = block_start;
            window = event.into_samples();
            first = false;

            if last || stopped {
                return Ok(());
            }
        }
    }
}

/// Handle to a dispatcher running on its own worker thread.
pub struct DispatcherHandle {
    controller: DispatcherController,
    join: Option<std::thread::JoinHandle<Result<()>>>,
}

impl DispatcherHandle {
    pub fn controller(&self) -> DispatcherController {
        self.controller.clone()
    }

    pub fn stop(&self) {
        self.controller.stop();
    }

    /// Wait for the run to end and surface its result.
    pub fn join(mut self) -> Result<()> {
        match self.join.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| CadenzaError::Processing("dispatcher thread panicked".into()))?,
            None => Ok(()),
        }
    }
}
