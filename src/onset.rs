//! Complex-domain onset detection (Duxbury et al., 2003).
//!
//! Each block is Hann-windowed and transformed; for every bin the phase of
//! the previous two frames predicts the current complex value, and the
//! novelty of a frame is the summed distance between prediction and
//! measurement. Magnitude-only detectors miss "soft" onsets that shift
//! phase without raising energy; the complex distance catches both.
//!
//! Peaks in the novelty curve are picked against a moving median threshold,
//! subject to a minimum inter-onset interval and a silence gate.

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::event::AudioEvent;
use crate::processor::{AudioProcessor, Flow};
use crate::transform::FloatFft;

/// Novelty values considered by the moving threshold.
const NOVELTY_WINDOW: usize = 9;

/// Flux measurement needs two frames of phase history.
const PHASE_HISTORY: u64 = 2;

/// A peak must carry at least this fraction of its frame's spectral
/// magnitude. Filters out the numerical jitter of stationary signals,
/// whose flux is orders of magnitude below the frame energy.
const NOVELTY_FLOOR_RATIO: f32 = 0.05;

/// A detected note onset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnsetEvent {
    /// Position in seconds from the start of the stream.
    pub time: f64,
    /// Raw complex-domain flux of the peak frame.
    pub salience: f32,
}

/// Receives every onset a [`ComplexOnsetDetector`] reports.
pub trait OnsetHandler: Send {
    fn handle_onset(&mut self, onset: OnsetEvent, event: &AudioEvent);
}

impl<F> OnsetHandler for F
where
    F: FnMut(OnsetEvent, &AudioEvent) + Send,
{
    fn handle_onset(&mut self, onset: OnsetEvent, event: &AudioEvent) {
        self(onset, event)
    }
}

/// Forwards onsets to another thread; a closed channel drops them.
impl OnsetHandler for crossbeam_channel::Sender<OnsetEvent> {
    fn handle_onset(&mut self, onset: OnsetEvent, _event: &AudioEvent) {
        let _ = self.send(onset);
    }
}

/// One entry of the trailing novelty window.
#[derive(Clone, Copy)]
struct NoveltyFrame {
    flux: f32,
    /// Summed bin magnitudes, the scale reference for the novelty floor.
    magnitude: f32,
    silent: bool,
}

pub struct ComplexOnsetDetector {
    sample_rate: f32,
    fft: FloatFft,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    /// Previous-frame magnitudes and the phases of the last two frames.
    previous_magnitude: Vec<f32>,
    phase_1: Vec<f32>,
    phase_2: Vec<f32>,
    novelty: Vec<NoveltyFrame>,

    peak_threshold: f32,
    minimum_interval: u64,
    silence_threshold: f64,
    /// Frames discarded at the start while the analysis ramps in.
    warmup_frames: u64,

    frames_seen: u64,
    last_onset_frame: Option<u64>,
    handlers: Vec<Box<dyn OnsetHandler>>,
}

impl ComplexOnsetDetector {
    /// Detector for blocks of `fft_size` samples.
    ///
    /// Defaults: peak threshold 0.3, minimum inter-onset interval 4 frames,
    /// silence gate at -70 dB SPL, one warm-up frame discarded.
    ///
    /// # Errors
    /// `CadenzaError::InvalidLength` unless `fft_size` is a power of two.
    pub fn new(sample_rate: u32, fft_size: usize) -> Result<Self> {
        let fft = FloatFft::new(fft_size)?;
        let half = fft_size / 2;
        Ok(Self {
            sample_rate: sample_rate.max(1) as f32,
            fft,
            window: hann(fft_size),
            buffer: vec![Complex::default(); fft_size],
            previous_magnitude: vec![0.0; half],
            phase_1: vec![0.0; half],
            phase_2: vec![0.0; half],
            novelty: Vec::with_capacity(NOVELTY_WINDOW + 1),
            peak_threshold: 0.3,
            minimum_interval: 4,
            silence_threshold: -70.0,
            warmup_frames: 1,
            frames_seen: 0,
            last_onset_frame: None,
            handlers: Vec::new(),
        })
    }

    pub fn set_peak_threshold(&mut self, threshold: f32) {
        self.peak_threshold = threshold;
    }

    /// Minimum spacing between reported onsets, in frames.
    pub fn set_minimum_interval(&mut self, frames: u64) {
        self.minimum_interval = frames;
    }

    /// Frames below this sound pressure level (dB) never produce onsets.
    pub fn set_silence_threshold(&mut self, db: f64) {
        self.silence_threshold = db;
    }

    /// How many initial frames to discard before reporting onsets. The
    /// first frames carry the ramp-in of the windowed analysis and would
    /// otherwise read as a spurious attack.
    pub fn set_warmup_frames(&mut self, frames: u64) {
        self.warmup_frames = frames;
    }

    pub fn add_handler<H: OnsetHandler + 'static>(&mut self, handler: H) {
        self.handlers.push(Box::new(handler));
    }

    pub fn with_handler<H: OnsetHandler + 'static>(mut self, handler: H) -> Self {
        self.add_handler(handler);
        self
    }

    /// Complex-domain flux of the current frame against the phase-predicted
    /// spectrum, updating the per-bin history. Returns flux and the summed
    /// bin magnitudes.
    fn measure_flux(&mut self, samples: &[f32]) -> (f32, f32) {
        for (bin, (&sample, &weight)) in self.buffer.iter_mut().zip(samples.iter().zip(&self.window))
        {
            *bin = Complex::new(sample * weight, 0.0);
        }
        if self.fft.forward(&mut self.buffer).is_err() {
            return (0.0, 0.0);
        }

        let mut flux = 0.0f32;
        let mut total_magnitude = 0.0f32;
        for (k, bin) in self.buffer[..self.previous_magnitude.len()]
            .iter()
            .enumerate()
        {
            let magnitude = bin.norm();
            let phase = bin.arg();
            let predicted_phase = 2.0 * self.phase_1[k] - self.phase_2[k];
            let previous = self.previous_magnitude[k];

            let distance_squared = previous * previous + magnitude * magnitude
                - 2.0 * previous * magnitude * (phase - predicted_phase).cos();
            flux += distance_squared.max(0.0).sqrt();
            total_magnitude += magnitude;

            self.phase_2[k] = self.phase_1[k];
            self.phase_1[k] = phase;
            self.previous_magnitude[k] = magnitude;
        }
        (flux, total_magnitude)
    }

    fn ensure_size(&mut self, len: usize) -> Result<()> {
        if len == self.fft.size() {
            return Ok(());
        }
        // A reconfigured dispatcher changes the block length mid-stream.
        let fft = FloatFft::new(len)?;
        debug!(old = self.fft.size(), new = len, "onset detector resized");
        let half = len / 2;
        self.fft = fft;
        self.window = hann(len);
        self.buffer = vec![Complex::default(); len];
        self.previous_magnitude = vec![0.0; half];
        self.phase_1 = vec![0.0; half];
        self.phase_2 = vec![0.0; half];
        self.novelty.clear();
        self.frames_seen = 0;
        self.last_onset_frame = None;
        Ok(())
    }
}

impl AudioProcessor for ComplexOnsetDetector {
    fn process(&mut self, event: &mut AudioEvent) -> Result<Flow> {
        self.ensure_size(event.buffer_size())?;

        let (flux, magnitude) = self.measure_flux(event.samples());
        self.novelty.push(NoveltyFrame {
            flux,
            magnitude,
            silent: event.is_silence(self.silence_threshold),
        });
        if self.novelty.len() > NOVELTY_WINDOW {
            self.novelty.remove(0);
        }
        self.frames_seen += 1;

        // Candidate peak is the previous frame: a peak needs a neighbor on
        // both sides. Ties with the following frame go to the candidate, so
        // an attack beats the equal-flux release that follows it.
        let n = self.novelty.len();
        if n < 3 || self.frames_seen <= self.warmup_frames + PHASE_HISTORY {
            return Ok(Flow::Continue);
        }
        let candidate = self.novelty[n - 2];
        if candidate.silent
            || !(candidate.flux > self.novelty[n - 3].flux
                && candidate.flux >= self.novelty[n - 1].flux)
        {
            return Ok(Flow::Continue);
        }
        if candidate.flux <= NOVELTY_FLOOR_RATIO * candidate.magnitude || candidate.flux <= 0.0 {
            return Ok(Flow::Continue);
        }

        let mut sorted: Vec<f32> = self.novelty.iter().map(|frame| frame.flux).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = sorted[sorted.len() / 2];
        let mean = sorted.iter().sum::<f32>() / n as f32;
        let threshold = median + self.peak_threshold * mean;
        if candidate.flux <= threshold {
            return Ok(Flow::Continue);
        }

        let peak_frame = self.frames_seen - 2;
        if let Some(last) = self.last_onset_frame {
            if peak_frame.saturating_sub(last) < self.minimum_interval {
                return Ok(Flow::Continue);
            }
        }
        self.last_onset_frame = Some(peak_frame);

        let hop_seconds = event.hop_size() as f64 / self.sample_rate as f64;
        let onset = OnsetEvent {
            time: (event.time_stamp() - PHASE_HISTORY as f64 * hop_seconds).max(0.0),
            salience: candidate.flux,
        };
        for handler in &mut self.handlers {
            handler.handle_onset(onset, event);
        }
        Ok(Flow::Continue)
    }

    fn finish(&mut self) {
        self.novelty.clear();
        self.previous_magnitude.fill(0.0);
        self.phase_1.fill(0.0);
        self.phase_2.fill(0.0);
        self.frames_seen = 0;
        self.last_onset_frame = None;
    }
}

fn hann(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / (len - 1) as f32;
            0.5 * (1.0 - x.cos())
        })
        .collect()
}
