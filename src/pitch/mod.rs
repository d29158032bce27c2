//! Pitch estimation.
//!
//! Three detectors share one contract ([`PitchDetector`]): the time-domain
//! YIN, its FFT-accelerated sibling, and a dynamic-wavelet detector that
//! trades precision for speed. [`PitchProcessor`] wraps any of them as a
//! chain unit and fans estimates out to registered handlers.

pub mod dwt;
pub mod fft_yin;
pub mod yin;

pub use dwt::DynamicWavelet;
pub use fft_yin::FftYin;
pub use yin::Yin;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::AudioEvent;
use crate::processor::{AudioProcessor, Flow};

/// YIN-family absolute threshold on the normalized difference function.
pub const DEFAULT_THRESHOLD: f32 = 0.2;
/// Frequency floor: A1.
pub const DEFAULT_MIN_FREQUENCY: f32 = 55.0;
/// Frequency ceiling: A6.
pub const DEFAULT_MAX_FREQUENCY: f32 = 1760.0;

/// Identifies which algorithm produced an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitchAlgorithm {
    Yin,
    FftYin,
    DynamicWavelet,
}

/// One per-block pitch estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// Fundamental frequency in Hz; `None` when the block is unpitched.
    pub frequency: Option<f32>,
    /// Confidence in [0, 1].
    pub probability: f32,
    pub algorithm: PitchAlgorithm,
}

impl PitchEstimate {
    pub fn pitched(frequency: f32, probability: f32, algorithm: PitchAlgorithm) -> Self {
        Self {
            frequency: Some(frequency),
            probability: probability.clamp(0.0, 1.0),
            algorithm,
        }
    }

    pub fn unpitched(algorithm: PitchAlgorithm) -> Self {
        Self {
            frequency: None,
            probability: 0.0,
            algorithm,
        }
    }

    pub fn is_pitched(&self) -> bool {
        self.frequency.is_some()
    }
}

/// Shared contract of the estimator family. The sample rate is fixed at
/// construction so implementations can size their lag buffers up front.
pub trait PitchDetector: Send {
    fn estimate(&mut self, block: &[f32]) -> PitchEstimate;
}

/// Receives every estimate a [`PitchProcessor`] produces.
pub trait PitchHandler: Send {
    fn handle_pitch(&mut self, estimate: PitchEstimate, event: &AudioEvent);
}

impl<F> PitchHandler for F
where
    F: FnMut(PitchEstimate, &AudioEvent) + Send,
{
    fn handle_pitch(&mut self, estimate: PitchEstimate, event: &AudioEvent) {
        self(estimate, event)
    }
}

/// Forwards estimates to another thread; a closed channel drops them.
impl PitchHandler for crossbeam_channel::Sender<PitchEstimate> {
    fn handle_pitch(&mut self, estimate: PitchEstimate, _event: &AudioEvent) {
        let _ = self.send(estimate);
    }
}

/// Chain unit running a detector on every block.
pub struct PitchProcessor {
    detector: Box<dyn PitchDetector>,
    handlers: Vec<Box<dyn PitchHandler>>,
}

impl PitchProcessor {
    pub fn new<D: PitchDetector + 'static>(detector: D) -> Self {
        Self {
            detector: Box::new(detector),
            handlers: Vec::new(),
        }
    }

    pub fn add_handler<H: PitchHandler + 'static>(&mut self, handler: H) {
        self.handlers.push(Box::new(handler));
    }

    pub fn with_handler<H: PitchHandler + 'static>(mut self, handler: H) -> Self {
        self.add_handler(handler);
        self
    }
}

impl AudioProcessor for PitchProcessor {
    fn process(&mut self, event: &mut AudioEvent) -> Result<Flow> {
        let estimate = self.detector.estimate(event.samples());
        for handler in &mut self.handlers {
            handler.handle_pitch(estimate, event);
        }
        Ok(Flow::Continue)
    }
}

// ---------------------------------------------------------------------------
// Shared YIN-family machinery
// ---------------------------------------------------------------------------

/// In-place step 3 of YIN: cumulative mean normalized difference.
/// `d[0]` becomes 1; a degenerate (all-zero) difference stays at 1
/// everywhere, which reads as unpitched downstream.
pub(crate) fn cumulative_mean_normalize(d: &mut [f32]) {
    if d.is_empty() {
        return;
    }
    d[0] = 1.0;
    let mut running_sum = 0.0f32;
    for tau in 1..d.len() {
        running_sum += d[tau];
        d[tau] = if running_sum > 1e-12 {
            d[tau] * tau as f32 / running_sum
        } else {
            1.0
        };
    }
}

/// Step 4: first lag below `threshold` within `[min_lag, max_lag)`, walked
/// to its local minimum. Picking the first candidate (not the global
/// minimum) is what prevents octave errors.
pub(crate) fn absolute_threshold(
    cmnd: &[f32],
    min_lag: usize,
    max_lag: usize,
    threshold: f32,
) -> Option<usize> {
    let mut tau = min_lag.max(2);
    while tau < max_lag {
        if cmnd[tau] < threshold {
            while tau + 1 < max_lag && cmnd[tau + 1] < cmnd[tau] {
                tau += 1;
            }
            return Some(tau);
        }
        tau += 1;
    }
    None
}

/// Step 5: parabola through the minimum and its neighbors for sub-sample
/// lag precision.
pub(crate) fn parabolic_interpolation(cmnd: &[f32], tau: usize) -> f32 {
    if tau < 1 || tau + 1 >= cmnd.len() {
        return tau as f32;
    }
    let s0 = cmnd[tau - 1];
    let s1 = cmnd[tau];
    let s2 = cmnd[tau + 1];
    let denominator = 2.0 * (2.0 * s1 - s2 - s0);
    if denominator.abs() > 1e-12 {
        tau as f32 + (s2 - s0) / denominator
    } else {
        tau as f32
    }
}

#[cfg(test)]
pub(crate) fn test_sine(frequency: f32, sample_rate: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate).sin())
        .collect()
}
