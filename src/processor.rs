//! Processing chain unit contract.
//!
//! The [`AudioProcessor`] trait is the primary extensibility point: every
//! analysis algorithm, effect, generator or sink plugs into a dispatcher by
//! implementing it. Units are invoked strictly in registration order, one at
//! a time, on the dispatcher's driving thread.

use crate::error::Result;
use crate::event::AudioEvent;

/// Whether the chain (and the run) should keep going after a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Hand the event to the next unit in the chain.
    Continue,
    /// Skip the remaining units for this event and end the run after it.
    Stop,
}

/// A single stage in a dispatcher's processing chain.
///
/// Implementors may be stateful (filter histories, spectral look-back,
/// carry-over buffers); the dispatcher guarantees a unit is never invoked
/// concurrently with itself.
pub trait AudioProcessor: Send {
    /// Handle one block. Mutating the event's samples or overlap is
    /// observed by the dispatcher at the next window advance.
    fn process(&mut self, event: &mut AudioEvent) -> Result<Flow>;

    /// Called exactly once when the run ends, whether the stream completed,
    /// a unit requested a stop, or a fatal error occurred.
    fn finish(&mut self) {}
}

/// Multiplies every sample by a fixed gain factor.
#[derive(Debug, Clone)]
pub struct GainProcessor {
    gain: f32,
}

impl GainProcessor {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }
}

impl AudioProcessor for GainProcessor {
    fn process(&mut self, event: &mut AudioEvent) -> Result<Flow> {
        for sample in event.samples_mut() {
            *sample *= self.gain;
        }
        Ok(Flow::Continue)
    }
}

/// Four-pole IIR low-pass filter.
///
/// y[n] = (1-x)^4 in + 4x y[n-1] - 6x^2 y[n-2] + 4x^3 y[n-3] - x^4 y[n-4]
/// with x = exp(-14.445 f/fs). State carries across blocks.
#[derive(Debug, Clone)]
pub struct LowPassFs {
    a0: f32,
    b: [f32; 4],
    history: [f32; 4],
}

impl LowPassFs {
    pub fn new(frequency: f32, sample_rate: u32) -> Self {
        let frac = frequency / sample_rate as f32;
        let x = (-14.445 * frac).exp();
        Self {
            a0: (1.0 - x).powi(4),
            b: [4.0 * x, -6.0 * x * x, 4.0 * x * x * x, -(x * x * x * x)],
            history: [0.0; 4],
        }
    }
}

impl AudioProcessor for LowPassFs {
    fn process(&mut self, event: &mut AudioEvent) -> Result<Flow> {
        for sample in event.samples_mut() {
            let y = self.a0 * *sample
                + self.b[0] * self.history[0]
                + self.b[1] * self.history[1]
                + self.b[2] * self.history[2]
                + self.b[3] * self.history[3];
            self.history = [y, self.history[0], self.history[1], self.history[2]];
            *sample = y;
        }
        Ok(Flow::Continue)
    }

    fn finish(&mut self) {
        self.history = [0.0; 4];
    }
}
