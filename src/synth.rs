//! Signal generators as chain units.
//!
//! Generators mix into (or modulate) whatever is already in the block, so
//! they compose: a dispatcher fed by a silent source with a
//! [`SineGenerator`] in the chain is a test oscillator, two generators
//! stacked produce a chord. Phase state carries across blocks.

use crate::error::Result;
use crate::event::AudioEvent;
use crate::processor::{AudioProcessor, Flow};

/// Adds a sine tone to every block.
pub struct SineGenerator {
    gain: f64,
    frequency: f64,
    phase: f64,
}

impl SineGenerator {
    pub fn new(gain: f64, frequency: f64) -> Self {
        Self {
            gain,
            frequency,
            phase: 0.0,
        }
    }
}

impl AudioProcessor for SineGenerator {
    fn process(&mut self, event: &mut AudioEvent) -> Result<Flow> {
        let step = 2.0 * std::f64::consts::PI * self.frequency / event.sample_rate as f64;
        for sample in event.samples_mut() {
            *sample += (self.gain * self.phase.sin()) as f32;
            self.phase += step;
        }
        // Keep the accumulator small over long streams.
        self.phase %= 2.0 * std::f64::consts::PI;
        Ok(Flow::Continue)
    }

    fn finish(&mut self) {
        self.phase = 0.0;
    }
}

/// Adds deterministic white noise (xorshift) to every block.
pub struct NoiseGenerator {
    gain: f32,
    state: u64,
}

impl NoiseGenerator {
    pub fn new(gain: f32) -> Self {
        Self::with_seed(gain, 0x9E37_79B9_7F4A_7C15)
    }

    pub fn with_seed(gain: f32, seed: u64) -> Self {
        Self {
            gain,
            state: seed.max(1),
        }
    }

    fn next(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        // Map the high 24 bits to [-1, 1).
        ((self.state >> 40) as f32 / 8_388_608.0) - 1.0
    }
}

impl AudioProcessor for NoiseGenerator {
    fn process(&mut self, event: &mut AudioEvent) -> Result<Flow> {
        for sample in event.samples_mut() {
            *sample += self.gain * self.next();
        }
        Ok(Flow::Continue)
    }
}

/// Low-frequency amplitude modulation (tremolo). The block is scaled by an
/// envelope sweeping between 0 and `depth`.
pub struct AmplitudeLfo {
    frequency: f64,
    depth: f64,
    phase: f64,
}

impl AmplitudeLfo {
    pub fn new(frequency: f64, depth: f64) -> Self {
        Self {
            frequency,
            depth,
            phase: 0.0,
        }
    }
}

impl AudioProcessor for AmplitudeLfo {
    fn process(&mut self, event: &mut AudioEvent) -> Result<Flow> {
        let step = 2.0 * std::f64::consts::PI * self.frequency / event.sample_rate as f64;
        for sample in event.samples_mut() {
            let envelope = 0.5 * self.depth * (1.0 + self.phase.sin());
            *sample = (*sample as f64 * envelope) as f32;
            self.phase += step;
        }
        self.phase %= 2.0 * std::f64::consts::PI;
        Ok(Flow::Continue)
    }

    fn finish(&mut self) {
        self.phase = 0.0;
    }
}
