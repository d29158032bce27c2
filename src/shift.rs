//! Real-time pitch shifting.
//!
//! Classic resample-then-stretch scheme: each block is resampled by the
//! reciprocal of the shift factor (changing pitch and length together),
//! then granular overlap-add stretches the result back to the original
//! block length. Grains that spill past the block boundary are carried
//! into the next block (the carry is bounded by one grain), and the grain
//! write phase continues across blocks, so output is continuous over a
//! long stream.
//!
//! The shift factor lives behind a shared handle so a UI or controller
//! thread can change it while the dispatcher runs; the new value applies
//! from the next block.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CadenzaError, Result};
use crate::event::AudioEvent;
use crate::processor::{AudioProcessor, Flow};
use crate::resample::Resampler;

/// Grain length for the overlap-add stage, in samples.
const GRAIN: usize = 256;

/// Shared, cloneable control over a [`PitchShifter`]'s factor.
#[derive(Clone)]
pub struct PitchShiftControl {
    factor: Arc<Mutex<f32>>,
}

impl PitchShiftControl {
    /// Set the shift factor (2.0 = one octave up, 0.5 = one octave down).
    ///
    /// # Errors
    /// `CadenzaError::Configuration` unless the factor is positive and
    /// finite.
    pub fn set_factor(&self, factor: f32) -> Result<()> {
        validate_factor(factor)?;
        *self.factor.lock() = factor;
        Ok(())
    }

    pub fn factor(&self) -> f32 {
        *self.factor.lock()
    }
}

pub struct PitchShifter {
    factor: Arc<Mutex<f32>>,
    resampler: Resampler,
    input: Vec<f32>,
    resampled: Vec<f32>,
    accumulator: Vec<f32>,
    weights: Vec<f32>,
    grain_window: Vec<f32>,
    /// Spill-over past the previous block boundary: (samples, weights),
    /// at most one grain long.
    carry: Vec<f32>,
    carry_weights: Vec<f32>,
    /// Grain write position relative to the current block start.
    write_phase: usize,
}

impl PitchShifter {
    /// # Errors
    /// `CadenzaError::Configuration` unless the factor is positive and
    /// finite.
    pub fn new(factor: f32) -> Result<Self> {
        validate_factor(factor)?;
        Ok(Self {
            factor: Arc::new(Mutex::new(factor)),
            resampler: Resampler::new(),
            input: Vec::new(),
            resampled: Vec::new(),
            accumulator: Vec::new(),
            weights: Vec::new(),
            grain_window: hann(GRAIN),
            carry: Vec::new(),
            carry_weights: Vec::new(),
            write_phase: 0,
        })
    }

    /// Handle for changing the factor from another thread.
    pub fn control(&self) -> PitchShiftControl {
        PitchShiftControl {
            factor: Arc::clone(&self.factor),
        }
    }

    /// Overlap-add grains of `resampled` into the accumulator, writing the
    /// normalized first `output_len` samples into `out` and carrying the
    /// spill-over region to the next call.
    fn stretch(&mut self, output_len: usize, out: &mut [f32]) {
        let source_len = self.resampled.len();
        let grain = GRAIN.min(source_len);
        if self.grain_window.len() != grain {
            self.grain_window = hann(grain);
        }
        let hop = (grain / 2).max(1);
        let read_span = source_len - grain;

        let acc_len = output_len + grain;
        self.accumulator.clear();
        self.accumulator.resize(acc_len, 0.0);
        self.weights.clear();
        self.weights.resize(acc_len, 0.0);
        for (i, (&sample, &weight)) in self.carry.iter().zip(&self.carry_weights).enumerate() {
            if i >= acc_len {
                break;
            }
            self.accumulator[i] = sample;
            self.weights[i] = weight;
        }

        let mut write = self.write_phase.min(output_len.saturating_sub(1));
        while write < output_len {
            let read = if output_len <= 1 {
                0
            } else {
                (write as f64 / (output_len - 1) as f64 * read_span as f64).round() as usize
            };
            for i in 0..grain {
                let weight = self.grain_window[i];
                self.accumulator[write + i] += self.resampled[read + i] * weight;
                self.weights[write + i] += weight;
            }
            write += hop;
        }
        self.write_phase = write - output_len;

        for (j, sample) in out[..output_len].iter_mut().enumerate() {
            *sample = if self.weights[j] > 1e-6 {
                self.accumulator[j] / self.weights[j]
            } else {
                0.0
            };
        }
        self.carry.clear();
        self.carry.extend_from_slice(&self.accumulator[output_len..]);
        self.carry_weights.clear();
        self.carry_weights.extend_from_slice(&self.weights[output_len..]);
    }
}

impl AudioProcessor for PitchShifter {
    fn process(&mut self, event: &mut AudioEvent) -> Result<Flow> {
        let factor = *self.factor.lock();
        let len = event.buffer_size();
        if len == 0 || (factor - 1.0).abs() < 1e-6 {
            return Ok(Flow::Continue);
        }

        self.input.clear();
        self.input.extend_from_slice(event.samples());

        // Resampling by 1/factor shifts pitch by factor and shortens or
        // lengthens the block in the same ratio.
        let resampled_len = ((len as f64 / factor as f64).round() as usize).max(1);
        self.resampled.clear();
        self.resampled.resize(resampled_len, 0.0);
        self.resampler.process(
            1.0 / factor as f64,
            &self.input,
            0,
            len,
            &mut self.resampled,
            0,
            resampled_len,
        )?;

        let mut output = std::mem::take(&mut self.input);
        self.stretch(len, &mut output);
        event.samples_mut().copy_from_slice(&output);
        self.input = output;
        Ok(Flow::Continue)
    }

    fn finish(&mut self) {
        self.carry.clear();
        self.carry_weights.clear();
        self.write_phase = 0;
    }
}

fn validate_factor(factor: f32) -> Result<()> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(CadenzaError::Configuration(format!(
            "pitch shift factor must be positive, got {factor}"
        )));
    }
    Ok(())
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
