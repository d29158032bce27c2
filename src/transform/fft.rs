//! Power-of-two FFT built on rustfft.
//!
//! `FloatFft` owns its forward/inverse plans and scratch storage — one
//! explicit transform object per required length, constructed once and
//! reused, never a process-wide table cache. All operations run in place on
//! caller-supplied buffers; nothing allocates after construction.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{CadenzaError, Result};

pub struct FloatFft {
    size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl FloatFft {
    /// Plan a transform of length `size`.
    ///
    /// # Errors
    /// `CadenzaError::InvalidLength` unless `size` is a power of two.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(CadenzaError::InvalidLength(size));
        }
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        Ok(Self {
            size,
            forward,
            inverse,
            scratch: vec![Complex::default(); scratch_len],
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.size {
            return Err(CadenzaError::InvalidLength(len));
        }
        Ok(())
    }

    /// In-place forward transform of `buffer` (length must equal `size`).
    pub fn forward(&mut self, buffer: &mut [Complex<f32>]) -> Result<()> {
        self.check_len(buffer.len())?;
        self.forward.process_with_scratch(buffer, &mut self.scratch);
        Ok(())
    }

    /// In-place inverse transform with 1/N normalization, so that
    /// `inverse(forward(x)) ≈ x`.
    pub fn inverse(&mut self, buffer: &mut [Complex<f32>]) -> Result<()> {
        self.check_len(buffer.len())?;
        self.inverse.process_with_scratch(buffer, &mut self.scratch);
        let scale = 1.0 / self.size as f32;
        for bin in buffer.iter_mut() {
            *bin *= scale;
        }
        Ok(())
    }

    /// Load real samples into a complex buffer (zero imaginary parts).
    pub fn load_real(samples: &[f32], buffer: &mut [Complex<f32>]) {
        for (bin, &sample) in buffer.iter_mut().zip(samples) {
            *bin = Complex::new(sample, 0.0);
        }
        for bin in buffer.iter_mut().skip(samples.len()) {
            *bin = Complex::default();
        }
    }

    /// Per-bin magnitude for bins `[0, n/2)`; `out` must hold `n/2` values.
    pub fn modulus(buffer: &[Complex<f32>], out: &mut [f32]) {
        let half = buffer.len() / 2;
        for (value, bin) in out[..half].iter_mut().zip(&buffer[..half]) {
            *value = bin.norm();
        }
    }
}
