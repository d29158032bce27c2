//! Typed audio event passed from the dispatcher through the processing chain.

/// One analysis window of mono PCM samples plus its stream context.
///
/// Created once per dispatch cycle and handed to every chain member in
/// order. A member may rewrite the samples in place or replace the buffer
/// (and the declared overlap) with [`AudioEvent::set_samples`]; the
/// dispatcher adopts the mutated geometry for the *next* window advance.
#[derive(Debug, Clone)]
pub struct AudioEvent {
    samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
    /// Samples shared with the previous block.
    pub overlap: usize,
    /// Stream position of the first sample in this block.
    start_sample: u64,
    /// `true` on the final (possibly zero-padded) block of the stream.
    pub last: bool,
}

impl AudioEvent {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            overlap: 0,
            start_sample: 0,
            last: false,
        }
    }

    pub(crate) fn with_position(mut self, start_sample: u64, overlap: usize, last: bool) -> Self {
        self.start_sample = start_sample;
        self.overlap = overlap;
        self.last = last;
        self
    }

    /// Stream-relative time of the first sample, in seconds.
    pub fn time_stamp(&self) -> f64 {
        self.start_sample as f64 / self.sample_rate as f64
    }

    /// Number of samples in the block.
    pub fn buffer_size(&self) -> usize {
        self.samples.len()
    }

    /// Samples advanced relative to the previous block.
    pub fn hop_size(&self) -> usize {
        self.samples.len().saturating_sub(self.overlap)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Replace the block contents. A changed length is adopted as the new
    /// block length on the next window advance, never retroactively.
    pub fn set_samples(&mut self, samples: Vec<f32>) {
        self.samples = samples;
    }

    pub(crate) fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Root-mean-square level of the block in [0.0, 1.0].
    pub fn rms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = self.samples.iter().map(|&s| s as f64 * s as f64).sum();
        (sum_sq / self.samples.len() as f64).sqrt()
    }

    /// Sound pressure level of the block, in dBSPL relative to full scale.
    pub fn sound_pressure_level(&self) -> f64 {
        20.0 * self.rms().max(1e-12).log10()
    }

    /// `true` when the block is quieter than `threshold_db` (e.g. -70.0).
    pub fn is_silence(&self, threshold_db: f64) -> bool {
        self.sound_pressure_level() < threshold_db
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
