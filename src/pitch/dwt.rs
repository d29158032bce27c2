//! Dynamic wavelet pitch detection.
//!
//! A coarse-to-fine scheme: the block is decimated through the Haar
//! approximation branch until a few hundred samples remain, a candidate
//! period is read off the coarse signal from the spacing of rising
//! mean-crossings, then the candidate is refined against the original
//! block with a normalized squared difference around the projected lag.
//! Much cheaper than YIN and good enough for monophonic tracking.

use crate::error::{CadenzaError, Result};

use super::{
    parabolic_interpolation, PitchAlgorithm, PitchDetector, PitchEstimate, DEFAULT_MAX_FREQUENCY,
    DEFAULT_MIN_FREQUENCY,
};

/// Decimate until the coarse signal is at most this long.
const COARSE_TARGET: usize = 256;

/// Refined normalized difference must fall below this to count as pitched.
const PERIODICITY_FLOOR: f32 = 0.3;

pub struct DynamicWavelet {
    sample_rate: f32,
    min_frequency: f32,
    max_frequency: f32,
    coarse: Vec<f32>,
    nsd: Vec<f32>,
}

impl DynamicWavelet {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1) as f32,
            min_frequency: DEFAULT_MIN_FREQUENCY,
            max_frequency: DEFAULT_MAX_FREQUENCY,
            coarse: Vec::new(),
            nsd: Vec::new(),
        }
    }

    /// # Errors
    /// `CadenzaError::Configuration` on an empty or non-positive range.
    pub fn with_range(sample_rate: u32, min_frequency: f32, max_frequency: f32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(CadenzaError::Configuration(
                "sample rate must be positive".into(),
            ));
        }
        if !(min_frequency > 0.0 && max_frequency > min_frequency) {
            return Err(CadenzaError::Configuration(format!(
                "invalid frequency range [{min_frequency}, {max_frequency}]"
            )));
        }
        Ok(Self {
            sample_rate: sample_rate as f32,
            min_frequency,
            max_frequency,
            coarse: Vec::new(),
            nsd: Vec::new(),
        })
    }

    /// Median spacing of rising mean-crossings in the coarse signal.
    fn coarse_period(&mut self) -> Option<usize> {
        let len = self.coarse.len();
        let mean = self.coarse.iter().sum::<f32>() / len as f32;

        let mut distances: Vec<usize> = Vec::new();
        let mut previous_crossing = None;
        for i in 1..len {
            if self.coarse[i - 1] < mean && self.coarse[i] >= mean {
                if let Some(prev) = previous_crossing {
                    distances.push(i - prev);
                }
                previous_crossing = Some(i);
            }
        }
        if distances.is_empty() {
            return None;
        }
        distances.sort_unstable();
        Some(distances[distances.len() / 2])
    }
}

impl PitchDetector for DynamicWavelet {
    fn estimate(&mut self, block: &[f32]) -> PitchEstimate {
        let unpitched = PitchEstimate::unpitched(PitchAlgorithm::DynamicWavelet);
        if block.len() < 128 {
            return unpitched;
        }

        // Haar approximation cascade: halve by pair averaging.
        self.coarse.clear();
        self.coarse.extend_from_slice(block);
        let mut levels = 0u32;
        while self.coarse.len() > COARSE_TARGET {
            let half = self.coarse.len() / 2;
            for i in 0..half {
                self.coarse[i] = (self.coarse[2 * i] + self.coarse[2 * i + 1]) / 2.0;
            }
            self.coarse.truncate(half);
            levels += 1;
        }

        let Some(coarse_period) = self.coarse_period() else {
            return unpitched;
        };
        let candidate = (coarse_period << levels) as f32;
        let frequency = self.sample_rate / candidate;
        if frequency < self.min_frequency * 0.75 || frequency > self.max_frequency * 1.33 {
            return unpitched;
        }

        // Refine against the original block around the projected lag.
        let lag_lo = ((candidate * 0.75) as usize).max(2);
        let lag_hi = ((candidate * 1.33) as usize).min(block.len() / 2);
        if lag_hi <= lag_lo + 1 {
            return unpitched;
        }
        let window = block.len() - lag_hi;
        if window < 16 {
            return unpitched;
        }

        self.nsd.clear();
        for tau in lag_lo..=lag_hi {
            let mut diff = 0.0f32;
            let mut energy = 0.0f32;
            for j in 0..window {
                let a = block[j];
                let b = block[j + tau];
                let delta = a - b;
                diff += delta * delta;
                energy += a * a + b * b;
            }
            self.nsd.push(if energy > 1e-12 { diff / energy } else { 1.0 });
        }

        let (best, &minimum) = match self
            .nsd
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
        {
            Some(found) => found,
            None => return unpitched,
        };
        if minimum > PERIODICITY_FLOOR {
            return unpitched;
        }

        let refined = lag_lo as f32 + parabolic_interpolation(&self.nsd, best);
        let frequency = self.sample_rate / refined;
        if frequency < self.min_frequency || frequency > self.max_frequency {
            return unpitched;
        }
        PitchEstimate::pitched(frequency, 1.0 - minimum, PitchAlgorithm::DynamicWavelet)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_sine;
    use super::*;

    #[test]
    fn finds_a_concert_pitch_sine() {
        let mut detector = DynamicWavelet::new(44_100);
        let block = test_sine(440.0, 44_100.0, 2_048);
        let estimate = detector.estimate(&block);
        let frequency = estimate.frequency.expect("sine should be pitched");
        assert!(
            (frequency - 440.0).abs() / 440.0 < 0.01,
            "estimated {frequency} Hz"
        );
        assert!(estimate.probability > 0.7);
        assert_eq!(estimate.algorithm, PitchAlgorithm::DynamicWavelet);
    }

    #[test]
    fn tracks_a_low_tone() {
        let mut detector = DynamicWavelet::new(44_100);
        let block = test_sine(110.0, 44_100.0, 4_096);
        let frequency = detector.estimate(&block).frequency.unwrap();
        assert!(
            (frequency - 110.0).abs() / 110.0 < 0.01,
            "estimated {frequency} Hz"
        );
    }

    #[test]
    fn silence_is_unpitched() {
        let mut detector = DynamicWavelet::new(44_100);
        assert!(!detector.estimate(&vec![0.0; 2_048]).is_pitched());
    }

    #[test]
    fn short_block_is_unpitched_not_an_error() {
        let mut detector = DynamicWavelet::new(44_100);
        for len in [0, 1, 16, 64] {
            assert!(!detector
                .estimate(&test_sine(440.0, 44_100.0, len))
                .is_pitched());
        }
    }

    #[test]
    fn rejects_degenerate_ranges() {
        assert!(DynamicWavelet::with_range(44_100, 0.0, 1_000.0).is_err());
        assert!(DynamicWavelet::with_range(44_100, 500.0, 100.0).is_err());
        assert!(DynamicWavelet::with_range(0, 55.0, 1_760.0).is_err());
    }
}
