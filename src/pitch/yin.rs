//! Time-domain YIN (de Cheveigné & Kawahara, 2002).

use crate::error::{CadenzaError, Result};

use super::{
    absolute_threshold, cumulative_mean_normalize, parabolic_interpolation, PitchAlgorithm,
    PitchDetector, PitchEstimate, DEFAULT_MAX_FREQUENCY, DEFAULT_MIN_FREQUENCY, DEFAULT_THRESHOLD,
};

pub struct Yin {
    sample_rate: f32,
    threshold: f32,
    min_lag: usize,
    max_lag: usize,
    cmnd: Vec<f32>,
}

impl Yin {
    /// Detector with the default threshold and frequency range.
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate.max(1) as f32;
        Self::build(
            sr,
            (sr / DEFAULT_MAX_FREQUENCY).floor() as usize,
            (sr / DEFAULT_MIN_FREQUENCY).ceil() as usize,
            DEFAULT_THRESHOLD,
        )
    }

    /// Detector restricted to `[min_frequency, max_frequency]`.
    ///
    /// # Errors
    /// `CadenzaError::Configuration` when the range is empty or the floor
    /// is not positive.
    pub fn with_range(
        sample_rate: u32,
        min_frequency: f32,
        max_frequency: f32,
        threshold: f32,
    ) -> Result<Self> {
        let (min_lag, max_lag) = lag_range(sample_rate, min_frequency, max_frequency, threshold)?;
        Ok(Self::build(sample_rate as f32, min_lag, max_lag, threshold))
    }

    fn build(sample_rate: f32, min_lag: usize, max_lag: usize, threshold: f32) -> Self {
        Self {
            sample_rate,
            threshold,
            min_lag,
            max_lag,
            cmnd: Vec::new(),
        }
    }
}

impl PitchDetector for Yin {
    fn estimate(&mut self, block: &[f32]) -> PitchEstimate {
        // Lags run over half the block so every difference term has a full
        // comparison window.
        let window = block.len() / 2;
        let max_lag = self.max_lag.min(window);
        if max_lag <= self.min_lag.max(2) {
            return PitchEstimate::unpitched(PitchAlgorithm::Yin);
        }

        self.cmnd.clear();
        self.cmnd.resize(max_lag, 0.0);
        for tau in 1..max_lag {
            let mut sum = 0.0f32;
            for j in 0..window {
                let delta = block[j] - block[j + tau];
                sum += delta * delta;
            }
            self.cmnd[tau] = sum;
        }
        cumulative_mean_normalize(&mut self.cmnd);

        match absolute_threshold(&self.cmnd, self.min_lag, max_lag, self.threshold) {
            Some(tau) => {
                let probability = 1.0 - self.cmnd[tau];
                let refined = parabolic_interpolation(&self.cmnd, tau);
                PitchEstimate::pitched(self.sample_rate / refined, probability, PitchAlgorithm::Yin)
            }
            None => PitchEstimate::unpitched(PitchAlgorithm::Yin),
        }
    }
}

/// Translate a frequency range into a lag range, validating as it goes.
pub(crate) fn lag_range(
    sample_rate: u32,
    min_frequency: f32,
    max_frequency: f32,
    threshold: f32,
) -> Result<(usize, usize)> {
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
    if !(0.0..1.0).contains(&threshold) {
        return Err(CadenzaError::Configuration(format!(
            "threshold {threshold} outside [0, 1)"
        )));
    }
    let sr = sample_rate as f32;
    let min_lag = (sr / max_frequency).floor() as usize;
    let max_lag = (sr / min_frequency).ceil() as usize;
    Ok((min_lag, max_lag))
}

#[cfg(test)]
mod tests {
    use super::super::test_sine;
    use super::*;

    #[test]
    fn finds_a_concert_pitch_sine() {
        let mut yin = Yin::new(44_100);
        let block = test_sine(440.0, 44_100.0, 2_048);
        let estimate = yin.estimate(&block);
        let frequency = estimate.frequency.expect("sine should be pitched");
        assert!(
            (frequency - 440.0).abs() / 440.0 < 0.01,
            "estimated {frequency} Hz"
        );
        assert!(estimate.probability > 0.8);
    }

    #[test]
    fn tracks_a_low_tone() {
        let mut yin = Yin::new(44_100);
        let block = test_sine(82.4, 44_100.0, 2_048);
        let frequency = yin.estimate(&block).frequency.unwrap();
        assert!((frequency - 82.4).abs() / 82.4 < 0.01, "estimated {frequency} Hz");
    }

    #[test]
    fn silence_is_unpitched() {
        let mut yin = Yin::new(44_100);
        let estimate = yin.estimate(&vec![0.0; 2_048]);
        assert!(!estimate.is_pitched());
        assert_eq!(estimate.probability, 0.0);
    }

    #[test]
    fn short_block_is_unpitched_not_an_error() {
        let mut yin = Yin::new(44_100);
        for len in [0, 1, 16, 64] {
            assert!(!yin.estimate(&test_sine(440.0, 44_100.0, len)).is_pitched());
        }
    }

    #[test]
    fn rejects_degenerate_ranges() {
        assert!(Yin::with_range(44_100, 0.0, 1_000.0, 0.2).is_err());
        assert!(Yin::with_range(44_100, 500.0, 100.0, 0.2).is_err());
        assert!(Yin::with_range(44_100, 55.0, 1_760.0, 1.5).is_err());
        assert!(Yin::with_range(0, 55.0, 1_760.0, 0.2).is_err());
    }
}
