use std::sync::Arc;

use cadenza_core::pitch::{DynamicWavelet, FftYin, PitchDetector, PitchProcessor, Yin};
use cadenza_core::source::{SampleSink, SinkProcessor, VecSource};
use cadenza_core::synth::SineGenerator;
use cadenza_core::{
    AudioEvent, AudioProcessor, BlockDispatcher, ComplexOnsetDetector, Flow, PitchEstimate,
    PitchShifter, Result,
};
use parking_lot::Mutex;

const SAMPLE_RATE: u32 = 44_100;

fn sine(frequency: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin())
        .collect()
}

/// Run one second of `frequency` through a dispatcher with the given
/// detector and collect the pitched estimates.
fn track_pitch<D: PitchDetector + 'static>(detector: D, frequency: f32) -> Vec<f32> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut dispatcher = BlockDispatcher::new(
        VecSource::new(sine(frequency, SAMPLE_RATE as usize)),
        SAMPLE_RATE,
        2_048,
        1_024,
    )
    .unwrap()
    .zero_pad_final_block(false);
    dispatcher.add_processor(Box::new(PitchProcessor::new(detector).with_handler(tx)));
    dispatcher.run().unwrap();

    rx.try_iter()
        .filter_map(|estimate: PitchEstimate| estimate.frequency)
        .collect()
}

#[test]
fn yin_tracks_a_sine_through_the_dispatcher() {
    let pitched = track_pitch(Yin::new(SAMPLE_RATE), 440.0);
    assert!(pitched.len() > 20, "only {} pitched blocks", pitched.len());
    for frequency in &pitched {
        assert!((frequency - 440.0).abs() / 440.0 < 0.01, "got {frequency}");
    }
}

#[test]
fn fft_yin_tracks_a_sine_through_the_dispatcher() {
    let pitched = track_pitch(FftYin::new(SAMPLE_RATE), 440.0);
    assert!(pitched.len() > 20);
    for frequency in &pitched {
        assert!((frequency - 440.0).abs() / 440.0 < 0.01, "got {frequency}");
    }
}

#[test]
fn dynamic_wavelet_tracks_a_sine_through_the_dispatcher() {
    let pitched = track_pitch(DynamicWavelet::new(SAMPLE_RATE), 440.0);
    assert!(pitched.len() > 20);
    for frequency in &pitched {
        assert!((frequency - 440.0).abs() / 440.0 < 0.015, "got {frequency}");
    }
}

/// Stops the run after a fixed number of blocks.
struct StopAfter {
    remaining: usize,
}

impl AudioProcessor for StopAfter {
    fn process(&mut self, _event: &mut AudioEvent) -> Result<Flow> {
        self.remaining -= 1;
        Ok(if self.remaining == 0 {
            Flow::Stop
        } else {
            Flow::Continue
        })
    }
}

#[test]
fn generator_dispatcher_synthesizes_a_trackable_tone() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut dispatcher = BlockDispatcher::generator(SAMPLE_RATE, 2_048, 0).unwrap();
    dispatcher.add_processor(Box::new(SineGenerator::new(0.7, 440.0)));
    dispatcher.add_processor(Box::new(
        PitchProcessor::new(Yin::new(SAMPLE_RATE)).with_handler(tx),
    ));
    dispatcher.add_processor(Box::new(StopAfter { remaining: 20 }));
    dispatcher.run().unwrap();

    let pitched: Vec<f32> = rx
        .try_iter()
        .filter_map(|estimate: PitchEstimate| estimate.frequency)
        .collect();
    assert_eq!(pitched.len(), 20);
    for frequency in &pitched {
        assert!((frequency - 440.0).abs() / 440.0 < 0.01, "got {frequency}");
    }
}

#[test]
fn onset_detection_through_the_dispatcher() {
    const BLOCK: usize = 512;
    let burst_frames = [10usize, 20, 30];
    let mut signal = vec![0.0f32; 40 * BLOCK];
    for &frame in &burst_frames {
        for i in 0..BLOCK {
            let t = i as f32 / BLOCK as f32;
            signal[frame * BLOCK + i] = 0.8
                * (-6.0 * t).exp()
                * (2.0 * std::f32::consts::PI * 880.0 * i as f32 / SAMPLE_RATE as f32).sin();
        }
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut dispatcher =
        BlockDispatcher::new(VecSource::new(signal), SAMPLE_RATE, BLOCK, 0).unwrap();
    let detector = ComplexOnsetDetector::new(SAMPLE_RATE, BLOCK)
        .unwrap()
        .with_handler(tx);
    dispatcher.add_processor(Box::new(detector));
    dispatcher.run().unwrap();

    let onsets: Vec<_> = rx.try_iter().collect();
    assert_eq!(onsets.len(), 3, "onsets: {onsets:?}");

    let frame_seconds = BLOCK as f64 / SAMPLE_RATE as f64;
    for (onset, &frame) in onsets.iter().zip(&burst_frames) {
        let expected = frame as f64 * frame_seconds;
        assert!(
            (onset.time - expected).abs() <= 2.0 * frame_seconds,
            "onset at {} for burst at {expected}",
            onset.time
        );
    }
}

/// Sink recording everything that reaches the end of the chain.
#[derive(Clone)]
struct Tap {
    samples: Arc<Mutex<Vec<f32>>>,
}

impl SampleSink for Tap {
    fn write(&mut self, event: &AudioEvent) -> Result<()> {
        self.samples.lock().extend_from_slice(event.samples());
        Ok(())
    }
}

#[test]
fn pitch_shifter_raises_the_crossing_rate() {
    let tap = Tap {
        samples: Arc::new(Mutex::new(Vec::new())),
    };
    let recorded = Arc::clone(&tap.samples);

    let mut dispatcher = BlockDispatcher::new(
        VecSource::new(sine(220.0, 8 * 4_096)),
        SAMPLE_RATE,
        4_096,
        0,
    )
    .unwrap();
    dispatcher.add_processor(Box::new(PitchShifter::new(1.5).unwrap()));
    dispatcher.add_processor(Box::new(SinkProcessor::new(tap)));
    dispatcher.run().unwrap();

    let samples = recorded.lock();
    assert_eq!(samples.len(), 8 * 4_096);

    let crossings = samples
        .windows(2)
        .filter(|pair| pair[0] < 0.0 && pair[1] >= 0.0)
        .count();
    let rate = crossings as f32 * SAMPLE_RATE as f32 / samples.len() as f32;
    assert!(
        (rate - 330.0).abs() < 60.0,
        "expected ~330 Hz crossing rate, got {rate}"
    );
}
