//! Sample source and sink abstractions.
//!
//! The dispatcher never talks to audio hardware or file decoders directly;
//! it pulls decoded mono f32 samples from a [`SampleSource`] and (optionally)
//! pushes processed blocks into a [`SampleSink`] registered as a chain unit.
//!
//! [`RingSource`] adapts a lock-free SPSC ring buffer so a real-time capture
//! callback can feed a dispatcher: `push_slice` on the producer half is
//! wait-free and safe to call from the audio callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

use crate::error::Result;
use crate::event::AudioEvent;
use crate::processor::{AudioProcessor, Flow};

/// A blocking producer of decoded mono f32 samples.
pub trait SampleSource: Send {
    /// Fill up to `buffer.len()` samples, blocking until they are available.
    /// Returns fewer than requested only at end of stream.
    fn read(&mut self, buffer: &mut [f32]) -> Result<usize>;

    /// Release any underlying resource. Called once after the final read.
    fn close(&mut self) {}
}

/// A consumer of processed blocks (playback, recording).
pub trait SampleSink: Send {
    /// Accept one block. A failure is fatal to the run.
    fn write(&mut self, event: &AudioEvent) -> Result<()>;
}

/// An in-memory source over a fully decoded signal. Used for offline
/// analysis and throughout the test suite.
pub struct VecSource {
    samples: Vec<f32>,
    position: usize,
}

impl VecSource {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            position: 0,
        }
    }
}

impl SampleSource for VecSource {
    fn read(&mut self, buffer: &mut [f32]) -> Result<usize> {
        let available = self.samples.len() - self.position;
        let n = buffer.len().min(available);
        buffer[..n].copy_from_slice(&self.samples[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

/// An endless source of zeros. Drives a dispatcher used as a synthesis
/// generator: the chain's generator units replace the silence.
pub struct SilenceSource;

impl SampleSource for SilenceSource {
    fn read(&mut self, buffer: &mut [f32]) -> Result<usize> {
        buffer.fill(0.0);
        Ok(buffer.len())
    }
}

/// Ring capacity: 2^20 f32 samples ≈ 21.8 s at 48 kHz, enough headroom for
/// a slow chain without dropping capture callbacks.
pub const RING_CAPACITY: usize = 1 << 20;

/// Producer half of a live sample ring — held by the capture callback.
pub type SampleProducer = ringbuf::HeapProd<f32>;

/// Sleep while the ring is empty (avoids busy-wait burning a core).
const EMPTY_SLEEP: Duration = Duration::from_millis(5);

/// Handle used by the producing side to mark the live stream finished.
#[derive(Debug, Clone)]
pub struct StreamControl {
    open: Arc<AtomicBool>,
}

impl StreamControl {
    /// Signal end of stream: the paired [`RingSource`] drains what is left
    /// and then reports a short read.
    pub fn finish(&self) {
        self.open.store(false, Ordering::Release);
    }
}

/// Consumer half of a live sample ring, exposed as a blocking source.
pub struct RingSource {
    consumer: ringbuf::HeapCons<f32>,
    open: Arc<AtomicBool>,
}

/// Create a matched (producer, source, control) triple backed by a
/// heap-allocated SPSC ring buffer.
pub fn create_sample_ring() -> (SampleProducer, RingSource, StreamControl) {
    let (producer, consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
    let open = Arc::new(AtomicBool::new(true));
    let control = StreamControl {
        open: Arc::clone(&open),
    };
    (producer, RingSource { consumer, open }, control)
}

impl SampleSource for RingSource {
    fn read(&mut self, buffer: &mut [f32]) -> Result<usize> {
        let mut filled = 0;
        loop {
            filled += self.consumer.pop_slice(&mut buffer[filled..]);
            if filled == buffer.len() {
                return Ok(filled);
            }
            if !self.open.load(Ordering::Acquire) {
                // Producer is gone for good; drain whatever is left.
                filled += self.consumer.pop_slice(&mut buffer[filled..]);
                return Ok(filled);
            }
            std::thread::sleep(EMPTY_SLEEP);
        }
    }
}

/// Adapts a [`SampleSink`] into a chain unit.
pub struct SinkProcessor<S: SampleSink> {
    sink: S,
}

impl<S: SampleSink> SinkProcessor<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

impl<S: SampleSink> AudioProcessor for SinkProcessor<S> {
    fn process(&mut self, event: &mut AudioEvent) -> Result<Flow> {
        self.sink.write(event)?;
        Ok(Flow::Continue)
    }
}
