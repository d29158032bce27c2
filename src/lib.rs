//! # cadenza-core
//!
//! Real-time audio analysis toolkit: block dispatch, pitch estimation,
//! onset detection, transforms and effects over mono `f32` streams.
//!
//! ## Architecture
//!
//! ```text
//! SampleSource → BlockDispatcher (sliding window) → AudioEvent
//!                        │
//!            chain of AudioProcessor units
//!          ┌─────────────┼──────────────────┐
//!     PitchProcessor  ComplexOnsetDetector  PitchShifter / generators
//!          │              │
//!     PitchHandler     OnsetHandler
//! ```
//!
//! The dispatcher owns the read loop; everything downstream is a chain
//! unit invoked synchronously, in registration order, on every block.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod onset;
pub mod pitch;
pub mod processor;
pub mod resample;
pub mod shift;
pub mod source;
pub mod synth;
pub mod transform;

// Convenience re-exports for downstream crates
pub use dispatcher::{BlockDispatcher, DispatcherController, DispatcherHandle, WindowGeometry};
pub use error::{CadenzaError, Result};
pub use event::AudioEvent;
pub use onset::{ComplexOnsetDetector, OnsetEvent, OnsetHandler};
pub use pitch::{
    DynamicWavelet, FftYin, PitchAlgorithm, PitchDetector, PitchEstimate, PitchHandler,
    PitchProcessor, Yin,
};
pub use processor::{AudioProcessor, Flow};
pub use shift::{PitchShiftControl, PitchShifter};
pub use source::{create_sample_ring, RingSource, SampleSink, SampleSource, StreamControl};
