//! Spectral and wavelet transforms.

pub mod fft;
pub mod haar;

pub use fft::FloatFft;
pub use haar::HaarWavelet;
