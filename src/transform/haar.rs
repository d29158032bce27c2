//! In-place multi-level Haar wavelet transform.
//!
//! Gap-doubling layout: at stride `s` (1, 2, 4, …) each pair
//! `(data[i], data[i + s])` becomes `((a + b) / 2, (a - b) / 2)` with the
//! detail stored at the partner index. The averaging form keeps the inverse
//! exact: `forward([5, 1, 2, 8]) == [4, 2, -1, -3]`.

use crate::error::{CadenzaError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct HaarWavelet;

impl HaarWavelet {
    pub fn new() -> Self {
        Self
    }

    /// Full forward decomposition of `data`, in place.
    ///
    /// # Errors
    /// `CadenzaError::InvalidLength` unless the length is a power of two.
    pub fn transform(&self, data: &mut [f32]) -> Result<()> {
        check_power_of_two(data.len())?;
        let mut stride = 1;
        while stride < data.len() {
            let mut i = 0;
            while i < data.len() {
                let a = data[i];
                let b = data[i + stride];
                data[i] = (a + b) / 2.0;
                data[i + stride] = (a - b) / 2.0;
                i += stride * 2;
            }
            stride *= 2;
        }
        Ok(())
    }

    /// Exactly undoes [`HaarWavelet::transform`], in place.
    pub fn inverse_transform(&self, data: &mut [f32]) -> Result<()> {
        check_power_of_two(data.len())?;
        let mut stride = data.len() / 2;
        while stride >= 1 {
            let mut i = 0;
            while i < data.len() {
                let avg = data[i];
                let diff = data[i + stride];
                data[i] = avg + diff;
                data[i + stride] = avg - diff;
                i += stride * 2;
            }
            stride /= 2;
        }
        Ok(())
    }
}

fn check_power_of_two(len: usize) -> Result<()> {
    if len == 0 || !len.is_power_of_two() {
        return Err(CadenzaError::InvalidLength(len));
    }
    Ok(())
}
