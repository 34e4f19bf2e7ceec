//! Numerical kernels.
//!
//! Pure functions over sample vectors and arrays. None of them touches the store; structural
//! problems with the input are reported as [`crate::Error::ComputationFailed`].

pub mod abc;
pub mod asd;
pub mod decay;
pub mod fft;
pub mod genetic;
pub mod math;
pub mod polyfit;
pub mod regression;
pub mod smoothing;
pub mod spline;
