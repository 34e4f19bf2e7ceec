#![allow(dead_code)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

extern crate blas_src;

pub mod config;
pub mod curve;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod kernels;
pub mod method;
pub mod methods;
pub mod params;
pub mod parsers;
pub mod registry;
pub mod steps;
pub mod store;

pub use error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;
