pub mod config;
pub mod error;
pub mod tensor;
pub mod ops_cpu;
pub mod nn;
pub mod profiler;

pub use error::{Error, Result};
