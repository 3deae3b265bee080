//! Binary delta encoding.
//!
//! Block diffs need both inputs in memory, so every allocation here is
//! reserved up front and a failed reservation is reported as
//! [`ArtiflowError::ResourceExhausted`](crate::errors::ArtiflowError::ResourceExhausted)
//! instead of aborting the process.

pub mod bsdiff;

pub use bsdiff::{diff, diff_memory_estimate, patch};
