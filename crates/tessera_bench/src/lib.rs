//! Shared fixtures for the Tessera benchmarks.

pub mod utils;
