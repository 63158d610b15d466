//! Test utilities for the benchmark harness.
//!
//! This crate provides a fake storage cluster and test logging, so that integration tests can
//! exercise full benchmark runs without a real storage service. See the modules for all available
//! utilities.

pub mod fake;
pub mod tracing;
