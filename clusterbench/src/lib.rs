//! A benchmark harness for a distributed chunk storage service.
//!
//! The harness launches a local cluster of masters and chunkservers, drives the storage client
//! through sequential upload and read phases using generated workload files, and reduces the
//! measured latencies into fixed-layout performance reports.
//!
//! The entry point is [`harness::run`]. Every spawned process is torn down when a run ends, no
//! matter whether it completed, failed or was interrupted.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod harness;
pub mod observability;
pub mod report;
pub mod runner;
pub mod supervisor;
pub mod topology;
pub mod workload;
