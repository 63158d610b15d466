//! Error types for the benchmark harness.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::topology::NodeId;

/// Errors that abort a benchmark run.
///
/// Failed client invocations are not represented here. They are recorded as failed
/// [`OperationRecord`](crate::client::OperationRecord)s and the run continues.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A workload file could not be written.
    #[error("failed to generate workload file {}: {source}", path.display())]
    Generation {
        /// Destination of the workload file.
        path: PathBuf,
        /// The underlying filesystem error.
        source: io::Error,
    },

    /// A stale per-node state directory could not be removed before startup.
    #[error("failed to clean state directory {}: {source}", path.display())]
    StateCleanup {
        /// The state directory that was to be removed.
        path: PathBuf,
        /// The underlying filesystem error.
        source: io::Error,
    },

    /// A cluster process could not be launched.
    #[error("failed to spawn {node}: {source}")]
    Spawn {
        /// The node whose process failed to start.
        node: NodeId,
        /// The underlying OS error.
        source: io::Error,
    },

    /// The readiness probe never succeeded.
    #[error("cluster not ready after {attempts} probe attempts")]
    NotReady {
        /// Number of probes that were issued.
        attempts: u32,
    },

    /// Two nodes in the topology share an address.
    #[error("duplicate node address {0}")]
    DuplicateAddress(SocketAddr),

    /// A performance report could not be persisted.
    #[error("failed to write report {}: {source}", path.display())]
    Report {
        /// Destination of the report.
        path: PathBuf,
        /// The underlying filesystem error.
        source: io::Error,
    },
}

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Reasons a sequence of records cannot be reduced to a report.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    /// The phase produced no samples, so mean and throughput are undefined.
    #[error("insufficient data: no samples recorded")]
    NoData,

    /// All samples completed in zero time, so throughput is undefined.
    #[error("insufficient data: total elapsed time is zero")]
    ZeroElapsed,
}
