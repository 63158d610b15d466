//! Launches a local storage cluster, benchmarks its client and writes performance reports.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use anyhow::Result;

fn main() -> Result<()> {
    clusterbench::cli::execute()
}
