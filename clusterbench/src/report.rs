//! Reduces per-operation timings into a [`PerformanceReport`] and persists it.

use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::client::{OperationKind, OperationRecord};
use crate::error::{AggregateError, HarnessError, HarnessResult};

/// Unit for nominal file sizes and throughput.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    /// 1024 bytes.
    Kb,
    /// 1024 * 1024 bytes.
    Mb,
}

impl SizeUnit {
    /// Number of bytes in one unit.
    pub fn bytes(&self) -> u64 {
        match self {
            SizeUnit::Kb => 1024,
            SizeUnit::Mb => 1024 * 1024,
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeUnit::Kb => f.write_str("KB"),
            SizeUnit::Mb => f.write_str("MB"),
        }
    }
}

/// The configured workload parameters throughput is computed from.
///
/// The harness does not re-measure generated files; every file is assumed to have `file_size`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NominalWorkload {
    /// Configured size of every file, in `unit`s.
    pub file_size: u64,
    /// Unit of `file_size` and of the throughput.
    pub unit: SizeUnit,
    /// Number of files the phase processed.
    pub count: usize,
}

/// Approximate latency percentiles.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Percentiles {
    /// Median latency.
    pub p50: Duration,
    /// 90th percentile latency.
    pub p90: Duration,
    /// 99th percentile latency.
    pub p99: Duration,
}

/// Summary statistics of one benchmark phase.
#[derive(Clone, Debug, PartialEq)]
pub struct PerformanceReport {
    /// The operation the phase timed.
    pub kind: OperationKind,
    /// Number of recorded operations.
    pub samples: usize,
    /// Number of recorded operations whose client exited unsuccessfully.
    pub failures: usize,
    /// Sum of all recorded durations, failures included.
    pub total: Duration,
    /// Arithmetic mean over all recorded durations.
    pub mean: Duration,
    /// Nominal data volume divided by total time, in `nominal.unit` per second.
    pub throughput: f64,
    /// Latency distribution over all recorded operations.
    pub latency: Percentiles,
    /// The workload parameters the throughput is based on.
    pub nominal: NominalWorkload,
}

/// Reduces `records` into a report.
///
/// Failed operations contribute their elapsed time like successful ones. The total is summed in
/// integer nanoseconds, so the result does not depend on the order of `records`.
pub fn aggregate(
    kind: OperationKind,
    records: &[OperationRecord],
    nominal: NominalWorkload,
) -> Result<PerformanceReport, AggregateError> {
    if records.is_empty() {
        return Err(AggregateError::NoData);
    }

    let total: Duration = records.iter().map(|record| record.elapsed).sum();
    if total.is_zero() {
        return Err(AggregateError::ZeroElapsed);
    }

    let samples = records.len();
    let failures = records.iter().filter(|record| !record.is_success()).count();
    let mean = total.div_f64(samples as f64);
    let volume = (nominal.count as u64 * nominal.file_size) as f64;
    let throughput = volume / total.as_secs_f64();

    let mut sketch = DDSketch::default();
    for record in records {
        sketch.add(record.elapsed.as_secs_f64());
    }
    let quantile = |q| {
        let secs = sketch.quantile(q).ok().flatten().unwrap_or_default();
        Duration::from_secs_f64(secs.max(0.0))
    };
    let latency = Percentiles {
        p50: quantile(0.5),
        p90: quantile(0.9),
        p99: quantile(0.99),
    };

    Ok(PerformanceReport {
        kind,
        samples,
        failures,
        total,
        mean,
        throughput,
        latency,
        nominal,
    })
}

impl PerformanceReport {
    /// Renders the fixed-layout text report.
    pub fn render(&self) -> String {
        let title = self.kind.title();
        let unit = self.nominal.unit;

        format!(
            "Performance Metrics for {title} Test\n\
             Total Files {title}: {count}\n\
             File Size: {size} {unit}\n\
             Total Time Taken: {total:.2} seconds\n\
             Average {title} Time: {mean:.2} seconds\n\
             Throughput: {throughput:.2} {unit}/s\n",
            count = self.nominal.count,
            size = self.nominal.file_size,
            total = self.total.as_secs_f64(),
            mean = self.mean.as_secs_f64(),
            throughput = self.throughput,
        )
    }

    /// Writes the report to `path`, replacing any previous report there.
    ///
    /// Missing parent directories are created.
    pub async fn persist(&self, path: &Path) -> HarnessResult<()> {
        write_report(path, &self.render())
            .await
            .map_err(|source| HarnessError::Report {
                path: path.to_owned(),
                source,
            })?;

        tracing::info!(kind = %self.kind, path = %path.display(), "report saved");
        Ok(())
    }

    /// Prints a colored summary of the report to stdout.
    pub fn print_summary(&self) {
        let unit = self.nominal.unit;

        print!(
            "{} ({} ops",
            format!("{}:", self.kind.title().to_uppercase()).bold().green(),
            self.samples.bold()
        );
        if self.failures > 0 {
            print!(", {}", format!("{} FAILURES", self.failures).bold().red());
        }
        println!(")");
        println!(
            "  files: {} x {} {unit}",
            self.nominal.count,
            self.nominal.file_size
        );
        println!(
            "  total: {:.2}s; avg: {:.2}s; throughput: {} {unit}/s",
            self.total.as_secs_f64(),
            self.mean.as_secs_f64(),
            format!("{:.2}", self.throughput).bold()
        );
        println!(
            "  p50: {:.2?}; p90: {:.2?}; p99: {:.2?}",
            self.latency.p50, self.latency.p90, self.latency.p99
        );
    }
}

async fn write_report(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientOutput, Outcome};

    fn record(secs: f64, outcome: Outcome) -> OperationRecord {
        OperationRecord {
            kind: OperationKind::Upload,
            elapsed: Duration::from_secs_f64(secs),
            outcome,
            output: ClientOutput::default(),
        }
    }

    fn records(secs: &[f64]) -> Vec<OperationRecord> {
        secs.iter().map(|s| record(*s, Outcome::Success)).collect()
    }

    const TEN_MB_X5: NominalWorkload = NominalWorkload {
        file_size: 10,
        unit: SizeUnit::Mb,
        count: 5,
    };

    #[test]
    fn upload_scenario() {
        let records = records(&[1.0, 1.2, 0.9, 1.1, 1.0]);
        let report = aggregate(OperationKind::Upload, &records, TEN_MB_X5).unwrap();

        assert_eq!(report.samples, 5);
        assert_eq!(report.failures, 0);
        assert!((report.total.as_secs_f64() - 5.2).abs() < 1e-6);
        assert!((report.mean.as_secs_f64() - 1.04).abs() < 1e-6);
        assert!((report.throughput - 50.0 / 5.2).abs() < 1e-6);
        assert_eq!(format!("{:.2}", report.throughput), "9.62");
    }

    #[test]
    fn empty_phase_has_no_data() {
        let err = aggregate(OperationKind::Read, &[], TEN_MB_X5).unwrap_err();
        assert_eq!(err, AggregateError::NoData);
    }

    #[test]
    fn zero_elapsed_is_insufficient() {
        let records = records(&[0.0, 0.0]);
        let err = aggregate(OperationKind::Read, &records, TEN_MB_X5).unwrap_err();
        assert_eq!(err, AggregateError::ZeroElapsed);
    }

    #[test]
    fn failures_contribute_time() {
        let mut records = records(&[1.0, 1.0, 1.0, 1.0]);
        records.insert(2, record(0.8, Outcome::Failure));

        let report = aggregate(OperationKind::Read, &records, TEN_MB_X5).unwrap();

        assert_eq!(report.samples, 5);
        assert_eq!(report.failures, 1);
        assert!((report.total.as_secs_f64() - 4.8).abs() < 1e-6);
        assert!((report.mean.as_secs_f64() - 0.96).abs() < 1e-6);
        assert!((report.throughput - 50.0 / 4.8).abs() < 1e-6);
    }

    #[test]
    fn aggregation_is_order_independent() {
        let secs = [0.137, 2.5, 0.001, 1.75, 0.333, 0.9];
        let forward = records(&secs);
        let mut reversed = forward.clone();
        reversed.reverse();
        let mut rotated = forward.clone();
        rotated.rotate_left(2);

        let nominal = NominalWorkload {
            file_size: 3,
            unit: SizeUnit::Kb,
            count: secs.len(),
        };
        let a = aggregate(OperationKind::Upload, &forward, nominal).unwrap();
        let b = aggregate(OperationKind::Upload, &reversed, nominal).unwrap();
        let c = aggregate(OperationKind::Upload, &rotated, nominal).unwrap();

        assert_eq!((a.total, a.mean, a.throughput), (b.total, b.mean, b.throughput));
        assert_eq!((a.total, a.mean, a.throughput), (c.total, c.mean, c.throughput));
    }

    #[test]
    fn throughput_times_total_is_volume() {
        for secs in [&[0.5][..], &[0.01, 0.02, 0.03], &[7.0, 13.0, 0.25, 4.4]] {
            let nominal = NominalWorkload {
                file_size: 2,
                unit: SizeUnit::Kb,
                count: secs.len(),
            };
            let report = aggregate(OperationKind::Read, &records(secs), nominal).unwrap();
            let volume = (nominal.count as u64 * nominal.file_size) as f64;
            assert!((report.throughput * report.total.as_secs_f64() - volume).abs() < 1e-9);
        }
    }

    #[test]
    fn renders_fixed_layout() {
        let records = records(&[1.0, 1.2, 0.9, 1.1, 1.0]);
        let report = aggregate(OperationKind::Upload, &records, TEN_MB_X5).unwrap();

        assert_eq!(
            report.render(),
            "Performance Metrics for Upload Test\n\
             Total Files Upload: 5\n\
             File Size: 10 MB\n\
             Total Time Taken: 5.20 seconds\n\
             Average Upload Time: 1.04 seconds\n\
             Throughput: 9.62 MB/s\n"
        );
    }

    #[tokio::test]
    async fn persist_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("performance_results").join("read.txt");

        let nominal = NominalWorkload {
            file_size: 2,
            unit: SizeUnit::Kb,
            count: 3,
        };
        let report = aggregate(OperationKind::Read, &records(&[0.2, 0.3, 0.5]), nominal).unwrap();

        report.persist(&path).await.unwrap();
        let first = std::fs::read(&path).unwrap();
        report.persist(&path).await.unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(String::from_utf8(first).unwrap(), report.render());
        assert!(report.render().contains("Throughput: 6.00 KB/s"));
    }
}
