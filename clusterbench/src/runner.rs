//! Sequential benchmark phases.
//!
//! A phase runs a fixed number of isolated samples: generate a workload file, run the timed
//! client operation, record it, delete the file and pause before the next sample. Only one client
//! process is ever in flight.

use std::path::PathBuf;

use bytesize::ByteSize;

use crate::client::{ClientInvoker, OperationKind, OperationRecord};
use crate::config::Phase;
use crate::error::HarnessResult;
use crate::workload;

/// Drives benchmark phases through a [`ClientInvoker`].
#[derive(Debug)]
pub struct BenchmarkRunner {
    client: ClientInvoker,
    work_dir: PathBuf,
    seed: u64,
}

impl BenchmarkRunner {
    /// Creates a runner writing workload files into `work_dir`.
    ///
    /// `seed` determines the content of every generated file.
    pub fn new(client: ClientInvoker, work_dir: impl Into<PathBuf>, seed: u64) -> Self {
        Self {
            client,
            work_dir: work_dir.into(),
            seed,
        }
    }

    /// Gives access to the client, e.g. for readiness probes before the first phase.
    pub fn client_mut(&mut self) -> &mut ClientInvoker {
        &mut self.client
    }

    /// Runs `phase.samples` iterations and returns one record per iteration, in order.
    ///
    /// Failed client operations are recorded and do not stop the phase. Failing to generate a
    /// workload file aborts the phase with an error.
    pub async fn run_phase(&mut self, phase: &Phase) -> HarnessResult<Vec<OperationRecord>> {
        let size = phase.file_size_bytes();
        tracing::info!(
            kind = %phase.kind,
            samples = phase.samples,
            file_size = %ByteSize::b(size),
            "starting {} phase",
            phase.kind,
        );

        let mut records = Vec::with_capacity(phase.samples);
        for index in 0..phase.samples {
            if index > 0 && !phase.spacing.is_zero() {
                tokio::time::sleep(phase.spacing).await;
            }

            let path = self.work_dir.join(workload::file_name(phase.kind, index));
            let seed = self.sample_seed(phase.kind, index);
            let file = workload::generate(&path, size, phase.profile, seed).await?;

            let record = self.run_sample(phase.kind, file.name()).await;
            tracing::info!(
                kind = %phase.kind,
                sample = index + 1,
                of = phase.samples,
                elapsed = ?record.elapsed,
                outcome = ?record.outcome,
                "sample finished",
            );
            records.push(record);

            drop(file);
        }

        let failures = records.iter().filter(|r| !r.is_success()).count();
        tracing::info!(kind = %phase.kind, samples = records.len(), failures, "phase finished");

        Ok(records)
    }

    /// Performs one sample and returns the record of the timed operation.
    ///
    /// A read needs the file to exist in the cluster, so it is preceded by an untimed upload whose
    /// record is discarded.
    async fn run_sample(&mut self, kind: OperationKind, file_name: &str) -> OperationRecord {
        match kind {
            OperationKind::Upload => self.client.invoke(OperationKind::Upload, file_name).await,
            OperationKind::Read => {
                let setup = self.client.invoke(OperationKind::Upload, file_name).await;
                if !setup.is_success() {
                    tracing::warn!(file_name, "setup upload failed, timing the read anyway");
                }
                self.client.invoke(OperationKind::Read, file_name).await
            }
        }
    }

    fn sample_seed(&self, kind: OperationKind, index: usize) -> u64 {
        let phase_offset = match kind {
            OperationKind::Upload => 0,
            OperationKind::Read => 1 << 32,
        };
        self.seed.wrapping_add(phase_offset).wrapping_add(index as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::client::Outcome;
    use crate::config::CommandLine;
    use crate::report::SizeUnit;
    use crate::workload::ContentProfile;

    /// A client that logs every call and keeps uploaded files in `store/`.
    const CLIENT: &str = r#"
        echo "$1 $2" >> calls.log
        mkdir -p store
        case "$1" in
            upload) cp "$2" "store/$2" ;;
            read) test -f "store/$2" && test ! -e "store/fail_read" ;;
            *) exit 2 ;;
        esac
    "#;

    fn runner(dir: &std::path::Path, script: &str) -> BenchmarkRunner {
        let client = CommandLine {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "client".into()],
        };
        BenchmarkRunner::new(ClientInvoker::new(client, dir), dir, 1)
    }

    fn phase(kind: OperationKind, samples: usize) -> Phase {
        Phase {
            kind,
            samples,
            file_size: 2,
            unit: SizeUnit::Kb,
            profile: ContentProfile::Text,
            spacing: Duration::ZERO,
            report: PathBuf::from("report.txt"),
        }
    }

    fn calls(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    #[tokio::test]
    async fn upload_phase_records_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path(), CLIENT);

        let records = runner.run_phase(&phase(OperationKind::Upload, 4)).await.unwrap();

        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.kind == OperationKind::Upload));
        assert!(records.iter().all(|r| r.outcome == Outcome::Success));
        assert_eq!(
            calls(dir.path()),
            [
                "upload test_file_upload_0.txt",
                "upload test_file_upload_1.txt",
                "upload test_file_upload_2.txt",
                "upload test_file_upload_3.txt",
            ]
        );

        let uploaded = std::fs::metadata(dir.path().join("store/test_file_upload_0.txt")).unwrap();
        assert_eq!(uploaded.len(), 2048);
    }

    #[tokio::test]
    async fn read_phase_records_only_reads() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path(), CLIENT);

        let records = runner.run_phase(&phase(OperationKind::Read, 3)).await.unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.kind == OperationKind::Read));
        assert!(records.iter().all(|r| r.is_success()));
        assert_eq!(
            calls(dir.path()),
            [
                "upload test_file_read_0.txt",
                "read test_file_read_0.txt",
                "upload test_file_read_1.txt",
                "read test_file_read_1.txt",
                "upload test_file_read_2.txt",
                "read test_file_read_2.txt",
            ]
        );
    }

    #[tokio::test]
    async fn read_duration_excludes_setup_upload() {
        let dir = tempfile::tempdir().unwrap();
        let slow_upload = r#"case "$1" in upload) sleep 0.5 ;; read) exit 0 ;; esac"#;
        let mut runner = runner(dir.path(), slow_upload);

        let records = runner.run_phase(&phase(OperationKind::Read, 1)).await.unwrap();

        assert_eq!(records.len(), 1);
        assert!(records[0].elapsed < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn failures_are_recorded_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let flaky = r#"
            echo x >> calls.log
            if [ "$1" = read ] && [ "$2" = test_file_read_2.txt ]; then
                echo "chunk unavailable" >&2
                exit 1
            fi
        "#;
        let mut runner = runner(dir.path(), flaky);

        let records = runner.run_phase(&phase(OperationKind::Read, 5)).await.unwrap();

        assert_eq!(records.len(), 5);
        let outcomes: Vec<_> = records.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            [
                Outcome::Success,
                Outcome::Success,
                Outcome::Failure,
                Outcome::Success,
                Outcome::Success,
            ]
        );
        assert_eq!(records[2].output.stderr, "chunk unavailable\n");
    }

    #[tokio::test]
    async fn workload_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path(), "exit 1");

        runner.run_phase(&phase(OperationKind::Upload, 3)).await.unwrap();
        runner.run_phase(&phase(OperationKind::Read, 3)).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .filter(|name| name.to_string_lossy().starts_with("test_file_"))
            .collect();
        assert!(leftovers.is_empty(), "leftover files: {leftovers:?}");
    }

    #[tokio::test]
    async fn empty_phase_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path(), CLIENT);

        let records = runner.run_phase(&phase(OperationKind::Upload, 0)).await.unwrap();

        assert!(records.is_empty());
        assert!(calls(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn samples_are_spaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path(), "exit 0");
        let phase = Phase {
            spacing: Duration::from_millis(100),
            ..phase(OperationKind::Upload, 3)
        };

        let start = Instant::now();
        runner.run_phase(&phase).await.unwrap();

        // spacing only between samples
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn generation_failure_aborts_phase() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let client = CommandLine::new("true");
        let mut runner = BenchmarkRunner::new(ClientInvoker::new(client, dir.path()), missing, 0);

        let err = runner.run_phase(&phase(OperationKind::Upload, 2)).await.unwrap_err();
        assert!(matches!(err, crate::error::HarnessError::Generation { .. }));
    }
}
