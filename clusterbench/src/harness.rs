//! End-to-end orchestration of a benchmark run.
//!
//! A run launches the cluster, waits for it to become ready, executes the configured phases in
//! order and reports each of them. The cluster is torn down on every exit path: after the last
//! phase, after a fatal error and after an interrupt.

use anyhow::Result;

use crate::client::{ClientInvoker, OperationKind};
use crate::config::{Config, Phase};
use crate::report::{self, NominalWorkload, PerformanceReport};
use crate::runner::BenchmarkRunner;
use crate::supervisor::ProcessSupervisor;

/// Runs the full benchmark described by `config`.
///
/// With a non-empty `phase_filter`, only phases of the listed kinds are executed. Returns the
/// reports of all phases that produced data.
pub async fn run(config: Config, phase_filter: &[OperationKind]) -> Result<Vec<PerformanceReport>> {
    let topology = config.topology()?;
    let phases: Vec<&Phase> = config
        .phases
        .iter()
        .filter(|phase| phase_filter.is_empty() || phase_filter.contains(&phase.kind))
        .collect();

    let seed = config.seed.unwrap_or_else(rand::random);
    tracing::info!(
        seed,
        nodes = topology.len(),
        phases = phases.len(),
        work_dir = %config.work_dir.display(),
        "starting benchmark",
    );

    let mut supervisor = ProcessSupervisor::new(
        &config.binaries,
        &config.work_dir,
        config.startup.stop_timeout,
    );
    let client = ClientInvoker::new(config.binaries.client.clone(), &config.work_dir);
    let mut runner = BenchmarkRunner::new(client, &config.work_dir, seed);

    let benchmark = async {
        supervisor.start_cluster(&topology).await?;
        supervisor
            .await_ready(&config.startup, runner.client_mut())
            .await?;

        let mut reports = Vec::with_capacity(phases.len());
        for phase in &phases {
            if let Some(report) = run_phase(&mut runner, &config, phase).await? {
                reports.push(report);
            }
        }
        anyhow::Ok(reports)
    };

    let result = tokio::select! {
        result = benchmark => result,
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => Err(anyhow::anyhow!("benchmark interrupted")),
            Err(err) => Err(anyhow::Error::new(err).context("failed to listen for interrupt")),
        },
    };

    if let Err(ref err) = result {
        tracing::error!(error = &**err as &dyn std::error::Error, "benchmark aborted");
    }

    supervisor.shutdown_all().await;
    result
}

async fn run_phase(
    runner: &mut BenchmarkRunner,
    config: &Config,
    phase: &Phase,
) -> Result<Option<PerformanceReport>> {
    let records = runner.run_phase(phase).await?;
    let nominal = NominalWorkload {
        file_size: phase.file_size,
        unit: phase.unit,
        count: records.len(),
    };

    let report = match report::aggregate(phase.kind, &records, nominal) {
        Ok(report) => report,
        Err(err) => {
            tracing::warn!(
                kind = %phase.kind,
                error = &err as &dyn std::error::Error,
                "skipping report",
            );
            return Ok(None);
        }
    };

    report.print_summary();
    report.persist(&config.work_dir.join(&phase.report)).await?;
    Ok(Some(report))
}

/// Runs the configured readiness probe once against an already running cluster.
///
/// Without a configured probe, this runs `<client> read` on a file that is not expected to exist
/// and only checks that the client can be executed.
pub async fn probe(config: Config) -> Result<()> {
    let mut client = ClientInvoker::new(config.binaries.client.clone(), &config.work_dir);

    match &config.startup.readiness_probe {
        Some(probe) => {
            anyhow::ensure!(client.probe(&probe.args).await, "readiness probe failed");
            tracing::info!("cluster is ready");
        }
        None => {
            let record = client.invoke(OperationKind::Read, "probe.txt").await;
            anyhow::ensure!(
                record.output.code.is_some(),
                "client could not be executed: {}",
                record.output.stderr.trim_end()
            );
            tracing::info!(code = ?record.output.code, "client is executable");
        }
    }

    Ok(())
}
