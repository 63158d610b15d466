use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;

use crate::client::OperationKind;
use crate::config::Config;
use crate::{harness, observability};

/// Benchmark harness for a distributed chunk storage service.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Probe(ProbeCommand),
    Version(VersionCommand),
}

/// launch the cluster, run the benchmark phases and write the reports
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// only run phases of this kind ("upload" or "read"); may be repeated
    #[argh(option)]
    phase: Vec<OperationKind>,
}

/// run the readiness probe once against an already running cluster
///
/// Exits with an error if the client cannot reach the cluster.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "probe")]
struct ProbeCommand {}

/// print the harness version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(RunCommand { phase }) => {
                let reports = harness::run(config, &phase).await?;
                tracing::info!(reports = reports.len(), "benchmark finished");
                Ok(())
            }
            Command::Probe(ProbeCommand {}) => harness::probe(config).await,
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    })
}
