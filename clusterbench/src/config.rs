//! Configuration for the benchmark harness.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `CB__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! The defaults describe a local cluster of three masters and two chunkservers built into
//! `target/release`, followed by an upload phase and a read phase.
//!
//! # Environment Variables
//!
//! Environment variables use `CB__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `CB__WORK_DIR=/tmp/bench` sets the working directory
//! - `CB__BINARIES__CLIENT__PROGRAM=/opt/rustfs/client` sets the client executable
//! - `CB__STARTUP__SETTLE_DELAY=5s` waits five seconds after launching the cluster
//!
//! # YAML Configuration File
//!
//! ```yaml
//! work_dir: /tmp/bench
//! cluster:
//!   masters: ["127.0.0.1:50001"]
//!   chunkservers: ["127.0.0.1:50010", "127.0.0.1:50011"]
//! phases:
//!   - kind: upload
//!     samples: 10
//!     file_size: 1
//!     unit: mb
//!     profile: binary
//!     spacing: 500ms
//!     report: upload.txt
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::client::OperationKind;
use crate::error::HarnessResult;
use crate::report::SizeUnit;
use crate::topology::ClusterTopology;
use crate::workload::ContentProfile;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "CB__";

/// An executable together with arguments that precede the ones the harness appends.
///
/// For a master this becomes `<program> <args...> -a <ip:port>`, for the client
/// `<program> <args...> upload <file>`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CommandLine {
    /// Path to the executable. Relative paths are resolved by the OS against `PATH` or the
    /// working directory.
    pub program: PathBuf,

    /// Leading arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandLine {
    /// Creates a command line without leading arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Creates a [`tokio::process::Command`] with the leading arguments applied.
    pub fn command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Executables of the storage service under test.
#[derive(Debug, Deserialize, Serialize)]
pub struct Binaries {
    /// Coordinator executable, invoked as `<master> -a <ip:port>`.
    ///
    /// # Environment Variable
    ///
    /// `CB__BINARIES__MASTER__PROGRAM`
    pub master: CommandLine,

    /// Storage node executable, invoked as `<chunkserver> -a <ip:port>`.
    ///
    /// # Environment Variable
    ///
    /// `CB__BINARIES__CHUNKSERVER__PROGRAM`
    pub chunkserver: CommandLine,

    /// Client executable, invoked as `<client> upload <file>` or `<client> read <file>`.
    ///
    /// # Environment Variable
    ///
    /// `CB__BINARIES__CLIENT__PROGRAM`
    pub client: CommandLine,
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            master: CommandLine::new("target/release/master"),
            chunkserver: CommandLine::new("target/release/chunkserver"),
            client: CommandLine::new("target/release/client"),
        }
    }
}

/// Addresses of the nodes to launch.
#[derive(Debug, Deserialize, Serialize)]
pub struct Cluster {
    pub masters: Vec<SocketAddr>,
    pub chunkservers: Vec<SocketAddr>,
}

impl Default for Cluster {
    fn default() -> Self {
        let local = |port: u16| SocketAddr::from(([127, 0, 0, 1], port));
        Self {
            masters: vec![local(50001), local(50002), local(50003)],
            chunkservers: vec![local(50010), local(50011)],
        }
    }
}

/// A client command polled until it succeeds, used instead of the settle delay.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReadinessProbe {
    /// Arguments passed to the client executable, e.g. `["read", "probe.txt"]`.
    pub args: Vec<String>,

    /// Maximum number of probe invocations before giving up.
    pub attempts: u32,

    /// Pause between two failed probes.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

/// Controls how the harness waits for the cluster to come up and go down.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Startup {
    /// Fixed wait after launching the cluster when no readiness probe is configured.
    ///
    /// # Default
    ///
    /// `2s`
    ///
    /// # Environment Variable
    ///
    /// `CB__STARTUP__SETTLE_DELAY`
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,

    /// Optional bounded-retry readiness probe. Replaces the settle delay when set.
    pub readiness_probe: Option<ReadinessProbe>,

    /// How long to wait for a node to exit after `SIGTERM` before killing it.
    ///
    /// # Default
    ///
    /// `5s`
    ///
    /// # Environment Variable
    ///
    /// `CB__STARTUP__STOP_TIMEOUT`
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for Startup {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            readiness_probe: None,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// One benchmark pass over a fixed operation kind.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Phase {
    /// Which client operation is timed.
    pub kind: OperationKind,

    /// Number of iterations.
    pub samples: usize,

    /// Nominal size of every workload file, in `unit`s.
    pub file_size: u64,

    /// Unit of `file_size` and of the reported throughput.
    pub unit: SizeUnit,

    /// Content of generated workload files.
    pub profile: ContentProfile,

    /// Pause between two iterations.
    #[serde(with = "humantime_serde")]
    pub spacing: Duration,

    /// Destination of the text report, relative to the harness's working directory.
    pub report: PathBuf,
}

impl Phase {
    /// Size of every workload file in bytes.
    pub fn file_size_bytes(&self) -> u64 {
        self.file_size * self.unit.bytes()
    }
}

fn default_phases() -> Vec<Phase> {
    vec![
        Phase {
            kind: OperationKind::Upload,
            samples: 5,
            file_size: 10,
            unit: SizeUnit::Mb,
            profile: ContentProfile::Binary,
            spacing: Duration::from_secs(1),
            report: PathBuf::from("performance_upload_results.txt"),
        },
        Phase {
            kind: OperationKind::Read,
            samples: 5,
            file_size: 2,
            unit: SizeUnit::Kb,
            profile: ContentProfile::Text,
            spacing: Duration::from_secs(1),
            report: PathBuf::from("performance_results/read_performance_results.txt"),
        },
    ]
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// Logging configuration.
///
/// Logs are always written to stderr, leaving stdout to the phase summaries.
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `CB__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto`
    ///
    /// # Environment Variable
    ///
    /// `CB__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Main configuration struct for the harness.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Directory holding workload files and node state, and the current directory of every
    /// spawned process.
    ///
    /// # Default
    ///
    /// `.`
    ///
    /// # Environment Variable
    ///
    /// `CB__WORK_DIR`
    pub work_dir: PathBuf,

    /// Executables of the service under test.
    pub binaries: Binaries,

    /// Nodes to launch.
    pub cluster: Cluster,

    /// Startup and shutdown behavior.
    pub startup: Startup,

    /// Benchmark phases, run in order.
    pub phases: Vec<Phase>,

    /// Base seed for workload content. A random seed is chosen when unset.
    ///
    /// # Environment Variable
    ///
    /// `CB__SEED`
    pub seed: Option<u64>,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            binaries: Binaries::default(),
            cluster: Cluster::default(),
            startup: Startup::default(),
            phases: default_phases(),
            seed: None,
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the optional YAML file and the environment.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `CB__`)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, if a value is invalid, or if
    /// [`validate`](Self::validate) fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that cannot be expressed through deserialization.
    pub fn validate(&self) -> Result<()> {
        self.topology()?;

        if let Some(probe) = &self.startup.readiness_probe {
            anyhow::ensure!(
                probe.attempts > 0,
                "readiness_probe: attempts must be greater than zero"
            );
        }

        for phase in &self.phases {
            anyhow::ensure!(
                phase.file_size > 0,
                "{} phase: file_size must be greater than zero",
                phase.kind
            );
            anyhow::ensure!(
                phase.file_size.checked_mul(phase.unit.bytes()).is_some(),
                "{} phase: file_size of {} {} does not fit into 64 bits",
                phase.kind,
                phase.file_size,
                phase.unit
            );
        }
        Ok(())
    }

    /// Builds the cluster topology from the configured addresses.
    pub fn topology(&self) -> HarnessResult<ClusterTopology> {
        ClusterTopology::new(&self.cluster.masters, &self.cluster.chunkservers)
    }
}
