//! Lifecycle of the long-running cluster processes.
//!
//! The [`ProcessSupervisor`] owns one child process per node. Starting the cluster first wipes
//! every chunkserver's state directory so each run begins from empty storage. Stopping the
//! cluster is best effort: every process is signalled exactly once and failures are only logged.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Child;

use crate::client::ClientInvoker;
use crate::config::{Binaries, CommandLine, Startup};
use crate::error::{HarnessError, HarnessResult};
use crate::topology::{ClusterTopology, NodeId, NodeRole};

/// A cluster process owned by the supervisor.
#[derive(Debug)]
pub struct ManagedProcess {
    /// The node this process runs.
    pub node: NodeId,
    /// The full command line, for logging.
    pub command: String,
    /// When the process was spawned.
    pub started: Instant,
    child: Child,
}

impl ManagedProcess {
    /// The OS process id, or `None` once the process has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Starts, tracks and terminates the processes of a cluster.
#[derive(Debug)]
pub struct ProcessSupervisor {
    work_dir: PathBuf,
    master: CommandLine,
    chunkserver: CommandLine,
    stop_timeout: Duration,
    processes: BTreeMap<NodeId, ManagedProcess>,
}

impl ProcessSupervisor {
    /// Creates a supervisor launching nodes from `binaries` inside `work_dir`.
    ///
    /// `stop_timeout` bounds how long a node may take to exit after `SIGTERM`.
    pub fn new(binaries: &Binaries, work_dir: impl Into<PathBuf>, stop_timeout: Duration) -> Self {
        Self {
            work_dir: work_dir.into(),
            master: binaries.master.clone(),
            chunkserver: binaries.chunkserver.clone(),
            stop_timeout,
            processes: BTreeMap::new(),
        }
    }

    /// Wipes stale state and launches every node of `topology` in the background.
    ///
    /// This does not wait for the nodes to become ready, see [`await_ready`](Self::await_ready).
    /// If a node fails to spawn, the nodes launched so far stay registered so that
    /// [`shutdown_all`](Self::shutdown_all) can still stop them.
    pub async fn start_cluster(&mut self, topology: &ClusterTopology) -> HarnessResult<()> {
        for dir in topology.state_dirs(&self.work_dir) {
            remove_state_dir(&dir).await?;
        }

        for node in topology.nodes() {
            self.spawn(*node)?;
        }

        tracing::info!(nodes = self.processes.len(), "cluster launched");
        Ok(())
    }

    fn spawn(&mut self, node: NodeId) -> HarnessResult<()> {
        let binary = match node.role {
            NodeRole::Master => &self.master,
            NodeRole::Chunkserver => &self.chunkserver,
        };
        let addr = node.addr.to_string();

        let mut command = binary.command();
        command
            .arg("-a")
            .arg(&addr)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|source| HarnessError::Spawn { node, source })?;

        let process = ManagedProcess {
            node,
            command: format!("{binary} -a {addr}"),
            started: Instant::now(),
            child,
        };
        tracing::info!(%node, pid = ?process.id(), "started {}", process.command);
        self.processes.insert(node, process);

        Ok(())
    }

    /// Waits until the cluster can serve requests.
    ///
    /// Without a readiness probe this sleeps for the configured settle delay. With a probe, the
    /// probe command is polled until it succeeds or its attempts are exhausted.
    pub async fn await_ready(
        &self,
        startup: &Startup,
        client: &mut ClientInvoker,
    ) -> HarnessResult<()> {
        let Some(probe) = &startup.readiness_probe else {
            tracing::info!(delay = ?startup.settle_delay, "waiting for cluster to settle");
            tokio::time::sleep(startup.settle_delay).await;
            return Ok(());
        };

        for attempt in 1..=probe.attempts {
            if client.probe(&probe.args).await {
                tracing::info!(attempt, "cluster is ready");
                return Ok(());
            }
            tracing::debug!(attempt, "cluster not ready yet");
            if attempt < probe.attempts {
                tokio::time::sleep(probe.interval).await;
            }
        }

        Err(HarnessError::NotReady {
            attempts: probe.attempts,
        })
    }

    /// Number of processes currently owned by the supervisor.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Returns `true` if no process is owned.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Terminates every owned process.
    ///
    /// All processes receive `SIGTERM` first; each is then given the stop timeout to exit before
    /// it is killed. Processes that already died are reported. Nothing here fails the run.
    pub async fn shutdown_all(&mut self) {
        let processes = std::mem::take(&mut self.processes);
        if processes.is_empty() {
            return;
        }
        tracing::info!(nodes = processes.len(), "stopping cluster");

        let mut running = Vec::with_capacity(processes.len());
        for (node, mut process) in processes {
            match process.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::warn!(%node, %status, uptime = ?process.started.elapsed(), "node exited before shutdown");
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(%node, error = &err as &dyn std::error::Error, "failed to query node status");
                }
            }

            if let Err(err) = terminate(&process.child) {
                tracing::warn!(%node, error = &err as &dyn std::error::Error, "failed to signal node");
            }
            running.push(process);
        }

        for mut process in running {
            let node = process.node;
            match tokio::time::timeout(self.stop_timeout, process.child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(%node, %status, "node stopped"),
                Ok(Err(err)) => {
                    tracing::warn!(%node, error = &err as &dyn std::error::Error, "failed to wait for node");
                }
                Err(_) => {
                    tracing::warn!(%node, timeout = ?self.stop_timeout, "node did not stop in time, killing");
                    if let Err(err) = process.child.kill().await {
                        tracing::error!(%node, error = &err as &dyn std::error::Error, "failed to kill node");
                    }
                }
            }
        }

        tracing::info!("cluster stopped");
    }
}

/// Requests graceful termination with `SIGTERM`.
fn terminate(child: &Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
}

async fn remove_state_dir(dir: &Path) -> HarnessResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            tracing::info!(dir = %dir.display(), "removed stale state directory");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(HarnessError::StateCleanup {
            path: dir.to_owned(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::config::ReadinessProbe;

    fn shell(script: &str) -> CommandLine {
        CommandLine {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "node".into()],
        }
    }

    fn binaries(master: &str, chunkserver: &str) -> Binaries {
        Binaries {
            master: shell(master),
            chunkserver: shell(chunkserver),
            client: shell("exit 0"),
        }
    }

    fn topology() -> ClusterTopology {
        let addr = |port: u16| SocketAddr::from(([127, 0, 0, 1], port));
        ClusterTopology::new(&[addr(50001)], &[addr(50010), addr(50011)]).unwrap()
    }

    fn is_alive(pid: u32) -> bool {
        signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    async fn start_removes_stale_state() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("127.0.0.1_50010");
        std::fs::create_dir_all(stale.join("chunks")).unwrap();
        std::fs::write(stale.join("chunks").join("0"), "old").unwrap();
        let unrelated = dir.path().join("127.0.0.1_50001");
        std::fs::create_dir_all(&unrelated).unwrap();

        let bins = binaries("exec sleep 30", "exec sleep 30");
        let mut supervisor = ProcessSupervisor::new(&bins, dir.path(), Duration::from_secs(5));
        supervisor.start_cluster(&topology()).await.unwrap();

        assert!(!stale.exists());
        // masters own no state directory
        assert!(unrelated.exists());
        assert_eq!(supervisor.len(), 3);

        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn nodes_receive_address_argument() {
        let dir = tempfile::tempdir().unwrap();
        let bins = binaries(
            "exec sleep 30",
            r#"mkdir "$(echo "$2" | tr ':' '_')"; exec sleep 30"#,
        );
        let mut supervisor = ProcessSupervisor::new(&bins, dir.path(), Duration::from_secs(5));
        supervisor.start_cluster(&topology()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(dir.path().join("127.0.0.1_50010").is_dir());
        assert!(dir.path().join("127.0.0.1_50011").is_dir());

        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn shutdown_terminates_all() {
        let dir = tempfile::tempdir().unwrap();
        let bins = binaries("exec sleep 30", "exec sleep 30");
        let mut supervisor = ProcessSupervisor::new(&bins, dir.path(), Duration::from_secs(5));
        supervisor.start_cluster(&topology()).await.unwrap();

        let pids: Vec<u32> = supervisor
            .processes
            .values()
            .map(|p| p.id().unwrap())
            .collect();
        assert!(pids.iter().all(|pid| is_alive(*pid)));

        supervisor.shutdown_all().await;

        assert!(supervisor.is_empty());
        assert!(pids.iter().all(|pid| !is_alive(*pid)));

        // a second shutdown has nothing left to signal
        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn shutdown_kills_unresponsive_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let bins = binaries(
            r#"trap "" TERM; while true; do sleep 0.1; done"#,
            "exec sleep 30",
        );
        let mut supervisor =
            ProcessSupervisor::new(&bins, dir.path(), Duration::from_millis(300));
        supervisor.start_cluster(&topology()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let start = Instant::now();
        supervisor.shutdown_all().await;

        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn shutdown_tolerates_dead_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let bins = binaries("exit 3", "exec sleep 30");
        let mut supervisor = ProcessSupervisor::new(&bins, dir.path(), Duration::from_secs(5));
        supervisor.start_cluster(&topology()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        supervisor.shutdown_all().await;
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_keeps_started_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let bins = Binaries {
            master: shell("exec sleep 30"),
            chunkserver: CommandLine::new(dir.path().join("missing-chunkserver")),
            client: shell("exit 0"),
        };
        let mut supervisor = ProcessSupervisor::new(&bins, dir.path(), Duration::from_secs(5));

        let err = supervisor.start_cluster(&topology()).await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Spawn { node, .. } if node.role == NodeRole::Chunkserver
        ));
        assert_eq!(supervisor.len(), 1);

        supervisor.shutdown_all().await;
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn settle_delay_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let bins = binaries("exit 0", "exit 0");
        let supervisor = ProcessSupervisor::new(&bins, dir.path(), Duration::from_secs(5));
        let mut client = ClientInvoker::new(shell("exit 1"), dir.path());
        let startup = Startup {
            settle_delay: Duration::from_millis(150),
            ..Default::default()
        };

        let start = Instant::now();
        supervisor.await_ready(&startup, &mut client).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn readiness_probe_polls_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let bins = binaries("exit 0", "exit 0");
        let supervisor = ProcessSupervisor::new(&bins, dir.path(), Duration::from_secs(5));
        // succeeds on the third call
        let mut client = ClientInvoker::new(
            shell(r#"echo x >> probes; test $(wc -l < probes) -ge 3"#),
            dir.path(),
        );
        let startup = Startup {
            settle_delay: Duration::from_secs(60),
            readiness_probe: Some(ReadinessProbe {
                args: vec!["ping".into()],
                attempts: 5,
                interval: Duration::from_millis(10),
            }),
            ..Default::default()
        };

        supervisor.await_ready(&startup, &mut client).await.unwrap();
        let probes = std::fs::read_to_string(dir.path().join("probes")).unwrap();
        assert_eq!(probes.lines().count(), 3);
    }

    #[tokio::test]
    async fn readiness_probe_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let bins = binaries("exit 0", "exit 0");
        let supervisor = ProcessSupervisor::new(&bins, dir.path(), Duration::from_secs(5));
        let mut client = ClientInvoker::new(shell("exit 1"), dir.path());
        let startup = Startup {
            readiness_probe: Some(ReadinessProbe {
                args: vec![],
                attempts: 3,
                interval: Duration::from_millis(10),
            }),
            ..Default::default()
        };

        let err = supervisor.await_ready(&startup, &mut client).await.unwrap_err();
        assert!(matches!(err, HarnessError::NotReady { attempts: 3 }));
    }
}
