//! A fake storage cluster built from shell scripts.
//!
//! ```
//! use clusterbench_test::fake::FakeCluster;
//!
//! let cluster = FakeCluster::new();
//! let client = cluster.script("client");
//! assert!(client.exists());
//! // run `sh <client> upload <file>` with `cluster.work_dir()` as current directory...
//! ```
//!
//! The scripts are meant to be run through `sh` rather than executed directly:
//!
//! - `master` and `chunkserver` expect `-a <ip:port>`, record their address and pid, and then
//!   sleep until terminated. A chunkserver also creates its state directory in the current
//!   directory, named after its address with `:` replaced by `_`.
//! - `client` expects `<operation> <file>`. `upload` copies the file into an internal store,
//!   `read` succeeds if the file was uploaded before. Any other operation succeeds. Every call is
//!   recorded, and [`FakeCluster::fail`] makes an operation fail from then on.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary directory holding fake cluster scripts, their logs and a work directory.
///
/// Everything is deleted when the cluster is dropped.
#[derive(Debug)]
pub struct FakeCluster {
    dir: TempDir,
}

impl FakeCluster {
    /// Writes the fake scripts into a fresh temporary directory.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display().to_string();

        fs::create_dir(dir.path().join("work")).unwrap();
        fs::create_dir(dir.path().join("store")).unwrap();

        let master = format!(
            r#"
            echo "$$ master $2" >> '{root}/nodes.log'
            exec sleep 600
            "#
        );
        let chunkserver = format!(
            r#"
            mkdir -p "$(echo "$2" | tr ':' '_')"
            echo "$$ chunkserver $2" >> '{root}/nodes.log'
            exec sleep 600
            "#
        );
        let client = format!(
            r#"
            echo "$1 $2" >> '{root}/calls.log'
            if [ -e '{root}/fail_'"$1" ]; then
                echo "injected $1 failure" >&2
                exit 1
            fi
            case "$1" in
                upload) cp "$2" '{root}/store/'"$2" ;;
                read) test -f '{root}/store/'"$2" ;;
            esac
            "#
        );

        for (name, script) in [("master", master), ("chunkserver", chunkserver), ("client", client)] {
            fs::write(dir.path().join(name), script).unwrap();
        }

        Self { dir }
    }

    /// Path of the script for `master`, `chunkserver` or `client`.
    pub fn script(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Directory to use as the harness's working directory.
    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    /// Makes every subsequent client call of `operation` exit with status 1.
    pub fn fail(&self, operation: &str) {
        fs::write(self.dir.path().join(format!("fail_{operation}")), "").unwrap();
    }

    /// Client calls in order, formatted as `<operation> <file>`.
    pub fn calls(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("calls.log"))
    }

    /// Launched nodes in order, formatted as `<role> <ip:port>`.
    pub fn launched(&self) -> Vec<String> {
        self.nodes().map(|(_, node)| node).collect()
    }

    /// Process ids of all launched nodes.
    pub fn pids(&self) -> Vec<i32> {
        self.nodes().filter_map(|(pid, _)| pid.parse().ok()).collect()
    }

    /// Size of an uploaded file, if the client stored it.
    pub fn stored(&self, file_name: &str) -> Option<u64> {
        let path = self.dir.path().join("store").join(file_name);
        fs::metadata(path).ok().map(|meta| meta.len())
    }

    fn nodes(&self) -> impl Iterator<Item = (String, String)> {
        read_lines(&self.dir.path().join("nodes.log"))
            .into_iter()
            .filter_map(|line| {
                let (pid, node) = line.split_once(' ')?;
                Some((pid.to_owned(), node.to_owned()))
            })
    }
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}
