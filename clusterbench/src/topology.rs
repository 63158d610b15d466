//! The fixed set of nodes making up the cluster under test.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// The role a node plays in the storage cluster.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Coordinator node.
    Master,
    /// Storage node with an on-disk state directory.
    Chunkserver,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Master => f.write_str("master"),
            NodeRole::Chunkserver => f.write_str("chunkserver"),
        }
    }
}

/// Identity of a node: its role and its bind address.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId {
    /// What the node does in the cluster.
    pub role: NodeRole,
    /// Address passed to the node as `-a <ip:port>`.
    pub addr: SocketAddr,
}

impl NodeId {
    /// Name of the directory the node keeps its state in, relative to the working directory.
    ///
    /// This is the address with every `:` replaced by `_`, e.g. `127.0.0.1_50010`.
    pub fn state_dir_name(&self) -> String {
        self.addr.to_string().replace(':', "_")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.role, self.addr)
    }
}

/// Ordered, immutable set of cluster nodes.
///
/// Masters come first, followed by chunkservers, each in configuration order.
#[derive(Clone, Debug)]
pub struct ClusterTopology {
    nodes: Vec<NodeId>,
}

impl ClusterTopology {
    /// Builds a topology, rejecting duplicate addresses.
    pub fn new(masters: &[SocketAddr], chunkservers: &[SocketAddr]) -> HarnessResult<Self> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(masters.len() + chunkservers.len());

        let roles = masters
            .iter()
            .map(|addr| (NodeRole::Master, *addr))
            .chain(chunkservers.iter().map(|addr| (NodeRole::Chunkserver, *addr)));

        for (role, addr) in roles {
            if !seen.insert(addr) {
                return Err(HarnessError::DuplicateAddress(addr));
            }
            nodes.push(NodeId { role, addr });
        }

        Ok(Self { nodes })
    }

    /// All nodes in launch order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Only the nodes with the given role.
    pub fn with_role(&self, role: NodeRole) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter().filter(move |node| node.role == role)
    }

    /// State directories owned by chunkservers, resolved against `work_dir`.
    pub fn state_dirs(&self, work_dir: &Path) -> Vec<PathBuf> {
        self.with_role(NodeRole::Chunkserver)
            .map(|node| work_dir.join(node.state_dir_name()))
            .collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the topology has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
